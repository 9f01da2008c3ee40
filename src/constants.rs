/// Frame start marker.
pub const SOP: u8 = 0x01;
/// Frame end marker.
pub const EOP: u8 = 0x17;

/// SOP(1) + CMD/STATUS(1) + LEN(2) + CHECKSUM(2) + EOP(1)
pub const MIN_FRAME_SIZE: usize = 7;

/// Largest DATA payload a single frame may carry.
pub const MAX_DATA_SIZE: usize = 256;

/// Packet size of the USB HID bootloader endpoints.
pub const MAX_PACKET_SIZE: usize = 64;

/// Framing overhead of a SendData command: a bare frame.
pub const SEND_DATA_OVERHEAD: usize = MIN_FRAME_SIZE;
/// Framing overhead of a ProgramRow command: frame + array id + row number.
pub const PROGRAM_ROW_OVERHEAD: usize = MIN_FRAME_SIZE + 3;

/// 64 - 7 = 57: every SendData frame fills a transport packet exactly, and
/// the trailing ProgramRow frame is at most `57 + 10 = 67` bytes, i.e. it
/// overruns one packet by no more than `PROGRAM_ROW_OVERHEAD - SEND_DATA_OVERHEAD`.
pub const DEFAULT_CHUNK_SIZE: usize = MAX_PACKET_SIZE - SEND_DATA_OVERHEAD;

/// Bootloader key length for EnterBootloader.
pub const KEY_SIZE: usize = 6;

/// Receive buffer large enough for any response plus HID padding.
pub const RESPONSE_BUFFER_SIZE: usize = 512;

pub mod commands {
    pub const VERIFY_CHECKSUM: u8 = 0x31;
    pub const GET_FLASH_SIZE: u8 = 0x32;
    pub const GET_APP_STATUS: u8 = 0x33;
    pub const ERASE_ROW: u8 = 0x34;
    pub const SYNC_BOOTLOADER: u8 = 0x35;
    pub const SET_ACTIVE_APP: u8 = 0x36;
    pub const SEND_DATA: u8 = 0x37;
    pub const ENTER_BOOTLOADER: u8 = 0x38;
    pub const PROGRAM_ROW: u8 = 0x39;
    pub const VERIFY_ROW: u8 = 0x3a;
    pub const EXIT_BOOTLOADER: u8 = 0x3b;
    pub const GET_METADATA: u8 = 0x3c;
}

pub mod status {
    pub const SUCCESS: u8 = 0x00;
    pub const ERR_VERIFY: u8 = 0x02;
    pub const ERR_LENGTH: u8 = 0x03;
    pub const ERR_DATA: u8 = 0x04;
    pub const ERR_COMMAND: u8 = 0x05;
    pub const ERR_KEY: u8 = 0x06;
    pub const ERR_VERSION: u8 = 0x07;
    pub const ERR_CHECKSUM: u8 = 0x08;
    pub const ERR_ARRAY: u8 = 0x09;
    pub const ERR_ROW: u8 = 0x0a;
    pub const ERR_APP: u8 = 0x0c;
    pub const ERR_ACTIVE: u8 = 0x0d;
    pub const ERR_UNKNOWN: u8 = 0x0f;

    /// Human readable name of a bootloader status code.
    pub fn name(code: u8) -> &'static str {
        match code {
            SUCCESS => "success",
            ERR_VERIFY => "verification failed",
            ERR_LENGTH => "invalid length",
            ERR_DATA => "invalid data",
            ERR_COMMAND => "unrecognized command",
            ERR_KEY => "invalid key",
            ERR_VERSION => "version mismatch",
            ERR_CHECKSUM => "checksum mismatch",
            ERR_ARRAY => "invalid array id",
            ERR_ROW => "invalid row number",
            ERR_APP => "invalid application",
            ERR_ACTIVE => "application is active",
            ERR_UNKNOWN => "unknown error",
            _ => "unrecognized status",
        }
    }
}

/// Exact DATA lengths of typed responses.
pub mod response_size {
    pub const ENTER_BOOTLOADER: usize = 8;
    pub const GET_FLASH_SIZE: usize = 4;
    pub const VERIFY_ROW: usize = 1;
    pub const VERIFY_CHECKSUM: usize = 1;
    pub const GET_METADATA: usize = 56;
    pub const GET_APP_STATUS: usize = 2;
}
