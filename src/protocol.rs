//! The underlying binary protocol of the PSoC bootloader
//!
//! Every packet, in both directions, is framed as:
//!
//! ```text
//! [SOP=0x01][CMD/STATUS][LEN_LO][LEN_HI][DATA...][CHK_LO][CHK_HI][EOP=0x17]
//! ```
//!
//! Command frames are checksummed from SOP through the end of DATA. Response
//! frames are checksummed from the status byte through the end of DATA.

use std::fmt;

use scroll::{LE, Pread, Pwrite};

use crate::checksum::ChecksumType;
use crate::constants::{EOP, KEY_SIZE, MAX_DATA_SIZE, MIN_FRAME_SIZE, SOP, commands, status};
use crate::error::FrameError;

type Result<T> = std::result::Result<T, FrameError>;

/// Bootloader command
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    /// Enter bootloader mode. Returns silicon id, revision and bootloader version.
    EnterBootloader { key: Vec<u8> },
    /// Query the programmable row range of a flash array.
    GetFlashSize { array_id: u8 },
    /// Program one row. Any data previously buffered with `SendData` is
    /// prepended on the device side.
    ProgramRow {
        array_id: u8,
        row_number: u16,
        data: Vec<u8>,
    },
    /// Buffer a chunk of row data on the device.
    SendData { data: Vec<u8> },
    /// Read back the checksum of a programmed row.
    VerifyRow { array_id: u8, row_number: u16 },
    /// Verify the checksum of the whole application.
    VerifyChecksum,
    EraseRow { array_id: u8, row_number: u16 },
    /// Reset the bootloader to a clean state, discarding buffered data.
    SyncBootloader,
    /// Leave the bootloader and reset into the application.
    ///
    /// The device usually resets before a response makes it back.
    ExitBootloader,
    /// Read the first 56 bytes of an application's metadata.
    GetMetadata { app: u8 },
    /// Multi-application bootloaders only.
    GetAppStatus { app: u8 },
    /// Multi-application bootloaders only.
    SetActiveApp { app: u8 },
}

impl Command {
    pub fn enter_bootloader(key: &[u8]) -> Self {
        Command::EnterBootloader { key: key.to_vec() }
    }

    pub fn program_row(array_id: u8, row_number: u16, data: &[u8]) -> Self {
        Command::ProgramRow {
            array_id,
            row_number,
            data: data.to_vec(),
        }
    }

    pub fn send_data(data: &[u8]) -> Self {
        Command::SendData { data: data.to_vec() }
    }

    pub fn verify_row(array_id: u8, row_number: u16) -> Self {
        Command::VerifyRow {
            array_id,
            row_number,
        }
    }

    pub fn erase_row(array_id: u8, row_number: u16) -> Self {
        Command::EraseRow {
            array_id,
            row_number,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Command::EnterBootloader { .. } => commands::ENTER_BOOTLOADER,
            Command::GetFlashSize { .. } => commands::GET_FLASH_SIZE,
            Command::ProgramRow { .. } => commands::PROGRAM_ROW,
            Command::SendData { .. } => commands::SEND_DATA,
            Command::VerifyRow { .. } => commands::VERIFY_ROW,
            Command::VerifyChecksum => commands::VERIFY_CHECKSUM,
            Command::EraseRow { .. } => commands::ERASE_ROW,
            Command::SyncBootloader => commands::SYNC_BOOTLOADER,
            Command::ExitBootloader => commands::EXIT_BOOTLOADER,
            Command::GetMetadata { .. } => commands::GET_METADATA,
            Command::GetAppStatus { .. } => commands::GET_APP_STATUS,
            Command::SetActiveApp { .. } => commands::SET_ACTIVE_APP,
        }
    }

    /// Operation name used in error messages and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::EnterBootloader { .. } => "enter bootloader",
            Command::GetFlashSize { .. } => "get flash size",
            Command::ProgramRow { .. } => "program row",
            Command::SendData { .. } => "send data",
            Command::VerifyRow { .. } => "verify row",
            Command::VerifyChecksum => "verify checksum",
            Command::EraseRow { .. } => "erase row",
            Command::SyncBootloader => "sync bootloader",
            Command::ExitBootloader => "exit bootloader",
            Command::GetMetadata { .. } => "get metadata",
            Command::GetAppStatus { .. } => "get app status",
            Command::SetActiveApp { .. } => "set active app",
        }
    }

    /// Encodes the command with the default basic-sum packet checksum.
    pub fn into_raw(self) -> Result<Vec<u8>> {
        self.into_raw_with(ChecksumType::BasicSum)
    }

    pub fn into_raw_with(self, checksum_type: ChecksumType) -> Result<Vec<u8>> {
        let code = self.code();
        let payload = match self {
            Command::EnterBootloader { key } => {
                if key.len() != KEY_SIZE {
                    return Err(FrameError::InvalidKeyLength(key.len()));
                }
                key
            }
            Command::GetFlashSize { array_id } => vec![array_id],
            Command::ProgramRow {
                array_id,
                row_number,
                data,
            } => {
                check_data_len("program row", &data)?;
                // ARRAY_ID, ROW_NUM, DATA
                let mut buf = vec![0u8; 3 + data.len()];
                buf[0] = array_id;
                buf.pwrite_with(row_number, 1, LE)?;
                buf[3..].copy_from_slice(&data);
                buf
            }
            Command::SendData { data } => {
                check_data_len("send data", &data)?;
                data
            }
            Command::VerifyRow {
                array_id,
                row_number,
            }
            | Command::EraseRow {
                array_id,
                row_number,
            } => {
                let mut buf = vec![array_id, 0, 0];
                buf.pwrite_with(row_number, 1, LE)?;
                buf
            }
            Command::VerifyChecksum | Command::SyncBootloader | Command::ExitBootloader => {
                vec![]
            }
            Command::GetMetadata { app }
            | Command::GetAppStatus { app }
            | Command::SetActiveApp { app } => vec![app],
        };
        encode_frame(code, &payload, checksum_type, 0)
    }

    /// Decodes a command frame, as a device would. The checksum covers SOP.
    pub fn from_raw(raw: &[u8], checksum_type: ChecksumType) -> Result<Self> {
        let (code, payload) = decode_frame(raw, checksum_type, 0)?;
        let row_address = |name: &'static str| -> Result<(u8, u16)> {
            if payload.len() != 3 {
                return Err(FrameError::InvalidDataLength {
                    command: name,
                    len: payload.len(),
                });
            }
            Ok((payload[0], payload.pread_with::<u16>(1, LE)?))
        };
        let app_number = |name: &'static str| -> Result<u8> {
            match payload {
                [app] => Ok(*app),
                _ => Err(FrameError::InvalidDataLength {
                    command: name,
                    len: payload.len(),
                }),
            }
        };

        let cmd = match code {
            commands::ENTER_BOOTLOADER => {
                if payload.len() != KEY_SIZE {
                    return Err(FrameError::InvalidKeyLength(payload.len()));
                }
                Command::enter_bootloader(payload)
            }
            commands::GET_FLASH_SIZE => Command::GetFlashSize {
                array_id: app_number("get flash size")?,
            },
            commands::PROGRAM_ROW => {
                if payload.len() < 4 || payload.len() > 3 + MAX_DATA_SIZE {
                    return Err(FrameError::InvalidDataLength {
                        command: "program row",
                        len: payload.len().saturating_sub(3),
                    });
                }
                Command::program_row(payload[0], payload.pread_with(1, LE)?, &payload[3..])
            }
            commands::SEND_DATA => {
                check_data_len("send data", payload)?;
                Command::send_data(payload)
            }
            commands::VERIFY_ROW => {
                let (array_id, row_number) = row_address("verify row")?;
                Command::verify_row(array_id, row_number)
            }
            commands::ERASE_ROW => {
                let (array_id, row_number) = row_address("erase row")?;
                Command::erase_row(array_id, row_number)
            }
            commands::VERIFY_CHECKSUM => Command::VerifyChecksum,
            commands::SYNC_BOOTLOADER => Command::SyncBootloader,
            commands::EXIT_BOOTLOADER => Command::ExitBootloader,
            commands::GET_METADATA => Command::GetMetadata {
                app: app_number("get metadata")?,
            },
            commands::GET_APP_STATUS => Command::GetAppStatus {
                app: app_number("get app status")?,
            },
            commands::SET_ACTIVE_APP => Command::SetActiveApp {
                app: app_number("set active app")?,
            },
            other => return Err(FrameError::UnknownCommand(other)),
        };
        Ok(cmd)
    }
}

/// Response to a Command. The request command is not echoed back.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Response {
    /// Status = 0x00
    Ok(Vec<u8>),
    /// Otherwise
    Err(u8, Vec<u8>),
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Ok(data) => write!(f, "OK[{}]", hex::encode(data)),
            Response::Err(code, data) => write!(
                f,
                "ERROR({:02x}: {})[{}]",
                code,
                status::name(*code),
                hex::encode(data)
            ),
        }
    }
}

impl Response {
    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Ok(_))
    }

    pub fn status(&self) -> u8 {
        match self {
            Response::Ok(_) => status::SUCCESS,
            Response::Err(code, _) => *code,
        }
    }

    pub fn payload(&self) -> &[u8] {
        match self {
            Response::Ok(payload) => payload,
            Response::Err(_, payload) => payload,
        }
    }

    pub fn from_raw(raw: &[u8], checksum_type: ChecksumType) -> Result<Self> {
        let (code, data) = parse_response_with(raw, checksum_type)?;
        if code == status::SUCCESS {
            Ok(Response::Ok(data.to_vec()))
        } else {
            Ok(Response::Err(code, data.to_vec()))
        }
    }

    /// Encodes the response, as a device would.
    pub fn into_raw(self, checksum_type: ChecksumType) -> Result<Vec<u8>> {
        let code = self.status();
        encode_frame(code, self.payload(), checksum_type, 1)
    }
}

/// Validates a basic-sum response frame and splits it into status and DATA.
pub fn parse_response(frame: &[u8]) -> Result<(u8, &[u8])> {
    parse_response_with(frame, ChecksumType::BasicSum)
}

pub fn parse_response_with(frame: &[u8], checksum_type: ChecksumType) -> Result<(u8, &[u8])> {
    decode_frame(frame, checksum_type, 1)
}

fn check_data_len(command: &'static str, data: &[u8]) -> Result<()> {
    if data.is_empty() || data.len() > MAX_DATA_SIZE {
        return Err(FrameError::InvalidDataLength {
            command,
            len: data.len(),
        });
    }
    Ok(())
}

/// `checksum_from` is the first byte covered by the checksum: 0 for
/// commands (SOP included), 1 for responses.
fn encode_frame(
    code: u8,
    payload: &[u8],
    checksum_type: ChecksumType,
    checksum_from: usize,
) -> Result<Vec<u8>> {
    let data_end = 4 + payload.len();
    let mut buf = vec![0u8; MIN_FRAME_SIZE + payload.len()];
    buf[0] = SOP;
    buf[1] = code;
    buf.pwrite_with(payload.len() as u16, 2, LE)?;
    buf[4..data_end].copy_from_slice(payload);
    let checksum = checksum_type.compute(&buf[checksum_from..data_end]);
    buf.pwrite_with(checksum, data_end, LE)?;
    buf[data_end + 2] = EOP;
    Ok(buf)
}

fn decode_frame(
    frame: &[u8],
    checksum_type: ChecksumType,
    checksum_from: usize,
) -> Result<(u8, &[u8])> {
    if frame.len() < MIN_FRAME_SIZE {
        return Err(FrameError::FrameTooShort(frame.len()));
    }
    if frame[0] != SOP {
        return Err(FrameError::InvalidStartOfPacket(frame[0]));
    }
    let last = frame[frame.len() - 1];
    if last != EOP {
        return Err(FrameError::InvalidEndOfPacket(last));
    }
    let len = frame.pread_with::<u16>(2, LE)? as usize;
    if MIN_FRAME_SIZE + len != frame.len() {
        return Err(FrameError::FrameLengthMismatch {
            got: frame.len(),
            expected: MIN_FRAME_SIZE + len,
        });
    }
    let data_end = frame.len() - 3;
    let expected = frame.pread_with::<u16>(data_end, LE)?;
    let actual = checksum_type.compute(&frame[checksum_from..data_end]);
    if expected != actual {
        return Err(FrameError::ChecksumMismatch { expected, actual });
    }
    Ok((frame[1], &frame[4..data_end]))
}
