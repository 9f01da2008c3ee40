//! Error types.

use thiserror::Error;

use crate::constants::status;

/// Frame construction and parsing errors.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame too short: got {0} bytes, minimum is 7")]
    FrameTooShort(usize),
    #[error("invalid start of packet: 0x{0:02X}")]
    InvalidStartOfPacket(u8),
    #[error("invalid end of packet: 0x{0:02X}")]
    InvalidEndOfPacket(u8),
    #[error("frame length mismatch: got {got} bytes, header declares {expected}")]
    FrameLengthMismatch { got: usize, expected: usize },
    #[error("packet checksum mismatch: frame carries 0x{expected:04X}, computed 0x{actual:04X}")]
    ChecksumMismatch { expected: u16, actual: u16 },
    #[error("bootloader key must be exactly 6 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("{command}: data length {len} outside 1..=256")]
    InvalidDataLength { command: &'static str, len: usize },
    #[error("{response} response: got {got} data bytes, expected {expected}")]
    UnexpectedResponseLength {
        response: &'static str,
        got: usize,
        expected: usize,
    },
    #[error("unknown command code 0x{0:02X}")]
    UnknownCommand(u8),
    #[error(transparent)]
    Encoding(#[from] scroll::Error),
}

/// `.cyacd` parsing errors. Line numbers are 1-based.
#[derive(Debug, Error)]
pub enum FirmwareError {
    #[error("firmware file has no header line")]
    MissingHeader,
    #[error("invalid header: expected 12 hex characters, got {0:?}")]
    InvalidHeader(String),
    #[error("invalid checksum type 0x{0:02X} (must be 0x00 or 0x01)")]
    InvalidChecksumType(u8),
    #[error("line {line}: invalid hex data: {source}")]
    InvalidHex {
        line: usize,
        #[source]
        source: hex::FromHexError,
    },
    #[error("line {line}: row too short ({len} hex characters)")]
    RowTooShort { line: usize, len: usize },
    #[error("line {line}: row is {got} bytes, header declares {expected}")]
    DataLengthMismatch {
        line: usize,
        got: usize,
        expected: usize,
    },
    #[error("line {line}: row data length {len} outside 1..=256")]
    InvalidRowLength { line: usize, len: usize },
    #[error("line {line}: row checksum 0x{expected:02X} does not match computed 0x{actual:02X}")]
    RowChecksumMismatch { line: usize, expected: u8, actual: u8 },
    #[error("no rows found in firmware file")]
    NoRowsFound,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Firmware(#[from] FirmwareError),
    /// Device answered with a non-success status.
    #[error("{operation} failed: {} (0x{status:02X})", status_name(.status))]
    Protocol { operation: &'static str, status: u8 },
    #[error(
        "device mismatch: firmware expects silicon id 0x{expected:08X}, device has 0x{actual:08X}"
    )]
    DeviceMismatch { expected: u32, actual: u32 },
    #[error("row {row_number} (array {array_id}) is out of range {min}..={max}")]
    RowOutOfRange {
        row_number: u16,
        array_id: u8,
        min: u16,
        max: u16,
    },
    #[error("verify row {row_number}: expected checksum 0x{expected:02X}, device reports 0x{actual:02X}")]
    RowVerifyMismatch {
        row_number: u16,
        expected: u8,
        actual: u8,
    },
    #[error("application checksum is invalid")]
    Verification,
    #[error("operation cancelled")]
    Cancelled,
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

fn status_name(code: &u8) -> &'static str {
    status::name(*code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_error_names_status() {
        let err = Error::Protocol {
            operation: "program row",
            status: 0x0a,
        };
        assert_eq!(err.to_string(), "program row failed: invalid row number (0x0A)");
    }

    #[test]
    fn structured_fields_in_messages() {
        let err = Error::DeviceMismatch {
            expected: 0x12345678,
            actual: 0x1e9602aa,
        };
        assert_eq!(
            err.to_string(),
            "device mismatch: firmware expects silicon id 0x12345678, device has 0x1E9602AA"
        );
        let err = Error::RowOutOfRange {
            row_number: 4095,
            array_id: 0,
            min: 0,
            max: 511,
        };
        assert_eq!(err.to_string(), "row 4095 (array 0) is out of range 0..=511");
    }

    #[test]
    fn nested_errors_are_transparent() {
        let err: Error = FrameError::InvalidEndOfPacket(0x00).into();
        assert_eq!(err.to_string(), "invalid end of packet: 0x00");
        let err: Error = FirmwareError::NoRowsFound.into();
        assert!(matches!(err, Error::Firmware(FirmwareError::NoRowsFound)));
    }
}
