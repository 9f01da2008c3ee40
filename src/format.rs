//! Firmware file format (`.cyacd`)
//!
//! Line 1 is the header, 12 hex characters: silicon id (4, big-endian),
//! silicon revision (1) and checksum type (1). Every other non-empty line is
//! one flash row:
//!
//! ```text
//! [ARRAY_ID(1)][ROW_NUM(2)][DATA_LEN(2)][DATA(DATA_LEN)][CHECKSUM(1)]
//! ```
//!
//! Plain rows store ROW_NUM and DATA_LEN little-endian. Rows starting with
//! `:` use the same layout with both fields big-endian.
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use scroll::{BE, Endian, LE, Pread};

use crate::checksum::{ChecksumType, row_checksum};
use crate::constants::MAX_DATA_SIZE;
use crate::error::{FirmwareError, Result};

type ParseResult<T> = std::result::Result<T, FirmwareError>;

const HEADER_LEN: usize = 12;
/// ARRAY_ID + ROW_NUM + DATA_LEN
const ROW_HEADER_SIZE: usize = 5;
const MIN_ROW_BYTES: usize = ROW_HEADER_SIZE + 1;

/// One flash row, as stored in the firmware file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlashRow {
    pub array_id: u8,
    pub row_number: u16,
    pub data: Vec<u8>,
    /// The row's trailing checksum byte, as stored in the file.
    pub checksum: u8,
}

impl FlashRow {
    /// Builds a row and computes the checksum the file would carry for it.
    pub fn new(array_id: u8, row_number: u16, data: Vec<u8>) -> Self {
        let checksum = row_checksum(&Self::encode(array_id, row_number, &data, LE));
        FlashRow {
            array_id,
            row_number,
            data,
            checksum,
        }
    }

    fn encode(array_id: u8, row_number: u16, data: &[u8], endian: Endian) -> Vec<u8> {
        let (row, len) = match endian {
            Endian::Big => (row_number.to_be_bytes(), (data.len() as u16).to_be_bytes()),
            Endian::Little => (row_number.to_le_bytes(), (data.len() as u16).to_le_bytes()),
        };
        let mut buf = Vec::with_capacity(MIN_ROW_BYTES + data.len());
        buf.push(array_id);
        buf.extend_from_slice(&row);
        buf.extend_from_slice(&len);
        buf.extend_from_slice(data);
        buf
    }

    fn parse(line: &str, line_no: usize) -> ParseResult<Self> {
        let (hex_part, endian) = match line.strip_prefix(':') {
            Some(rest) => (rest, BE),
            None => (line, LE),
        };
        if hex_part.len() < MIN_ROW_BYTES * 2 {
            return Err(FirmwareError::RowTooShort {
                line: line_no,
                len: hex_part.len(),
            });
        }
        let raw = hex::decode(hex_part).map_err(|source| FirmwareError::InvalidHex {
            line: line_no,
            source,
        })?;

        let array_id = raw[0];
        let row_number: u16 = raw.pread_with(1, endian).map_err(|_| too_short(line_no, hex_part))?;
        let data_len: u16 = raw.pread_with(3, endian).map_err(|_| too_short(line_no, hex_part))?;

        let expected = MIN_ROW_BYTES + data_len as usize;
        if raw.len() != expected {
            return Err(FirmwareError::DataLengthMismatch {
                line: line_no,
                got: raw.len(),
                expected,
            });
        }
        if data_len == 0 || data_len as usize > MAX_DATA_SIZE {
            return Err(FirmwareError::InvalidRowLength {
                line: line_no,
                len: data_len as usize,
            });
        }

        let (body, stored) = raw.split_at(raw.len() - 1);
        let computed = row_checksum(body);
        if stored[0] != computed {
            return Err(FirmwareError::RowChecksumMismatch {
                line: line_no,
                expected: stored[0],
                actual: computed,
            });
        }

        Ok(FlashRow {
            array_id,
            row_number,
            data: body[ROW_HEADER_SIZE..].to_vec(),
            checksum: stored[0],
        })
    }
}

fn too_short(line: usize, hex_part: &str) -> FirmwareError {
    FirmwareError::RowTooShort {
        line,
        len: hex_part.len(),
    }
}

/// Standard little-endian row line.
impl fmt::Display for FlashRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut raw = Self::encode(self.array_id, self.row_number, &self.data, LE);
        raw.push(self.checksum);
        write!(f, "{}", hex::encode_upper(raw))
    }
}

/// A parsed firmware image. Rows keep file order; duplicate row numbers are
/// kept and programmed in sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Firmware {
    pub silicon_id: u32,
    pub silicon_rev: u8,
    pub checksum_type: ChecksumType,
    pub rows: Vec<FlashRow>,
}

impl Firmware {
    pub fn parse(text: &str) -> ParseResult<Self> {
        let mut lines = text.lines().enumerate().map(|(i, l)| (i + 1, l.trim()));

        let header = match lines.next() {
            Some((_, l)) if !l.is_empty() => l,
            _ => return Err(FirmwareError::MissingHeader),
        };
        let mut fw = Self::parse_header(header)?;

        for (line_no, line) in lines {
            if line.is_empty() {
                continue;
            }
            fw.rows.push(FlashRow::parse(line, line_no)?);
        }

        if fw.rows.is_empty() {
            return Err(FirmwareError::NoRowsFound);
        }
        Ok(fw)
    }

    fn parse_header(line: &str) -> ParseResult<Self> {
        if line.len() != HEADER_LEN {
            return Err(FirmwareError::InvalidHeader(line.to_string()));
        }
        let raw = hex::decode(line).map_err(|_| FirmwareError::InvalidHeader(line.to_string()))?;
        let checksum_type =
            ChecksumType::try_from(raw[5]).map_err(FirmwareError::InvalidChecksumType)?;
        Ok(Firmware {
            silicon_id: raw
                .pread_with(0, BE)
                .map_err(|_| FirmwareError::InvalidHeader(line.to_string()))?,
            silicon_rev: raw[4],
            checksum_type,
            rows: Vec::new(),
        })
    }

    /// Sum of all row data lengths.
    pub fn total_bytes(&self) -> usize {
        self.rows.iter().map(|r| r.data.len()).sum()
    }

    /// Distinct array ids, in order of first appearance.
    pub fn array_ids(&self) -> Vec<u8> {
        let mut ids = vec![];
        for row in &self.rows {
            if !ids.contains(&row.array_id) {
                ids.push(row.array_id);
            }
        }
        ids
    }
}

impl FromStr for Firmware {
    type Err = FirmwareError;

    fn from_str(s: &str) -> ParseResult<Self> {
        Firmware::parse(s)
    }
}

/// Re-emits the image in the standard (little-endian) dialect.
impl fmt::Display for Firmware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:08X}{:02X}{:02X}",
            self.silicon_id,
            self.silicon_rev,
            u8::from(self.checksum_type)
        )?;
        for row in &self.rows {
            writeln!(f, "{}", row)?;
        }
        Ok(())
    }
}

pub fn read_firmware_from_file<P: AsRef<Path>>(path: P) -> Result<Firmware> {
    let p = path.as_ref();
    let text = std::fs::read_to_string(p)?;
    let fw = Firmware::parse(&text)?;
    log::info!(
        "Read {}: silicon id 0x{:08X}, {} rows, {} bytes",
        p.display(),
        fw.silicon_id,
        fw.rows.len(),
        fw.total_bytes()
    );
    Ok(fw)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "1E9602AA0000\n000000040001020304F2\n";

    #[test]
    fn parses_minimal_file() {
        let fw = Firmware::parse(SAMPLE).unwrap();
        assert_eq!(fw.silicon_id, 0x1e9602aa);
        assert_eq!(fw.silicon_rev, 0x00);
        assert_eq!(fw.checksum_type, ChecksumType::BasicSum);
        assert_eq!(
            fw.rows,
            vec![FlashRow {
                array_id: 0,
                row_number: 0,
                data: vec![1, 2, 3, 4],
                checksum: 0xf2,
            }]
        );
    }

    #[test]
    fn parsing_is_deterministic() {
        assert_eq!(
            Firmware::parse(SAMPLE).unwrap(),
            SAMPLE.parse::<Firmware>().unwrap()
        );
    }

    #[test]
    fn colon_rows_are_big_endian() {
        let row = FlashRow::new(0, 0x0045, vec![0xde, 0xad]);
        let mut raw = FlashRow::encode(0, 0x0045, &row.data, BE);
        raw.push(row_checksum(&raw));
        let text = format!("1E9602AA0000\n:{}\n", hex::encode(&raw));
        let fw = Firmware::parse(&text).unwrap();
        assert_eq!(fw.rows[0].row_number, 0x0045);
        assert_eq!(fw.rows[0].data, vec![0xde, 0xad]);
        // Same line without the colon reads the fields little-endian.
        let text = format!("1E9602AA0000\n{}\n", hex::encode(&raw));
        assert!(matches!(
            Firmware::parse(&text),
            Err(FirmwareError::DataLengthMismatch { line: 2, .. })
        ));
    }

    #[test]
    fn row_round_trips_through_text() {
        let row = FlashRow::new(1, 0x0123, (0..128).collect());
        let fw = Firmware {
            silicon_id: 0x04c8_1193,
            silicon_rev: 0x11,
            checksum_type: ChecksumType::Crc16,
            rows: vec![row.clone(), row],
        };
        assert_eq!(Firmware::parse(&fw.to_string()).unwrap(), fw);
    }

    #[test]
    fn flipped_data_byte_fails_checksum() {
        let row = FlashRow::new(0, 7, vec![0x10, 0x20, 0x30]).to_string();
        for i in 0..3 {
            let mut raw = hex::decode(&row).unwrap();
            raw[ROW_HEADER_SIZE + i] ^= 0x01;
            let text = format!("1E9602AA0000\n{}\n", hex::encode(raw));
            assert!(matches!(
                Firmware::parse(&text),
                Err(FirmwareError::RowChecksumMismatch { line: 2, .. })
            ));
        }
    }

    #[test]
    fn keeps_duplicate_rows_in_file_order() {
        let a = FlashRow::new(0, 5, vec![1]);
        let b = FlashRow::new(0, 2, vec![2]);
        let c = FlashRow::new(0, 5, vec![3]);
        let text = format!("1E9602AA0000\n{}\n\n{}\r\n{}\n", a, b, c);
        let fw = Firmware::parse(&text).unwrap();
        assert_eq!(fw.rows, vec![a, b, c]);
        assert_eq!(fw.total_bytes(), 3);
        assert_eq!(fw.array_ids(), vec![0]);
    }

    #[test]
    fn header_errors() {
        assert!(matches!(Firmware::parse(""), Err(FirmwareError::MissingHeader)));
        assert!(matches!(
            Firmware::parse("1E9602AA00\n"),
            Err(FirmwareError::InvalidHeader(_))
        ));
        assert!(matches!(
            Firmware::parse("1E9602AA00ZZ\n"),
            Err(FirmwareError::InvalidHeader(_))
        ));
        assert!(matches!(
            Firmware::parse("1E9602AA0002\n000000040001020304F2\n"),
            Err(FirmwareError::InvalidChecksumType(0x02))
        ));
        assert!(matches!(
            Firmware::parse("1E9602AA0000\n\n"),
            Err(FirmwareError::NoRowsFound)
        ));
    }

    #[test]
    fn header_must_be_first_line() {
        assert!(matches!(
            Firmware::parse("\n1E9602AA0000\n000000040001020304F2\n"),
            Err(FirmwareError::MissingHeader)
        ));
        assert!(matches!(
            Firmware::parse("  \r\n1E9602AA0000\n000000040001020304F2\n"),
            Err(FirmwareError::MissingHeader)
        ));
        assert!(Firmware::parse(" 1E9602AA0000 \n000000040001020304F2\n").is_ok());
    }

    #[test]
    fn row_length_must_fit_one_program_row() {
        // consistent empty row: header only plus checksum
        assert!(matches!(
            Firmware::parse("1E9602AA0000\n000000000000\n"),
            Err(FirmwareError::InvalidRowLength { line: 2, len: 0 })
        ));

        let mut raw = FlashRow::encode(0, 1, &[0xa5; MAX_DATA_SIZE + 1], LE);
        raw.push(row_checksum(&raw));
        let text = format!("1E9602AA0000\n000000040001020304F2\n{}\n", hex::encode(&raw));
        assert!(matches!(
            Firmware::parse(&text),
            Err(FirmwareError::InvalidRowLength { line: 3, len: 257 })
        ));

        let mut raw = FlashRow::encode(0, 1, &[0xa5; MAX_DATA_SIZE], LE);
        raw.push(row_checksum(&raw));
        let text = format!("1E9602AA0000\n{}\n", hex::encode(&raw));
        assert_eq!(Firmware::parse(&text).unwrap().total_bytes(), MAX_DATA_SIZE);
    }

    #[test]
    fn row_errors() {
        assert!(matches!(
            Firmware::parse("1E9602AA0000\n0000000400\n"),
            Err(FirmwareError::RowTooShort { line: 2, len: 10 })
        ));
        assert!(matches!(
            Firmware::parse("1E9602AA0000\n00000004000102030\n"),
            Err(FirmwareError::InvalidHex { line: 2, .. })
        ));
        assert!(matches!(
            Firmware::parse("1E9602AA0000\n0000000500010203F2\n"),
            Err(FirmwareError::DataLengthMismatch { line: 2, got: 9, expected: 11 })
        ));
        assert!(matches!(
            Firmware::parse("1E9602AA0000\n000000040001020304F3\n"),
            Err(FirmwareError::RowChecksumMismatch { line: 2, expected: 0xf3, actual: 0xf2 })
        ));
    }
}
