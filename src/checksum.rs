//! Packet and row checksums used by the bootloader protocol and `.cyacd` files.

use crc::{CRC_16_IBM_3740, Crc};

/// Packet checksum algorithm, selected by the checksum type byte of a
/// firmware header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ChecksumType {
    /// 16-bit sum, two's complement.
    #[default]
    BasicSum,
    /// CRC-16-CCITT.
    Crc16,
}

impl ChecksumType {
    /// Computes a frame checksum with this algorithm.
    pub fn compute(self, bytes: &[u8]) -> u16 {
        match self {
            ChecksumType::BasicSum => packet_checksum(bytes),
            ChecksumType::Crc16 => crc16_ccitt(bytes),
        }
    }
}

impl TryFrom<u8> for ChecksumType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(ChecksumType::BasicSum),
            0x01 => Ok(ChecksumType::Crc16),
            other => Err(other),
        }
    }
}

impl From<ChecksumType> for u8 {
    fn from(value: ChecksumType) -> Self {
        match value {
            ChecksumType::BasicSum => 0x00,
            ChecksumType::Crc16 => 0x01,
        }
    }
}

/// Two's complement of the 16-bit wrapping sum of `bytes`.
pub fn packet_checksum(bytes: &[u8]) -> u16 {
    let sum = bytes
        .iter()
        .fold(0u16, |acc, &b| acc.wrapping_add(b as u16));
    1u16.wrapping_add(0xffff ^ sum)
}

/// Two's complement of the 8-bit wrapping sum of `bytes`.
pub fn row_checksum(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    (!sum).wrapping_add(1)
}

/// The value a device reports for VerifyRow: the file row checksum plus
/// every byte of the row metadata, without negation.
pub fn row_checksum_with_metadata(
    data_checksum: u8,
    array_id: u8,
    row_number: u16,
    data_size: u16,
) -> u8 {
    let [row_hi, row_lo] = row_number.to_be_bytes();
    let [size_hi, size_lo] = data_size.to_be_bytes();
    [array_id, row_hi, row_lo, size_hi, size_lo]
        .iter()
        .fold(data_checksum, |acc, &b| acc.wrapping_add(b))
}

/// CRC-16-CCITT: poly 0x1021, init 0xffff, MSB first, no final xor.
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

pub fn crc16_ccitt(bytes: &[u8]) -> u16 {
    CRC16.checksum(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: &[&[u8]] = &[
        &[],
        &[0x00],
        &[0xff],
        &[0x01, 0x38, 0x06, 0x00, 0x0a, 0x1b, 0x2c, 0x3d, 0x4e, 0x5f],
        &[0xff; 300],
    ];

    #[test]
    fn known_values() {
        assert_eq!(row_checksum(&[0x01, 0x02, 0x03, 0x04]), 0xf6);
        assert_eq!(packet_checksum(&[0x01, 0x38]), 0xffc7);
        assert_eq!(packet_checksum(&[]), 0x0000);
        assert_eq!(row_checksum(&[]), 0x00);
    }

    #[test]
    fn packet_checksum_sums_to_zero() {
        for bytes in SAMPLES {
            let sum = bytes
                .iter()
                .fold(0u16, |acc, &b| acc.wrapping_add(b as u16));
            assert_eq!(sum.wrapping_add(packet_checksum(bytes)), 0);
        }
    }

    #[test]
    fn row_checksum_sums_to_zero() {
        for bytes in SAMPLES {
            let sum = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
            assert_eq!(sum.wrapping_add(row_checksum(bytes)), 0);
        }
    }

    #[test]
    fn metadata_checksum_adds_every_metadata_byte() {
        assert_eq!(row_checksum_with_metadata(0xf2, 0x00, 0x0000, 0x0004), 0xf6);
        // 0x10 + 0x01 + 0x12 + 0x34 + 0x01 + 0x00 = 0x58
        assert_eq!(row_checksum_with_metadata(0x10, 0x01, 0x1234, 0x0100), 0x58);
        // wraps
        assert_eq!(row_checksum_with_metadata(0xff, 0x01, 0x0000, 0x0000), 0x00);
    }

    #[test]
    fn crc16_check_value() {
        assert_eq!(crc16_ccitt(b"123456789"), 0x29b1);
        assert_eq!(crc16_ccitt(&[]), 0xffff);
    }

    #[test]
    fn crc16_matches_bitwise_ccitt() {
        fn bitwise(bytes: &[u8]) -> u16 {
            let mut crc: u16 = 0xffff;
            for &b in bytes {
                crc ^= (b as u16) << 8;
                for _ in 0..8 {
                    crc = if crc & 0x8000 != 0 {
                        (crc << 1) ^ 0x1021
                    } else {
                        crc << 1
                    };
                }
            }
            crc
        }

        for bytes in SAMPLES {
            assert_eq!(crc16_ccitt(bytes), bitwise(bytes), "{:02x?}", bytes);
        }
        // EnterBootloader frame with the checksum type switched to CRC-16
        assert_eq!(
            ChecksumType::Crc16.compute(SAMPLES[3]),
            bitwise(SAMPLES[3])
        );
    }

    #[test]
    fn checksum_type_byte() {
        assert_eq!(ChecksumType::try_from(0), Ok(ChecksumType::BasicSum));
        assert_eq!(ChecksumType::try_from(1), Ok(ChecksumType::Crc16));
        assert_eq!(ChecksumType::try_from(2), Err(2));
        assert_eq!(u8::from(ChecksumType::Crc16), 1);
        assert_eq!(ChecksumType::Crc16.compute(b"123456789"), 0x29b1);
    }
}
