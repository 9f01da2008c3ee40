//! Device-reported values, decoded from response payloads.
use std::fmt;

use scroll::{LE, Pread};

use crate::constants::response_size;
use crate::error::FrameError;

type Result<T> = std::result::Result<T, FrameError>;

fn expect_len(response: &'static str, data: &[u8], expected: usize) -> Result<()> {
    if data.len() != expected {
        return Err(FrameError::UnexpectedResponseLength {
            response,
            got: data.len(),
            expected,
        });
    }
    Ok(())
}

/// Returned by EnterBootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceInfo {
    pub silicon_id: u32,
    pub silicon_rev: u8,
    /// `[major, minor, patch]` as sent by the device
    pub bootloader_version: [u8; 3],
}

impl DeviceInfo {
    /// `[SILICON_ID(4, LE)][SILICON_REV][BOOTLOADER_VER(3)]`
    pub fn from_payload(data: &[u8]) -> Result<Self> {
        expect_len("enter bootloader", data, response_size::ENTER_BOOTLOADER)?;
        Ok(DeviceInfo {
            silicon_id: data.pread_with(0, LE)?,
            silicon_rev: data[4],
            bootloader_version: [data[5], data[6], data[7]],
        })
    }

    pub fn to_payload(&self) -> Vec<u8> {
        let mut buf = self.silicon_id.to_le_bytes().to_vec();
        buf.push(self.silicon_rev);
        buf.extend_from_slice(&self.bootloader_version);
        buf
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [major, minor, patch] = self.bootloader_version;
        write!(
            f,
            "silicon id 0x{:08X} rev 0x{:02X}, bootloader v{}.{}.{}",
            self.silicon_id, self.silicon_rev, major, minor, patch
        )
    }
}

/// Programmable row range of one flash array, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlashSize {
    pub start_row: u16,
    pub end_row: u16,
}

impl FlashSize {
    pub fn from_payload(data: &[u8]) -> Result<Self> {
        expect_len("get flash size", data, response_size::GET_FLASH_SIZE)?;
        Ok(FlashSize {
            start_row: data.pread_with(0, LE)?,
            end_row: data.pread_with(2, LE)?,
        })
    }

    pub fn to_payload(&self) -> Vec<u8> {
        let mut buf = self.start_row.to_le_bytes().to_vec();
        buf.extend_from_slice(&self.end_row.to_le_bytes());
        buf
    }

    pub fn contains(&self, row_number: u16) -> bool {
        (self.start_row..=self.end_row).contains(&row_number)
    }
}

/// Multi-application bootloaders only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct AppStatus {
    pub valid: bool,
    pub active: bool,
}

impl AppStatus {
    pub fn from_payload(data: &[u8]) -> Result<Self> {
        expect_len("get app status", data, response_size::GET_APP_STATUS)?;
        Ok(AppStatus {
            valid: data[0] != 0,
            active: data[1] != 0,
        })
    }
}

/// First 56 bytes of a bootloadable application's metadata, PSoC 4/5LP layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Metadata {
    pub checksum: u8,
    pub start_addr: u32,
    pub last_row: u16,
    pub length: u32,
    pub active: u8,
    pub verified: u8,
    pub bootloader_version: u16,
    pub app_id: u16,
    pub app_version: u16,
    pub custom_id: u32,
}

impl Metadata {
    pub fn from_payload(data: &[u8]) -> Result<Self> {
        expect_len("get metadata", data, response_size::GET_METADATA)?;
        Ok(Metadata {
            checksum: data[0],
            start_addr: data.pread_with(1, LE)?,
            last_row: data.pread_with(5, LE)?,
            // bytes 7..9 reserved
            length: data.pread_with(9, LE)?,
            // bytes 13..16 reserved
            active: data[16],
            verified: data[17],
            bootloader_version: data.pread_with(18, LE)?,
            app_id: data.pread_with(20, LE)?,
            app_version: data.pread_with(22, LE)?,
            custom_id: data.pread_with(24, LE)?,
        })
    }

    pub fn to_payload(&self) -> Vec<u8> {
        let mut buf = vec![0u8; response_size::GET_METADATA];
        buf[0] = self.checksum;
        buf[1..5].copy_from_slice(&self.start_addr.to_le_bytes());
        buf[5..7].copy_from_slice(&self.last_row.to_le_bytes());
        buf[9..13].copy_from_slice(&self.length.to_le_bytes());
        buf[16] = self.active;
        buf[17] = self.verified;
        buf[18..20].copy_from_slice(&self.bootloader_version.to_le_bytes());
        buf[20..22].copy_from_slice(&self.app_id.to_le_bytes());
        buf[22..24].copy_from_slice(&self.app_version.to_le_bytes());
        buf[24..28].copy_from_slice(&self.custom_id.to_le_bytes());
        buf
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "app id 0x{:04X} v0x{:04X}, start 0x{:08X}, length {} bytes, last row {}, \
             checksum 0x{:02X}, active {}, verified {}",
            self.app_id,
            self.app_version,
            self.start_addr,
            self.length,
            self.last_row,
            self.checksum,
            self.active,
            self.verified
        )
    }
}

/// Decodes a VerifyRow payload. With `lenient`, an empty payload is accepted
/// and read as checksum 0.
pub fn verify_row_checksum(data: &[u8], lenient: bool) -> Result<u8> {
    if lenient && data.is_empty() {
        return Ok(0);
    }
    expect_len("verify row", data, response_size::VERIFY_ROW)?;
    Ok(data[0])
}

/// Decodes a VerifyChecksum payload: nonzero means the application is valid.
pub fn application_valid(data: &[u8]) -> Result<bool> {
    expect_len("verify checksum", data, response_size::VERIFY_CHECKSUM)?;
    Ok(data[0] != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_info_layout() {
        let info =
            DeviceInfo::from_payload(&[0xaa, 0x02, 0x96, 0x1e, 0x00, 0x01, 0x1e, 0x00]).unwrap();
        assert_eq!(info.silicon_id, 0x1e9602aa);
        assert_eq!(info.silicon_rev, 0);
        assert_eq!(info.bootloader_version, [0x01, 0x1e, 0x00]);
        assert_eq!(DeviceInfo::from_payload(&info.to_payload()).unwrap(), info);

        assert!(matches!(
            DeviceInfo::from_payload(&[0; 7]),
            Err(FrameError::UnexpectedResponseLength { got: 7, expected: 8, .. })
        ));
    }

    #[test]
    fn flash_size_layout() {
        let size = FlashSize::from_payload(&[0x00, 0x00, 0xff, 0x01]).unwrap();
        assert_eq!(size, FlashSize { start_row: 0, end_row: 0x01ff });
        assert!(size.contains(0));
        assert!(size.contains(0x01ff));
        assert!(!size.contains(0x0200));
        assert!(FlashSize::from_payload(&[0; 5]).is_err());
    }

    #[test]
    fn verify_row_lenient_mode() {
        assert_eq!(verify_row_checksum(&[0x5a], false).unwrap(), 0x5a);
        assert!(verify_row_checksum(&[], false).is_err());
        assert_eq!(verify_row_checksum(&[], true).unwrap(), 0);
        assert!(verify_row_checksum(&[1, 2], true).is_err());
    }

    #[test]
    fn application_valid_flag() {
        assert!(application_valid(&[0x01]).unwrap());
        assert!(application_valid(&[0x80]).unwrap());
        assert!(!application_valid(&[0x00]).unwrap());
        assert!(application_valid(&[]).is_err());
    }

    #[test]
    fn app_status_flags() {
        let status = AppStatus::from_payload(&[1, 0]).unwrap();
        assert!(status.valid && !status.active);
        assert!(AppStatus::from_payload(&[1]).is_err());
    }

    #[test]
    fn metadata_layout() {
        let meta = Metadata {
            checksum: 0x12,
            start_addr: 0x0000_3000,
            last_row: 0x00ff,
            length: 0x4000,
            active: 1,
            verified: 1,
            bootloader_version: 0x0130,
            app_id: 0xbeef,
            app_version: 0x0102,
            custom_id: 0xdead_0001,
        };
        let payload = meta.to_payload();
        assert_eq!(payload.len(), 56);
        assert_eq!(payload[1..5], [0x00, 0x30, 0x00, 0x00]);
        assert_eq!(Metadata::from_payload(&payload).unwrap(), meta);
        assert!(Metadata::from_payload(&payload[..55]).is_err());
    }
}
