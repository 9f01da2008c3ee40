//! Cypress/Infineon PSoC bootloader host.

pub mod checksum;
pub mod config;
pub mod constants;
pub mod device;
pub mod error;
pub mod flashing;
pub mod format;
pub mod protocol;
pub mod report;
pub mod transport;

pub use self::checksum::ChecksumType;
pub use self::config::Config;
pub use self::error::{Error, Result};
pub use self::flashing::{CancelToken, Flashing};
pub use self::format::Firmware;
pub use self::protocol::{Command, Response};
pub use self::transport::Transport;
