//! Programming configuration.
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_CHUNK_SIZE, MAX_DATA_SIZE, MAX_PACKET_SIZE, SEND_DATA_OVERHEAD};
use crate::error::{Error, Result};
use crate::transport::Timeouts;

/// Settings consumed by [`Flashing`](crate::Flashing). Fixed once the
/// sequencer is constructed.
///
/// Durations are written in milliseconds in YAML:
///
/// ```yaml
/// read_timeout: 2000
/// chunk_size: 57
/// verify_rows: false
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Deadline for reading one response. Default 5 s.
    #[serde(with = "millis")]
    pub read_timeout: Duration,
    /// Deadline for writing one command. Default 5 s.
    #[serde(with = "millis")]
    pub write_timeout: Duration,
    /// Largest SendData payload, `1..=256`. Default 57.
    pub chunk_size: usize,
    /// Transport packet size used to validate `chunk_size`. Default 64.
    pub packet_size: usize,
    /// Whole-`program` attempts made by the CLI. Default 3.
    pub retries: u32,
    /// Send VerifyRow after every ProgramRow. Default on.
    pub verify_rows: bool,
    /// Pause before every command. Default 0.
    #[serde(with = "millis")]
    pub command_delay: Duration,
    /// Accept an empty VerifyRow payload from older bootloaders. Default off.
    pub lenient_verify_row: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            chunk_size: DEFAULT_CHUNK_SIZE,
            packet_size: MAX_PACKET_SIZE,
            retries: 3,
            verify_rows: true,
            command_delay: Duration::ZERO,
            lenient_verify_row: false,
        }
    }
}

impl Config {
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Config =
            serde_yaml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            read: self.read_timeout,
            write: self.write_timeout,
        }
    }

    /// Every SendData frame must fit one transport packet. The final
    /// ProgramRow frame carries 3 more bytes of overhead and may exceed the
    /// packet by that much; transports split it.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_DATA_SIZE).contains(&self.chunk_size) {
            return Err(Error::Config(format!(
                "chunk size {} outside 1..={}",
                self.chunk_size, MAX_DATA_SIZE
            )));
        }
        if self.chunk_size + SEND_DATA_OVERHEAD > self.packet_size {
            return Err(Error::Config(format!(
                "chunk size {} + {} bytes of framing exceeds the {}-byte packet",
                self.chunk_size, SEND_DATA_OVERHEAD, self.packet_size
            )));
        }
        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::PROGRAM_ROW_OVERHEAD;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.chunk_size, 57);
        assert_eq!(config.read_timeout, Duration::from_secs(5));
        assert!(config.verify_rows);
        assert!(!config.lenient_verify_row);
        config.validate().unwrap();
    }

    #[test]
    fn default_chunk_arithmetic() {
        // A full SendData frame is exactly one packet.
        assert_eq!(DEFAULT_CHUNK_SIZE + SEND_DATA_OVERHEAD, MAX_PACKET_SIZE);
        // The last ProgramRow frame overruns it by at most 3 bytes.
        assert_eq!(DEFAULT_CHUNK_SIZE + PROGRAM_ROW_OVERHEAD, MAX_PACKET_SIZE + 3);
    }

    #[test]
    fn rejects_bad_chunk_sizes() {
        for chunk_size in [0, 58, 257] {
            let config = Config {
                chunk_size,
                ..Config::default()
            };
            assert!(matches!(config.validate(), Err(Error::Config(_))), "{}", chunk_size);
        }
        let config = Config {
            chunk_size: 256,
            packet_size: 263,
            ..Config::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn yaml_overlays_defaults() {
        let config = Config::from_yaml("read_timeout: 250\nverify_rows: false\n").unwrap();
        assert_eq!(config.read_timeout, Duration::from_millis(250));
        assert!(!config.verify_rows);
        assert_eq!(config.chunk_size, 57);

        assert!(Config::from_yaml("chunk_size: 100\n").is_err());
        assert!(Config::from_yaml("no_such_field: 1\n").is_err());
    }
}
