//! Serial Transportation.
//!
//! The UART bootloader sends frames as-is, no report framing.
use std::{fmt::Display, io::Read, io::Write, time::Duration};

use clap::{ValueEnum, builder::PossibleValue};
use serialport::SerialPort;

use super::Transport;
use crate::constants::MIN_FRAME_SIZE;
use crate::error::Result;

const SERIAL_TIMEOUT_MS: u64 = 1000;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Baudrate {
    Baud9600,
    Baud57600,
    #[default]
    Baud115200,
}

impl From<Baudrate> for u32 {
    fn from(value: Baudrate) -> Self {
        match value {
            Baudrate::Baud9600 => 9600,
            Baudrate::Baud57600 => 57600,
            Baudrate::Baud115200 => 115200,
        }
    }
}

impl Display for Baudrate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", u32::from(*self))
    }
}

impl ValueEnum for Baudrate {
    fn value_variants<'a>() -> &'a [Self] {
        &[Baudrate::Baud9600, Baudrate::Baud57600, Baudrate::Baud115200]
    }

    fn to_possible_value(&self) -> Option<PossibleValue> {
        match self {
            Baudrate::Baud9600 => Some(PossibleValue::new("Baud9600").aliases(["9600"])),
            Baudrate::Baud57600 => Some(PossibleValue::new("Baud57600").aliases(["57600"])),
            Baudrate::Baud115200 => Some(PossibleValue::new("Baud115200").aliases(["115200"])),
        }
    }
}

pub struct SerialTransport {
    serial_port: Box<dyn SerialPort>,
}

impl SerialTransport {
    pub fn scan_ports() -> Result<Vec<String>> {
        let ports = serialport::available_ports()?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }

    pub fn open(port: &str, baudrate: Baudrate) -> Result<Self> {
        log::info!("Opening serial port: \"{}\" @ {} baud", port, baudrate);
        let port = serialport::new(port, baudrate.into())
            .timeout(Duration::from_millis(SERIAL_TIMEOUT_MS))
            .open()?;
        Ok(SerialTransport { serial_port: port })
    }
}

impl Transport for SerialTransport {
    fn send_raw(&mut self, raw: &[u8], timeout: Duration) -> Result<()> {
        self.serial_port.set_timeout(timeout)?;
        self.serial_port.write_all(raw)?;
        self.serial_port.flush()?;
        Ok(())
    }

    fn recv_raw(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        self.serial_port.set_timeout(timeout)?;

        // SOP, status and the 16-bit length
        let mut header_buf = [0u8; 4];
        self.serial_port.read_exact(&mut header_buf)?;
        let len = u16::from_le_bytes([header_buf[2], header_buf[3]]) as usize;
        // DATA + checksum + EOP
        let mut rest = vec![0u8; len + MIN_FRAME_SIZE - 4];
        self.serial_port.read_exact(&mut rest)?;

        let mut buf_vec = Vec::with_capacity(header_buf.len() + rest.len());
        buf_vec.extend_from_slice(&header_buf);
        buf_vec.extend_from_slice(&rest);
        Ok(buf_vec)
    }
}
