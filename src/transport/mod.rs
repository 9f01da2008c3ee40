//! Abstract device transport interface.
use std::time::Duration;

use scroll::{LE, Pread};

use crate::checksum::ChecksumType;
use crate::constants::{EOP, MIN_FRAME_SIZE, SOP};
use crate::error::Result;
use crate::protocol::{Command, Response};

pub use self::serial::{Baudrate, SerialTransport};
pub use self::sim::SimulatedDevice;
pub use self::stream::StreamTransport;
pub use self::usb::UsbTransport;

mod serial;
mod sim;
mod stream;
mod usb;

/// Per-command I/O deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub read: Duration,
    pub write: Duration,
}

/// Abstraction of the transport layer.
/// Might be USB HID, a serial port, or any byte stream.
///
/// A transport is owned by one sequencer at a time; commands are strictly
/// request/response.
pub trait Transport {
    fn send_raw(&mut self, raw: &[u8], timeout: Duration) -> Result<()>;
    /// Returns whatever the device sent back, possibly with a leading
    /// report id byte or trailing padding.
    fn recv_raw(&mut self, timeout: Duration) -> Result<Vec<u8>>;

    fn transfer(
        &mut self,
        cmd: Command,
        checksum_type: ChecksumType,
        timeouts: Timeouts,
    ) -> Result<Response> {
        let req = cmd.into_raw_with(checksum_type)?;
        log::debug!("=> {}", hex::encode(&req));
        self.send_raw(&req, timeouts.write)?;

        let resp = self.recv_raw(timeouts.read)?;
        log::debug!("<= {}", hex::encode(&resp));
        Ok(Response::from_raw(extract_frame(&resp), checksum_type)?)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send_raw(&mut self, raw: &[u8], timeout: Duration) -> Result<()> {
        (**self).send_raw(raw, timeout)
    }

    fn recv_raw(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        (**self).recv_raw(timeout)
    }
}

/// Locates the frame inside a received buffer.
///
/// A leading byte is dropped when byte 0 is not SOP but byte 1 is (HID
/// report id). Bytes past the declared frame length are dropped when the
/// declared EOP position holds EOP (report padding). Anything else is
/// returned untouched for the frame parser to reject.
pub fn extract_frame(raw: &[u8]) -> &[u8] {
    let frame = match raw {
        [first, SOP, ..] if *first != SOP => &raw[1..],
        _ => raw,
    };
    if let Ok(len) = frame.pread_with::<u16>(2, LE) {
        let end = MIN_FRAME_SIZE + len as usize;
        if frame.len() > end && frame[end - 1] == EOP {
            return &frame[..end];
        }
    }
    frame
}

/// Bytes still missing before `raw` holds a whole frame, if the header has
/// arrived. Used by packet-oriented transports to know when to stop reading.
pub(crate) fn missing_bytes(raw: &[u8]) -> Option<usize> {
    let frame = match raw {
        [first, SOP, ..] if *first != SOP => &raw[1..],
        _ => raw,
    };
    let len = frame.pread_with::<u16>(2, LE).ok()?;
    Some((MIN_FRAME_SIZE + len as usize).saturating_sub(frame.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_frame(data: &[u8]) -> Vec<u8> {
        Response::Ok(data.to_vec())
            .into_raw(ChecksumType::BasicSum)
            .unwrap()
    }

    #[test]
    fn plain_frame_untouched() {
        let frame = ok_frame(&[1, 2, 3]);
        assert_eq!(extract_frame(&frame), &frame[..]);
    }

    #[test]
    fn strips_report_id() {
        let frame = ok_frame(&[1]);
        let mut raw = vec![0x00];
        raw.extend_from_slice(&frame);
        assert_eq!(extract_frame(&raw), &frame[..]);
    }

    #[test]
    fn strips_report_padding() {
        let frame = ok_frame(&[0xaa; 8]);
        let mut raw = vec![0x02];
        raw.extend_from_slice(&frame);
        raw.resize(64, 0);
        assert_eq!(extract_frame(&raw), &frame[..]);
        assert_eq!(missing_bytes(&raw), Some(0));
    }

    #[test]
    fn leaves_garbage_for_the_parser() {
        let mut raw = ok_frame(&[1]);
        raw.push(0x99);
        // Declared end still holds EOP, so the tail goes.
        assert_eq!(extract_frame(&raw).len(), 8);

        let raw = [0x05, 0x06, 0x07];
        assert_eq!(extract_frame(&raw), &raw[..]);
    }

    #[test]
    fn counts_missing_bytes() {
        let frame = ok_frame(&[0; 100]);
        assert_eq!(missing_bytes(&frame[..64]), Some(43));
        assert_eq!(missing_bytes(&frame[..3]), None);
        assert_eq!(missing_bytes(&frame), Some(0));
    }
}
