//! USB HID Transportation.
//!
//! The PSoC USB bootloader exchanges 64-byte interrupt reports. Frames are
//! split across reports and zero padded; responses are reassembled until
//! the declared frame length has arrived.
use std::time::Duration;

use rusb::{Context, DeviceHandle, UsbContext};

use super::{Transport, missing_bytes};
use crate::constants::{MAX_PACKET_SIZE, RESPONSE_BUFFER_SIZE};
use crate::error::{Error, Result};

const ENDPOINT_OUT: u8 = 0x01;
const ENDPOINT_IN: u8 = 0x81;

/// Default VID:PID of the Cypress HID bootloader component.
pub const DEFAULT_VID: u16 = 0x04b4;
pub const DEFAULT_PID: u16 = 0xb71d;

pub struct UsbTransport {
    device_handle: DeviceHandle<rusb::Context>,
}

impl UsbTransport {
    pub fn scan_devices(vid: u16, pid: u16) -> Result<usize> {
        let context = Context::new()?;

        let n = context
            .devices()?
            .iter()
            .filter(|device| {
                device
                    .device_descriptor()
                    .map(|desc| desc.vendor_id() == vid && desc.product_id() == pid)
                    .unwrap_or(false)
            })
            .enumerate()
            .map(|(i, device)| {
                log::debug!("Found PSoC bootloader USB device #{}: [{:?}]", i, device);
            })
            .count();
        Ok(n)
    }

    pub fn open_nth(vid: u16, pid: u16, nth: usize) -> Result<UsbTransport> {
        let context = Context::new()?;

        let device = context
            .devices()?
            .iter()
            .filter(|device| {
                device
                    .device_descriptor()
                    .map(|desc| desc.vendor_id() == vid && desc.product_id() == pid)
                    .unwrap_or(false)
            })
            .nth(nth)
            .ok_or(Error::Usb(rusb::Error::NoDevice))?;
        log::debug!("Found USB Device {:?}", device);

        let mut device_handle = device.open()?;

        let config = device.config_descriptor(0)?;

        let mut endpoint_out_found = false;
        let mut endpoint_in_found = false;
        if let Some(intf) = config.interfaces().next() {
            if let Some(desc) = intf.descriptors().next() {
                for endpoint in desc.endpoint_descriptors() {
                    if endpoint.address() == ENDPOINT_OUT {
                        endpoint_out_found = true;
                    }
                    if endpoint.address() == ENDPOINT_IN {
                        endpoint_in_found = true;
                    }
                }
            }
        }

        if !(endpoint_out_found && endpoint_in_found) {
            log::error!("USB endpoints 0x{:02x}/0x{:02x} not found", ENDPOINT_OUT, ENDPOINT_IN);
            return Err(Error::Usb(rusb::Error::NotFound));
        }

        // The HID class driver owns the interface by default.
        if let Err(e) = device_handle.set_auto_detach_kernel_driver(true) {
            log::debug!("auto-detach kernel driver unsupported: {}", e);
        }
        device_handle.claim_interface(0)?;

        Ok(UsbTransport { device_handle })
    }

    pub fn open_any() -> Result<UsbTransport> {
        Self::open_nth(DEFAULT_VID, DEFAULT_PID, 0)
    }
}

impl Transport for UsbTransport {
    fn send_raw(&mut self, raw: &[u8], timeout: Duration) -> Result<()> {
        for chunk in raw.chunks(MAX_PACKET_SIZE) {
            let mut report = [0u8; MAX_PACKET_SIZE];
            report[..chunk.len()].copy_from_slice(chunk);
            self.device_handle
                .write_interrupt(ENDPOINT_OUT, &report, timeout)?;
        }
        Ok(())
    }

    fn recv_raw(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        let mut raw = Vec::with_capacity(MAX_PACKET_SIZE);
        loop {
            let mut buf = [0u8; MAX_PACKET_SIZE];
            let nread = self
                .device_handle
                .read_interrupt(ENDPOINT_IN, &mut buf, timeout)?;
            raw.extend_from_slice(&buf[..nread]);
            match missing_bytes(&raw) {
                Some(0) => break,
                _ if nread == 0 || raw.len() >= RESPONSE_BUFFER_SIZE => break,
                _ => continue,
            }
        }
        Ok(raw)
    }
}
