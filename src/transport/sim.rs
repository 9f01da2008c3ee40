//! In-memory PSoC bootloader, for tests and `--simulate`.
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::time::Duration;

use super::Transport;
use crate::checksum::{ChecksumType, row_checksum_with_metadata};
use crate::constants::{KEY_SIZE, MAX_DATA_SIZE, status};
use crate::device::{AppStatus, DeviceInfo, FlashSize, Metadata};
use crate::error::{FrameError, Result};
use crate::format::FlashRow;
use crate::protocol::{Command, Response};

/// Simulated device answering every command with a well-formed frame.
///
/// Flash is a sparse map per array. Every decoded command is recorded, in
/// order, for assertions.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    info: DeviceInfo,
    flash_size: FlashSize,
    key: Option<[u8; KEY_SIZE]>,
    checksum_type: ChecksumType,
    flash: BTreeMap<u8, BTreeMap<u16, Vec<u8>>>,
    buffer: Vec<u8>,
    in_bootloader: bool,
    app_valid: bool,
    apps: [AppStatus; 2],
    metadata: [Metadata; 2],
    pending: Option<Vec<u8>>,
    log: Vec<Command>,
    // fault injection
    overrides: HashMap<u8, u8>,
    corrupt_verify_row: bool,
    empty_verify_row: bool,
    silent_exit: bool,
    report_prefix: Option<u8>,
}

impl SimulatedDevice {
    pub fn new(silicon_id: u32, silicon_rev: u8) -> Self {
        SimulatedDevice {
            info: DeviceInfo {
                silicon_id,
                silicon_rev,
                bootloader_version: [0x01, 0x1e, 0x00],
            },
            flash_size: FlashSize {
                start_row: 0x0000,
                end_row: 0x00ff,
            },
            key: None,
            checksum_type: ChecksumType::BasicSum,
            flash: BTreeMap::new(),
            buffer: Vec::new(),
            in_bootloader: false,
            app_valid: true,
            apps: [
                AppStatus {
                    valid: true,
                    active: true,
                },
                AppStatus::default(),
            ],
            metadata: [Metadata::default(); 2],
            pending: None,
            log: Vec::new(),
            overrides: HashMap::new(),
            corrupt_verify_row: false,
            empty_verify_row: false,
            silent_exit: true,
            report_prefix: None,
        }
    }

    /// Programmable rows, inclusive, shared by every array.
    pub fn with_flash_size(mut self, start_row: u16, end_row: u16) -> Self {
        self.flash_size = FlashSize { start_row, end_row };
        self
    }

    /// Only this key is accepted by EnterBootloader. Any key by default.
    pub fn with_key(mut self, key: [u8; KEY_SIZE]) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_checksum_type(mut self, checksum_type: ChecksumType) -> Self {
        self.checksum_type = checksum_type;
        self
    }

    pub fn with_metadata(mut self, app: u8, metadata: Metadata) -> Self {
        if let Some(slot) = self.metadata.get_mut(app as usize) {
            *slot = metadata;
        }
        self
    }

    /// Result of VerifyChecksum. Valid by default.
    pub fn with_app_valid(mut self, valid: bool) -> Self {
        self.app_valid = valid;
        self
    }

    /// Answer every `command` with `status` and no payload, without acting on it.
    pub fn fail_command(mut self, command: u8, status: u8) -> Self {
        self.overrides.insert(command, status);
        self
    }

    /// VerifyRow answers one more than the correct checksum.
    pub fn corrupt_verify_row(mut self) -> Self {
        self.corrupt_verify_row = true;
        self
    }

    /// VerifyRow answers success with no checksum, like some older bootloaders.
    pub fn empty_verify_row(mut self) -> Self {
        self.empty_verify_row = true;
        self
    }

    /// Whether ExitBootloader goes unanswered, as a resetting device does.
    /// On by default.
    pub fn silent_exit(mut self, silent: bool) -> Self {
        self.silent_exit = silent;
        self
    }

    /// Prepend a report id byte to every response.
    pub fn with_report_prefix(mut self, prefix: u8) -> Self {
        self.report_prefix = Some(prefix);
        self
    }

    /// Every command decoded so far, in arrival order.
    pub fn commands(&self) -> &[Command] {
        &self.log
    }

    pub fn count(&self, code: u8) -> usize {
        self.log.iter().filter(|cmd| cmd.code() == code).count()
    }

    pub fn row(&self, array_id: u8, row_number: u16) -> Option<&[u8]> {
        self.flash
            .get(&array_id)
            .and_then(|rows| rows.get(&row_number))
            .map(Vec::as_slice)
    }

    pub fn in_bootloader(&self) -> bool {
        self.in_bootloader
    }

    pub fn app_status(&self, app: u8) -> Option<AppStatus> {
        self.apps.get(app as usize).copied()
    }

    fn handle(&mut self, cmd: Command) -> Option<Response> {
        if let Some(&code) = self.overrides.get(&cmd.code()) {
            return Some(Response::Err(code, vec![]));
        }
        if !self.in_bootloader && !matches!(cmd, Command::EnterBootloader { .. }) {
            return Some(Response::Err(status::ERR_ACTIVE, vec![]));
        }

        let resp = match cmd {
            Command::EnterBootloader { key } => {
                if self.key.is_some_and(|expected| expected[..] != key[..]) {
                    return Some(Response::Err(status::ERR_KEY, vec![]));
                }
                self.in_bootloader = true;
                self.buffer.clear();
                Response::Ok(self.info.to_payload())
            }
            Command::GetFlashSize { .. } => Response::Ok(self.flash_size.to_payload()),
            Command::SendData { data } => {
                if self.buffer.len() + data.len() > MAX_DATA_SIZE {
                    self.buffer.clear();
                    return Some(Response::Err(status::ERR_LENGTH, vec![]));
                }
                self.buffer.extend_from_slice(&data);
                Response::Ok(vec![])
            }
            Command::ProgramRow {
                array_id,
                row_number,
                data,
            } => {
                let mut row = std::mem::take(&mut self.buffer);
                if !self.flash_size.contains(row_number) {
                    return Some(Response::Err(status::ERR_ROW, vec![]));
                }
                row.extend_from_slice(&data);
                if row.len() > MAX_DATA_SIZE {
                    return Some(Response::Err(status::ERR_LENGTH, vec![]));
                }
                self.flash.entry(array_id).or_default().insert(row_number, row);
                Response::Ok(vec![])
            }
            Command::VerifyRow {
                array_id,
                row_number,
            } => match self.row(array_id, row_number) {
                Some(_) if self.empty_verify_row => Response::Ok(vec![]),
                Some(data) => {
                    let stored = FlashRow::new(array_id, row_number, data.to_vec());
                    let mut checksum = row_checksum_with_metadata(
                        stored.checksum,
                        array_id,
                        row_number,
                        data.len() as u16,
                    );
                    if self.corrupt_verify_row {
                        checksum = checksum.wrapping_add(1);
                    }
                    Response::Ok(vec![checksum])
                }
                None => Response::Err(status::ERR_ROW, vec![]),
            },
            Command::EraseRow {
                array_id,
                row_number,
            } => {
                if !self.flash_size.contains(row_number) {
                    return Some(Response::Err(status::ERR_ROW, vec![]));
                }
                if let Some(rows) = self.flash.get_mut(&array_id) {
                    rows.remove(&row_number);
                }
                Response::Ok(vec![])
            }
            Command::VerifyChecksum => Response::Ok(vec![self.app_valid as u8]),
            Command::SyncBootloader => {
                self.buffer.clear();
                return None;
            }
            Command::ExitBootloader => {
                self.in_bootloader = false;
                self.buffer.clear();
                if self.silent_exit {
                    return None;
                }
                Response::Ok(vec![])
            }
            Command::GetMetadata { app } => match self.metadata.get(app as usize) {
                Some(metadata) => Response::Ok(metadata.to_payload()),
                None => Response::Err(status::ERR_APP, vec![]),
            },
            Command::GetAppStatus { app } => match self.apps.get(app as usize) {
                Some(app) => Response::Ok(vec![app.valid as u8, app.active as u8]),
                None => Response::Err(status::ERR_APP, vec![]),
            },
            Command::SetActiveApp { app } => {
                if (app as usize) >= self.apps.len() {
                    return Some(Response::Err(status::ERR_APP, vec![]));
                }
                for (i, status) in self.apps.iter_mut().enumerate() {
                    status.active = i == app as usize;
                }
                Response::Ok(vec![])
            }
        };
        Some(resp)
    }
}

fn frame_error_status(err: &FrameError) -> u8 {
    match err {
        FrameError::ChecksumMismatch { .. } => status::ERR_CHECKSUM,
        FrameError::UnknownCommand(_) => status::ERR_COMMAND,
        FrameError::InvalidStartOfPacket(_) | FrameError::InvalidEndOfPacket(_) => status::ERR_DATA,
        _ => status::ERR_LENGTH,
    }
}

impl Transport for SimulatedDevice {
    fn send_raw(&mut self, raw: &[u8], _timeout: Duration) -> Result<()> {
        let resp = match Command::from_raw(raw, self.checksum_type) {
            Ok(cmd) => {
                log::trace!("sim: {:?}", cmd);
                self.log.push(cmd.clone());
                self.handle(cmd)
            }
            Err(err) => {
                log::debug!("sim: rejecting frame: {}", err);
                Some(Response::Err(frame_error_status(&err), vec![]))
            }
        };
        self.pending = match resp {
            Some(resp) => {
                let mut buf: Vec<u8> = self.report_prefix.into_iter().collect();
                buf.extend(resp.into_raw(self.checksum_type)?);
                Some(buf)
            }
            None => None,
        };
        Ok(())
    }

    fn recv_raw(&mut self, _timeout: Duration) -> Result<Vec<u8>> {
        self.pending
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::TimedOut, "no response from device").into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::commands;
    use crate::error::Error;
    use crate::transport::Timeouts;

    const TIMEOUTS: Timeouts = Timeouts {
        read: Duration::from_millis(10),
        write: Duration::from_millis(10),
    };
    const KEY: [u8; 6] = [0x0a, 0x1b, 0x2c, 0x3d, 0x4e, 0x5f];

    fn transfer(dev: &mut SimulatedDevice, cmd: Command) -> Response {
        dev.transfer(cmd, ChecksumType::BasicSum, TIMEOUTS).unwrap()
    }

    #[test]
    fn requires_bootloader_mode() {
        let mut dev = SimulatedDevice::new(0x1e9602aa, 0);
        let resp = transfer(&mut dev, Command::GetFlashSize { array_id: 0 });
        assert_eq!(resp.status(), status::ERR_ACTIVE);

        let resp = transfer(&mut dev, Command::enter_bootloader(&KEY));
        let info = DeviceInfo::from_payload(resp.payload()).unwrap();
        assert_eq!(info.silicon_id, 0x1e9602aa);
        assert!(dev.in_bootloader());
    }

    #[test]
    fn checks_key() {
        let mut dev = SimulatedDevice::new(1, 0).with_key(KEY);
        let resp = transfer(&mut dev, Command::enter_bootloader(&[0; 6]));
        assert_eq!(resp.status(), status::ERR_KEY);
        assert!(!dev.in_bootloader());
    }

    #[test]
    fn buffered_data_is_prepended() {
        let mut dev = SimulatedDevice::new(1, 0);
        transfer(&mut dev, Command::enter_bootloader(&KEY));
        assert!(transfer(&mut dev, Command::send_data(&[1, 2])).is_ok());
        assert!(transfer(&mut dev, Command::program_row(0, 5, &[3])).is_ok());
        assert_eq!(dev.row(0, 5), Some(&[1, 2, 3][..]));

        let resp = transfer(&mut dev, Command::verify_row(0, 5));
        let expected = row_checksum_with_metadata(
            FlashRow::new(0, 5, vec![1, 2, 3]).checksum,
            0,
            5,
            3,
        );
        assert_eq!(resp, Response::Ok(vec![expected]));

        transfer(&mut dev, Command::erase_row(0, 5));
        assert_eq!(dev.row(0, 5), None);
    }

    #[test]
    fn exit_is_silent_by_default() {
        let mut dev = SimulatedDevice::new(1, 0);
        transfer(&mut dev, Command::enter_bootloader(&KEY));
        let err = dev
            .transfer(Command::ExitBootloader, ChecksumType::BasicSum, TIMEOUTS)
            .unwrap_err();
        assert!(matches!(err, Error::Io(e) if e.kind() == io::ErrorKind::TimedOut));
        assert!(!dev.in_bootloader());
        assert_eq!(dev.count(commands::EXIT_BOOTLOADER), 1);
    }

    #[test]
    fn rejects_corrupted_frames() {
        let mut dev = SimulatedDevice::new(1, 0);
        let mut raw = Command::SyncBootloader.into_raw().unwrap();
        raw[4] ^= 0xff;
        dev.send_raw(&raw, TIMEOUTS.write).unwrap();
        let resp = Response::from_raw(&dev.recv_raw(TIMEOUTS.read).unwrap(), ChecksumType::BasicSum)
            .unwrap();
        assert_eq!(resp.status(), status::ERR_CHECKSUM);
        assert!(dev.commands().is_empty());
    }

    #[test]
    fn report_prefix_is_transparent() {
        let mut dev = SimulatedDevice::new(7, 0).with_report_prefix(0x00);
        let resp = transfer(&mut dev, Command::enter_bootloader(&KEY));
        assert!(resp.is_ok());
    }

    #[test]
    fn multi_app_status() {
        let mut dev = SimulatedDevice::new(1, 0);
        transfer(&mut dev, Command::enter_bootloader(&KEY));
        transfer(&mut dev, Command::SetActiveApp { app: 1 });
        assert_eq!(
            dev.app_status(1),
            Some(AppStatus {
                valid: false,
                active: true
            })
        );
        let resp = transfer(&mut dev, Command::GetAppStatus { app: 2 });
        assert_eq!(resp.status(), status::ERR_APP);
    }
}
