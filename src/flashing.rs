//! PSoC programming sequence.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::sleep;
use std::time::Instant;

use crate::checksum::{ChecksumType, row_checksum_with_metadata};
use crate::config::Config;
use crate::constants::{KEY_SIZE, MAX_DATA_SIZE};
use crate::device::{self, AppStatus, DeviceInfo, FlashSize, Metadata};
use crate::error::{Error, FrameError, Result};
use crate::format::{Firmware, FlashRow};
use crate::report::{Logger, NoLogger, NoProgress, Phase, Progress, ProgressSink};
use crate::transport::{Transport, extract_frame};
use crate::{Command, Response};

/// Share of the progress bar before the first row is programmed.
const PROGRAM_BAND_START: f64 = 2.0;
/// Share of the progress bar covered by row programming.
const PROGRAM_BAND_WIDTH: f64 = 88.0;

/// Cooperative cancellation, checked between rows.
///
/// Clones share the same flag, so one can be handed to a signal handler or
/// a progress sink while the sequencer holds another.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// State of one `program`/`erase` call.
struct Session {
    start: Instant,
    phase: Phase,
    total_rows: usize,
    bytes_written: u64,
}

impl Session {
    fn start(total_rows: usize) -> Self {
        Session {
            start: Instant::now(),
            phase: Phase::Entering,
            total_rows,
            bytes_written: 0,
        }
    }

    fn snapshot(&self, current_row: usize, percentage: f64) -> Progress {
        Progress {
            phase: self.phase,
            current_row,
            total_rows: self.total_rows,
            percentage,
            bytes_written: self.bytes_written,
            elapsed: self.start.elapsed(),
        }
    }
}

fn row_percentage(done: usize, total: usize) -> f64 {
    PROGRAM_BAND_START + done as f64 / total as f64 * PROGRAM_BAND_WIDTH
}

pub struct Flashing<T: Transport> {
    transport: T,
    config: Config,
    /// Packet checksum algorithm for every frame. Taken from the firmware
    /// header by `program`.
    checksum_type: ChecksumType,
    logger: Box<dyn Logger + Send>,
    progress: Box<dyn ProgressSink + Send>,
}

impl<T: Transport> Flashing<T> {
    pub fn new(transport: T, config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Flashing {
            transport,
            config,
            checksum_type: ChecksumType::default(),
            logger: Box::new(NoLogger),
            progress: Box::new(NoProgress),
        })
    }

    pub fn with_logger(mut self, logger: impl Logger + Send + 'static) -> Self {
        self.logger = Box::new(logger);
        self
    }

    pub fn with_progress(mut self, sink: impl ProgressSink + Send + 'static) -> Self {
        self.progress = Box::new(sink);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    pub fn checksum_type(&self) -> ChecksumType {
        self.checksum_type
    }

    /// Packet checksum for single commands; `program` and `erase` replace it
    /// with the firmware's.
    pub fn set_checksum_type(&mut self, checksum_type: ChecksumType) {
        self.checksum_type = checksum_type;
    }

    fn pace(&self) {
        if !self.config.command_delay.is_zero() {
            sleep(self.config.command_delay);
        }
    }

    /// Sends one command and returns the payload of a successful response.
    fn execute(&mut self, cmd: Command) -> Result<Vec<u8>> {
        let operation = cmd.name();
        self.pace();
        match self
            .transport
            .transfer(cmd, self.checksum_type, self.config.timeouts())?
        {
            Response::Ok(payload) => Ok(payload),
            Response::Err(status, _) => Err(Error::Protocol { operation, status }),
        }
    }

    /// Sends a command that gets no response.
    fn send_only(&mut self, cmd: Command) -> Result<()> {
        self.pace();
        let raw = cmd.into_raw_with(self.checksum_type)?;
        log::debug!("=> {}", hex::encode(&raw));
        self.transport.send_raw(&raw, self.config.write_timeout)
    }

    /// The key must be exactly 6 bytes; nothing is sent otherwise.
    pub fn enter_bootloader(&mut self, key: &[u8]) -> Result<DeviceInfo> {
        if key.len() != KEY_SIZE {
            return Err(FrameError::InvalidKeyLength(key.len()).into());
        }
        let payload = self.execute(Command::enter_bootloader(key))?;
        Ok(DeviceInfo::from_payload(&payload)?)
    }

    pub fn get_flash_size(&mut self, array_id: u8) -> Result<FlashSize> {
        let payload = self.execute(Command::GetFlashSize { array_id })?;
        Ok(FlashSize::from_payload(&payload)?)
    }

    pub fn send_data(&mut self, data: &[u8]) -> Result<()> {
        self.execute(Command::send_data(data))?;
        Ok(())
    }

    /// Programs one row. Data longer than the configured chunk size goes out
    /// as SendData chunks first; the ProgramRow carries the remainder.
    pub fn program_row(&mut self, array_id: u8, row_number: u16, data: &[u8]) -> Result<()> {
        let mut rest = data;
        while rest.len() > self.config.chunk_size {
            let (chunk, tail) = rest.split_at(self.config.chunk_size);
            self.send_data(chunk)?;
            rest = tail;
        }
        self.execute(Command::program_row(array_id, row_number, rest))?;
        Ok(())
    }

    /// Returns the checksum the device computed for the row.
    pub fn verify_row(&mut self, array_id: u8, row_number: u16) -> Result<u8> {
        let payload = self.execute(Command::verify_row(array_id, row_number))?;
        Ok(device::verify_row_checksum(
            &payload,
            self.config.lenient_verify_row,
        )?)
    }

    pub fn erase_row(&mut self, array_id: u8, row_number: u16) -> Result<()> {
        self.execute(Command::erase_row(array_id, row_number))?;
        Ok(())
    }

    /// Whether the device considers the application valid.
    pub fn verify_checksum(&mut self) -> Result<bool> {
        let payload = self.execute(Command::VerifyChecksum)?;
        Ok(device::application_valid(&payload)?)
    }

    /// Discards any data buffered by SendData. The bootloader does not answer.
    pub fn sync_bootloader(&mut self) -> Result<()> {
        self.send_only(Command::SyncBootloader)
    }

    /// The device resets on exit and usually never answers: a missing or
    /// unreadable response is not an error. An explicit failure status is.
    pub fn exit_bootloader(&mut self) -> Result<()> {
        self.send_only(Command::ExitBootloader)?;
        let raw = match self.transport.recv_raw(self.config.read_timeout) {
            Ok(raw) => raw,
            Err(e) => {
                log::debug!("no response to exit bootloader: {}", e);
                return Ok(());
            }
        };
        log::debug!("<= {}", hex::encode(&raw));
        match Response::from_raw(extract_frame(&raw), self.checksum_type) {
            Ok(Response::Err(status, _)) => Err(Error::Protocol {
                operation: "exit bootloader",
                status,
            }),
            Ok(Response::Ok(_)) => Ok(()),
            Err(e) => {
                log::debug!("ignoring garbled exit response: {}", e);
                Ok(())
            }
        }
    }

    pub fn get_metadata(&mut self, app: u8) -> Result<Metadata> {
        let payload = self.execute(Command::GetMetadata { app })?;
        Ok(Metadata::from_payload(&payload)?)
    }

    pub fn get_app_status(&mut self, app: u8) -> Result<AppStatus> {
        let payload = self.execute(Command::GetAppStatus { app })?;
        Ok(AppStatus::from_payload(&payload)?)
    }

    pub fn set_active_app(&mut self, app: u8) -> Result<()> {
        self.execute(Command::SetActiveApp { app })?;
        Ok(())
    }

    /// Runs the full programming sequence: enter, range check, program and
    /// verify every row, verify the application, exit.
    ///
    /// Nothing is retried. Rows already written stay written on failure.
    pub fn program(&mut self, firmware: &Firmware, key: &[u8], cancel: &CancelToken) -> Result<()> {
        let mut session = Session::start(firmware.rows.len());
        let result = self.run_program(firmware, key, cancel, &mut session);
        if let Err(e) = &result {
            self.logger
                .error("programming failed", &[("phase", &session.phase), ("error", e)]);
        }
        result
    }

    fn run_program(
        &mut self,
        firmware: &Firmware,
        key: &[u8],
        cancel: &CancelToken,
        session: &mut Session,
    ) -> Result<()> {
        check_row_lengths(firmware)?;
        let total = firmware.rows.len();
        self.checksum_type = firmware.checksum_type;
        let silicon_id = format!("0x{:08X}", firmware.silicon_id);
        self.logger.info(
            "programming started",
            &[
                ("silicon_id", &silicon_id),
                ("rows", &total),
                ("bytes", &firmware.total_bytes()),
            ],
        );

        self.progress.report(&session.snapshot(0, 0.0));
        self.enter_checked(firmware, key)?;

        session.phase = Phase::Programming;
        self.progress
            .report(&session.snapshot(0, PROGRAM_BAND_START));
        self.check_ranges(firmware)?;

        for (i, row) in firmware.rows.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            self.program_row(row.array_id, row.row_number, &row.data)?;
            if self.config.verify_rows {
                self.check_row(row)?;
            }
            session.bytes_written += row.data.len() as u64;
            self.logger.debug(
                "row programmed",
                &[("array_id", &row.array_id), ("row", &row.row_number)],
            );
            self.progress
                .report(&session.snapshot(i + 1, row_percentage(i + 1, total)));
        }

        session.phase = Phase::Verifying;
        self.progress.report(&session.snapshot(total, 92.0));
        if !self.verify_checksum()? {
            return Err(Error::Verification);
        }

        session.phase = Phase::Exiting;
        self.progress.report(&session.snapshot(total, 95.0));
        self.exit_bootloader()?;

        session.phase = Phase::Complete;
        let done = session.snapshot(total, 100.0);
        self.progress.report(&done);
        let elapsed = format!("{:?}", done.elapsed);
        self.logger.info(
            "programming complete",
            &[
                ("rows", &total),
                ("bytes", &done.bytes_written),
                ("elapsed", &elapsed),
            ],
        );
        Ok(())
    }

    /// Enters the bootloader and checks the device is the one the firmware
    /// was built for. On mismatch the device is left in the bootloader.
    fn enter_checked(&mut self, firmware: &Firmware, key: &[u8]) -> Result<DeviceInfo> {
        let info = self.enter_bootloader(key)?;
        self.logger.debug("entered bootloader", &[("device", &info)]);
        if info.silicon_id != firmware.silicon_id {
            return Err(Error::DeviceMismatch {
                expected: firmware.silicon_id,
                actual: info.silicon_id,
            });
        }
        Ok(info)
    }

    /// Every row is checked against the first row's array range before any
    /// row is written.
    fn check_ranges(&mut self, firmware: &Firmware) -> Result<()> {
        let Some(first) = firmware.rows.first() else {
            return Ok(());
        };
        let range = self.get_flash_size(first.array_id)?;
        self.logger.debug(
            "flash size",
            &[
                ("array_id", &first.array_id),
                ("start_row", &range.start_row),
                ("end_row", &range.end_row),
            ],
        );
        match firmware.rows.iter().find(|row| !range.contains(row.row_number)) {
            Some(row) => Err(Error::RowOutOfRange {
                row_number: row.row_number,
                array_id: row.array_id,
                min: range.start_row,
                max: range.end_row,
            }),
            None => Ok(()),
        }
    }

    fn check_row(&mut self, row: &FlashRow) -> Result<()> {
        let payload = self.execute(Command::verify_row(row.array_id, row.row_number))?;
        if self.config.lenient_verify_row && payload.is_empty() {
            // older bootloaders answer without a checksum
            return Ok(());
        }
        let actual = device::verify_row_checksum(&payload, false)?;
        let expected = row_checksum_with_metadata(
            row.checksum,
            row.array_id,
            row.row_number,
            row.data.len() as u16,
        );
        if actual != expected {
            return Err(Error::RowVerifyMismatch {
                row_number: row.row_number,
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Enters the bootloader, erases every row the firmware names, exits.
    pub fn erase(&mut self, firmware: &Firmware, key: &[u8], cancel: &CancelToken) -> Result<()> {
        let mut session = Session::start(firmware.rows.len());
        let result = self.run_erase(firmware, key, cancel, &mut session);
        if let Err(e) = &result {
            self.logger
                .error("erase failed", &[("phase", &session.phase), ("error", e)]);
        }
        result
    }

    fn run_erase(
        &mut self,
        firmware: &Firmware,
        key: &[u8],
        cancel: &CancelToken,
        session: &mut Session,
    ) -> Result<()> {
        let total = firmware.rows.len();
        self.checksum_type = firmware.checksum_type;

        self.progress.report(&session.snapshot(0, 0.0));
        self.enter_checked(firmware, key)?;

        session.phase = Phase::Erasing;
        for (i, row) in firmware.rows.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            self.erase_row(row.array_id, row.row_number)?;
            self.progress
                .report(&session.snapshot(i + 1, row_percentage(i + 1, total)));
        }

        session.phase = Phase::Exiting;
        self.progress.report(&session.snapshot(total, 95.0));
        self.exit_bootloader()?;

        session.phase = Phase::Complete;
        self.progress.report(&session.snapshot(total, 100.0));
        self.logger.info("erase complete", &[("rows", &total)]);
        Ok(())
    }
}

/// Rows are built with public fields; a row that no ProgramRow can carry is
/// rejected before the device is touched.
fn check_row_lengths(firmware: &Firmware) -> Result<()> {
    match firmware
        .rows
        .iter()
        .find(|row| row.data.is_empty() || row.data.len() > MAX_DATA_SIZE)
    {
        Some(row) => Err(FrameError::InvalidDataLength {
            command: "program row",
            len: row.data.len(),
        }
        .into()),
        None => Ok(()),
    }
}
