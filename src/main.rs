use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use cybootload::constants::KEY_SIZE;
use cybootload::format::read_firmware_from_file;
use cybootload::report::{LogFacade, Progress};
use cybootload::transport::{Baudrate, SerialTransport, SimulatedDevice, Transport, UsbTransport};
use cybootload::{CancelToken, ChecksumType, Config, Error, Flashing};

/// Silicon id the simulated device reports unless told otherwise.
const SIMULATED_SILICON_ID: &str = "0x04C81193";

#[derive(Parser)]
#[command(
    name = "cybootload",
    version,
    about = "Host for the Cypress/Infineon PSoC bootloader: flash .cyacd firmware over USB HID or UART"
)]
struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use the Nth USB bootloader device (default transport)
    #[arg(long, global = true, conflicts_with_all = ["serial", "simulate"])]
    usb: Option<usize>,

    /// USB vendor id of the bootloader
    #[arg(long, global = true, value_parser = parse_hex_u16, default_value = "04b4")]
    vid: u16,

    /// USB product id of the bootloader
    #[arg(long, global = true, value_parser = parse_hex_u16, default_value = "b71d")]
    pid: u16,

    /// Use the UART bootloader on this serial port
    #[arg(long, global = true, conflicts_with = "simulate")]
    serial: Option<String>,

    /// Serial baudrate
    #[arg(long, global = true, value_enum, default_value_t = Baudrate::default())]
    baudrate: Baudrate,

    /// Talk to an in-memory device reporting this silicon id
    #[arg(
        long,
        global = true,
        value_parser = parse_hex_u32,
        num_args = 0..=1,
        default_missing_value = SIMULATED_SILICON_ID
    )]
    simulate: Option<u32>,

    /// YAML configuration file, overridden by the flags below
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Bootloader key, 12 hex characters
    #[arg(long, global = true, value_parser = parse_key, default_value = "0A1B2C3D4E5F")]
    key: [u8; KEY_SIZE],

    /// Largest SendData payload
    #[arg(long, global = true)]
    chunk_size: Option<usize>,

    /// Whole-image programming attempts
    #[arg(long, global = true)]
    retries: Option<u32>,

    /// Skip VerifyRow after each programmed row
    #[arg(long, global = true)]
    no_verify: bool,

    /// CRC-16 packet checksums for commands outside flash/erase
    #[arg(long, global = true)]
    crc16: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print device information, flash range and application metadata
    Info {},
    /// Program a .cyacd image and reset into it
    Flash {
        /// The path to the .cyacd file
        path: PathBuf,
    },
    /// Erase every row a .cyacd image names
    Erase { path: PathBuf },
    /// Ask the bootloader whether the application checksum is valid
    Verify {},
    /// Print the metadata of an application
    Metadata {
        #[arg(default_value_t = 0)]
        app: u8,
    },
    /// Print valid/active flags of an application (multi-application bootloaders)
    AppStatus {
        #[arg(default_value_t = 0)]
        app: u8,
    },
    /// Mark an application active (multi-application bootloaders)
    SetActive { app: u8 },
    /// Parse a .cyacd file and print its contents, no device needed
    Dump {
        path: PathBuf,
        /// Hexdump every row
        #[arg(long)]
        rows: bool,
    },
    /// Leave the bootloader and reset into the application
    Reset {},
    /// List serial ports and USB bootloaders
    Ports {},
}

fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let hex = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
}

fn parse_hex_u16(s: &str) -> Result<u16, String> {
    let v = parse_hex_u32(s)?;
    u16::try_from(v).map_err(|_| format!("0x{:X} does not fit 16 bits", v))
}

fn parse_key(s: &str) -> Result<[u8; KEY_SIZE], String> {
    let raw = hex::decode(s).map_err(|e| format!("Invalid key: {}", e))?;
    raw.try_into()
        .map_err(|raw: Vec<u8>| format!("key must be {} bytes, got {}", KEY_SIZE, raw.len()))
}

impl Cli {
    fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_yaml_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => Config::default(),
        };
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
        if let Some(retries) = self.retries {
            config.retries = retries;
        }
        if self.no_verify {
            config.verify_rows = false;
        }
        Ok(config)
    }

    fn open_transport(&self) -> Result<Box<dyn Transport>> {
        if let Some(silicon_id) = self.simulate {
            log::info!("Using simulated device, silicon id 0x{:08X}", silicon_id);
            return Ok(Box::new(SimulatedDevice::new(silicon_id, 0)));
        }
        if let Some(port) = &self.serial {
            return Ok(Box::new(SerialTransport::open(port, self.baudrate)?));
        }
        let nth = self.usb.unwrap_or(0);
        let found = UsbTransport::scan_devices(self.vid, self.pid)?;
        anyhow::ensure!(
            nth < found,
            "USB bootloader #{} not found ({} device(s) with {:04x}:{:04x})",
            nth,
            found,
            self.vid,
            self.pid
        );
        Ok(Box::new(UsbTransport::open_nth(self.vid, self.pid, nth)?))
    }
}

/// Failures worth another whole-image attempt.
fn is_retryable(err: &Error) -> bool {
    !matches!(
        err,
        Error::Cancelled
            | Error::DeviceMismatch { .. }
            | Error::RowOutOfRange { .. }
            | Error::Firmware(_)
            | Error::Config(_)
    )
}

fn progress_bar() -> Result<ProgressBar> {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    let _ = simplelog::TermLogger::init(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    match &cli.command {
        Commands::Dump { path, rows } => return dump(path, *rows),
        Commands::Ports {} => return ports(cli.vid, cli.pid),
        _ => {}
    }

    let config = cli.load_config()?;
    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        handler_token.cancel();
    })?;

    let transport = cli.open_transport()?;
    let mut flashing = Flashing::new(transport, config)?.with_logger(LogFacade);
    if cli.crc16 {
        flashing.set_checksum_type(ChecksumType::Crc16);
    }
    let key = cli.key;

    match &cli.command {
        Commands::Info {} => {
            let info = flashing.enter_bootloader(&key)?;
            log::info!("Device: {}", info);
            let range = flashing.get_flash_size(0)?;
            log::info!("Flash rows: 0x{:04X}..=0x{:04X}", range.start_row, range.end_row);
            match flashing.get_metadata(0) {
                Ok(metadata) => log::info!("Application 0: {}", metadata),
                Err(e) => log::warn!("No application metadata: {}", e),
            }
            flashing.exit_bootloader()?;
        }
        Commands::Flash { path } => {
            let firmware = read_firmware_from_file(path)?;
            let pb = progress_bar()?;
            let bar = pb.clone();
            let mut flashing = flashing.with_progress(move |p: &Progress| {
                bar.set_position(p.percentage as u64);
                bar.set_message(format!("{} {}/{} rows", p.phase, p.current_row, p.total_rows));
            });

            let attempts = flashing.config().retries.max(1);
            for attempt in 1..=attempts {
                match flashing.program(&firmware, &key, &cancel) {
                    Ok(()) => break,
                    Err(e) if attempt < attempts && is_retryable(&e) => {
                        log::warn!("Attempt {}/{} failed: {}", attempt, attempts, e);
                        if let Err(e) = flashing.sync_bootloader() {
                            log::warn!("Sync bootloader failed: {}", e);
                        }
                    }
                    Err(e) => {
                        pb.abandon();
                        return Err(e).context("programming failed");
                    }
                }
            }
            pb.finish_with_message("done");
            log::info!("Flashed {} bytes", firmware.total_bytes());
        }
        Commands::Erase { path } => {
            let firmware = read_firmware_from_file(path)?;
            flashing.erase(&firmware, &key, &cancel)?;
            log::info!("Erased {} rows", firmware.rows.len());
        }
        Commands::Verify {} => {
            flashing.enter_bootloader(&key)?;
            let valid = flashing.verify_checksum()?;
            flashing.exit_bootloader()?;
            anyhow::ensure!(valid, "application checksum is invalid");
            log::info!("Verified!");
        }
        Commands::Metadata { app } => {
            flashing.enter_bootloader(&key)?;
            let metadata = flashing.get_metadata(*app)?;
            println!("{}", metadata);
            flashing.exit_bootloader()?;
        }
        Commands::AppStatus { app } => {
            flashing.enter_bootloader(&key)?;
            let status = flashing.get_app_status(*app)?;
            println!("app {}: valid {}, active {}", app, status.valid, status.active);
            flashing.exit_bootloader()?;
        }
        Commands::SetActive { app } => {
            flashing.enter_bootloader(&key)?;
            flashing.set_active_app(*app)?;
            log::info!("Application {} active", app);
            flashing.exit_bootloader()?;
        }
        Commands::Reset {} => {
            flashing.enter_bootloader(&key)?;
            flashing.exit_bootloader()?;
            log::info!("Device reset");
        }
        Commands::Dump { .. } | Commands::Ports {} => {
            unreachable!("handled before opening a device")
        }
    }

    Ok(())
}

fn ports(vid: u16, pid: u16) -> Result<()> {
    let serial = SerialTransport::scan_ports()?;
    if serial.is_empty() {
        log::info!("No serial ports");
    }
    for (i, port) in serial.iter().enumerate() {
        println!("serial #{}: {}", i, port);
    }
    match UsbTransport::scan_devices(vid, pid) {
        Ok(n) => println!("{} USB bootloader(s) with {:04x}:{:04x}", n, vid, pid),
        Err(e) => log::warn!("USB scan failed: {}", e),
    }
    Ok(())
}

fn dump(path: &Path, rows: bool) -> Result<()> {
    let firmware = read_firmware_from_file(path)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    writeln!(
        out,
        "silicon id 0x{:08X} rev 0x{:02X}, checksum {:?}, {} rows, {} bytes, arrays {:?}",
        firmware.silicon_id,
        firmware.silicon_rev,
        firmware.checksum_type,
        firmware.rows.len(),
        firmware.total_bytes(),
        firmware.array_ids()
    )?;
    for row in &firmware.rows {
        writeln!(
            out,
            "array {} row 0x{:04X}: {} bytes, checksum 0x{:02X}",
            row.array_id,
            row.row_number,
            row.data.len(),
            row.checksum
        )?;
        if rows {
            let mut buf = Vec::new();
            hxdmp::hexdump(&row.data, &mut buf)?;
            writeln!(out, "{}", String::from_utf8_lossy(&buf))?;
        }
    }
    Ok(())
}
