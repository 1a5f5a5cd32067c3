//! `stc-isp` command line frontend.

use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use stc_isp::progress::ConsoleProgress;
use stc_isp::protocol::{self, FlashJob, ProtocolKind, SessionConfig};
use stc_isp::serial::{HostPort, SerialLink};
use stc_isp::{image, CancelToken, Error};

#[derive(Parser)]
#[command(name = "stc-isp", version, about = "STC MCU ISP flash tool")]
struct Cli {
    /// Code image to flash, raw binary or Intel HEX by extension
    code_image: Option<PathBuf>,

    /// EEPROM image to flash
    eeprom_image: Option<PathBuf>,

    /// Protocol version
    #[arg(short = 'P', long, value_enum, default_value = "auto")]
    protocol: Protocol,

    /// Serial port device
    #[arg(short, long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Transfer baud rate
    #[arg(short, long, default_value_t = 19200)]
    baud: u32,

    /// Handshake baud rate
    #[arg(short = 'l', long, default_value_t = 2400)]
    handshake: u32,

    /// Set an option, name=value; can be used multiple times
    #[arg(short, long = "option", value_name = "NAME=VALUE")]
    option: Vec<String>,

    /// RC oscillator frequency in kHz, STC15/STC8 series only
    #[arg(short, long, default_value_t = 0.0)]
    trim: f64,

    /// Cycle target power by pulsing DTR before synchronization
    #[arg(short = 'a', long)]
    autoreset: bool,

    /// External command that cycles target power
    #[arg(long, value_name = "CMD")]
    resetcmd: Option<String>,

    /// Dump raw packets to stderr
    #[arg(short = 'D', long)]
    debug: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Protocol {
    Auto,
    Stc89,
    Stc12a,
    Stc12b,
    Stc12,
    Stc15a,
    Stc15,
    Stc8,
    Usb15,
}

impl From<Protocol> for ProtocolKind {
    fn from(p: Protocol) -> ProtocolKind {
        match p {
            Protocol::Auto => ProtocolKind::Auto,
            Protocol::Stc89 => ProtocolKind::Stc89,
            Protocol::Stc12a => ProtocolKind::Stc12A,
            Protocol::Stc12b => ProtocolKind::Stc12B,
            Protocol::Stc12 => ProtocolKind::Stc12,
            Protocol::Stc15a => ProtocolKind::Stc15A,
            Protocol::Stc15 => ProtocolKind::Stc15,
            Protocol::Stc8 => ProtocolKind::Stc8,
            Protocol::Usb15 => ProtocolKind::Usb15,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default()
            .default_filter_or(if cli.debug { "debug" } else { "info" }),
    )
    .format_timestamp(None)
    .format_target(false)
    .init();

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        if let Err(e) = ctrlc::set_handler(move || cancel.cancel()) {
            log::warn!("unable to install interrupt handler: {e}");
        }
    }

    match run(&cli, cancel) {
        Ok(()) => ExitCode::SUCCESS,
        Err(Error::Interrupted) => {
            eprintln!("interrupted");
            ExitCode::from(2)
        }
        Err(e @ (Error::UnknownOption(_) | Error::InvalidOptionValue { .. })) => {
            eprintln!("Option error: {e}");
            ExitCode::FAILURE
        }
        Err(Error::Io(e)) => {
            eprintln!("Serial port error: {e}");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Protocol error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, cancel: CancelToken) -> stc_isp::Result<()> {
    let job = FlashJob {
        code: cli.code_image.as_deref().map(image::load).transpose()?,
        eeprom: cli.eeprom_image.as_deref().map(image::load).transpose()?,
        options: parse_options(&cli.option)?,
    };

    let mut port = HostPort::open(&cli.port, cli.handshake)?;
    reset_target(cli, &mut port)?;

    let mut kind = ProtocolKind::from(cli.protocol);
    if kind == ProtocolKind::Auto {
        let mut progress = ConsoleProgress;
        kind = protocol::detect(&mut port, cli.handshake, &cancel, &mut progress)?;
    }

    let config = SessionConfig {
        handshake_baud: cli.handshake,
        transfer_baud: cli.baud,
        trim_khz: cli.trim,
        progress: Box::new(ConsoleProgress),
        cancel,
        ..SessionConfig::default()
    };
    let mut proto = protocol::build(kind, Box::new(port), config)?;

    let result = protocol::run_session(proto.as_mut(), &job);
    if result.is_err() {
        // Best effort: leave the target out of BSL mode before bailing.
        let _ = proto.disconnect();
    }
    result
}

fn parse_options(raw: &[String]) -> stc_isp::Result<Vec<(String, String)>> {
    raw.iter()
        .map(|entry| {
            entry
                .split_once('=')
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .ok_or_else(|| Error::InvalidOptionValue {
                    name: entry.clone(),
                    reason: "incorrect format, expected name=value".into(),
                })
        })
        .collect()
}

fn reset_target(cli: &Cli, port: &mut HostPort) -> stc_isp::Result<()> {
    if cli.autoreset {
        port.set_dtr(true)?;
        thread::sleep(Duration::from_millis(500));
        port.set_dtr(false)?;
    } else if let Some(cmd) = &cli.resetcmd {
        let status = std::process::Command::new("sh").arg("-c").arg(cmd).status()?;
        if !status.success() {
            log::warn!("reset command exited with {status}");
        }
    }
    Ok(())
}
