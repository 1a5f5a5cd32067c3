//! Host-side in-system programmer for the UART bootloaders (BSL) of
//! STC 8051-family microcontrollers.
//!
//! Protocol support:
//! - STC89/90:           `protocol::stc89`
//! - STC12x052:          `protocol::stc12a`
//! - STC10/11/12:        `protocol::stc12`
//! - STC15x1xx (early):  `protocol::stc15a`
//! - STC15 (later):      `protocol::stc15`
//! - STC8:               `protocol::stc8`
//!
//! The library drives a [`serial::SerialLink`] through power-up
//! synchronization, part identification, RC oscillator trimming, baud
//! negotiation, flash erase/program and option byte programming. The
//! `stc-isp` binary wires this to a real serial port and a CLI.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub mod framing;
pub mod image;
pub mod ihex;
pub mod models;
pub mod options;
pub mod progress;
pub mod protocol;
pub mod serial;

/// Errors reported by the programming session.
///
/// Framing and timeout errors are recoverable only inside the initial
/// synchronization loop; everywhere else they end the session.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Packet framing violation: bad start/direction/end magic or checksum.
    #[error("framing error: {0}")]
    Framing(&'static str),
    /// Fewer bytes than requested arrived within the read timeout.
    #[error("read timeout")]
    Timeout,
    /// Valid frame, unexpected content, or a protocol constraint failed.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Option name not recognized by the target family.
    #[error("unknown option '{0}'")]
    UnknownOption(String),
    /// Option value failed to parse or validate.
    #[error("invalid value for option '{name}': {reason}")]
    InvalidOptionValue { name: String, reason: String },
    /// The user interrupted the session.
    #[error("interrupted")]
    Interrupted,
    #[error("serial port error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn proto(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    /// Whether the sync loop may swallow this error and keep pulsing.
    pub fn is_sync_recoverable(&self) -> bool {
        matches!(self, Error::Framing(_) | Error::Timeout)
            || matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::TimedOut)
    }
}

pub type Result<T> = core::result::Result<T, Error>;

/// Cooperative cancellation flag, checked between sync pulses.
///
/// Cloned handles share one flag; the binary wires Ctrl-C to it.
#[derive(Clone, Default)]
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
