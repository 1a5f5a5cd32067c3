//! Serial link abstraction over the host UART.
//!
//! The BSL protocols only need a blocking byte pipe with runtime baud and
//! parity reconfiguration, so the port sits behind the small [`SerialLink`]
//! trait. [`HostPort`] implements it on top of the `serialport` crate;
//! tests substitute a scripted link.

use std::io;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

/// Parity applied to the serial line.
///
/// Early-series BSLs (STC89, STC12x052) run without parity; the STC12 and
/// later generations use even parity for error detection.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Parity {
    /// No parity
    None,
    /// Even parity
    Even,
    /// Odd parity
    Odd,
}

/// Overall timeout for a single read request.
pub const READ_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout between consecutive characters once data started flowing.
pub const INTER_CHAR_TIMEOUT: Duration = Duration::from_secs(1);

/// Blocking byte pipe to the target BSL.
///
/// All methods are synchronous; the MCU is a strict request/response peer
/// and nothing here ever runs concurrently.
pub trait SerialLink {
    /// Write the whole buffer.
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Push buffered bytes out on the wire.
    fn flush(&mut self) -> io::Result<()>;

    /// Read exactly `buf.len()` bytes.
    ///
    /// Returns `ErrorKind::TimedOut` when fewer bytes arrive within
    /// [`READ_TIMEOUT`], or when the gap between two characters exceeds
    /// [`INTER_CHAR_TIMEOUT`].
    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()>;

    /// Reconfigure the line speed.
    fn set_baud(&mut self, baud: u32) -> io::Result<()>;

    /// Reconfigure the line parity.
    fn set_parity(&mut self, parity: Parity) -> io::Result<()>;

    /// Drive the DTR line, used to power-cycle boards wired for it.
    fn set_dtr(&mut self, level: bool) -> io::Result<()>;

    /// Whether at least one byte is waiting in the input buffer.
    fn input_pending(&mut self) -> io::Result<bool>;
}

/// [`SerialLink`] over a real serial device.
pub struct HostPort {
    port: Box<dyn serialport::SerialPort>,
}

impl HostPort {
    /// Open `path` at the given baud rate with no parity, 8N1.
    pub fn open(path: &str, baud: u32) -> io::Result<Self> {
        let port = serialport::new(path, baud)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .timeout(INTER_CHAR_TIMEOUT)
            .open()
            .map_err(io::Error::other)?;
        Ok(Self { port })
    }
}

impl SerialLink for HostPort {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.port.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        // The port timeout covers the inter-character gap; the deadline
        // bounds the request as a whole.
        let deadline = Instant::now() + READ_TIMEOUT;
        let mut filled = 0;
        while filled < buf.len() {
            if Instant::now() >= deadline {
                return Err(io::ErrorKind::TimedOut.into());
            }
            match self.port.read(&mut buf[filled..]) {
                Ok(0) => return Err(io::ErrorKind::TimedOut.into()),
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    return Err(io::ErrorKind::TimedOut.into());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn set_baud(&mut self, baud: u32) -> io::Result<()> {
        self.port.set_baud_rate(baud).map_err(io::Error::other)
    }

    fn set_parity(&mut self, parity: Parity) -> io::Result<()> {
        let parity = match parity {
            Parity::None => serialport::Parity::None,
            Parity::Even => serialport::Parity::Even,
            Parity::Odd => serialport::Parity::Odd,
        };
        self.port.set_parity(parity).map_err(io::Error::other)
    }

    fn set_dtr(&mut self, level: bool) -> io::Result<()> {
        self.port
            .write_data_terminal_ready(level)
            .map_err(io::Error::other)
    }

    fn input_pending(&mut self) -> io::Result<bool> {
        Ok(self.port.bytes_to_read().map_err(io::Error::other)? > 0)
    }
}
