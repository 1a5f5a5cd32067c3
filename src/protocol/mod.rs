//! BSL protocol state machines.
//!
//! Every family walks the same skeleton,
//!
//! ```text
//! connect -> handshake -> erase -> program_flash -> program_options -> disconnect
//! ```
//!
//! with user option overrides applied between connect and handshake. The
//! shared plumbing lives in [`Session`]: the 0x7F pulse loop, packet I/O over
//! the family's framing dialect, model lookup and clock computation. Each
//! family module owns only its wire sequences and status packet layout.

use std::thread;
use std::time::Duration;

use crate::framing::{self, Dialect};
use crate::models::{self, McuModel};
use crate::options::OptionCodec;
use crate::progress::{ProgressSink, SilentProgress};
use crate::serial::SerialLink;
use crate::{CancelToken, Error, Result};

pub mod auto;
pub mod stc12;
pub mod stc12a;
pub mod stc15;
pub mod stc15a;
pub mod stc8;
pub mod stc89;

pub use auto::detect;

/// Synchronization byte emitted while waiting for the BSL to come up.
pub const PULSE_BYTE: u8 = 0x7F;
/// Gap between pulses. Long enough for a booting BSL to sample several
/// pulses, short enough that the wait feels immediate.
pub const PULSE_INTERVAL: Duration = Duration::from_millis(15);
/// Settle time after commanding a baud rate change.
const BAUD_SWITCH_DELAY: Duration = Duration::from_millis(200);
/// Fixed RC frequency used while programming on the trimming families.
/// 22.1184 MHz divides into the common baud rates with low error.
pub const PROGRAM_FREQ_HZ: f64 = 22_118_400.0;

/// Per-session tunables handed to a protocol machine.
pub struct SessionConfig {
    pub handshake_baud: u32,
    pub transfer_baud: u32,
    /// Requested RC trim target in kHz; 0 keeps the current calibration.
    pub trim_khz: f64,
    /// Gap between sync pulses.
    pub pulse_interval: Duration,
    /// Settle time after commanding a baud rate change.
    pub baud_switch_delay: Duration,
    pub progress: Box<dyn ProgressSink>,
    pub cancel: CancelToken,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_baud: 2400,
            transfer_baud: 19200,
            trim_khz: 0.0,
            pulse_interval: PULSE_INTERVAL,
            baud_switch_delay: BAUD_SWITCH_DELAY,
            progress: Box::new(SilentProgress),
            cancel: CancelToken::new(),
        }
    }
}

/// Capability set every family machine implements.
///
/// The orchestrator only ever talks to this trait; family selection happens
/// once, at construction.
pub trait BslProtocol {
    fn connect(&mut self) -> Result<()>;
    fn apply_option(&mut self, name: &str, value: &str) -> Result<()>;
    fn handshake(&mut self) -> Result<()>;
    fn erase_flash(&mut self, erase_size: u32, flash_size: u32) -> Result<()>;
    fn program_flash(&mut self, data: &[u8]) -> Result<()>;
    fn program_options(&mut self) -> Result<()>;
    fn disconnect(&mut self) -> Result<()>;

    /// Identified part, available after `connect`.
    fn model(&self) -> Option<McuModel>;

    /// Image padding boundary for this family, 256 or 512 bytes.
    fn image_alignment(&self) -> usize;
}

impl std::fmt::Debug for dyn BslProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("dyn BslProtocol")
            .field("model", &self.model())
            .finish()
    }
}

/// Which protocol machine to run.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ProtocolKind {
    Auto,
    Stc89,
    Stc12A,
    Stc12B,
    Stc12,
    Stc15A,
    Stc15,
    Stc8,
    Usb15,
}

/// Construct the machine for a resolved protocol choice.
///
/// `Auto` must be resolved through [`detect`] first. The USB transport of
/// the `usb15` variant is not supported.
pub fn build(
    kind: ProtocolKind,
    link: Box<dyn SerialLink>,
    config: SessionConfig,
) -> Result<Box<dyn BslProtocol>> {
    Ok(match kind {
        ProtocolKind::Stc89 => Box::new(stc89::Stc89::new(link, config)),
        ProtocolKind::Stc12A => Box::new(stc12a::Stc12A::new(link, config)),
        // The 52/56 subfamilies differ from the rest of the 12 generation
        // only in the model table.
        ProtocolKind::Stc12B | ProtocolKind::Stc12 => {
            Box::new(stc12::Stc12::new(link, config))
        }
        ProtocolKind::Stc15A => Box::new(stc15a::Stc15A::new(link, config)),
        ProtocolKind::Stc15 => Box::new(stc15::Stc15::new(link, config)),
        ProtocolKind::Stc8 => Box::new(stc8::Stc8::new(link, config)),
        ProtocolKind::Usb15 => {
            return Err(Error::proto("USB transport is not supported"));
        }
        ProtocolKind::Auto => {
            return Err(Error::proto("auto protocol must be detected first"));
        }
    })
}

/// What a session should flash and configure.
#[derive(Default)]
pub struct FlashJob {
    /// Code image; `None` runs an info-only session.
    pub code: Option<Vec<u8>>,
    /// Optional data EEPROM image, appended at the code boundary.
    pub eeprom: Option<Vec<u8>>,
    /// Option overrides, applied between connect and handshake.
    pub options: Vec<(String, String)>,
}

/// Drive one full programming cycle.
///
/// Without a code image the session identifies the part, prints its state
/// and resets it. The caller is responsible for a best-effort disconnect
/// when this returns an error.
pub fn run_session(proto: &mut dyn BslProtocol, job: &FlashJob) -> Result<()> {
    proto.connect()?;

    let Some(code) = &job.code else {
        return proto.disconnect();
    };

    for (name, value) in &job.options {
        proto.apply_option(name, value)?;
    }

    let model = proto
        .model()
        .ok_or_else(|| Error::proto("connect did not identify a model"))?;
    let image = crate::image::assemble(code, job.eeprom.as_deref(), &model, proto.image_alignment());

    proto.handshake()?;
    proto.erase_flash(image.len() as u32, model.code)?;
    proto.program_flash(&image)?;
    proto.program_options()?;
    proto.disconnect()
}

/// Shared connection state and plumbing for one programming session.
pub(crate) struct Session {
    link: Box<dyn SerialLink>,
    dialect: Dialect,
    pub handshake_baud: u32,
    pub transfer_baud: u32,
    pub trim_frequency: f64,
    pulse_interval: Duration,
    baud_switch_delay: Duration,
    pub progress: Box<dyn ProgressSink>,
    cancel: CancelToken,

    pub magic: u16,
    pub model: Option<McuModel>,
    pub clock_hz: f64,
    pub bsl_version: String,
    pub codec: Option<OptionCodec>,
    pub uid: Option<Vec<u8>>,
}

impl Session {
    pub fn new(link: Box<dyn SerialLink>, dialect: Dialect, config: SessionConfig) -> Self {
        Self {
            link,
            dialect,
            handshake_baud: config.handshake_baud,
            transfer_baud: config.transfer_baud,
            trim_frequency: config.trim_khz * 1000.0,
            pulse_interval: config.pulse_interval,
            baud_switch_delay: config.baud_switch_delay,
            progress: config.progress,
            cancel: config.cancel,
            magic: 0,
            model: None,
            clock_hz: 0.0,
            bsl_version: String::new(),
            codec: None,
            uid: None,
        }
    }

    pub fn write_packet(&mut self, payload: &[u8]) -> Result<()> {
        framing::write_packet(self.link.as_mut(), self.dialect, payload)
    }

    pub fn read_packet(&mut self) -> Result<Vec<u8>> {
        framing::read_packet(self.link.as_mut(), self.dialect)
    }

    /// Read a packet and check its leading type byte.
    pub fn expect(&mut self, cmd: u8, what: &str) -> Result<Vec<u8>> {
        let response = self.read_packet()?;
        if response.first() != Some(&cmd) {
            return Err(Error::proto(format!("incorrect magic in {what} packet")));
        }
        Ok(response)
    }

    /// Push raw bytes, outside packet framing.
    pub fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        self.link.write_all(data)?;
        self.link.flush()?;
        Ok(())
    }

    pub fn set_baud(&mut self, baud: u32) -> Result<()> {
        Ok(self.link.set_baud(baud)?)
    }

    /// Wait out the MCU's internal switch delay, then move our side over.
    pub fn switch_to_transfer_baud(&mut self) -> Result<()> {
        thread::sleep(self.baud_switch_delay);
        self.set_baud(self.transfer_baud)
    }

    /// Emit pulses until the target starts answering.
    pub fn pulse(&mut self) -> Result<()> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Interrupted);
            }
            self.link.write_all(&[PULSE_BYTE])?;
            self.link.flush()?;
            thread::sleep(self.pulse_interval);
            if self.link.input_pending()? {
                return Ok(());
            }
        }
    }

    /// Pulse-and-read until a valid status packet arrives.
    ///
    /// Framing and timeout errors are swallowed here, and only here: the user
    /// is cycling target power and we see arbitrary garbage until the BSL
    /// catches a clean pulse train.
    pub fn sync_status<F>(&mut self, mut read_status: F) -> Result<Vec<u8>>
    where
        F: FnMut(&mut Session) -> Result<Vec<u8>>,
    {
        self.link.set_parity(self.dialect.parity)?;
        self.link.set_baud(self.handshake_baud)?;
        self.progress.begin("Waiting for MCU, please cycle power");
        loop {
            self.pulse()?;
            match read_status(self) {
                Ok(packet) => {
                    self.progress.done();
                    return Ok(packet);
                }
                Err(e) if e.is_sync_recoverable() => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Resolve the identified magic against the registry and report the part.
    pub fn initialize_model(&mut self) {
        let model = models::find_or_unknown(self.magic);
        self.progress
            .line(&format!("Target model: {} (magic {:04X})", model.name, model.magic));
        self.progress.line(&format!(
            "Target flash: {:.1} KB code, {:.1} KB EEPROM",
            model.code as f64 / 1024.0,
            model.eeprom as f64 / 1024.0
        ));
        self.progress
            .line(&format!("Target frequency: {:.3} MHz", self.clock_hz / 1e6));
        self.progress
            .line(&format!("Target BSL version: {}", self.bsl_version));
        self.model = Some(model);
    }

    /// List current option values through the progress sink.
    pub fn report_options(&mut self) {
        if let Some(codec) = &self.codec {
            self.progress.line("Target options:");
            let lines: Vec<String> = codec
                .list()
                .map(|(name, value)| format!("  {name}={value}"))
                .collect();
            for line in lines {
                self.progress.line(&line);
            }
        }
    }

    pub fn apply_option(&mut self, name: &str, value: &str) -> Result<()> {
        let codec = self
            .codec
            .as_mut()
            .ok_or_else(|| Error::proto("options not available before connect"))?;
        codec.set(name, value)?;
        self.progress.line(&format!("Option {name}={value}"));
        Ok(())
    }

    /// Send the reset command and close down. Never waits for a response.
    pub fn disconnect(&mut self) -> Result<()> {
        self.write_packet(&[0x82])?;
        self.progress.line("Disconnected!");
        Ok(())
    }

    pub fn report_uid(&mut self) {
        if let Some(uid) = &self.uid {
            let text = format!("Target UID: {}", framing::hex_str(uid));
            self.progress.line(&text);
        }
    }
}

/// Decode the mean of `samples` 16-bit frequency counter readings starting
/// at status packet offset 1.
pub(crate) fn mean_freq_counter(packet: &[u8], samples: usize) -> f64 {
    let sum: u32 = (0..samples)
        .map(|i| u16::from_be_bytes([packet[1 + 2 * i], packet[2 + 2 * i]]) as u32)
        .sum();
    sum as f64 / samples as f64
}

/// BSL version string from its BCD byte and ASCII stepping letter.
pub(crate) fn bsl_version(packet: &[u8]) -> String {
    let version = packet[17];
    let stepping = packet[18] as char;
    format!("{}.{}{}", version >> 4, version & 0x0f, stepping)
}

pub(crate) fn be16(packet: &[u8], offset: usize) -> Result<u16> {
    packet
        .get(offset..offset + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or(Error::proto_short())
}

pub(crate) fn be32(packet: &[u8], offset: usize) -> Result<u32> {
    packet
        .get(offset..offset + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or(Error::proto_short())
}

impl Error {
    pub(crate) fn proto_short() -> Error {
        Error::Protocol("packet too short".into())
    }
}

/// UART divisor and flash timing settings for the simple (non-trimming)
/// baud handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BaudParams {
    pub brt: u16,
    pub brt_csum: u8,
    pub iap_wait: u8,
    pub delay: u8,
}

/// 8-bit BRT divisor for the STC10/11/12 generations.
///
/// Rejects targets whose divisor falls outside (1, 255); warns when the
/// reachable rate misses the request by more than 5 %.
pub fn calculate_baud_brt8(clock_hz: f64, transfer_baud: u32) -> Result<BaudParams> {
    let brt = 256 - (clock_hz / (transfer_baud as f64 * 16.0)).round() as i32;
    if brt <= 1 || brt > 255 {
        return Err(Error::proto("requested baudrate cannot be set"));
    }
    let brt_csum = ((2 * (256 - brt)) & 0xff) as u8;
    let baud_actual = clock_hz / (16.0 * (256 - brt) as f64);
    warn_baud_error(transfer_baud, baud_actual);
    Ok(BaudParams {
        brt: brt as u16,
        brt_csum,
        iap_wait: iap_wait_12(clock_hz),
        delay: 0x80,
    })
}

/// 16-bit BRT divisor for the STC89/90 series. `sample_rate` is 16 in 6T
/// mode and 32 in 12T mode.
pub fn calculate_baud_brt16(clock_hz: f64, transfer_baud: u32, sample_rate: u32) -> BaudParams {
    let brt = 65536 - (clock_hz / (transfer_baud as f64 * sample_rate as f64)).round() as i32;
    let brt_csum = ((2 * (256 - brt)) & 0xff) as u8;
    let baud_actual = clock_hz / (sample_rate as f64 * (65536 - brt) as f64);
    warn_baud_error(transfer_baud, baud_actual);
    BaudParams {
        brt: brt as u16,
        brt_csum,
        iap_wait: iap_wait_89(clock_hz),
        delay: 0xa0,
    }
}

fn warn_baud_error(requested: u32, actual: f64) {
    let error = (requested as f64 - actual).abs() * 100.0 / requested as f64;
    if error > 5.0 {
        log::warn!("baudrate error is {error:.2}%. You may need to set a slower rate.");
    }
}

/// Flash write wait states per clock band, STC12 and later.
fn iap_wait_12(clock_hz: f64) -> u8 {
    match clock_hz {
        c if c < 1e6 => 0x87,
        c if c < 2e6 => 0x86,
        c if c < 3e6 => 0x85,
        c if c < 6e6 => 0x84,
        c if c < 12e6 => 0x83,
        c if c < 20e6 => 0x82,
        c if c < 24e6 => 0x81,
        _ => 0x80,
    }
}

/// Coarser wait state bands used by the STC89 series.
fn iap_wait_89(clock_hz: f64) -> u8 {
    match clock_hz {
        c if c < 5e6 => 0x83,
        c if c < 10e6 => 0x82,
        c if c < 20e6 => 0x81,
        _ => 0x80,
    }
}

/// Number of 512-byte erase blocks, as the erase commands count them.
pub(crate) fn erase_blocks(size: u32) -> u8 {
    (size.div_ceil(512) * 2).min(0xff) as u8
}

/// Pick the calibration window bracketing `target_count` from a trim
/// challenge/response round and interpolate the trim estimate for it.
///
/// `challenge` is the payload we sent (`[cmd, n, (adj, range)...]`),
/// `response` the MCU's measured counters (`[cmd, n, count...]`). Returns
/// `(estimated_trim, trim_range)`.
pub(crate) fn choose_range(
    challenge: &[u8],
    response: &[u8],
    target_count: u32,
) -> Option<(i32, u8)> {
    let calib_len = *response.get(1)? as usize;
    for i in 0..calib_len.saturating_sub(1) {
        let count_a = be16(response, 2 + 2 * i).ok()? as i32;
        let count_b = be16(response, 2 + 2 * i + 2).ok()? as i32;
        let trim_a = *challenge.get(2 + 2 * i)? as i32;
        let trim_b = *challenge.get(2 + 2 * i + 2)? as i32;
        let trim_range = *challenge.get(2 + 2 * i + 3)?;
        let target = target_count as i32;
        let brackets = (count_a <= target && count_b >= target)
            || (count_b <= target && count_a >= target);
        if !brackets || count_a == count_b {
            continue;
        }
        let m = (trim_b - trim_a) as f64 / (count_b - count_a) as f64;
        let n = trim_a as f64 - m * count_a as f64;
        let target_trim = (m * target as f64 + n).round() as i32;
        return Some((target_trim, trim_range));
    }
    None
}

/// Pick the challenge entry whose measured counter lands closest to
/// `target_count`. Returns `((trim_adjust, trim_range), count)`.
pub(crate) fn choose_trim(
    challenge: &[u8],
    response: &[u8],
    target_count: u32,
) -> Option<((u8, u8), u16)> {
    let calib_len = *response.get(1)? as usize;
    let mut best: Option<((u8, u8), u16)> = None;
    let mut best_distance = u32::MAX;
    for i in 0..calib_len {
        let count = be16(response, 2 + 2 * i).ok()?;
        let adjust = *challenge.get(2 + 2 * i)?;
        let range = *challenge.get(2 + 2 * i + 1)?;
        let distance = (count as i64 - target_count as i64).unsigned_abs() as u32;
        if distance < best_distance {
            best_distance = distance;
            best = Some(((adjust, range), count));
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brt8_in_range() {
        // 11.0592 MHz, 19200 baud: divisor 36, a classic setting
        let params = calculate_baud_brt8(11_059_200.0, 19200).unwrap();
        assert_eq!(params.brt, 256 - 36);
        assert_eq!(params.brt_csum, ((2 * 36) & 0xff) as u8);
        assert_eq!(params.iap_wait, 0x83);
        assert_eq!(params.delay, 0x80);
    }

    #[test]
    fn brt8_unreachable() {
        // 33 MHz down to 1200 baud needs a divisor far beyond 255
        assert!(calculate_baud_brt8(33_000_000.0, 1200).is_err());
        // a full-range divisor leaves no reload value
        assert!(calculate_baud_brt8(300.0 * 16.0 * 256.0, 300).is_err());
    }

    #[test]
    fn brt16_classic_rates() {
        let params = calculate_baud_brt16(11_059_200.0, 19200, 32);
        assert_eq!(params.brt, 0xffee); // 65536 - 18
        assert_eq!(params.iap_wait, 0x81);
        assert_eq!(params.delay, 0xa0);
    }

    #[test]
    fn iap_wait_bands() {
        assert_eq!(iap_wait_12(900e3), 0x87);
        assert_eq!(iap_wait_12(11_059_200.0), 0x83);
        assert_eq!(iap_wait_12(25e6), 0x80);
        assert_eq!(iap_wait_89(4e6), 0x83);
        assert_eq!(iap_wait_89(22_118_400.0), 0x80);
    }

    #[test]
    fn erase_block_count() {
        assert_eq!(erase_blocks(512), 2);
        assert_eq!(erase_blocks(513), 4);
        assert_eq!(erase_blocks(9), 2);
    }
}
