//! Protocol auto-detection.
//!
//! A generic probe that pulses the target, accepts whichever framing
//! dialect answers, pulls the identification word out of the status packet
//! and classifies it into a protocol generation. The probe never sends
//! anything that could commit a state change on the target; the chosen
//! machine then reconnects from scratch.

use std::thread;

use crate::framing::{self, Dialect};
use crate::models::{self, Family};
use crate::progress::ProgressSink;
use crate::serial::{Parity, SerialLink};
use crate::{CancelToken, Error, Result};

use super::{be16, ProtocolKind, PULSE_BYTE, PULSE_INTERVAL};

/// Read a frame and decode it under whichever dialect checks out.
fn probe_read(link: &mut dyn SerialLink) -> Result<Vec<u8>> {
    let frame = framing::read_frame(link, true)?;
    framing::decode(Dialect::B, &frame).or_else(|_| framing::decode(Dialect::A, &frame))
}

fn pulse(link: &mut dyn SerialLink, cancel: &CancelToken) -> Result<()> {
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Interrupted);
        }
        link.write_all(&[PULSE_BYTE])?;
        link.flush()?;
        thread::sleep(PULSE_INTERVAL);
        if link.input_pending()? {
            return Ok(());
        }
    }
}

fn read_status(link: &mut dyn SerialLink, cancel: &CancelToken) -> Result<Vec<u8>> {
    let mut packet = probe_read(link)?;
    if packet.first() == Some(&0x80) {
        // 15-series ping; answer and ask again
        framing::write_packet(link, Dialect::B, &[0x80])?;
        pulse(link, cancel)?;
        packet = probe_read(link)?;
    }
    match packet.first() {
        Some(&0x50) | Some(&0x00) => Ok(packet),
        _ => Err(Error::proto("incorrect magic in status packet")),
    }
}

/// Probe the target and decide which protocol machine to run.
pub fn detect(
    link: &mut dyn SerialLink,
    handshake_baud: u32,
    cancel: &CancelToken,
    progress: &mut dyn ProgressSink,
) -> Result<ProtocolKind> {
    link.set_parity(Parity::None)?;
    link.set_baud(handshake_baud)?;

    progress.begin("Waiting for MCU, please cycle power");
    let packet = loop {
        pulse(link, cancel)?;
        match read_status(link, cancel) {
            Ok(packet) => break packet,
            Err(e) if e.is_sync_recoverable() => continue,
            Err(e) => return Err(e),
        }
    };
    progress.done();

    let magic = be16(&packet, 20)?;
    let (family, name) = classify_candidates(magic)?;
    let kind = match family {
        Family::Stc89 => ProtocolKind::Stc89,
        Family::Stc12A => ProtocolKind::Stc12A,
        Family::Stc12B => ProtocolKind::Stc12B,
        Family::Stc12 => ProtocolKind::Stc12,
        Family::Stc15A => ProtocolKind::Stc15A,
        Family::Stc15 => ProtocolKind::Stc15,
        Family::Stc8 => ProtocolKind::Stc8,
    };
    progress.line(&format!("Detected protocol: {kind:?} ({name})"));
    Ok(kind)
}

/// Classify every registered part sharing `magic`, not just the first.
///
/// The two documented collision magics cover an early-15 E variant and a
/// later-15 W variant that speak different generations. The magic alone
/// cannot tell them apart, so the early-15 machine wins and the warning
/// points at `--protocol` for the other part.
fn classify_candidates(magic: u16) -> Result<(Family, &'static str)> {
    let unable =
        || Error::proto(format!("unable to detect protocol for magic {magic:04X}"));

    let classified: Vec<(Family, &'static str)> = models::find_all(magic)
        .filter_map(|m| models::classify(magic, m.name).map(|f| (f, m.name)))
        .collect();

    let first = match classified.first() {
        Some(first) => *first,
        None => {
            let unknown = models::find_or_unknown(magic);
            let family = models::classify(magic, unknown.name).ok_or_else(unable)?;
            return Ok((family, unknown.name));
        }
    };
    match classified.iter().find(|(family, _)| *family != first.0) {
        None => Ok(first),
        Some(&conflict) => {
            let pick = if conflict.0 == Family::Stc15A {
                conflict
            } else {
                first
            };
            log::warn!(
                "magic {:04X} is shared by {} and {}; assuming {}, use --protocol to override",
                magic,
                first.1,
                conflict.1,
                pick.1
            );
            Ok(pick)
        }
    }
}
