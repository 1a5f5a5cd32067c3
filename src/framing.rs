//! BSL packet framing.
//!
//! Every packet travels as
//!
//! ```text
//! 46 B9  DIR  LEN_HI LEN_LO  PAYLOAD...  CHK  16
//! ```
//!
//! where `DIR` is 0x6A host->MCU and 0x68 MCU->host and `LEN` counts from
//! `DIR` through the checksum. Two dialects exist: the early series (STC89,
//! STC12x052) checksums with a single byte and runs the line without parity;
//! STC12 and later widen the checksum to 16 bits and use even parity. Some
//! early BSL revisions omit the leading `46 B9` on the initial status packet,
//! which the receive path tolerates when the dialect asks for it.

use crate::serial::{Parity, SerialLink};
use crate::{Error, Result};

/// Frame start magic.
pub const FRAME_START: [u8; 2] = [0x46, 0xB9];
/// Direction byte of host-originated packets.
pub const DIR_HOST: u8 = 0x6A;
/// Direction byte of MCU-originated packets.
pub const DIR_MCU: u8 = 0x68;
/// Frame end magic.
pub const FRAME_END: u8 = 0x16;

/// Wire dialect descriptor, fixed per protocol family.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Dialect {
    /// Checksum width in bytes, 1 or 2.
    pub checksum_width: u8,
    /// Line parity that goes with this dialect.
    pub parity: Parity,
    /// Accept an initial packet that starts directly with `DIR_MCU`.
    pub tolerate_missing_start: bool,
}

impl Dialect {
    /// STC89/90 and STC12x052: 8-bit checksum, no parity.
    pub const A: Dialect = Dialect {
        checksum_width: 1,
        parity: Parity::None,
        tolerate_missing_start: true,
    };

    /// STC12 and later: 16-bit checksum, even parity.
    pub const B: Dialect = Dialect {
        checksum_width: 2,
        parity: Parity::Even,
        tolerate_missing_start: false,
    };
}

/// 8-bit modular sum.
pub fn checksum8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |s, &b| s.wrapping_add(b))
}

/// 16-bit modular sum.
pub fn checksum16(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |s, &b| s.wrapping_add(b as u16))
}

/// Format bytes as contiguous uppercase hex.
pub fn hex_str(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02X}")).collect()
}

/// Build a host->MCU frame around `payload`.
pub fn encode(dialect: Dialect, payload: &[u8]) -> Vec<u8> {
    let len = payload.len() + 4 + dialect.checksum_width as usize;
    let mut frame = Vec::with_capacity(payload.len() + 8);
    frame.extend_from_slice(&FRAME_START);
    frame.push(DIR_HOST);
    frame.extend_from_slice(&(len as u16).to_be_bytes());
    frame.extend_from_slice(payload);
    match dialect.checksum_width {
        1 => frame.push(checksum8(&frame[2..])),
        _ => {
            let sum = checksum16(&frame[2..]);
            frame.extend_from_slice(&sum.to_be_bytes());
        }
    }
    frame.push(FRAME_END);
    frame
}

/// Validate an MCU->host frame and return its payload.
///
/// `frame` must be the raw bytes including the start magic (insert it before
/// calling when the BSL omitted it on the wire).
pub fn decode(dialect: Dialect, frame: &[u8]) -> Result<Vec<u8>> {
    let chk = dialect.checksum_width as usize;
    if frame.len() < 6 + chk {
        return Err(Error::Framing("truncated packet"));
    }
    if frame[0..2] != FRAME_START {
        return Err(Error::Framing("incorrect frame start"));
    }
    if frame[2] != DIR_MCU {
        return Err(Error::Framing("incorrect packet direction magic"));
    }
    let len = u16::from_be_bytes([frame[3], frame[4]]) as usize;
    if len < 4 + chk || frame.len() != len + 2 {
        return Err(Error::Framing("inconsistent packet length"));
    }
    if frame[len + 1] != FRAME_END {
        return Err(Error::Framing("incorrect frame end"));
    }
    let covered = &frame[2..len + 1 - chk];
    let ok = match dialect.checksum_width {
        1 => frame[len] == checksum8(covered),
        _ => u16::from_be_bytes([frame[len - 1], frame[len]]) == checksum16(covered),
    };
    if !ok {
        return Err(Error::Framing("packet checksum mismatch"));
    }
    Ok(frame[5..len + 1 - chk].to_vec())
}

fn read_byte(link: &mut dyn SerialLink) -> Result<u8> {
    let mut b = [0u8; 1];
    map_timeout(link.read_exact(&mut b))?;
    Ok(b[0])
}

fn map_timeout(res: std::io::Result<()>) -> Result<()> {
    res.map_err(|e| {
        if e.kind() == std::io::ErrorKind::TimedOut {
            Error::Timeout
        } else {
            Error::Io(e)
        }
    })
}

/// Read one raw MCU->host frame from the link.
///
/// The returned buffer always includes the start magic, synthesized when a
/// tolerant dialect sees the direction byte first.
pub fn read_frame(link: &mut dyn SerialLink, tolerate_missing_start: bool) -> Result<Vec<u8>> {
    let mut frame = Vec::with_capacity(64);

    let first = read_byte(link)?;
    if tolerate_missing_start && first == DIR_MCU {
        frame.extend_from_slice(&FRAME_START);
        frame.push(DIR_MCU);
    } else {
        if first != FRAME_START[0] {
            return Err(Error::Framing("incorrect frame start"));
        }
        frame.push(first);
        let second = read_byte(link)?;
        if second != FRAME_START[1] {
            return Err(Error::Framing("incorrect frame start"));
        }
        frame.push(second);
        frame.push(read_byte(link)?);
        if frame[2] != DIR_MCU {
            log::debug!("<- {}", hex_str(&frame));
            return Err(Error::Framing("incorrect packet direction magic"));
        }
    }

    let mut len_buf = [0u8; 2];
    map_timeout(link.read_exact(&mut len_buf))?;
    frame.extend_from_slice(&len_buf);
    let len = u16::from_be_bytes(len_buf) as usize;

    // LEN counts DIR through the end byte; five bytes are already consumed.
    let Some(remaining) = (len + 2).checked_sub(frame.len()) else {
        return Err(Error::Framing("inconsistent packet length"));
    };
    let mut rest = vec![0u8; remaining];
    map_timeout(link.read_exact(&mut rest))?;
    frame.extend_from_slice(&rest);

    Ok(frame)
}

/// Read and validate a packet, returning its payload.
pub fn read_packet(link: &mut dyn SerialLink, dialect: Dialect) -> Result<Vec<u8>> {
    let frame = read_frame(link, dialect.tolerate_missing_start)?;
    let payload = decode(dialect, &frame).inspect_err(|_| {
        log::debug!("<- {}", hex_str(&frame));
    })?;
    log::debug!("<- {}", hex_str(&frame));
    Ok(payload)
}

/// Frame and send a payload.
pub fn write_packet(link: &mut dyn SerialLink, dialect: Dialect, payload: &[u8]) -> Result<()> {
    let frame = encode(dialect, payload);
    log::debug!("-> {}", hex_str(&frame));
    link.write_all(&frame)?;
    link.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_dialect_a() {
        // LEN = 2 + 5, 8-bit checksum over 6A 00 07 50 12
        let frame = encode(Dialect::A, &[0x50, 0x12]);
        assert_eq!(frame, [0x46, 0xB9, 0x6A, 0x00, 0x07, 0x50, 0x12, 0xD3, 0x16]);
    }

    #[test]
    fn encode_dialect_b() {
        let frame = encode(Dialect::B, &[0x50]);
        // LEN = 1 + 6, 16-bit checksum over 6A 00 07 50
        assert_eq!(frame, [0x46, 0xB9, 0x6A, 0x00, 0x07, 0x50, 0x00, 0xC1, 0x16]);
    }

    #[test]
    fn decode_rejects_bad_end() {
        let mut frame = encode(Dialect::B, &[0x00]);
        frame[2] = DIR_MCU;
        let fixed = fix_checksum_b(frame.clone());
        let last = fixed.len() - 1;
        let mut broken = fixed;
        broken[last] = 0x17;
        assert!(matches!(
            decode(Dialect::B, &broken),
            Err(Error::Framing("incorrect frame end"))
        ));
    }

    #[test]
    fn decode_rejects_bad_checksum() {
        let mut frame = encode(Dialect::A, &[1, 2, 3]);
        frame[2] = DIR_MCU;
        // direction byte changed without fixing the checksum
        assert!(matches!(
            decode(Dialect::A, &frame),
            Err(Error::Framing("packet checksum mismatch"))
        ));
    }

    fn fix_checksum_b(mut frame: Vec<u8>) -> Vec<u8> {
        let len = frame.len();
        let sum = checksum16(&frame[2..len - 3]);
        frame[len - 3] = (sum >> 8) as u8;
        frame[len - 2] = sum as u8;
        frame
    }

    #[test]
    fn decode_roundtrip_mcu_direction() {
        let payload = vec![0x68u8, 0x00, 0x36, 0x01, 0xF0];
        let mut frame = encode(Dialect::B, &payload);
        frame[2] = DIR_MCU;
        let frame = fix_checksum_b(frame);
        assert_eq!(decode(Dialect::B, &frame).unwrap(), payload);
    }
}
