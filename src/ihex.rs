//! Intel HEX reader.
//!
//! Just enough of the format for firmware images: data records, EOF, the
//! two segment-base records and the two start-address records. Unknown
//! record types and checksum mismatches are rejected.

use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HexError {
    #[error("invalid line start character")]
    BadLineStart,
    #[error("invalid hex data")]
    BadHexData,
    #[error("truncated record")]
    Truncated,
    #[error("checksums do not match")]
    ChecksumMismatch,
    #[error("invalid type byte {0:#04x}")]
    InvalidType(u8),
}

/// Parsed hex image: data areas keyed by absolute address.
#[derive(Debug, Default)]
pub struct IntelHex {
    areas: BTreeMap<u32, Vec<u8>>,
    start: Option<u32>,
}

impl IntelHex {
    /// Parse a whole file.
    pub fn read(text: &str) -> Result<IntelHex, HexError> {
        let mut hex = IntelHex::default();
        let mut segbase: u32 = 0;

        for line in text.lines() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let (record_type, addr, data) = parse_line(line)?;
            match record_type {
                0x00 => hex.insert_data(segbase + addr as u32, data),
                0x01 => break,
                0x02 => {
                    segbase = (be16_record(&data)? as u32) << 4;
                }
                0x03 => {
                    // 16-bit CS:IP start address; recorded, not used
                    hex.start = Some(be32_record(&data)?);
                }
                0x04 => {
                    segbase = (be16_record(&data)? as u32) << 16;
                }
                0x05 => {
                    hex.start = Some(be32_record(&data)?);
                }
                other => return Err(HexError::InvalidType(other)),
            }
        }
        Ok(hex)
    }

    /// Flatten into one contiguous buffer from address 0, zero-filling gaps.
    pub fn extract_data(&self) -> Vec<u8> {
        let mut result = Vec::new();
        for (&addr, data) in &self.areas {
            let addr = addr as usize;
            if result.len() < addr {
                result.resize(addr, 0x00);
            }
            if result.len() > addr {
                result.truncate(addr);
            }
            result.extend_from_slice(data);
        }
        result
    }

    pub fn start_address(&self) -> Option<u32> {
        self.start
    }

    fn insert_data(&mut self, addr: u32, data: Vec<u8>) {
        // Merge with an adjacent or overlapping area when one exists.
        let merge_into = self
            .areas
            .iter()
            .find(|(&start, existing)| {
                addr >= start && addr <= start + existing.len() as u32
            })
            .map(|(&start, _)| start);
        match merge_into.and_then(|start| self.areas.get_mut(&start).map(|a| (start, a))) {
            Some((start, area)) => {
                let offset = (addr - start) as usize;
                let end = offset + data.len();
                if area.len() < end {
                    area.resize(end, 0x00);
                }
                area[offset..end].copy_from_slice(&data);
            }
            None => {
                self.areas.insert(addr, data);
            }
        }
    }
}

fn parse_line(line: &str) -> Result<(u8, u16, Vec<u8>), HexError> {
    let body = line.strip_prefix(':').ok_or(HexError::BadLineStart)?;
    let bytes = decode_hex(body)?;
    if bytes.len() < 5 {
        return Err(HexError::Truncated);
    }

    let length = bytes[0] as usize;
    let addr = u16::from_be_bytes([bytes[1], bytes[2]]);
    let record_type = bytes[3];
    if bytes.len() < length + 5 {
        return Err(HexError::Truncated);
    }

    let data_end = length + 4;
    let checksum = bytes[data_end];
    let computed = bytes[..data_end]
        .iter()
        .fold(0u8, |s, &b| s.wrapping_add(b))
        .wrapping_neg();
    if checksum != computed {
        return Err(HexError::ChecksumMismatch);
    }

    Ok((record_type, addr, bytes[4..data_end].to_vec()))
}

fn decode_hex(s: &str) -> Result<Vec<u8>, HexError> {
    if s.len() % 2 != 0 {
        return Err(HexError::BadHexData);
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| HexError::BadHexData))
        .collect()
}

fn be16_record(data: &[u8]) -> Result<u16, HexError> {
    data.get(..2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or(HexError::Truncated)
}

fn be32_record(data: &[u8]) -> Result<u32, HexError> {
    data.get(..4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or(HexError::Truncated)
}
