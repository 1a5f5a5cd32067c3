//! Option byte ("MSR") codecs.
//!
//! Every family stores the same kind of logical settings in a small byte
//! buffer returned inside the status packet, but each one packs them at
//! different offsets, with different field widths and frequently with
//! inverted sense (active-low bits). Rather than one hand-written
//! accessor pair per option, each family declares a static descriptor
//! table and a single interpreter handles typed get/set over it.
//!
//! The masks below are load-bearing: a set must only ever touch the bits
//! the named option owns, and the written-back MSR must be bit-exact for
//! everything else.

use std::fmt;

use crate::{Error, Result};

pub mod stc12;
pub mod stc12a;
pub mod stc15;
pub mod stc15a;
pub mod stc8;
pub mod stc89;

/// How a field's raw bits map to its logical value.
#[derive(Clone, Copy, Debug)]
pub enum Encoding {
    /// Single bit, set means enabled.
    BoolActiveHigh,
    /// Single bit, clear means enabled.
    BoolActiveLow,
    /// Named values, each a raw field pattern.
    Enum(&'static [(&'static str, u8)]),
    /// Value is `2^(raw + bias)`.
    PowerOfTwo { bias: u32 },
    /// Raw field value.
    Uint,
    /// Raw field value with inverted sense, `max - raw`.
    UintInverted,
    /// Raw field value scaled by a constant factor.
    Scaled { factor: u32 },
}

/// One named option at a fixed byte offset and mask.
#[derive(Clone, Copy, Debug)]
pub struct OptionDesc {
    pub name: &'static str,
    pub byte: usize,
    pub shift: u8,
    pub width: u8,
    pub encoding: Encoding,
}

impl OptionDesc {
    /// Bits of `msr[self.byte]` owned by this option.
    pub const fn mask(&self) -> u8 {
        (((1u16 << self.width) - 1) as u8) << self.shift
    }

    const fn field_max(&self) -> u8 {
        ((1u16 << self.width) - 1) as u8
    }
}

/// Decoded value of an option.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OptionValue {
    Bool(bool),
    Int(u32),
    Name(&'static str),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(b) => write!(f, "{b}"),
            OptionValue::Int(v) => write!(f, "{v}"),
            OptionValue::Name(s) => f.write_str(s),
        }
    }
}

/// Generic MSR codec over a family's descriptor table.
pub struct OptionCodec {
    table: &'static [OptionDesc],
    msr: Vec<u8>,
}

impl OptionCodec {
    /// Wrap the MSR bytes captured from the status packet.
    pub fn new(table: &'static [OptionDesc], msr: impl Into<Vec<u8>>) -> Self {
        let msr = msr.into();
        debug_assert!(table.iter().all(|d| d.byte < msr.len()));
        Self { table, msr }
    }

    /// All options with their current values, in table order.
    pub fn list(&self) -> impl Iterator<Item = (&'static str, OptionValue)> + '_ {
        self.table.iter().map(|d| (d.name, self.decode(d)))
    }

    pub fn get(&self, name: &str) -> Result<OptionValue> {
        let desc = self.lookup(name)?;
        Ok(self.decode(desc))
    }

    /// Parse and store a value, touching only the option's own bits.
    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        let desc = self.lookup(name)?;
        let raw = encode_value(desc, value)?;
        let byte = &mut self.msr[desc.byte];
        *byte = (*byte & !desc.mask()) | (raw << desc.shift);
        Ok(())
    }

    /// Raw MSR bytes to write back to the target.
    pub fn msr(&self) -> &[u8] {
        &self.msr
    }

    /// Store a 16-bit oscillator trim word at its fixed slot (early-15 MSR).
    pub fn set_trim_word(&mut self, trim: u16) {
        self.msr[3..5].copy_from_slice(&trim.to_be_bytes());
    }

    fn lookup(&self, name: &str) -> Result<&'static OptionDesc> {
        self.table
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| Error::UnknownOption(name.into()))
    }

    fn raw(&self, desc: &OptionDesc) -> u8 {
        (self.msr[desc.byte] >> desc.shift) & desc.field_max()
    }

    fn decode(&self, desc: &OptionDesc) -> OptionValue {
        let raw = self.raw(desc);
        match desc.encoding {
            Encoding::BoolActiveHigh => OptionValue::Bool(raw != 0),
            Encoding::BoolActiveLow => OptionValue::Bool(raw == 0),
            Encoding::Enum(variants) => variants
                .iter()
                .find(|(_, pat)| *pat == raw)
                .map(|&(name, _)| OptionValue::Name(name))
                .unwrap_or(OptionValue::Int(raw as u32)),
            Encoding::PowerOfTwo { bias } => OptionValue::Int(1 << (raw as u32 + bias)),
            Encoding::Uint => OptionValue::Int(raw as u32),
            Encoding::UintInverted => OptionValue::Int((desc.field_max() - raw) as u32),
            Encoding::Scaled { factor } => OptionValue::Int(raw as u32 * factor),
        }
    }
}

fn invalid(desc: &OptionDesc, reason: impl Into<String>) -> Error {
    Error::InvalidOptionValue {
        name: desc.name.into(),
        reason: reason.into(),
    }
}

/// Lenient boolean parse: anything starting with `t`, `T` or `1` is true.
fn parse_bool(value: &str) -> bool {
    matches!(value.chars().next(), Some('t' | 'T' | '1'))
}

fn parse_int(desc: &OptionDesc, value: &str) -> Result<u32> {
    let parsed = if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        value.parse()
    };
    parsed.map_err(|_| invalid(desc, "invalid integer"))
}

fn encode_value(desc: &OptionDesc, value: &str) -> Result<u8> {
    let max = desc.field_max();
    match desc.encoding {
        Encoding::BoolActiveHigh => Ok(parse_bool(value) as u8),
        Encoding::BoolActiveLow => Ok(!parse_bool(value) as u8),
        Encoding::Enum(variants) => variants
            .iter()
            .find(|(name, _)| *name == value)
            .map(|&(_, pat)| pat)
            .ok_or_else(|| {
                let names: Vec<_> = variants.iter().map(|(n, _)| *n).collect();
                invalid(desc, format!("must be one of {names:?}"))
            }),
        Encoding::PowerOfTwo { bias } => {
            let v = parse_int(desc, value)?;
            (0..=max)
                .find(|raw| 1u32 << (*raw as u32 + bias) == v)
                .ok_or_else(|| {
                    let choices: Vec<u32> = (0..=max).map(|r| 1 << (r as u32 + bias)).collect();
                    invalid(desc, format!("must be one of {choices:?}"))
                })
        }
        Encoding::Uint => {
            let v = parse_int(desc, value)?;
            if v > max as u32 {
                return Err(invalid(desc, format!("must be at most {max}")));
            }
            Ok(v as u8)
        }
        Encoding::UintInverted => {
            let v = parse_int(desc, value)?;
            if v > max as u32 {
                return Err(invalid(desc, format!("must be at most {max}")));
            }
            Ok(max - v as u8)
        }
        Encoding::Scaled { factor } => {
            let v = parse_int(desc, value)?;
            if v % factor != 0 || v / factor > max as u32 {
                return Err(invalid(
                    desc,
                    format!("must be a multiple of {factor} up to {}", max as u32 * factor),
                ));
            }
            Ok((v / factor) as u8)
        }
    }
}
