//! MCU model registry.
//!
//! The BSL reports a 16-bit identification word ("magic") in its status
//! packet. The high byte constrains the protocol generation, the low byte
//! selects the concrete part and its memory geometry. Two magics are shared
//! between parts (0xF294 and 0xF2D4, where the E and W variants collide);
//! lookups return the first entry.

mod data;

pub use data::MODELS;

/// Basic facts about one MCU model. Sizes are in bytes.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct McuModel {
    pub name: &'static str,
    pub magic: u16,
    /// Total flash, code plus data areas.
    pub total: u32,
    /// Code flash available for programming.
    pub code: u32,
    /// Data EEPROM. Not necessarily `total - code`; some families present
    /// the data area as an overlay of the code address space.
    pub eeprom: u32,
}

/// Flash size assumed for parts missing from the registry.
const UNKNOWN_TOTAL: u32 = 63488;

/// Look up a part by its identification word.
pub fn find_model(magic: u16) -> Option<&'static McuModel> {
    MODELS.iter().find(|m| m.magic == magic)
}

/// All parts sharing an identification word.
///
/// More than one entry exists only for the two documented collisions,
/// where the E and W variants of a part answer with the same magic but
/// speak different protocol generations.
pub fn find_all(magic: u16) -> impl Iterator<Item = &'static McuModel> {
    MODELS.iter().filter(move |m| m.magic == magic)
}

/// Look up a part, synthesizing a conservative UNKNOWN entry on a miss so
/// the session can continue and still print diagnostics.
pub fn find_or_unknown(magic: u16) -> McuModel {
    match find_model(magic) {
        Some(m) => *m,
        None => {
            log::warn!("unknown model {:02X}{:02X}", magic >> 8, magic & 0xff);
            McuModel {
                name: "UNKNOWN",
                magic,
                total: UNKNOWN_TOTAL,
                code: UNKNOWN_TOTAL,
                eeprom: 0,
            }
        }
    }
}

/// Protocol generation a part speaks, as selected during auto-detection.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Family {
    Stc89,
    Stc12A,
    Stc12B,
    Stc12,
    Stc15A,
    Stc15,
    Stc8,
}

/// Classify a part into its protocol generation.
///
/// The magic high byte decides in most cases. The 0xF2/0xF3 range is shared
/// between the STC12x052, early-15 and later-15 generations, where the model
/// name shape disambiguates; unregistered parts in that range fall back to
/// the later-15 machine.
pub fn classify(magic: u16, name: &str) -> Option<Family> {
    match (magic >> 8) as u8 {
        0xF0 | 0xF1 => Some(Family::Stc89),
        0xD1 | 0xD2 | 0xD3 | 0xE0 | 0xE2 => Some(Family::Stc12),
        0xE1 | 0xE6 => Some(Family::Stc12B),
        0xF2 | 0xF3 => {
            if name.contains("052") {
                Some(Family::Stc12A)
            } else if name == "UNKNOWN" || name.ends_with('W') {
                Some(Family::Stc15)
            } else {
                Some(Family::Stc15A)
            }
        }
        0xF4 | 0xF5 => Some(Family::Stc15),
        0xF7 | 0xF8 => Some(Family::Stc8),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_known_model() {
        let m = find_model(0xd17e).unwrap();
        assert_eq!(m.name, "STC12C5A60S2");
        assert_eq!(m.code, 61440);
    }

    #[test]
    fn unknown_model_is_synthesized() {
        let m = find_or_unknown(0xbeef);
        assert_eq!(m.name, "UNKNOWN");
        assert_eq!(m.total, 63488);
        assert_eq!(m.code, 63488);
        assert_eq!(m.eeprom, 0);
        assert_eq!(m.magic, 0xbeef);
    }

    #[test]
    fn shared_magics_expose_both_variants() {
        let names: Vec<_> = find_all(0xf294).map(|m| m.name).collect();
        assert_eq!(names, ["STC15F104W", "STC15F104E"]);
        let names: Vec<_> = find_all(0xf2d4).map(|m| m.name).collect();
        assert_eq!(names, ["STC15L104W", "STC15L104E"]);
    }

    #[test]
    fn magics_unique_except_documented_collisions() {
        use std::collections::HashMap;
        let mut seen: HashMap<u16, usize> = HashMap::new();
        for m in MODELS {
            *seen.entry(m.magic).or_default() += 1;
        }
        for (magic, count) in seen {
            if magic == 0xf294 || magic == 0xf2d4 {
                assert_eq!(count, 2, "magic {magic:04x}");
            } else {
                assert_eq!(count, 1, "magic {magic:04x}");
            }
        }
    }

    #[test]
    fn model_sizes_are_sane() {
        for m in MODELS {
            assert!(m.code <= m.total, "{}", m.name);
        }
    }

    #[test]
    fn classify_by_magic_and_name() {
        assert_eq!(classify(0xf002, "STC89C/LE52RC"), Some(Family::Stc89));
        assert_eq!(classify(0xd17e, "STC12C5A60S2"), Some(Family::Stc12));
        assert_eq!(classify(0xe101, "STC12C5201"), Some(Family::Stc12B));
        assert_eq!(classify(0xf212, "STC12C2052AD"), Some(Family::Stc12A));
        assert_eq!(classify(0xf294, "STC15F104E"), Some(Family::Stc15A));
        assert_eq!(classify(0xf294, "STC15F104W"), Some(Family::Stc15));
        assert_eq!(classify(0xf449, "IAP15F2K61S2"), Some(Family::Stc15));
        assert_eq!(classify(0xf7a1, "STC8F2K08S2"), Some(Family::Stc8));
        assert_eq!(classify(0xf290, "UNKNOWN"), Some(Family::Stc15));
        assert_eq!(classify(0x1234, "UNKNOWN"), None);
    }
}
