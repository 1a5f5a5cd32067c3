//! Early STC15 option bytes.
//!
//! Thirteen bytes; bytes 3..5 additionally hold the oscillator trim word
//! selected during the calibration handshake
//! ([`OptionCodec::set_trim_word`](super::OptionCodec::set_trim_word)).

use super::Encoding::*;
use super::OptionDesc;

pub const MSR_LEN: usize = 13;

pub static OPTIONS: &[OptionDesc] = &[
    OptionDesc { name: "reset_pin_enabled", byte: 0, shift: 4, width: 1, encoding: BoolActiveHigh },
    OptionDesc { name: "watchdog_por_enabled", byte: 2, shift: 5, width: 1, encoding: BoolActiveLow },
    OptionDesc { name: "watchdog_stop_idle", byte: 2, shift: 3, width: 1, encoding: BoolActiveLow },
    OptionDesc { name: "watchdog_prescale", byte: 2, shift: 0, width: 3, encoding: PowerOfTwo { bias: 1 } },
    OptionDesc { name: "low_voltage_reset", byte: 1, shift: 6, width: 1, encoding: BoolActiveHigh },
    OptionDesc { name: "low_voltage_threshold", byte: 1, shift: 0, width: 3, encoding: Uint },
    OptionDesc { name: "eeprom_lvd_inhibit", byte: 1, shift: 7, width: 1, encoding: BoolActiveHigh },
    OptionDesc { name: "eeprom_erase_enabled", byte: 12, shift: 1, width: 1, encoding: BoolActiveLow },
    OptionDesc { name: "bsl_pindetect_enabled", byte: 12, shift: 0, width: 1, encoding: BoolActiveLow },
];
