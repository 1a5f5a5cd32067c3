//! STC89/90 option byte.
//!
//! A single byte; most settings are active low.

use super::Encoding::*;
use super::OptionDesc;

pub const MSR_LEN: usize = 1;

pub static OPTIONS: &[OptionDesc] = &[
    OptionDesc { name: "cpu_6t_enabled", byte: 0, shift: 0, width: 1, encoding: BoolActiveLow },
    OptionDesc { name: "bsl_pindetect_enabled", byte: 0, shift: 2, width: 1, encoding: BoolActiveLow },
    OptionDesc { name: "eeprom_erase_enabled", byte: 0, shift: 3, width: 1, encoding: BoolActiveLow },
    OptionDesc { name: "clock_gain", byte: 0, shift: 4, width: 1, encoding: Enum(&[("low", 0), ("high", 1)]) },
    OptionDesc { name: "ale_enabled", byte: 0, shift: 5, width: 1, encoding: BoolActiveHigh },
    OptionDesc { name: "xram_enabled", byte: 0, shift: 6, width: 1, encoding: BoolActiveHigh },
    OptionDesc { name: "watchdog_por_enabled", byte: 0, shift: 7, width: 1, encoding: BoolActiveLow },
];
