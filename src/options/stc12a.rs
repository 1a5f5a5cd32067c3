//! STC12x052 option bytes, five of them.

use super::Encoding::*;
use super::OptionDesc;

pub const MSR_LEN: usize = 5;

pub static OPTIONS: &[OptionDesc] = &[
    OptionDesc { name: "low_voltage_detect", byte: 4, shift: 6, width: 1, encoding: BoolActiveLow },
    OptionDesc { name: "clock_source", byte: 0, shift: 1, width: 1, encoding: Enum(&[("internal", 0), ("external", 1)]) },
    OptionDesc { name: "watchdog_por_enabled", byte: 1, shift: 5, width: 1, encoding: BoolActiveLow },
    OptionDesc { name: "watchdog_stop_idle", byte: 1, shift: 3, width: 1, encoding: BoolActiveLow },
    OptionDesc { name: "watchdog_prescale", byte: 1, shift: 0, width: 3, encoding: PowerOfTwo { bias: 1 } },
    OptionDesc { name: "eeprom_erase_enabled", byte: 2, shift: 1, width: 1, encoding: BoolActiveLow },
    OptionDesc { name: "bsl_pindetect_enabled", byte: 2, shift: 0, width: 1, encoding: BoolActiveLow },
];
