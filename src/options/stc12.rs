//! STC10/11/12 option bytes, four of them.

use super::Encoding::*;
use super::OptionDesc;

pub const MSR_LEN: usize = 4;

pub static OPTIONS: &[OptionDesc] = &[
    OptionDesc { name: "reset_pin_enabled", byte: 0, shift: 0, width: 1, encoding: BoolActiveHigh },
    OptionDesc { name: "low_voltage_detect", byte: 0, shift: 6, width: 1, encoding: BoolActiveLow },
    OptionDesc { name: "oscillator_stable_delay", byte: 0, shift: 4, width: 2, encoding: PowerOfTwo { bias: 12 } },
    OptionDesc { name: "power_on_reset_delay", byte: 1, shift: 7, width: 1, encoding: Enum(&[("long", 0), ("short", 1)]) },
    OptionDesc { name: "clock_gain", byte: 1, shift: 6, width: 1, encoding: Enum(&[("low", 0), ("high", 1)]) },
    OptionDesc { name: "clock_source", byte: 1, shift: 1, width: 1, encoding: Enum(&[("internal", 0), ("external", 1)]) },
    OptionDesc { name: "watchdog_por_enabled", byte: 2, shift: 5, width: 1, encoding: BoolActiveLow },
    OptionDesc { name: "watchdog_stop_idle", byte: 2, shift: 3, width: 1, encoding: BoolActiveLow },
    OptionDesc { name: "watchdog_prescale", byte: 2, shift: 0, width: 3, encoding: PowerOfTwo { bias: 1 } },
    OptionDesc { name: "eeprom_erase_enabled", byte: 3, shift: 1, width: 1, encoding: BoolActiveLow },
    OptionDesc { name: "bsl_pindetect_enabled", byte: 3, shift: 0, width: 1, encoding: BoolActiveLow },
];
