//! Later STC15 option bytes.
//!
//! Four bytes assembled from two status packet slices. Senses differ from
//! the early-15 layout in several places (`clock_source` is active high for
//! internal here, `low_voltage_reset` and `eeprom_erase_enabled` flip).
//! The USB-15 variant shares this layout.

use super::Encoding::*;
use super::OptionDesc;

pub const MSR_LEN: usize = 4;

pub static OPTIONS: &[OptionDesc] = &[
    OptionDesc { name: "reset_pin_enabled", byte: 2, shift: 4, width: 1, encoding: BoolActiveLow },
    OptionDesc { name: "clock_source", byte: 2, shift: 0, width: 1, encoding: Enum(&[("internal", 1), ("external", 0)]) },
    OptionDesc { name: "clock_gain", byte: 2, shift: 1, width: 1, encoding: Enum(&[("low", 0), ("high", 1)]) },
    OptionDesc { name: "watchdog_por_enabled", byte: 0, shift: 5, width: 1, encoding: BoolActiveLow },
    OptionDesc { name: "watchdog_stop_idle", byte: 0, shift: 3, width: 1, encoding: BoolActiveLow },
    OptionDesc { name: "watchdog_prescale", byte: 0, shift: 0, width: 3, encoding: PowerOfTwo { bias: 1 } },
    OptionDesc { name: "low_voltage_reset", byte: 1, shift: 6, width: 1, encoding: BoolActiveLow },
    OptionDesc { name: "low_voltage_threshold", byte: 1, shift: 0, width: 3, encoding: Uint },
    OptionDesc { name: "eeprom_lvd_inhibit", byte: 1, shift: 7, width: 1, encoding: BoolActiveHigh },
    OptionDesc { name: "eeprom_erase_enabled", byte: 3, shift: 1, width: 1, encoding: BoolActiveHigh },
    OptionDesc { name: "bsl_pindetect_enabled", byte: 3, shift: 0, width: 1, encoding: BoolActiveLow },
    OptionDesc { name: "power_on_reset_delay", byte: 2, shift: 7, width: 1, encoding: Enum(&[("short", 0), ("long", 1)]) },
    OptionDesc { name: "rstout_por_state", byte: 2, shift: 3, width: 1, encoding: Enum(&[("low", 0), ("high", 1)]) },
    OptionDesc { name: "uart2_passthrough", byte: 2, shift: 6, width: 1, encoding: BoolActiveHigh },
    OptionDesc { name: "uart2_pin_mode", byte: 2, shift: 5, width: 1, encoding: Enum(&[("normal", 0), ("push-pull", 1)]) },
];
