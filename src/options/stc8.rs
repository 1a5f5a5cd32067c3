//! STC8 option bytes.
//!
//! Five bytes. The brownout threshold is a 2-bit field with inverted sense
//! (raw 0 is the highest trip level), and byte 4 holds the code/EEPROM
//! split point in 512-byte units.

use super::Encoding::*;
use super::OptionDesc;

pub const MSR_LEN: usize = 5;

pub static OPTIONS: &[OptionDesc] = &[
    OptionDesc { name: "watchdog_por_enabled", byte: 0, shift: 5, width: 1, encoding: BoolActiveLow },
    OptionDesc { name: "watchdog_stop_idle", byte: 0, shift: 3, width: 1, encoding: BoolActiveLow },
    OptionDesc { name: "watchdog_prescale", byte: 0, shift: 0, width: 3, encoding: PowerOfTwo { bias: 1 } },
    OptionDesc { name: "low_voltage_reset", byte: 1, shift: 3, width: 1, encoding: BoolActiveLow },
    OptionDesc { name: "low_voltage_threshold", byte: 1, shift: 0, width: 2, encoding: UintInverted },
    OptionDesc { name: "eeprom_lvd_inhibit", byte: 1, shift: 2, width: 1, encoding: BoolActiveHigh },
    OptionDesc { name: "epwm_open_drain", byte: 1, shift: 6, width: 1, encoding: BoolActiveHigh },
    OptionDesc { name: "uart1_remap", byte: 2, shift: 0, width: 1, encoding: BoolActiveHigh },
    OptionDesc { name: "uart2_pin_mode", byte: 2, shift: 1, width: 1, encoding: Enum(&[("normal", 0), ("push-pull", 1)]) },
    OptionDesc { name: "uart2_passthrough", byte: 2, shift: 2, width: 1, encoding: BoolActiveHigh },
    OptionDesc { name: "rstout_por_state", byte: 2, shift: 3, width: 1, encoding: Enum(&[("low", 0), ("high", 1)]) },
    OptionDesc { name: "reset_pin_enabled", byte: 2, shift: 4, width: 1, encoding: BoolActiveLow },
    OptionDesc { name: "cpu_core_voltage", byte: 2, shift: 5, width: 2, encoding: Enum(&[("low", 0), ("mid", 1), ("high", 2)]) },
    OptionDesc { name: "por_reset_delay", byte: 2, shift: 7, width: 1, encoding: Enum(&[("short", 0), ("long", 1)]) },
    OptionDesc { name: "bsl_pindetect_enabled", byte: 3, shift: 0, width: 1, encoding: BoolActiveLow },
    OptionDesc { name: "eeprom_erase_enabled", byte: 3, shift: 1, width: 1, encoding: BoolActiveHigh },
    OptionDesc { name: "program_eeprom_split", byte: 4, shift: 0, width: 8, encoding: Scaled { factor: 512 } },
];
