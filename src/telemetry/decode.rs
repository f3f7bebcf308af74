//! Derived values computed from decoded MSP readings.

/// Mode shown when no named flight mode bit is set
pub const DEFAULT_MODE_NAME: &str = "ACRO";

/// Betaflight arming-disable flag names, by bit
const ARMING_DISABLE_FLAG_NAMES: [&str; 26] = [
    "NO_GYRO",
    "FAILSAFE",
    "RX_FAILSAFE",
    "BAD_RX_RECOVERY",
    "BOXFAILSAFE",
    "RUNAWAY_TAKEOFF",
    "CRASH_DETECTED",
    "THROTTLE",
    "ANGLE",
    "BOOT_GRACE_TIME",
    "NOPREARM",
    "LOAD",
    "CALIBRATING",
    "CLI",
    "CMS_MENU",
    "BST",
    "MSP",
    "PARALYZE",
    "GPS",
    "RESC",
    "RPMFILTER",
    "REBOOT_REQUIRED",
    "DSHOT_BITBANG",
    "ACC_CALIBRATION",
    "MOTOR_PROTOCOL",
    "ARMSWITCH",
];

/// Bit 0 of the mode flags is the ARM box
pub fn is_armed(mode_flags: u32) -> bool {
    mode_flags & 1 != 0
}

/// Name of the active flight mode
///
/// Scans bits 1..32 in order and returns the first set bit that has a
/// non-empty name in `mode_names`. Falls back to [`DEFAULT_MODE_NAME`], which
/// also covers an empty table.
pub fn flight_mode_name(mode_flags: u32, mode_names: &[String]) -> String {
    (1u32..32)
        .filter(|bit| mode_flags & (1 << bit) != 0)
        .filter_map(|bit| mode_names.get(bit as usize))
        .find(|name| !name.is_empty())
        .cloned()
        .unwrap_or_else(|| DEFAULT_MODE_NAME.to_string())
}

/// Names of every set arming-disable flag; unknown bits show as `FLAG_<n>`
pub fn arming_disable_reasons(flags: u32) -> Vec<String> {
    (0..32usize)
        .filter(|bit| flags & (1 << bit) != 0)
        .map(|bit| match ARMING_DISABLE_FLAG_NAMES.get(bit) {
            Some(name) => name.to_string(),
            None => format!("FLAG_{}", bit),
        })
        .collect()
}

/// Remaining battery % from per-cell voltage, linear between `empty` and `full`
pub fn battery_percent(cell_voltage: f32, empty: f32, full: f32) -> u8 {
    if full <= empty {
        return 0;
    }
    let percent = (cell_voltage - empty) / (full - empty) * 100.0;
    percent.clamp(0.0, 100.0).round() as u8
}

/// Throttle % from a raw pulse, linear between `min` and `max`
pub fn throttle_percent(pulse: u16, min: u16, max: u16) -> f32 {
    if max <= min {
        return 0.0;
    }
    let percent = (pulse as f32 - min as f32) / (max as f32 - min as f32) * 100.0;
    percent.clamp(0.0, 100.0)
}

/// Wrap a heading into 0..360
pub fn normalize_heading(degrees: f32) -> f32 {
    degrees.rem_euclid(360.0)
}
