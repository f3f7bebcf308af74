//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every section and field is optional; missing values take the defaults
//! below.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{FcLinkError, Result};
use crate::msp::protocol::ProtocolVariant;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub battery: BatteryConfig,
    #[serde(default)]
    pub rc: RcConfig,
    #[serde(default)]
    pub gps_push: GpsPushConfig,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
    #[serde(default)]
    pub recorder: RecorderConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    /// Device path; empty means try the default paths in order
    #[serde(default)]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

/// Telemetry scheduler configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    #[serde(default = "default_rate_hz")]
    pub rate_hz: f32,

    /// Pause between consecutive sub-requests within one cycle
    #[serde(default = "default_inter_command_delay_ms")]
    pub inter_command_delay_ms: u64,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// A cycle still running after this long is considered stuck
    #[serde(default = "default_stuck_timeout_ms")]
    pub stuck_timeout_ms: u64,

    /// Warn about overlapping ticks once per this many skips
    #[serde(default = "default_skip_log_every")]
    pub skip_log_every: u64,

    /// Log a failing field group once per this many failures
    #[serde(default = "default_failure_log_every")]
    pub failure_log_every: u64,

    /// Re-fetch an empty mode-name table every this many polls
    #[serde(default = "default_mode_refetch_every")]
    pub mode_refetch_every: u64,

    /// How long a commanded throttle overrides the observed one
    #[serde(default = "default_commanded_throttle_hold_ms")]
    pub commanded_throttle_hold_ms: u64,
}

/// Battery percentage estimation
#[derive(Debug, Deserialize, Clone)]
pub struct BatteryConfig {
    #[serde(default = "default_min_cell_voltage")]
    pub min_cell_voltage: f32,

    #[serde(default = "default_max_cell_voltage")]
    pub max_cell_voltage: f32,
}

/// RC input polling and RC override configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RcConfig {
    #[serde(default = "default_rc_poll_rate_hz")]
    pub poll_rate_hz: f32,

    /// Index of throttle in `MSP_RC` order (roll, pitch, yaw, throttle, ...)
    #[serde(default = "default_throttle_channel")]
    pub throttle_channel: usize,

    #[serde(default = "default_throttle_min")]
    pub throttle_min: u16,

    #[serde(default = "default_throttle_max")]
    pub throttle_max: u16,

    #[serde(default = "default_rc_timeout_ms")]
    pub timeout_ms: u64,

    /// Log clamping and write failures once per this many events
    #[serde(default = "default_rc_log_every")]
    pub log_every: u64,
}

/// Simulated GPS injection configuration
#[derive(Debug, Deserialize, Clone)]
pub struct GpsPushConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_gps_push_rate_hz")]
    pub rate_hz: f32,

    #[serde(default = "default_gps_push_timeout_ms")]
    pub timeout_ms: u64,

    /// Satellite count reported for injected fixes
    #[serde(default = "default_gps_push_satellites")]
    pub satellites: u8,

    /// HDOP reported for injected fixes, in centi-units
    #[serde(default = "default_gps_push_hdop")]
    pub hdop: u16,
}

/// Session bootstrap configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BootstrapConfig {
    /// Framing used by each mode-name fetch attempt, in order
    #[serde(default = "default_mode_name_variants")]
    pub mode_name_variants: Vec<ProtocolVariant>,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    #[serde(default = "default_bootstrap_timeout_ms")]
    pub timeout_ms: u64,
}

/// Telemetry recorder configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RecorderConfig {
    #[serde(default = "default_recorder_enabled")]
    pub enabled: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: usize,

    #[serde(default = "default_max_files_to_keep")]
    pub max_files_to_keep: usize,

    #[serde(default = "default_log_interval_ms")]
    pub log_interval_ms: u64,

    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Application log output
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// Also write daily-rotated log files here when set
    #[serde(default)]
    pub dir: Option<String>,
}

// Default value functions
fn default_baud_rate() -> u32 { 115200 }

fn default_rate_hz() -> f32 { 10.0 }
fn default_inter_command_delay_ms() -> u64 { 10 }
fn default_request_timeout_ms() -> u64 { 250 }
fn default_stuck_timeout_ms() -> u64 { 5000 }
fn default_skip_log_every() -> u64 { 10 }
fn default_failure_log_every() -> u64 { 50 }
fn default_mode_refetch_every() -> u64 { 50 }
fn default_commanded_throttle_hold_ms() -> u64 { 1000 }

fn default_min_cell_voltage() -> f32 { 3.3 }
fn default_max_cell_voltage() -> f32 { 4.2 }

fn default_rc_poll_rate_hz() -> f32 { 10.0 }
fn default_throttle_channel() -> usize { 3 }
fn default_throttle_min() -> u16 { 1000 }
fn default_throttle_max() -> u16 { 2000 }
fn default_rc_timeout_ms() -> u64 { 200 }
fn default_rc_log_every() -> u64 { 50 }

fn default_gps_push_rate_hz() -> f32 { 10.0 }
fn default_gps_push_timeout_ms() -> u64 { 200 }
fn default_gps_push_satellites() -> u8 { 12 }
fn default_gps_push_hdop() -> u16 { 100 }

fn default_mode_name_variants() -> Vec<ProtocolVariant> {
    vec![ProtocolVariant::V2, ProtocolVariant::V2, ProtocolVariant::V1]
}
fn default_retry_backoff_ms() -> u64 { 500 }
fn default_bootstrap_timeout_ms() -> u64 { 1000 }

fn default_recorder_enabled() -> bool { true }
fn default_log_dir() -> String { "./logs".to_string() }
fn default_max_records_per_file() -> usize { 10000 }
fn default_max_files_to_keep() -> usize { 10 }
fn default_log_interval_ms() -> u64 { 100 }
fn default_log_format() -> String { "jsonl".to_string() }

impl Default for SerialConfig {
    fn default() -> Self {
        Self { port: String::new(), baud_rate: default_baud_rate() }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            rate_hz: default_rate_hz(),
            inter_command_delay_ms: default_inter_command_delay_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            stuck_timeout_ms: default_stuck_timeout_ms(),
            skip_log_every: default_skip_log_every(),
            failure_log_every: default_failure_log_every(),
            mode_refetch_every: default_mode_refetch_every(),
            commanded_throttle_hold_ms: default_commanded_throttle_hold_ms(),
        }
    }
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            min_cell_voltage: default_min_cell_voltage(),
            max_cell_voltage: default_max_cell_voltage(),
        }
    }
}

impl Default for RcConfig {
    fn default() -> Self {
        Self {
            poll_rate_hz: default_rc_poll_rate_hz(),
            throttle_channel: default_throttle_channel(),
            throttle_min: default_throttle_min(),
            throttle_max: default_throttle_max(),
            timeout_ms: default_rc_timeout_ms(),
            log_every: default_rc_log_every(),
        }
    }
}

impl Default for GpsPushConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rate_hz: default_gps_push_rate_hz(),
            timeout_ms: default_gps_push_timeout_ms(),
            satellites: default_gps_push_satellites(),
            hdop: default_gps_push_hdop(),
        }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            mode_name_variants: default_mode_name_variants(),
            retry_backoff_ms: default_retry_backoff_ms(),
            timeout_ms: default_bootstrap_timeout_ms(),
        }
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            enabled: default_recorder_enabled(),
            log_dir: default_log_dir(),
            max_records_per_file: default_max_records_per_file(),
            max_files_to_keep: default_max_files_to_keep(),
            log_interval_ms: default_log_interval_ms(),
            format: default_log_format(),
        }
    }
}

impl TelemetryConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn inter_command_delay(&self) -> Duration {
        Duration::from_millis(self.inter_command_delay_ms)
    }

    pub fn stuck_timeout(&self) -> Duration {
        Duration::from_millis(self.stuck_timeout_ms)
    }

    pub fn commanded_throttle_hold(&self) -> Duration {
        Duration::from_millis(self.commanded_throttle_hold_ms)
    }
}

impl RcConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl GpsPushConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Slowest polling rate any loop accepts
pub const MIN_RATE_HZ: f32 = 0.01;
/// Fastest polling rate any loop accepts
pub const MAX_RATE_HZ: f32 = 100.0;

/// Whether `rate_hz` is a usable loop rate. NaN is not.
pub fn rate_in_range(rate_hz: f32) -> bool {
    (MIN_RATE_HZ..=MAX_RATE_HZ).contains(&rate_hz)
}

/// Period of a loop running at `rate_hz`.
///
/// Rates outside [`MIN_RATE_HZ`]..=[`MAX_RATE_HZ`] are clamped into it and NaN
/// is read as the slowest rate, so the period is always finite and non-zero.
pub fn period_from_hz(rate_hz: f32) -> Duration {
    let rate = if rate_hz.is_nan() {
        MIN_RATE_HZ
    } else {
        rate_hz.clamp(MIN_RATE_HZ, MAX_RATE_HZ)
    };
    Duration::from_secs_f64(1.0 / rate as f64)
}

fn invalid(message: impl std::fmt::Display) -> FcLinkError {
    FcLinkError::Config(toml::de::Error::custom(message))
}

fn check_rate(name: &str, rate_hz: f32) -> Result<()> {
    if !rate_in_range(rate_hz) {
        return Err(invalid(format!(
            "{} must be between {} and {}",
            name, MIN_RATE_HZ, MAX_RATE_HZ
        )));
    }
    Ok(())
}

fn check_timeout(name: &str, value_ms: u64, max_ms: u64) -> Result<()> {
    if value_ms == 0 || value_ms > max_ms {
        return Err(invalid(format!("{} must be between 1 and {}", name, max_ms)));
    }
    Ok(())
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use fc_link::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if ![9600, 19200, 38400, 57600, 115200, 230400, 250000, 460800, 921600]
            .contains(&self.serial.baud_rate)
        {
            return Err(invalid(
                "baud_rate must be one of: 9600, 19200, 38400, 57600, 115200, 230400, 250000, 460800, 921600",
            ));
        }

        // Telemetry scheduler
        check_rate("telemetry.rate_hz", self.telemetry.rate_hz)?;
        check_timeout("telemetry.request_timeout_ms", self.telemetry.request_timeout_ms, 2000)?;
        check_timeout("telemetry.stuck_timeout_ms", self.telemetry.stuck_timeout_ms, 60000)?;

        if self.telemetry.inter_command_delay_ms > 1000 {
            return Err(invalid("telemetry.inter_command_delay_ms must be at most 1000"));
        }

        if self.telemetry.stuck_timeout_ms <= self.telemetry.request_timeout_ms {
            return Err(invalid("telemetry.stuck_timeout_ms must exceed request_timeout_ms"));
        }

        for (name, value) in [
            ("telemetry.skip_log_every", self.telemetry.skip_log_every),
            ("telemetry.failure_log_every", self.telemetry.failure_log_every),
            ("telemetry.mode_refetch_every", self.telemetry.mode_refetch_every),
            ("rc.log_every", self.rc.log_every),
        ] {
            if value == 0 {
                return Err(invalid(format!("{} must be greater than 0", name)));
            }
        }

        // Battery
        if self.battery.min_cell_voltage < 2.5 || self.battery.max_cell_voltage > 4.5 {
            return Err(invalid("cell voltages must be between 2.5 and 4.5"));
        }

        if self.battery.min_cell_voltage >= self.battery.max_cell_voltage {
            return Err(invalid("min_cell_voltage must be less than max_cell_voltage"));
        }

        // RC
        check_rate("rc.poll_rate_hz", self.rc.poll_rate_hz)?;
        check_timeout("rc.timeout_ms", self.rc.timeout_ms, 2000)?;

        if self.rc.throttle_channel > 15 {
            return Err(invalid(format!(
                "rc.throttle_channel {} is out of bounds (must be 0-15)",
                self.rc.throttle_channel
            )));
        }

        if self.rc.throttle_min < 900 || self.rc.throttle_max > 2100 {
            return Err(invalid("throttle range must stay within 900-2100"));
        }

        if self.rc.throttle_min >= self.rc.throttle_max {
            return Err(invalid("throttle_min must be less than throttle_max"));
        }

        // GPS push
        check_rate("gps_push.rate_hz", self.gps_push.rate_hz)?;
        check_timeout("gps_push.timeout_ms", self.gps_push.timeout_ms, 2000)?;

        // Bootstrap
        if self.bootstrap.mode_name_variants.is_empty() {
            return Err(invalid("bootstrap.mode_name_variants needs at least one attempt"));
        }
        check_timeout("bootstrap.timeout_ms", self.bootstrap.timeout_ms, 2000)?;

        if self.bootstrap.retry_backoff_ms > 10000 {
            return Err(invalid("bootstrap.retry_backoff_ms must be at most 10000"));
        }

        // Recorder
        if self.recorder.enabled && self.recorder.log_dir.is_empty() {
            return Err(invalid("recorder log_dir cannot be empty when enabled"));
        }

        check_timeout("recorder.log_interval_ms", self.recorder.log_interval_ms, 60000)?;

        if self.recorder.max_records_per_file == 0 {
            return Err(invalid("max_records_per_file must be greater than 0"));
        }

        if self.recorder.max_files_to_keep == 0 {
            return Err(invalid("max_files_to_keep must be greater than 0"));
        }

        if self.recorder.format != "jsonl" {
            return Err(invalid("log format must be 'jsonl' (only supported format)"));
        }

        Ok(())
    }
}
