//! # Error Types
//!
//! Custom error types for FC Link using `thiserror`.

use std::time::Duration;

use thiserror::Error;

/// Main error type for FC Link
#[derive(Debug, Error)]
pub enum FcLinkError {
    /// No response arrived within the request's budget
    #[error("MSP request {opcode} timed out after {timeout:?}")]
    Timeout { opcode: u16, timeout: Duration },

    /// Malformed or unexpected response, or an MSP error reply
    #[error("MSP protocol error: {0}")]
    Protocol(String),

    /// The link is not attached
    #[error("transport is not open")]
    NotOpen,

    /// Caller-supplied data rejected before any I/O
    #[error("validation error: {0}")]
    Validation(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// None of the candidate device paths could be opened
    #[error("No serial device found (tried: {0})")]
    SerialPortNotFound(String),

    /// Telemetry recorder serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FcLinkError {
    /// True for failures that callers treat as "link unresponsive"
    pub fn is_timeout(&self) -> bool {
        matches!(self, FcLinkError::Timeout { .. })
    }
}

/// Result type alias for FC Link
pub type Result<T> = std::result::Result<T, FcLinkError>;
