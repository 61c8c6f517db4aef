//! Telemetry error types

use thiserror::Error;

/// Errors raised while connecting to the broker or decoding telemetry
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TelemetryError {
    /// Every connection attempt failed
    #[error("connection failed after {attempts} attempts: {last_error}")]
    ConnectionFailed {
        /// Number of attempts made
        attempts: u32,
        /// Error reported by the final attempt
        last_error: String,
    },

    /// Shutdown was requested while connecting
    #[error("connection cancelled")]
    Cancelled,

    /// Message payload is not a telemetry object
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Broker rejected or dropped the connection
    #[error("broker error: {0}")]
    Broker(String),
}

/// Result type alias for telemetry operations
pub type Result<T> = std::result::Result<T, TelemetryError>;
