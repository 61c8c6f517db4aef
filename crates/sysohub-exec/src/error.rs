//! Error types for sysohub-exec

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during command execution
#[derive(Error, Debug, Clone)]
pub enum ExecError {
    /// Command exited non-zero and the caller marked it fatal
    #[error("command `{command}` failed with status {status}: {stderr}")]
    CommandFailed {
        /// The command line that was run
        command: String,
        /// Exit status code
        status: i32,
        /// Stderr output
        stderr: String,
    },

    /// Command timed out
    #[error("command timed out after {timeout:?}")]
    Timeout {
        /// Timeout duration that was exceeded
        timeout: Duration,
    },

    /// Process spawn error
    #[error("failed to spawn process: {0}")]
    SpawnError(String),

    /// I/O error during execution
    #[error("I/O error: {0}")]
    IoError(String),
}

impl ExecError {
    /// Check if error is retryable
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExecError::Timeout { .. })
    }

    /// Stderr of the failed command, if the error came from one
    #[must_use]
    pub fn stderr(&self) -> Option<&str> {
        match self {
            ExecError::CommandFailed { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}
