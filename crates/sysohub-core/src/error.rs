//! Core error types for sysohub-core

use std::path::PathBuf;

use thiserror::Error;

use sysohub_exec::ExecError;
use sysohub_pkg::PackageError;

use crate::state::RunState;

/// Errors that can occur while reconciling the gateway
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    /// The tool was not started with root privileges
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Gateway configuration file is missing
    #[error("config not found at {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// Gateway configuration could not be parsed or failed validation
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A command marked fatal exited non-zero
    #[error("command failed: {command}: {stderr}")]
    CommandFailed {
        /// The command line that was run
        command: String,
        /// Captured stderr
        stderr: String,
    },

    /// Artifact download produced no usable file
    #[error("download failed for {url}: {reason}")]
    DownloadFailed {
        /// Source URL
        url: String,
        /// What went wrong
        reason: String,
    },

    /// Downloaded archive does not contain any of the expected members
    #[error("unexpected artifact from {url}: none of {expected:?} present")]
    UnexpectedArtifact {
        /// Source URL
        url: String,
        /// Member names that were acceptable
        expected: Vec<String>,
    },

    /// Archive extraction did not yield the install path
    #[error("extraction failed, {} missing: {reason}", .path.display())]
    ExtractionFailed {
        /// Expected install path
        path: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// Template missing or failed to render
    #[error("template {template} failed: {reason}")]
    TemplateError {
        /// Template identifier
        template: String,
        /// Renderer message
        reason: String,
    },

    /// Filesystem error
    #[error("I/O error on {}: {reason}", .path.display())]
    Io {
        /// Path being operated on
        path: PathBuf,
        /// Underlying error message
        reason: String,
    },

    /// Package manager operation failed
    #[error("package manager error: {0}")]
    Package(String),

    /// Command could not be executed at all
    #[error("execution error: {0}")]
    Exec(String),

    /// Invalid run state transition attempted
    #[error("invalid state transition from {from} to {to}")]
    InvalidTransition {
        /// Current state
        from: RunState,
        /// Attempted target state
        to: RunState,
    },

    /// Actor communication error
    #[error("actor communication error: {0}")]
    ActorError(String),
}

impl CoreError {
    /// Wrap an `std::io::Error` with the path it happened on
    pub fn io(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        CoreError::Io {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}

impl From<ExecError> for CoreError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::CommandFailed {
                command, stderr, ..
            } => CoreError::CommandFailed { command, stderr },
            other => CoreError::Exec(other.to_string()),
        }
    }
}

impl From<PackageError> for CoreError {
    fn from(err: PackageError) -> Self {
        match err {
            PackageError::CommandFailed {
                command, message, ..
            } => CoreError::CommandFailed {
                command,
                stderr: message,
            },
            other => CoreError::Package(other.to_string()),
        }
    }
}
