//! Error types for sysohub-pkg

use thiserror::Error;

/// Errors that can occur during package operations
#[derive(Error, Debug, Clone)]
pub enum PackageError {
    /// Package manager not found on system
    #[error("package manager not found: {0}")]
    ManagerNotFound(String),

    /// Repository is unavailable
    #[error("repository unavailable: {0}")]
    RepositoryUnavailable(String),

    /// Lock file conflict (another process running)
    #[error("lock file conflict: {0}")]
    LockConflict(String),

    /// Insufficient permissions (need root)
    #[error("insufficient permissions: {0}")]
    PermissionDenied(String),

    /// Command execution failed
    #[error("command `{command}` failed: {status} - {message}")]
    CommandFailed {
        /// The command line that was run
        command: String,
        /// Exit status
        status: i32,
        /// Error message
        message: String,
    },

    /// Execution error from the command executor
    #[error("execution error: {0}")]
    ExecutionError(String),
}

impl PackageError {
    /// Check if error is retryable
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PackageError::LockConflict(_) | PackageError::RepositoryUnavailable(_)
        )
    }

    /// Check if error indicates the tool was not run as root
    #[must_use]
    pub fn needs_root(&self) -> bool {
        matches!(self, PackageError::PermissionDenied(_))
    }

    /// Classify a failed package-tool invocation by its stderr
    pub(crate) fn from_failure(command: &str, status: i32, stderr: &str) -> Self {
        if stderr.contains("Could not get lock") {
            return PackageError::LockConflict(stderr.trim().to_string());
        }
        if stderr.contains("Permission denied") || stderr.contains("are you root?") {
            return PackageError::PermissionDenied(stderr.trim().to_string());
        }
        PackageError::CommandFailed {
            command: command.to_string(),
            status,
            message: stderr.trim().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_failure_classification() {
        let lock = PackageError::from_failure(
            "apt-get install -y vim",
            100,
            "E: Could not get lock /var/lib/dpkg/lock-frontend",
        );
        assert!(lock.is_retryable());

        let perm = PackageError::from_failure(
            "apt-get install -y vim",
            100,
            "E: Could not open lock file - open (13: Permission denied)",
        );
        assert!(perm.needs_root());

        let other = PackageError::from_failure(
            "apt-get install -y nope",
            100,
            "E: Unable to locate package nope",
        );
        assert!(matches!(other, PackageError::CommandFailed { status: 100, .. }));
    }
}
