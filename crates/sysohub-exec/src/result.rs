//! Result types for command execution

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Result of a command execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    /// Exit status code (0 for success, -1 if killed by a signal)
    pub status: i32,
    /// stdout output
    pub stdout: String,
    /// stderr output
    pub stderr: String,
    /// Time taken to execute
    pub duration: Duration,
}

impl CommandResult {
    /// Build a result from captured output
    pub fn new(status: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            status,
            stdout: stdout.into(),
            stderr: stderr.into(),
            duration: Duration::ZERO,
        }
    }

    /// Check if command succeeded (exit code 0)
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// First line of stdout with surrounding whitespace removed
    #[must_use]
    pub fn stdout_line(&self) -> &str {
        self.stdout.lines().next().unwrap_or("").trim()
    }

    /// Combine stdout and stderr
    #[must_use]
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stdout_line() {
        let result = CommandResult::new(0, "enabled\nextra\n", "");
        assert_eq!(result.stdout_line(), "enabled");

        let empty = CommandResult::new(1, "", "boom");
        assert_eq!(empty.stdout_line(), "");
        assert!(!empty.success());
    }

    #[test]
    fn test_combined_output() {
        let result = CommandResult::new(1, "out", "err");
        assert_eq!(result.combined_output(), "out\nerr");
    }
}
