//! Command executor trait

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ExecError;
use crate::result::CommandResult;

/// Runs shell commands and captures their output
///
/// `run` returns `Ok` for any command that could be spawned, whatever its exit
/// status. Use [`CommandExecutor::run_checked`] to turn a non-zero exit into an
/// error.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run a command to completion
    async fn run(&self, cmd: &str) -> Result<CommandResult, ExecError>;

    /// Run a command, giving up after `timeout`
    async fn run_with_timeout(
        &self,
        cmd: &str,
        timeout: Duration,
    ) -> Result<CommandResult, ExecError>;

    /// Short name of the executor, used in logs
    fn executor_type(&self) -> &'static str;

    /// Run a command and apply the caller's failure policy
    ///
    /// # Errors
    /// Returns `ExecError::CommandFailed` when `fatal_on_error` is set and the
    /// command exits non-zero, or any spawn error from [`CommandExecutor::run`].
    async fn run_checked(
        &self,
        cmd: &str,
        fatal_on_error: bool,
    ) -> Result<CommandResult, ExecError> {
        let result = self.run(cmd).await?;
        if fatal_on_error && !result.success() {
            return Err(ExecError::CommandFailed {
                command: cmd.to_string(),
                status: result.status,
                stderr: result.stderr.trim().to_string(),
            });
        }
        Ok(result)
    }
}
