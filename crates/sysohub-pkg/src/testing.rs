//! Scripted executor for package manager tests

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use sysohub_exec::{CommandExecutor, CommandResult, ExecError};

/// Answers commands from a list of substring rules; unmatched commands succeed silently
pub struct ScriptedExecutor {
    rules: Vec<(String, CommandResult)>,
    commands: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn respond(mut self, pattern: &str, status: i32, stdout: &str) -> Self {
        self.rules
            .push((pattern.to_string(), CommandResult::new(status, stdout, "")));
        self
    }

    pub fn fail(mut self, pattern: &str, status: i32, stderr: &str) -> Self {
        self.rules
            .push((pattern.to_string(), CommandResult::new(status, "", stderr)));
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn run(&self, cmd: &str) -> Result<CommandResult, ExecError> {
        self.commands.lock().unwrap().push(cmd.to_string());
        Ok(self
            .rules
            .iter()
            .find(|(pattern, _)| cmd.contains(pattern.as_str()))
            .map(|(_, result)| result.clone())
            .unwrap_or_else(|| CommandResult::new(0, "", "")))
    }

    async fn run_with_timeout(
        &self,
        cmd: &str,
        _timeout: Duration,
    ) -> Result<CommandResult, ExecError> {
        self.run(cmd).await
    }

    fn executor_type(&self) -> &'static str {
        "scripted"
    }
}
