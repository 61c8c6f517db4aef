//! Global npm packages (Node-RED)

use std::sync::Arc;

use async_trait::async_trait;
use sysohub_exec::CommandExecutor;
use tracing::{debug, info, instrument};

use crate::error::PackageError;
use crate::traits::PackageManager;
use crate::types::{PackageManagerType, UpdateResult};

/// npm manager operating on the global (`-g`) prefix
pub struct NpmManager {
    executor: Arc<dyn CommandExecutor>,
}

impl NpmManager {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }

    async fn run(&self, cmd: &str) -> Result<String, PackageError> {
        let result = self
            .executor
            .run(cmd)
            .await
            .map_err(|e| PackageError::ExecutionError(e.to_string()))?;

        if !result.success() {
            return Err(PackageError::from_failure(cmd, result.status, &result.stderr));
        }
        Ok(result.stdout)
    }

    /// Parse "changed N packages" / "added N packages" from npm output
    fn parse_update_output(output: &str) -> UpdateResult {
        let mut result = UpdateResult::default();

        for line in output.lines() {
            for part in line.split(',') {
                let words: Vec<&str> = part.split_whitespace().collect();
                if words.len() < 2 {
                    continue;
                }
                let Ok(num) = words[1].parse::<u32>() else {
                    continue;
                };
                match words[0] {
                    "changed" => result.upgraded_count = num,
                    "added" => result.new_count = num,
                    "removed" => result.removed_count = num,
                    _ => {}
                }
            }
        }

        result
    }
}

#[async_trait]
impl PackageManager for NpmManager {
    #[instrument(skip(self))]
    async fn is_installed(&self, package: &str) -> Result<bool, PackageError> {
        let cmd = format!("npm ls -g --depth=0 {package}");
        let installed = match self.executor.run(&cmd).await {
            Ok(result) => result.success(),
            // npm itself missing means nothing is installed through it
            Err(_) => false,
        };
        debug!(package = %package, installed, "queried npm package state");
        Ok(installed)
    }

    #[instrument(skip(self))]
    async fn install(&self, packages: &[String]) -> Result<(), PackageError> {
        if packages.is_empty() {
            return Ok(());
        }
        let cmd = format!("npm install -g --unsafe-perm {}", packages.join(" "));
        self.run(&cmd).await?;

        info!(packages = ?packages, "npm packages installed");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, packages: &[String]) -> Result<(), PackageError> {
        if packages.is_empty() {
            return Ok(());
        }
        let cmd = format!("npm uninstall -g {}", packages.join(" "));
        self.run(&cmd).await?;

        info!(packages = ?packages, "npm packages removed");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn upgrade_all(&self) -> Result<UpdateResult, PackageError> {
        let output = self.run("npm update -g --unsafe-perm").await?;
        let result = Self::parse_update_output(&output);

        info!(changed = result.upgraded_count, "npm upgrade completed");
        Ok(result)
    }

    fn manager_type(&self) -> PackageManagerType {
        PackageManagerType::Npm
    }

    async fn is_available(&self) -> bool {
        match self.executor.run("command -v npm").await {
            Ok(result) => result.success(),
            Err(_) => false,
        }
    }
}
