//! APT package manager (Debian/Raspberry Pi OS)

use std::sync::Arc;

use async_trait::async_trait;
use sysohub_exec::CommandExecutor;
use tracing::{debug, info, instrument};

use crate::error::PackageError;
use crate::traits::PackageManager;
use crate::types::{PackageManagerType, UpdateResult};

/// APT package manager implementation
pub struct AptManager {
    /// Executor for running apt commands
    executor: Arc<dyn CommandExecutor>,
}

impl AptManager {
    /// Create a new APT manager
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }

    /// Build a non-interactive apt-get command
    fn apt_cmd(args: &str) -> String {
        format!("DEBIAN_FRONTEND=noninteractive apt-get {args}")
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
        Ok(result.combined_output())
    }

    async fn refresh(&self) -> Result<(), PackageError> {
        let cmd = Self::apt_cmd("update -qq");
        let result = self
            .executor
            .run(&cmd)
            .await
            .map_err(|e| PackageError::ExecutionError(e.to_string()))?;

        if !result.success() {
            return Err(PackageError::RepositoryUnavailable(
                result.stderr.trim().to_string(),
            ));
        }
        Ok(())
    }

    /// Parse the apt summary line for results
    fn parse_upgrade_output(output: &str) -> UpdateResult {
        let mut result = UpdateResult::default();

        for line in output.lines() {
            if !line.contains("upgraded,") {
                continue;
            }
            // "X upgraded, Y newly installed, Z to remove and W not upgraded."
            for part in line.split(',') {
                let part = part.trim();
                if let Some(n) = part.find(" upgraded")
                    && let Ok(num) = part[..n].trim().parse::<u32>()
                {
                    result.upgraded_count = num;
                }
                if let Some(n) = part.find(" newly installed")
                    && let Ok(num) = part[..n].trim().parse::<u32>()
                {
                    result.new_count = num;
                }
                if let Some(n) = part.find(" to remove")
                    && let Ok(num) = part[..n].trim().parse::<u32>()
                {
                    result.removed_count = num;
                }
            }
        }

        result
    }
}

#[async_trait]
impl PackageManager for AptManager {
    #[instrument(skip(self))]
    async fn is_installed(&self, package: &str) -> Result<bool, PackageError> {
        let cmd = format!("dpkg-query -W -f='${{Status}}' {package} 2>/dev/null");
        let result = self
            .executor
            .run(&cmd)
            .await
            .map_err(|e| PackageError::ExecutionError(e.to_string()))?;

        let installed = result.success() && result.stdout.contains("install ok installed");
        debug!(package = %package, installed, "queried package state");
        Ok(installed)
    }

    #[instrument(skip(self))]
    async fn install(&self, packages: &[String]) -> Result<(), PackageError> {
        if packages.is_empty() {
            return Ok(());
        }
        self.refresh().await?;

        let cmd = Self::apt_cmd(&format!("install -y {}", packages.join(" ")));
        self.run(&cmd).await?;

        info!(packages = ?packages, "apt packages installed");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, packages: &[String]) -> Result<(), PackageError> {
        if packages.is_empty() {
            return Ok(());
        }
        let cmd = Self::apt_cmd(&format!("purge -y {}", packages.join(" ")));
        self.run(&cmd).await?;

        info!(packages = ?packages, "apt packages purged");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn upgrade_all(&self) -> Result<UpdateResult, PackageError> {
        info!("starting apt upgrade");
        self.refresh().await?;

        let output = self.run(&Self::apt_cmd("upgrade -y")).await?;
        let result = Self::parse_upgrade_output(&output);

        info!(
            upgraded = result.upgraded_count,
            new = result.new_count,
            removed = result.removed_count,
            "apt upgrade completed"
        );

        Ok(result)
    }

    fn manager_type(&self) -> PackageManagerType {
        PackageManagerType::Apt
    }

    async fn is_available(&self) -> bool {
        match self.executor.run("command -v apt-get").await {
            Ok(result) => result.success(),
            Err(_) => false,
        }
    }
}
