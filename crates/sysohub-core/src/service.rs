//! Idempotent service lifecycle

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::CoreError;
use crate::materialize::{Changed, ConfigMaterializer};
use crate::os::OsProvider;

/// Live `{enabled, disabled} × {running, stopped}` state of a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServiceState {
    pub enabled: bool,
    pub running: bool,
}

impl ServiceState {
    /// Enabled and running
    pub const ACTIVE: Self = Self {
        enabled: true,
        running: true,
    };
    /// Enabled but not running
    pub const STOPPED: Self = Self {
        enabled: true,
        running: false,
    };
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let enabled = if self.enabled { "enabled" } else { "disabled" };
        let running = if self.running { "running" } else { "stopped" };
        write!(f, "{enabled}/{running}")
    }
}

/// What [`ServiceController::ensure_running`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceAction {
    Started,
    Restarted,
    Unchanged,
}

impl fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceAction::Started => write!(f, "started"),
            ServiceAction::Restarted => write!(f, "restarted"),
            ServiceAction::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// Queries and mutates service state, always re-reading it from the OS
#[derive(Clone)]
pub struct ServiceController {
    os: Arc<dyn OsProvider>,
    materializer: ConfigMaterializer,
    unit_dir: PathBuf,
}

impl ServiceController {
    pub fn new(
        os: Arc<dyn OsProvider>,
        materializer: ConfigMaterializer,
        unit_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            os,
            materializer,
            unit_dir: unit_dir.into(),
        }
    }

    fn unit_path(&self, name: &str) -> PathBuf {
        self.unit_dir.join(format!("{name}.service"))
    }

    pub async fn state(&self, name: &str) -> Result<ServiceState, CoreError> {
        self.os.service_state(name).await
    }

    pub async fn is_enabled(&self, name: &str) -> Result<bool, CoreError> {
        Ok(self.os.service_state(name).await?.enabled)
    }

    pub async fn is_running(&self, name: &str) -> Result<bool, CoreError> {
        Ok(self.os.service_state(name).await?.running)
    }

    /// Enable `name` unless it already is; failures are logged, never returned
    pub async fn ensure_enabled(&self, name: &str) -> Changed {
        match self.is_enabled(name).await {
            Ok(true) => Changed::NO,
            Ok(false) => match self.os.enable_service(name).await {
                Ok(()) => {
                    info!(service = %name, "service enabled");
                    Changed::YES
                }
                Err(e) => {
                    warn!(service = %name, error = %e, "failed to enable service");
                    Changed::NO
                }
            },
            Err(e) => {
                warn!(service = %name, error = %e, "could not query service before enabling");
                Changed::NO
            }
        }
    }

    /// Start a stopped service, restart a running one only when forced
    ///
    /// # Errors
    /// Propagates query, start and restart failures.
    pub async fn ensure_running(
        &self,
        name: &str,
        force_restart: bool,
    ) -> Result<ServiceAction, CoreError> {
        if !self.is_running(name).await? {
            self.os.start_service(name).await?;
            info!(service = %name, "service started");
            return Ok(ServiceAction::Started);
        }
        if force_restart {
            self.os.restart_service(name).await?;
            info!(service = %name, "service restarted after configuration change");
            return Ok(ServiceAction::Restarted);
        }
        Ok(ServiceAction::Unchanged)
    }

    /// Stop and disable a service that should not run
    ///
    /// # Errors
    /// Propagates query, stop and disable failures.
    pub async fn ensure_stopped(&self, name: &str) -> Result<Changed, CoreError> {
        let state = self.state(name).await?;
        if state.running {
            self.os.stop_service(name).await?;
        }
        if state.enabled {
            self.os.disable_service(name).await?;
        }
        Ok(Changed(state.running || state.enabled))
    }

    /// Unmask a unit shipped masked by its package; failures are logged
    pub async fn unmask(&self, name: &str) {
        if let Err(e) = self.os.unmask_service(name).await {
            warn!(service = %name, error = %e, "failed to unmask service");
        }
    }

    /// Write the unit file if its text drifted and reload unit definitions
    ///
    /// # Errors
    /// Propagates write and reload failures.
    pub async fn install_unit_if_changed(
        &self,
        name: &str,
        rendered_unit: &str,
    ) -> Result<Changed, CoreError> {
        let changed = self
            .materializer
            .materialize_content(&self.unit_path(name), rendered_unit.as_bytes(), None)
            .await?;
        if changed.is_changed() {
            self.os.reload_units().await?;
        }
        Ok(changed)
    }

    /// Stop, disable and optionally remove the unit file, logging every failure
    ///
    /// Returns whether the unit file was removed.
    pub async fn tear_down(&self, name: &str, remove_unit: bool) -> bool {
        if let Err(e) = self.os.stop_service(name).await {
            warn!(service = %name, error = %e, "failed to stop service");
        }
        if let Err(e) = self.os.disable_service(name).await {
            warn!(service = %name, error = %e, "failed to disable service");
        }
        if !remove_unit {
            return false;
        }

        let path = self.unit_path(name);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(service = %name, path = %path.display(), "unit file removed");
                if let Err(e) = self.os.reload_units().await {
                    warn!(error = %e, "failed to reload units");
                }
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!(service = %name, error = %e, "failed to remove unit file");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::MiniJinjaRenderer;
    use crate::testing::FakeOs;

    fn controller(os: Arc<FakeOs>, unit_dir: &std::path::Path) -> ServiceController {
        let renderer = Arc::new(MiniJinjaRenderer::from_sources(Vec::new()).unwrap());
        let materializer = ConfigMaterializer::new(renderer, os.clone());
        ServiceController::new(os, materializer, unit_dir)
    }

    #[tokio::test]
    async fn test_ensure_running_tristate() {
        let dir = tempfile::tempdir().unwrap();
        let os = Arc::new(FakeOs::default());
        let svc = controller(os.clone(), dir.path());

        assert_eq!(svc.ensure_running("x", false).await.unwrap(), ServiceAction::Started);
        assert_eq!(svc.ensure_running("x", false).await.unwrap(), ServiceAction::Unchanged);
        assert_eq!(svc.ensure_running("x", true).await.unwrap(), ServiceAction::Restarted);

        // stopped + forced is still a plain start
        os.set_service("y", ServiceState::STOPPED);
        assert_eq!(svc.ensure_running("y", true).await.unwrap(), ServiceAction::Started);

        assert_eq!(os.calls(), vec!["start x", "restart x", "start y"]);
    }

    #[tokio::test]
    async fn test_ensure_enabled_is_best_effort() {
        let dir = tempfile::tempdir().unwrap();
        let os = Arc::new(FakeOs::default());
        os.fail_on("enable x");
        let svc = controller(os.clone(), dir.path());

        assert_eq!(svc.ensure_enabled("x").await, Changed::NO);
        assert!(!os.service("x").enabled);
    }

    #[tokio::test]
    async fn test_ensure_enabled_skips_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let os = Arc::new(FakeOs::default());
        os.set_service("x", ServiceState::ACTIVE);
        let svc = controller(os.clone(), dir.path());

        assert_eq!(svc.ensure_enabled("x").await, Changed::NO);
        assert!(os.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unit_install_reloads_only_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let os = Arc::new(FakeOs::default());
        let svc = controller(os.clone(), dir.path());

        let first = svc.install_unit_if_changed("x", "[Unit]\n").await.unwrap();
        let second = svc.install_unit_if_changed("x", "[Unit]\n").await.unwrap();

        assert!(first.is_changed());
        assert!(!second.is_changed());
        assert_eq!(os.calls(), vec!["daemon-reload"]);
        assert!(dir.path().join("x.service").exists());
    }

    #[tokio::test]
    async fn test_tear_down_continues_past_failures() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("x.service"), "[Unit]\n").unwrap();
        let os = Arc::new(FakeOs::default());
        os.set_service("x", ServiceState::ACTIVE);
        os.fail_on("stop x");
        let svc = controller(os.clone(), dir.path());

        assert!(svc.tear_down("x", true).await);
        assert!(!os.service("x").enabled);
        assert!(!dir.path().join("x.service").exists());
    }

    #[test]
    fn test_state_display() {
        let state = ServiceState::STOPPED;
        assert_eq!(state.to_string(), "enabled/stopped");
    }
}
