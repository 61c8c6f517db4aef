//! `ReconcilerActor`: top-level gateway operations
//!
//! The actor mailbox serializes operations, so subsystems are always converged
//! one after another in dependency order and two operations never overlap
//! within one process.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use flate2::Compression;
use flate2::write::GzEncoder;
use kameo::actor::{ActorRef, WeakActorRef};
use kameo::error::ActorStopReason;
use kameo::message::{Context, Message};
use kameo::prelude::*;
use tempfile::NamedTempFile;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use sysohub_pkg::PackageManagerType;

use crate::artifact::{ArtifactFetcher, Downloader};
use crate::confirm::ConfirmationStrategy;
use crate::context::RuntimeContext;
use crate::desired::{DesiredState, DesiredStateSource, HostSetting, SubsystemKind, SubsystemSpec};
use crate::error::CoreError;
use crate::fingerprint::fingerprint;
use crate::materialize::{Changed, ConfigMaterializer, move_aside};
use crate::message::{
    Converge, ConvergeMode, ConvergeReport, GetRunState, ReconcileEvent, ReportState,
    ServiceStatus, Snapshot, SnapshotReport, StateReport, SubsystemReport, TearDown,
    TearDownReport,
};
use crate::os::OsProvider;
use crate::plan::DEFAULT_HOSTNAME;
use crate::service::{ServiceAction, ServiceController};
use crate::state::RunState;
use crate::template::TemplateRenderer;

/// Managers in install order; removal runs in reverse
const MANAGER_ORDER: [PackageManagerType; 2] = [PackageManagerType::Apt, PackageManagerType::Npm];

/// Arguments for spawning a `ReconcilerActor`
pub struct ReconcilerArgs {
    pub ctx: RuntimeContext,
    pub source: Arc<dyn DesiredStateSource>,
    pub os: Arc<dyn OsProvider>,
    pub renderer: Arc<dyn TemplateRenderer>,
    pub downloader: Arc<dyn Downloader>,
    pub confirmation: Arc<dyn ConfirmationStrategy>,
    /// Progress events; subscribe before sending the first message
    pub event_tx: broadcast::Sender<ReconcileEvent>,
}

/// Converges, tears down, archives and reports on the gateway
pub struct ReconcilerActor {
    ctx: RuntimeContext,
    source: Arc<dyn DesiredStateSource>,
    os: Arc<dyn OsProvider>,
    materializer: ConfigMaterializer,
    services: ServiceController,
    artifacts: ArtifactFetcher,
    confirmation: Arc<dyn ConfirmationStrategy>,
    state: RunState,
    event_tx: broadcast::Sender<ReconcileEvent>,
}

impl ReconcilerActor {
    fn emit(&self, event: ReconcileEvent) {
        // no subscribers is fine
        let _ = self.event_tx.send(event);
    }

    fn step(&self, subsystem: Option<SubsystemKind>, message: impl Into<String>) {
        self.emit(ReconcileEvent::Step {
            subsystem,
            message: message.into(),
        });
    }

    /// Transition to a new state with validation and event emission
    fn transition_to(&mut self, next: RunState) -> Result<(), CoreError> {
        if !self.state.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        let from = self.state;
        self.state = next;
        info!(from = %from, to = %next, "run state transition");
        self.emit(ReconcileEvent::StateChanged { from, to: next });
        Ok(())
    }

    /// Enter `Failed`, keeping whatever the completed steps produced
    fn fail(&mut self, err: &CoreError) {
        let from = self.state;
        self.state = RunState::Failed;
        error!(from = %from, error = %err, "operation failed");
        self.emit(ReconcileEvent::StateChanged {
            from,
            to: RunState::Failed,
        });
    }

    /// Close out an operation as `Done` or `Failed`
    fn finish<T>(&mut self, result: Result<T, CoreError>) -> Result<T, CoreError> {
        match result {
            Ok(value) => {
                self.transition_to(RunState::Done)?;
                Ok(value)
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    async fn load(&mut self) -> Result<DesiredState, CoreError> {
        self.transition_to(RunState::LoadingDesiredState)?;
        match self.source.load(&self.ctx).await {
            Ok(desired) => Ok(desired),
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------------
    // converge
    // ------------------------------------------------------------------------

    async fn converge(
        &mut self,
        mode: ConvergeMode,
        desired: &DesiredState,
    ) -> Result<ConvergeReport, CoreError> {
        if mode == ConvergeMode::Update {
            self.step(None, "upgrading OS packages");
            self.os.upgrade_packages().await?;
        }

        let mut subsystems = Vec::with_capacity(desired.subsystems.len());
        for spec in &desired.subsystems {
            self.transition_to(RunState::ConvergingSubsystem(spec.kind))?;

            let report = if mode == ConvergeMode::Update && !self.confirm_update(spec).await? {
                SubsystemReport::skipped(spec.kind)
            } else {
                self.converge_subsystem(spec).await?
            };

            self.emit(ReconcileEvent::SubsystemFinished(report.clone()));
            subsystems.push(report);
        }

        Ok(ConvergeReport { mode, subsystems })
    }

    /// Ask before touching a subsystem that is already installed
    async fn confirm_update(&self, spec: &SubsystemSpec) -> Result<bool, CoreError> {
        if !self.is_installed(spec).await? {
            return Ok(true);
        }
        let question = format!("{} is already installed. Reconfigure it?", spec.kind);
        Ok(self.confirmation.confirm(spec.kind, &question).await)
    }

    async fn is_installed(&self, spec: &SubsystemSpec) -> Result<bool, CoreError> {
        if let Some(package) = spec.packages.first() {
            return self.os.is_package_installed(package).await;
        }
        if let Some(artifact) = &spec.artifact {
            return Ok(artifact.is_installed());
        }
        Ok(spec
            .services
            .iter()
            .any(|s| s.unit.is_some() && self.ctx.unit_path(&s.name).exists()))
    }

    async fn converge_subsystem(&self, spec: &SubsystemSpec) -> Result<SubsystemReport, CoreError> {
        let kind = spec.kind;
        let mut report = SubsystemReport::new(kind);
        let mut any_changed = Changed::NO;

        report.packages_installed = self.install_packages(spec).await?;

        if let Some(artifact) = &spec.artifact {
            if !artifact.is_installed() {
                self.step(Some(kind), format!("downloading {}", artifact.download_url));
            }
            report.artifact_installed =
                self.artifacts.ensure_installed(artifact).await?.is_changed();
        }

        for setting in &spec.settings {
            let changed = self.apply_setting(kind, setting).await?;
            if changed.is_changed() {
                report.settings_changed += 1;
                if let HostSetting::CredentialFile { destination, .. } = setting {
                    report.files_changed.push(destination.clone());
                    any_changed |= changed;
                }
            }
        }

        for file in &spec.configs {
            let changed = self.materializer.apply(file).await?;
            if changed.is_changed() {
                self.step(Some(kind), format!("updated {}", file.label()));
                report.files_changed.push(file.destination.clone());
            }
            any_changed |= changed;
        }

        for service in &spec.services {
            let Some(unit) = &service.unit else { continue };
            let changed = self
                .services
                .install_unit_if_changed(&service.name, &unit.render()?)
                .await?;
            if changed.is_changed() {
                self.step(Some(kind), format!("installed unit {}.service", service.name));
                report.files_changed.push(self.ctx.unit_path(&service.name));
            }
            any_changed |= changed;
        }

        for service in &spec.services {
            if service.unmask {
                self.services.unmask(&service.name).await;
            }
            let action = if service.enabled {
                self.services.ensure_enabled(&service.name).await;
                self.services
                    .ensure_running(&service.name, any_changed.is_changed())
                    .await?
            } else {
                self.services.ensure_stopped(&service.name).await?;
                ServiceAction::Unchanged
            };
            if action != ServiceAction::Unchanged {
                self.step(Some(kind), format!("{} {action}", service.name));
            }
            report.services.push((service.name.clone(), action));
        }

        report.any_changed = any_changed.is_changed();
        Ok(report)
    }

    /// Install missing packages; returns how many were installed
    async fn install_packages(&self, spec: &SubsystemSpec) -> Result<usize, CoreError> {
        let mut installed = 0;
        for manager in MANAGER_ORDER {
            let mut missing = Vec::new();
            for package in spec.packages.iter().filter(|p| p.manager == manager) {
                if !self.os.is_package_installed(package).await? {
                    missing.push(package.name.clone());
                }
            }
            if missing.is_empty() {
                continue;
            }
            self.step(
                Some(spec.kind),
                format!("installing {manager} packages: {}", missing.join(" ")),
            );
            self.os.install_packages(manager, &missing).await?;
            installed += missing.len();
        }
        Ok(installed)
    }

    async fn apply_setting(
        &self,
        kind: SubsystemKind,
        setting: &HostSetting,
    ) -> Result<Changed, CoreError> {
        match setting {
            HostSetting::Hostname(hostname) => {
                if self.os.hostname().await? == *hostname {
                    return Ok(Changed::NO);
                }
                self.step(Some(kind), format!("setting hostname to {hostname}"));
                self.os.set_hostname(hostname).await?;
                Ok(Changed::YES)
            }
            HostSetting::Sysctl { key, value, .. } => {
                if self.os.sysctl(key).await?.as_deref() == Some(value.as_str()) {
                    return Ok(Changed::NO);
                }
                self.step(Some(kind), format!("setting {key}={value}"));
                self.os.set_sysctl(key, value).await?;
                Ok(Changed::YES)
            }
            HostSetting::SystemUser(name) => {
                if self.os.user_exists(name).await? {
                    return Ok(Changed::NO);
                }
                self.step(Some(kind), format!("creating system user {name}"));
                self.os.create_system_user(name).await?;
                Ok(Changed::YES)
            }
            HostSetting::Directory { path, owner } => {
                if path.is_dir() {
                    return Ok(Changed::NO);
                }
                fs::create_dir_all(path).map_err(|e| CoreError::io(path, &e))?;
                self.os.set_owner(path, owner).await?;
                Ok(Changed::YES)
            }
            HostSetting::CredentialFile {
                destination,
                username,
                password,
            } => {
                self.apply_credential_file(kind, destination, username, password)
                    .await
            }
        }
    }

    /// Stamp file remembering which plaintext produced the hashed credentials
    fn credential_stamp(&self, destination: &Path) -> PathBuf {
        let name = destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "credentials".to_string());
        self.ctx.state_dir.join(format!("{name}.sha256"))
    }

    async fn apply_credential_file(
        &self,
        kind: SubsystemKind,
        destination: &Path,
        username: &str,
        password: &str,
    ) -> Result<Changed, CoreError> {
        let line = format!("{username}:{password}\n");
        let wanted = fingerprint(line.as_bytes()).to_hex();
        let stamp = self.credential_stamp(destination);

        let recorded = match fs::read_to_string(&stamp) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(CoreError::io(&stamp, &e)),
        };
        if destination.exists() && recorded.trim() == wanted {
            return Ok(Changed::NO);
        }

        self.step(Some(kind), format!("updating credentials in {}", destination.display()));
        self.materializer
            .materialize_content(destination, line.as_bytes(), None)
            .await?;
        self.os.hash_password_file(destination).await?;

        fs::create_dir_all(&self.ctx.state_dir)
            .map_err(|e| CoreError::io(&self.ctx.state_dir, &e))?;
        fs::write(&stamp, format!("{wanted}\n")).map_err(|e| CoreError::io(&stamp, &e))?;
        Ok(Changed::YES)
    }

    // ------------------------------------------------------------------------
    // tear-down
    // ------------------------------------------------------------------------

    async fn tear_down(&mut self, desired: &DesiredState) -> Result<TearDownReport, CoreError> {
        let mut report = TearDownReport::default();

        // services first, best-effort
        for spec in desired.subsystems.iter().rev() {
            for service in spec.services.iter().rev() {
                self.step(Some(spec.kind), format!("stopping {}", service.name));
                if self
                    .services
                    .tear_down(&service.name, service.unit.is_some())
                    .await
                {
                    report.units_removed.push(service.name.clone());
                }
            }
        }

        for spec in desired.subsystems.iter().rev() {
            self.transition_to(RunState::ConvergingSubsystem(spec.kind))?;

            for file in &spec.configs {
                if move_aside(&file.destination)?.is_some() {
                    report.files_moved.push(file.destination.clone());
                }
            }

            for manager in MANAGER_ORDER.iter().rev() {
                let mut present = Vec::new();
                for package in spec.packages.iter().filter(|p| p.manager == *manager) {
                    if self.os.is_package_installed(package).await? {
                        present.push(package.name.clone());
                    }
                }
                if present.is_empty() {
                    continue;
                }
                self.step(
                    Some(spec.kind),
                    format!("removing {manager} packages: {}", present.join(" ")),
                );
                self.os.remove_packages(*manager, &present).await?;
                report.packages_removed += present.len();
            }

            if let Some(artifact) = &spec.artifact
                && self.artifacts.remove(artifact)?
            {
                report.artifacts_removed += 1;
            }

            for setting in spec.settings.iter().rev() {
                if let Some(moved) = self.reset_setting(spec.kind, setting).await? {
                    report.files_moved.push(moved);
                }
            }
        }

        Ok(report)
    }

    /// Undo a host setting; returns the original path of a file moved aside
    async fn reset_setting(
        &self,
        kind: SubsystemKind,
        setting: &HostSetting,
    ) -> Result<Option<PathBuf>, CoreError> {
        match setting {
            HostSetting::Hostname(_) => {
                if self.os.hostname().await? != DEFAULT_HOSTNAME {
                    self.step(Some(kind), format!("resetting hostname to {DEFAULT_HOSTNAME}"));
                    self.os.set_hostname(DEFAULT_HOSTNAME).await?;
                }
            }
            HostSetting::Sysctl { key, reset, .. } => {
                if self.os.sysctl(key).await?.as_deref() != Some(reset.as_str()) {
                    self.step(Some(kind), format!("resetting {key}={reset}"));
                    self.os.set_sysctl(key, reset).await?;
                }
            }
            HostSetting::SystemUser(name) => {
                if self.os.user_exists(name).await? {
                    self.step(Some(kind), format!("removing user {name}"));
                    self.os.remove_user(name).await?;
                }
            }
            // data directories survive a purge
            HostSetting::Directory { .. } => {}
            HostSetting::CredentialFile { destination, .. } => {
                let stamp = self.credential_stamp(destination);
                if let Err(e) = fs::remove_file(&stamp)
                    && e.kind() != std::io::ErrorKind::NotFound
                {
                    warn!(path = %stamp.display(), error = %e, "failed to remove credential stamp");
                }
                if move_aside(destination)?.is_some() {
                    return Ok(Some(destination.to_path_buf()));
                }
            }
        }
        Ok(None)
    }

    // ------------------------------------------------------------------------
    // snapshot / report-state
    // ------------------------------------------------------------------------

    async fn snapshot(&self) -> Result<SnapshotReport, CoreError> {
        let source = self.ctx.install_dir.clone();
        if !source.is_dir() {
            return Err(CoreError::Io {
                path: source,
                reason: "installation directory does not exist".to_string(),
            });
        }

        let backups = self.ctx.backups_dir.clone();
        fs::create_dir_all(&backups).map_err(|e| CoreError::io(&backups, &e))?;
        self.os.set_owner(&backups, &self.ctx.acting_user).await?;

        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let archive = backups.join(format!("iot_backup_{stamp}.tar.gz"));
        self.step(None, format!("archiving {} to {}", source.display(), archive.display()));

        let target = archive.clone();
        let bytes = tokio::task::spawn_blocking(move || write_archive(&source, &target))
            .await
            .map_err(|e| CoreError::Exec(e.to_string()))??;
        self.os.set_owner(&archive, &self.ctx.acting_user).await?;

        info!(archive = %archive.display(), bytes, "backup created");
        Ok(SnapshotReport { archive, bytes })
    }

    async fn report_state(&self, desired: &DesiredState) -> Result<StateReport, CoreError> {
        let mut services = Vec::new();
        for spec in &desired.subsystems {
            for service in &spec.services {
                let state = self.services.state(&service.name).await?;
                services.push(ServiceStatus {
                    subsystem: spec.kind,
                    name: service.name.clone(),
                    state,
                });
            }
        }
        Ok(StateReport { services })
    }
}

/// Write a gzipped tarball of `source` to `archive` atomically
fn write_archive(source: &Path, archive: &Path) -> Result<u64, CoreError> {
    let parent = archive.parent().unwrap_or_else(|| Path::new("."));
    let staging = NamedTempFile::new_in(parent).map_err(|e| CoreError::io(parent, &e))?;
    let root = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "sysohub".to_string());

    let file = staging.reopen().map_err(|e| CoreError::io(staging.path(), &e))?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder
        .append_dir_all(&root, source)
        .map_err(|e| CoreError::io(source, &e))?;
    builder
        .into_inner()
        .and_then(GzEncoder::finish)
        .map_err(|e| CoreError::io(staging.path(), &e))?;

    let persisted: File = staging
        .persist(archive)
        .map_err(|e| CoreError::io(archive, &e.error))?;
    let bytes = persisted
        .metadata()
        .map_err(|e| CoreError::io(archive, &e))?
        .len();
    Ok(bytes)
}

impl Actor for ReconcilerActor {
    type Args = ReconcilerArgs;
    type Error = CoreError;

    async fn on_start(args: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        info!(id = %actor_ref.id(), user = %args.ctx.acting_user, "ReconcilerActor starting");

        let materializer = ConfigMaterializer::new(args.renderer, args.os.clone());
        let services = ServiceController::new(
            args.os.clone(),
            materializer.clone(),
            args.ctx.unit_dir.clone(),
        );

        Ok(Self {
            ctx: args.ctx,
            source: args.source,
            os: args.os,
            materializer,
            services,
            artifacts: ArtifactFetcher::new(args.downloader),
            confirmation: args.confirmation,
            state: RunState::NotStarted,
            event_tx: args.event_tx,
        })
    }

    async fn on_stop(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        reason: ActorStopReason,
    ) -> Result<(), Self::Error> {
        info!(reason = ?reason, state = %self.state, "ReconcilerActor stopping");
        Ok(())
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl Message<Converge> for ReconcilerActor {
    type Reply = Result<ConvergeReport, CoreError>;

    async fn handle(
        &mut self,
        msg: Converge,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        info!(mode = %msg.mode, "converge requested");
        let desired = self.load().await?;
        let result = self.converge(msg.mode, &desired).await;
        self.finish(result)
    }
}

impl Message<TearDown> for ReconcilerActor {
    type Reply = Result<TearDownReport, CoreError>;

    async fn handle(
        &mut self,
        _msg: TearDown,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        info!("tear-down requested");
        let desired = self.load().await?;
        let result = self.tear_down(&desired).await;
        self.finish(result)
    }
}

impl Message<Snapshot> for ReconcilerActor {
    type Reply = Result<SnapshotReport, CoreError>;

    async fn handle(
        &mut self,
        _msg: Snapshot,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.snapshot().await
    }
}

impl Message<ReportState> for ReconcilerActor {
    type Reply = Result<StateReport, CoreError>;

    async fn handle(
        &mut self,
        _msg: ReportState,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let desired = self.load().await?;
        let result = self.report_state(&desired).await;
        self.finish(result)
    }
}

impl Message<GetRunState> for ReconcilerActor {
    type Reply = RunState;

    async fn handle(
        &mut self,
        _msg: GetRunState,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.state
    }
}
