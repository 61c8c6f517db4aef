//! sysohub-core: idempotent reconciliation of an IoT gateway
//!
//! Every subsystem is converged through the same protocol: install what is
//! missing, materialize files whose fingerprint drifted, then bring services
//! to their enabled/running policy, restarting only when something changed.
//! All host access goes through [`OsProvider`], so the decision logic runs
//! unchanged against the in-memory fakes in [`testing`].

pub mod actor;
pub mod artifact;
pub mod config;
pub mod confirm;
pub mod context;
pub mod desired;
pub mod error;
pub mod fingerprint;
pub mod flow;
pub mod materialize;
pub mod message;
pub mod os;
pub mod plan;
pub mod service;
pub mod state;
pub mod template;
pub mod testing;
pub mod unit;

pub use actor::{ReconcilerActor, ReconcilerArgs};
pub use artifact::{ArtifactDescriptor, ArtifactFetcher, Downloader, HttpDownloader};
pub use config::GatewayConfig;
pub use confirm::{AlwaysConfirm, ConfirmationStrategy, ScriptedAnswers};
pub use context::{RuntimeContext, ensure_elevated};
pub use desired::{
    ConfigFileSource, ConfigFileSpec, ConfigSource, DesiredState, DesiredStateSource, HostSetting,
    ServiceSpec, StaticSource, SubsystemKind, SubsystemSpec,
};
pub use error::CoreError;
pub use fingerprint::{Fingerprint, fingerprint, fingerprint_of_file};
pub use flow::{FlowGraphSpec, FlowNode, NodeKind};
pub use materialize::{Changed, ConfigMaterializer};
pub use message::{
    Converge, ConvergeMode, ConvergeReport, GetRunState, ReconcileEvent, ReportState,
    ServiceStatus, Snapshot, SnapshotReport, StateReport, SubsystemReport, TearDown,
    TearDownReport,
};
pub use os::{OsProvider, PackageRef, SystemdProvider};
pub use plan::MONITORED_SERVICES;
pub use service::{ServiceAction, ServiceController, ServiceState};
pub use state::RunState;
pub use template::{MiniJinjaRenderer, TemplateRenderer};
pub use unit::{RestartPolicy, ServiceUnitSpec};
