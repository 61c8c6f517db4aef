//! Message types for the reconciler actor
//!
//! Handlers live in [`crate::actor::reconciler`].

use std::fmt;
use std::path::PathBuf;

use kameo_macros::Reply;
use serde::{Deserialize, Serialize};

use crate::desired::SubsystemKind;
use crate::service::{ServiceAction, ServiceState};
use crate::state::RunState;

// ============================================================================
// Requests
// ============================================================================

/// Flavour of a converge run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergeMode {
    /// First-time install; converges every subsystem unconditionally
    Setup,
    /// Upgrade OS packages, then reconverge subsystems the operator confirms
    Update,
}

impl fmt::Display for ConvergeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvergeMode::Setup => write!(f, "setup"),
            ConvergeMode::Update => write!(f, "update"),
        }
    }
}

/// Drive the host toward the desired state
#[derive(Debug, Clone, Copy)]
pub struct Converge {
    pub mode: ConvergeMode,
}

/// Remove everything the reconciler installed
#[derive(Debug, Clone, Copy)]
pub struct TearDown;

/// Archive the installation directory
#[derive(Debug, Clone, Copy)]
pub struct Snapshot;

/// Query every managed service
#[derive(Debug, Clone, Copy)]
pub struct ReportState;

/// Current run state
#[derive(Debug, Clone, Copy)]
pub struct GetRunState;

// ============================================================================
// Replies
// ============================================================================

/// Outcome of converging one subsystem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubsystemReport {
    pub kind: SubsystemKind,
    /// Declined by the confirmation strategy
    pub skipped: bool,
    pub packages_installed: usize,
    pub artifact_installed: bool,
    pub settings_changed: usize,
    /// Files and units rewritten
    pub files_changed: Vec<PathBuf>,
    /// OR of every file result; drives restarts
    pub any_changed: bool,
    pub services: Vec<(String, ServiceAction)>,
}

impl SubsystemReport {
    #[must_use]
    pub fn new(kind: SubsystemKind) -> Self {
        Self {
            kind,
            skipped: false,
            packages_installed: 0,
            artifact_installed: false,
            settings_changed: 0,
            files_changed: Vec::new(),
            any_changed: false,
            services: Vec::new(),
        }
    }

    #[must_use]
    pub fn skipped(kind: SubsystemKind) -> Self {
        Self {
            skipped: true,
            ..Self::new(kind)
        }
    }

    /// Number of services restarted
    #[must_use]
    pub fn restarts(&self) -> usize {
        self.services
            .iter()
            .filter(|(_, action)| *action == ServiceAction::Restarted)
            .count()
    }
}

/// Converge result
#[derive(Debug, Clone, Reply, Serialize, Deserialize)]
pub struct ConvergeReport {
    pub mode: ConvergeMode,
    pub subsystems: Vec<SubsystemReport>,
}

impl ConvergeReport {
    #[must_use]
    pub fn any_changed(&self) -> bool {
        self.subsystems.iter().any(|s| s.any_changed)
    }

    #[must_use]
    pub fn restarts(&self) -> usize {
        self.subsystems.iter().map(SubsystemReport::restarts).sum()
    }

    #[must_use]
    pub fn subsystem(&self, kind: SubsystemKind) -> Option<&SubsystemReport> {
        self.subsystems.iter().find(|s| s.kind == kind)
    }
}

/// Tear-down result
#[derive(Debug, Clone, Default, Reply, Serialize, Deserialize)]
pub struct TearDownReport {
    pub units_removed: Vec<String>,
    /// Original paths of files moved aside
    pub files_moved: Vec<PathBuf>,
    pub packages_removed: usize,
    pub artifacts_removed: usize,
}

/// Snapshot result
#[derive(Debug, Clone, Reply, Serialize, Deserialize)]
pub struct SnapshotReport {
    pub archive: PathBuf,
    pub bytes: u64,
}

/// One row of [`ReportState`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub subsystem: SubsystemKind,
    pub name: String,
    pub state: ServiceState,
}

/// Report-state result
#[derive(Debug, Clone, Reply, Serialize, Deserialize)]
pub struct StateReport {
    pub services: Vec<ServiceStatus>,
}

// ============================================================================
// Events
// ============================================================================

/// Progress broadcast while an operation runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReconcileEvent {
    StateChanged {
        from: RunState,
        to: RunState,
    },
    Step {
        subsystem: Option<SubsystemKind>,
        message: String,
    },
    SubsystemFinished(SubsystemReport),
}

impl fmt::Display for ReconcileEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileEvent::StateChanged { from, to } => write!(f, "state {from} -> {to}"),
            ReconcileEvent::Step {
                subsystem: Some(kind),
                message,
            } => write!(f, "[{kind}] {message}"),
            ReconcileEvent::Step {
                subsystem: None,
                message,
            } => f.write_str(message),
            ReconcileEvent::SubsystemFinished(report) if report.skipped => {
                write!(f, "[{}] skipped", report.kind)
            }
            ReconcileEvent::SubsystemFinished(report) => write!(
                f,
                "[{}] done ({}, {} restart(s))",
                report.kind,
                if report.any_changed {
                    "changed"
                } else {
                    "unchanged"
                },
                report.restarts()
            ),
        }
    }
}
