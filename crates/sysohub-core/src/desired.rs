//! Desired state model
//!
//! A [`DesiredState`] is loaded once per top-level operation and never mutated
//! while that operation runs. Subsystems are kept in their fixed dependency
//! order.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::artifact::ArtifactDescriptor;
use crate::config::GatewayConfig;
use crate::context::RuntimeContext;
use crate::error::CoreError;
use crate::os::PackageRef;
use crate::unit::ServiceUnitSpec;

/// Independently installable part of the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubsystemKind {
    NetworkAccessPoint,
    MessageBroker,
    MetricsStore,
    FlowEngine,
    Dashboard,
}

impl SubsystemKind {
    /// Every subsystem in dependency order
    pub const ALL: [SubsystemKind; 5] = [
        SubsystemKind::NetworkAccessPoint,
        SubsystemKind::MessageBroker,
        SubsystemKind::MetricsStore,
        SubsystemKind::FlowEngine,
        SubsystemKind::Dashboard,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            SubsystemKind::NetworkAccessPoint => "network-access-point",
            SubsystemKind::MessageBroker => "message-broker",
            SubsystemKind::MetricsStore => "metrics-store",
            SubsystemKind::FlowEngine => "flow-engine",
            SubsystemKind::Dashboard => "dashboard",
        }
    }
}

impl fmt::Display for SubsystemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// Where the bytes of a managed file come from
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    /// Render a named template against the spec's context
    Template(String),
    /// Write this exact content
    Inline(String),
}

/// A file the reconciler owns
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFileSpec {
    pub source: ConfigSource,
    pub destination: PathBuf,
    pub context: Value,
    /// Account that owns the file; root when unset
    pub owner: Option<String>,
}

impl ConfigFileSpec {
    pub fn template(
        template_id: impl Into<String>,
        destination: impl Into<PathBuf>,
        context: Value,
    ) -> Self {
        Self {
            source: ConfigSource::Template(template_id.into()),
            destination: destination.into(),
            context,
            owner: None,
        }
    }

    pub fn inline(content: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: ConfigSource::Inline(content.into()),
            destination: destination.into(),
            context: Value::Null,
            owner: None,
        }
    }

    #[must_use]
    pub fn owned_by(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Short label for progress output
    #[must_use]
    pub fn label(&self) -> String {
        self.destination.display().to_string()
    }
}

/// Host-level setting a subsystem depends on
#[derive(Debug, Clone, PartialEq)]
pub enum HostSetting {
    /// Static hostname; reset to the platform default on tear-down
    Hostname(String),
    /// Kernel parameter with the value restored on tear-down
    Sysctl {
        key: String,
        value: String,
        reset: String,
    },
    /// Unprivileged system account for a daemon
    SystemUser(String),
    /// Directory that must exist with the given owner
    Directory {
        path: PathBuf,
        owner: String,
    },
    /// `user:password` credential file hashed in place after writing
    CredentialFile {
        destination: PathBuf,
        username: String,
        password: String,
    },
}

/// Desired policy for one service
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSpec {
    pub name: String,
    pub enabled: bool,
    /// Unmask before enabling (packages that ship masked units)
    pub unmask: bool,
    /// Unit definition we own; `None` for units shipped by a package
    pub unit: Option<ServiceUnitSpec>,
}

impl ServiceSpec {
    /// Package-provided service that should be enabled and running
    pub fn packaged(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            unmask: false,
            unit: None,
        }
    }

    /// Service whose unit file the reconciler writes
    pub fn with_unit(name: impl Into<String>, unit: ServiceUnitSpec) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            unmask: false,
            unit: Some(unit),
        }
    }

    #[must_use]
    pub fn unmasked(mut self) -> Self {
        self.unmask = true;
        self
    }
}

/// Everything one subsystem needs
#[derive(Debug, Clone, PartialEq)]
pub struct SubsystemSpec {
    pub kind: SubsystemKind,
    pub packages: Vec<PackageRef>,
    pub artifact: Option<ArtifactDescriptor>,
    pub settings: Vec<HostSetting>,
    pub configs: Vec<ConfigFileSpec>,
    pub services: Vec<ServiceSpec>,
}

impl SubsystemSpec {
    #[must_use]
    pub fn new(kind: SubsystemKind) -> Self {
        Self {
            kind,
            packages: Vec::new(),
            artifact: None,
            settings: Vec::new(),
            configs: Vec::new(),
            services: Vec::new(),
        }
    }
}

/// Target configuration for one operation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesiredState {
    pub subsystems: Vec<SubsystemSpec>,
}

impl DesiredState {
    /// Build a desired state, sorting subsystems into dependency order
    #[must_use]
    pub fn new(mut subsystems: Vec<SubsystemSpec>) -> Self {
        subsystems.sort_by_key(|s| s.kind);
        Self { subsystems }
    }

    #[must_use]
    pub fn subsystem(&self, kind: SubsystemKind) -> Option<&SubsystemSpec> {
        self.subsystems.iter().find(|s| s.kind == kind)
    }

    /// Every managed service name in dependency order
    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.subsystems
            .iter()
            .flat_map(|s| s.services.iter().map(|svc| svc.name.as_str()))
    }
}

/// Supplies the desired state for an operation
#[async_trait]
pub trait DesiredStateSource: Send + Sync {
    /// Load the desired state
    ///
    /// # Errors
    /// Fails with `ConfigNotFound`/`ConfigInvalid` before anything is mutated.
    async fn load(&self, ctx: &RuntimeContext) -> Result<DesiredState, CoreError>;
}

/// Production source: read the gateway config and plan every subsystem
#[derive(Debug, Clone, Default)]
pub struct ConfigFileSource;

#[async_trait]
impl DesiredStateSource for ConfigFileSource {
    async fn load(&self, ctx: &RuntimeContext) -> Result<DesiredState, CoreError> {
        let config = GatewayConfig::load(&ctx.config_path)?;
        DesiredState::plan(&config, ctx)
    }
}

/// Source returning a fixed desired state
#[derive(Debug, Clone)]
pub struct StaticSource(pub DesiredState);

#[async_trait]
impl DesiredStateSource for StaticSource {
    async fn load(&self, _ctx: &RuntimeContext) -> Result<DesiredState, CoreError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_sorts_into_dependency_order() {
        let state = DesiredState::new(vec![
            SubsystemSpec::new(SubsystemKind::Dashboard),
            SubsystemSpec::new(SubsystemKind::NetworkAccessPoint),
            SubsystemSpec::new(SubsystemKind::FlowEngine),
        ]);
        let kinds: Vec<_> = state.subsystems.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SubsystemKind::NetworkAccessPoint,
                SubsystemKind::FlowEngine,
                SubsystemKind::Dashboard
            ]
        );
    }

    #[test]
    fn test_kind_names() {
        let names: Vec<_> = SubsystemKind::ALL.iter().map(ToString::to_string).collect();
        assert_eq!(
            names,
            vec![
                "network-access-point",
                "message-broker",
                "metrics-store",
                "flow-engine",
                "dashboard"
            ]
        );
    }
}
