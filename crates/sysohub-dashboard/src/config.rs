//! Dashboard daemon configuration (`dashboard.toml`)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use sysohub_api::telemetry::DEFAULT_METRICS;
use sysohub_telemetry::{BackoffPolicy, BrokerSettings, MAX_POINTS};

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "SYSOHUB_DASHBOARD_CONFIG";

/// Top-level configuration for the dashboard daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSettings {
    /// Services whose `systemctl is-active` state is reported
    #[serde(default = "default_services")]
    pub services: Vec<String>,
    /// HTTP server settings
    #[serde(default)]
    pub daemon: DaemonConfig,
    /// Telemetry broker connection
    #[serde(default)]
    pub broker: BrokerConfig,
    /// Telemetry store shape
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            services: default_services(),
            daemon: DaemonConfig::default(),
            broker: BrokerConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Address and port to bind to
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_host")]
    pub host: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_secs: u64,
    /// 0 disables the cap
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            username: None,
            password: None,
            topic: default_topic(),
            client_id: default_client_id(),
            max_attempts: default_max_attempts(),
            initial_backoff_secs: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

impl BrokerConfig {
    pub fn settings(&self) -> BrokerSettings {
        let mut settings =
            BrokerSettings::new(&self.host, self.port, &self.topic).client_id(&self.client_id);
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            settings = settings.credentials(username, password);
        }
        settings
    }

    pub fn backoff(&self) -> BackoffPolicy {
        let policy = BackoffPolicy::new(
            self.max_attempts,
            Duration::from_secs(self.initial_backoff_secs),
        );
        if self.max_backoff_secs == 0 {
            policy
        } else {
            policy.with_max_backoff(Duration::from_secs(self.max_backoff_secs))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_max_points")]
    pub max_points: usize,
    #[serde(default = "default_metrics")]
    pub metrics: Vec<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            max_points: default_max_points(),
            metrics: default_metrics(),
        }
    }
}

fn default_services() -> Vec<String> {
    ["mosquitto", "victoria-metrics", "nodered", "hostapd", "dnsmasq"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_bind() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_broker_host() -> String {
    "localhost".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

fn default_topic() -> String {
    "v1/devices/me/telemetry".to_string()
}

fn default_client_id() -> String {
    "sysohub-dashboard".to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff() -> u64 {
    1
}

fn default_max_backoff() -> u64 {
    60
}

fn default_max_points() -> usize {
    MAX_POINTS
}

fn default_metrics() -> Vec<String> {
    DEFAULT_METRICS.into_iter().map(String::from).collect()
}

impl DashboardSettings {
    /// Load configuration from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre::eyre!("failed to read {}: {e}", path.display()))?;
        let settings: DashboardSettings = toml::from_str(&content)
            .map_err(|e| eyre::eyre!("failed to parse {}: {e}", path.display()))?;
        Ok(settings)
    }

    /// Load from `explicit`, the environment, default paths, or built-in defaults
    ///
    /// # Errors
    /// Returns error if a named file cannot be read or parsed
    pub fn locate(explicit: Option<&Path>) -> eyre::Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::load(&PathBuf::from(path));
        }

        let paths = [
            PathBuf::from("dashboard.toml"),
            PathBuf::from("/etc/sysohub/dashboard.toml"),
            dirs::home_dir()
                .map(|p| p.join("sysohub/config/dashboard.toml"))
                .unwrap_or_default(),
        ];

        for path in paths {
            if path.is_file() {
                return Self::load(&path);
            }
        }

        tracing::warn!("no config file found, using defaults");
        Ok(DashboardSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let settings: DashboardSettings = toml::from_str("").unwrap();
        assert_eq!(settings, DashboardSettings::default());
        assert_eq!(settings.telemetry.max_points, 50);
        assert_eq!(settings.services.len(), 5);
    }

    #[test]
    fn test_parse_full_file() {
        let settings: DashboardSettings = toml::from_str(
            r#"
            services = ["mosquitto"]

            [daemon]
            bind = "127.0.0.1:9000"
            log_level = "debug"

            [broker]
            host = "192.168.4.1"
            username = "sensor"
            password = "secret"
            max_attempts = 3
            max_backoff_secs = 0

            [telemetry]
            max_points = 10
            metrics = ["pH"]
            "#,
        )
        .unwrap();

        assert_eq!(settings.services, vec!["mosquitto"]);
        assert_eq!(settings.daemon.bind, "127.0.0.1:9000");
        assert_eq!(settings.broker.port, 1883);
        assert_eq!(settings.telemetry.metrics, vec!["pH"]);

        let broker = settings.broker.settings();
        assert_eq!(broker.username.as_deref(), Some("sensor"));
        assert_eq!(broker.host, "192.168.4.1");

        let backoff = settings.broker.backoff();
        assert_eq!(backoff.max_attempts, 3);
        assert_eq!(backoff.max_backoff, None);
    }

    #[test]
    fn test_credentials_need_both_halves() {
        let config = BrokerConfig {
            username: Some("only-user".into()),
            ..BrokerConfig::default()
        };
        assert_eq!(config.settings().username, None);
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dashboard.toml");
        std::fs::write(&path, "[daemon]\nbind = \"127.0.0.1:1\"\n").unwrap();

        let settings = DashboardSettings::locate(Some(&path)).unwrap();
        assert_eq!(settings.daemon.bind, "127.0.0.1:1");
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DashboardSettings::locate(Some(&dir.path().join("nope.toml"))).is_err());
    }
}
