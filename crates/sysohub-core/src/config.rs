//! Gateway configuration document

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::CoreError;

/// Top-level gateway configuration (`config/config.toml`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Hostname announced on the access point network
    pub hostname: String,
    /// Wireless access point settings
    pub wifi: WifiConfig,
    /// Message broker credentials and topic
    pub mqtt: MqttConfig,
    /// Metrics store settings
    #[serde(default)]
    pub victoria_metrics: VictoriaMetricsConfig,
    /// Flow engine settings
    #[serde(default)]
    pub node_red: NodeRedConfig,
    /// Dashboard daemon settings
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

/// Wireless access point settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WifiConfig {
    pub ssid: String,
    pub passphrase: String,
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default = "default_channel")]
    pub channel: u8,
    #[serde(default = "default_interface")]
    pub interface: String,
    /// Static address of the gateway on the AP network
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_dhcp_start")]
    pub dhcp_range_start: String,
    #[serde(default = "default_dhcp_end")]
    pub dhcp_range_end: String,
    #[serde(default = "default_lease_time")]
    pub lease_time: String,
}

/// Message broker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MqttConfig {
    pub username: String,
    pub password: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_topic")]
    pub topic: String,
}

/// Metrics store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VictoriaMetricsConfig {
    #[serde(default = "default_vm_port")]
    pub port: u16,
    /// Release tag to download
    #[serde(default = "default_vm_version")]
    pub version: String,
    /// Release architecture suffix
    #[serde(default = "default_vm_arch")]
    pub arch: String,
    /// Retention period in months
    #[serde(default = "default_vm_retention")]
    pub retention_months: u32,
}

impl Default for VictoriaMetricsConfig {
    fn default() -> Self {
        Self {
            port: default_vm_port(),
            version: default_vm_version(),
            arch: default_vm_arch(),
            retention_months: default_vm_retention(),
        }
    }
}

/// Flow engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRedConfig {
    #[serde(default = "default_node_red_port")]
    pub port: u16,
}

impl Default for NodeRedConfig {
    fn default() -> Self {
        Self {
            port: default_node_red_port(),
        }
    }
}

/// Dashboard daemon settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardConfig {
    #[serde(default = "default_dashboard_port")]
    pub port: u16,
    /// Installed dashboard executable
    #[serde(default = "default_dashboard_binary")]
    pub binary: String,
    /// Telemetry metric keys accepted from the broker
    #[serde(default = "default_metrics")]
    pub metrics: Vec<String>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            port: default_dashboard_port(),
            binary: default_dashboard_binary(),
            metrics: default_metrics(),
        }
    }
}

fn default_country() -> String {
    "US".to_string()
}

fn default_channel() -> u8 {
    7
}

fn default_interface() -> String {
    "wlan0".to_string()
}

fn default_address() -> String {
    "192.168.4.1".to_string()
}

fn default_dhcp_start() -> String {
    "192.168.4.2".to_string()
}

fn default_dhcp_end() -> String {
    "192.168.4.20".to_string()
}

fn default_lease_time() -> String {
    "24h".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_topic() -> String {
    "v1/devices/me/telemetry".to_string()
}

fn default_vm_port() -> u16 {
    8428
}

fn default_vm_version() -> String {
    "v1.115.0".to_string()
}

fn default_vm_arch() -> String {
    "arm64".to_string()
}

fn default_vm_retention() -> u32 {
    12
}

fn default_node_red_port() -> u16 {
    1880
}

fn default_dashboard_port() -> u16 {
    5000
}

fn default_dashboard_binary() -> String {
    "/usr/local/bin/sysohub-dashboard".to_string()
}

fn default_metrics() -> Vec<String> {
    ["temperature", "distance", "pH", "ORP", "TDS", "EC"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// A single RFC 1123 host label
fn is_valid_hostname(name: &str) -> bool {
    (1..=63).contains(&name.len())
        && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
        && !name.starts_with('-')
        && !name.ends_with('-')
}

impl GatewayConfig {
    /// Load and validate the configuration file
    ///
    /// # Errors
    /// `ConfigNotFound` if the file does not exist, `ConfigInvalid` if it cannot
    /// be parsed or fails validation.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        if !path.exists() {
            return Err(CoreError::ConfigNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|e| CoreError::io(path, &e))?;
        let config = Self::parse(&content)?;

        info!(path = %path.display(), hostname = %config.hostname, "loaded gateway config");
        Ok(config)
    }

    /// Parse and validate configuration text
    ///
    /// # Errors
    /// Returns `ConfigInvalid` on syntax or validation errors.
    pub fn parse(content: &str) -> Result<Self, CoreError> {
        let config: GatewayConfig =
            toml::from_str(content).map_err(|e| CoreError::ConfigInvalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), CoreError> {
        if !is_valid_hostname(&self.hostname) {
            return Err(CoreError::ConfigInvalid(format!(
                "hostname {:?} is not a valid host label (1-63 letters, digits or inner '-')",
                self.hostname
            )));
        }
        if self.wifi.ssid.is_empty() {
            return Err(CoreError::ConfigInvalid("wifi.ssid is empty".to_string()));
        }
        // WPA2 passphrases are 8..=63 printable characters
        if !(8..=63).contains(&self.wifi.passphrase.len()) {
            return Err(CoreError::ConfigInvalid(
                "wifi.passphrase must be 8 to 63 characters".to_string(),
            ));
        }
        if self.mqtt.username.is_empty() || self.mqtt.password.is_empty() {
            return Err(CoreError::ConfigInvalid(
                "mqtt.username and mqtt.password are required".to_string(),
            ));
        }
        if self.mqtt.username.contains(':') {
            return Err(CoreError::ConfigInvalid(
                "mqtt.username must not contain ':'".to_string(),
            ));
        }
        Ok(())
    }

    /// Template context exposing every configuration field
    #[must_use]
    pub fn template_context(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
hostname = "plantomio"

[wifi]
ssid = "plantomio-ap"
passphrase = "correct-horse"

[mqtt]
username = "sensor"
password = "sensor-pass"
"#;

    #[test]
    fn test_parse_minimal_applies_defaults() {
        let config = GatewayConfig::parse(MINIMAL).unwrap();

        assert_eq!(config.hostname, "plantomio");
        assert_eq!(config.wifi.address, "192.168.4.1");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.victoria_metrics.port, 8428);
        assert_eq!(config.dashboard.port, 5000);
        assert_eq!(config.dashboard.metrics.len(), 6);
    }

    #[test]
    fn test_missing_file_is_config_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let err = GatewayConfig::load(&path).unwrap_err();
        assert!(matches!(err, CoreError::ConfigNotFound(p) if p == path));
    }

    #[test]
    fn test_hostname_must_be_a_label() {
        let long = "a".repeat(64);
        for bad in [
            "x'; touch /tmp/pwned; echo '",
            "a/b&c",
            "host name",
            "-gateway",
            "gateway-",
            "",
            long.as_str(),
        ] {
            let content = MINIMAL.replace("\"plantomio\"", &format!("{bad:?}"));
            let err = GatewayConfig::parse(&content).unwrap_err();
            assert!(matches!(err, CoreError::ConfigInvalid(_)), "accepted {bad:?}");
        }

        for good in ["gateway", "pi-4", "A1"] {
            let content = MINIMAL.replace("\"plantomio\"", &format!("{good:?}"));
            assert_eq!(GatewayConfig::parse(&content).unwrap().hostname, good);
        }
    }

    #[test]
    fn test_short_passphrase_rejected() {
        let content = MINIMAL.replace("correct-horse", "short");
        let err = GatewayConfig::parse(&content).unwrap_err();
        assert!(matches!(err, CoreError::ConfigInvalid(_)));
    }

    #[test]
    fn test_syntax_error_is_invalid() {
        let err = GatewayConfig::parse("hostname = ").unwrap_err();
        assert!(matches!(err, CoreError::ConfigInvalid(_)));
    }

    #[test]
    fn test_template_context_exposes_nested_fields() {
        let config = GatewayConfig::parse(MINIMAL).unwrap();
        let ctx = config.template_context();

        assert_eq!(ctx["mqtt"]["username"], "sensor");
        assert_eq!(ctx["victoria_metrics"]["port"], 8428);
    }
}
