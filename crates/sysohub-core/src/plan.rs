//! Turn the gateway configuration into per-subsystem desired state

use serde_json::{Value, json};

use crate::artifact::ArtifactDescriptor;
use crate::config::GatewayConfig;
use crate::context::RuntimeContext;
use crate::desired::{
    ConfigFileSpec, DesiredState, HostSetting, ServiceSpec, SubsystemKind, SubsystemSpec,
};
use crate::error::CoreError;
use crate::flow::{FlowGraphSpec, FlowNode, NodeKind};
use crate::os::PackageRef;
use crate::unit::{RestartPolicy, ServiceUnitSpec};

/// Hostname restored on tear-down
pub const DEFAULT_HOSTNAME: &str = "raspberrypi";

pub const VICTORIA_METRICS_BIN: &str = "/usr/local/bin/victoria-metrics";
pub const VICTORIA_METRICS_USER: &str = "victoria-metrics";
pub const VICTORIA_METRICS_DATA: &str = "/var/lib/victoria-metrics";
const VICTORIA_METRICS_CONFIG: &str = "/etc/victoria-metrics.yml";
const VICTORIA_METRICS_RELEASES: &str =
    "https://github.com/VictoriaMetrics/VictoriaMetrics/releases/download";

/// Services the dashboard reports on
pub const MONITORED_SERVICES: [&str; 5] =
    ["mosquitto", "victoria-metrics", "nodered", "hostapd", "dnsmasq"];

const HOSTAPD_CONF: &str = "/etc/hostapd/hostapd.conf";

impl DesiredState {
    /// Plan every subsystem from the gateway configuration
    ///
    /// # Errors
    /// Returns `ConfigInvalid` if a typed unit or flow graph fails validation.
    pub fn plan(config: &GatewayConfig, ctx: &RuntimeContext) -> Result<Self, CoreError> {
        let context = template_context(config, ctx);
        Ok(Self::new(vec![
            network_access_point(config, &context),
            message_broker(config, &context),
            metrics_store(config, &context),
            flow_engine(config, ctx, &context)?,
            dashboard(config, ctx, &context)?,
        ]))
    }
}

/// Configuration values plus the runtime paths templates may reference
fn template_context(config: &GatewayConfig, ctx: &RuntimeContext) -> Value {
    let mut context = config.template_context();
    if let Value::Object(map) = &mut context {
        map.insert(
            "runtime".to_string(),
            json!({
                "acting_user": ctx.acting_user,
                "home_dir": ctx.home_dir.display().to_string(),
                "install_dir": ctx.install_dir.display().to_string(),
                "monitored_services": MONITORED_SERVICES,
            }),
        );
    }
    context
}

fn apt(names: &[&str]) -> Vec<PackageRef> {
    names.iter().map(|n| PackageRef::apt(*n)).collect()
}

fn network_access_point(config: &GatewayConfig, context: &Value) -> SubsystemSpec {
    let mut spec = SubsystemSpec::new(SubsystemKind::NetworkAccessPoint);
    spec.packages = apt(&["hostapd", "dnsmasq", "avahi-daemon"]);
    spec.settings = vec![
        HostSetting::Hostname(config.hostname.clone()),
        HostSetting::Sysctl {
            key: "net.ipv4.ip_forward".to_string(),
            value: "1".to_string(),
            reset: "0".to_string(),
        },
    ];
    spec.configs = vec![
        ConfigFileSpec::template("dhcpcd.conf.j2", "/etc/dhcpcd.conf", context.clone()),
        ConfigFileSpec::template("hostapd.conf.j2", HOSTAPD_CONF, context.clone()),
        ConfigFileSpec::template("dnsmasq.conf.j2", "/etc/dnsmasq.conf", context.clone()),
        ConfigFileSpec::inline(
            format!("DAEMON_CONF=\"{HOSTAPD_CONF}\"\n"),
            "/etc/default/hostapd",
        ),
        ConfigFileSpec::inline("net.ipv4.ip_forward=1\n", "/etc/sysctl.d/90-sysohub.conf"),
    ];
    spec.services = ["hostapd", "dnsmasq", "avahi-daemon"]
        .into_iter()
        .map(|name| ServiceSpec::packaged(name).unmasked())
        .collect();
    spec
}

fn message_broker(config: &GatewayConfig, context: &Value) -> SubsystemSpec {
    let mut spec = SubsystemSpec::new(SubsystemKind::MessageBroker);
    spec.packages = apt(&["mosquitto", "mosquitto-clients"]);
    spec.settings = vec![HostSetting::CredentialFile {
        destination: "/etc/mosquitto/passwd".into(),
        username: config.mqtt.username.clone(),
        password: config.mqtt.password.clone(),
    }];
    spec.configs = vec![ConfigFileSpec::template(
        "mosquitto.conf.j2",
        "/etc/mosquitto/mosquitto.conf",
        context.clone(),
    )];
    spec.services = vec![ServiceSpec::packaged("mosquitto")];
    spec
}

/// Release archive URL for the configured version and architecture
#[must_use]
pub fn victoria_metrics_url(version: &str, arch: &str) -> String {
    format!("{VICTORIA_METRICS_RELEASES}/{version}/victoria-metrics-linux-{arch}-{version}.tar.gz")
}

fn metrics_store(config: &GatewayConfig, context: &Value) -> SubsystemSpec {
    let vm = &config.victoria_metrics;
    let mut spec = SubsystemSpec::new(SubsystemKind::MetricsStore);
    spec.artifact = Some(ArtifactDescriptor {
        download_url: victoria_metrics_url(&vm.version, &vm.arch),
        expected_member_names: vec![
            "victoria-metrics-prod".to_string(),
            "victoria-metrics".to_string(),
        ],
        install_path: VICTORIA_METRICS_BIN.into(),
    });
    spec.settings = vec![
        HostSetting::SystemUser(VICTORIA_METRICS_USER.to_string()),
        HostSetting::Directory {
            path: VICTORIA_METRICS_DATA.into(),
            owner: VICTORIA_METRICS_USER.to_string(),
        },
    ];
    spec.configs = vec![ConfigFileSpec::template(
        "victoria_metrics.yml.j2",
        VICTORIA_METRICS_CONFIG,
        context.clone(),
    )];

    let unit = ServiceUnitSpec::new(
        "VictoriaMetrics",
        [
            VICTORIA_METRICS_BIN.to_string(),
            format!("-storageDataPath={VICTORIA_METRICS_DATA}"),
            format!("-httpListenAddr=:{}", vm.port),
            format!("-retentionPeriod={}", vm.retention_months),
            format!("-promscrape.config={VICTORIA_METRICS_CONFIG}"),
        ],
    )
    .user(VICTORIA_METRICS_USER)
    .group(VICTORIA_METRICS_USER);
    spec.services = vec![ServiceSpec::with_unit("victoria-metrics", unit)];
    spec
}

/// Sensor readings go MQTT in → JSON → line protocol → metrics store
fn telemetry_flow(config: &GatewayConfig) -> FlowGraphSpec {
    let metrics = serde_json::to_string(&config.dashboard.metrics).unwrap_or_else(|_| "[]".into());
    let code = format!(
        "const metrics = {metrics};\n\
         const p = msg.payload || {{}};\n\
         const fields = metrics\n    \
             .filter(k => p[k] !== undefined && !isNaN(Number(p[k])))\n    \
             .map(k => `${{k}}=${{Number(p[k])}}`);\n\
         if (fields.length === 0) {{ return null; }}\n\
         const ts = Number(p.timestamp) || Date.now();\n\
         msg.payload = `sensors ${{fields.join(',')}} ${{ts * 1000000}}`;\n\
         msg.headers = {{ 'content-type': 'text/plain' }};\n\
         return msg;\n"
    );

    FlowGraphSpec::new("sysohub-telemetry", "Telemetry")
        .node(FlowNode::new(
            "sysohub-broker",
            "local broker",
            NodeKind::MqttBroker {
                host: "localhost".to_string(),
                port: config.mqtt.port,
                client_id: "sysohub-node-red".to_string(),
                username: config.mqtt.username.clone(),
                password: config.mqtt.password.clone(),
            },
        ))
        .node(
            FlowNode::new(
                "sysohub-mqtt-in",
                "sensor telemetry",
                NodeKind::MqttIn {
                    topic: config.mqtt.topic.clone(),
                    broker: "sysohub-broker".to_string(),
                },
            )
            .wire_to("sysohub-parse"),
        )
        .node(
            FlowNode::new("sysohub-parse", "parse JSON", NodeKind::Json)
                .wire_to("sysohub-format"),
        )
        .node(
            FlowNode::new("sysohub-format", "to line protocol", NodeKind::Function { code })
                .wire_to("sysohub-import"),
        )
        .node(FlowNode::new(
            "sysohub-import",
            "VictoriaMetrics import",
            NodeKind::HttpRequest {
                method: "POST".to_string(),
                url: format!("http://localhost:{}/write", config.victoria_metrics.port),
            },
        ))
}

fn flow_engine(
    config: &GatewayConfig,
    ctx: &RuntimeContext,
    context: &Value,
) -> Result<SubsystemSpec, CoreError> {
    let user_dir = ctx.home_dir.join(".node-red");
    let mut spec = SubsystemSpec::new(SubsystemKind::FlowEngine);
    spec.packages = vec![
        PackageRef::apt("nodejs"),
        PackageRef::apt("npm"),
        PackageRef::npm("node-red"),
    ];
    spec.settings = vec![HostSetting::Directory {
        path: user_dir.clone(),
        owner: ctx.acting_user.clone(),
    }];
    spec.configs = vec![
        ConfigFileSpec::template(
            "node_red_settings.js.j2",
            user_dir.join("settings.js"),
            context.clone(),
        )
        .owned_by(&ctx.acting_user),
        ConfigFileSpec::inline(telemetry_flow(config).render()?, user_dir.join("flows.json"))
            .owned_by(&ctx.acting_user),
    ];

    let unit = ServiceUnitSpec::new(
        "Node-RED",
        ["/usr/bin/env", "node-red", "--max-old-space-size=512", "-v"],
    )
    .user(&ctx.acting_user)
    .env("NODE_OPTIONS", "--max_old_space_size=512")
    .working_directory(&user_dir)
    .restart(RestartPolicy::OnFailure)
    .kill_signal("SIGINT");
    unit.validate()?;
    spec.services = vec![ServiceSpec::with_unit("nodered", unit)];
    Ok(spec)
}

fn dashboard(
    config: &GatewayConfig,
    ctx: &RuntimeContext,
    context: &Value,
) -> Result<SubsystemSpec, CoreError> {
    let settings_path = ctx.install_dir.join("config").join("dashboard.toml");
    let mut spec = SubsystemSpec::new(SubsystemKind::Dashboard);
    spec.configs = vec![
        ConfigFileSpec::template("dashboard.toml.j2", &settings_path, context.clone())
            .owned_by(&ctx.acting_user),
    ];

    let unit = ServiceUnitSpec::new(
        "sysohub Dashboard",
        [
            config.dashboard.binary.clone(),
            "--config".to_string(),
            settings_path.display().to_string(),
        ],
    )
    .user(&ctx.acting_user)
    .working_directory(&ctx.install_dir);
    unit.validate()?;
    spec.services = vec![ServiceSpec::with_unit("sysohub-dashboard", unit)];
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::desired::ConfigSource;

    fn config() -> GatewayConfig {
        GatewayConfig::parse(
            r#"
hostname = "plantomio"

[wifi]
ssid = "plantomio-ap"
passphrase = "correct-horse"

[mqtt]
username = "sensor"
password = "sensor-pass"
"#,
        )
        .unwrap()
    }

    fn plan() -> DesiredState {
        DesiredState::plan(&config(), &RuntimeContext::new("pi", "/home/pi")).unwrap()
    }

    #[test]
    fn test_plan_covers_all_subsystems_in_order() {
        let kinds: Vec<_> = plan().subsystems.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, SubsystemKind::ALL.to_vec());
    }

    #[test]
    fn test_access_point_services_are_unmasked() {
        let state = plan();
        let ap = state.subsystem(SubsystemKind::NetworkAccessPoint).unwrap();
        assert!(ap.services.iter().all(|s| s.unmask && s.unit.is_none()));
        let defaults = ConfigSource::Inline("DAEMON_CONF=\"/etc/hostapd/hostapd.conf\"\n".into());
        assert!(ap.configs.iter().any(|c| {
            c.destination == PathBuf::from("/etc/default/hostapd") && c.source == defaults
        }));
    }

    #[test]
    fn test_metrics_store_artifact_url() {
        let state = plan();
        let artifact = state
            .subsystem(SubsystemKind::MetricsStore)
            .and_then(|s| s.artifact.clone())
            .unwrap();
        assert_eq!(
            artifact.download_url,
            concat!(
                "https://github.com/VictoriaMetrics/VictoriaMetrics/releases/download/",
                "v1.115.0/victoria-metrics-linux-arm64-v1.115.0.tar.gz"
            )
        );
        assert_eq!(artifact.install_path, PathBuf::from(VICTORIA_METRICS_BIN));
    }

    #[test]
    fn test_flow_engine_files_belong_to_acting_user() {
        let state = plan();
        let flow = state.subsystem(SubsystemKind::FlowEngine).unwrap();
        assert!(flow.configs.iter().all(|c| c.owner.as_deref() == Some("pi")));

        let flows = flow
            .configs
            .iter()
            .find(|c| c.destination == PathBuf::from("/home/pi/.node-red/flows.json"))
            .unwrap();
        let ConfigSource::Inline(text) = &flows.source else {
            panic!("flows.json should be inline");
        };
        assert!(text.contains("http://localhost:8428/write"));
        assert!(text.contains("v1/devices/me/telemetry"));

        let unit = flow.services[0].unit.as_ref().unwrap().render().unwrap();
        assert!(unit.contains("User=pi\n"));
        assert!(unit.contains("WorkingDirectory=/home/pi/.node-red\n"));
    }

    #[test]
    fn test_dashboard_unit_points_at_rendered_settings() {
        let state = plan();
        let dash = state.subsystem(SubsystemKind::Dashboard).unwrap();
        let unit = dash.services[0].unit.as_ref().unwrap().render().unwrap();
        assert!(unit.contains(
            "ExecStart=/usr/local/bin/sysohub-dashboard \
             --config /home/pi/sysohub/config/dashboard.toml\n"
        ));
    }

    #[test]
    fn test_template_context_has_runtime_section() {
        let ctx = template_context(&config(), &RuntimeContext::new("pi", "/home/pi"));
        assert_eq!(ctx["runtime"]["acting_user"], "pi");
        assert_eq!(ctx["wifi"]["ssid"], "plantomio-ap");
    }

    #[test]
    fn test_shipped_templates_render() {
        use crate::template::{MiniJinjaRenderer, TemplateRenderer};

        let templates = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../templates");
        let renderer = MiniJinjaRenderer::from_dir(&templates);

        let state = plan();
        let mut rendered = 0;
        for spec in state.subsystems.iter().flat_map(|s| s.configs.iter()) {
            if let ConfigSource::Template(id) = &spec.source {
                let text = renderer.render(id, &spec.context).unwrap();
                assert!(!text.contains("{{"), "{id} left a placeholder");
                rendered += 1;
            }
        }
        assert_eq!(rendered, 7);

        let dash = state.subsystem(SubsystemKind::Dashboard).unwrap();
        let text = renderer.render("dashboard.toml.j2", &dash.configs[0].context).unwrap();
        let parsed: toml::Value = toml::from_str(&text).unwrap();
        assert_eq!(parsed["broker"]["username"].as_str(), Some("sensor"));
        assert_eq!(parsed["services"].as_array().map(Vec::len), Some(5));
        assert_eq!(parsed["telemetry"]["metrics"].as_array().map(Vec::len), Some(6));
    }
}
