//! Router tests against a real listener

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use sysohub_api::events::WsEvent;
use sysohub_api::responses::{HealthResponse, ServicesResponse, TelemetryResponse};
use sysohub_dashboard::api::ApiError;
use sysohub_dashboard::ingest::run_publisher;
use sysohub_dashboard::system::{ServiceMonitor, SystemSampler};
use sysohub_dashboard::{AppState, DashboardSettings, create_router};
use sysohub_exec::{CommandExecutor, CommandResult, ExecError};
use sysohub_telemetry::parse_reading;

/// Reports only mosquitto as active
struct FakeSystemctl;

#[async_trait]
impl CommandExecutor for FakeSystemctl {
    async fn run(&self, cmd: &str) -> Result<CommandResult, ExecError> {
        if cmd == "systemctl is-active mosquitto" {
            Ok(CommandResult::new(0, "active\n", ""))
        } else {
            Ok(CommandResult::new(3, "inactive\n", ""))
        }
    }

    async fn run_with_timeout(
        &self,
        cmd: &str,
        _timeout: Duration,
    ) -> Result<CommandResult, ExecError> {
        self.run(cmd).await
    }

    fn executor_type(&self) -> &'static str {
        "fake"
    }
}

struct Server {
    addr: SocketAddr,
    state: Arc<AppState>,
    _shutdown: watch::Sender<bool>,
}

impl Server {
    async fn start() -> Self {
        let settings = DashboardSettings::default();
        let monitor = ServiceMonitor::new(
            Arc::new(FakeSystemctl),
            vec!["mosquitto".to_string(), "nodered".to_string()],
        );
        let state = Arc::new(AppState::new(settings, monitor, SystemSampler::new()));

        let (shutdown, shutdown_rx) = watch::channel(false);
        tokio::spawn(run_publisher(state.clone(), shutdown_rx));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = create_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            addr,
            state,
            _shutdown: shutdown,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    fn ingest(&self, payload: &str) {
        self.state
            .store
            .ingest(&parse_reading(payload.as_bytes()).unwrap());
    }
}

#[tokio::test]
async fn test_health_reports_degraded_without_broker() {
    let server = Server::start().await;

    let health: HealthResponse = reqwest::get(server.url("/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(health.status, "degraded");
    assert!(!health.broker_connected);
}

#[tokio::test]
async fn test_telemetry_endpoint() {
    let server = Server::start().await;
    server.ingest(r#"{"timestamp": 1, "pH": 6.9, "temperature": 20}"#);
    server.ingest(r#"{"timestamp": 2, "pH": "7.1"}"#);

    let all: TelemetryResponse = reqwest::get(server.url("/api/telemetry"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(all.max_points, 50);
    assert_eq!(all.store.series("pH").len(), 2);
    assert_eq!(all.store.series("temperature").len(), 1);

    let latest: TelemetryResponse =
        reqwest::get(server.url("/api/telemetry?metric=pH&limit=1"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
    assert_eq!(latest.store.0.len(), 1);
    assert_eq!(latest.store.series("pH")[0].timestamp, 2);
    assert_eq!(latest.store.series("pH")[0].value, 7.1);
}

#[tokio::test]
async fn test_unknown_metric_is_not_found() {
    let server = Server::start().await;

    let response = reqwest::get(server.url("/api/telemetry?metric=humidity"))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    let error: ApiError = response.json().await.unwrap();
    assert_eq!(error.code, "NOT_FOUND");
}

#[tokio::test]
async fn test_services_endpoint() {
    let server = Server::start().await;

    let services: ServicesResponse = reqwest::get(server.url("/api/services"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(services.services["mosquitto"], true);
    assert_eq!(services.services["nodered"], false);
}

#[tokio::test]
async fn test_index_page() {
    let server = Server::start().await;
    server.ingest(r#"{"timestamp": 5, "EC": 1.25}"#);

    let response = reqwest::get(server.url("/")).await.unwrap();
    assert!(response.status().is_success());

    let body = response.text().await.unwrap();
    assert!(body.contains("<h1>sysohub gateway</h1>"));
    assert!(body.contains("mosquitto: active"));
    assert!(body.contains("&quot;EC&quot;"));
}

#[tokio::test]
async fn test_docs_are_served() {
    let server = Server::start().await;

    let response = reqwest::get(server.url("/scalar")).await.unwrap();
    assert!(response.status().is_success());
}

async fn next_event(
    stream: &mut (impl StreamExt<Item = Result<Message, WsError>> + Unpin),
) -> WsEvent {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("event within timeout")
            .expect("stream open")
            .expect("valid frame");
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

#[tokio::test]
async fn test_websocket_streams_updates() {
    let server = Server::start().await;
    server.ingest(r#"{"timestamp": 1, "distance": 12}"#);

    let url = format!("ws://{}/ws/events", server.addr);
    let (mut ws, _) = connect_async(url.as_str()).await.unwrap();

    match next_event(&mut ws).await {
        WsEvent::DataUpdate { store, services, .. } => {
            assert_eq!(store.series("distance").len(), 1);
            assert_eq!(services["mosquitto"], true);
        }
        other => panic!("unexpected initial event: {other:?}"),
    }

    server.ingest(r#"{"timestamp": 2, "distance": 13, "TDS": 400}"#);

    loop {
        match next_event(&mut ws).await {
            WsEvent::DataUpdate { data, store, .. } if data["timestamp"] == 2 => {
                assert_eq!(store.series("distance").len(), 2);
                assert_eq!(store.latest("TDS").unwrap().value, 400.0);
                break;
            }
            WsEvent::DataUpdate { .. } => continue,
            other => panic!("unexpected event: {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_websocket_receives_broker_events() {
    let server = Server::start().await;

    let url = format!("ws://{}/ws/events", server.addr);
    let (mut ws, _) = connect_async(url.as_str()).await.unwrap();
    let _initial = next_event(&mut ws).await;

    server.state.publish(WsEvent::BrokerDisconnected {
        reason: "gave up".to_string(),
    });

    assert_eq!(
        next_event(&mut ws).await,
        WsEvent::BrokerDisconnected {
            reason: "gave up".to_string()
        }
    );
}
