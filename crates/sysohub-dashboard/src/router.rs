//! HTTP router configuration

use std::sync::Arc;

use axum::{Router, routing::get};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::api::{system, telemetry, ws};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(title = "sysohub dashboard", description = "Gateway telemetry and service status"),
    paths(
        system::index,
        system::health,
        system::services,
        system::dashboard,
        telemetry::telemetry,
        ws::events,
    ),
    tags(
        (name = "system", description = "Host and service status"),
        (name = "telemetry", description = "Sensor telemetry store"),
        (name = "events", description = "Live event stream"),
    )
)]
pub struct ApiDoc;

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Page
        .route("/", get(system::index))
        // System endpoints
        .route("/health", get(system::health))
        .route("/api/services", get(system::services))
        .route("/api/dashboard", get(system::dashboard))
        // Telemetry
        .route("/api/telemetry", get(telemetry::telemetry))
        // WebSocket
        .route("/ws/events", get(ws::events))
        // State
        .with_state(state)
        // Docs
        .merge(Scalar::with_url("/scalar", ApiDoc::openapi()))
}
