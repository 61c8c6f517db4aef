//! Landing page, health, and service status

use std::sync::Arc;

use axum::{Json, extract::State, response::Html, response::IntoResponse};

use sysohub_api::responses::{DashboardState, HealthResponse, ServicesResponse};

use crate::api::AppError;
use crate::page::render_index;
use crate::state::AppState;

/// Landing page with the current store, services, and host usage
#[utoipa::path(
    get,
    path = "/",
    tag = "system",
    responses(
        (status = 200, description = "Dashboard page", content_type = "text/html", body = String),
        (status = 500, description = "Page rendering failed", body = crate::api::ApiError)
    )
)]
pub async fn index(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let dashboard = state.dashboard().await;
    let html = render_index(&dashboard)
        .map_err(|e| AppError::internal(format!("failed to render page: {e}")))?;
    Ok(Html(html))
}

/// Liveness plus broker connectivity
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    responses((status = 200, description = "Daemon is up", body = HealthResponse))
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let status = if state.broker_connected() {
        "ok"
    } else {
        "degraded"
    };
    Json(HealthResponse {
        status: status.to_string(),
        broker_connected: state.broker_connected(),
    })
}

/// `systemctl is-active` for every monitored service, queried now
#[utoipa::path(
    get,
    path = "/api/services",
    tag = "system",
    responses((status = 200, description = "Service liveness", body = ServicesResponse))
)]
pub async fn services(State(state): State<Arc<AppState>>) -> Json<ServicesResponse> {
    Json(ServicesResponse {
        services: state.monitor.status().await,
    })
}

/// Everything the landing page shows, as JSON
#[utoipa::path(
    get,
    path = "/api/dashboard",
    tag = "system",
    responses((status = 200, description = "Dashboard state", body = DashboardState))
)]
pub async fn dashboard(State(state): State<Arc<AppState>>) -> Json<DashboardState> {
    Json(state.dashboard().await)
}
