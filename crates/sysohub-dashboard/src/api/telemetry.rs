//! Telemetry store queries

use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
};

use sysohub_api::requests::TelemetryQuery;
use sysohub_api::responses::TelemetryResponse;
use sysohub_api::telemetry::StoreSnapshot;

use crate::api::AppError;
use crate::state::AppState;

/// Current contents of the telemetry store
#[utoipa::path(
    get,
    path = "/api/telemetry",
    tag = "telemetry",
    params(TelemetryQuery),
    responses(
        (status = 200, description = "Store snapshot", body = TelemetryResponse),
        (status = 404, description = "Metric is not collected", body = crate::api::ApiError)
    )
)]
pub async fn telemetry(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TelemetryQuery>,
) -> Result<Json<TelemetryResponse>, AppError> {
    if let Some(metric) = &query.metric
        && !state.store.is_known(metric)
    {
        return Err(AppError::not_found(format!("metric not collected: {metric}")));
    }

    let StoreSnapshot(mut series) = state.store.snapshot();
    if let Some(metric) = &query.metric {
        series.retain(|key, _| key == metric);
    }
    if let Some(limit) = query.limit {
        for points in series.values_mut() {
            let excess = points.len().saturating_sub(limit);
            points.drain(..excess);
        }
    }

    Ok(Json(TelemetryResponse {
        max_points: state.store.max_points(),
        store: StoreSnapshot(series),
    }))
}
