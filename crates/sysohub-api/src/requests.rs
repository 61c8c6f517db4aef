//! Request types for the API

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Filters for `GET /api/telemetry`
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TelemetryQuery {
    /// Restrict the result to one metric
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
    /// Return at most this many of the newest points per metric
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}
