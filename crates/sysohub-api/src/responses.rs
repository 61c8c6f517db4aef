//! Response types for the API

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::telemetry::{StoreSnapshot, SystemStats};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    /// Whether the MQTT ingestion loop currently holds a broker connection
    pub broker_connected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TelemetryResponse {
    pub max_points: usize,
    pub store: StoreSnapshot,
}

/// `systemctl is-active` result per monitored service
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServicesResponse {
    pub services: BTreeMap<String, bool>,
}

/// Everything the landing page renders
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DashboardState {
    pub store: StoreSnapshot,
    pub services: BTreeMap<String, bool>,
    pub system: SystemStats,
    pub broker_connected: bool,
    pub generated_at: DateTime<Utc>,
}
