//! WebSocket event types

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::telemetry::{StoreSnapshot, SystemStats};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsEvent {
    /// Sent after every ingested reading
    DataUpdate {
        /// Latest raw reading as published by the device
        #[schema(value_type = Object)]
        data: serde_json::Value,
        store: StoreSnapshot,
        services: BTreeMap<String, bool>,
        system: SystemStats,
    },
    BrokerConnected {
        broker: String,
    },
    BrokerDisconnected {
        reason: String,
    },
}
