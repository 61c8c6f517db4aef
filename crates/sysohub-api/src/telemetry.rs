//! Telemetry data types

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Sensor keys accepted by a default store
pub const DEFAULT_METRICS: [&str; 6] = ["temperature", "distance", "pH", "ORP", "TDS", "EC"];

/// A single timestamped sample of one metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TelemetryPoint {
    /// Timestamp as sent by the device (0 when absent)
    pub timestamp: i64,
    pub value: f64,
}

impl TelemetryPoint {
    #[must_use]
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Point-in-time copy of every series in the store, keyed by metric name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct StoreSnapshot(pub BTreeMap<String, Vec<TelemetryPoint>>);

impl StoreSnapshot {
    /// Series for a metric, empty if the metric has never been seen
    pub fn series(&self, metric: &str) -> &[TelemetryPoint] {
        self.0.get(metric).map_or(&[], Vec::as_slice)
    }

    /// Most recent point of a metric
    pub fn latest(&self, metric: &str) -> Option<TelemetryPoint> {
        self.series(metric).last().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One decoded telemetry message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TelemetryReading {
    pub timestamp: i64,
    /// Numeric values keyed by metric name
    pub values: BTreeMap<String, f64>,
    /// The message exactly as the device sent it, including non-metric fields
    #[serde(default)]
    #[schema(value_type = Object)]
    pub raw: serde_json::Value,
}

/// Host resource usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SystemStats {
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_serializes_as_plain_map() {
        let mut series = BTreeMap::new();
        series.insert("pH".to_string(), vec![TelemetryPoint::new(7, 6.5)]);
        let snapshot = StoreSnapshot(series);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "pH": [{ "timestamp": 7, "value": 6.5 }] })
        );
    }

    #[test]
    fn test_snapshot_accessors() {
        let mut series = BTreeMap::new();
        series.insert(
            "EC".to_string(),
            vec![TelemetryPoint::new(1, 1.0), TelemetryPoint::new(2, 2.0)],
        );
        let snapshot = StoreSnapshot(series);

        assert_eq!(snapshot.series("EC").len(), 2);
        assert!(snapshot.series("TDS").is_empty());
        assert_eq!(snapshot.latest("EC"), Some(TelemetryPoint::new(2, 2.0)));
        assert_eq!(snapshot.latest("TDS"), None);
    }
}
