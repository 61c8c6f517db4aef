//! Decoding of device telemetry payloads
//!
//! Devices publish flat JSON objects such as
//! `{"timestamp": 1700000000, "temperature": 21.5, "pH": "6.8"}`.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::debug;

use sysohub_api::telemetry::TelemetryReading;

use crate::error::{Result, TelemetryError};

const TIMESTAMP_KEY: &str = "timestamp";

/// Decode a raw payload into a reading
///
/// Numbers and numeric strings are accepted as values; other fields are
/// left out of `values` but kept in `raw`. A missing or non-numeric
/// `timestamp` reads as 0.
///
/// # Errors
/// Returns `InvalidPayload` if the payload is not a JSON object.
pub fn parse_reading(payload: &[u8]) -> Result<TelemetryReading> {
    let value: Value = serde_json::from_slice(payload)
        .map_err(|e| TelemetryError::InvalidPayload(e.to_string()))?;

    let Value::Object(fields) = value else {
        return Err(TelemetryError::InvalidPayload(
            "expected a JSON object".to_string(),
        ));
    };

    let mut reading = from_fields(&fields);
    reading.raw = Value::Object(fields);
    Ok(reading)
}

fn from_fields(fields: &Map<String, Value>) -> TelemetryReading {
    let mut timestamp = 0;
    let mut values = BTreeMap::new();

    for (key, field) in fields {
        if key == TIMESTAMP_KEY {
            timestamp = as_number(field).map_or(0, |ts| ts as i64);
            continue;
        }
        match as_number(field) {
            Some(number) => {
                values.insert(key.clone(), number);
            }
            None => debug!(key = %key, value = %field, "ignoring non-numeric field"),
        }
    }

    TelemetryReading {
        timestamp,
        values,
        raw: Value::Null,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numbers_and_numeric_strings() {
        let reading =
            parse_reading(br#"{"timestamp": 42, "temperature": 21.5, "pH": "6.8", "EC": 3}"#)
                .unwrap();

        assert_eq!(reading.timestamp, 42);
        assert_eq!(reading.values["temperature"], 21.5);
        assert_eq!(reading.values["pH"], 6.8);
        assert_eq!(reading.values["EC"], 3.0);
    }

    #[test]
    fn test_missing_timestamp_is_zero() {
        let reading = parse_reading(br#"{"distance": 10}"#).unwrap();
        assert_eq!(reading.timestamp, 0);
        assert_eq!(reading.values.len(), 1);
    }

    #[test]
    fn test_string_timestamp() {
        let reading = parse_reading(br#"{"timestamp": "1700000000", "TDS": 1}"#).unwrap();
        assert_eq!(reading.timestamp, 1_700_000_000);
    }

    #[test]
    fn test_non_numeric_fields_dropped() {
        let reading =
            parse_reading(br#"{"ORP": "high", "device": {"id": 1}, "temperature": 20}"#).unwrap();
        assert_eq!(reading.values.keys().collect::<Vec<_>>(), vec!["temperature"]);
    }

    #[test]
    fn test_raw_message_kept() {
        let reading =
            parse_reading(br#"{"timestamp": 9, "pH": "6.8", "device": "n1"}"#).unwrap();

        assert_eq!(reading.values.len(), 1);
        assert_eq!(
            reading.raw,
            serde_json::json!({ "timestamp": 9, "pH": "6.8", "device": "n1" })
        );
    }

    #[test]
    fn test_rejects_non_object() {
        assert!(matches!(
            parse_reading(b"[1, 2, 3]"),
            Err(TelemetryError::InvalidPayload(_))
        ));
        assert!(matches!(
            parse_reading(b"not json"),
            Err(TelemetryError::InvalidPayload(_))
        ));
    }
}
