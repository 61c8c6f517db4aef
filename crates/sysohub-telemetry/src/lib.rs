//! sysohub-telemetry: sensor telemetry ingestion
//!
//! Bounded per-metric series with snapshot broadcast, payload decoding,
//! and broker connection with exponential backoff.

pub mod connector;
pub mod error;
pub mod mqtt;
pub mod reading;
pub mod store;

pub use connector::{BackoffPolicy, Connect, RetryingConnector, Subscription};
pub use error::{Result, TelemetryError};
pub use mqtt::{BrokerSettings, MqttConnection, MqttTarget, topic_matches};
pub use reading::parse_reading;
pub use store::{MAX_POINTS, StoreUpdate, TelemetryStore};
