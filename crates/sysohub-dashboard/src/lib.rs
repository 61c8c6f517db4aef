//! sysohub-dashboard: gateway dashboard daemon
//!
//! Subscribes to sensor telemetry on the local broker, keeps a bounded
//! history per metric, and serves it over HTTP and a WebSocket event
//! stream alongside service and host status.

pub mod api;
pub mod config;
pub mod ingest;
pub mod page;
pub mod router;
pub mod state;
pub mod system;

pub use config::DashboardSettings;
pub use router::create_router;
pub use state::AppState;
