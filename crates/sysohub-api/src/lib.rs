//! sysohub-api: Shared API types and schemas
//!
//! Wire types exchanged between the dashboard daemon and its observers:
//! telemetry points, WebSocket events, and HTTP responses.

pub mod events;
pub mod requests;
pub mod responses;
pub mod telemetry;
