//! API route handlers

pub mod error;
pub mod system;
pub mod telemetry;
pub mod ws;

pub use error::{ApiError, AppError};
