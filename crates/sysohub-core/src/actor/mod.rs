//! Actor implementations

pub mod reconciler;

pub use reconciler::{ReconcilerActor, ReconcilerArgs};
