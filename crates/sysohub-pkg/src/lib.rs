//! sysohub-pkg: Package manager abstraction
//!
//! Thin wrappers around the OS package tooling (apt) and the global npm
//! registry used for the flow engine. Both answer "is it installed" without
//! side effects and only mutate on explicit install/remove/upgrade calls.

pub mod apt;
pub mod error;
pub mod npm;
pub mod traits;
pub mod types;

#[cfg(test)]
mod testing;

pub use apt::AptManager;
pub use error::PackageError;
pub use npm::NpmManager;
pub use traits::PackageManager;
pub use types::{PackageManagerType, UpdateResult};
