//! sysohub-exec: Local command execution
//!
//! The only primitive through which the gateway tooling touches the OS package
//! and service managers. Executors never fail on a non-zero exit status; policy
//! about which failures are fatal lives with the caller.

pub mod error;
pub mod local;
pub mod result;
pub mod traits;

pub use error::ExecError;
pub use local::LocalExecutor;
pub use result::CommandResult;
pub use traits::CommandExecutor;
