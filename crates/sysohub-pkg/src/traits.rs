//! Package manager traits

use async_trait::async_trait;

use crate::error::PackageError;
use crate::types::{PackageManagerType, UpdateResult};

#[async_trait]
pub trait PackageManager: Send + Sync {
    /// Whether `package` is currently installed
    async fn is_installed(&self, package: &str) -> Result<bool, PackageError>;

    /// Install the given packages, refreshing indexes first where the tool needs it
    async fn install(&self, packages: &[String]) -> Result<(), PackageError>;

    /// Remove the given packages together with their configuration
    async fn remove(&self, packages: &[String]) -> Result<(), PackageError>;

    /// Upgrade everything this manager owns
    async fn upgrade_all(&self) -> Result<UpdateResult, PackageError>;

    fn manager_type(&self) -> PackageManagerType;

    async fn is_available(&self) -> bool;
}
