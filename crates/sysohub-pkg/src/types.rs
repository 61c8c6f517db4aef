//! Type definitions for package management

use serde::{Deserialize, Serialize};

/// Result of an upgrade operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateResult {
    /// Number of packages upgraded
    pub upgraded_count: u32,
    /// Number of packages newly installed
    pub new_count: u32,
    /// Number of packages removed
    pub removed_count: u32,
}

impl UpdateResult {
    /// Create a result with only an upgrade count
    #[must_use]
    pub fn upgraded(count: u32) -> Self {
        Self {
            upgraded_count: count,
            ..Self::default()
        }
    }

    /// Whether the operation touched anything
    #[must_use]
    pub fn changed(&self) -> bool {
        self.upgraded_count + self.new_count + self.removed_count > 0
    }
}

/// Package manager type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageManagerType {
    /// APT (Debian/Raspberry Pi OS)
    Apt,
    /// Global npm packages
    Npm,
}

impl std::fmt::Display for PackageManagerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PackageManagerType::Apt => write!(f, "apt"),
            PackageManagerType::Npm => write!(f, "npm"),
        }
    }
}
