//! Fingerprint-compare-and-replace for managed files

use std::fs;
use std::io::Write;
use std::ops::{BitOr, BitOrAssign};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::desired::{ConfigFileSpec, ConfigSource};
use crate::error::CoreError;
use crate::fingerprint::fingerprint_of_file;
use crate::os::OsProvider;
use crate::template::TemplateRenderer;

/// Mode applied to every materialized file
pub const CONFIG_MODE: u32 = 0o644;

/// Suffix for files moved aside on tear-down
pub const BACKUP_SUFFIX: &str = ".bak";

const DEFAULT_OWNER: &str = "root";

/// Whether a step modified the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Changed(pub bool);

impl Changed {
    pub const NO: Changed = Changed(false);
    pub const YES: Changed = Changed(true);

    #[must_use]
    pub fn is_changed(self) -> bool {
        self.0
    }
}

impl BitOr for Changed {
    type Output = Changed;

    fn bitor(self, rhs: Changed) -> Changed {
        Changed(self.0 || rhs.0)
    }
}

impl BitOrAssign for Changed {
    fn bitor_assign(&mut self, rhs: Changed) {
        self.0 |= rhs.0;
    }
}

/// Writes rendered files only when their content drifted
///
/// The candidate is written to a temporary file next to the destination, so the
/// final rename stays on one filesystem and readers never see a partial file.
#[derive(Clone)]
pub struct ConfigMaterializer {
    renderer: Arc<dyn TemplateRenderer>,
    os: Arc<dyn OsProvider>,
}

impl ConfigMaterializer {
    pub fn new(renderer: Arc<dyn TemplateRenderer>, os: Arc<dyn OsProvider>) -> Self {
        Self { renderer, os }
    }

    /// Render `template_id` and replace `destination` if the output differs
    ///
    /// # Errors
    /// `TemplateError` if rendering fails; `Io` or `CommandFailed` if the
    /// replacement or ownership change fails.
    pub async fn materialize(
        &self,
        template_id: &str,
        destination: &Path,
        context: &Value,
        owner: Option<&str>,
    ) -> Result<Changed, CoreError> {
        let rendered = self.renderer.render(template_id, context)?;
        self.materialize_content(destination, rendered.as_bytes(), owner)
            .await
    }

    /// Replace `destination` with `content` if the fingerprints differ
    ///
    /// # Errors
    /// `Io` on filesystem failures, or whatever the OS provider returns for the
    /// ownership change.
    pub async fn materialize_content(
        &self,
        destination: &Path,
        content: &[u8],
        owner: Option<&str>,
    ) -> Result<Changed, CoreError> {
        let Some(candidate) = write_candidate(destination, content)? else {
            debug!(path = %destination.display(), "file up to date");
            return Ok(Changed::NO);
        };

        candidate
            .persist(destination)
            .map_err(|e| CoreError::io(destination, &e.error))?;
        self.os
            .set_owner(destination, owner.unwrap_or(DEFAULT_OWNER))
            .await?;

        info!(path = %destination.display(), "file updated");
        Ok(Changed::YES)
    }

    /// Materialize one file of a subsystem
    ///
    /// # Errors
    /// See [`ConfigMaterializer::materialize`].
    pub async fn apply(&self, spec: &ConfigFileSpec) -> Result<Changed, CoreError> {
        match &spec.source {
            ConfigSource::Template(id) => {
                self.materialize(id, &spec.destination, &spec.context, spec.owner.as_deref())
                    .await
            }
            ConfigSource::Inline(content) => {
                self.materialize_content(
                    &spec.destination,
                    content.as_bytes(),
                    spec.owner.as_deref(),
                )
                .await
            }
        }
    }
}

/// Write a candidate next to `destination`; `None` if it matches what is on disk
fn write_candidate(destination: &Path, content: &[u8]) -> Result<Option<NamedTempFile>, CoreError> {
    let parent = destination
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| CoreError::io(parent, &e))?;

    let mut candidate = NamedTempFile::new_in(parent).map_err(|e| CoreError::io(parent, &e))?;
    candidate
        .write_all(content)
        .and_then(|()| candidate.flush())
        .map_err(|e| CoreError::io(candidate.path(), &e))?;

    let new =
        fingerprint_of_file(candidate.path()).map_err(|e| CoreError::io(candidate.path(), &e))?;
    let current = fingerprint_of_file(destination).map_err(|e| CoreError::io(destination, &e))?;
    if new.is_some() && new == current {
        return Ok(None);
    }

    fs::set_permissions(candidate.path(), fs::Permissions::from_mode(CONFIG_MODE))
        .map_err(|e| CoreError::io(candidate.path(), &e))?;
    Ok(Some(candidate))
}

/// Path a file is moved to on tear-down
#[must_use]
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Rename `path` to its backup name; returns the new path if the file existed
///
/// # Errors
/// Returns `Io` if the rename fails.
pub fn move_aside(path: &Path) -> Result<Option<PathBuf>, CoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let target = backup_path(path);
    fs::rename(path, &target).map_err(|e| CoreError::io(path, &e))?;
    info!(from = %path.display(), to = %target.display(), "moved file aside");
    Ok(Some(target))
}
