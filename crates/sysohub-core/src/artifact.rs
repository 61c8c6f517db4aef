//! Versioned binary artifacts fetched from release archives
//!
//! An artifact counts as installed when its install path exists and is
//! executable. The content is not re-verified once the binary is present.

use std::fs::{self, File};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use tar::Archive;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::CoreError;
use crate::materialize::Changed;

const EXECUTABLE_MODE: u32 = 0o755;
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// A release archive and the binary it should yield
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    pub download_url: String,
    /// Acceptable member file names, in order of preference
    pub expected_member_names: Vec<String>,
    pub install_path: PathBuf,
}

impl ArtifactDescriptor {
    /// Whether the install path holds an executable file
    #[must_use]
    pub fn is_installed(&self) -> bool {
        fs::metadata(&self.install_path)
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
}

/// Fetches a URL into a local file
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Download `url` to `dest`
    ///
    /// # Errors
    /// Returns `DownloadFailed` on network or HTTP errors.
    async fn download(&self, url: &str, dest: &Path) -> Result<(), CoreError>;
}

/// HTTP(S) downloader streaming the body to disk
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    /// # Errors
    /// Returns `DownloadFailed` if the HTTP client cannot be built.
    pub fn new() -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .map_err(|e| CoreError::DownloadFailed {
                url: String::new(),
                reason: e.to_string(),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, url: &str, dest: &Path) -> Result<(), CoreError> {
        let failed = |reason: String| CoreError::DownloadFailed {
            url: url.to_string(),
            reason,
        };

        info!(url = %url, "downloading artifact");
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| failed(e.to_string()))?;

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| CoreError::io(dest, &e))?;
        while let Some(chunk) = response.chunk().await.map_err(|e| failed(e.to_string()))? {
            file.write_all(&chunk)
                .await
                .map_err(|e| CoreError::io(dest, &e))?;
        }
        file.flush().await.map_err(|e| CoreError::io(dest, &e))?;
        Ok(())
    }
}

/// Installs release artifacts idempotently
#[derive(Clone)]
pub struct ArtifactFetcher {
    downloader: Arc<dyn Downloader>,
}

impl ArtifactFetcher {
    pub fn new(downloader: Arc<dyn Downloader>) -> Self {
        Self { downloader }
    }

    /// Download, verify and install the artifact unless it is already present
    ///
    /// Not safe against concurrent calls for the same install path.
    ///
    /// # Errors
    /// `DownloadFailed`, `UnexpectedArtifact` or `ExtractionFailed`.
    pub async fn ensure_installed(
        &self,
        descriptor: &ArtifactDescriptor,
    ) -> Result<Changed, CoreError> {
        if descriptor.is_installed() {
            debug!(
                path = %descriptor.install_path.display(),
                "artifact present, skipping download"
            );
            return Ok(Changed::NO);
        }

        let staging = tempfile::Builder::new()
            .prefix("sysohub-artifact")
            .tempdir()
            .map_err(|e| CoreError::io(std::env::temp_dir(), &e))?;
        let archive_path = staging.path().join("artifact.tar.gz");

        self.downloader
            .download(&descriptor.download_url, &archive_path)
            .await?;

        let size = fs::metadata(&archive_path).map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            return Err(CoreError::DownloadFailed {
                url: descriptor.download_url.clone(),
                reason: "downloaded file is missing or empty".to_string(),
            });
        }

        let descriptor = descriptor.clone();
        tokio::task::spawn_blocking(move || install_from_archive(&archive_path, &descriptor))
            .await
            .map_err(|e| CoreError::Exec(e.to_string()))??;

        // staging directory and download are removed on drop
        drop(staging);
        Ok(Changed::YES)
    }

    /// Delete the installed binary; returns whether it existed
    ///
    /// # Errors
    /// Returns `Io` if the file exists but cannot be removed.
    pub fn remove(&self, descriptor: &ArtifactDescriptor) -> Result<bool, CoreError> {
        match fs::remove_file(&descriptor.install_path) {
            Ok(()) => {
                info!(path = %descriptor.install_path.display(), "artifact removed");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CoreError::io(&descriptor.install_path, &e)),
        }
    }
}

fn open_archive(path: &Path) -> Result<Archive<GzDecoder<File>>, CoreError> {
    let file = File::open(path).map_err(|e| CoreError::io(path, &e))?;
    Ok(Archive::new(GzDecoder::new(file)))
}

fn member_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

/// Find the first expected member in the archive listing
fn find_member(archive_path: &Path, descriptor: &ArtifactDescriptor) -> Result<PathBuf, CoreError> {
    let unreadable = |e: std::io::Error| CoreError::DownloadFailed {
        url: descriptor.download_url.clone(),
        reason: format!("not a readable archive: {e}"),
    };

    let mut archive = open_archive(archive_path)?;
    let mut members = Vec::new();
    for entry in archive.entries().map_err(unreadable)? {
        let entry = entry.map_err(unreadable)?;
        let path = entry.path().map_err(unreadable)?.into_owned();
        members.push(path);
    }

    descriptor
        .expected_member_names
        .iter()
        .find_map(|expected| {
            members
                .iter()
                .find(|m| member_name(m).as_deref() == Some(expected.as_str()))
                .cloned()
        })
        .ok_or_else(|| CoreError::UnexpectedArtifact {
            url: descriptor.download_url.clone(),
            expected: descriptor.expected_member_names.clone(),
        })
}

fn install_from_archive(
    archive_path: &Path,
    descriptor: &ArtifactDescriptor,
) -> Result<(), CoreError> {
    let install_path = &descriptor.install_path;
    let extraction_failed = |reason: String| CoreError::ExtractionFailed {
        path: install_path.clone(),
        reason,
    };

    let member = find_member(archive_path, descriptor)?;
    let parent = install_path
        .parent()
        .ok_or_else(|| extraction_failed("install path has no parent".to_string()))?;
    fs::create_dir_all(parent).map_err(|e| CoreError::io(parent, &e))?;

    let name = member_name(&member)
        .ok_or_else(|| extraction_failed("member has no name".to_string()))?;
    let extracted = parent.join(&name);

    let mut archive = open_archive(archive_path)?;
    let entries = archive.entries().map_err(|e| extraction_failed(e.to_string()))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| extraction_failed(e.to_string()))?;
        let is_member = entry.path().map(|p| p == member.as_path()).unwrap_or(false);
        if is_member {
            entry
                .unpack(&extracted)
                .map_err(|e| extraction_failed(e.to_string()))?;
            break;
        }
    }

    if extracted != *install_path && extracted.exists() {
        debug!(
            from = %extracted.display(),
            to = %install_path.display(),
            "renaming artifact member"
        );
        fs::rename(&extracted, install_path).map_err(|e| CoreError::io(&extracted, &e))?;
    }
    if !install_path.exists() {
        return Err(extraction_failed("member was not extracted".to_string()));
    }

    fs::set_permissions(install_path, fs::Permissions::from_mode(EXECUTABLE_MODE))
        .map_err(|e| CoreError::io(install_path, &e))?;
    info!(path = %install_path.display(), "artifact installed");
    Ok(())
}
