//! In-memory collaborators for exercising the reconciler without root

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;

use sysohub_pkg::PackageManagerType;

use crate::artifact::Downloader;
use crate::error::CoreError;
use crate::os::{OsProvider, PackageRef};
use crate::plan::DEFAULT_HOSTNAME;
use crate::service::ServiceState;

/// Simulated host state
#[derive(Debug, Clone)]
pub struct FakeHost {
    pub packages: HashSet<PackageRef>,
    pub services: HashMap<String, ServiceState>,
    pub owners: HashMap<PathBuf, String>,
    pub hostname: String,
    pub sysctls: HashMap<String, String>,
    pub users: HashSet<String>,
    pub hashed_files: Vec<PathBuf>,
    pub reboots: usize,
}

impl Default for FakeHost {
    fn default() -> Self {
        Self {
            packages: HashSet::new(),
            services: HashMap::new(),
            owners: HashMap::new(),
            hostname: DEFAULT_HOSTNAME.to_string(),
            sysctls: HashMap::from([("net.ipv4.ip_forward".to_string(), "0".to_string())]),
            users: HashSet::new(),
            hashed_files: Vec::new(),
            reboots: 0,
        }
    }
}

/// [`OsProvider`] over a [`FakeHost`] that logs every mutation
///
/// Mutations are logged as short strings such as `"start mosquitto"` or
/// `"install apt hostapd dnsmasq"`. Any logged string registered with
/// [`FakeOs::fail_on`] fails with `CommandFailed` instead.
#[derive(Debug, Default)]
pub struct FakeOs {
    host: Mutex<FakeHost>,
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashSet<String>>,
}

impl FakeOs {
    fn host(&self) -> MutexGuard<'_, FakeHost> {
        self.host.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Log `call`, or fail if it was registered as failing
    fn record(&self, call: String) -> Result<(), CoreError> {
        let failing = self
            .failures
            .lock()
            .map(|f| f.contains(&call))
            .unwrap_or(false);
        if failing {
            return Err(CoreError::CommandFailed {
                command: call,
                stderr: "injected failure".to_string(),
            });
        }
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
        Ok(())
    }

    pub fn fail_on(&self, call: impl Into<String>) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(call.into());
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.clear();
        }
    }

    /// Mutations logged so far
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Logged mutations starting with `prefix`
    pub fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }

    pub fn snapshot(&self) -> FakeHost {
        self.host().clone()
    }

    pub fn set_service(&self, name: &str, state: ServiceState) {
        self.host().services.insert(name.to_string(), state);
    }

    pub fn service(&self, name: &str) -> ServiceState {
        self.host().services.get(name).copied().unwrap_or_default()
    }

    pub fn add_package(&self, package: PackageRef) {
        self.host().packages.insert(package);
    }

    pub fn owner_of(&self, path: &Path) -> Option<String> {
        self.host().owners.get(path).cloned()
    }

    fn update_service(&self, name: &str, f: impl FnOnce(&mut ServiceState)) {
        let mut host = self.host();
        f(host.services.entry(name.to_string()).or_default());
    }
}

#[async_trait]
impl OsProvider for FakeOs {
    async fn is_package_installed(&self, package: &PackageRef) -> Result<bool, CoreError> {
        Ok(self.host().packages.contains(package))
    }

    async fn install_packages(
        &self,
        manager: PackageManagerType,
        packages: &[String],
    ) -> Result<(), CoreError> {
        self.record(format!("install {manager} {}", packages.join(" ")))?;
        let mut host = self.host();
        for name in packages {
            host.packages.insert(PackageRef {
                manager,
                name: name.clone(),
            });
        }
        Ok(())
    }

    async fn remove_packages(
        &self,
        manager: PackageManagerType,
        packages: &[String],
    ) -> Result<(), CoreError> {
        self.record(format!("remove {manager} {}", packages.join(" ")))?;
        let mut host = self.host();
        for name in packages {
            host.packages.remove(&PackageRef {
                manager,
                name: name.clone(),
            });
        }
        Ok(())
    }

    async fn upgrade_packages(&self) -> Result<(), CoreError> {
        self.record("upgrade".to_string())
    }

    async fn service_state(&self, name: &str) -> Result<ServiceState, CoreError> {
        Ok(self.service(name))
    }

    async fn enable_service(&self, name: &str) -> Result<(), CoreError> {
        self.record(format!("enable {name}"))?;
        self.update_service(name, |s| s.enabled = true);
        Ok(())
    }

    async fn disable_service(&self, name: &str) -> Result<(), CoreError> {
        self.record(format!("disable {name}"))?;
        self.update_service(name, |s| s.enabled = false);
        Ok(())
    }

    async fn start_service(&self, name: &str) -> Result<(), CoreError> {
        self.record(format!("start {name}"))?;
        self.update_service(name, |s| s.running = true);
        Ok(())
    }

    async fn stop_service(&self, name: &str) -> Result<(), CoreError> {
        self.record(format!("stop {name}"))?;
        self.update_service(name, |s| s.running = false);
        Ok(())
    }

    async fn restart_service(&self, name: &str) -> Result<(), CoreError> {
        self.record(format!("restart {name}"))?;
        self.update_service(name, |s| s.running = true);
        Ok(())
    }

    async fn unmask_service(&self, name: &str) -> Result<(), CoreError> {
        self.record(format!("unmask {name}"))
    }

    async fn reload_units(&self) -> Result<(), CoreError> {
        self.record("daemon-reload".to_string())
    }

    async fn set_owner(&self, path: &Path, owner: &str) -> Result<(), CoreError> {
        self.host()
            .owners
            .insert(path.to_path_buf(), owner.to_string());
        Ok(())
    }

    async fn hostname(&self) -> Result<String, CoreError> {
        Ok(self.host().hostname.clone())
    }

    async fn set_hostname(&self, hostname: &str) -> Result<(), CoreError> {
        self.record(format!("hostname {hostname}"))?;
        self.host().hostname = hostname.to_string();
        Ok(())
    }

    async fn sysctl(&self, key: &str) -> Result<Option<String>, CoreError> {
        Ok(self.host().sysctls.get(key).cloned())
    }

    async fn set_sysctl(&self, key: &str, value: &str) -> Result<(), CoreError> {
        self.record(format!("sysctl {key}={value}"))?;
        self.host().sysctls.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn user_exists(&self, name: &str) -> Result<bool, CoreError> {
        Ok(self.host().users.contains(name))
    }

    async fn create_system_user(&self, name: &str) -> Result<(), CoreError> {
        self.record(format!("useradd {name}"))?;
        self.host().users.insert(name.to_string());
        Ok(())
    }

    async fn remove_user(&self, name: &str) -> Result<(), CoreError> {
        self.record(format!("userdel {name}"))?;
        self.host().users.remove(name);
        Ok(())
    }

    async fn hash_password_file(&self, path: &Path) -> Result<(), CoreError> {
        self.record(format!("hash {}", path.display()))?;
        // simulate the in-place rewrite so the file never matches its plaintext
        let hashed = std::fs::read_to_string(path)
            .map_err(|e| CoreError::io(path, &e))?
            .lines()
            .map(|line| match line.split_once(':') {
                Some((user, _)) => format!("{user}:$7$hashed\n"),
                None => format!("{line}\n"),
            })
            .collect::<String>();
        std::fs::write(path, hashed).map_err(|e| CoreError::io(path, &e))?;
        self.host().hashed_files.push(path.to_path_buf());
        Ok(())
    }

    async fn reboot(&self) -> Result<(), CoreError> {
        self.record("reboot".to_string())?;
        self.host().reboots += 1;
        Ok(())
    }
}

/// Downloader serving a fixed body, or failing every request
#[derive(Debug, Default)]
pub struct FakeDownloader {
    body: Option<Vec<u8>>,
    calls: Mutex<Vec<String>>,
}

impl FakeDownloader {
    pub fn serving(body: Vec<u8>) -> Self {
        Self {
            body: Some(body),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn unreachable() -> Self {
        Self::default()
    }

    /// URLs requested so far
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Downloader for FakeDownloader {
    async fn download(&self, url: &str, dest: &Path) -> Result<(), CoreError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(url.to_string());
        }
        let body = self.body.as_ref().ok_or_else(|| CoreError::DownloadFailed {
            url: url.to_string(),
            reason: "connection refused".to_string(),
        })?;
        std::fs::write(dest, body).map_err(|e| CoreError::io(dest, &e))
    }
}

/// Build a gzipped tarball from `(member name, content)` pairs
///
/// # Panics
/// Panics if the in-memory archive cannot be written.
#[must_use]
pub fn tar_gz(members: &[(&str, &[u8])]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, content) in members {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, name, *content)
            .expect("append tar member");
    }
    builder
        .into_inner()
        .and_then(GzEncoder::finish)
        .expect("finish archive")
}
