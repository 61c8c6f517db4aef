//! OS abstraction: package, service and host-setting primitives
//!
//! Every decision the reconciler makes goes through [`OsProvider`], so the
//! decision logic can be exercised against an in-memory fake. The production
//! implementation shells out through a [`CommandExecutor`].

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument};

use sysohub_exec::CommandExecutor;
use sysohub_pkg::{AptManager, NpmManager, PackageManager, PackageManagerType};

use crate::error::CoreError;
use crate::service::ServiceState;

/// A package and the manager that owns it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageRef {
    pub manager: PackageManagerType,
    pub name: String,
}

impl PackageRef {
    pub fn apt(name: impl Into<String>) -> Self {
        Self {
            manager: PackageManagerType::Apt,
            name: name.into(),
        }
    }

    pub fn npm(name: impl Into<String>) -> Self {
        Self {
            manager: PackageManagerType::Npm,
            name: name.into(),
        }
    }
}

/// State queries and mutations against the host
#[async_trait]
pub trait OsProvider: Send + Sync {
    async fn is_package_installed(&self, package: &PackageRef) -> Result<bool, CoreError>;
    async fn install_packages(
        &self,
        manager: PackageManagerType,
        packages: &[String],
    ) -> Result<(), CoreError>;
    async fn remove_packages(
        &self,
        manager: PackageManagerType,
        packages: &[String],
    ) -> Result<(), CoreError>;
    /// Refresh and upgrade everything the OS package manager owns
    async fn upgrade_packages(&self) -> Result<(), CoreError>;

    /// Live enabled/running state, never cached
    async fn service_state(&self, name: &str) -> Result<ServiceState, CoreError>;
    async fn enable_service(&self, name: &str) -> Result<(), CoreError>;
    async fn disable_service(&self, name: &str) -> Result<(), CoreError>;
    async fn start_service(&self, name: &str) -> Result<(), CoreError>;
    async fn stop_service(&self, name: &str) -> Result<(), CoreError>;
    async fn restart_service(&self, name: &str) -> Result<(), CoreError>;
    async fn unmask_service(&self, name: &str) -> Result<(), CoreError>;
    /// Make the service manager re-read unit definitions
    async fn reload_units(&self) -> Result<(), CoreError>;

    /// Hand `path` to `owner` and their login group
    async fn set_owner(&self, path: &Path, owner: &str) -> Result<(), CoreError>;

    async fn hostname(&self) -> Result<String, CoreError>;
    async fn set_hostname(&self, hostname: &str) -> Result<(), CoreError>;
    async fn sysctl(&self, key: &str) -> Result<Option<String>, CoreError>;
    async fn set_sysctl(&self, key: &str, value: &str) -> Result<(), CoreError>;

    async fn user_exists(&self, name: &str) -> Result<bool, CoreError>;
    async fn create_system_user(&self, name: &str) -> Result<(), CoreError>;
    async fn remove_user(&self, name: &str) -> Result<(), CoreError>;

    /// Replace plaintext `user:password` lines in a broker password file with hashes
    async fn hash_password_file(&self, path: &Path) -> Result<(), CoreError>;

    async fn reboot(&self) -> Result<(), CoreError>;
}

/// Quote a string for `sh -c`
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn quote_path(path: &Path) -> String {
    quote(&path.to_string_lossy())
}

/// `hosts` with every `127.0.1.1` line naming `hostname`, appending one if absent
#[must_use]
pub fn hosts_with_hostname(hosts: &str, hostname: &str) -> String {
    let entry = format!("127.0.1.1\t{hostname}");
    let mut found = false;
    let mut out = String::with_capacity(hosts.len() + entry.len() + 1);
    for line in hosts.lines() {
        if line.starts_with("127.0.1.1") {
            found = true;
            out.push_str(&entry);
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }
    if !found {
        out.push_str(&entry);
        out.push('\n');
    }
    out
}

/// Atomically replace a root-owned system file, mode 644
fn replace_file(path: &Path, content: &str) -> Result<(), CoreError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("/"));
    let mut file = NamedTempFile::new_in(parent).map_err(|e| CoreError::io(parent, &e))?;
    file.write_all(content.as_bytes())
        .and_then(|()| file.flush())
        .map_err(|e| CoreError::io(file.path(), &e))?;
    fs::set_permissions(file.path(), fs::Permissions::from_mode(0o644))
        .map_err(|e| CoreError::io(file.path(), &e))?;
    file.persist(path).map_err(|e| CoreError::io(path, &e.error))?;
    Ok(())
}

/// Production provider for systemd + apt hosts
pub struct SystemdProvider {
    executor: Arc<dyn CommandExecutor>,
    apt: Arc<dyn PackageManager>,
    npm: Arc<dyn PackageManager>,
    etc_dir: PathBuf,
}

impl SystemdProvider {
    /// Create a provider with apt and npm managers over the same executor
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            apt: Arc::new(AptManager::new(executor.clone())),
            npm: Arc::new(NpmManager::new(executor.clone())),
            executor,
            etc_dir: PathBuf::from("/etc"),
        }
    }

    /// Read and write `hostname`/`hosts` under `etc_dir` instead of `/etc`
    #[must_use]
    pub fn with_etc_dir(mut self, etc_dir: impl Into<PathBuf>) -> Self {
        self.etc_dir = etc_dir.into();
        self
    }

    fn manager(&self, kind: PackageManagerType) -> &Arc<dyn PackageManager> {
        match kind {
            PackageManagerType::Apt => &self.apt,
            PackageManagerType::Npm => &self.npm,
        }
    }

    async fn systemctl(&self, verb: &str, name: &str) -> Result<(), CoreError> {
        self.executor
            .run_checked(&format!("systemctl {verb} {}", quote(name)), true)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl OsProvider for SystemdProvider {
    async fn is_package_installed(&self, package: &PackageRef) -> Result<bool, CoreError> {
        Ok(self.manager(package.manager).is_installed(&package.name).await?)
    }

    #[instrument(skip(self))]
    async fn install_packages(
        &self,
        manager: PackageManagerType,
        packages: &[String],
    ) -> Result<(), CoreError> {
        self.manager(manager).install(packages).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove_packages(
        &self,
        manager: PackageManagerType,
        packages: &[String],
    ) -> Result<(), CoreError> {
        self.manager(manager).remove(packages).await?;
        Ok(())
    }

    async fn upgrade_packages(&self) -> Result<(), CoreError> {
        let result = self.apt.upgrade_all().await?;
        info!(upgraded = result.upgraded_count, "OS packages upgraded");

        if self.npm.is_available().await {
            let result = self.npm.upgrade_all().await?;
            info!(changed = result.changed(), "global npm packages upgraded");
        }
        Ok(())
    }

    async fn service_state(&self, name: &str) -> Result<ServiceState, CoreError> {
        let enabled = self
            .executor
            .run(&format!("systemctl is-enabled {}", quote(name)))
            .await?;
        let active = self
            .executor
            .run(&format!("systemctl is-active {}", quote(name)))
            .await?;

        let state = ServiceState {
            enabled: enabled.stdout_line() == "enabled",
            running: active.stdout_line() == "active",
        };
        debug!(service = %name, %state, "queried service state");
        Ok(state)
    }

    async fn enable_service(&self, name: &str) -> Result<(), CoreError> {
        self.systemctl("enable", name).await
    }

    async fn disable_service(&self, name: &str) -> Result<(), CoreError> {
        self.systemctl("disable", name).await
    }

    async fn start_service(&self, name: &str) -> Result<(), CoreError> {
        self.systemctl("start", name).await
    }

    async fn stop_service(&self, name: &str) -> Result<(), CoreError> {
        self.systemctl("stop", name).await
    }

    async fn restart_service(&self, name: &str) -> Result<(), CoreError> {
        self.systemctl("restart", name).await
    }

    async fn unmask_service(&self, name: &str) -> Result<(), CoreError> {
        self.systemctl("unmask", name).await
    }

    async fn reload_units(&self) -> Result<(), CoreError> {
        self.executor.run_checked("systemctl daemon-reload", true).await?;
        Ok(())
    }

    async fn set_owner(&self, path: &Path, owner: &str) -> Result<(), CoreError> {
        // "user:" selects the user's login group
        let cmd = format!("chown {}: {}", quote(owner), quote_path(path));
        self.executor.run_checked(&cmd, true).await?;
        Ok(())
    }

    async fn hostname(&self) -> Result<String, CoreError> {
        let path = self.etc_dir.join("hostname");
        let content = fs::read_to_string(&path).map_err(|e| CoreError::io(&path, &e))?;
        Ok(content.trim().to_string())
    }

    async fn set_hostname(&self, hostname: &str) -> Result<(), CoreError> {
        replace_file(&self.etc_dir.join("hostname"), &format!("{hostname}\n"))?;

        let hosts_path = self.etc_dir.join("hosts");
        let hosts = match fs::read_to_string(&hosts_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(CoreError::io(&hosts_path, &e)),
        };
        replace_file(&hosts_path, &hosts_with_hostname(&hosts, hostname))?;

        self.executor
            .run_checked(&format!("hostname {}", quote(hostname)), true)
            .await?;
        Ok(())
    }

    async fn sysctl(&self, key: &str) -> Result<Option<String>, CoreError> {
        let result = self.executor.run(&format!("sysctl -n {}", quote(key))).await?;
        Ok(result
            .success()
            .then(|| result.stdout_line().to_string()))
    }

    async fn set_sysctl(&self, key: &str, value: &str) -> Result<(), CoreError> {
        self.executor
            .run_checked(&format!("sysctl -w {}", quote(&format!("{key}={value}"))), true)
            .await?;
        Ok(())
    }

    async fn user_exists(&self, name: &str) -> Result<bool, CoreError> {
        Ok(self
            .executor
            .run(&format!("id -u {}", quote(name)))
            .await?
            .success())
    }

    async fn create_system_user(&self, name: &str) -> Result<(), CoreError> {
        let cmd = format!(
            "useradd --system --no-create-home --shell /usr/sbin/nologin {}",
            quote(name)
        );
        self.executor.run_checked(&cmd, true).await?;
        Ok(())
    }

    async fn remove_user(&self, name: &str) -> Result<(), CoreError> {
        self.executor
            .run_checked(&format!("userdel {}", quote(name)), true)
            .await?;
        Ok(())
    }

    async fn hash_password_file(&self, path: &Path) -> Result<(), CoreError> {
        self.executor
            .run_checked(&format!("mosquitto_passwd -U {}", quote_path(path)), true)
            .await?;
        Ok(())
    }

    async fn reboot(&self) -> Result<(), CoreError> {
        info!("rebooting host");
        self.executor.run_checked("systemctl reboot", true).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use sysohub_exec::{CommandResult, ExecError};

    use super::*;

    /// Executor answering `is-enabled`/`is-active` probes and recording everything
    struct ProbeExecutor {
        answers: Vec<(&'static str, CommandResult)>,
        commands: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CommandExecutor for ProbeExecutor {
        async fn run(&self, cmd: &str) -> Result<CommandResult, ExecError> {
            self.commands.lock().unwrap().push(cmd.to_string());
            Ok(self
                .answers
                .iter()
                .find(|(pattern, _)| cmd.contains(pattern))
                .map(|(_, r)| r.clone())
                .unwrap_or_else(|| CommandResult::new(0, "", "")))
        }

        async fn run_with_timeout(
            &self,
            cmd: &str,
            _timeout: Duration,
        ) -> Result<CommandResult, ExecError> {
            self.run(cmd).await
        }

        fn executor_type(&self) -> &'static str {
            "probe"
        }
    }

    fn provider(
        answers: Vec<(&'static str, CommandResult)>,
    ) -> (SystemdProvider, Arc<ProbeExecutor>) {
        let executor = Arc::new(ProbeExecutor {
            answers,
            commands: Mutex::new(Vec::new()),
        });
        (SystemdProvider::new(executor.clone()), executor)
    }

    #[tokio::test]
    async fn test_service_state_parses_systemctl() {
        let (os, _) = provider(vec![
            ("is-enabled", CommandResult::new(0, "enabled\n", "")),
            ("is-active", CommandResult::new(3, "inactive\n", "")),
        ]);

        let state = os.service_state("mosquitto").await.unwrap();
        assert!(state.enabled);
        assert!(!state.running);
    }

    #[tokio::test]
    async fn test_failed_start_is_command_failed() {
        let (os, _) = provider(vec![(
            "systemctl start",
            CommandResult::new(1, "", "Job for hostapd.service failed."),
        )]);

        let err = os.start_service("hostapd").await.unwrap_err();
        assert!(matches!(err, CoreError::CommandFailed { .. }));
    }

    #[tokio::test]
    async fn test_sysctl_missing_key() {
        let (os, _) = provider(vec![(
            "sysctl -n",
            CommandResult::new(255, "", "sysctl: cannot stat"),
        )]);
        assert_eq!(os.sysctl("net.bogus").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_commands_quote_arguments() {
        let (os, executor) = provider(vec![]);
        os.set_owner(Path::new("/home/pi/my file"), "pi").await.unwrap();

        let commands = executor.commands.lock().unwrap().clone();
        assert_eq!(commands, vec!["chown 'pi': '/home/pi/my file'"]);
    }

    #[test]
    fn test_hosts_line_replaced() {
        let hosts = "127.0.0.1\tlocalhost\n::1\tlocalhost\n127.0.1.1\traspberrypi\n";
        assert_eq!(
            hosts_with_hostname(hosts, "plantomio"),
            "127.0.0.1\tlocalhost\n::1\tlocalhost\n127.0.1.1\tplantomio\n"
        );
    }

    #[test]
    fn test_hosts_line_appended() {
        assert_eq!(
            hosts_with_hostname("127.0.0.1\tlocalhost", "plantomio"),
            "127.0.0.1\tlocalhost\n127.0.1.1\tplantomio\n"
        );
        assert_eq!(hosts_with_hostname("", "gw"), "127.0.1.1\tgw\n");
    }

    #[tokio::test]
    async fn test_set_hostname_rewrites_etc_files() {
        let etc = tempfile::tempdir().unwrap();
        fs::write(etc.path().join("hostname"), "raspberrypi\n").unwrap();
        fs::write(
            etc.path().join("hosts"),
            "127.0.0.1\tlocalhost\n127.0.1.1\traspberrypi\n",
        )
        .unwrap();
        let (os, executor) = provider(vec![]);
        let os = os.with_etc_dir(etc.path());

        os.set_hostname("plantomio").await.unwrap();

        assert_eq!(os.hostname().await.unwrap(), "plantomio");
        let hosts = fs::read_to_string(etc.path().join("hosts")).unwrap();
        assert_eq!(hosts, "127.0.0.1\tlocalhost\n127.0.1.1\tplantomio\n");
        let mode = fs::metadata(etc.path().join("hosts")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
        // only the runtime hostname goes through the shell
        let commands = executor.commands.lock().unwrap().clone();
        assert_eq!(commands, vec!["hostname 'plantomio'"]);
    }

    #[test]
    fn test_quote_escapes_single_quotes() {
        assert_eq!(quote("it's"), r"'it'\''s'");
    }
}
