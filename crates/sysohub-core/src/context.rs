//! Runtime context threaded through every component

use std::path::PathBuf;

use tracing::debug;

use crate::error::CoreError;

/// Environment variable naming the unprivileged user behind `sudo`
pub const ACTING_USER_ENV: &str = "SUDO_USER";

const PASSWD_PATH: &str = "/etc/passwd";
const DEFAULT_UNIT_DIR: &str = "/etc/systemd/system";

/// Immutable paths and identity for one invocation
///
/// Built once at startup. Rendered files, backups and the dashboard process
/// belong to `acting_user` even though the tool itself runs as root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeContext {
    /// Account that owns the installation
    pub acting_user: String,
    /// Home directory of `acting_user`
    pub home_dir: PathBuf,
    /// Installation root (`~/sysohub`)
    pub install_dir: PathBuf,
    /// Gateway configuration document
    pub config_path: PathBuf,
    /// Template directory for the renderer
    pub templates_dir: PathBuf,
    /// Where `backup` writes archives
    pub backups_dir: PathBuf,
    /// Tool-private state (credential stamps)
    pub state_dir: PathBuf,
    /// Service unit directory
    pub unit_dir: PathBuf,
}

impl RuntimeContext {
    /// Derive all paths from the acting user and their home directory
    pub fn new(acting_user: impl Into<String>, home_dir: impl Into<PathBuf>) -> Self {
        let home_dir = home_dir.into();
        let install_dir = home_dir.join("sysohub");
        Self {
            acting_user: acting_user.into(),
            config_path: install_dir.join("config").join("config.toml"),
            templates_dir: install_dir.join("templates"),
            state_dir: install_dir.join("state"),
            backups_dir: home_dir.join("backups"),
            unit_dir: PathBuf::from(DEFAULT_UNIT_DIR),
            install_dir,
            home_dir,
        }
    }

    /// Build the context from the process environment
    ///
    /// # Errors
    /// Returns `CoreError::ConfigInvalid` if the acting user has no home
    /// directory entry in `/etc/passwd`.
    pub fn detect() -> Result<Self, CoreError> {
        let sudo_user = std::env::var(ACTING_USER_ENV).ok();
        let login_user = std::env::var("USER").ok();
        let acting_user = resolve_acting_user(sudo_user.as_deref(), login_user.as_deref());

        let passwd =
            std::fs::read_to_string(PASSWD_PATH).map_err(|e| CoreError::io(PASSWD_PATH, &e))?;
        let home_dir = home_dir_from_passwd(&passwd, &acting_user).ok_or_else(|| {
            CoreError::ConfigInvalid(format!("no passwd entry for user {acting_user}"))
        })?;

        debug!(user = %acting_user, home = %home_dir.display(), "resolved runtime context");

        Ok(Self::new(acting_user, home_dir))
    }

    /// Override the installation root, re-deriving the paths under it
    #[must_use]
    pub fn with_install_dir(mut self, install_dir: impl Into<PathBuf>) -> Self {
        let install_dir = install_dir.into();
        self.config_path = install_dir.join("config").join("config.toml");
        self.templates_dir = install_dir.join("templates");
        self.state_dir = install_dir.join("state");
        self.install_dir = install_dir;
        self
    }

    #[must_use]
    pub fn with_unit_dir(mut self, unit_dir: impl Into<PathBuf>) -> Self {
        self.unit_dir = unit_dir.into();
        self
    }

    #[must_use]
    pub fn with_config_path(mut self, config_path: impl Into<PathBuf>) -> Self {
        self.config_path = config_path.into();
        self
    }

    /// Path of the unit file for `service`
    #[must_use]
    pub fn unit_path(&self, service: &str) -> PathBuf {
        self.unit_dir.join(format!("{service}.service"))
    }
}

/// Pick the acting user: the sudo caller if present, else the login user
#[must_use]
pub fn resolve_acting_user(sudo_user: Option<&str>, login_user: Option<&str>) -> String {
    sudo_user
        .filter(|u| !u.is_empty())
        .or(login_user.filter(|u| !u.is_empty()))
        .unwrap_or("root")
        .to_string()
}

/// Look up a user's home directory in passwd(5) content
#[must_use]
pub fn home_dir_from_passwd(passwd: &str, user: &str) -> Option<PathBuf> {
    passwd.lines().find_map(|line| {
        let fields: Vec<&str> = line.split(':').collect();
        (fields.len() >= 6 && fields[0] == user).then(|| PathBuf::from(fields[5]))
    })
}

/// Fail unless the process runs with an effective uid of 0
///
/// # Errors
/// Returns `CoreError::PermissionDenied` for unprivileged processes.
pub fn ensure_elevated() -> Result<(), CoreError> {
    // SAFETY: geteuid has no preconditions and cannot fail
    let euid = unsafe { libc::geteuid() };
    if euid != 0 {
        return Err(CoreError::PermissionDenied(
            "sysohub must be run with sudo".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PASSWD: &str = "root:x:0:0:root:/root:/bin/bash\n\
                          pi:x:1000:1000:,,,:/home/pi:/bin/bash\n\
                          broken-line\n";

    #[test]
    fn test_resolve_acting_user_prefers_sudo() {
        assert_eq!(resolve_acting_user(Some("pi"), Some("root")), "pi");
        assert_eq!(resolve_acting_user(Some(""), Some("admin")), "admin");
        assert_eq!(resolve_acting_user(None, None), "root");
    }

    #[test]
    fn test_home_dir_from_passwd() {
        assert_eq!(
            home_dir_from_passwd(PASSWD, "pi"),
            Some(PathBuf::from("/home/pi"))
        );
        assert_eq!(home_dir_from_passwd(PASSWD, "ghost"), None);
    }

    #[test]
    fn test_paths_derive_from_home() {
        let ctx = RuntimeContext::new("pi", "/home/pi");
        assert_eq!(ctx.install_dir, PathBuf::from("/home/pi/sysohub"));
        assert_eq!(
            ctx.config_path,
            PathBuf::from("/home/pi/sysohub/config/config.toml")
        );
        assert_eq!(ctx.backups_dir, PathBuf::from("/home/pi/backups"));
        assert_eq!(
            ctx.unit_path("nodered"),
            PathBuf::from("/etc/systemd/system/nodered.service")
        );
    }

    #[test]
    fn test_with_install_dir_rederives() {
        let ctx = RuntimeContext::new("pi", "/home/pi").with_install_dir("/opt/hub");
        assert_eq!(ctx.templates_dir, PathBuf::from("/opt/hub/templates"));
        assert_eq!(ctx.state_dir, PathBuf::from("/opt/hub/state"));
        assert_eq!(ctx.home_dir, PathBuf::from("/home/pi"));
    }
}
