//! Typed systemd service unit definitions

use std::fmt;
use std::path::PathBuf;

use crate::error::CoreError;

/// `Restart=` policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestartPolicy {
    #[default]
    Always,
    OnFailure,
    No,
}

impl fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartPolicy::Always => write!(f, "always"),
            RestartPolicy::OnFailure => write!(f, "on-failure"),
            RestartPolicy::No => write!(f, "no"),
        }
    }
}

/// A service unit the reconciler writes to the unit directory
///
/// Built with chained setters and turned into unit-file text by
/// [`ServiceUnitSpec::render`]. Rendering is deterministic, so the output can be
/// fingerprinted against the installed unit.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceUnitSpec {
    pub description: String,
    pub after: Vec<String>,
    pub user: Option<String>,
    pub group: Option<String>,
    pub environment: Vec<(String, String)>,
    /// Program followed by its arguments
    pub exec_start: Vec<String>,
    pub working_directory: Option<PathBuf>,
    pub restart: RestartPolicy,
    pub kill_signal: Option<String>,
    pub wanted_by: String,
}

impl ServiceUnitSpec {
    /// Unit started after the network with `Restart=always`
    pub fn new<I, S>(description: impl Into<String>, exec_start: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            description: description.into(),
            after: vec!["network.target".to_string()],
            user: None,
            group: None,
            environment: Vec::new(),
            exec_start: exec_start.into_iter().map(Into::into).collect(),
            working_directory: None,
            restart: RestartPolicy::default(),
            kill_signal: None,
            wanted_by: "multi-user.target".to_string(),
        }
    }

    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    #[must_use]
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    #[must_use]
    pub fn restart(mut self, policy: RestartPolicy) -> Self {
        self.restart = policy;
        self
    }

    #[must_use]
    pub fn kill_signal(mut self, signal: impl Into<String>) -> Self {
        self.kill_signal = Some(signal.into());
        self
    }

    /// Check the structure systemd relies on
    ///
    /// # Errors
    /// Returns `ConfigInvalid` for an empty or relative `ExecStart`, or a
    /// description containing a newline.
    pub fn validate(&self) -> Result<(), CoreError> {
        let program = self
            .exec_start
            .first()
            .ok_or_else(|| CoreError::ConfigInvalid("unit has no ExecStart".to_string()))?;
        if !program.starts_with('/') {
            return Err(CoreError::ConfigInvalid(format!(
                "ExecStart program must be absolute: {program}"
            )));
        }
        if self.description.contains('\n') {
            return Err(CoreError::ConfigInvalid(
                "unit description spans lines".to_string(),
            ));
        }
        Ok(())
    }

    /// Render unit-file text
    ///
    /// # Errors
    /// Propagates [`ServiceUnitSpec::validate`] failures.
    pub fn render(&self) -> Result<String, CoreError> {
        self.validate()?;
        Ok(self.to_string())
    }
}

/// Unit-file text; call [`ServiceUnitSpec::render`] to validate first
impl fmt::Display for ServiceUnitSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[Unit]")?;
        writeln!(f, "Description={}", self.description)?;
        if !self.after.is_empty() {
            writeln!(f, "After={}", self.after.join(" "))?;
        }

        writeln!(f, "\n[Service]")?;
        if let Some(user) = &self.user {
            writeln!(f, "User={user}")?;
        }
        if let Some(group) = &self.group {
            writeln!(f, "Group={group}")?;
        }
        for (key, value) in &self.environment {
            writeln!(f, "Environment=\"{key}={value}\"")?;
        }
        let exec: Vec<String> = self.exec_start.iter().map(|a| quote_arg(a)).collect();
        writeln!(f, "ExecStart={}", exec.join(" "))?;
        if let Some(dir) = &self.working_directory {
            writeln!(f, "WorkingDirectory={}", dir.display())?;
        }
        writeln!(f, "Restart={}", self.restart)?;
        if let Some(signal) = &self.kill_signal {
            writeln!(f, "KillSignal={signal}")?;
        }

        writeln!(f, "\n[Install]")?;
        writeln!(f, "WantedBy={}", self.wanted_by)
    }
}

fn quote_arg(arg: &str) -> String {
    if arg.contains(char::is_whitespace) || arg.contains('"') {
        format!("\"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        arg.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_full_unit() {
        let unit = ServiceUnitSpec::new(
            "Node-RED",
            ["/usr/bin/env", "node-red", "--max-old-space-size=512", "-v"],
        )
        .user("pi")
        .env("NODE_OPTIONS", "--max_old_space_size=512")
        .working_directory("/home/pi/.node-red")
        .restart(RestartPolicy::OnFailure)
        .kill_signal("SIGINT");

        let expected = "[Unit]\n\
                        Description=Node-RED\n\
                        After=network.target\n\
                        \n\
                        [Service]\n\
                        User=pi\n\
                        Environment=\"NODE_OPTIONS=--max_old_space_size=512\"\n\
                        ExecStart=/usr/bin/env node-red --max-old-space-size=512 -v\n\
                        WorkingDirectory=/home/pi/.node-red\n\
                        Restart=on-failure\n\
                        KillSignal=SIGINT\n\
                        \n\
                        [Install]\n\
                        WantedBy=multi-user.target\n";
        assert_eq!(unit.render().unwrap(), expected);
    }

    #[test]
    fn test_render_minimal_unit() {
        let unit = ServiceUnitSpec::new("VictoriaMetrics", ["/usr/local/bin/victoria-metrics"])
            .restart(RestartPolicy::Always);

        assert_eq!(
            unit.render().unwrap(),
            "[Unit]\nDescription=VictoriaMetrics\nAfter=network.target\n\n\
             [Service]\nExecStart=/usr/local/bin/victoria-metrics\nRestart=always\n\n\
             [Install]\nWantedBy=multi-user.target\n"
        );
    }

    #[test]
    fn test_relative_program_rejected() {
        let unit = ServiceUnitSpec::new("bad", ["victoria-metrics"]);
        assert!(matches!(unit.render(), Err(CoreError::ConfigInvalid(_))));
    }

    #[test]
    fn test_empty_exec_rejected() {
        let unit = ServiceUnitSpec::new("bad", Vec::<String>::new());
        assert!(unit.validate().is_err());
    }

    #[test]
    fn test_arguments_with_spaces_are_quoted() {
        let unit = ServiceUnitSpec::new("x", ["/usr/local/bin/x", "--name=a b"]);
        let text = unit.render().unwrap();
        assert!(text.contains("ExecStart=/usr/local/bin/x \"--name=a b\"\n"));
    }
}
