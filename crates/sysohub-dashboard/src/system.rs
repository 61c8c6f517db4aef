//! Host status probes: service liveness and resource usage

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, warn};

use sysohub_api::telemetry::SystemStats;
use sysohub_exec::CommandExecutor;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Reports whether each monitored unit is active
#[derive(Clone)]
pub struct ServiceMonitor {
    executor: Arc<dyn CommandExecutor>,
    services: Vec<String>,
}

impl ServiceMonitor {
    pub fn new(executor: Arc<dyn CommandExecutor>, services: Vec<String>) -> Self {
        Self { executor, services }
    }

    pub fn services(&self) -> &[String] {
        &self.services
    }

    /// Query `systemctl is-active` for every service; errors read as inactive
    pub async fn status(&self) -> BTreeMap<String, bool> {
        let mut status = BTreeMap::new();
        for service in &self.services {
            let cmd = format!("systemctl is-active {service}");
            let active = match self.executor.run_with_timeout(&cmd, PROBE_TIMEOUT).await {
                Ok(result) => result.stdout.trim() == "active",
                Err(e) => {
                    warn!(service = %service, error = %e, "service probe failed");
                    false
                }
            };
            status.insert(service.clone(), active);
        }
        status
    }
}

/// Aggregate CPU jiffies from the first line of `/proc/stat`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub idle: u64,
    pub total: u64,
}

impl CpuTimes {
    pub fn new(idle: u64, total: u64) -> Self {
        Self { idle, total }
    }

    /// Parse the `cpu` line of `/proc/stat`
    pub fn parse(stat: &str) -> Option<Self> {
        let line = stat.lines().find(|l| l.starts_with("cpu "))?;
        let fields: Vec<u64> = line
            .split_whitespace()
            .skip(1)
            .filter_map(|f| f.parse().ok())
            .collect();
        if fields.len() < 4 {
            return None;
        }
        // idle + iowait
        let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
        // guest time is already counted in user/nice
        let total = fields.iter().take(8).sum();
        Some(Self { idle, total })
    }

    /// Busy percentage between two samples
    pub fn busy_since(&self, earlier: &CpuTimes) -> f64 {
        let total = self.total.saturating_sub(earlier.total);
        if total == 0 {
            return 0.0;
        }
        let idle = self.idle.saturating_sub(earlier.idle);
        percent(total.saturating_sub(idle), total)
    }
}

/// Used memory percentage from `/proc/meminfo`
pub fn memory_percent(meminfo: &str) -> Option<f64> {
    let field = |name: &str| {
        meminfo
            .lines()
            .find(|l| l.starts_with(name))
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|v| v.parse::<u64>().ok())
    };
    let total = field("MemTotal:")?;
    let available = field("MemAvailable:")?;
    if total == 0 {
        return None;
    }
    Some(percent(total.saturating_sub(available), total))
}

fn percent(part: u64, whole: u64) -> f64 {
    let value = part as f64 * 100.0 / whole as f64;
    (value * 10.0).round() / 10.0
}

/// Samples host CPU and memory usage
///
/// CPU usage is measured between consecutive calls; the first call
/// measures since boot.
#[derive(Debug)]
pub struct SystemSampler {
    proc_dir: PathBuf,
    previous: Mutex<Option<CpuTimes>>,
}

impl SystemSampler {
    pub fn new() -> Self {
        Self::with_proc_dir("/proc")
    }

    pub fn with_proc_dir(proc_dir: impl Into<PathBuf>) -> Self {
        Self {
            proc_dir: proc_dir.into(),
            previous: Mutex::new(None),
        }
    }

    pub fn sample(&self) -> SystemStats {
        SystemStats {
            cpu_percent: self.cpu_percent().unwrap_or(0.0),
            memory_percent: self.read("meminfo").as_deref().and_then(memory_percent).unwrap_or(0.0),
        }
    }

    fn cpu_percent(&self) -> Option<f64> {
        let current = CpuTimes::parse(&self.read("stat")?)?;
        let mut previous = self.previous.lock().unwrap_or_else(PoisonError::into_inner);
        let baseline = previous.replace(current).unwrap_or_default();
        Some(current.busy_since(&baseline))
    }

    fn read(&self, name: &str) -> Option<String> {
        let path = self.proc_dir.join(name);
        match std::fs::read_to_string(&path) {
            Ok(content) => Some(content),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "cannot read proc file");
                None
            }
        }
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}
