//! Advisory memory sampling for long batch runs.

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Samples the resident set size of the current process.
pub struct MemorySampler {
    system: System,
    pid: Option<Pid>,
}

impl MemorySampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: sysinfo::get_current_pid().ok(),
        }
    }

    /// Resident memory in MiB, or `None` when the platform cannot report it.
    pub fn resident_mb(&mut self) -> Option<f64> {
        let pid = self.pid?;
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::new().with_memory(),
        );
        self.system
            .process(pid)
            .map(|process| process.memory() as f64 / (1024.0 * 1024.0))
    }

    /// A warning line when resident memory exceeds `limit_mb`.
    pub fn check_limit(&mut self, limit_mb: u64) -> Option<String> {
        let used = self.resident_mb()?;
        (used > limit_mb as f64)
            .then(|| format!("Memory limit exceeded ({used:.1}MB used, limit {limit_mb}MB)"))
    }
}

impl Default for MemorySampler {
    fn default() -> Self {
        Self::new()
    }
}
