//! Metrics source reading process counters from the /proc directory

use std::fs;
use std::io;
use std::path::PathBuf;

use crate::core::metrics::{MetricsSource, ProcessCounters, QueryError};
use crate::core::registry::Pid;
use crate::procfs::parsers::PidStat;

/// Implementation of `MetricsSource` reading `/proc/[pid]/stat`
///
/// The stat file is opened on each query. With the small process sets this
/// profiler targets, this costs less than tracking open file descriptors of
/// processes that may vanish at any time.
pub struct ProcfsSource {
    proc_dir: PathBuf,
}

impl Default for ProcfsSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcfsSource {
    pub fn new() -> Self {
        ProcfsSource {
            proc_dir: PathBuf::from("/proc"),
        }
    }

    fn stat_path(&self, pid: Pid) -> PathBuf {
        self.proc_dir.join(pid.to_string()).join("stat")
    }
}

impl MetricsSource for ProcfsSource {
    fn query(&self, pid: Pid) -> Result<ProcessCounters, QueryError> {
        let path = self.stat_path(pid);

        let content = fs::read_to_string(&path).map_err(|e| match e.kind() {
            // The stat file disappears with its process
            io::ErrorKind::NotFound => QueryError::NotFound(pid),
            _ => QueryError::Unreadable(pid, e.into()),
        })?;

        let pid_stat = PidStat::parse(&content).map_err(|e| QueryError::Unreadable(pid, e.into()))?;

        Ok(pid_stat.into_counters())
    }
}
