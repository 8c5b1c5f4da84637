//! Metrics source contract, used to query per-process counters

use thiserror::Error;

use crate::core::registry::Pid;

/// Page fault and CPU time counters of a single process
///
/// All values are cumulative since the process started, as accounted by the
/// kernel. They only decrease when the process is replaced by another one
/// recycling its PID.
#[derive(Eq, PartialEq, Debug, Copy, Clone, Default)]
pub struct ProcessCounters {
    /// Minor page faults, served without disk access
    pub minor_faults: u64,
    /// Major page faults, requiring a page load from disk
    pub major_faults: u64,
    /// Clock ticks spent in user mode
    pub user_ticks: u64,
    /// Clock ticks spent in kernel mode
    pub system_ticks: u64,
}

impl ProcessCounters {
    /// Total CPU time of the process, in clock ticks
    pub fn cpu_ticks(&self) -> u64 {
        self.user_ticks + self.system_ticks
    }
}

#[derive(Error, Debug)]
pub enum QueryError {
    /// The process does not exist, or does not exist anymore
    #[error("No process with PID {0}")]
    NotFound(Pid),
    /// The process exists but its counters could not be read this time
    #[error("Could not read counters of process {0}")]
    Unreadable(Pid, #[source] anyhow::Error),
}

/// Types which can return the current counters of a process given its PID
pub trait MetricsSource {
    fn query(&self, pid: Pid) -> Result<ProcessCounters, QueryError>;

    /// Indicates whether `pid` currently refers to a running process
    fn exists(&self, pid: Pid) -> bool {
        !matches!(self.query(pid), Err(QueryError::NotFound(_)))
    }
}


#[cfg(test)]
mod test_process_counters {
    use super::*;

    #[test]
    fn test_cpu_ticks_should_sum_user_and_system_time() {
        let counters = ProcessCounters {
            minor_faults: 0,
            major_faults: 0,
            user_ticks: 13,
            system_ticks: 29,
        };

        assert_eq!(counters.cpu_ticks(), 42);
    }

    #[test]
    fn test_fake_source_should_report_unknown_pid_as_not_found() {
        let source = fakes::FakeSource::new();

        assert!(matches!(source.query(42), Err(QueryError::NotFound(42))));
        assert!(!source.exists(42));
    }

    #[test]
    fn test_fake_source_should_return_configured_counters() {
        let source = fakes::FakeSource::new();
        let counters = ProcessCounters {
            minor_faults: 1,
            major_faults: 2,
            user_ticks: 3,
            system_ticks: 4,
        };
        source.set(42, counters);

        assert_eq!(source.query(42).unwrap(), counters);
        assert!(source.exists(42));
    }
}
