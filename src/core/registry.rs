//! Registered process set

use std::sync::Mutex;

/// Represents the unique ID of a running process
///
/// On Linux 64 bits, the maximum value for a PID is 4194304, hence u32
pub type Pid = u32;

/// A single watched process
///
/// At most one entry per PID exists in the registry at any time
#[derive(Eq, PartialEq, Debug, Copy, Clone)]
pub struct RegistryEntry {
    pid: Pid,
}

impl RegistryEntry {
    fn new(pid: Pid) -> Self {
        RegistryEntry { pid }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }
}

/// Occupancy transition caused by a registry mutation
#[derive(Eq, PartialEq, Debug, Copy, Clone)]
pub enum OccupancyShift {
    /// The registry went from empty to occupied
    BecameOccupied,
    /// The registry went from occupied to empty
    BecameEmpty,
    /// The registry did not cross the empty boundary
    Unchanged,
}

/// What the sweep visitor decided for an entry
#[derive(Eq, PartialEq, Debug, Copy, Clone)]
pub enum SweepDecision {
    Keep,
    Evict,
}

/// Outcome of one iterate-and-evict pass
#[derive(Debug)]
pub struct SweepOutcome {
    /// PIDs removed during the sweep, in registry order
    pub evicted: Vec<Pid>,
    /// Occupancy observed after the evictions were applied
    pub occupancy: usize,
}

/// Mutex-guarded ordered set of watched processes
///
/// All operations acquire the same exclusive lock for their duration, so no
/// caller can ever observe a partial mutation. Membership checks are O(n),
/// which is acceptable for the small sets this profiler is designed for.
pub struct Registry {
    entries: Mutex<Vec<RegistryEntry>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Inserts a PID, keeping insertion order
    ///
    /// Returns `None` if the PID was already registered (no-op), otherwise
    /// the occupancy shift the insertion caused.
    pub fn insert(&self, pid: Pid) -> Option<OccupancyShift> {
        let mut entries = self.lock_entries();

        if entries.iter().any(|e| e.pid == pid) {
            return None;
        }

        entries.push(RegistryEntry::new(pid));

        match entries.len() {
            1 => Some(OccupancyShift::BecameOccupied),
            _ => Some(OccupancyShift::Unchanged),
        }
    }

    /// Removes a PID
    ///
    /// Returns `None` if the PID was not registered (no-op), otherwise the
    /// occupancy shift the removal caused.
    pub fn remove(&self, pid: Pid) -> Option<OccupancyShift> {
        let mut entries = self.lock_entries();

        let position = entries.iter().position(|e| e.pid == pid)?;
        entries.remove(position);

        match entries.len() {
            0 => Some(OccupancyShift::BecameEmpty),
            _ => Some(OccupancyShift::Unchanged),
        }
    }

    /// Returns a snapshot of the registered PIDs, in insertion order
    ///
    /// The snapshot reflects one atomic read of the set and can be iterated
    /// any number of times.
    pub fn pids(&self) -> Vec<Pid> {
        self.lock_entries().iter().map(|e| e.pid).collect()
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.lock_entries().iter().any(|e| e.pid == pid)
    }

    pub fn occupancy(&self) -> usize {
        self.lock_entries().len()
    }

    /// Walks all entries under a single lock acquisition, evicting the ones
    /// the visitor votes out
    ///
    /// Eviction happens before the lock is released, so a process reported
    /// dead by the visitor is guaranteed to be absent from the registry by
    /// the time this method returns.
    pub fn sweep<F>(&self, mut visit: F) -> SweepOutcome
    where
        F: FnMut(Pid) -> SweepDecision,
    {
        let mut entries = self.lock_entries();

        let mut evicted = Vec::new();
        entries.retain(|entry| match visit(entry.pid) {
            SweepDecision::Keep => true,
            SweepDecision::Evict => {
                evicted.push(entry.pid);
                false
            }
        });

        SweepOutcome {
            evicted,
            occupancy: entries.len(),
        }
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, Vec<RegistryEntry>> {
        self.entries.lock().expect("Registry lock poisoned")
    }
}
