//! Circular buffer of aggregate samples, backed by shared memory

use std::mem;
use std::slice;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::core::Error;
use crate::shm::ShmRegion;

/// Default byte budget of the sample buffer: 128 pages of 4 KiB
pub const DEFAULT_BUFFER_BYTES: usize = 128 * 4096;

/// One recorded snapshot of the summed counters of all registered processes
///
/// The fault and CPU fields are running sums accumulated over the whole
/// lifetime of the profiler, not per-tick deltas. Consumers derive rates by
/// subtracting consecutive samples.
#[repr(C)]
#[derive(Eq, PartialEq, Debug, Copy, Clone, Default)]
pub struct AggregateSample {
    /// Milliseconds elapsed since the profiler started
    pub timestamp_ms: u64,
    pub minor_faults: u64,
    pub major_faults: u64,
    /// User plus system clock ticks
    pub cpu_ticks: u64,
}

impl AggregateSample {
    /// Counter increments between `earlier` and this sample
    ///
    /// This is how consumers turn the recorded running sums into rates.
    pub fn delta_from(&self, earlier: &AggregateSample) -> AggregateSample {
        AggregateSample {
            timestamp_ms: self.timestamp_ms.saturating_sub(earlier.timestamp_ms),
            minor_faults: self.minor_faults.saturating_sub(earlier.minor_faults),
            major_faults: self.major_faults.saturating_sub(earlier.major_faults),
            cpu_ticks: self.cpu_ticks.saturating_sub(earlier.cpu_ticks),
        }
    }
}

/// Fixed-capacity circular buffer of [`AggregateSample`]
///
/// The buffer has exactly one writer, the aggregator, whose ticks never
/// overlap. It needs no lock: a slot is fully written before the cursor
/// advances past it (release store), and slots are only ever reused in
/// cursor order. Readers mapping the backing region accept that the slot
/// under the cursor may be overwritten while they look at it.
pub struct SampleBuffer {
    region: ShmRegion,
    capacity: usize,
    /// Total samples appended over the buffer's lifetime, never wrapping
    appended: AtomicUsize,
}

impl SampleBuffer {
    /// Builds a buffer over `region`, deriving its capacity from the region
    /// size
    ///
    /// A region too small to hold a single sample is a construction error.
    pub fn new(region: ShmRegion) -> Result<Self, Error> {
        let capacity = region.len() / mem::size_of::<AggregateSample>();

        if capacity == 0 {
            return Err(Error::ZeroCapacity(region.len()));
        }

        Ok(SampleBuffer {
            region,
            capacity,
            appended: AtomicUsize::new(0),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total number of samples ever appended, monotonic across wraparounds
    pub fn appended(&self) -> usize {
        self.appended.load(Ordering::Acquire)
    }

    /// Number of slots holding a written sample, at most the capacity
    pub fn len(&self) -> usize {
        self.appended().min(self.capacity)
    }

    pub fn is_empty(&self) -> bool {
        self.appended() == 0
    }

    /// Index of the next slot to be overwritten
    pub fn cursor(&self) -> usize {
        self.appended() % self.capacity
    }

    /// Writes `sample` at the cursor slot, then advances the cursor modulo
    /// capacity
    ///
    /// Once the buffer has wrapped, each append silently discards the oldest
    /// sample. Single-writer only.
    pub fn append(&self, sample: AggregateSample) {
        let appended = self.appended.load(Ordering::Relaxed);

        unsafe { self.slot_ptr(appended % self.capacity).write_volatile(sample) };

        self.appended.store(appended + 1, Ordering::Release);
    }

    /// Zero-copy view of the backing slots, in storage order from offset 0
    ///
    /// Slots not yet written still hold their initial zeroed value.
    pub fn samples(&self) -> &[AggregateSample] {
        unsafe { slice::from_raw_parts(self.region.as_ptr() as *const AggregateSample, self.capacity) }
    }

    /// The most recent samples, oldest first
    ///
    /// Before the first wraparound this is the written prefix of the buffer;
    /// afterwards it is all `capacity` slots rotated to cursor order.
    pub fn recent(&self) -> Vec<AggregateSample> {
        let appended = self.appended();
        let samples = self.samples();

        if appended > self.capacity {
            let cursor = appended % self.capacity;
            samples[cursor..].iter().chain(samples[..cursor].iter()).copied().collect()
        } else {
            samples[..appended].to_vec()
        }
    }

    fn slot_ptr(&self, index: usize) -> *mut AggregateSample {
        debug_assert!(index < self.capacity);
        unsafe { (self.region.as_ptr() as *mut AggregateSample).add(index) }
    }
}
