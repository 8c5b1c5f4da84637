//! Read side of the sample buffer, for external monitoring clients

use std::mem;
use std::slice;

use crate::core::buffer::AggregateSample;
use crate::shm::{Error, ShmRegion};

/// Zero-copy reader over the sample buffer of a running profiler
///
/// The reader only ever observes the mapped region; it makes no copy of the
/// buffer. It must tolerate the circular overwrite semantics of the writer:
/// a slot can be overwritten between two observations, and the slot under
/// the writer's cursor may be mid-write. Consumers track which slot they
/// last consumed and compute deltas between consecutive samples with
/// [`AggregateSample::delta_from`].
pub struct SampleReader {
    region: ShmRegion,
    capacity: usize,
}

impl SampleReader {
    /// Maps the named sample buffer read-only
    pub fn open(name: &str) -> Result<Self, Error> {
        Self::over(ShmRegion::open(name)?)
    }

    /// Builds a reader over an already mapped region
    pub fn over(region: ShmRegion) -> Result<Self, Error> {
        let capacity = region.len() / mem::size_of::<AggregateSample>();

        if capacity == 0 {
            return Err(Error::EmptyRegion);
        }

        Ok(SampleReader { region, capacity })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// View of all slots in storage order, starting at offset 0
    pub fn samples(&self) -> &[AggregateSample] {
        unsafe { slice::from_raw_parts(self.region.as_ptr() as *const AggregateSample, self.capacity) }
    }

    /// Copies the sample at `index`, wrapping modulo capacity
    pub fn sample(&self, index: usize) -> AggregateSample {
        self.samples()[index % self.capacity]
    }
}
