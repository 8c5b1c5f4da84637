//! Per-tick aggregation of process counters

use std::sync::{Arc, Mutex};
use std::time::Instant;

use log::{info, warn};

use crate::core::buffer::{AggregateSample, SampleBuffer};
use crate::core::gate::Tick;
use crate::core::metrics::{MetricsSource, QueryError};
use crate::core::registry::{Registry, SweepDecision};

/// Running totals, accumulated over the lifetime of the profiler
///
/// Each tick adds the cumulative counters of every live registered process,
/// so these are running sums, not per-tick deltas. They survive disarm and
/// re-arm cycles.
#[derive(Debug, Copy, Clone, Default)]
struct Totals {
    minor_faults: u64,
    major_faults: u64,
    cpu_ticks: u64,
}

/// Executes one tick of profiling work
///
/// A tick walks the registry under its lock, sums the counters of live
/// processes, evicts the ones the metrics source reports as gone, and then
/// appends one aggregate sample to the buffer. Eviction shares the lock
/// acquisition of the walk, so a vanished process is out of the registry in
/// the very tick its absence is detected.
pub struct Aggregator<S> {
    registry: Arc<Registry>,
    source: Arc<S>,
    buffer: Arc<SampleBuffer>,
    totals: Arc<Mutex<Totals>>,
    origin: Instant,
}

impl<S> Clone for Aggregator<S> {
    fn clone(&self) -> Self {
        Aggregator {
            registry: Arc::clone(&self.registry),
            source: Arc::clone(&self.source),
            buffer: Arc::clone(&self.buffer),
            totals: Arc::clone(&self.totals),
            origin: self.origin,
        }
    }
}

impl<S> Aggregator<S>
where
    S: MetricsSource,
{
    pub fn new(registry: Arc<Registry>, source: Arc<S>, buffer: Arc<SampleBuffer>) -> Self {
        Aggregator {
            registry,
            source,
            buffer,
            totals: Arc::new(Mutex::new(Totals::default())),
            origin: Instant::now(),
        }
    }

    /// Runs one aggregation tick, returning the post-eviction occupancy
    pub fn run_once(&self) -> usize {
        let mut totals = self.totals.lock().expect("Aggregator totals lock poisoned");

        let outcome = self.registry.sweep(|pid| match self.source.query(pid) {
            Ok(counters) => {
                totals.minor_faults += counters.minor_faults;
                totals.major_faults += counters.major_faults;
                totals.cpu_ticks += counters.cpu_ticks();
                SweepDecision::Keep
            }
            Err(QueryError::NotFound(_)) => SweepDecision::Evict,
            Err(e) => {
                // Transient failure: the process stays registered, its
                // counters are just missing from this tick
                warn!("{}", e);
                SweepDecision::Keep
            }
        });

        for pid in &outcome.evicted {
            info!("PID {} vanished, unregistered", pid);
        }

        self.buffer.append(AggregateSample {
            timestamp_ms: self.origin.elapsed().as_millis() as u64,
            minor_faults: totals.minor_faults,
            major_faults: totals.major_faults,
            cpu_ticks: totals.cpu_ticks,
        });

        outcome.occupancy
    }
}

impl<S> Tick for Aggregator<S>
where
    S: MetricsSource + Send + Sync + 'static,
{
    fn tick(&mut self) -> usize {
        self.run_once()
    }
}
