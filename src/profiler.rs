//! Profiler facade tying registry, scheduler gate, aggregator and buffer

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::info;

use crate::core::aggregator::Aggregator;
use crate::core::buffer::SampleBuffer;
use crate::core::gate::SchedulerGate;
use crate::core::metrics::MetricsSource;
use crate::core::registry::{OccupancyShift, Pid, Registry};
use crate::core::Error;

/// Period between two aggregation ticks
pub const SAMPLING_PERIOD: Duration = Duration::from_millis(50);

/// The profiler public surface
///
/// Registration drives sampling: the tick worker is armed exactly when the
/// registry becomes occupied, and disarmed (waiting for any in-flight tick)
/// exactly when it becomes empty again.
pub struct Profiler<S> {
    registry: Arc<Registry>,
    buffer: Arc<SampleBuffer>,
    source: Arc<S>,
    gate: SchedulerGate,
    aggregator: Aggregator<S>,
    /// Serializes each occupancy transition with its gate action, so that
    /// concurrent control callers cannot interleave an arm and a disarm out
    /// of order
    ops: Mutex<()>,
}

impl<S> Profiler<S>
where
    S: MetricsSource + Send + Sync + 'static,
{
    pub fn new(source: S, buffer: SampleBuffer) -> Self {
        Self::with_period(source, buffer, SAMPLING_PERIOD)
    }

    pub fn with_period(source: S, buffer: SampleBuffer, period: Duration) -> Self {
        let registry = Arc::new(Registry::new());
        let buffer = Arc::new(buffer);
        let source = Arc::new(source);

        let gate = SchedulerGate::new(Arc::clone(&registry), period);
        let aggregator = Aggregator::new(
            Arc::clone(&registry),
            Arc::clone(&source),
            Arc::clone(&buffer),
        );

        Profiler {
            registry,
            buffer,
            source,
            gate,
            aggregator,
            ops: Mutex::new(()),
        }
    }

    /// Registers a process to profile
    ///
    /// Registering a PID which does not refer to a running process is
    /// rejected without any state change. Registering an already registered
    /// PID is a no-op. The first registration arms the tick worker.
    pub fn register(&self, pid: Pid) -> Result<(), Error> {
        let _ops = self.lock_ops();

        if !self.source.exists(pid) {
            return Err(Error::NoSuchProcess(pid));
        }

        match self.registry.insert(pid) {
            None => Ok(()), // already registered
            Some(shift) => {
                info!("Registered PID {}", pid);

                if shift == OccupancyShift::BecameOccupied {
                    if let Err(e) = self.gate.arm(self.aggregator.clone()) {
                        self.registry.remove(pid);
                        return Err(e);
                    }
                }

                Ok(())
            }
        }
    }

    /// Unregisters a process
    ///
    /// Unregistering an absent PID is a no-op. The last unregistration
    /// disarms the tick worker and waits for any in-flight tick to finish.
    pub fn unregister(&self, pid: Pid) {
        let _ops = self.lock_ops();

        if let Some(shift) = self.registry.remove(pid) {
            info!("Unregistered PID {}", pid);

            if shift == OccupancyShift::BecameEmpty {
                self.gate.disarm();
            }
        }
    }

    /// Snapshot of the registered PIDs, in registration order
    pub fn pids(&self) -> Vec<Pid> {
        self.registry.pids()
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.registry.contains(pid)
    }

    pub fn occupancy(&self) -> usize {
        self.registry.occupancy()
    }

    /// Indicates whether the tick worker is currently armed
    pub fn is_sampling(&self) -> bool {
        self.gate.is_armed()
    }

    pub fn buffer(&self) -> &SampleBuffer {
        &self.buffer
    }

    /// Stops sampling, waiting for any in-flight tick to complete
    ///
    /// Safe to call more than once. The buffer may be torn down once this
    /// method has returned.
    pub fn shutdown(&self) {
        let _ops = self.lock_ops();
        self.gate.disarm();
    }

    fn lock_ops(&self) -> std::sync::MutexGuard<'_, ()> {
        self.ops.lock().expect("Profiler ops lock poisoned")
    }
}

impl<S> Drop for Profiler<S> {
    fn drop(&mut self) {
        // No straggling tick may outlive the profiler
        self.gate.disarm();
    }
}

#[cfg(test)]
mod test_profiler {
    use std::thread::sleep;

    use rstest::{fixture, rstest};

    use crate::core::metrics::fakes::FakeSource;
    use crate::core::metrics::ProcessCounters;
    use crate::shm::ShmRegion;

    use super::*;

    const TEST_PERIOD: Duration = Duration::from_millis(5);

    fn counters(minor: u64) -> ProcessCounters {
        ProcessCounters {
            minor_faults: minor,
            major_faults: 0,
            user_ticks: 1,
            system_ticks: 1,
        }
    }

    fn build_profiler(live_pids: &[Pid]) -> Profiler<FakeSource> {
        let source = FakeSource::new();
        for pid in live_pids {
            source.set(*pid, counters(10));
        }

        let region = ShmRegion::anonymous(4096).expect("Could not map test region");
        let buffer = SampleBuffer::new(region).expect("Could not build test buffer");

        Profiler::with_period(source, buffer, TEST_PERIOD)
    }

    #[fixture]
    fn profiler() -> Profiler<FakeSource> {
        build_profiler(&[1, 2])
    }

    fn wait_for_samples(profiler: &Profiler<FakeSource>, at_least: usize) {
        for _ in 0..200 {
            if profiler.buffer().appended() >= at_least {
                return;
            }
            sleep(Duration::from_millis(2));
        }
        panic!("Profiler did not record {} samples", at_least);
    }

    #[rstest]
    fn test_register_should_arm_sampling(profiler: Profiler<FakeSource>) {
        assert!(!profiler.is_sampling());

        profiler.register(1).unwrap();

        assert_eq!(profiler.occupancy(), 1);
        assert!(profiler.is_sampling());
    }

    #[rstest]
    fn test_register_nonexistent_pid_should_change_nothing(profiler: Profiler<FakeSource>) {
        let result = profiler.register(999);

        assert!(matches!(result, Err(Error::NoSuchProcess(999))));
        assert_eq!(profiler.occupancy(), 0);
        assert!(!profiler.is_sampling());
    }

    #[rstest]
    fn test_mixed_registration_should_only_keep_existing_pid(profiler: Profiler<FakeSource>) {
        profiler.register(1).unwrap();
        let _ = profiler.register(999);

        assert_eq!(profiler.pids(), vec![1]);
        assert_eq!(profiler.occupancy(), 1);
    }

    #[rstest]
    fn test_duplicate_register_should_be_noop(profiler: Profiler<FakeSource>) {
        profiler.register(1).unwrap();
        profiler.register(1).unwrap();

        assert_eq!(profiler.occupancy(), 1);
    }

    #[rstest]
    fn test_registered_process_should_be_sampled(profiler: Profiler<FakeSource>) {
        profiler.register(1).unwrap();

        wait_for_samples(&profiler, 1);

        let sample = profiler.buffer().samples()[0];
        assert!(sample.minor_faults > 0);
        assert!(sample.cpu_ticks > 0);
    }

    #[rstest]
    fn test_unregister_last_pid_should_stop_sampling(profiler: Profiler<FakeSource>) {
        profiler.register(1).unwrap();
        wait_for_samples(&profiler, 1);

        profiler.unregister(1);

        assert_eq!(profiler.occupancy(), 0);
        assert!(!profiler.is_sampling());

        // The buffer stops growing once the gate is disarmed
        let appended = profiler.buffer().appended();
        sleep(4 * TEST_PERIOD);
        assert_eq!(profiler.buffer().appended(), appended);
    }

    #[rstest]
    fn test_unregister_should_keep_sampling_while_occupied(profiler: Profiler<FakeSource>) {
        profiler.register(1).unwrap();
        profiler.register(2).unwrap();

        profiler.unregister(1);

        assert_eq!(profiler.pids(), vec![2]);
        assert!(profiler.is_sampling());
    }

    #[rstest]
    fn test_unregister_absent_pid_should_be_noop(profiler: Profiler<FakeSource>) {
        profiler.register(1).unwrap();

        profiler.unregister(42);

        assert_eq!(profiler.occupancy(), 1);
        assert!(profiler.is_sampling());
    }

    #[rstest]
    fn test_shutdown_should_be_idempotent(profiler: Profiler<FakeSource>) {
        profiler.register(1).unwrap();

        profiler.shutdown();
        profiler.shutdown();

        assert!(!profiler.is_sampling());
    }

    #[rstest]
    fn test_reregistration_should_resume_sampling(profiler: Profiler<FakeSource>) {
        profiler.register(1).unwrap();
        wait_for_samples(&profiler, 1);
        profiler.unregister(1);

        profiler.register(2).unwrap();

        assert!(profiler.is_sampling());
        let appended = profiler.buffer().appended();
        wait_for_samples(&profiler, appended + 2);
    }
}
