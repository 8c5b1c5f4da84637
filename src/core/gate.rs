//! Tick scheduling, armed and disarmed by registry occupancy

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::core::registry::Registry;
use crate::core::Error;

/// Work executed on each scheduled tick
pub trait Tick: Send + 'static {
    /// Runs one tick, returning the registry occupancy observed after
    /// vanished processes were evicted
    fn tick(&mut self) -> usize;
}

/// Structure used to lead a cadence
///
/// Sleeping the raw period would drift by the duration of each tick; this
/// sleeps to the next period boundary instead.
struct Pulse {
    last_tick: Instant,
    lapse: Duration,
}

impl Pulse {
    fn new(lapse: Duration) -> Self {
        Pulse {
            last_tick: Instant::now(),
            lapse,
        }
    }

    /// Blocking method that only returns on the next pulse
    fn pulse(&mut self) {
        let elapsed = self.last_tick.elapsed();

        if let Some(remaining) = self.lapse.checked_sub(elapsed) {
            thread::sleep(remaining);
        }

        self.last_tick = Instant::now();
    }
}

struct Worker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

struct GateState {
    armed: bool,
    worker: Option<Worker>,
}

struct GateInner {
    period: Duration,
    registry: Arc<Registry>,
    state: Mutex<GateState>,
}

/// Arms and disarms the periodic tick worker
///
/// The gate guarantees single-flight semantics: at most one worker exists,
/// ticks never overlap, and disarming waits for any in-flight tick to
/// complete before returning. Ticks run if and only if the gate is armed,
/// and the gate is armed if and only if the registry is occupied.
pub struct SchedulerGate {
    inner: Arc<GateInner>,
}

impl SchedulerGate {
    pub fn new(registry: Arc<Registry>, period: Duration) -> Self {
        SchedulerGate {
            inner: Arc::new(GateInner {
                period,
                registry,
                state: Mutex::new(GateState {
                    armed: false,
                    worker: None,
                }),
            }),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.inner.lock_state().armed
    }

    /// Arms the gate: spawns the tick worker, whose first tick runs one
    /// period from now
    ///
    /// No-op when already armed.
    pub fn arm<T>(&self, tick: T) -> Result<(), Error>
    where
        T: Tick,
    {
        let mut state = self.inner.lock_state();

        if state.armed {
            return Ok(());
        }

        // A worker that self-disarmed has already exited; reap it first
        if let Some(worker) = state.worker.take() {
            if worker.handle.join().is_err() {
                warn!("A previous tick worker panicked");
            }
        }

        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop);
        let inner = Arc::clone(&self.inner);

        let handle = thread::Builder::new()
            .name("pfprof-tick".to_string())
            .spawn(move || run_ticks(inner, worker_stop, tick))
            .map_err(Error::SchedulerSpawn)?;

        state.armed = true;
        state.worker = Some(Worker { stop, handle });
        debug!("Tick worker armed, period {:?}", self.inner.period);

        Ok(())
    }

    /// Disarms the gate, waiting for any in-flight tick to complete
    ///
    /// After this method returns, no tick is running and none will be
    /// scheduled until the gate is armed again. No-op when disarmed.
    pub fn disarm(&self) {
        let worker = {
            let mut state = self.inner.lock_state();
            state.armed = false;
            state.worker.take()
        };

        // Joining outside the state lock: a tick may be self-disarming, which
        // requires that same lock
        if let Some(worker) = worker {
            worker.stop.store(true, Ordering::Release);
            if worker.handle.join().is_err() {
                warn!("The tick worker panicked");
            }
            debug!("Tick worker disarmed");
        }
    }
}

impl GateInner {
    fn lock_state(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().expect("Gate state lock poisoned")
    }
}

fn run_ticks<T>(inner: Arc<GateInner>, stop: Arc<AtomicBool>, mut tick: T)
where
    T: Tick,
{
    let mut pulse = Pulse::new(inner.period);

    loop {
        pulse.pulse();

        if stop.load(Ordering::Acquire) {
            break;
        }

        let occupancy = tick.tick();

        if occupancy == 0 {
            // The tick emptied the registry: self-disarm, unless a concurrent
            // register refilled it before we took the state lock
            let mut state = inner.lock_state();

            if stop.load(Ordering::Acquire) {
                break;
            }

            if inner.registry.occupancy() == 0 {
                state.armed = false;
                debug!("Registry emptied during tick, worker stops rescheduling");
                break;
            }
        }
    }
}

#[cfg(test)]
mod test_scheduler_gate {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering::SeqCst;

    use super::*;

    const TEST_PERIOD: Duration = Duration::from_millis(5);

    /// Counts ticks, optionally emptying the registry on a given tick
    struct CountingTick {
        registry: Arc<Registry>,
        count: Arc<AtomicUsize>,
        empty_registry_on_tick: Option<usize>,
    }

    impl Tick for CountingTick {
        fn tick(&mut self) -> usize {
            let ticked = self.count.fetch_add(1, SeqCst) + 1;

            if self.empty_registry_on_tick == Some(ticked) {
                for pid in self.registry.pids() {
                    self.registry.remove(pid);
                }
            }

            self.registry.occupancy()
        }
    }

    fn build_gate() -> (SchedulerGate, Arc<Registry>, Arc<AtomicUsize>) {
        let registry = Arc::new(Registry::new());
        let gate = SchedulerGate::new(Arc::clone(&registry), TEST_PERIOD);
        (gate, registry, Arc::new(AtomicUsize::new(0)))
    }

    fn counting_tick(
        registry: &Arc<Registry>,
        count: &Arc<AtomicUsize>,
        empty_registry_on_tick: Option<usize>,
    ) -> CountingTick {
        CountingTick {
            registry: Arc::clone(registry),
            count: Arc::clone(count),
            empty_registry_on_tick,
        }
    }

    fn wait_for_ticks(count: &AtomicUsize, at_least: usize) {
        for _ in 0..200 {
            if count.load(SeqCst) >= at_least {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("Tick worker did not reach {} ticks", at_least);
    }

    #[test]
    fn test_gate_should_start_disarmed() {
        let (gate, _, _) = build_gate();

        assert!(!gate.is_armed());
    }

    #[test]
    fn test_armed_gate_should_run_ticks_periodically() {
        let (gate, registry, count) = build_gate();
        registry.insert(1);

        gate.arm(counting_tick(&registry, &count, None)).unwrap();

        assert!(gate.is_armed());
        wait_for_ticks(&count, 3);

        gate.disarm();
    }

    #[test]
    fn test_arming_twice_should_be_noop() {
        let (gate, registry, count) = build_gate();
        registry.insert(1);

        gate.arm(counting_tick(&registry, &count, None)).unwrap();
        gate.arm(counting_tick(&registry, &count, None)).unwrap();

        assert!(gate.is_armed());

        gate.disarm();
    }

    #[test]
    fn test_disarm_should_quiesce_ticks() {
        let (gate, registry, count) = build_gate();
        registry.insert(1);

        gate.arm(counting_tick(&registry, &count, None)).unwrap();
        wait_for_ticks(&count, 2);

        gate.disarm();
        assert!(!gate.is_armed());

        // Disarm joined the worker: the count is final
        let after_disarm = count.load(SeqCst);
        thread::sleep(4 * TEST_PERIOD);
        assert_eq!(count.load(SeqCst), after_disarm);
    }

    #[test]
    fn test_disarming_twice_should_be_noop() {
        let (gate, registry, count) = build_gate();
        registry.insert(1);

        gate.arm(counting_tick(&registry, &count, None)).unwrap();
        gate.disarm();
        gate.disarm();

        assert!(!gate.is_armed());
    }

    #[test]
    fn test_tick_emptying_registry_should_self_disarm() {
        let (gate, registry, count) = build_gate();
        registry.insert(1);

        gate.arm(counting_tick(&registry, &count, Some(1))).unwrap();
        wait_for_ticks(&count, 1);
        thread::sleep(4 * TEST_PERIOD);

        assert!(!gate.is_armed());
        assert_eq!(count.load(SeqCst), 1);
    }

    #[test]
    fn test_gate_should_rearm_after_self_disarm() {
        let (gate, registry, count) = build_gate();
        registry.insert(1);

        gate.arm(counting_tick(&registry, &count, Some(1))).unwrap();
        wait_for_ticks(&count, 1);
        thread::sleep(4 * TEST_PERIOD);
        assert!(!gate.is_armed());

        registry.insert(2);
        gate.arm(counting_tick(&registry, &count, None)).unwrap();

        wait_for_ticks(&count, 3);
        assert!(gate.is_armed());

        gate.disarm();
    }
}
