//! Simulation driver: the two periodic threads that keep the plant alive.
//!
//! ```text
//!  "plant-tick"      every tick_interval_ms:      Plant::tick → Scheduler duties
//!  "plant-incidents" every incident_interval_ms:  Plant::incident_pass
//! ```
//!
//! Both threads share one `Arc<Plant>` with the API boundary and one event
//! sink.  Neither suspends mid-step; `stop()` flips an `AtomicBool`, wakes
//! both threads and joins them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{error, info, warn};
use parking_lot::Mutex;

use crate::app::events::PlantEvent;
use crate::app::ports::{ClockPort, EventSink, SchedulerDelegate, StoragePort};
use crate::app::service::Plant;
use crate::persist::SnapshotStore;
use crate::scheduler::{SNAPSHOT, Schedule, Scheduler, TELEMETRY};

/// Counters shared with the threads.
#[derive(Debug, Default)]
pub struct DriverStats {
    pub ticks: AtomicU64,
    pub incident_passes: AtomicU64,
    pub snapshots: AtomicU64,
    pub snapshot_failures: AtomicU64,
}

pub struct SimulationDriver<S, St: StoragePort> {
    running: Arc<AtomicBool>,
    stats: Arc<DriverStats>,
    sink: Arc<Mutex<S>>,
    tick_thread: Option<JoinHandle<SnapshotStore<St>>>,
    incident_thread: Option<JoinHandle<()>>,
}

impl<S, St> SimulationDriver<S, St>
where
    S: EventSink + Send + 'static,
    St: StoragePort + Send + 'static,
{
    /// Start both threads.
    pub fn spawn<C>(plant: Arc<Plant<C>>, sink: S, store: SnapshotStore<St>) -> std::io::Result<Self>
    where
        C: ClockPort + Send + Sync + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(DriverStats::default());
        let sink = Arc::new(Mutex::new(sink));

        let tick_interval = Duration::from_millis(plant.config().tick_interval_ms);
        let incident_interval = Duration::from_millis(plant.config().incident_interval_ms);

        let tick_thread = {
            let (plant, running, stats, sink) = (plant.clone(), running.clone(), stats.clone(), sink.clone());
            thread::Builder::new()
                .name("plant-tick".into())
                .spawn(move || tick_loop(&plant, &running, &stats, &sink, store, tick_interval))?
        };

        let incident_thread = {
            let (flag, stats, sink) = (running.clone(), stats.clone(), sink.clone());
            let spawned = thread::Builder::new()
                .name("plant-incidents".into())
                .spawn(move || incident_loop(&plant, &flag, &stats, &sink, incident_interval));
            match spawned {
                Ok(handle) => handle,
                Err(e) => {
                    running.store(false, Ordering::SeqCst);
                    tick_thread.thread().unpark();
                    let _ = tick_thread.join();
                    return Err(e);
                }
            }
        };

        info!(
            "Driver: started (tick {} ms, incidents {} ms)",
            tick_interval.as_millis(),
            incident_interval.as_millis()
        );
        Ok(Self {
            running,
            stats,
            sink,
            tick_thread: Some(tick_thread),
            incident_thread: Some(incident_thread),
        })
    }

    pub fn stats(&self) -> &DriverStats {
        &self.stats
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run `f` against the shared sink (e.g. to inspect a recording sink).
    pub fn with_sink<T>(&self, f: impl FnOnce(&mut S) -> T) -> T {
        f(&mut self.sink.lock())
    }

    /// Stop both threads and hand the snapshot store back.
    ///
    /// Returns `None` if the tick thread panicked.
    pub fn stop(mut self) -> Option<SnapshotStore<St>> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Option<SnapshotStore<St>> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.incident_thread.take() {
            h.thread().unpark();
            if h.join().is_err() {
                error!("Driver: incident thread panicked");
            }
        }
        let store = self.tick_thread.take().and_then(|h| {
            h.thread().unpark();
            h.join().map_err(|_| error!("Driver: tick thread panicked")).ok()
        });
        info!(
            "Driver: stopped after {} ticks, {} incident passes",
            self.stats.ticks.load(Ordering::Relaxed),
            self.stats.incident_passes.load(Ordering::Relaxed)
        );
        store
    }
}

impl<S, St: StoragePort> Drop for SimulationDriver<S, St> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        for t in [
            self.tick_thread.as_ref().map(|h| h.thread().clone()),
            self.incident_thread.as_ref().map(|h| h.thread().clone()),
        ]
        .into_iter()
        .flatten()
        {
            t.unpark();
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Thread bodies
// ───────────────────────────────────────────────────────────────

fn tick_loop<C: ClockPort, S: EventSink, St: StoragePort>(
    plant: &Plant<C>,
    running: &AtomicBool,
    stats: &DriverStats,
    sink: &Mutex<S>,
    mut store: SnapshotStore<St>,
    interval: Duration,
) -> SnapshotStore<St> {
    let mut scheduler = Scheduler::new();
    scheduler.add(Schedule::every(TELEMETRY, plant.config().telemetry_every_ticks));
    scheduler.add(Schedule::every(SNAPSHOT, plant.config().snapshot_every_ticks));

    while running.load(Ordering::SeqCst) {
        let started = Instant::now();
        plant.tick(&mut *sink.lock());
        stats.ticks.fetch_add(1, Ordering::Relaxed);

        let mut duties = Duties {
            plant,
            sink,
            store: &mut store,
            stats,
        };
        scheduler.tick(&mut duties);

        pace(running, started, interval);
    }

    // Final snapshot on the way out.
    save(plant, &mut store, stats);
    store
}

fn incident_loop<C: ClockPort, S: EventSink>(
    plant: &Plant<C>,
    running: &AtomicBool,
    stats: &DriverStats,
    sink: &Mutex<S>,
    interval: Duration,
) {
    // First pass after one full interval.
    pace(running, Instant::now(), interval);
    while running.load(Ordering::SeqCst) {
        let started = Instant::now();
        plant.incident_pass(&mut *sink.lock());
        stats.incident_passes.fetch_add(1, Ordering::Relaxed);
        pace(running, started, interval);
    }
}

/// Sleep out the rest of `interval`, waking early on `stop()`.
fn pace(running: &AtomicBool, started: Instant, interval: Duration) {
    while running.load(Ordering::SeqCst) {
        let elapsed = started.elapsed();
        if elapsed >= interval {
            break;
        }
        thread::park_timeout(interval - elapsed);
    }
}

fn save<C: ClockPort, St: StoragePort>(plant: &Plant<C>, store: &mut SnapshotStore<St>, stats: &DriverStats) {
    match store.save(&plant.snapshot()) {
        Ok(()) => {
            stats.snapshots.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            stats.snapshot_failures.fetch_add(1, Ordering::Relaxed);
            warn!("Driver: snapshot failed: {e}");
        }
    }
}

/// Scheduler delegate for the tick thread.
struct Duties<'a, C: ClockPort, S, St: StoragePort> {
    plant: &'a Plant<C>,
    sink: &'a Mutex<S>,
    store: &'a mut SnapshotStore<St>,
    stats: &'a DriverStats,
}

impl<C: ClockPort, S: EventSink, St: StoragePort> SchedulerDelegate for Duties<'_, C, S, St> {
    fn on_schedule_fired(&mut self, label: &str) {
        match label {
            TELEMETRY => {
                let telemetry = self.plant.telemetry();
                self.sink.lock().emit(&PlantEvent::Telemetry(telemetry));
            }
            SNAPSHOT => save(self.plant, self.store, self.stats),
            other => warn!("Driver: no duty for schedule '{other}'"),
        }
    }
}
