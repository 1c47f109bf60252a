//! Threaded driver and concurrent API callers.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use scadasim::actuators::LockSource;
use scadasim::adapters::memory_store::MemoryStore;
use scadasim::adapters::time::SystemClock;
use scadasim::config::PlantConfig;
use scadasim::driver::SimulationDriver;
use scadasim::persist::SnapshotStore;
use scadasim::{Plant, PlantCommand, Role};

use super::mock_ports::{BrokenStore, RecordingSink, plant, quiet_config};

fn fast_config() -> PlantConfig {
    PlantConfig {
        tick_interval_ms: 5,
        incident_interval_ms: 10,
        telemetry_every_ticks: 2,
        snapshot_every_ticks: 3,
        ..quiet_config()
    }
}

/// Poll `done` for up to five seconds.
fn wait_for(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

// ── SimulationDriver ──────────────────────────────────────────

#[test]
fn driver_ticks_reports_and_snapshots() {
    let plant = Arc::new(Plant::new(fast_config(), SystemClock::new()).unwrap());
    let driver = SimulationDriver::spawn(
        plant.clone(),
        RecordingSink::new(),
        SnapshotStore::new(MemoryStore::new()),
    )
    .unwrap();
    assert!(driver.is_running());

    assert!(wait_for(|| plant.tick_count() >= 10));
    assert!(wait_for(|| driver.stats().incident_passes.load(Ordering::Relaxed) >= 1));
    assert!(driver.stats().snapshots.load(Ordering::Relaxed) >= 1);
    assert!(driver.with_sink(|s| s.telemetry()) >= 1);

    let store = driver.stop().expect("tick thread exits cleanly");
    let snap = store.load().unwrap().expect("final snapshot written");
    assert_eq!(snap.actuators.len(), 12);

    // Threads are gone: the count no longer moves.
    let stopped_at = plant.tick_count();
    thread::sleep(Duration::from_millis(30));
    assert_eq!(plant.tick_count(), stopped_at);
}

#[test]
fn snapshot_failures_do_not_stop_the_tick() {
    let plant = Arc::new(Plant::new(fast_config(), SystemClock::new()).unwrap());
    let driver =
        SimulationDriver::spawn(plant.clone(), RecordingSink::new(), SnapshotStore::new(BrokenStore::default()))
            .unwrap();

    assert!(wait_for(|| driver.stats().snapshot_failures.load(Ordering::Relaxed) >= 2));
    let ticks = plant.tick_count();
    assert!(wait_for(|| plant.tick_count() > ticks));
    assert_eq!(driver.stats().snapshots.load(Ordering::Relaxed), 0);

    let store = driver.stop().unwrap();
    assert!(store.storage().attempts >= 2);
}

#[test]
fn api_commands_interleave_with_running_driver() {
    let plant = Arc::new(Plant::new(fast_config(), SystemClock::new()).unwrap());
    let driver = SimulationDriver::spawn(
        plant.clone(),
        RecordingSink::new(),
        SnapshotStore::new(MemoryStore::new()),
    )
    .unwrap();

    let mut sink = RecordingSink::new();
    for _ in 0..20 {
        plant.execute("MTR-1", "stop", None, Role::Operator).unwrap();
        plant.execute("MTR-1", "start", None, Role::Operator).unwrap();
    }
    plant
        .handle_command(PlantCommand::EmergencyStop, Role::Operator, &mut sink)
        .unwrap();
    assert!(plant.all_actuators().iter().all(|a| a.locked()));
    plant
        .handle_command(PlantCommand::ResetEmergencyStop, Role::Operator, &mut sink)
        .unwrap();
    assert!(plant.all_actuators().iter().all(|a| !a.locked()));
    assert_eq!(plant.actuator("MTR-1").unwrap().command_count, 40);
    assert_eq!(sink.rejected(), 0);

    driver.stop().unwrap();
}

// ── Race primitive under real threads ─────────────────────────

#[test]
fn race_burst_against_concurrent_execute_stays_in_bounds() {
    for _ in 0..25 {
        let (plant, _) = plant(quiet_config());
        let plant = Arc::new(plant);

        let racer = {
            let plant = plant.clone();
            thread::spawn(move || plant.trigger_race_condition("PMP-1", 16, Role::Viewer).unwrap())
        };
        plant
            .execute("PMP-1", "set_speed", Some("55"), Role::Operator)
            .unwrap();
        let report = racer.join().unwrap();

        let count = plant.actuator("PMP-1").unwrap().command_count;
        assert!((16..=17).contains(&count), "count {count}");
        assert_eq!(report.issued, 16);
        assert_eq!(report.dropped, 0);
    }
}

// ── Snapshot consistency ──────────────────────────────────────

#[test]
fn snapshots_never_show_orphaned_incident_locks() {
    let mut config = quiet_config();
    config.incidents.spawn_probability = 1.0;
    config.incidents.auto_resolve_ms = 3_000;
    let (plant, clock) = plant(config);
    let plant = Arc::new(plant);

    let churn = {
        let plant = plant.clone();
        thread::spawn(move || {
            let mut sink = RecordingSink::new();
            for _ in 0..400 {
                clock.advance(1_000);
                plant.incident_pass(&mut sink);
            }
            sink.created()
        })
    };

    let mut taken = 0;
    while taken == 0 || !churn.is_finished() {
        let snap = plant.snapshot();
        for a in snap.actuators.iter().filter(|a| a.has_lock(LockSource::Incident)) {
            assert!(
                snap.incidents
                    .iter()
                    .any(|i| i.is_active() && i.equipment.as_str() == a.id.as_str()),
                "{} held by no active incident",
                a.id
            );
        }
        taken += 1;
    }
    assert!(churn.join().unwrap() > 0);
}
