//! Snapshot → `StoragePort` → restore round trips.

use scadasim::actuators::ActuatorState;
use scadasim::adapters::memory_store::MemoryStore;
use scadasim::alarms::AlarmSeverity;
use scadasim::app::ports::{StorageError, StoragePort};
use scadasim::incidents::{IncidentStatus, IncidentType, NewIncident};
use scadasim::persist::{NAMESPACE, PlantSnapshot, SnapshotStore};
use scadasim::physics::SensorKind;
use scadasim::Role;

use super::mock_ports::{FlakyStore, RecordingSink, plant, quiet_config};

/// A plant with some operator history, an active incident and an alarm.
fn busy_snapshot() -> PlantSnapshot {
    let (plant, clock) = plant(quiet_config());
    plant.execute("MTR-2", "stop", None, Role::Operator).unwrap();
    plant.execute("VLV-4", "close", None, Role::Operator).unwrap();
    plant
        .create_incident(NewIncident::new(IncidentType::StuckValve, 1, AlarmSeverity::High, 0))
        .unwrap();
    plant.set_base(3, SensorKind::Level, 95.0).unwrap();
    clock.set(500);
    plant.tick(&mut RecordingSink::new());
    plant.snapshot()
}

#[test]
fn saved_snapshot_loads_back_identical() {
    let snap = busy_snapshot();
    assert_eq!(snap.taken_at, 500);
    assert!(!snap.alarms.is_empty());

    let mut store = SnapshotStore::new(MemoryStore::new());
    store.save(&snap).unwrap();
    assert!(store.storage().exists(NAMESPACE, "incidents"));

    let loaded = store.load().unwrap().expect("snapshot present");
    assert_eq!(loaded, snap);
}

#[test]
fn restore_rehydrates_by_identity_and_resumes_ids() {
    let snap = busy_snapshot();
    let (fresh, clock) = plant(quiet_config());

    let report = fresh.restore(&snap);
    assert_eq!(report.actuators, 12);
    assert_eq!(report.sensors, 20);
    assert_eq!(report.interlocks, 12);
    assert_eq!(report.incidents, 1);

    assert_eq!(fresh.actuator("MTR-2").unwrap().state, ActuatorState::Stopped);
    assert_eq!(fresh.actuator("VLV-4").unwrap().state, ActuatorState::Closed);
    let vlv1 = fresh.actuator("VLV-1").unwrap();
    assert_eq!(vlv1.state, ActuatorState::Stuck);
    assert!(vlv1.locked());
    assert!(!fresh.active_alarms().is_empty());

    let next = fresh
        .create_incident(NewIncident::new(IncidentType::TempSpike, 2, AlarmSeverity::Low, 0))
        .unwrap();
    assert_eq!(next.incident.id.as_str(), "INC-0002");

    // The restored record still carries its effects, so resolving undoes them.
    clock.set(1_000);
    let resolved = fresh.resolve_incident("INC-0001").unwrap();
    assert_eq!(resolved.status, IncidentStatus::Resolved);
    let vlv1 = fresh.actuator("VLV-1").unwrap();
    assert_eq!(vlv1.state, ActuatorState::Open);
    assert!(!vlv1.locked());
}

#[test]
fn unknown_ids_are_skipped() {
    let mut snap = busy_snapshot();
    snap.actuators[0].id = scadasim::ident::bounded("MTR-99");
    let (fresh, _) = plant(quiet_config());
    assert_eq!(fresh.restore(&snap).actuators, 11);
}

#[test]
fn json_export_reads_back() {
    let snap = busy_snapshot();
    let json = snap.to_json().unwrap();
    assert!(json.contains("\"incidents\""));
    assert_eq!(PlantSnapshot::from_json(&json).unwrap(), snap);
}

#[test]
fn empty_store_has_no_snapshot() {
    let store = SnapshotStore::new(MemoryStore::new());
    assert!(store.load().unwrap().is_none());
}

#[test]
fn full_store_reports_full() {
    let mut store = SnapshotStore::new(MemoryStore::with_budget(16));
    assert_eq!(store.save(&busy_snapshot()), Err(StorageError::Full));
}

#[test]
fn corrupted_blob_is_a_codec_error() {
    let mut mem = MemoryStore::new();
    mem.write(NAMESPACE, "sensors", &[0xFF, 0xFF, 0xFF]).unwrap();
    let store = SnapshotStore::new(mem);
    assert_eq!(store.load(), Err(StorageError::Codec));
}

#[test]
fn clear_removes_every_kind() {
    let mut store = SnapshotStore::new(MemoryStore::new());
    store.save(&busy_snapshot()).unwrap();
    store.clear().unwrap();
    assert!(store.storage().is_empty());
    assert!(store.load().unwrap().is_none());
}

#[test]
fn failed_save_keeps_the_previous_snapshot() {
    let first = busy_snapshot();
    let mut second = first.clone();
    second.taken_at = 900;
    second.actuators[0].command_count = 999;
    second.incidents.clear();

    // Six keys per save: the second save fails on its fourth write.
    let mut store = SnapshotStore::new(FlakyStore::failing_write(10));
    store.save(&first).unwrap();
    assert_eq!(store.save(&second), Err(StorageError::Full));
    assert_eq!(store.load().unwrap(), Some(first));
}

#[test]
fn failed_first_save_leaves_nothing_behind() {
    let mut store = SnapshotStore::new(FlakyStore::failing_write(3));
    assert_eq!(store.save(&busy_snapshot()), Err(StorageError::Full));
    assert!(store.storage().inner.is_empty());
    assert!(store.load().unwrap().is_none());
}

#[test]
fn operator_estop_latch_survives_restore() {
    let (plant, _) = plant(quiet_config());
    plant.emergency_stop_all();
    let mut store = SnapshotStore::new(MemoryStore::new());
    store.save(&plant.snapshot()).unwrap();
    let snap = store.load().unwrap().unwrap();
    assert!(snap.emergency_stop);

    let (fresh, _) = super::mock_ports::plant(quiet_config());
    fresh.restore(&snap);
    assert!(fresh.telemetry().emergency_stop);
    assert!(fresh.all_actuators().iter().all(|a| a.locked()));

    fresh.reset_emergency_stop();
    assert!(!fresh.telemetry().emergency_stop);
    assert!(fresh.execute("MTR-1", "start", None, Role::Operator).is_ok());
}
