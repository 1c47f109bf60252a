//! Mock port adapters for integration tests.
//!
//! Records every emitted event so tests can assert on the full event
//! history, and provides a store that refuses writes for the snapshot
//! failure path.

use scadasim::Plant;
use scadasim::adapters::memory_store::MemoryStore;
use scadasim::adapters::time::ManualClock;
use scadasim::app::events::PlantEvent;
use scadasim::app::ports::{EventSink, StorageError, StoragePort};
use scadasim::config::PlantConfig;

// ── RecordingSink ─────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct RecordingSink {
    pub events: Vec<PlantEvent>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, pred: impl Fn(&PlantEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }

    pub fn created(&self) -> usize {
        self.count(|e| matches!(e, PlantEvent::IncidentCreated(_)))
    }

    pub fn resolved(&self) -> usize {
        self.count(|e| matches!(e, PlantEvent::IncidentResolved(_)))
    }

    pub fn rejected(&self) -> usize {
        self.count(|e| matches!(e, PlantEvent::CommandRejected { .. }))
    }

    pub fn telemetry(&self) -> usize {
        self.count(|e| matches!(e, PlantEvent::Telemetry(_)))
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &PlantEvent) {
        self.events.push(event.clone());
    }
}

// ── BrokenStore ───────────────────────────────────────────────

/// Every write fails with `IoError`; nothing is ever stored.
#[derive(Debug, Default)]
pub struct BrokenStore {
    pub attempts: usize,
}

impl StoragePort for BrokenStore {
    fn read(&self, _namespace: &str, _key: &str) -> Result<Vec<u8>, StorageError> {
        Err(StorageError::NotFound)
    }

    fn write(&mut self, _namespace: &str, _key: &str, _data: &[u8]) -> Result<(), StorageError> {
        self.attempts += 1;
        Err(StorageError::IoError)
    }

    fn delete(&mut self, _namespace: &str, _key: &str) -> Result<(), StorageError> {
        Ok(())
    }

    fn exists(&self, _namespace: &str, _key: &str) -> bool {
        false
    }
}

// ── FlakyStore ────────────────────────────────────────────────

/// Memory store whose `fail_at`-th write (1-based) fails with `Full`;
/// every other write goes through.
#[derive(Debug, Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub writes: usize,
    pub fail_at: usize,
}

impl FlakyStore {
    pub fn failing_write(fail_at: usize) -> Self {
        Self {
            fail_at,
            ..Self::default()
        }
    }
}

impl StoragePort for FlakyStore {
    fn read(&self, namespace: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        self.inner.read(namespace, key)
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.writes += 1;
        if self.writes == self.fail_at {
            return Err(StorageError::Full);
        }
        self.inner.write(namespace, key, data)
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.inner.delete(namespace, key)
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.inner.exists(namespace, key)
    }
}

// ── Plant helpers ─────────────────────────────────────────────

/// Seeded config with no random spawning or cascades.
pub fn quiet_config() -> PlantConfig {
    let mut config = PlantConfig {
        seed: Some(77),
        ..PlantConfig::default()
    };
    config.incidents.spawn_probability = 0.0;
    config.incidents.cascade_probability = 0.0;
    config
}

pub fn plant(config: PlantConfig) -> (Plant<ManualClock>, ManualClock) {
    let clock = ManualClock::new(0);
    let plant = Plant::new(config, clock.clone()).expect("valid config");
    (plant, clock)
}
