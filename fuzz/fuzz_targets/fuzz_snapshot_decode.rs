//! Fuzz target: snapshot blob decoding and restore
//!
//! Treats arbitrary bytes as a stored `sensors` / `actuators` blob and
//! verifies:
//! - Decoding never panics, only returns `StorageError::Codec`
//! - Restoring whatever decodes never panics and never adds records
//!
//! cargo fuzz run fuzz_snapshot_decode

#![no_main]

use libfuzzer_sys::fuzz_target;
use scadasim::actuators::ActuatorRecord;
use scadasim::adapters::time::ManualClock;
use scadasim::persist::{PlantSnapshot, decode};
use scadasim::sensors::SensorRecord;
use scadasim::{Plant, PlantConfig};

fuzz_target!(|data: &[u8]| {
    let sensors: Vec<SensorRecord> = decode(data).unwrap_or_default();
    let actuators: Vec<ActuatorRecord> = decode(data).unwrap_or_default();
    let _ = decode::<PlantSnapshot>(data);

    let Ok(plant) = Plant::new(PlantConfig { seed: Some(1), ..PlantConfig::default() }, ManualClock::new(0)) else {
        return;
    };
    let before = plant.all_actuators().len();
    plant.restore(&PlantSnapshot {
        sensors,
        actuators,
        ..PlantSnapshot::default()
    });
    assert_eq!(plant.all_actuators().len(), before);
});
