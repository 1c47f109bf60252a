//! Fuzz target: actuator command path
//!
//! Feeds arbitrary command names and parameters through
//! `ActuatorRegistry::execute_str` and verifies:
//! - No panics under arbitrary UTF-8 input
//! - A failed command never changes the command counter
//! - Speed always stays within 0–100
//!
//! cargo fuzz run fuzz_actuator_command

#![no_main]

use libfuzzer_sys::fuzz_target;
use scadasim::actuators::ActuatorRegistry;
use scadasim::{PlantConfig, Role};

const TARGETS: [&str; 4] = ["MTR-1", "PMP-2", "VLV-3", "NOPE"];

fuzz_target!(|data: &[u8]| {
    let Ok(text) = core::str::from_utf8(data) else {
        return;
    };
    let reg = ActuatorRegistry::new(&PlantConfig::default());

    for (i, line) in text.lines().take(64).enumerate() {
        let mut parts = line.splitn(2, ' ');
        let name = parts.next().unwrap_or("");
        let param = parts.next();
        let id = TARGETS[i % TARGETS.len()];

        let before = reg.get(id).ok().map(|r| r.command_count);
        let result = reg.execute_str(id, name, param, Role::None, i as u64);
        if let Ok(rec) = reg.get(id) {
            assert!((0.0..=100.0).contains(&rec.speed));
            if result.is_err() {
                assert_eq!(before, Some(rec.command_count));
            }
        }
    }
});
