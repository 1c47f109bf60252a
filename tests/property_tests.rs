//! Property tests for the plant's structural invariants.
//!
//! Engines are driven directly (no clock, no threads) so every case is
//! deterministic for a given seed.

use std::collections::HashSet;

use proptest::prelude::*;

use scadasim::actuators::{ActuatorCommand, ActuatorRecord, ActuatorRegistry};
use scadasim::alarms::{AlarmEngine, AlarmSeverity, AlarmStatus};
use scadasim::app::commands::Role;
use scadasim::config::PlantConfig;
use scadasim::incidents::effects::EffectTargets;
use scadasim::incidents::{IncidentEngine, IncidentType, NewIncident, Resolution};
use scadasim::physics::{DriveLevels, PhysicsEngine, SensorKind};
use scadasim::safety::SafetyInterlockEngine;
use scadasim::sensors::SensorRegistry;

fn seeded(seed: u64) -> PlantConfig {
    PlantConfig {
        seed: Some(seed),
        ..PlantConfig::default()
    }
}

fn severity() -> impl Strategy<Value = AlarmSeverity> {
    prop_oneof![
        Just(AlarmSeverity::Low),
        Just(AlarmSeverity::Medium),
        Just(AlarmSeverity::High),
        Just(AlarmSeverity::Critical),
    ]
}

fn incident_type() -> impl Strategy<Value = IncidentType> {
    (0..IncidentType::ALL.len()).prop_map(|i| IncidentType::ALL[i])
}

// ── Physical bounds ───────────────────────────────────────────

proptest! {
    /// Drift and noise never push a reading outside its physical range,
    /// whatever the actuator drive.
    #[test]
    fn sensor_values_stay_within_physical_bounds(
        seed in any::<u64>(),
        ticks in 1usize..150,
        motor in 0.0f32..=100.0,
        pump in 0.0f32..=100.0,
        valve_open in any::<bool>(),
    ) {
        let config = seeded(seed);
        let mut physics = PhysicsEngine::new(&config);
        let mut sensors = SensorRegistry::new(&config);
        for line in 1..=config.lines {
            physics
                .set_drive(line, DriveLevels { motor_pct: motor, pump_pct: pump, valve_open })
                .unwrap();
        }

        for t in 0..ticks {
            sensors.update(&mut physics, t as u64 * 500);
            for rec in sensors.all() {
                let (min, max) = physics.physical_range(rec.line, rec.kind).unwrap();
                prop_assert!(rec.value.is_finite(), "{} not finite", rec.id);
                prop_assert!(
                    (min..=max).contains(&rec.value),
                    "{} = {} outside [{min}, {max}]", rec.id, rec.value
                );
            }
        }
    }
}

// ── Alarm uniqueness ──────────────────────────────────────────

proptest! {
    /// However the readings wander across band edges, a sensor never owns
    /// more than one active alarm.
    #[test]
    fn at_most_one_active_alarm_per_sensor(
        seed in any::<u64>(),
        path in proptest::collection::vec((0.0f32..16.0, 0.0f32..50.0, 0.0f32..400.0), 1..60),
    ) {
        let config = seeded(seed);
        let mut physics = PhysicsEngine::new(&config);
        let mut sensors = SensorRegistry::new(&config);
        let mut alarms = AlarmEngine::new(&config);

        for (t, (pressure, vibration, temperature)) in path.into_iter().enumerate() {
            physics.set_base(1, SensorKind::Pressure, pressure).unwrap();
            physics.set_base(2, SensorKind::Vibration, vibration).unwrap();
            physics.set_base(3, SensorKind::Temperature, temperature).unwrap();
            let now = t as u64 * 500;
            sensors.update(&mut physics, now);
            alarms.evaluate(sensors.all(), now);

            let mut seen = HashSet::new();
            for alarm in alarms.active() {
                prop_assert!(seen.insert(alarm.sensor.clone()), "two active alarms on {}", alarm.sensor);
                prop_assert_ne!(alarm.status, AlarmStatus::Cleared);
            }
        }
    }

    /// Every configured band keeps its clear threshold below its trigger.
    #[test]
    fn default_bands_have_hysteresis(kind in (0..SensorKind::COUNT).prop_map(|i| SensorKind::ALL[i])) {
        let config = PlantConfig::default();
        for band in &config.sensors.get(kind).alarms {
            prop_assert!(band.trigger > band.clear);
        }
    }
}

// ── Incidents ─────────────────────────────────────────────────

/// Everything an incident may override, captured for comparison.
#[derive(Debug, PartialEq)]
struct Overridable {
    actuators: Vec<ActuatorRecord>,
    bases: Vec<u32>,
    faults: usize,
    bypassed: Vec<bool>,
}

fn capture(physics: &PhysicsEngine, actuators: &ActuatorRegistry, safety: &SafetyInterlockEngine, now: u64) -> Overridable {
    let mut bases = Vec::new();
    for line in 1..=physics.lines() {
        for kind in SensorKind::ALL {
            bases.push(physics.base_of(line, kind).unwrap().to_bits());
        }
    }
    Overridable {
        actuators: actuators.all(),
        bases,
        faults: physics.active_faults(now).len(),
        bypassed: safety.all().iter().map(|r| r.bypassed).collect(),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Resolving an incident restores exactly what it overrode.
    #[test]
    fn apply_then_resolve_is_bit_exact(
        seed in any::<u64>(),
        kind in incident_type(),
        line in 1u8..=4,
        sev in severity(),
    ) {
        let mut config = seeded(seed);
        config.incidents.cascade_probability = 0.0;
        let mut physics = PhysicsEngine::new(&config);
        let actuators = ActuatorRegistry::new(&config);
        let mut safety = SafetyInterlockEngine::new(&config);
        let mut engine = IncidentEngine::new(&config);

        let before = capture(&physics, &actuators, &safety, 10);
        let mut targets = EffectTargets { physics: &mut physics, actuators: &actuators, safety: &mut safety, now: 10 };
        let created = engine.create(NewIncident::new(kind, line, sev, 0), &mut targets).unwrap();
        prop_assert!(created.children.is_empty());

        let mut targets = EffectTargets { physics: &mut physics, actuators: &actuators, safety: &mut safety, now: 20 };
        engine.resolve(&created.incident.id, Resolution::Operator, &mut targets).unwrap();

        let after = capture(&physics, &actuators, &safety, 20);
        prop_assert_eq!(before, after);
    }

    /// With certain cascades, no record ever exceeds the depth limit.
    #[test]
    fn cascade_depth_is_bounded(
        seed in any::<u64>(),
        max_depth in 0u8..=4,
        roots in proptest::collection::vec((incident_type(), 1u8..=4), 1..6),
    ) {
        let mut config = seeded(seed);
        config.incidents.cascade_probability = 1.0;
        config.incidents.max_cascade_depth = max_depth;
        config.incidents.max_active = 64;
        let mut physics = PhysicsEngine::new(&config);
        let actuators = ActuatorRegistry::new(&config);
        let mut safety = SafetyInterlockEngine::new(&config);
        let mut engine = IncidentEngine::new(&config);

        for (i, (kind, line)) in roots.into_iter().enumerate() {
            let mut targets = EffectTargets {
                physics: &mut physics,
                actuators: &actuators,
                safety: &mut safety,
                now: i as u64,
            };
            // Duplicates are expected and refused.
            let _ = engine.create(NewIncident::new(kind, line, AlarmSeverity::Critical, 0), &mut targets);
        }

        for rec in engine.all() {
            prop_assert!(rec.cascade_depth <= max_depth, "{} at depth {}", rec.id, rec.cascade_depth);
            if rec.cascade_depth > 0 {
                prop_assert!(rec.parent.is_some());
            }
        }
    }
}

// ── Actuators ─────────────────────────────────────────────────

fn command() -> impl Strategy<Value = (&'static str, Option<String>)> {
    prop_oneof![
        Just(("start", None)),
        Just(("stop", None)),
        Just(("open", None)),
        Just(("close", None)),
        Just(("override", None)),
        (-20.0f32..150.0).prop_map(|v| ("set_speed", Some(format!("{v:.1}")))),
    ]
}

proptest! {
    /// Reordering commands across different actuators, while keeping each
    /// actuator's own order, yields identical records.
    #[test]
    fn distinct_actuators_do_not_cross_talk(
        ops in proptest::collection::vec((0usize..12, command()), 1..40),
    ) {
        let config = PlantConfig::default();
        let ids: Vec<String> = config.equipment.iter().map(|e| e.id.to_string()).collect();

        let interleaved = ActuatorRegistry::new(&config);
        for (idx, (name, param)) in &ops {
            let _ = interleaved.execute_str(&ids[*idx], name, param.as_deref(), Role::Operator, 1);
        }

        let mut grouped_ops = ops.clone();
        grouped_ops.sort_by_key(|(idx, _)| *idx);
        let grouped = ActuatorRegistry::new(&config);
        for (idx, (name, param)) in &grouped_ops {
            let _ = grouped.execute_str(&ids[*idx], name, param.as_deref(), Role::Operator, 1);
        }

        prop_assert_eq!(interleaved.all(), grouped.all());
    }

    /// A burst of N with one execute landing anywhere inside it leaves a
    /// command count in [max(N, 1), N + 1].
    #[test]
    fn race_count_stays_in_interleaving_bounds(n in 0u32..=300, at in 0u32..=300) {
        let registry = ActuatorRegistry::new(&PlantConfig::default());
        let at = at.min(n);

        let mut batch = registry.begin_race("MTR-1", n, Role::Viewer).unwrap();
        prop_assert_eq!(batch.issued(), n);
        for _ in 0..at {
            registry.apply_next(&mut batch, 1);
        }
        registry
            .execute("MTR-1", ActuatorCommand::SetSpeed(40.0), Role::Operator, 2)
            .unwrap();
        while registry.apply_next(&mut batch, 3).is_some() {}

        let count = registry.get("MTR-1").unwrap().command_count;
        prop_assert!((n.max(1)..=n + 1).contains(&count), "count {count} for burst {n}");
    }
}
