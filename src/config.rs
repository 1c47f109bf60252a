//! Plant configuration parameters
//!
//! Every tunable of the simulation lives here: the equipment list, the
//! per-sensor-kind physics, status and alarm tables, interlock definitions,
//! incident settings and timing.  Values can be overridden from a JSON file
//! and are validated before the plant is built.

use serde::{Deserialize, Serialize};

use crate::actuators::{ActuatorKind, ActuatorState};
use crate::alarms::{AlarmSeverity, ThresholdBand};
use crate::app::ports::ConfigError;
use crate::ident::{ActuatorId, LineId, bounded, bounded_fmt};
use crate::physics::{Coupling, SensorKind};
use crate::safety::{InterlockSpec, Scope, TripAction, TripClause};

/// Hard ceiling on line count.
pub const MAX_LINES: LineId = 16;
/// Hard ceiling on cascade depth.
pub const MAX_CASCADE_DEPTH: u8 = 8;

// ---------------------------------------------------------------------------
// Per-kind tables
// ---------------------------------------------------------------------------

/// One value per sensor kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerKind<T> {
    pub temperature: T,
    pub pressure: T,
    pub flow: T,
    pub vibration: T,
    pub level: T,
}

impl<T> PerKind<T> {
    pub fn get(&self, kind: SensorKind) -> &T {
        match kind {
            SensorKind::Temperature => &self.temperature,
            SensorKind::Pressure => &self.pressure,
            SensorKind::Flow => &self.flow,
            SensorKind::Vibration => &self.vibration,
            SensorKind::Level => &self.level,
        }
    }

    pub fn get_mut(&mut self, kind: SensorKind) -> &mut T {
        match kind {
            SensorKind::Temperature => &mut self.temperature,
            SensorKind::Pressure => &mut self.pressure,
            SensorKind::Flow => &mut self.flow,
            SensorKind::Vibration => &mut self.vibration,
            SensorKind::Level => &mut self.level,
        }
    }
}

/// Nominal / warning / fault bands for the status label.
///
/// `Warning` outside `[warn_low, warn_high]`, `Fault` outside
/// `[fault_low, fault_high]` or while a fault override is active.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatusBands {
    pub warn_low: f32,
    pub warn_high: f32,
    pub fault_low: f32,
    pub fault_high: f32,
}

/// Physics, status and alarm table for one sensor kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorProfile {
    /// Resting base value.
    pub base: f32,
    /// Max drift change per sample.
    pub drift_step: f32,
    /// Drift is clamped to `±drift_band` around the base.
    pub drift_band: f32,
    pub noise_stddev: f32,
    /// Physical floor.
    pub min: f32,
    /// Physical ceiling.
    pub max: f32,
    pub coupling: Coupling,
    /// Added to the base while a `Spike` fault is active.
    pub spike_offset: f32,
    /// Noise multiplier while a `NoiseBurst` fault is active.
    pub burst_factor: f32,
    pub status: StatusBands,
    /// Alarm bands, ascending severity.
    pub alarms: heapless::Vec<ThresholdBand, 4>,
}

// ---------------------------------------------------------------------------
// Equipment
// ---------------------------------------------------------------------------

/// One actuator in the fixed equipment list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquipmentSpec {
    pub id: ActuatorId,
    pub line: LineId,
    pub kind: ActuatorKind,
    /// RPM at 100 % speed (motors and pumps).
    pub rated_rpm: f32,
    /// Flow in L/min at 100 % (pumps) or fully open (valves).
    pub rated_flow: f32,
    /// Starting state.
    pub initial_state: ActuatorState,
    /// Starting speed, 0–100.
    pub initial_speed: f32,
}

impl EquipmentSpec {
    pub fn motor(id: &str, line: LineId) -> Self {
        Self {
            id: bounded(id),
            line,
            kind: ActuatorKind::Motor,
            rated_rpm: 1750.0,
            rated_flow: 0.0,
            initial_state: ActuatorState::Running,
            initial_speed: 75.0,
        }
    }

    pub fn pump(id: &str, line: LineId) -> Self {
        Self {
            id: bounded(id),
            line,
            kind: ActuatorKind::Pump,
            rated_rpm: 3500.0,
            rated_flow: 160.0,
            initial_state: ActuatorState::Running,
            initial_speed: 75.0,
        }
    }

    pub fn valve(id: &str, line: LineId) -> Self {
        Self {
            id: bounded(id),
            line,
            kind: ActuatorKind::Valve,
            rated_rpm: 0.0,
            rated_flow: 160.0,
            initial_state: ActuatorState::Open,
            initial_speed: 100.0,
        }
    }

    /// Same equipment, different starting state.
    pub fn starting(mut self, state: ActuatorState) -> Self {
        self.initial_state = state;
        self
    }
}

// ---------------------------------------------------------------------------
// Incidents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentSettings {
    /// Incidents at this depth never spawn children.
    pub max_cascade_depth: u8,
    /// Chance a HIGH+ incident spawns a child.
    pub cascade_probability: f32,
    /// Chance per incident pass of a random depth-0 incident.
    pub spawn_probability: f32,
    /// Active incidents older than this are auto-resolved (0 = never).
    pub auto_resolve_ms: u64,
    pub max_active: usize,
    /// Resolved incidents retained in history.
    pub history_limit: usize,
    /// MOTOR_OVERLOAD multiplies the vibration base by this.
    pub overload_vibration_factor: f32,
    /// TEMP_SPIKE adds this to the temperature base.
    pub temp_spike_delta: f32,
    /// PRESSURE_LOSS multiplies the pressure base by this.
    pub pressure_loss_factor: f32,
}

impl Default for IncidentSettings {
    fn default() -> Self {
        Self {
            max_cascade_depth: 3,
            cascade_probability: 0.35,
            spawn_probability: 0.2,
            auto_resolve_ms: 180_000,
            max_active: 8,
            history_limit: 100,
            overload_vibration_factor: 5.0,
            temp_spike_delta: 35.0,
            pressure_loss_factor: 0.35,
        }
    }
}

// ---------------------------------------------------------------------------
// Plant
// ---------------------------------------------------------------------------

/// Core plant configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlantConfig {
    // --- Topology ---
    pub lines: LineId,
    pub equipment: Vec<EquipmentSpec>,

    // --- Sensors ---
    pub sensors: PerKind<SensorProfile>,

    // --- Safety ---
    pub interlocks: Vec<InterlockSpec>,

    // --- Incidents ---
    pub incidents: IncidentSettings,
    /// Key for forensic token derivation.
    pub token_secret: String,

    // --- Limits ---
    pub fault_min_ms: u32,
    pub fault_max_ms: u32,
    pub race_burst_limit: u32,
    pub alarm_history_limit: usize,

    // --- Timing ---
    /// Physics → sensors → alarms → interlocks period.
    pub tick_interval_ms: u64,
    /// Incident spawn / cascade / resolve period.
    pub incident_interval_ms: u64,
    /// Telemetry every N ticks.
    pub telemetry_every_ticks: u32,
    /// Snapshot every N ticks.
    pub snapshot_every_ticks: u32,

    /// Fixed RNG seed for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for PlantConfig {
    fn default() -> Self {
        let lines = 4;
        Self {
            lines,
            equipment: default_equipment(lines),
            sensors: default_sensor_profiles(),
            interlocks: default_interlocks(lines),
            incidents: IncidentSettings::default(),
            token_secret: String::from("scada-forensics-2024"),

            fault_min_ms: 100,
            fault_max_ms: 600_000,
            race_burst_limit: 1024,
            alarm_history_limit: 128,

            tick_interval_ms: 500,      // 2 Hz
            incident_interval_ms: 5000, // 0.2 Hz
            telemetry_every_ticks: 10,
            snapshot_every_ticks: 120,

            seed: None,
        }
    }
}

impl PlantConfig {
    /// Parse a JSON override file.  Missing fields take defaults.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text).map_err(|_| ConfigError::Corrupted)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject structurally invalid tables.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lines == 0 || self.lines > MAX_LINES {
            return Err(ConfigError::ValidationFailed("lines must be 1..=16"));
        }

        for (i, eq) in self.equipment.iter().enumerate() {
            if eq.line == 0 || eq.line > self.lines {
                return Err(ConfigError::ValidationFailed("equipment line out of range"));
            }
            if eq.id.is_empty() {
                return Err(ConfigError::ValidationFailed("equipment id empty"));
            }
            if self.equipment[..i].iter().any(|other| other.id == eq.id) {
                return Err(ConfigError::ValidationFailed("duplicate equipment id"));
            }
            if !eq.kind.allows(eq.initial_state) || !eq.initial_state.is_healthy() {
                return Err(ConfigError::ValidationFailed("initial state illegal for kind"));
            }
            if !(0.0..=100.0).contains(&eq.initial_speed) {
                return Err(ConfigError::ValidationFailed("initial speed must be 0..=100"));
            }
        }

        for kind in SensorKind::ALL {
            validate_profile(self.sensors.get(kind))?;
        }

        for (i, il) in self.interlocks.iter().enumerate() {
            if il.line == 0 || il.line > self.lines {
                return Err(ConfigError::ValidationFailed("interlock line out of range"));
            }
            if il.clauses.is_empty() {
                return Err(ConfigError::ValidationFailed("interlock has no condition"));
            }
            if self.interlocks[..i].iter().any(|other| other.id == il.id) {
                return Err(ConfigError::ValidationFailed("duplicate interlock id"));
            }
        }

        let inc = &self.incidents;
        if inc.max_cascade_depth > MAX_CASCADE_DEPTH {
            return Err(ConfigError::ValidationFailed("max_cascade_depth above 8"));
        }
        if !(0.0..=1.0).contains(&inc.cascade_probability)
            || !(0.0..=1.0).contains(&inc.spawn_probability)
        {
            return Err(ConfigError::ValidationFailed("probabilities must be 0..=1"));
        }
        if inc.max_active == 0 || inc.history_limit == 0 {
            return Err(ConfigError::ValidationFailed("incident limits must be positive"));
        }
        if !(inc.overload_vibration_factor.is_finite() && inc.overload_vibration_factor > 0.0)
            || !inc.temp_spike_delta.is_finite()
            || !(inc.pressure_loss_factor.is_finite() && inc.pressure_loss_factor > 0.0)
        {
            return Err(ConfigError::ValidationFailed("incident effect magnitudes invalid"));
        }

        if self.fault_min_ms == 0 || self.fault_min_ms > self.fault_max_ms {
            return Err(ConfigError::ValidationFailed("fault duration limits invalid"));
        }
        if self.race_burst_limit == 0 {
            return Err(ConfigError::ValidationFailed("race_burst_limit must be positive"));
        }
        if self.alarm_history_limit == 0 {
            return Err(ConfigError::ValidationFailed("alarm_history_limit must be positive"));
        }
        if self.tick_interval_ms == 0 || self.incident_interval_ms < self.tick_interval_ms {
            return Err(ConfigError::ValidationFailed("incident interval must be >= tick interval > 0"));
        }
        if self.telemetry_every_ticks == 0 || self.snapshot_every_ticks == 0 {
            return Err(ConfigError::ValidationFailed("duty periods must be positive"));
        }
        Ok(())
    }
}

fn validate_profile(p: &SensorProfile) -> Result<(), ConfigError> {
    let finite = [
        p.base,
        p.drift_step,
        p.drift_band,
        p.noise_stddev,
        p.min,
        p.max,
        p.spike_offset,
        p.burst_factor,
    ];
    if finite.iter().any(|v| !v.is_finite()) {
        return Err(ConfigError::ValidationFailed("profile values must be finite"));
    }
    if p.min >= p.max {
        return Err(ConfigError::ValidationFailed("physical min must be below max"));
    }
    if p.base < p.min || p.base > p.max {
        return Err(ConfigError::ValidationFailed("base outside physical range"));
    }
    if p.drift_step < 0.0 || p.drift_band < 0.0 || p.noise_stddev < 0.0 || p.burst_factor < 1.0 {
        return Err(ConfigError::ValidationFailed("drift/noise must be non-negative"));
    }
    let s = p.status;
    if !(s.fault_low <= s.warn_low && s.warn_low < s.warn_high && s.warn_high <= s.fault_high) {
        return Err(ConfigError::ValidationFailed("status bands must nest"));
    }
    let mut previous: Option<&ThresholdBand> = None;
    for band in &p.alarms {
        if !(band.trigger.is_finite() && band.clear.is_finite()) || band.trigger <= band.clear {
            return Err(ConfigError::ValidationFailed("alarm trigger must exceed clear"));
        }
        if let Some(prev) = previous {
            if band.severity <= prev.severity || band.trigger <= prev.trigger {
                return Err(ConfigError::ValidationFailed("alarm bands must ascend"));
            }
        }
        previous = Some(band);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Motor, pump and valve per line: `MTR-1`, `PMP-1`, `VLV-1`, ...
pub fn default_equipment(lines: LineId) -> Vec<EquipmentSpec> {
    let mut out = Vec::with_capacity(lines as usize * 3);
    for line in 1..=lines {
        out.push(EquipmentSpec::motor(&format!("MTR-{line}"), line));
        out.push(EquipmentSpec::pump(&format!("PMP-{line}"), line));
        out.push(EquipmentSpec::valve(&format!("VLV-{line}"), line));
    }
    out
}

/// Overpressure, overtemperature and dry-run interlocks per line.
pub fn default_interlocks(lines: LineId) -> Vec<InterlockSpec> {
    let mut out = Vec::with_capacity(lines as usize * 3);
    for line in 1..=lines {
        out.push(InterlockSpec::new(
            bounded_fmt(format_args!("IL-{line}-OVERPRESS")),
            line,
            &format!("line{line} overpressure"),
            &[TripClause::SensorAbove { kind: SensorKind::Pressure, limit: 8.5 }],
            TripAction::EmergencyStop(Scope::Plant),
        ));
        out.push(InterlockSpec::new(
            bounded_fmt(format_args!("IL-{line}-OVERTEMP")),
            line,
            &format!("line{line} overtemperature"),
            &[TripClause::SensorAbove { kind: SensorKind::Temperature, limit: 100.0 }],
            TripAction::Stop(ActuatorKind::Motor),
        ));
        out.push(InterlockSpec::new(
            bounded_fmt(format_args!("IL-{line}-DRYRUN")),
            line,
            &format!("line{line} pump dry-run"),
            &[
                TripClause::SensorBelow { kind: SensorKind::Level, limit: 10.0 },
                TripClause::ActuatorIs { kind: ActuatorKind::Pump, state: ActuatorState::Running },
            ],
            TripAction::Stop(ActuatorKind::Pump),
        ));
    }
    out
}

fn bands(list: &[(AlarmSeverity, f32, f32)]) -> heapless::Vec<ThresholdBand, 4> {
    list.iter()
        .take(4)
        .map(|&(severity, trigger, clear)| ThresholdBand { severity, trigger, clear })
        .collect()
}

pub fn default_sensor_profiles() -> PerKind<SensorProfile> {
    use AlarmSeverity::{Critical, High, Low, Medium};

    PerKind {
        temperature: SensorProfile {
            base: 60.0,
            drift_step: 0.3,
            drift_band: 4.0,
            noise_stddev: 0.5,
            min: -20.0,
            max: 400.0,
            coupling: Coupling::None,
            spike_offset: 45.0,
            burst_factor: 6.0,
            status: StatusBands { warn_low: 10.0, warn_high: 85.0, fault_low: 0.0, fault_high: 110.0 },
            alarms: bands(&[(Medium, 80.0, 76.0), (High, 95.0, 90.0), (Critical, 110.0, 104.0)]),
        },
        pressure: SensorProfile {
            base: 4.5,
            drift_step: 0.05,
            drift_band: 0.5,
            noise_stddev: 0.08,
            min: 0.0,
            max: 16.0,
            coupling: Coupling::Deadhead { gain: 1.0 },
            spike_offset: 5.0,
            burst_factor: 5.0,
            status: StatusBands { warn_low: 2.0, warn_high: 7.0, fault_low: 1.0, fault_high: 9.0 },
            alarms: bands(&[(Medium, 6.5, 6.2), (High, 7.5, 7.1), (Critical, 8.5, 8.1)]),
        },
        flow: SensorProfile {
            base: 120.0,
            drift_step: 1.0,
            drift_band: 8.0,
            noise_stddev: 2.5,
            min: 0.0,
            max: 300.0,
            coupling: Coupling::Pump { gain: 1.0 },
            spike_offset: 90.0,
            burst_factor: 4.0,
            status: StatusBands { warn_low: 40.0, warn_high: 180.0, fault_low: 10.0, fault_high: 240.0 },
            alarms: bands(&[(High, 190.0, 180.0), (Critical, 230.0, 220.0)]),
        },
        vibration: SensorProfile {
            base: 2.5,
            drift_step: 0.05,
            drift_band: 0.4,
            noise_stddev: 0.15,
            min: 0.0,
            max: 50.0,
            coupling: Coupling::Motor { gain: 0.8 },
            spike_offset: 8.0,
            burst_factor: 5.0,
            status: StatusBands { warn_low: 0.0, warn_high: 6.0, fault_low: 0.0, fault_high: 11.0 },
            alarms: bands(&[(Low, 4.5, 4.0), (Medium, 6.0, 5.5), (High, 9.0, 8.5), (Critical, 14.0, 13.0)]),
        },
        level: SensorProfile {
            base: 65.0,
            drift_step: 0.2,
            drift_band: 6.0,
            noise_stddev: 0.4,
            min: 0.0,
            max: 100.0,
            coupling: Coupling::None,
            spike_offset: 30.0,
            burst_factor: 4.0,
            status: StatusBands { warn_low: 20.0, warn_high: 90.0, fault_low: 10.0, fault_high: 97.0 },
            alarms: bands(&[(High, 90.0, 86.0), (Critical, 96.0, 93.0)]),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let c = PlantConfig::default();
        c.validate().unwrap();
        assert_eq!(c.equipment.len(), 12);
        assert_eq!(c.interlocks.len(), 12);
    }

    #[test]
    fn hysteresis_holds_for_every_band() {
        let c = PlantConfig::default();
        for kind in SensorKind::ALL {
            for band in &c.sensors.get(kind).alarms {
                assert!(band.trigger > band.clear, "{kind}: {band:?}");
            }
        }
    }

    #[test]
    fn rejects_inverted_band() {
        let mut c = PlantConfig::default();
        c.sensors.pressure.alarms[0].clear = 9.0;
        assert!(matches!(c.validate(), Err(ConfigError::ValidationFailed(_))));
    }

    #[test]
    fn rejects_duplicate_equipment() {
        let mut c = PlantConfig::default();
        c.equipment.push(EquipmentSpec::motor("MTR-1", 2));
        assert!(c.validate().is_err());
    }

    #[test]
    fn rejects_illegal_initial_state() {
        let mut c = PlantConfig::default();
        c.equipment[0] = EquipmentSpec::motor("MTR-1", 1).starting(ActuatorState::Open);
        assert!(c.validate().is_err());
    }

    #[test]
    fn rejects_zero_lines_and_bad_timing() {
        let c = PlantConfig { lines: 0, ..PlantConfig::default() };
        assert!(c.validate().is_err());
        let c = PlantConfig { incident_interval_ms: 10, ..PlantConfig::default() };
        assert!(c.validate().is_err());
    }

    #[test]
    fn json_override_keeps_defaults() {
        let c = PlantConfig::from_json(r#"{ "seed": 42, "tick_interval_ms": 250 }"#).unwrap();
        assert_eq!(c.seed, Some(42));
        assert_eq!(c.tick_interval_ms, 250);
        assert_eq!(c.lines, 4);
    }

    #[test]
    fn json_garbage_is_corrupted() {
        assert!(matches!(PlantConfig::from_json("{ nope"), Err(ConfigError::Corrupted)));
    }

    #[test]
    fn serde_roundtrip() {
        let c = PlantConfig::default();
        let json = serde_json::to_string(&c).unwrap();
        let c2: PlantConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(c.equipment, c2.equipment);
        assert_eq!(c.sensors, c2.sensors);
        c2.validate().unwrap();
    }
}
