//! Process physics model.
//!
//! Produces a plausible value for every `(line, sensor kind)` pair:
//!
//! ```text
//!   value = clamp( base + drift + coupling + noise )      no fault
//!   value = clamp( fault override )                       fault active
//! ```
//!
//! - **drift** is a bounded random walk per channel, clamped to
//!   `±drift_band` around the base.
//! - **noise** is gaussian with the kind's configured stddev.
//! - **coupling** ties flow / vibration / pressure to the line's actuator
//!   drive levels, pushed in by the tick driver via [`PhysicsEngine::set_drive`].
//! - **faults** are time-boxed overrides installed by
//!   [`PhysicsEngine::inject_fault`]; they expire lazily on the next read.
//!
//! Every output is finite and inside the kind's physical `[min, max]`.

use core::fmt;
use core::str::FromStr;

use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::config::{PlantConfig, SensorProfile};
use crate::error::{Clamped, CoreError, Entity, InvalidReason, Result};
use crate::ident::LineId;

// ---------------------------------------------------------------------------
// Sensor kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SensorKind {
    Temperature,
    Pressure,
    Flow,
    Vibration,
    Level,
}

impl SensorKind {
    pub const COUNT: usize = 5;
    pub const ALL: [Self; Self::COUNT] = [
        Self::Temperature,
        Self::Pressure,
        Self::Flow,
        Self::Vibration,
        Self::Level,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    /// Short tag used in sensor ids (`S-Temp-1`).
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Temperature => "Temp",
            Self::Pressure => "Press",
            Self::Flow => "Flow",
            Self::Vibration => "Vib",
            Self::Level => "Level",
        }
    }

    pub const fn unit(self) -> &'static str {
        match self {
            Self::Temperature => "C",
            Self::Pressure => "bar",
            Self::Flow => "L/min",
            Self::Vibration => "mm/s",
            Self::Level => "%",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for SensorKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|k| k.tag().eq_ignore_ascii_case(s) || format!("{k:?}").eq_ignore_ascii_case(s))
            .ok_or(CoreError::InvalidCommand(InvalidReason::BadParameter))
    }
}

// ---------------------------------------------------------------------------
// Coupling and drive
// ---------------------------------------------------------------------------

/// How a sensor kind responds to its line's actuators.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Coupling {
    None,
    /// Scales with motor speed: `gain·base·(frac − 1)`.
    Motor { gain: f32 },
    /// Scales with pump speed through an open valve: `gain·base·(frac − 1)`.
    Pump { gain: f32 },
    /// Rises while the pump pushes against a closed valve: `gain·base·frac`.
    Deadhead { gain: f32 },
}

/// Per-line actuator drive pushed in by the tick driver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriveLevels {
    /// Effective motor speed 0–100 (0 unless running).
    pub motor_pct: f32,
    /// Effective pump speed 0–100 (0 unless running).
    pub pump_pct: f32,
    pub valve_open: bool,
}

impl Default for DriveLevels {
    fn default() -> Self {
        Self {
            motor_pct: 100.0,
            pump_pct: 100.0,
            valve_open: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Faults
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultKind {
    /// Freeze at the value composed when the fault was installed.
    StuckAt,
    /// Jump to `base + spike_offset`.
    Spike,
    /// Read the physical minimum (signal lost).
    DropToZero,
    /// Noise multiplied by the kind's burst factor.
    NoiseBurst,
}

impl FromStr for FaultKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "stuck" | "stuck_at" => Ok(Self::StuckAt),
            "spike" => Ok(Self::Spike),
            "drop" | "drop_to_zero" | "zero" => Ok(Self::DropToZero),
            "noise" | "noise_burst" => Ok(Self::NoiseBurst),
            _ => Err(CoreError::InvalidCommand(InvalidReason::BadParameter)),
        }
    }
}

/// An installed fault override.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaultInfo {
    pub kind: FaultKind,
    pub installed_at: u64,
    pub expires_at: u64,
    /// Distinguishes re-injections on the same channel.
    pub generation: u32,
    /// Value held by `StuckAt`.
    pub held_value: f32,
}

/// Handle returned by [`PhysicsEngine::inject_fault`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaultHandle {
    pub generation: u32,
    pub duration_ms: Clamped<u32>,
    pub expires_at: u64,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Channel {
    profile: SensorProfile,
    base: f32,
    drift: f32,
    last: f32,
    fault: Option<FaultInfo>,
}

/// The physics engine.  One channel per `(line, kind)`.
pub struct PhysicsEngine {
    lines: LineId,
    channels: Vec<Channel>,
    drive: Vec<DriveLevels>,
    rng: StdRng,
    fault_min_ms: u32,
    fault_max_ms: u32,
    next_generation: u32,
}

impl PhysicsEngine {
    pub fn new(config: &PlantConfig) -> Self {
        let mut channels = Vec::with_capacity(config.lines as usize * SensorKind::COUNT);
        for _line in 1..=config.lines {
            for kind in SensorKind::ALL {
                let profile = config.sensors.get(kind).clone();
                channels.push(Channel {
                    base: profile.base,
                    drift: 0.0,
                    last: profile.base,
                    fault: None,
                    profile,
                });
            }
        }
        let seed = config.seed.unwrap_or_else(|| rand::rng().random());
        Self {
            lines: config.lines,
            channels,
            drive: vec![DriveLevels::default(); config.lines as usize],
            rng: StdRng::seed_from_u64(seed),
            fault_min_ms: config.fault_min_ms,
            fault_max_ms: config.fault_max_ms,
            next_generation: 1,
        }
    }

    pub fn lines(&self) -> LineId {
        self.lines
    }

    /// Push the line's current actuator drive.
    pub fn set_drive(&mut self, line: LineId, drive: DriveLevels) -> Result<()> {
        let idx = self.line_index(line)?;
        self.drive[idx] = DriveLevels {
            motor_pct: drive.motor_pct.clamp(0.0, 100.0),
            pump_pct: drive.pump_pct.clamp(0.0, 100.0),
            valve_open: drive.valve_open,
        };
        Ok(())
    }

    pub fn drive(&self, line: LineId) -> Result<DriveLevels> {
        Ok(self.drive[self.line_index(line)?])
    }

    /// Step drift, draw noise and compose a fresh value for the channel.
    pub fn value_of(&mut self, line: LineId, kind: SensorKind, now: u64) -> Result<f32> {
        let key = self.key(line, kind)?;
        let drive = self.drive[line as usize - 1];
        let noise: f32 = self.rng.sample(StandardNormal);
        let step = self.channels[key].profile.drift_step.abs();
        let walk = if step > 0.0 {
            self.rng.random_range(-step..=step)
        } else {
            0.0
        };

        let ch = &mut self.channels[key];
        let band = ch.profile.drift_band.abs();
        ch.drift = (ch.drift + walk).clamp(-band, band);

        if ch.fault.is_some_and(|f| now >= f.expires_at) {
            debug!("physics: fault on L{line}/{kind} expired");
            ch.fault = None;
        }

        let p = &ch.profile;
        let nominal = ch.base + ch.drift + coupling_term(p, drive);
        let raw = match ch.fault {
            None => nominal + noise * p.noise_stddev,
            Some(f) => match f.kind {
                FaultKind::StuckAt => f.held_value,
                FaultKind::Spike => ch.base + p.spike_offset,
                FaultKind::DropToZero => p.min,
                FaultKind::NoiseBurst => nominal + noise * p.noise_stddev * p.burst_factor,
            },
        };
        let value = physical(raw, p.min, p.max);
        ch.last = value;
        Ok(value)
    }

    /// Last composed value, no random draws.
    pub fn last_value(&self, line: LineId, kind: SensorKind) -> Result<f32> {
        Ok(self.channels[self.key(line, kind)?].last)
    }

    /// Install a time-boxed override.  Duration is clamped, never rejected.
    pub fn inject_fault(
        &mut self,
        line: LineId,
        kind: SensorKind,
        fault: FaultKind,
        duration_ms: u32,
        now: u64,
    ) -> Result<FaultHandle> {
        let key = self.key(line, kind)?;
        let duration = Clamped::<u32>::clamp(duration_ms, self.fault_min_ms, self.fault_max_ms);
        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1).max(1);

        let ch = &mut self.channels[key];
        let expires_at = now.saturating_add(u64::from(duration.value));
        ch.fault = Some(FaultInfo {
            kind: fault,
            installed_at: now,
            expires_at,
            generation,
            held_value: ch.last,
        });
        info!(
            "physics: {fault:?} fault on L{line}/{kind} for {}ms{}",
            duration.value,
            if duration.clamped { " (clamped)" } else { "" }
        );
        Ok(FaultHandle {
            generation,
            duration_ms: duration,
            expires_at,
        })
    }

    /// Remove the channel's fault.  With `generation`, only that exact
    /// installation is removed; a newer fault is left in place.
    pub fn clear_fault(&mut self, line: LineId, kind: SensorKind, generation: Option<u32>) -> Result<bool> {
        let key = self.key(line, kind)?;
        let ch = &mut self.channels[key];
        let matches = match (ch.fault, generation) {
            (Some(f), Some(g)) => f.generation == g,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if matches {
            ch.fault = None;
        }
        Ok(matches)
    }

    pub fn is_faulted(&self, line: LineId, kind: SensorKind, now: u64) -> Result<bool> {
        Ok(self.fault_info(line, kind, now)?.is_some())
    }

    pub fn fault_info(&self, line: LineId, kind: SensorKind, now: u64) -> Result<Option<FaultInfo>> {
        let ch = &self.channels[self.key(line, kind)?];
        Ok(ch.fault.filter(|f| now < f.expires_at))
    }

    /// Every unexpired fault in the plant.
    pub fn active_faults(&self, now: u64) -> Vec<(LineId, SensorKind, FaultInfo)> {
        self.channels
            .iter()
            .enumerate()
            .filter_map(|(i, ch)| {
                let f = ch.fault.filter(|f| now < f.expires_at)?;
                let line = (i / SensorKind::COUNT) as LineId + 1;
                Some((line, SensorKind::ALL[i % SensorKind::COUNT], f))
            })
            .collect()
    }

    /// Move the channel's base.  Out-of-range values are clamped.
    pub fn set_base(&mut self, line: LineId, kind: SensorKind, value: f32) -> Result<Clamped<f32>> {
        let key = self.key(line, kind)?;
        let ch = &mut self.channels[key];
        let applied = Clamped::<f32>::clamp(value, ch.profile.min, ch.profile.max);
        ch.base = applied.value;
        Ok(applied)
    }

    pub fn base_of(&self, line: LineId, kind: SensorKind) -> Result<f32> {
        Ok(self.channels[self.key(line, kind)?].base)
    }

    /// Put the channel back on its configured base.  Returns that base.
    pub fn reset_base(&mut self, line: LineId, kind: SensorKind) -> Result<f32> {
        let key = self.key(line, kind)?;
        let ch = &mut self.channels[key];
        ch.base = ch.profile.base;
        Ok(ch.base)
    }

    /// Physical `[min, max]` for the channel.
    pub fn physical_range(&self, line: LineId, kind: SensorKind) -> Result<(f32, f32)> {
        let p = &self.channels[self.key(line, kind)?].profile;
        Ok((p.min, p.max))
    }

    // ── Internal ──────────────────────────────────────────────────

    fn line_index(&self, line: LineId) -> Result<usize> {
        if line == 0 || line > self.lines {
            return Err(CoreError::NotFound(Entity::Line));
        }
        Ok(line as usize - 1)
    }

    fn key(&self, line: LineId, kind: SensorKind) -> Result<usize> {
        Ok(self.line_index(line)? * SensorKind::COUNT + kind.index())
    }
}

fn coupling_term(p: &SensorProfile, drive: DriveLevels) -> f32 {
    match p.coupling {
        Coupling::None => 0.0,
        Coupling::Motor { gain } => gain * p.base * (drive.motor_pct / 100.0 - 1.0),
        Coupling::Pump { gain } => {
            let through = if drive.valve_open { drive.pump_pct / 100.0 } else { 0.0 };
            gain * p.base * (through - 1.0)
        }
        Coupling::Deadhead { gain } => {
            if drive.valve_open {
                0.0
            } else {
                gain * p.base * drive.pump_pct / 100.0
            }
        }
    }
}

fn physical(raw: f32, min: f32, max: f32) -> f32 {
    if raw.is_finite() { raw.clamp(min, max) } else { min }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> PhysicsEngine {
        let config = PlantConfig {
            seed: Some(7),
            ..PlantConfig::default()
        };
        PhysicsEngine::new(&config)
    }

    #[test]
    fn unknown_line_is_not_found() {
        let mut e = engine();
        assert_eq!(
            e.value_of(0, SensorKind::Temperature, 0),
            Err(CoreError::NotFound(Entity::Line))
        );
        assert!(e.value_of(99, SensorKind::Temperature, 0).is_err());
    }

    #[test]
    fn values_stay_in_physical_band() {
        let mut e = engine();
        for t in 0..2000 {
            for kind in SensorKind::ALL {
                let v = e.value_of(1, kind, t).unwrap();
                let (min, max) = e.physical_range(1, kind).unwrap();
                assert!(v.is_finite() && v >= min && v <= max, "{kind}: {v}");
            }
        }
    }

    #[test]
    fn spike_holds_then_reverts() {
        let mut e = engine();
        let base = e.base_of(1, SensorKind::Temperature).unwrap();
        let h = e
            .inject_fault(1, SensorKind::Temperature, FaultKind::Spike, 5000, 1_000)
            .unwrap();
        assert!(!h.duration_ms.clamped);

        let spike = e.value_of(1, SensorKind::Temperature, 1_500).unwrap();
        let again = e.value_of(1, SensorKind::Temperature, 5_999).unwrap();
        assert_eq!(spike, again);
        assert!(spike > base + 10.0);
        assert!(e.is_faulted(1, SensorKind::Temperature, 5_999).unwrap());

        let after = e.value_of(1, SensorKind::Temperature, 6_000).unwrap();
        assert!(!e.is_faulted(1, SensorKind::Temperature, 6_000).unwrap());
        assert!((after - base).abs() < 10.0);
    }

    #[test]
    fn fault_duration_is_clamped() {
        let mut e = engine();
        let h = e
            .inject_fault(2, SensorKind::Flow, FaultKind::DropToZero, u32::MAX, 0)
            .unwrap();
        assert!(h.duration_ms.clamped);
        assert_eq!(h.duration_ms.value, PlantConfig::default().fault_max_ms);
        assert_eq!(e.value_of(2, SensorKind::Flow, 10).unwrap(), 0.0);
    }

    #[test]
    fn clear_fault_respects_generation() {
        let mut e = engine();
        let first = e
            .inject_fault(1, SensorKind::Level, FaultKind::StuckAt, 10_000, 0)
            .unwrap();
        let second = e
            .inject_fault(1, SensorKind::Level, FaultKind::NoiseBurst, 10_000, 0)
            .unwrap();
        assert!(!e.clear_fault(1, SensorKind::Level, Some(first.generation)).unwrap());
        assert!(e.is_faulted(1, SensorKind::Level, 1).unwrap());
        assert!(e.clear_fault(1, SensorKind::Level, Some(second.generation)).unwrap());
        assert!(!e.is_faulted(1, SensorKind::Level, 1).unwrap());
    }

    #[test]
    fn set_base_clamps() {
        let mut e = engine();
        let c = e.set_base(1, SensorKind::Pressure, -50.0).unwrap();
        assert!(c.clamped);
        assert_eq!(c.value, 0.0);
        let c = e.set_base(1, SensorKind::Pressure, f32::INFINITY).unwrap();
        assert!(c.clamped);
        assert!(e.base_of(1, SensorKind::Pressure).unwrap().is_finite());
    }

    #[test]
    fn reset_base_returns_to_profile() {
        let mut e = engine();
        let original = e.base_of(2, SensorKind::Vibration).unwrap();
        e.set_base(2, SensorKind::Vibration, original * 3.0).unwrap();
        assert_eq!(e.reset_base(2, SensorKind::Vibration).unwrap(), original);
        assert_eq!(e.base_of(2, SensorKind::Vibration).unwrap(), original);
        assert!(e.reset_base(0, SensorKind::Vibration).is_err());
    }

    #[test]
    fn flow_follows_pump_speed() {
        let mut e = engine();
        let mean = |e: &mut PhysicsEngine| {
            (0..200).map(|t| e.value_of(1, SensorKind::Flow, t).unwrap()).sum::<f32>() / 200.0
        };
        e.set_drive(1, DriveLevels { motor_pct: 100.0, pump_pct: 100.0, valve_open: true })
            .unwrap();
        let full = mean(&mut e);
        e.set_drive(1, DriveLevels { motor_pct: 100.0, pump_pct: 25.0, valve_open: true })
            .unwrap();
        let quarter = mean(&mut e);
        assert!(full > quarter + 50.0, "full={full} quarter={quarter}");
    }

    #[test]
    fn deadheading_raises_pressure() {
        let mut e = engine();
        e.set_drive(3, DriveLevels { motor_pct: 75.0, pump_pct: 100.0, valve_open: false })
            .unwrap();
        let v = e.value_of(3, SensorKind::Pressure, 0).unwrap();
        assert!(v > 7.5, "deadhead pressure {v}");
    }

    #[test]
    fn parse_kinds_and_faults() {
        assert_eq!("temp".parse::<SensorKind>().unwrap(), SensorKind::Temperature);
        assert_eq!("Pressure".parse::<SensorKind>().unwrap(), SensorKind::Pressure);
        assert_eq!("noise-burst".parse::<FaultKind>().unwrap(), FaultKind::NoiseBurst);
        assert!("melt".parse::<FaultKind>().is_err());
    }
}
