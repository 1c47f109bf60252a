//! Safety interlock engine.
//!
//! The engine runs **every tick after the alarm pass**.  Each interlock binds
//! an all-of trip condition over one line's sensors, alarms and actuators to
//! a bounded action.
//!
//! ## Trip lifecycle
//!
//! 1. A non-triggered, non-bypassed interlock's condition is evaluated.
//! 2. On first satisfaction the action runs once and `triggered` latches.
//! 3. While triggered the condition is not re-evaluated, so a second tick
//!    above the limit cannot fire the action again.
//! 4. [`SafetyInterlockEngine::reset`] or
//!    [`SafetyInterlockEngine::reset_emergency_stop`] clears the latch and
//!    releases the safety locks it placed, unless another latched
//!    interlock still covers the same line.

use core::fmt::{self, Write};

use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::actuators::{ActuatorKind, ActuatorRegistry, ActuatorState};
use crate::alarms::{AlarmEngine, AlarmSeverity};
use crate::config::PlantConfig;
use crate::error::{CoreError, Entity, RejectReason, Result};
use crate::ident::{Description, InterlockId, LineId, ShortText, bounded};
use crate::physics::SensorKind;
use crate::sensors::SensorRegistry;

// ---------------------------------------------------------------------------
// Conditions and actions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    Line(LineId),
    Plant,
}

impl Scope {
    pub fn covers(self, line: LineId) -> bool {
        match self {
            Self::Line(l) => l == line,
            Self::Plant => true,
        }
    }
}

/// One clause of an all-of trip condition, evaluated on the interlock's line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TripClause {
    SensorAbove { kind: SensorKind, limit: f32 },
    SensorBelow { kind: SensorKind, limit: f32 },
    /// Highest unacknowledged alarm on the line is at least this severe.
    AlarmAtLeast(AlarmSeverity),
    ActuatorIs { kind: ActuatorKind, state: ActuatorState },
}

impl fmt::Display for TripClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SensorAbove { kind, limit } => write!(f, "{kind} > {limit:.2}"),
            Self::SensorBelow { kind, limit } => write!(f, "{kind} < {limit:.2}"),
            Self::AlarmAtLeast(sev) => write!(f, "alarm >= {sev}"),
            Self::ActuatorIs { kind, state } => write!(f, "{kind:?} is {state:?}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TripAction {
    /// Safe-stop every actuator of this kind on the interlock's line.
    Stop(ActuatorKind),
    EmergencyStop(Scope),
}

/// Configured interlock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterlockSpec {
    pub id: InterlockId,
    pub line: LineId,
    pub name: ShortText,
    pub clauses: heapless::Vec<TripClause, 4>,
    pub action: TripAction,
}

impl InterlockSpec {
    pub fn new(id: InterlockId, line: LineId, name: &str, clauses: &[TripClause], action: TripAction) -> Self {
        Self {
            id,
            line,
            name: bounded(name),
            clauses: clauses.iter().take(4).copied().collect(),
            action,
        }
    }

    /// Human-readable condition, e.g. `Press > 8.50 AND Level < 10.00`.
    pub fn descriptor(&self) -> Description {
        let mut out = Description::new();
        for (i, clause) in self.clauses.iter().enumerate() {
            if i > 0 {
                let _ = out.push_str(" AND ");
            }
            let _ = write!(out, "{clause}");
        }
        out
    }

    fn scope(&self) -> Scope {
        match self.action {
            TripAction::Stop(_) => Scope::Line(self.line),
            TripAction::EmergencyStop(scope) => scope,
        }
    }
}

/// Public state of one interlock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterlockRecord {
    pub id: InterlockId,
    pub line: LineId,
    pub name: ShortText,
    pub condition: Description,
    pub action: TripAction,
    pub triggered: bool,
    pub triggered_at: Option<u64>,
    pub trip_count: u32,
    pub bypassed: bool,
}

/// Emitted once per trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    pub interlock: InterlockId,
    pub line: LineId,
    pub action: TripAction,
    pub affected: usize,
}

/// What the engine reads to evaluate clauses.
pub trait TripInputs {
    fn sensor_value(&self, line: LineId, kind: SensorKind) -> Option<f32>;
    fn highest_unacknowledged(&self, line: LineId) -> Option<AlarmSeverity>;
    fn actuator_in(&self, line: LineId, kind: ActuatorKind, state: ActuatorState) -> bool;
}

/// Live view over the registries.
pub struct PlantView<'a> {
    pub sensors: &'a SensorRegistry,
    pub alarms: &'a AlarmEngine,
    pub actuators: &'a ActuatorRegistry,
}

impl TripInputs for PlantView<'_> {
    fn sensor_value(&self, line: LineId, kind: SensorKind) -> Option<f32> {
        self.sensors.value(line, kind).ok()
    }

    fn highest_unacknowledged(&self, line: LineId) -> Option<AlarmSeverity> {
        self.alarms.highest_unacknowledged(line)
    }

    fn actuator_in(&self, line: LineId, kind: ActuatorKind, state: ActuatorState) -> bool {
        self.actuators.any_in_state(line, kind, state)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct SafetyInterlockEngine {
    lines: LineId,
    specs: Vec<InterlockSpec>,
    records: Vec<InterlockRecord>,
    /// Operator-issued plant-wide stop is latched.
    manual_estop: bool,
}

impl SafetyInterlockEngine {
    pub fn new(config: &PlantConfig) -> Self {
        let records = config
            .interlocks
            .iter()
            .map(|spec| InterlockRecord {
                id: spec.id.clone(),
                line: spec.line,
                name: spec.name.clone(),
                condition: spec.descriptor(),
                action: spec.action,
                triggered: false,
                triggered_at: None,
                trip_count: 0,
                bypassed: false,
            })
            .collect();
        Self {
            lines: config.lines,
            specs: config.interlocks.clone(),
            records,
            manual_estop: false,
        }
    }

    /// Evaluate every armed interlock and fire the ones whose condition holds.
    pub fn evaluate(&mut self, inputs: &impl TripInputs, actuators: &ActuatorRegistry, now: u64) -> Vec<Trip> {
        let mut trips = Vec::new();
        for (spec, rec) in self.specs.iter().zip(self.records.iter_mut()) {
            if rec.triggered || rec.bypassed {
                continue;
            }
            if !spec.clauses.iter().all(|c| holds(c, spec.line, inputs)) {
                continue;
            }

            let affected = match spec.action {
                TripAction::Stop(kind) => actuators.stop_kind(spec.line, kind, now).len(),
                TripAction::EmergencyStop(scope) => actuators.emergency_stop(scope, now),
            };
            rec.triggered = true;
            rec.triggered_at = Some(now);
            rec.trip_count = rec.trip_count.saturating_add(1);
            error!("TRIP {} ({}): {} -> {:?}, {affected} actuators", rec.id, rec.name, rec.condition, spec.action);
            trips.push(Trip {
                interlock: rec.id.clone(),
                line: spec.line,
                action: spec.action,
                affected,
            });
        }
        trips
    }

    /// Re-arm one interlock and release its safety locks.
    pub fn reset(&mut self, id: &str, actuators: &ActuatorRegistry) -> Result<InterlockRecord> {
        let idx = self
            .records
            .iter()
            .position(|r| r.id.as_str() == id)
            .ok_or(CoreError::NotFound(Entity::Interlock))?;
        if !self.records[idx].triggered {
            return Err(RejectReason::NotTriggered.into());
        }
        self.records[idx].triggered = false;
        let released = self.release(self.specs[idx].scope(), actuators);
        info!("SAFETY reset {id}: {released} actuators unlocked");
        Ok(self.records[idx].clone())
    }

    /// Operator emergency stop.
    pub fn emergency_stop_all(&mut self, actuators: &ActuatorRegistry, now: u64) -> usize {
        self.manual_estop = true;
        let hit = actuators.emergency_stop(Scope::Plant, now);
        error!("SAFETY manual emergency stop: {hit} actuators locked");
        hit
    }

    /// Clear every latch (manual and interlock) and release all safety locks.
    /// Returns how many interlocks were re-armed.
    pub fn reset_emergency_stop(&mut self, actuators: &ActuatorRegistry) -> usize {
        let mut rearmed = 0;
        for rec in &mut self.records {
            if rec.triggered {
                rec.triggered = false;
                rearmed += 1;
            }
        }
        self.manual_estop = false;
        let released = actuators.release_safety_locks(Scope::Plant);
        warn!("SAFETY emergency stop reset: {rearmed} interlocks re-armed, {released} unlocked");
        rearmed
    }

    /// Set the bypass flag on every interlock of `line`.  Returns the ids
    /// whose flag actually changed.
    pub fn set_bypass(&mut self, line: LineId, bypassed: bool) -> Vec<InterlockId> {
        let changed: Vec<InterlockId> = self
            .records
            .iter_mut()
            .filter(|r| r.line == line && r.bypassed != bypassed)
            .map(|r| {
                r.bypassed = bypassed;
                r.id.clone()
            })
            .collect();
        if !changed.is_empty() {
            warn!("SAFETY line {line} bypass={bypassed} on {} interlocks", changed.len());
        }
        changed
    }

    /// Clear the bypass flag on exactly these interlocks.
    pub fn clear_bypass(&mut self, ids: &[InterlockId]) {
        for rec in self.records.iter_mut().filter(|r| ids.contains(&r.id)) {
            rec.bypassed = false;
        }
    }

    // ── Queries ───────────────────────────────────────────────────

    pub fn get(&self, id: &str) -> Result<&InterlockRecord> {
        self.records
            .iter()
            .find(|r| r.id.as_str() == id)
            .ok_or(CoreError::NotFound(Entity::Interlock))
    }

    pub fn all(&self) -> &[InterlockRecord] {
        &self.records
    }

    pub fn by_line(&self, line: LineId) -> impl Iterator<Item = &InterlockRecord> {
        self.records.iter().filter(move |r| r.line == line)
    }

    pub fn any_triggered(&self) -> bool {
        self.manual_estop || self.records.iter().any(|r| r.triggered)
    }

    pub fn manual_estop(&self) -> bool {
        self.manual_estop
    }

    // ── Persistence ───────────────────────────────────────────────

    /// Rehydrate latches, bypass and counters by identity.
    pub fn restore(&mut self, saved: &[InterlockRecord], manual_estop: bool) -> usize {
        self.manual_estop = manual_estop;
        let mut applied = 0;
        for s in saved {
            let Some(rec) = self.records.iter_mut().find(|r| r.id == s.id) else {
                warn!("SAFETY snapshot has unknown interlock {}", s.id);
                continue;
            };
            rec.triggered = s.triggered;
            rec.triggered_at = s.triggered_at;
            rec.trip_count = s.trip_count;
            rec.bypassed = s.bypassed;
            applied += 1;
        }
        applied
    }

    // ── Internal ──────────────────────────────────────────────────

    /// Release safety locks in `scope` on lines no longer held by a latch.
    fn release(&self, scope: Scope, actuators: &ActuatorRegistry) -> usize {
        (1..=self.lines)
            .filter(|&line| scope.covers(line))
            .filter(|&line| !self.manual_estop && !self.held(line))
            .map(|line| actuators.release_safety_locks(Scope::Line(line)))
            .sum()
    }

    fn held(&self, line: LineId) -> bool {
        self.specs
            .iter()
            .zip(&self.records)
            .any(|(spec, rec)| rec.triggered && spec.scope().covers(line))
    }
}

fn holds(clause: &TripClause, line: LineId, inputs: &impl TripInputs) -> bool {
    match *clause {
        TripClause::SensorAbove { kind, limit } => inputs.sensor_value(line, kind).is_some_and(|v| v > limit),
        TripClause::SensorBelow { kind, limit } => inputs.sensor_value(line, kind).is_some_and(|v| v < limit),
        TripClause::AlarmAtLeast(min) => inputs.highest_unacknowledged(line).is_some_and(|s| s >= min),
        TripClause::ActuatorIs { kind, state } => inputs.actuator_in(line, kind, state),
    }
}
