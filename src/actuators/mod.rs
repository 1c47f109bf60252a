//! Actuator registry.
//!
//! One record per piece of equipment, each behind its own mutex so that a
//! command on one actuator never blocks the tick or commands on another,
//! and no reader ever sees a half-updated record.
//!
//! ## Locks
//!
//! `locked` is an orthogonal bitmask of [`LockSource`]s.  Safety actions set
//! the `Safety` bit; incident effects set the `Incident` bit.  Each source
//! only ever clears its own bit, so a safety reset cannot release an
//! incident's hold and vice versa.
//!
//! ## Race primitive
//!
//! [`ActuatorRegistry::trigger_race_condition`] is the one entry point that
//! is *not* serialized per call; see [`race`].

pub mod command;
pub mod fsm;
pub mod race;

use std::collections::HashMap;

use heapless::Deque;
use log::{info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::app::commands::Role;
use crate::config::PlantConfig;
use crate::error::{Clamped, CoreError, Entity, RejectReason, Result};
use crate::ident::{ActuatorId, LineId, ShortText, bounded, bounded_fmt};
use crate::physics::DriveLevels;
use crate::safety::Scope;
pub use command::{ActuatorCommand, CommandLogEntry, CommandOrigin, CommandOutcome};

/// Entries kept in the command log.
pub const COMMAND_LOG_LEN: usize = 64;

// ---------------------------------------------------------------------------
// Kinds and states
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActuatorKind {
    Motor,
    Valve,
    Pump,
}

impl ActuatorKind {
    /// State the kind is forced into by safety actions and overrides.
    pub const fn safe_state(self) -> ActuatorState {
        match self {
            Self::Motor | Self::Pump => ActuatorState::Stopped,
            Self::Valve => ActuatorState::Closed,
        }
    }

    /// Whether `state` is reachable for this kind at all.
    pub fn allows(self, state: ActuatorState) -> bool {
        match state {
            ActuatorState::Stuck | ActuatorState::Error => true,
            ActuatorState::Running | ActuatorState::Stopped => self != Self::Valve,
            ActuatorState::Open | ActuatorState::Closed => self == Self::Valve,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActuatorState {
    Stopped,
    Running,
    Open,
    Closed,
    Stuck,
    Error,
}

impl ActuatorState {
    pub const fn is_healthy(self) -> bool {
        !matches!(self, Self::Stuck | Self::Error)
    }
}

/// Who holds a lock on an actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum LockSource {
    Safety = 0x01,
    Incident = 0x02,
}

impl LockSource {
    pub const fn bit(self) -> u8 {
        self as u8
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuatorRecord {
    pub id: ActuatorId,
    pub line: LineId,
    pub kind: ActuatorKind,
    pub state: ActuatorState,
    /// Speed setpoint 0–100.
    pub speed: f32,
    pub rpm: f32,
    pub flow: f32,
    pub rated_rpm: f32,
    pub rated_flow: f32,
    pub command_count: u32,
    pub last_command_at: u64,
    pub last_result: ShortText,
    /// Bitmask of [`LockSource`]s.
    pub locks: u8,
}

impl ActuatorRecord {
    pub fn locked(&self) -> bool {
        self.locks != 0
    }

    pub fn has_lock(&self, source: LockSource) -> bool {
        self.locks & source.bit() != 0
    }
}

/// Prior values captured when an incident forces an actuator state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForcedState {
    pub forced: ActuatorState,
    pub prior_state: ActuatorState,
    pub prior_rpm: f32,
    pub prior_flow: f32,
    pub prior_command_at: u64,
    pub prior_result: ShortText,
    /// The incident set the `Incident` lock bit (it was clear before).
    pub took_lock: bool,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

pub struct ActuatorRegistry {
    records: Vec<Mutex<ActuatorRecord>>,
    index: HashMap<String, usize>,
    log: Mutex<Deque<CommandLogEntry, COMMAND_LOG_LEN>>,
    race_burst_limit: u32,
}

impl ActuatorRegistry {
    pub fn new(config: &PlantConfig) -> Self {
        let mut records = Vec::with_capacity(config.equipment.len());
        let mut index = HashMap::new();
        for eq in &config.equipment {
            let mut rec = ActuatorRecord {
                id: eq.id.clone(),
                line: eq.line,
                kind: eq.kind,
                state: eq.initial_state,
                speed: eq.initial_speed.clamp(0.0, 100.0),
                rpm: 0.0,
                flow: 0.0,
                rated_rpm: eq.rated_rpm,
                rated_flow: eq.rated_flow,
                command_count: 0,
                last_command_at: 0,
                last_result: ShortText::new(),
                locks: 0,
            };
            fsm::refresh_outputs(&mut rec);
            index.insert(eq.id.as_str().to_owned(), records.len());
            records.push(Mutex::new(rec));
        }
        Self {
            records,
            index,
            log: Mutex::new(Deque::new()),
            race_burst_limit: config.race_burst_limit,
        }
    }

    // ── Command path ──────────────────────────────────────────────

    /// Parse and execute an API command string.
    pub fn execute_str(
        &self,
        id: &str,
        command: &str,
        param: Option<&str>,
        role: Role,
        now: u64,
    ) -> Result<CommandOutcome> {
        let idx = self.position(id)?;
        match ActuatorCommand::parse(command, param) {
            Ok(cmd) => self.execute_at(idx, cmd, role, now),
            Err(e) => {
                let actuator = self.records[idx].lock().id.clone();
                self.log_entry(now, &actuator, &bounded(command), CommandOrigin::Api, role, Err(e));
                Err(e)
            }
        }
    }

    /// Execute one command atomically with respect to this record.
    pub fn execute(&self, id: &str, command: ActuatorCommand, role: Role, now: u64) -> Result<CommandOutcome> {
        let idx = self.position(id)?;
        self.execute_at(idx, command, role, now)
    }

    fn execute_at(&self, idx: usize, command: ActuatorCommand, role: Role, now: u64) -> Result<CommandOutcome> {
        let mut rec = self.records[idx].lock();
        let previous_state = rec.state;

        let applied = if rec.locked() {
            Err(CoreError::Rejected(RejectReason::Locked))
        } else {
            fsm::plan(rec.kind, rec.state, &command)
        };

        rec.last_command_at = now;
        let outcome = match applied {
            Ok(next) => {
                let mut clamped = false;
                if let ActuatorCommand::SetSpeed(requested) = command {
                    let speed = Clamped::<f32>::clamp(requested, 0.0, 100.0);
                    rec.speed = speed.value;
                    clamped = speed.clamped;
                }
                rec.state = next;
                fsm::refresh_outputs(&mut rec);
                rec.command_count = rec.command_count.wrapping_add(1);
                rec.last_result = bounded("OK");
                Ok(CommandOutcome {
                    actuator: rec.id.clone(),
                    command,
                    previous_state,
                    state: next,
                    result: rec.last_result.clone(),
                    command_count: rec.command_count,
                    clamped,
                })
            }
            Err(e) => {
                rec.last_result = bounded_fmt(format_args!("{e}"));
                Err(e)
            }
        };
        let actuator = rec.id.clone();
        drop(rec);

        match &outcome {
            Ok(o) => info!("ACT {} {command}: {:?} -> {:?}", o.actuator, previous_state, o.state),
            Err(e) => warn!("ACT {actuator} {command} refused: {e}"),
        }
        let name: ShortText = bounded_fmt(format_args!("{command}"));
        self.log_entry(now, &actuator, &name, CommandOrigin::Api, role, outcome.as_ref().map(|_| ()).map_err(|e| *e));
        outcome
    }

    // ── Safety entry points ───────────────────────────────────────

    /// Force one actuator into its safe state and take the safety lock.
    ///
    /// A stuck or errored actuator cannot move, but still takes the lock.
    pub fn safe_stop(&self, id: &str, now: u64) -> Result<ActuatorState> {
        let idx = self.position(id)?;
        Ok(self.safe_stop_at(idx, now))
    }

    fn safe_stop_at(&self, idx: usize, now: u64) -> ActuatorState {
        let mut rec = self.records[idx].lock();
        if rec.state.is_healthy() {
            rec.state = rec.kind.safe_state();
            fsm::refresh_outputs(&mut rec);
        }
        rec.locks |= LockSource::Safety.bit();
        rec.last_command_at = now;
        rec.last_result = bounded("SAFETY STOP");
        let (id, state) = (rec.id.clone(), rec.state);
        drop(rec);
        self.log_entry(now, &id, &bounded("safe_stop"), CommandOrigin::Safety, Role::None, Ok(()));
        state
    }

    /// Safe-stop every actuator of `kind` on `line`.  Returns the ids hit.
    pub fn stop_kind(&self, line: LineId, kind: ActuatorKind, now: u64) -> Vec<ActuatorId> {
        let mut hit = Vec::new();
        for idx in self.matching(|r| r.line == line && r.kind == kind) {
            self.safe_stop_at(idx, now);
            hit.push(self.records[idx].lock().id.clone());
        }
        hit
    }

    /// Safe-stop and lock everything in scope.  Returns how many were hit.
    pub fn emergency_stop(&self, scope: Scope, now: u64) -> usize {
        let targets = self.matching(|r| scope.covers(r.line));
        for &idx in &targets {
            self.safe_stop_at(idx, now);
        }
        warn!("ACT emergency stop {scope:?}: {} actuators locked", targets.len());
        targets.len()
    }

    /// Clear only the safety lock bit in scope.  Returns how many were released.
    pub fn release_safety_locks(&self, scope: Scope) -> usize {
        let mut released = 0;
        for rec in &self.records {
            let mut rec = rec.lock();
            if scope.covers(rec.line) && rec.has_lock(LockSource::Safety) {
                rec.locks &= !LockSource::Safety.bit();
                released += 1;
            }
        }
        if released > 0 {
            info!("ACT safety locks released {scope:?}: {released}");
        }
        released
    }

    // ── Incident entry points ─────────────────────────────────────

    /// Force a failure state, optionally taking the incident lock.
    pub fn force_state(&self, id: &str, state: ActuatorState, lock: bool, now: u64) -> Result<ForcedState> {
        let idx = self.position(id)?;
        let mut rec = self.records[idx].lock();
        let forced = ForcedState {
            forced: state,
            prior_state: rec.state,
            prior_rpm: rec.rpm,
            prior_flow: rec.flow,
            prior_command_at: rec.last_command_at,
            prior_result: rec.last_result.clone(),
            took_lock: lock && !rec.has_lock(LockSource::Incident),
        };
        rec.state = state;
        if lock {
            rec.locks |= LockSource::Incident.bit();
        }
        rec.last_command_at = now;
        rec.last_result = bounded_fmt(format_args!("FORCED {state:?}"));
        let id = rec.id.clone();
        drop(rec);
        self.log_entry(now, &id, &bounded("force_state"), CommandOrigin::Incident, Role::None, Ok(()));
        Ok(forced)
    }

    /// Undo a [`force_state`](Self::force_state).
    ///
    /// State, outputs and the last-command fields are restored only if the
    /// actuator is still in the forced state; the incident lock is released
    /// only if this incident took it.  Returns `true` if the state was
    /// restored.
    pub fn restore_state(&self, id: &str, forced: &ForcedState, now: u64) -> Result<bool> {
        let idx = self.position(id)?;
        let mut rec = self.records[idx].lock();
        let restored = rec.state == forced.forced;
        if restored {
            rec.state = forced.prior_state;
            rec.rpm = forced.prior_rpm;
            rec.flow = forced.prior_flow;
            rec.last_command_at = forced.prior_command_at;
            rec.last_result = forced.prior_result.clone();
        }
        if forced.took_lock {
            rec.locks &= !LockSource::Incident.bit();
        }
        let id = rec.id.clone();
        drop(rec);
        self.log_entry(now, &id, &bounded("restore_state"), CommandOrigin::Incident, Role::None, Ok(()));
        Ok(restored)
    }

    // ── Queries ───────────────────────────────────────────────────

    /// Consistent copy of one record.
    pub fn get(&self, id: &str) -> Result<ActuatorRecord> {
        let idx = self.position(id)?;
        Ok(self.records[idx].lock().clone())
    }

    pub fn all(&self) -> Vec<ActuatorRecord> {
        self.records.iter().map(|r| r.lock().clone()).collect()
    }

    pub fn by_line(&self, line: LineId) -> Vec<ActuatorRecord> {
        self.records
            .iter()
            .map(|r| r.lock().clone())
            .filter(|r| r.line == line)
            .collect()
    }

    /// First actuator of `kind` on `line`.
    pub fn find(&self, line: LineId, kind: ActuatorKind) -> Option<ActuatorId> {
        self.records.iter().find_map(|r| {
            let r = r.lock();
            (r.line == line && r.kind == kind).then(|| r.id.clone())
        })
    }

    /// Any actuator of `kind` on `line` is in `state`.
    pub fn any_in_state(&self, line: LineId, kind: ActuatorKind, state: ActuatorState) -> bool {
        self.records.iter().any(|r| {
            let r = r.lock();
            r.line == line && r.kind == kind && r.state == state
        })
    }

    /// Effective drive for the physics coupling.
    ///
    /// Motors and pumps contribute their speed while running or errored;
    /// the line's valve path counts as open only if every valve is open.
    pub fn drive_levels(&self, line: LineId) -> DriveLevels {
        let mut drive = DriveLevels {
            motor_pct: 0.0,
            pump_pct: 0.0,
            valve_open: true,
        };
        for rec in &self.records {
            let r = rec.lock();
            if r.line != line {
                continue;
            }
            let energised = matches!(r.state, ActuatorState::Running | ActuatorState::Error);
            match r.kind {
                ActuatorKind::Motor if energised => drive.motor_pct = drive.motor_pct.max(r.speed),
                ActuatorKind::Pump if energised => drive.pump_pct = drive.pump_pct.max(r.speed),
                ActuatorKind::Valve if r.state != ActuatorState::Open => drive.valve_open = false,
                _ => {}
            }
        }
        drive
    }

    /// Oldest-first copy of the command log.
    pub fn command_log(&self) -> Vec<CommandLogEntry> {
        self.log.lock().iter().cloned().collect()
    }

    pub fn command_log_for(&self, id: &str) -> Vec<CommandLogEntry> {
        self.log
            .lock()
            .iter()
            .filter(|e| e.actuator.as_str() == id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    // ── Persistence ───────────────────────────────────────────────

    /// Rehydrate by identity.  Kind and line come from the equipment list,
    /// never from the snapshot.
    pub fn restore(&self, saved: &[ActuatorRecord]) -> usize {
        let mut applied = 0;
        for s in saved {
            let Ok(idx) = self.position(&s.id) else {
                warn!("ACT snapshot has unknown actuator {}", s.id);
                continue;
            };
            let mut rec = self.records[idx].lock();
            if !rec.kind.allows(s.state) {
                warn!("ACT snapshot state {:?} illegal for {}", s.state, s.id);
                continue;
            }
            rec.state = s.state;
            rec.speed = Clamped::<f32>::clamp(s.speed, 0.0, 100.0).value;
            rec.rpm = s.rpm;
            rec.flow = s.flow;
            rec.command_count = s.command_count;
            rec.last_command_at = s.last_command_at;
            rec.last_result = s.last_result.clone();
            rec.locks = s.locks & (LockSource::Safety.bit() | LockSource::Incident.bit());
            applied += 1;
        }
        applied
    }

    // ── Internal ──────────────────────────────────────────────────

    fn position(&self, id: &str) -> Result<usize> {
        self.index
            .get(id)
            .copied()
            .ok_or(CoreError::NotFound(Entity::Actuator))
    }

    fn matching(&self, pred: impl Fn(&ActuatorRecord) -> bool) -> Vec<usize> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, r)| pred(&r.lock()))
            .map(|(i, _)| i)
            .collect()
    }

    fn log_entry(
        &self,
        at: u64,
        actuator: &ActuatorId,
        command: &ShortText,
        origin: CommandOrigin,
        role: Role,
        result: core::result::Result<(), CoreError>,
    ) {
        let entry = CommandLogEntry {
            at,
            actuator: actuator.clone(),
            command: command.clone(),
            origin,
            role,
            ok: result.is_ok(),
            result: match result {
                Ok(()) => bounded("OK"),
                Err(e) => bounded_fmt(format_args!("{e}")),
            },
        };
        let mut log = self.log.lock();
        if log.is_full() {
            log.pop_front();
        }
        let _ = log.push_back(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EquipmentSpec;
    use crate::error::InvalidReason;

    fn registry() -> ActuatorRegistry {
        ActuatorRegistry::new(&PlantConfig::default())
    }

    #[test]
    fn builds_from_equipment_list() {
        let reg = registry();
        assert_eq!(reg.len(), 12);
        let m = reg.get("MTR-1").unwrap();
        assert_eq!(m.state, ActuatorState::Running);
        assert!((m.rpm - 1750.0 * 0.75).abs() < 0.01);
        assert_eq!(reg.get("NOPE"), Err(CoreError::NotFound(Entity::Actuator)));
    }

    #[test]
    fn execute_counts_successes_only() {
        let reg = registry();
        let out = reg.execute("VLV-2", ActuatorCommand::Close, Role::Operator, 5).unwrap();
        assert_eq!(out.state, ActuatorState::Closed);
        assert_eq!(out.result.as_str(), "OK");
        assert_eq!(out.command_count, 1);

        let err = reg.execute("VLV-2", ActuatorCommand::Start, Role::Operator, 6);
        assert_eq!(err, Err(CoreError::InvalidCommand(InvalidReason::WrongKind)));
        let rec = reg.get("VLV-2").unwrap();
        assert_eq!(rec.command_count, 1);
        assert_ne!(rec.last_result.as_str(), "OK");
        assert_eq!(rec.flow, 0.0);
    }

    #[test]
    fn set_speed_clamps_and_moves_rpm() {
        let reg = registry();
        let out = reg
            .execute("PMP-1", ActuatorCommand::SetSpeed(140.0), Role::Admin, 1)
            .unwrap();
        assert!(out.clamped);
        let rec = reg.get("PMP-1").unwrap();
        assert_eq!(rec.speed, 100.0);
        assert!((rec.rpm - 3500.0).abs() < 0.01);
        assert!((rec.flow - 160.0).abs() < 0.01);
    }

    #[test]
    fn locked_rejects_until_released() {
        let reg = registry();
        reg.emergency_stop(Scope::Line(1), 10);
        let m = reg.get("MTR-1").unwrap();
        assert_eq!(m.state, ActuatorState::Stopped);
        assert!(m.locked());
        assert_eq!(
            reg.execute("MTR-1", ActuatorCommand::Start, Role::Admin, 11),
            Err(CoreError::Rejected(RejectReason::Locked))
        );
        assert!(!reg.get("MTR-2").unwrap().locked());

        assert_eq!(reg.release_safety_locks(Scope::Line(1)), 3);
        assert!(reg.execute("MTR-1", ActuatorCommand::Start, Role::Admin, 12).is_ok());
    }

    #[test]
    fn force_and_restore_round_trip() {
        let reg = registry();
        let before = reg.get("VLV-3").unwrap();
        let forced = reg.force_state("VLV-3", ActuatorState::Stuck, true, 1).unwrap();
        assert!(reg.get("VLV-3").unwrap().locked());
        assert!(reg.restore_state("VLV-3", &forced, 2).unwrap());
        let after = reg.get("VLV-3").unwrap();
        assert_eq!(after.state, before.state);
        assert_eq!(after.rpm, before.rpm);
        assert_eq!(after.flow, before.flow);
        assert_eq!(after.locks, before.locks);
    }

    #[test]
    fn safety_reset_keeps_incident_lock() {
        let reg = registry();
        let forced = reg.force_state("VLV-1", ActuatorState::Stuck, true, 1).unwrap();
        reg.emergency_stop(Scope::Plant, 2);
        let v = reg.get("VLV-1").unwrap();
        assert_eq!(v.state, ActuatorState::Stuck);
        assert!(v.has_lock(LockSource::Safety) && v.has_lock(LockSource::Incident));

        reg.release_safety_locks(Scope::Plant);
        assert!(reg.get("VLV-1").unwrap().locked());
        reg.restore_state("VLV-1", &forced, 3).unwrap();
        assert!(!reg.get("VLV-1").unwrap().locked());
    }

    #[test]
    fn override_clears_unlocked_error() {
        let reg = registry();
        reg.force_state("MTR-2", ActuatorState::Error, false, 1).unwrap();
        assert_eq!(
            reg.execute("MTR-2", ActuatorCommand::Start, Role::Operator, 2),
            Err(CoreError::Rejected(RejectReason::Stuck))
        );
        let out = reg.execute("MTR-2", ActuatorCommand::Override, Role::Operator, 3).unwrap();
        assert_eq!(out.state, ActuatorState::Stopped);
    }

    #[test]
    fn drive_levels_follow_states() {
        let reg = registry();
        let d = reg.drive_levels(1);
        assert_eq!(d.motor_pct, 75.0);
        assert!(d.valve_open);
        reg.execute("VLV-1", ActuatorCommand::Close, Role::Operator, 1).unwrap();
        reg.execute("PMP-1", ActuatorCommand::Stop, Role::Operator, 1).unwrap();
        let d = reg.drive_levels(1);
        assert!(!d.valve_open);
        assert_eq!(d.pump_pct, 0.0);
    }

    #[test]
    fn command_log_is_bounded() {
        let reg = registry();
        for t in 0..(COMMAND_LOG_LEN as u64 + 5) {
            let _ = reg.execute_str("MTR-4", "start", None, Role::Viewer, t);
        }
        let log = reg.command_log();
        assert_eq!(log.len(), COMMAND_LOG_LEN);
        assert_eq!(log[0].at, 5);
        assert!(log.iter().all(|e| e.role == Role::Viewer));
    }

    #[test]
    fn execute_str_logs_parse_failures() {
        let reg = registry();
        assert!(reg.execute_str("MTR-1", "dance", None, Role::Operator, 1).is_err());
        let log = reg.command_log_for("MTR-1");
        assert_eq!(log.len(), 1);
        assert!(!log[0].ok);
    }

    #[test]
    fn unrelated_records_do_not_move() {
        let mut config = PlantConfig::default();
        config.equipment.push(EquipmentSpec::valve("VLV-1B", 1).starting(ActuatorState::Closed));
        let reg = ActuatorRegistry::new(&config);
        let other = reg.get("VLV-1B").unwrap();
        reg.execute("VLV-1", ActuatorCommand::Close, Role::Operator, 1).unwrap();
        assert_eq!(reg.get("VLV-1B").unwrap(), other);
    }
}
