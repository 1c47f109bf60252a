//! Kind-scoped actuator state machine.
//!
//! ```text
//!   Motor / Pump :  Stopped ⇄ Running
//!   Valve        :  Closed  ⇄ Open
//!   any kind     :  ──(incident)──▶ Stuck | Error ──(override)──▶ safe state
//! ```
//!
//! Normal transitions come from a static row table; each row names the
//! kinds it applies to, the states it may fire from and the target state.
//! `Stuck` and `Error` are only entered by incident effects and only left
//! by an override command or incident resolution.

use super::command::ActuatorCommand;
use super::{ActuatorKind, ActuatorRecord, ActuatorState};
use crate::error::{CoreError, InvalidReason, RejectReason, Result};

/// One row in the transition table.
struct Transition {
    command: fn(&ActuatorCommand) -> bool,
    kinds: &'static [ActuatorKind],
    from: &'static [ActuatorState],
    /// `None` keeps the current state.
    to: Option<ActuatorState>,
}

const ROTATING: &[ActuatorKind] = &[ActuatorKind::Motor, ActuatorKind::Pump];
const VALVES: &[ActuatorKind] = &[ActuatorKind::Valve];
const SPINNING: &[ActuatorState] = &[ActuatorState::Stopped, ActuatorState::Running];
const POSITIONS: &[ActuatorState] = &[ActuatorState::Closed, ActuatorState::Open];

static TABLE: [Transition; 5] = [
    Transition {
        command: |c| matches!(c, ActuatorCommand::Start),
        kinds: ROTATING,
        from: SPINNING,
        to: Some(ActuatorState::Running),
    },
    Transition {
        command: |c| matches!(c, ActuatorCommand::Stop),
        kinds: ROTATING,
        from: SPINNING,
        to: Some(ActuatorState::Stopped),
    },
    Transition {
        command: |c| matches!(c, ActuatorCommand::SetSpeed(_)),
        kinds: ROTATING,
        from: SPINNING,
        to: None,
    },
    Transition {
        command: |c| matches!(c, ActuatorCommand::Open),
        kinds: VALVES,
        from: POSITIONS,
        to: Some(ActuatorState::Open),
    },
    Transition {
        command: |c| matches!(c, ActuatorCommand::Close),
        kinds: VALVES,
        from: POSITIONS,
        to: Some(ActuatorState::Closed),
    },
];

/// Decide the target state for `command` without touching the record.
///
/// Lock checks happen in the registry before this is called.
pub fn plan(kind: ActuatorKind, state: ActuatorState, command: &ActuatorCommand) -> Result<ActuatorState> {
    if !command.applies_to(kind) {
        return Err(InvalidReason::WrongKind.into());
    }
    if matches!(command, ActuatorCommand::Override) {
        return if state.is_healthy() {
            Err(InvalidReason::IllegalTransition.into())
        } else {
            Ok(kind.safe_state())
        };
    }
    if !state.is_healthy() {
        return Err(RejectReason::Stuck.into());
    }
    TABLE
        .iter()
        .find(|t| (t.command)(command) && t.kinds.contains(&kind) && t.from.contains(&state))
        .map(|t| t.to.unwrap_or(state))
        .ok_or(CoreError::InvalidCommand(InvalidReason::IllegalTransition))
}

/// Recompute rpm and flow from state and speed.
///
/// `Stuck` and `Error` freeze the outputs at whatever they were when the
/// actuator failed.
pub fn refresh_outputs(rec: &mut ActuatorRecord) {
    let frac = rec.speed / 100.0;
    match (rec.kind, rec.state) {
        (_, ActuatorState::Stuck | ActuatorState::Error) => {}
        (ActuatorKind::Motor, ActuatorState::Running) => {
            rec.rpm = rec.rated_rpm * frac;
            rec.flow = 0.0;
        }
        (ActuatorKind::Pump, ActuatorState::Running) => {
            rec.rpm = rec.rated_rpm * frac;
            rec.flow = rec.rated_flow * frac;
        }
        (ActuatorKind::Valve, ActuatorState::Open) => {
            rec.rpm = 0.0;
            rec.flow = rec.rated_flow;
        }
        _ => {
            rec.rpm = 0.0;
            rec.flow = 0.0;
        }
    }
}
