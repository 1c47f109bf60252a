//! Incident effects and their exact inverses.
//!
//! Every effect records just enough of the prior state to undo itself, and
//! undoes itself only where the target still holds the value this incident
//! put there.  A later operator override or a second incident is never
//! clobbered by a resolution.

use log::debug;
use serde::{Deserialize, Serialize};

use super::IncidentType;
use crate::actuators::{ActuatorKind, ActuatorRegistry, ActuatorState, ForcedState};
use crate::config::IncidentSettings;
use crate::error::{CoreError, Entity, Result};
use crate::ident::{ActuatorId, InterlockId, LineId, ShortText, bounded, bounded_fmt};
use crate::physics::{FaultKind, PhysicsEngine, SensorKind};
use crate::safety::SafetyInterlockEngine;
use crate::sensors::sensor_id;

/// One applied, reversible override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AppliedEffect {
    Actuator { id: ActuatorId, forced: ForcedState },
    Fault { line: LineId, kind: SensorKind, generation: u32 },
    Base { line: LineId, kind: SensorKind, prior: f32, applied: f32 },
    Bypass { interlocks: Vec<InterlockId> },
}

/// Everything an incident may write to.
pub struct EffectTargets<'a> {
    pub physics: &'a mut PhysicsEngine,
    pub actuators: &'a ActuatorRegistry,
    pub safety: &'a mut SafetyInterlockEngine,
    pub now: u64,
}

/// Equipment reference an incident of `kind` on `line` would hit.
///
/// Used for duplicate suppression before anything is allocated.
pub fn equipment_for(kind: IncidentType, line: LineId, targets: &EffectTargets<'_>) -> Result<ShortText> {
    if line == 0 || line > targets.physics.lines() {
        return Err(CoreError::NotFound(Entity::Line));
    }
    let equipment = match kind {
        IncidentType::StuckValve => bounded(&actuator(targets, line, ActuatorKind::Valve)?),
        IncidentType::MotorOverload => bounded(&actuator(targets, line, ActuatorKind::Motor)?),
        IncidentType::SensorFault | IncidentType::TempSpike => bounded(&sensor_id(line, SensorKind::Temperature)),
        IncidentType::PressureLoss => bounded(&sensor_id(line, SensorKind::Pressure)),
        IncidentType::SignalLoss => bounded(&sensor_id(line, SensorKind::Flow)),
        IncidentType::SafetyBypass => bounded_fmt(format_args!("IL-{line}")),
    };
    Ok(equipment)
}

/// Apply the type's effects.  On error nothing stays applied.
pub fn apply(
    kind: IncidentType,
    line: LineId,
    settings: &IncidentSettings,
    fault_ms: u32,
    targets: &mut EffectTargets<'_>,
) -> Result<Vec<AppliedEffect>> {
    let now = targets.now;
    let mut effects = Vec::with_capacity(2);
    match kind {
        IncidentType::StuckValve => {
            let id = actuator(targets, line, ActuatorKind::Valve)?;
            let forced = targets.actuators.force_state(&id, ActuatorState::Stuck, true, now)?;
            effects.push(AppliedEffect::Actuator { id, forced });
        }
        IncidentType::SensorFault => {
            effects.push(fault(targets, line, SensorKind::Temperature, FaultKind::NoiseBurst, fault_ms)?);
        }
        IncidentType::MotorOverload => {
            let id = actuator(targets, line, ActuatorKind::Motor)?;
            let forced = targets.actuators.force_state(&id, ActuatorState::Error, false, now)?;
            effects.push(AppliedEffect::Actuator { id, forced });
            match scale_base(targets, line, SensorKind::Vibration, |b| b * settings.overload_vibration_factor) {
                Ok(effect) => effects.push(effect),
                Err(e) => {
                    reverse(&effects, targets);
                    return Err(e);
                }
            }
        }
        IncidentType::TempSpike => {
            effects.push(scale_base(targets, line, SensorKind::Temperature, |b| b + settings.temp_spike_delta)?);
        }
        IncidentType::PressureLoss => {
            effects.push(scale_base(targets, line, SensorKind::Pressure, |b| b * settings.pressure_loss_factor)?);
        }
        IncidentType::SignalLoss => {
            effects.push(fault(targets, line, SensorKind::Flow, FaultKind::DropToZero, fault_ms)?);
        }
        IncidentType::SafetyBypass => {
            let interlocks = targets.safety.set_bypass(line, true);
            effects.push(AppliedEffect::Bypass { interlocks });
        }
    }
    Ok(effects)
}

/// Undo `effects` in reverse order.  Returns how many were still in place.
pub fn reverse(effects: &[AppliedEffect], targets: &mut EffectTargets<'_>) -> usize {
    let mut undone = 0;
    for effect in effects.iter().rev() {
        let still_applied = match effect {
            AppliedEffect::Actuator { id, forced } => targets
                .actuators
                .restore_state(id, forced, targets.now)
                .unwrap_or(false),
            AppliedEffect::Fault { line, kind, generation } => targets
                .physics
                .clear_fault(*line, *kind, Some(*generation))
                .unwrap_or(false),
            AppliedEffect::Base { line, kind, prior, applied } => {
                let current = targets.physics.base_of(*line, *kind).unwrap_or(f32::NAN);
                if current == *applied {
                    targets.physics.set_base(*line, *kind, *prior).is_ok()
                } else {
                    false
                }
            }
            AppliedEffect::Bypass { interlocks } => {
                targets.safety.clear_bypass(interlocks);
                true
            }
        };
        if still_applied {
            undone += 1;
        } else {
            debug!("incident effect already superseded: {effect:?}");
        }
    }
    undone
}

fn actuator(targets: &EffectTargets<'_>, line: LineId, kind: ActuatorKind) -> Result<ActuatorId> {
    targets
        .actuators
        .find(line, kind)
        .ok_or(CoreError::NotFound(Entity::Actuator))
}

fn fault(
    targets: &mut EffectTargets<'_>,
    line: LineId,
    kind: SensorKind,
    fault: FaultKind,
    fault_ms: u32,
) -> Result<AppliedEffect> {
    let handle = targets.physics.inject_fault(line, kind, fault, fault_ms, targets.now)?;
    Ok(AppliedEffect::Fault {
        line,
        kind,
        generation: handle.generation,
    })
}

fn scale_base(
    targets: &mut EffectTargets<'_>,
    line: LineId,
    kind: SensorKind,
    f: impl Fn(f32) -> f32,
) -> Result<AppliedEffect> {
    let prior = targets.physics.base_of(line, kind)?;
    let applied = targets.physics.set_base(line, kind, f(prior))?.value;
    Ok(AppliedEffect::Base { line, kind, prior, applied })
}
