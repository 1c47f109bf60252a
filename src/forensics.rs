//! Forensic trail: everything an investigator can dig out for one line.
//!
//! This is the deliberate discovery path: it includes the incident records
//! *with* their tokens.  Nothing here computes a score.

use serde::{Deserialize, Serialize};

use crate::actuators::{ActuatorRegistry, CommandLogEntry};
use crate::alarms::{AlarmEngine, AlarmRecord};
use crate::error::Result;
use crate::ident::{LineId, SensorId};
use crate::incidents::{IncidentEngine, IncidentRecord};
use crate::physics::{FaultInfo, PhysicsEngine, SensorKind};
use crate::sensors::{Sample, SensorRegistry};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorTrace {
    pub sensor: SensorId,
    pub kind: SensorKind,
    pub samples: Vec<Sample>,
    pub fault: Option<FaultInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForensicTrail {
    pub line: LineId,
    pub collected_at: u64,
    /// Oldest first.
    pub commands: Vec<CommandLogEntry>,
    pub sensors: Vec<SensorTrace>,
    /// Active and historical alarms on the line.
    pub alarms: Vec<AlarmRecord>,
    pub incidents: Vec<IncidentRecord>,
}

/// Read-only handles the trail is collected from.
pub struct TrailSources<'a> {
    pub sensors: &'a SensorRegistry,
    pub physics: &'a PhysicsEngine,
    pub actuators: &'a ActuatorRegistry,
    pub alarms: &'a AlarmEngine,
    pub incidents: &'a IncidentEngine,
}

impl ForensicTrail {
    pub fn collect(line: LineId, src: &TrailSources<'_>, now: u64) -> Result<Self> {
        let mut sensors = Vec::with_capacity(SensorKind::COUNT);
        for rec in src.sensors.by_line(line)? {
            sensors.push(SensorTrace {
                sensor: rec.id.clone(),
                kind: rec.kind,
                samples: src.sensors.history(&rec.id)?,
                fault: src.physics.fault_info(line, rec.kind, now)?,
            });
        }

        let on_line: Vec<_> = src.actuators.by_line(line).into_iter().map(|a| a.id).collect();
        let commands = src
            .actuators
            .command_log()
            .into_iter()
            .filter(|e| on_line.contains(&e.actuator))
            .collect();

        let alarms = src
            .alarms
            .active()
            .iter()
            .chain(src.alarms.history())
            .filter(|a| a.line == line)
            .cloned()
            .collect();

        let incidents = src
            .incidents
            .all()
            .iter()
            .filter(|i| i.line == line)
            .cloned()
            .collect();

        Ok(Self {
            line,
            collected_at: now,
            commands,
            sensors,
            alarms,
            incidents,
        })
    }
}
