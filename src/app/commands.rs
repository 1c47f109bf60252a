//! Inbound commands to the plant service.
//!
//! These represent actions requested by the API boundary (HMI, scripted
//! scenario, scoring harness) that [`Plant::handle_command`](super::service::Plant::handle_command)
//! interprets.  Every command carries the caller's resolved [`Role`].

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::alarms::AlarmSeverity;
use crate::error::{CoreError, InvalidReason};
use crate::ident::{ActuatorId, AlarmId, Description, IncidentId, InterlockId, LineId, ShortText};
use crate::incidents::IncidentType;
use crate::physics::{FaultKind, SensorKind};

/// Caller capability level.  Recorded with every command, never enforced
/// by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Operator,
    Maintenance,
    Viewer,
    None,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Admin => "admin",
            Self::Operator => "operator",
            Self::Maintenance => "maintenance",
            Self::Viewer => "viewer",
            Self::None => "none",
        })
    }
}

impl FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "operator" => Ok(Self::Operator),
            "maintenance" => Ok(Self::Maintenance),
            "viewer" => Ok(Self::Viewer),
            "" | "none" | "anonymous" => Ok(Self::None),
            _ => Err(CoreError::InvalidCommand(InvalidReason::BadParameter)),
        }
    }
}

/// Commands that the API boundary can send into the plant.
#[derive(Debug, Clone, PartialEq)]
pub enum PlantCommand {
    /// Raw actuator command as received (`"open"`, `"set_speed"` + `"40"`).
    Execute {
        actuator: ActuatorId,
        command: ShortText,
        param: Option<ShortText>,
    },

    /// Burst of unserialized toggles against one actuator.
    Race { actuator: ActuatorId, count: u32 },

    AcknowledgeAlarm(AlarmId),

    ResetInterlock(InterlockId),

    EmergencyStop,

    ResetEmergencyStop,

    InjectFault {
        line: LineId,
        kind: SensorKind,
        fault: FaultKind,
        duration_ms: u32,
    },

    ClearFault { line: LineId, kind: SensorKind },

    /// Physics manipulation path: overwrite a sensor base.
    SetBase { line: LineId, kind: SensorKind, value: f32 },

    /// Undo any base manipulation on one channel.
    ResetBase { line: LineId, kind: SensorKind },

    SubmitIncident {
        kind: IncidentType,
        line: LineId,
        severity: AlarmSeverity,
        description: Option<Description>,
    },

    ResolveIncident(IncidentId),

    /// Root-cause report; returns the forensic token on a match.
    ReportIncident { incident: IncidentId, diagnosis: Description },
}
