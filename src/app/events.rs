//! Outbound plant events.
//!
//! The [`Plant`](super::service::Plant) emits these through the
//! [`EventSink`](super::ports::EventSink) port.  Adapters on the other
//! side decide what to do with them: log them, feed a dashboard, hand
//! them to a scoring collector.

use serde::{Deserialize, Serialize};

use crate::actuators::ActuatorState;
use crate::alarms::{AlarmRecord, AlarmSeverity};
use crate::error::CoreError;
use crate::ident::{ActuatorId, LineId, ShortText};
use crate::incidents::IncidentView;
use crate::physics::SensorKind;
use crate::safety::Trip;
use crate::sensors::SensorStatus;

/// Structured events emitted by the plant core.
#[derive(Debug, Clone, PartialEq)]
pub enum PlantEvent {
    AlarmRaised(AlarmRecord),

    AlarmEscalated { from: AlarmSeverity, alarm: AlarmRecord },

    /// Dropped to a lower band; the alarm is still live.
    AlarmDemoted { from: AlarmSeverity, alarm: AlarmRecord },

    AlarmCleared(AlarmRecord),

    InterlockTripped(Trip),

    IncidentCreated(IncidentView),

    IncidentResolved(IncidentView),

    /// An API command failed.
    CommandRejected {
        actuator: Option<ActuatorId>,
        command: ShortText,
        error: CoreError,
    },

    /// Periodic telemetry snapshot.
    Telemetry(TelemetryData),
}

/// Point-in-time plant summary suitable for logging or transmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryData {
    pub at: u64,
    pub tick: u64,
    pub lines: Vec<LineTelemetry>,
    pub active_alarms: u32,
    pub unacknowledged_alarms: u32,
    pub active_incidents: u32,
    pub interlocks_triggered: u32,
    pub emergency_stop: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineTelemetry {
    pub line: LineId,
    /// Indexed by [`SensorKind::index`].
    pub values: [f32; SensorKind::COUNT],
    pub worst: SensorStatus,
    pub actuators: Vec<(ActuatorId, ActuatorState)>,
}
