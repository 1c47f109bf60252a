//! Actuator commands and command outcomes.

use core::fmt;

use serde::{Deserialize, Serialize};

use super::{ActuatorKind, ActuatorState};
use crate::app::commands::Role;
use crate::error::{CoreError, InvalidReason, Result};
use crate::ident::{ActuatorId, ShortText};

/// A parsed actuator command.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ActuatorCommand {
    Start,
    Stop,
    Open,
    Close,
    /// Speed setpoint in percent; clamped to 0–100.
    SetSpeed(f32),
    /// Clear a stuck / error state into the kind's safe state.
    Override,
}

impl ActuatorCommand {
    /// Parse an API command name plus optional parameter string.
    ///
    /// Names are case-insensitive; `set_speed`, `setspeed` and `speed` are
    /// accepted for the speed setpoint.
    pub fn parse(name: &str, param: Option<&str>) -> Result<Self> {
        let name = name.trim().to_ascii_lowercase();
        match name.as_str() {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "open" => Ok(Self::Open),
            "close" => Ok(Self::Close),
            "override" => Ok(Self::Override),
            "set_speed" | "setspeed" | "speed" => {
                let value = param
                    .map(str::trim)
                    .and_then(|p| p.parse::<f32>().ok())
                    .filter(|v| !v.is_nan())
                    .ok_or(CoreError::InvalidCommand(InvalidReason::BadParameter))?;
                Ok(Self::SetSpeed(value))
            }
            _ => Err(InvalidReason::UnknownCommand.into()),
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Open => "open",
            Self::Close => "close",
            Self::SetSpeed(_) => "set_speed",
            Self::Override => "override",
        }
    }

    pub fn applies_to(&self, kind: ActuatorKind) -> bool {
        match self {
            Self::Start | Self::Stop | Self::SetSpeed(_) => kind != ActuatorKind::Valve,
            Self::Open | Self::Close => kind == ActuatorKind::Valve,
            Self::Override => true,
        }
    }

    /// The pair the race primitive alternates between, starting with the
    /// command that moves away from `state`.
    pub fn toggle_pair(kind: ActuatorKind, state: ActuatorState) -> [Self; 2] {
        match (kind, state) {
            (ActuatorKind::Valve, ActuatorState::Open) => [Self::Close, Self::Open],
            (ActuatorKind::Valve, _) => [Self::Open, Self::Close],
            (_, ActuatorState::Running) => [Self::Stop, Self::Start],
            _ => [Self::Start, Self::Stop],
        }
    }
}

impl fmt::Display for ActuatorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetSpeed(v) => write!(f, "set_speed {v:.1}"),
            other => f.write_str(other.name()),
        }
    }
}

/// Who issued a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandOrigin {
    Api,
    Race,
    Safety,
    Incident,
}

/// Successful `execute` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub actuator: ActuatorId,
    pub command: ActuatorCommand,
    pub previous_state: ActuatorState,
    pub state: ActuatorState,
    pub result: ShortText,
    pub command_count: u32,
    /// Speed setpoint was clamped into 0–100.
    pub clamped: bool,
}

/// One entry in the bounded command log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandLogEntry {
    pub at: u64,
    pub actuator: ActuatorId,
    pub command: ShortText,
    pub origin: CommandOrigin,
    pub role: Role,
    pub ok: bool,
    pub result: ShortText,
}
