//! Unified error types for the plant simulation core.
//!
//! Every command-class operation returns [`Result`] with a [`CoreError`];
//! nothing in the core panics on bad input and nothing here is fatal to the
//! tick loop.  All variants are `Copy` so they can be passed through the
//! safety and incident engines and into event payloads without allocation.
//!
//! Clamping of out-of-band physics parameters is *not* an error: see
//! [`Clamped`].

use core::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Top-level core error
// ---------------------------------------------------------------------------

/// Every fallible operation in the core funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoreError {
    /// Unknown sensor / actuator / alarm / incident / interlock / line.
    NotFound(Entity),
    /// The transition is illegal for the actuator's kind or state.
    InvalidCommand(InvalidReason),
    /// The target refuses the command (locked, stuck, already resolved ...).
    Rejected(RejectReason),
    /// A configured bound would be exceeded.
    LimitExceeded(Limit),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(e) => write!(f, "not found: {e}"),
            Self::InvalidCommand(r) => write!(f, "invalid command: {r}"),
            Self::Rejected(r) => write!(f, "rejected: {r}"),
            Self::LimitExceeded(l) => write!(f, "limit exceeded: {l}"),
        }
    }
}

impl std::error::Error for CoreError {}

// ---------------------------------------------------------------------------
// NotFound
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Entity {
    Sensor,
    Actuator,
    Alarm,
    Incident,
    Interlock,
    Line,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sensor => write!(f, "sensor"),
            Self::Actuator => write!(f, "actuator"),
            Self::Alarm => write!(f, "alarm"),
            Self::Incident => write!(f, "incident"),
            Self::Interlock => write!(f, "interlock"),
            Self::Line => write!(f, "line"),
        }
    }
}

// ---------------------------------------------------------------------------
// InvalidCommand
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvalidReason {
    /// Command name not recognised.
    UnknownCommand,
    /// Command exists but does not apply to this actuator kind
    /// (e.g. `open` on a motor).
    WrongKind,
    /// Command is not legal from the current state (e.g. `override`
    /// on a healthy actuator).
    IllegalTransition,
    /// A required parameter is missing or not a number.
    BadParameter,
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownCommand => write!(f, "unknown command"),
            Self::WrongKind => write!(f, "not supported by actuator kind"),
            Self::IllegalTransition => write!(f, "illegal from current state"),
            Self::BadParameter => write!(f, "bad parameter"),
        }
    }
}

impl From<InvalidReason> for CoreError {
    fn from(r: InvalidReason) -> Self {
        Self::InvalidCommand(r)
    }
}

// ---------------------------------------------------------------------------
// Rejected
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// Actuator holds a safety or incident lock.
    Locked,
    /// Actuator is stuck or in error; only override or resolution helps.
    Stuck,
    /// Alarm already cleared.
    AlarmCleared,
    /// Incident already resolved.
    AlreadyResolved,
    /// Interlock is not tripped, nothing to reset.
    NotTriggered,
    /// Root-cause report does not reference the incident.
    DiagnosisMismatch,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Locked => write!(f, "actuator locked"),
            Self::Stuck => write!(f, "actuator stuck or faulted"),
            Self::AlarmCleared => write!(f, "alarm already cleared"),
            Self::AlreadyResolved => write!(f, "incident already resolved"),
            Self::NotTriggered => write!(f, "interlock not triggered"),
            Self::DiagnosisMismatch => write!(f, "diagnosis does not match incident"),
        }
    }
}

impl From<RejectReason> for CoreError {
    fn from(r: RejectReason) -> Self {
        Self::Rejected(r)
    }
}

// ---------------------------------------------------------------------------
// LimitExceeded
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Limit {
    /// Cascade depth above the configured maximum.
    CascadeDepth,
    /// An active incident already exists for this (equipment, type).
    DuplicateIncident,
    /// Too many simultaneously active incidents.
    ActiveIncidents,
    /// Race burst larger than `race_burst_limit`.
    RaceBurst,
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CascadeDepth => write!(f, "cascade depth"),
            Self::DuplicateIncident => write!(f, "duplicate active incident"),
            Self::ActiveIncidents => write!(f, "too many active incidents"),
            Self::RaceBurst => write!(f, "race burst too large"),
        }
    }
}

impl From<Limit> for CoreError {
    fn from(l: Limit) -> Self {
        Self::LimitExceeded(l)
    }
}

// ---------------------------------------------------------------------------
// RangeClamped
// ---------------------------------------------------------------------------

/// Outcome of an operation whose input may have been clamped into range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Clamped<T> {
    /// The value actually applied.
    pub value: T,
    /// `true` if the requested value was out of range.
    pub clamped: bool,
}

impl Clamped<f32> {
    /// Clamp `requested` into `[min, max]`, mapping non-finite input to `min`.
    pub fn clamp(requested: f32, min: f32, max: f32) -> Self {
        if !requested.is_finite() {
            return Self { value: min, clamped: true };
        }
        let value = requested.clamp(min, max);
        Self { value, clamped: value != requested }
    }
}

impl Clamped<u32> {
    pub fn clamp(requested: u32, min: u32, max: u32) -> Self {
        let value = requested.clamp(min, max);
        Self { value, clamped: value != requested }
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Core-wide `Result` alias.
pub type Result<T> = core::result::Result<T, CoreError>;
