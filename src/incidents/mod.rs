//! Incident engine: creation, cascading and resolution of simulated
//! failures.
//!
//! ```text
//!   create ──▶ Pending ──(effects applied)──▶ Active ──(resolve)──▶ Resolved
//!                                              │
//!                                              └─▶ maybe spawn child (depth+1)
//! ```
//!
//! An incident never owns plant state.  It records which overrides it
//! applied (see [`effects`]) and reverses exactly those on resolution.
//!
//! Limits checked before anything is allocated:
//! - depth above `max_cascade_depth` → `LimitExceeded(CascadeDepth)`
//! - an active incident with the same `(equipment, type)` →
//!   `LimitExceeded(DuplicateIncident)`
//! - `max_active` active incidents → `LimitExceeded(ActiveIncidents)`

pub mod effects;
pub mod token;

use core::fmt;
use core::str::FromStr;

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::alarms::AlarmSeverity;
use crate::app::commands::Role;
use crate::config::{IncidentSettings, PlantConfig};
use crate::error::{CoreError, Entity, InvalidReason, Limit, RejectReason, Result};
use crate::ident::{Description, IncidentId, LineId, Sequence, ShortText, bounded_fmt, sequence_of, sequenced};
use effects::{AppliedEffect, EffectTargets};
pub use token::ForensicToken;

/// Incidents share the alarm severity scale.
pub type IncidentSeverity = AlarmSeverity;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IncidentType {
    StuckValve,
    SensorFault,
    MotorOverload,
    TempSpike,
    PressureLoss,
    SignalLoss,
    SafetyBypass,
}

impl IncidentType {
    pub const ALL: [Self; 7] = [
        Self::StuckValve,
        Self::SensorFault,
        Self::MotorOverload,
        Self::TempSpike,
        Self::PressureLoss,
        Self::SignalLoss,
        Self::SafetyBypass,
    ];

    /// Words an operator diagnosis must contain to name this type.
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::StuckValve => "stuck valve",
            Self::SensorFault => "sensor fault",
            Self::MotorOverload => "motor overload",
            Self::TempSpike => "temp spike",
            Self::PressureLoss => "pressure loss",
            Self::SignalLoss => "signal loss",
            Self::SafetyBypass => "safety bypass",
        }
    }

    /// The causally plausible follow-on failure.
    pub const fn cascades_to(self) -> Self {
        match self {
            Self::StuckValve => Self::PressureLoss,
            Self::MotorOverload => Self::TempSpike,
            Self::TempSpike => Self::SafetyBypass,
            Self::PressureLoss | Self::SensorFault => Self::SignalLoss,
            Self::SignalLoss => Self::SensorFault,
            Self::SafetyBypass => Self::MotorOverload,
        }
    }

    fn describe(self, equipment: &str, line: LineId) -> Description {
        match self {
            Self::StuckValve => bounded_fmt(format_args!("Valve {equipment} seized on line {line}")),
            Self::SensorFault => bounded_fmt(format_args!("Erratic readings from {equipment}")),
            Self::MotorOverload => bounded_fmt(format_args!("Motor {equipment} overloaded, vibration rising")),
            Self::TempSpike => bounded_fmt(format_args!("Temperature excursion at {equipment}")),
            Self::PressureLoss => bounded_fmt(format_args!("Pressure loss at {equipment}")),
            Self::SignalLoss => bounded_fmt(format_args!("Signal lost from {equipment}")),
            Self::SafetyBypass => bounded_fmt(format_args!("Safety interlocks bypassed on line {line}")),
        }
    }
}

impl fmt::Display for IncidentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::StuckValve => "STUCK_VALVE",
            Self::SensorFault => "SENSOR_FAULT",
            Self::MotorOverload => "MOTOR_OVERLOAD",
            Self::TempSpike => "TEMP_SPIKE",
            Self::PressureLoss => "PRESSURE_LOSS",
            Self::SignalLoss => "SIGNAL_LOSS",
            Self::SafetyBypass => "SAFETY_BYPASS",
        })
    }
}

impl FromStr for IncidentType {
    type Err = CoreError;

    /// Accepts `STUCK_VALVE`, `stuck-valve` and `stuck valve`.
    fn from_str(s: &str) -> Result<Self> {
        let wanted = normalize(s);
        Self::ALL
            .into_iter()
            .find(|t| t.keyword() == wanted)
            .ok_or(CoreError::InvalidCommand(InvalidReason::BadParameter))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncidentStatus {
    Pending,
    Active,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    Operator,
    /// Accepted root-cause report.
    Report,
    AutoTimeout,
}

/// Full incident record, including the hidden token and applied effects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub id: IncidentId,
    pub kind: IncidentType,
    pub severity: IncidentSeverity,
    pub line: LineId,
    pub equipment: ShortText,
    pub description: Description,
    pub token: ForensicToken,
    pub nonce: u64,
    pub created_at: u64,
    pub resolved_at: Option<u64>,
    pub status: IncidentStatus,
    pub cascade_depth: u8,
    pub parent: Option<IncidentId>,
    pub reported_by: Role,
    pub resolution: Option<Resolution>,
    pub effects: Vec<AppliedEffect>,
}

impl IncidentRecord {
    pub fn is_active(&self) -> bool {
        self.status == IncidentStatus::Active
    }

    /// Public projection: no token, no effect internals.
    pub fn view(&self) -> IncidentView {
        IncidentView {
            id: self.id.clone(),
            kind: self.kind,
            severity: self.severity,
            line: self.line,
            equipment: self.equipment.clone(),
            description: self.description.clone(),
            created_at: self.created_at,
            resolved_at: self.resolved_at,
            status: self.status,
            cascade_depth: self.cascade_depth,
            parent: self.parent.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentView {
    pub id: IncidentId,
    pub kind: IncidentType,
    pub severity: IncidentSeverity,
    pub line: LineId,
    pub equipment: ShortText,
    pub description: Description,
    pub created_at: u64,
    pub resolved_at: Option<u64>,
    pub status: IncidentStatus,
    pub cascade_depth: u8,
    pub parent: Option<IncidentId>,
}

/// Creation request.
#[derive(Debug, Clone, PartialEq)]
pub struct NewIncident {
    pub kind: IncidentType,
    pub line: LineId,
    pub severity: IncidentSeverity,
    pub cascade_depth: u8,
    pub role: Role,
    /// Overrides the generated description.
    pub description: Option<Description>,
}

impl NewIncident {
    pub fn new(kind: IncidentType, line: LineId, severity: IncidentSeverity, cascade_depth: u8) -> Self {
        Self {
            kind,
            line,
            severity,
            cascade_depth,
            role: Role::None,
            description: None,
        }
    }

    pub fn by(mut self, role: Role) -> Self {
        self.role = role;
        self
    }
}

/// Result of a successful creation: the incident plus any children it spawned.
#[derive(Debug, Clone, PartialEq)]
pub struct Created {
    pub incident: IncidentRecord,
    pub children: Vec<IncidentRecord>,
}

/// Result of one periodic pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassReport {
    pub created: Vec<IncidentRecord>,
    pub resolved: Vec<IncidentRecord>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct IncidentEngine {
    records: Vec<IncidentRecord>,
    seq: Sequence,
    rng: StdRng,
    settings: IncidentSettings,
    secret: Vec<u8>,
    fault_ms: u32,
    lines: LineId,
}

impl IncidentEngine {
    pub fn new(config: &PlantConfig) -> Self {
        let seed = config
            .seed
            .map_or_else(|| rand::rng().random(), |s| s.wrapping_add(0x1c1d));
        Self {
            records: Vec::new(),
            seq: Sequence::new(),
            rng: StdRng::seed_from_u64(seed),
            settings: config.incidents.clone(),
            secret: config.token_secret.as_bytes().to_vec(),
            fault_ms: config.fault_max_ms,
            lines: config.lines,
        }
    }

    /// Create an incident, apply its effects and maybe cascade.
    pub fn create(&mut self, req: NewIncident, targets: &mut EffectTargets<'_>) -> Result<Created> {
        let incident = self.create_one(&req, None, targets)?;
        let mut children = Vec::new();
        self.cascade(&incident, targets, &mut children);
        Ok(Created { incident, children })
    }

    fn create_one(
        &mut self,
        req: &NewIncident,
        parent: Option<IncidentId>,
        targets: &mut EffectTargets<'_>,
    ) -> Result<IncidentRecord> {
        if req.cascade_depth > self.settings.max_cascade_depth {
            return Err(Limit::CascadeDepth.into());
        }
        let equipment = effects::equipment_for(req.kind, req.line, targets)?;
        if self
            .records
            .iter()
            .any(|r| r.is_active() && r.kind == req.kind && r.equipment == equipment)
        {
            return Err(Limit::DuplicateIncident.into());
        }
        if self.active_count() >= self.settings.max_active {
            return Err(Limit::ActiveIncidents.into());
        }

        let now = targets.now;
        let id: IncidentId = sequenced("INC", self.seq.next());
        let nonce: u64 = self.rng.random();
        self.records.push(IncidentRecord {
            token: token::derive(&self.secret, &id, now, nonce),
            description: req
                .description
                .clone()
                .unwrap_or_else(|| req.kind.describe(&equipment, req.line)),
            id,
            kind: req.kind,
            severity: req.severity,
            line: req.line,
            equipment,
            nonce,
            created_at: now,
            resolved_at: None,
            status: IncidentStatus::Pending,
            cascade_depth: req.cascade_depth,
            parent,
            reported_by: req.role,
            resolution: None,
            effects: Vec::new(),
        });

        let applied = effects::apply(req.kind, req.line, &self.settings, self.fault_ms, targets);
        let Some(rec) = self.records.last_mut() else {
            return Err(CoreError::NotFound(Entity::Incident));
        };
        match applied {
            Ok(list) => {
                rec.effects = list;
                rec.status = IncidentStatus::Active;
                warn!(
                    "INCIDENT {} {} {} on {} (line {}, depth {})",
                    rec.id, rec.severity, rec.kind, rec.equipment, rec.line, rec.cascade_depth
                );
                Ok(rec.clone())
            }
            Err(e) => {
                self.records.pop();
                Err(e)
            }
        }
    }

    fn cascade(&mut self, parent: &IncidentRecord, targets: &mut EffectTargets<'_>, out: &mut Vec<IncidentRecord>) {
        if parent.severity < AlarmSeverity::High || parent.cascade_depth >= self.settings.max_cascade_depth {
            return;
        }
        if self.rng.random::<f32>() >= self.settings.cascade_probability {
            return;
        }
        let downstream = parent.line < self.lines && self.rng.random::<bool>();
        let req = NewIncident {
            kind: parent.kind.cascades_to(),
            line: if downstream { parent.line + 1 } else { parent.line },
            severity: parent.severity.step_down(AlarmSeverity::Medium),
            cascade_depth: parent.cascade_depth + 1,
            role: parent.reported_by,
            description: None,
        };
        match self.create_one(&req, Some(parent.id.clone()), targets) {
            Ok(child) => {
                info!("INCIDENT {} cascaded from {}", child.id, parent.id);
                out.push(child.clone());
                self.cascade(&child, targets, out);
            }
            Err(e) => debug!("INCIDENT cascade from {} suppressed: {e}", parent.id),
        }
    }

    /// Reverse the incident's effects and mark it resolved.
    pub fn resolve(&mut self, id: &str, resolution: Resolution, targets: &mut EffectTargets<'_>) -> Result<IncidentRecord> {
        let idx = self.position(id)?;
        if self.records[idx].status == IncidentStatus::Resolved {
            return Err(RejectReason::AlreadyResolved.into());
        }
        let undone = effects::reverse(&self.records[idx].effects, targets);
        let rec = &mut self.records[idx];
        rec.status = IncidentStatus::Resolved;
        rec.resolved_at = Some(targets.now);
        rec.resolution = Some(resolution);
        info!(
            "INCIDENT {} resolved ({resolution:?}), {undone}/{} effects reversed",
            rec.id,
            rec.effects.len()
        );
        let out = rec.clone();
        self.prune_history();
        Ok(out)
    }

    /// Root-cause report.  A diagnosis naming the equipment or the incident
    /// type resolves the incident and returns its forensic token.
    pub fn report(&mut self, id: &str, diagnosis: &str, targets: &mut EffectTargets<'_>) -> Result<(IncidentRecord, ForensicToken)> {
        let idx = self.position(id)?;
        let rec = &self.records[idx];
        if rec.status == IncidentStatus::Resolved {
            return Err(RejectReason::AlreadyResolved.into());
        }
        let text = normalize(diagnosis);
        let names_equipment = text.contains(&normalize(&rec.equipment));
        if !(names_equipment || text.contains(rec.kind.keyword())) {
            info!("INCIDENT {} report rejected", rec.id);
            return Err(RejectReason::DiagnosisMismatch.into());
        }
        let token = rec.token.clone();
        let resolved = self.resolve(id, Resolution::Report, targets)?;
        Ok((resolved, token))
    }

    /// Periodic pass: auto-resolve stale incidents, then maybe spawn one.
    pub fn update(&mut self, targets: &mut EffectTargets<'_>) -> PassReport {
        let mut report = PassReport::default();
        let now = targets.now;

        if self.settings.auto_resolve_ms > 0 {
            let stale: Vec<IncidentId> = self
                .records
                .iter()
                .filter(|r| r.is_active() && now.saturating_sub(r.created_at) >= self.settings.auto_resolve_ms)
                .map(|r| r.id.clone())
                .collect();
            for id in stale {
                if let Ok(rec) = self.resolve(&id, Resolution::AutoTimeout, targets) {
                    report.resolved.push(rec);
                }
            }
        }

        if self.rng.random::<f32>() < self.settings.spawn_probability {
            let kind = IncidentType::ALL[self.rng.random_range(0..IncidentType::ALL.len())];
            let line = self.rng.random_range(1..=self.lines);
            let severity = self.random_severity();
            match self.create(NewIncident::new(kind, line, severity, 0), targets) {
                Ok(created) => {
                    report.created.push(created.incident);
                    report.created.extend(created.children);
                }
                Err(e) => debug!("INCIDENT random {kind} on line {line} skipped: {e}"),
            }
        }
        report
    }

    fn random_severity(&mut self) -> IncidentSeverity {
        match self.rng.random_range(0..100u32) {
            0..30 => AlarmSeverity::Low,
            30..65 => AlarmSeverity::Medium,
            65..90 => AlarmSeverity::High,
            _ => AlarmSeverity::Critical,
        }
    }

    // ── Queries ───────────────────────────────────────────────────

    pub fn get(&self, id: &str) -> Result<&IncidentRecord> {
        self.position(id).map(|i| &self.records[i])
    }

    pub fn active(&self) -> impl Iterator<Item = &IncidentRecord> {
        self.records.iter().filter(|r| r.is_active())
    }

    pub fn active_count(&self) -> usize {
        self.active().count()
    }

    pub fn all(&self) -> &[IncidentRecord] {
        &self.records
    }

    pub fn forensic_token(&self, id: &str) -> Result<ForensicToken> {
        self.get(id).map(|r| r.token.clone())
    }

    pub fn verify_token(&self, id: &str, submitted: &str) -> Result<bool> {
        let r = self.get(id)?;
        Ok(token::verify(&self.secret, &r.id, r.created_at, r.nonce, submitted))
    }

    pub fn settings(&self) -> &IncidentSettings {
        &self.settings
    }

    // ── Persistence ───────────────────────────────────────────────

    /// Replace the record table.  Physics-side effects of still-active
    /// incidents are not re-applied.
    pub fn restore(&mut self, saved: &[IncidentRecord]) -> usize {
        self.records = saved.to_vec();
        let highest = self
            .records
            .iter()
            .filter_map(|r| sequence_of(&r.id))
            .max()
            .unwrap_or(0);
        self.seq = Sequence::resume_after(highest);
        self.prune_history();
        self.records.len()
    }

    // ── Internal ──────────────────────────────────────────────────

    fn position(&self, id: &str) -> Result<usize> {
        self.records
            .iter()
            .position(|r| r.id.as_str() == id)
            .ok_or(CoreError::NotFound(Entity::Incident))
    }

    /// Drop the oldest resolved records beyond the history limit.
    fn prune_history(&mut self) {
        let resolved = self
            .records
            .iter()
            .filter(|r| r.status == IncidentStatus::Resolved)
            .count();
        let mut excess = resolved.saturating_sub(self.settings.history_limit);
        self.records.retain(|r| {
            if excess > 0 && r.status == IncidentStatus::Resolved {
                excess -= 1;
                false
            } else {
                true
            }
        });
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_ascii_lowercase().replace(['_', '-'], " ")
}
