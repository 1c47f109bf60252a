//! Alarm engine.
//!
//! Evaluates every sensor against its kind's ascending threshold bands.
//! Each band has a trigger above its clear threshold, so a value hovering
//! near a boundary cannot chatter.
//!
//! At most one non-cleared alarm exists per sensor.  A higher band
//! escalates that record in place; falling below the current band's clear
//! threshold demotes it to the highest lower band still exceeded, or clears
//! it into history.  Acknowledgement is an operator action independent of
//! the physical condition.

use std::collections::VecDeque;

use core::fmt;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{PerKind, PlantConfig};
use crate::error::{CoreError, Entity, RejectReason, Result};
use crate::ident::{AlarmId, LineId, Message, SensorId, Sequence, bounded_fmt, sequence_of, sequenced};
use crate::physics::SensorKind;
use crate::sensors::SensorRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AlarmSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlarmSeverity {
    pub const ALL: [Self; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    /// One step down, never below `floor`.
    pub fn step_down(self, floor: Self) -> Self {
        let lower = match self {
            Self::Critical => Self::High,
            Self::High => Self::Medium,
            Self::Medium | Self::Low => Self::Low,
        };
        lower.max(floor)
    }
}

impl fmt::Display for AlarmSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        })
    }
}

/// One alarm band: raise above `trigger`, clear below `clear`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdBand {
    pub severity: AlarmSeverity,
    pub trigger: f32,
    pub clear: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlarmStatus {
    Active,
    Acknowledged,
    Cleared,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmRecord {
    pub id: AlarmId,
    pub sensor: SensorId,
    pub line: LineId,
    pub kind: SensorKind,
    pub severity: AlarmSeverity,
    /// Value at the last raise / escalation / demotion.
    pub value: f32,
    pub peak: f32,
    pub threshold: f32,
    pub message: Message,
    pub status: AlarmStatus,
    pub triggered_at: u64,
    pub acknowledged_at: Option<u64>,
    pub cleared_at: Option<u64>,
}

/// What one evaluation pass changed.
#[derive(Debug, Clone, PartialEq)]
pub enum AlarmChange {
    Raised(AlarmRecord),
    Escalated { from: AlarmSeverity, alarm: AlarmRecord },
    Demoted { from: AlarmSeverity, alarm: AlarmRecord },
    Cleared(AlarmRecord),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmCounts {
    pub active: u32,
    pub acknowledged: u32,
    /// Non-cleared alarms per severity, `Low` first.
    pub by_severity: [u32; 4],
}

pub struct AlarmEngine {
    bands: PerKind<heapless::Vec<ThresholdBand, 4>>,
    /// Non-cleared alarms, at most one per sensor.
    active: Vec<AlarmRecord>,
    /// Cleared alarms, oldest first.
    history: VecDeque<AlarmRecord>,
    history_limit: usize,
    seq: Sequence,
}

impl AlarmEngine {
    pub fn new(config: &PlantConfig) -> Self {
        let s = &config.sensors;
        Self {
            bands: PerKind {
                temperature: s.temperature.alarms.clone(),
                pressure: s.pressure.alarms.clone(),
                flow: s.flow.alarms.clone(),
                vibration: s.vibration.alarms.clone(),
                level: s.level.alarms.clone(),
            },
            active: Vec::new(),
            history: VecDeque::new(),
            history_limit: config.alarm_history_limit,
            seq: Sequence::new(),
        }
    }

    /// Run one pass over every sensor.
    pub fn evaluate(&mut self, sensors: &[SensorRecord], now: u64) -> Vec<AlarmChange> {
        let mut changes = Vec::new();
        for sensor in sensors {
            if let Some(change) = self.evaluate_one(sensor, now) {
                changes.push(change);
            }
        }
        debug_assert!(self.one_per_sensor(), "two active alarms for one sensor");
        changes
    }

    fn evaluate_one(&mut self, sensor: &SensorRecord, now: u64) -> Option<AlarmChange> {
        let bands = self.bands.get(sensor.kind);
        let value = sensor.value;
        let tripped = bands.iter().rev().find(|b| value > b.trigger).copied();

        let Some(pos) = self.active.iter().position(|a| a.sensor == sensor.id) else {
            let band = tripped?;
            let alarm = AlarmRecord {
                id: sequenced("ALM", self.seq.next()),
                sensor: sensor.id.clone(),
                line: sensor.line,
                kind: sensor.kind,
                severity: band.severity,
                value,
                peak: value,
                threshold: band.trigger,
                message: message(sensor, band),
                status: AlarmStatus::Active,
                triggered_at: now,
                acknowledged_at: None,
                cleared_at: None,
            };
            warn!("ALARM {} {} raised: {}", alarm.id, alarm.severity, alarm.message);
            self.active.push(alarm.clone());
            return Some(AlarmChange::Raised(alarm));
        };

        let current = self.active[pos].severity;
        self.active[pos].peak = self.active[pos].peak.max(value);

        if let Some(band) = tripped.filter(|b| b.severity > current) {
            let alarm = &mut self.active[pos];
            alarm.severity = band.severity;
            alarm.value = value;
            alarm.threshold = band.trigger;
            alarm.message = message(sensor, band);
            alarm.status = AlarmStatus::Active;
            alarm.acknowledged_at = None;
            warn!("ALARM {} escalated {current} -> {}", alarm.id, alarm.severity);
            return Some(AlarmChange::Escalated { from: current, alarm: alarm.clone() });
        }

        let clear_at = bands
            .iter()
            .find(|b| b.severity == current)
            .map_or(f32::NEG_INFINITY, |b| b.clear);
        if value >= clear_at {
            return None;
        }

        let lower = bands
            .iter()
            .rev()
            .find(|b| b.severity < current && value > b.clear)
            .copied();
        match lower {
            Some(band) => {
                let alarm = &mut self.active[pos];
                alarm.severity = band.severity;
                alarm.value = value;
                alarm.threshold = band.trigger;
                alarm.message = message(sensor, band);
                info!("ALARM {} demoted {current} -> {}", alarm.id, alarm.severity);
                Some(AlarmChange::Demoted { from: current, alarm: alarm.clone() })
            }
            None => {
                let mut alarm = self.active.swap_remove(pos);
                alarm.status = AlarmStatus::Cleared;
                alarm.value = value;
                alarm.cleared_at = Some(now);
                info!("ALARM {} cleared ({value:.2})", alarm.id);
                self.push_history(alarm.clone());
                Some(AlarmChange::Cleared(alarm))
            }
        }
    }

    /// Operator acknowledgement.  Idempotent on an acknowledged alarm.
    pub fn acknowledge(&mut self, id: &str, now: u64) -> Result<AlarmRecord> {
        if let Some(alarm) = self.active.iter_mut().find(|a| a.id.as_str() == id) {
            if alarm.status == AlarmStatus::Active {
                alarm.status = AlarmStatus::Acknowledged;
                alarm.acknowledged_at = Some(now);
                info!("ALARM {} acknowledged", alarm.id);
            }
            return Ok(alarm.clone());
        }
        if self.history.iter().any(|a| a.id.as_str() == id) {
            return Err(RejectReason::AlarmCleared.into());
        }
        Err(CoreError::NotFound(Entity::Alarm))
    }

    // ── Queries ───────────────────────────────────────────────────

    pub fn active(&self) -> &[AlarmRecord] {
        &self.active
    }

    pub fn history(&self) -> impl Iterator<Item = &AlarmRecord> {
        self.history.iter()
    }

    pub fn get(&self, id: &str) -> Result<&AlarmRecord> {
        self.active
            .iter()
            .chain(self.history.iter())
            .find(|a| a.id.as_str() == id)
            .ok_or(CoreError::NotFound(Entity::Alarm))
    }

    pub fn active_for(&self, sensor: &str) -> Option<&AlarmRecord> {
        self.active.iter().find(|a| a.sensor.as_str() == sensor)
    }

    /// Highest severity still awaiting acknowledgement on `line`.
    pub fn highest_unacknowledged(&self, line: LineId) -> Option<AlarmSeverity> {
        self.active
            .iter()
            .filter(|a| a.line == line && a.status == AlarmStatus::Active)
            .map(|a| a.severity)
            .max()
    }

    pub fn counts(&self) -> AlarmCounts {
        let mut counts = AlarmCounts::default();
        for a in &self.active {
            match a.status {
                AlarmStatus::Active => counts.active += 1,
                AlarmStatus::Acknowledged => counts.acknowledged += 1,
                AlarmStatus::Cleared => {}
            }
            counts.by_severity[a.severity as usize] += 1;
        }
        counts
    }

    // ── Persistence ───────────────────────────────────────────────

    /// Rehydrate.  Cleared records go to history; a second non-cleared
    /// record for the same sensor is dropped.
    pub fn restore(&mut self, saved: &[AlarmRecord]) -> usize {
        self.active.clear();
        self.history.clear();
        let mut highest = 0;
        for alarm in saved {
            highest = highest.max(sequence_of(&alarm.id).unwrap_or(0));
            if alarm.status == AlarmStatus::Cleared {
                self.push_history(alarm.clone());
            } else if self.active_for(&alarm.sensor).is_none() {
                self.active.push(alarm.clone());
            } else {
                warn!("ALARM snapshot has duplicate active alarm {}", alarm.id);
            }
        }
        self.seq = Sequence::resume_after(highest);
        self.active.len() + self.history.len()
    }

    fn push_history(&mut self, alarm: AlarmRecord) {
        while self.history.len() >= self.history_limit {
            self.history.pop_front();
        }
        self.history.push_back(alarm);
    }

    fn one_per_sensor(&self) -> bool {
        self.active
            .iter()
            .enumerate()
            .all(|(i, a)| self.active[..i].iter().all(|b| b.sensor != a.sensor))
    }
}

fn message(sensor: &SensorRecord, band: ThresholdBand) -> Message {
    bounded_fmt(format_args!(
        "{} {} {:.2}{} > {:.2}",
        sensor.id,
        band.severity,
        sensor.value,
        sensor.kind.unit(),
        band.trigger
    ))
}
