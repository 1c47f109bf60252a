//! Sensor registry: one record per `(line, kind)`.
//!
//! Each tick the registry pulls a fresh value from the
//! [`PhysicsEngine`](crate::physics::PhysicsEngine), shifts the old value
//! into `previous`, derives a status label and appends the sample to a short
//! per-sensor history ring.  It never writes to the physics engine or any
//! other registry.

use std::collections::HashMap;

use heapless::HistoryBuffer;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::config::{PerKind, PlantConfig, StatusBands};
use crate::error::{CoreError, Entity, Result};
use crate::ident::{LineId, SensorId, bounded_fmt};
use crate::physics::{PhysicsEngine, SensorKind};

/// Samples kept per sensor for the history query.
pub const HISTORY_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SensorStatus {
    Nominal,
    Warning,
    Fault,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorRecord {
    pub id: SensorId,
    pub line: LineId,
    pub kind: SensorKind,
    pub value: f32,
    pub previous: f32,
    pub status: SensorStatus,
    /// Clock ms of the last update (0 = never sampled).
    pub updated_at: u64,
}

impl SensorRecord {
    pub fn unit(&self) -> &'static str {
        self.kind.unit()
    }
}

/// One history entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub at: u64,
    pub value: f32,
}

/// Dashboard aggregate for one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSummary {
    pub line: LineId,
    pub worst: SensorStatus,
    pub nominal: u8,
    pub warning: u8,
    pub fault: u8,
}

/// `S-Temp-1` style id.
pub fn sensor_id(line: LineId, kind: SensorKind) -> SensorId {
    bounded_fmt(format_args!("S-{}-{line}", kind.tag()))
}

pub struct SensorRegistry {
    lines: LineId,
    records: Vec<SensorRecord>,
    history: Vec<HistoryBuffer<Sample, HISTORY_LEN>>,
    index: HashMap<String, usize>,
    bands: PerKind<StatusBands>,
}

impl SensorRegistry {
    pub fn new(config: &PlantConfig) -> Self {
        let mut records = Vec::with_capacity(config.lines as usize * SensorKind::COUNT);
        let mut index = HashMap::new();
        for line in 1..=config.lines {
            for kind in SensorKind::ALL {
                let base = config.sensors.get(kind).base;
                let id = sensor_id(line, kind);
                index.insert(id.as_str().to_owned(), records.len());
                records.push(SensorRecord {
                    id,
                    line,
                    kind,
                    value: base,
                    previous: base,
                    status: SensorStatus::Nominal,
                    updated_at: 0,
                });
            }
        }
        let s = &config.sensors;
        Self {
            lines: config.lines,
            history: (0..records.len()).map(|_| HistoryBuffer::new()).collect(),
            records,
            index,
            bands: PerKind {
                temperature: s.temperature.status,
                pressure: s.pressure.status,
                flow: s.flow.status,
                vibration: s.vibration.status,
                level: s.level.status,
            },
        }
    }

    /// Pull one value per sensor from the physics engine.
    pub fn update(&mut self, physics: &mut PhysicsEngine, now: u64) {
        for (i, rec) in self.records.iter_mut().enumerate() {
            let (value, faulted) = match (
                physics.value_of(rec.line, rec.kind, now),
                physics.is_faulted(rec.line, rec.kind, now),
            ) {
                (Ok(v), Ok(f)) => (v, f),
                (Err(e), _) | (_, Err(e)) => {
                    warn!("sensors: {} unreadable: {e}", rec.id);
                    continue;
                }
            };
            rec.previous = rec.value;
            rec.value = value;
            rec.updated_at = now;

            let status = classify(value, self.bands.get(rec.kind), faulted);
            if status != rec.status {
                debug!("sensors: {} {:?} -> {:?} ({value:.2})", rec.id, rec.status, status);
                rec.status = status;
            }
            self.history[i].write(Sample { at: now, value });
        }
    }

    // ── Queries ───────────────────────────────────────────────────

    pub fn get(&self, id: &str) -> Result<&SensorRecord> {
        self.position(id).map(|i| &self.records[i])
    }

    pub fn at(&self, line: LineId, kind: SensorKind) -> Result<&SensorRecord> {
        if line == 0 || line > self.lines {
            return Err(CoreError::NotFound(Entity::Line));
        }
        Ok(&self.records[(line as usize - 1) * SensorKind::COUNT + kind.index()])
    }

    pub fn value(&self, line: LineId, kind: SensorKind) -> Result<f32> {
        self.at(line, kind).map(|r| r.value)
    }

    pub fn by_line(&self, line: LineId) -> Result<&[SensorRecord]> {
        if line == 0 || line > self.lines {
            return Err(CoreError::NotFound(Entity::Line));
        }
        let start = (line as usize - 1) * SensorKind::COUNT;
        Ok(&self.records[start..start + SensorKind::COUNT])
    }

    pub fn line_summary(&self, line: LineId) -> Result<LineSummary> {
        let mut summary = LineSummary {
            line,
            worst: SensorStatus::Nominal,
            nominal: 0,
            warning: 0,
            fault: 0,
        };
        for rec in self.by_line(line)? {
            match rec.status {
                SensorStatus::Nominal => summary.nominal += 1,
                SensorStatus::Warning => summary.warning += 1,
                SensorStatus::Fault => summary.fault += 1,
            }
            summary.worst = summary.worst.max(rec.status);
        }
        Ok(summary)
    }

    /// Units per second between the last two samples.
    pub fn rate_of_change(&self, id: &str) -> Result<f32> {
        let i = self.position(id)?;
        let samples: Vec<&Sample> = self.history[i].oldest_ordered().collect();
        let [.., before, last] = samples.as_slice() else {
            return Ok(0.0);
        };
        let dt_ms = last.at.saturating_sub(before.at);
        if dt_ms == 0 {
            return Ok(0.0);
        }
        Ok((last.value - before.value) / (dt_ms as f32 / 1000.0))
    }

    /// Oldest-first history.
    pub fn history(&self, id: &str) -> Result<Vec<Sample>> {
        let i = self.position(id)?;
        Ok(self.history[i].oldest_ordered().copied().collect())
    }

    pub fn all(&self) -> &[SensorRecord] {
        &self.records
    }

    pub fn lines(&self) -> LineId {
        self.lines
    }

    // ── Persistence ───────────────────────────────────────────────

    /// Rehydrate by identity.  Returns how many records were applied.
    pub fn restore(&mut self, records: &[SensorRecord]) -> usize {
        let mut applied = 0;
        for saved in records {
            let Ok(i) = self.position(&saved.id) else {
                warn!("sensors: snapshot has unknown sensor {}", saved.id);
                continue;
            };
            let rec = &mut self.records[i];
            rec.value = saved.value;
            rec.previous = saved.previous;
            rec.status = saved.status;
            rec.updated_at = saved.updated_at;
            applied += 1;
        }
        applied
    }

    fn position(&self, id: &str) -> Result<usize> {
        self.index
            .get(id)
            .copied()
            .ok_or(CoreError::NotFound(Entity::Sensor))
    }
}

fn classify(value: f32, bands: &StatusBands, faulted: bool) -> SensorStatus {
    if faulted || value < bands.fault_low || value > bands.fault_high {
        SensorStatus::Fault
    } else if value < bands.warn_low || value > bands.warn_high {
        SensorStatus::Warning
    } else {
        SensorStatus::Nominal
    }
}
