//! The deliberately non-atomic multi-command primitive.
//!
//! A race burst reads the record **once**, computes every pending write from
//! that stale copy, then applies the writes one at a time, taking the record
//! mutex only for the duration of each individual store.  Any `execute`
//! landing between two stores is silently overwritten by the next image, so
//! the final `command_count`, state and result reflect *some* interleaving of
//! the burst and the concurrent command, not a fixed one.
//!
//! ```text
//!   begin_race ──▶ [img 1][img 2] … [img N]      (computed from one read)
//!                     │      │          │
//!   apply_next ──────▶ store  store ... store    (lock held per store only)
//! ```
//!
//! Each store is a full-record image (no torn reads for other callers).
//! Images never carry lock bits, and an image is dropped if the record has
//! since become locked, stuck or errored, so incident and safety holds
//! always win.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::command::{ActuatorCommand, CommandOrigin};
use super::{ActuatorRegistry, ActuatorState, fsm};
use crate::app::commands::Role;
use crate::error::{CoreError, Limit, RejectReason, Result};
use crate::ident::{ActuatorId, ShortText, bounded, bounded_fmt};

/// One pending full-record write.
#[derive(Debug, Clone, PartialEq)]
struct RaceImage {
    command: ActuatorCommand,
    state: ActuatorState,
    rpm: f32,
    flow: f32,
    command_count: u32,
}

/// A burst of pending writes computed from one stale read.
#[derive(Debug)]
pub struct RaceBatch {
    index: usize,
    actuator: ActuatorId,
    role: Role,
    images: Vec<RaceImage>,
    next: usize,
    applied: u32,
    dropped: u32,
}

impl RaceBatch {
    pub fn remaining(&self) -> usize {
        self.images.len() - self.next
    }

    pub fn issued(&self) -> u32 {
        self.images.len() as u32
    }
}

/// Summary of a completed burst.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceReport {
    pub actuator: ActuatorId,
    pub issued: u32,
    pub applied: u32,
    pub dropped: u32,
    pub final_state: ActuatorState,
    pub final_count: u32,
    pub last_result: ShortText,
}

impl ActuatorRegistry {
    /// Snapshot the record and compute `count` alternating writes.
    ///
    /// A burst above `race_burst_limit` is refused outright, so every
    /// accepted burst is issued in full.  A zero burst issues nothing.
    pub fn begin_race(&self, id: &str, count: u32, role: Role) -> Result<RaceBatch> {
        let index = self.position(id)?;
        if count > self.race_burst_limit {
            return Err(Limit::RaceBurst.into());
        }

        // The one stale read.
        let stale = self.records[index].lock().clone();
        if stale.locked() {
            return Err(RejectReason::Locked.into());
        }
        if !stale.state.is_healthy() {
            return Err(RejectReason::Stuck.into());
        }

        let pair = ActuatorCommand::toggle_pair(stale.kind, stale.state);
        let images = (0..count)
            .map(|i| {
                let command = pair[i as usize % 2];
                let mut img = stale.clone();
                img.state = fsm::plan(stale.kind, stale.state, &command).unwrap_or(stale.state);
                fsm::refresh_outputs(&mut img);
                RaceImage {
                    command,
                    state: img.state,
                    rpm: img.rpm,
                    flow: img.flow,
                    command_count: stale.command_count.wrapping_add(i + 1),
                }
            })
            .collect();

        Ok(RaceBatch {
            index,
            actuator: stale.id,
            role,
            images,
            next: 0,
            applied: 0,
            dropped: 0,
        })
    }

    /// Store the next pending image.  Returns `None` once the batch is spent,
    /// otherwise whether the image landed.
    pub fn apply_next(&self, batch: &mut RaceBatch, now: u64) -> Option<bool> {
        let img = batch.images.get(batch.next)?.clone();
        batch.next += 1;

        let mut rec = self.records[batch.index].lock();
        let landed = !rec.locked() && rec.state.is_healthy();
        if landed {
            rec.state = img.state;
            rec.rpm = img.rpm;
            rec.flow = img.flow;
            rec.command_count = img.command_count;
            rec.last_command_at = now;
            rec.last_result = bounded("OK");
        }
        drop(rec);

        let result = if landed {
            batch.applied += 1;
            Ok(())
        } else {
            batch.dropped += 1;
            Err(CoreError::Rejected(RejectReason::Locked))
        };
        let name: ShortText = bounded_fmt(format_args!("{}", img.command));
        self.log_entry(now, &batch.actuator, &name, CommandOrigin::Race, batch.role, result);
        Some(landed)
    }

    /// Issue a full burst, yielding between stores so concurrent callers
    /// can interleave.
    pub fn trigger_race_condition(&self, id: &str, count: u32, role: Role, now: u64) -> Result<RaceReport> {
        let mut batch = self.begin_race(id, count, role)?;
        warn!("ACT race burst on {}: {} writes", batch.actuator, batch.issued());
        while self.apply_next(&mut batch, now).is_some() {
            std::thread::yield_now();
        }
        let rec = self.records[batch.index].lock().clone();
        info!(
            "ACT race burst on {} done: applied={} dropped={} count={}",
            rec.id, batch.applied, batch.dropped, rec.command_count
        );
        Ok(RaceReport {
            actuator: rec.id,
            issued: batch.issued(),
            applied: batch.applied,
            dropped: batch.dropped,
            final_state: rec.state,
            final_count: rec.command_count,
            last_result: rec.last_result,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlantConfig;
    use crate::safety::Scope;

    fn registry() -> ActuatorRegistry {
        ActuatorRegistry::new(&PlantConfig::default())
    }

    #[test]
    fn burst_alone_counts_exactly() {
        let reg = registry();
        let report = reg.trigger_race_condition("MTR-1", 7, Role::Viewer, 1).unwrap();
        assert_eq!(report.issued, 7);
        assert_eq!(report.applied, 7);
        assert_eq!(report.final_count, 7);
        // Odd burst ends on the first command of the pair.
        assert_eq!(report.final_state, ActuatorState::Stopped);
    }

    #[test]
    fn interleaved_execute_is_lost_or_counted() {
        let reg = registry();
        let mut batch = reg.begin_race("PMP-2", 4, Role::Viewer).unwrap();
        reg.apply_next(&mut batch, 1).unwrap();
        reg.apply_next(&mut batch, 1).unwrap();
        reg.execute("PMP-2", ActuatorCommand::SetSpeed(20.0), Role::Operator, 2)
            .unwrap();
        while reg.apply_next(&mut batch, 3).is_some() {}
        // The stale images overwrite the concurrent command's count.
        assert_eq!(reg.get("PMP-2").unwrap().command_count, 4);

        let reg = registry();
        reg.execute("PMP-2", ActuatorCommand::SetSpeed(20.0), Role::Operator, 0)
            .unwrap();
        let report = reg.trigger_race_condition("PMP-2", 4, Role::Viewer, 1).unwrap();
        assert_eq!(report.final_count, 5);
    }

    #[test]
    fn lock_mid_burst_drops_remaining_images() {
        let reg = registry();
        let mut batch = reg.begin_race("VLV-1", 6, Role::Viewer).unwrap();
        assert_eq!(reg.apply_next(&mut batch, 1), Some(true));
        reg.emergency_stop(Scope::Line(1), 2);
        let before = reg.get("VLV-1").unwrap();
        while reg.apply_next(&mut batch, 3).is_some() {}
        let after = reg.get("VLV-1").unwrap();
        assert_eq!(after.state, before.state);
        assert_eq!(after.command_count, before.command_count);
        assert!(after.locked());
    }

    #[test]
    fn locked_or_stuck_target_refuses_burst() {
        let reg = registry();
        reg.force_state("MTR-3", ActuatorState::Error, false, 0).unwrap();
        assert_eq!(
            reg.begin_race("MTR-3", 3, Role::Viewer).unwrap_err(),
            CoreError::Rejected(RejectReason::Stuck)
        );
        reg.emergency_stop(Scope::Line(4), 0);
        assert_eq!(
            reg.begin_race("PMP-4", 3, Role::Viewer).unwrap_err(),
            CoreError::Rejected(RejectReason::Locked)
        );
    }

    #[test]
    fn burst_above_limit_is_refused() {
        let reg = registry();
        let limit = PlantConfig::default().race_burst_limit;
        assert_eq!(
            reg.begin_race("MTR-2", limit + 1, Role::Viewer).unwrap_err(),
            CoreError::LimitExceeded(Limit::RaceBurst)
        );
        assert_eq!(reg.get("MTR-2").unwrap().command_count, 0);

        let report = reg.trigger_race_condition("MTR-2", limit, Role::Viewer, 1).unwrap();
        assert_eq!(report.issued, limit);
        assert_eq!(report.final_count, limit);
    }

    #[test]
    fn empty_burst_writes_nothing() {
        let reg = registry();
        let before = reg.get("MTR-2").unwrap();
        let report = reg.trigger_race_condition("MTR-2", 0, Role::Viewer, 1).unwrap();
        assert_eq!(report.issued, 0);
        assert_eq!(reg.get("MTR-2").unwrap(), before);
    }
}
