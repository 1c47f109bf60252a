//! Tick-count duty scheduler.
//!
//! Runs inside the simulation tick thread.  The scheduler notifies a
//! [`SchedulerDelegate`] when a duty fires; the driver implements the
//! delegate to emit telemetry or write a snapshot.
//!
//! ```text
//!  tick thread ──▶ Plant::tick() ──▶ Scheduler::tick()
//!                                         │
//!                                         ▼
//!                               SchedulerDelegate
//!                         ("telemetry" / "snapshot" / ...)
//! ```

use crate::app::ports::SchedulerDelegate;
use log::info;

// ═══════════════════════════════════════════════════════════════
//  Schedule types
// ═══════════════════════════════════════════════════════════════

/// Labels of the built-in driver duties.
pub const TELEMETRY: &str = "telemetry";
pub const SNAPSHOT: &str = "snapshot";

/// A single periodic duty.
#[derive(Debug, Clone)]
pub struct Schedule {
    /// Human-readable label, passed back to the delegate.
    pub label: &'static str,
    /// Fire every `every_ticks` ticks; zero disables the duty.
    pub every_ticks: u32,
}

impl Schedule {
    pub fn every(label: &'static str, ticks: u32) -> Self {
        Self { label, every_ticks: ticks }
    }

    pub fn enabled(&self) -> bool {
        self.every_ticks > 0
    }
}

// ═══════════════════════════════════════════════════════════════
//  Scheduler engine
// ═══════════════════════════════════════════════════════════════

/// Maximum number of concurrent schedules.
const MAX_SCHEDULES: usize = 4;

pub struct Scheduler {
    schedules: heapless::Vec<ScheduleEntry, MAX_SCHEDULES>,
}

#[derive(Debug, Clone)]
struct ScheduleEntry {
    schedule: Schedule,
    elapsed_ticks: u32,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            schedules: heapless::Vec::new(),
        }
    }

    /// Add a schedule.  Returns the slot index, or `None` if full.
    pub fn add(&mut self, schedule: Schedule) -> Option<usize> {
        let slot = self.schedules.len();
        let (label, every) = (schedule.label, schedule.every_ticks);
        self.schedules
            .push(ScheduleEntry {
                schedule,
                elapsed_ticks: 0,
            })
            .ok()?;
        info!("Scheduler: added '{label}' every {every} ticks at slot {slot}");
        Some(slot)
    }

    /// Advance by one tick and fire whatever is due.
    pub fn tick(&mut self, delegate: &mut dyn SchedulerDelegate) {
        for entry in self.schedules.iter_mut().filter(|e| e.schedule.enabled()) {
            entry.elapsed_ticks += 1;
            if entry.elapsed_ticks >= entry.schedule.every_ticks {
                delegate.on_schedule_fired(entry.schedule.label);
                entry.elapsed_ticks = 0;
            }
        }
    }

    /// Number of enabled schedules.
    pub fn active_count(&self) -> usize {
        self.schedules.iter().filter(|e| e.schedule.enabled()).count()
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
