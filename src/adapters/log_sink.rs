//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured plant events through the
//! `log` facade.  A dashboard feed or scoring collector would implement the
//! same trait.

use log::{info, warn};

use crate::app::events::PlantEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`PlantEvent`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &PlantEvent) {
        match event {
            PlantEvent::Telemetry(t) => {
                for line in &t.lines {
                    let v = &line.values;
                    info!(
                        "TELEM | line {} | T={:.1}\u{00b0}C P={:.2}bar F={:.0}L/min V={:.1}mm/s L={:.0}% | {:?}",
                        line.line, v[0], v[1], v[2], v[3], v[4], line.worst,
                    );
                }
                info!(
                    "TELEM | tick={} alarms={}/{} unack incidents={} trips={} estop={}",
                    t.tick,
                    t.active_alarms,
                    t.unacknowledged_alarms,
                    t.active_incidents,
                    t.interlocks_triggered,
                    t.emergency_stop,
                );
            }
            PlantEvent::AlarmRaised(a) => {
                warn!("ALARM | {} {} {} = {:.2} ({})", a.id, a.severity, a.sensor, a.value, a.message);
            }
            PlantEvent::AlarmEscalated { from, alarm } => {
                warn!("ALARM | {} {} {} -> {} ({:.2})", alarm.id, alarm.sensor, from, alarm.severity, alarm.value);
            }
            PlantEvent::AlarmDemoted { from, alarm } => {
                info!("ALARM | {} {} {} -> {} ({:.2})", alarm.id, alarm.sensor, from, alarm.severity, alarm.value);
            }
            PlantEvent::AlarmCleared(a) => {
                info!("ALARM | {} {} cleared at {:.2}", a.id, a.sensor, a.value);
            }
            PlantEvent::InterlockTripped(t) => {
                warn!("TRIP | {} line {} {:?}, {} actuators", t.interlock, t.line, t.action, t.affected);
            }
            PlantEvent::IncidentCreated(i) => {
                warn!("INCIDENT | {} {} {} on {}: {}", i.id, i.severity, i.kind, i.equipment, i.description);
            }
            PlantEvent::IncidentResolved(i) => {
                info!("INCIDENT | {} resolved", i.id);
            }
            PlantEvent::CommandRejected { actuator, command, error } => {
                info!(
                    "REJECT | {} {}: {}",
                    actuator.as_ref().map_or("-", |a| a.as_str()),
                    command,
                    error
                );
            }
        }
    }
}
