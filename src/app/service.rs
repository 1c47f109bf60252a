//! Plant service: the hexagonal core.
//!
//! [`Plant`] owns the six simulation components and the clock.  It exposes
//! a hardware-agnostic API: per-tick orchestration, the incident pass, and
//! the query/command surface the API boundary calls from any thread.
//!
//! ```text
//!  ClockPort ──▶ ┌──────────────────────────────────┐ ──▶ EventSink
//!                │              Plant               │
//!  API calls ──▶ │ physics · sensors · actuators    │ ──▶ PlantSnapshot
//!                │ alarms · interlocks · incidents  │
//!                └──────────────────────────────────┘
//! ```
//!
//! ## Lock order
//!
//! `incidents → safety → alarms → sensors → physics → actuator records`.
//! Every method that holds more than one lock takes them in this order.
//! Actuator records carry their own per-record mutex inside
//! [`ActuatorRegistry`], so API commands never wait on the tick.

use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};

use crate::actuators::race::RaceReport;
use crate::actuators::{ActuatorRecord, ActuatorRegistry, CommandLogEntry, CommandOutcome};
use crate::alarms::{AlarmChange, AlarmCounts, AlarmEngine, AlarmRecord};
use crate::config::PlantConfig;
use crate::error::{Clamped, Result};
use crate::forensics::{ForensicTrail, TrailSources};
use crate::ident::{ActuatorId, LineId, ShortText, bounded, bounded_fmt};
use crate::incidents::effects::EffectTargets;
use crate::incidents::{Created, ForensicToken, IncidentEngine, IncidentView, NewIncident, PassReport, Resolution};
use crate::persist::{PlantSnapshot, RestoreReport};
use crate::physics::{FaultHandle, FaultInfo, FaultKind, PhysicsEngine, SensorKind};
use crate::safety::{InterlockRecord, PlantView, SafetyInterlockEngine, Trip};
use crate::sensors::{LineSummary, Sample, SensorRecord, SensorRegistry};

use super::commands::{PlantCommand, Role};
use super::events::{LineTelemetry, PlantEvent, TelemetryData};
use super::ports::{ClockPort, ConfigError, EventSink};

// ───────────────────────────────────────────────────────────────
// Replies
// ───────────────────────────────────────────────────────────────

/// What one simulation tick did.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub tick: u64,
    pub at: u64,
    pub alarm_changes: usize,
    pub trips: Vec<Trip>,
}

/// Successful reply to a [`PlantCommand`].
#[derive(Debug, Clone, PartialEq)]
pub enum CommandReply {
    Executed(CommandOutcome),
    Raced(RaceReport),
    Alarm(AlarmRecord),
    Interlock(InterlockRecord),
    /// Actuators stopped / interlocks re-armed.
    Count(usize),
    Fault(FaultHandle),
    FaultCleared(bool),
    Base(Clamped<f32>),
    Incident {
        incident: IncidentView,
        children: Vec<IncidentView>,
    },
    Resolved(IncidentView),
    Report {
        incident: IncidentView,
        token: ForensicToken,
    },
}

// ───────────────────────────────────────────────────────────────
// Plant
// ───────────────────────────────────────────────────────────────

pub struct Plant<C: ClockPort> {
    config: PlantConfig,
    clock: C,
    incidents: Mutex<IncidentEngine>,
    safety: Mutex<SafetyInterlockEngine>,
    alarms: Mutex<AlarmEngine>,
    sensors: RwLock<SensorRegistry>,
    physics: Mutex<PhysicsEngine>,
    actuators: ActuatorRegistry,
    ticks: AtomicU64,
}

impl<C: ClockPort> Plant<C> {
    /// Validate `config` and build every component from it.
    pub fn new(config: PlantConfig, clock: C) -> core::result::Result<Self, ConfigError> {
        config.validate()?;
        info!(
            "Plant: {} lines, {} actuators, {} interlocks",
            config.lines,
            config.equipment.len(),
            config.interlocks.len()
        );
        Ok(Self {
            incidents: Mutex::new(IncidentEngine::new(&config)),
            safety: Mutex::new(SafetyInterlockEngine::new(&config)),
            alarms: Mutex::new(AlarmEngine::new(&config)),
            sensors: RwLock::new(SensorRegistry::new(&config)),
            physics: Mutex::new(PhysicsEngine::new(&config)),
            actuators: ActuatorRegistry::new(&config),
            ticks: AtomicU64::new(0),
            clock,
            config,
        })
    }

    pub fn config(&self) -> &PlantConfig {
        &self.config
    }

    pub fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Ticks executed since start.
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Direct registry access for callers that need the raw primitives.
    pub fn actuators(&self) -> &ActuatorRegistry {
        &self.actuators
    }

    // ── Per-tick orchestration ────────────────────────────────

    /// physics drive → sensors → alarms → interlocks, in that order.
    pub fn tick(&self, sink: &mut impl EventSink) -> TickReport {
        let now = self.clock.now_ms();
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;

        let mut safety = self.safety.lock();
        let mut alarms = self.alarms.lock();
        let mut sensors = self.sensors.write();

        // 1. Sample physics with current actuator drive
        {
            let mut physics = self.physics.lock();
            for line in 1..=self.config.lines {
                if let Err(e) = physics.set_drive(line, self.actuators.drive_levels(line)) {
                    warn!("Plant: drive for line {line}: {e}");
                }
            }
            sensors.update(&mut physics, now);
        }

        // 2. Alarms
        let changes = alarms.evaluate(sensors.all(), now);

        // 3. Interlocks
        let trips = {
            let view = PlantView {
                sensors: &sensors,
                alarms: &alarms,
                actuators: &self.actuators,
            };
            safety.evaluate(&view, &self.actuators, now)
        };
        drop(sensors);
        drop(alarms);
        drop(safety);

        for change in &changes {
            sink.emit(&alarm_event(change));
        }
        for trip in &trips {
            sink.emit(&PlantEvent::InterlockTripped(trip.clone()));
        }
        if !changes.is_empty() || !trips.is_empty() {
            debug!("Plant: tick {tick}: {} alarm changes, {} trips", changes.len(), trips.len());
        }

        TickReport {
            tick,
            at: now,
            alarm_changes: changes.len(),
            trips,
        }
    }

    /// Incident spawn / cascade / auto-resolve pass.
    pub fn incident_pass(&self, sink: &mut impl EventSink) -> PassReport {
        let now = self.clock.now_ms();
        let report = self.with_incidents(now, |engine, targets| engine.update(targets));
        for rec in &report.resolved {
            sink.emit(&PlantEvent::IncidentResolved(rec.view()));
        }
        for rec in &report.created {
            sink.emit(&PlantEvent::IncidentCreated(rec.view()));
        }
        report
    }

    /// Current plant summary.
    pub fn telemetry(&self) -> TelemetryData {
        let now = self.clock.now_ms();
        let active_incidents = self.incidents.lock().active_count() as u32;
        let (interlocks_triggered, emergency_stop) = {
            let safety = self.safety.lock();
            (
                safety.all().iter().filter(|r| r.triggered).count() as u32,
                safety.manual_estop(),
            )
        };
        let counts = self.alarms.lock().counts();

        let sensors = self.sensors.read();
        let lines = (1..=self.config.lines)
            .map(|line| {
                let mut values = [0.0; SensorKind::COUNT];
                for kind in SensorKind::ALL {
                    values[kind.index()] = sensors.value(line, kind).unwrap_or(0.0);
                }
                LineTelemetry {
                    line,
                    values,
                    worst: sensors
                        .line_summary(line)
                        .map_or(crate::sensors::SensorStatus::Nominal, |s| s.worst),
                    actuators: self
                        .actuators
                        .by_line(line)
                        .into_iter()
                        .map(|a| (a.id, a.state))
                        .collect(),
                }
            })
            .collect();

        TelemetryData {
            at: now,
            tick: self.tick_count(),
            lines,
            active_alarms: counts.active + counts.acknowledged,
            unacknowledged_alarms: counts.active,
            active_incidents,
            interlocks_triggered,
            emergency_stop,
        }
    }

    // ── Command handling ──────────────────────────────────────

    /// Process an API command, emitting events for what changed and a
    /// `CommandRejected` event for failures.
    pub fn handle_command(&self, cmd: PlantCommand, role: Role, sink: &mut impl EventSink) -> Result<CommandReply> {
        let (actuator, label) = describe(&cmd);
        let reply = self.dispatch(cmd, role);
        match &reply {
            Ok(CommandReply::Incident { incident, children }) => {
                sink.emit(&PlantEvent::IncidentCreated(incident.clone()));
                for child in children {
                    sink.emit(&PlantEvent::IncidentCreated(child.clone()));
                }
            }
            Ok(CommandReply::Resolved(view) | CommandReply::Report { incident: view, .. }) => {
                sink.emit(&PlantEvent::IncidentResolved(view.clone()));
            }
            Ok(_) => {}
            Err(error) => {
                sink.emit(&PlantEvent::CommandRejected {
                    actuator,
                    command: label,
                    error: *error,
                });
            }
        }
        reply
    }

    fn dispatch(&self, cmd: PlantCommand, role: Role) -> Result<CommandReply> {
        match cmd {
            PlantCommand::Execute { actuator, command, param } => self
                .execute(&actuator, &command, param.as_deref(), role)
                .map(CommandReply::Executed),
            PlantCommand::Race { actuator, count } => self
                .trigger_race_condition(&actuator, count, role)
                .map(CommandReply::Raced),
            PlantCommand::AcknowledgeAlarm(id) => self.acknowledge_alarm(&id).map(CommandReply::Alarm),
            PlantCommand::ResetInterlock(id) => self.reset_interlock(&id).map(CommandReply::Interlock),
            PlantCommand::EmergencyStop => Ok(CommandReply::Count(self.emergency_stop_all())),
            PlantCommand::ResetEmergencyStop => Ok(CommandReply::Count(self.reset_emergency_stop())),
            PlantCommand::InjectFault {
                line,
                kind,
                fault,
                duration_ms,
            } => self
                .inject_fault(line, kind, fault, duration_ms)
                .map(CommandReply::Fault),
            PlantCommand::ClearFault { line, kind } => self.clear_fault(line, kind).map(CommandReply::FaultCleared),
            PlantCommand::SetBase { line, kind, value } => self.set_base(line, kind, value).map(CommandReply::Base),
            PlantCommand::ResetBase { line, kind } => self
                .reset_base(line, kind)
                .map(|value| CommandReply::Base(Clamped { value, clamped: false })),
            PlantCommand::SubmitIncident {
                kind,
                line,
                severity,
                description,
            } => {
                let mut req = NewIncident::new(kind, line, severity, 0).by(role);
                req.description = description;
                self.create_incident(req).map(|c| CommandReply::Incident {
                    incident: c.incident.view(),
                    children: c.children.iter().map(|r| r.view()).collect(),
                })
            }
            PlantCommand::ResolveIncident(id) => self.resolve_incident(&id).map(CommandReply::Resolved),
            PlantCommand::ReportIncident { incident, diagnosis } => self
                .report_incident(&incident, &diagnosis)
                .map(|(incident, token)| CommandReply::Report { incident, token }),
        }
    }

    // ── Actuators ─────────────────────────────────────────────

    pub fn execute(&self, id: &str, command: &str, param: Option<&str>, role: Role) -> Result<CommandOutcome> {
        self.actuators.execute_str(id, command, param, role, self.clock.now_ms())
    }

    /// Deliberately unserialized burst; see [`ActuatorRegistry::begin_race`].
    pub fn trigger_race_condition(&self, id: &str, count: u32, role: Role) -> Result<RaceReport> {
        self.actuators
            .trigger_race_condition(id, count, role, self.clock.now_ms())
    }

    pub fn actuator(&self, id: &str) -> Result<ActuatorRecord> {
        self.actuators.get(id)
    }

    pub fn all_actuators(&self) -> Vec<ActuatorRecord> {
        self.actuators.all()
    }

    pub fn command_log(&self) -> Vec<CommandLogEntry> {
        self.actuators.command_log()
    }

    // ── Sensors and physics ───────────────────────────────────

    pub fn sensor(&self, id: &str) -> Result<SensorRecord> {
        self.sensors.read().get(id).cloned()
    }

    pub fn sensors_by_line(&self, line: LineId) -> Result<Vec<SensorRecord>> {
        self.sensors.read().by_line(line).map(<[_]>::to_vec)
    }

    pub fn line_summary(&self, line: LineId) -> Result<LineSummary> {
        self.sensors.read().line_summary(line)
    }

    pub fn sensor_history(&self, id: &str) -> Result<Vec<Sample>> {
        self.sensors.read().history(id)
    }

    pub fn rate_of_change(&self, id: &str) -> Result<f32> {
        self.sensors.read().rate_of_change(id)
    }

    /// Fresh physics draw for one channel, outside the tick.
    pub fn value_of(&self, line: LineId, kind: SensorKind) -> Result<f32> {
        let now = self.clock.now_ms();
        let mut physics = self.physics.lock();
        physics.set_drive(line, self.actuators.drive_levels(line))?;
        physics.value_of(line, kind, now)
    }

    pub fn inject_fault(&self, line: LineId, kind: SensorKind, fault: FaultKind, duration_ms: u32) -> Result<FaultHandle> {
        self.physics
            .lock()
            .inject_fault(line, kind, fault, duration_ms, self.clock.now_ms())
    }

    pub fn clear_fault(&self, line: LineId, kind: SensorKind) -> Result<bool> {
        self.physics.lock().clear_fault(line, kind, None)
    }

    pub fn fault_info(&self, line: LineId, kind: SensorKind) -> Result<Option<FaultInfo>> {
        self.physics.lock().fault_info(line, kind, self.clock.now_ms())
    }

    pub fn set_base(&self, line: LineId, kind: SensorKind, value: f32) -> Result<Clamped<f32>> {
        let applied = self.physics.lock().set_base(line, kind, value)?;
        if applied.clamped {
            info!("Plant: base L{line} {kind} clamped {value} -> {}", applied.value);
        }
        Ok(applied)
    }

    pub fn reset_base(&self, line: LineId, kind: SensorKind) -> Result<f32> {
        let base = self.physics.lock().reset_base(line, kind)?;
        info!("Plant: base L{line} {kind} reset to {base}");
        Ok(base)
    }

    // ── Alarms ────────────────────────────────────────────────

    pub fn acknowledge_alarm(&self, id: &str) -> Result<AlarmRecord> {
        self.alarms.lock().acknowledge(id, self.clock.now_ms())
    }

    pub fn active_alarms(&self) -> Vec<AlarmRecord> {
        self.alarms.lock().active().to_vec()
    }

    pub fn alarm_history(&self) -> Vec<AlarmRecord> {
        self.alarms.lock().history().cloned().collect()
    }

    pub fn alarm_counts(&self) -> AlarmCounts {
        self.alarms.lock().counts()
    }

    // ── Safety ────────────────────────────────────────────────

    pub fn interlocks(&self) -> Vec<InterlockRecord> {
        self.safety.lock().all().to_vec()
    }

    pub fn interlock(&self, id: &str) -> Result<InterlockRecord> {
        self.safety.lock().get(id).cloned()
    }

    pub fn reset_interlock(&self, id: &str) -> Result<InterlockRecord> {
        self.safety.lock().reset(id, &self.actuators)
    }

    pub fn emergency_stop_all(&self) -> usize {
        self.safety
            .lock()
            .emergency_stop_all(&self.actuators, self.clock.now_ms())
    }

    pub fn reset_emergency_stop(&self) -> usize {
        self.safety.lock().reset_emergency_stop(&self.actuators)
    }

    // ── Incidents ─────────────────────────────────────────────

    pub fn create_incident(&self, req: NewIncident) -> Result<Created> {
        let now = self.clock.now_ms();
        self.with_incidents(now, |engine, targets| engine.create(req, targets))
    }

    pub fn resolve_incident(&self, id: &str) -> Result<IncidentView> {
        let now = self.clock.now_ms();
        self.with_incidents(now, |engine, targets| engine.resolve(id, Resolution::Operator, targets))
            .map(|r| r.view())
    }

    pub fn report_incident(&self, id: &str, diagnosis: &str) -> Result<(IncidentView, ForensicToken)> {
        let now = self.clock.now_ms();
        self.with_incidents(now, |engine, targets| engine.report(id, diagnosis, targets))
            .map(|(r, token)| (r.view(), token))
    }

    pub fn incident(&self, id: &str) -> Result<IncidentView> {
        self.incidents.lock().get(id).map(|r| r.view())
    }

    pub fn active_incidents(&self) -> Vec<IncidentView> {
        self.incidents.lock().active().map(|r| r.view()).collect()
    }

    pub fn incident_history(&self) -> Vec<IncidentView> {
        self.incidents.lock().all().iter().map(|r| r.view()).collect()
    }

    pub fn forensic_token(&self, id: &str) -> Result<ForensicToken> {
        self.incidents.lock().forensic_token(id)
    }

    pub fn verify_token(&self, id: &str, token: &str) -> Result<bool> {
        self.incidents.lock().verify_token(id, token)
    }

    /// Everything the forensics path can see for one line.
    pub fn forensic_trail(&self, line: LineId) -> Result<ForensicTrail> {
        let now = self.clock.now_ms();
        let incidents = self.incidents.lock();
        let alarms = self.alarms.lock();
        let sensors = self.sensors.read();
        let physics = self.physics.lock();
        ForensicTrail::collect(
            line,
            &TrailSources {
                sensors: &sensors,
                physics: &physics,
                actuators: &self.actuators,
                alarms: &alarms,
                incidents: &incidents,
            },
            now,
        )
    }

    // ── Persistence ───────────────────────────────────────────

    /// Consistent copy of every registry.  All component locks are held for
    /// the whole read, so an incident pass or trip cannot land halfway.
    pub fn snapshot(&self) -> PlantSnapshot {
        let incidents = self.incidents.lock();
        let safety = self.safety.lock();
        let alarms = self.alarms.lock();
        let sensors = self.sensors.read();
        PlantSnapshot {
            taken_at: self.clock.now_ms(),
            emergency_stop: safety.manual_estop(),
            sensors: sensors.all().to_vec(),
            actuators: self.actuators.all(),
            alarms: alarms.active().iter().chain(alarms.history()).cloned().collect(),
            incidents: incidents.all().to_vec(),
            interlocks: safety.all().to_vec(),
        }
    }

    /// Rehydrate records by identity.  Unknown ids are skipped with a warning.
    pub fn restore(&self, snap: &PlantSnapshot) -> RestoreReport {
        let mut incidents = self.incidents.lock();
        let mut safety = self.safety.lock();
        let mut alarms = self.alarms.lock();
        let mut sensors = self.sensors.write();
        let report = RestoreReport {
            incidents: incidents.restore(&snap.incidents),
            interlocks: safety.restore(&snap.interlocks, snap.emergency_stop),
            alarms: alarms.restore(&snap.alarms),
            sensors: sensors.restore(&snap.sensors),
            actuators: self.actuators.restore(&snap.actuators),
        };
        info!("Plant: restored snapshot from {} ms: {report:?}", snap.taken_at);
        report
    }

    // ── Internal ──────────────────────────────────────────────

    /// Run `f` with the incident engine and the effect targets it may
    /// write, honouring the lock order.
    fn with_incidents<T>(&self, now: u64, f: impl FnOnce(&mut IncidentEngine, &mut EffectTargets<'_>) -> T) -> T {
        let mut incidents = self.incidents.lock();
        let mut safety = self.safety.lock();
        let mut physics = self.physics.lock();
        let mut targets = EffectTargets {
            physics: &mut physics,
            actuators: &self.actuators,
            safety: &mut safety,
            now,
        };
        f(&mut incidents, &mut targets)
    }
}

fn alarm_event(change: &AlarmChange) -> PlantEvent {
    match change {
        AlarmChange::Raised(a) => PlantEvent::AlarmRaised(a.clone()),
        AlarmChange::Escalated { from, alarm } => PlantEvent::AlarmEscalated {
            from: *from,
            alarm: alarm.clone(),
        },
        AlarmChange::Demoted { from, alarm } => PlantEvent::AlarmDemoted {
            from: *from,
            alarm: alarm.clone(),
        },
        AlarmChange::Cleared(alarm) => PlantEvent::AlarmCleared(alarm.clone()),
    }
}

/// Target and label for a `CommandRejected` event.
fn describe(cmd: &PlantCommand) -> (Option<ActuatorId>, ShortText) {
    match cmd {
        PlantCommand::Execute { actuator, command, .. } => (Some(actuator.clone()), command.clone()),
        PlantCommand::Race { actuator, count } => (Some(actuator.clone()), bounded_fmt(format_args!("race x{count}"))),
        PlantCommand::AcknowledgeAlarm(id) => (None, bounded_fmt(format_args!("ack {id}"))),
        PlantCommand::ResetInterlock(id) => (None, bounded_fmt(format_args!("reset {id}"))),
        PlantCommand::EmergencyStop => (None, bounded("estop")),
        PlantCommand::ResetEmergencyStop => (None, bounded("estop reset")),
        PlantCommand::InjectFault { line, kind, .. } => (None, bounded_fmt(format_args!("fault L{line} {kind}"))),
        PlantCommand::ClearFault { line, kind } => (None, bounded_fmt(format_args!("clear fault L{line} {kind}"))),
        PlantCommand::SetBase { line, kind, .. } => (None, bounded_fmt(format_args!("base L{line} {kind}"))),
        PlantCommand::ResetBase { line, kind } => (None, bounded_fmt(format_args!("reset base L{line} {kind}"))),
        PlantCommand::SubmitIncident { kind, line, .. } => (None, bounded_fmt(format_args!("incident {kind} L{line}"))),
        PlantCommand::ResolveIncident(id) => (None, bounded_fmt(format_args!("resolve {id}"))),
        PlantCommand::ReportIncident { incident, .. } => (None, bounded_fmt(format_args!("report {incident}"))),
    }
}
