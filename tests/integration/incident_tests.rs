//! Incident lifecycle through `Plant`: submission, cascades, duplicate
//! suppression, operator reports, auto-resolution and interlock bypass.

use scadasim::actuators::ActuatorState;
use scadasim::alarms::AlarmSeverity;
use scadasim::app::service::CommandReply;
use scadasim::error::{CoreError, Entity, Limit, RejectReason};
use scadasim::ident::bounded;
use scadasim::incidents::{IncidentStatus, IncidentType, NewIncident};
use scadasim::physics::SensorKind;
use scadasim::{PlantCommand, Role};

use super::mock_ports::{RecordingSink, plant, quiet_config};

fn submit(kind: IncidentType, line: u8, severity: AlarmSeverity) -> PlantCommand {
    PlantCommand::SubmitIncident {
        kind,
        line,
        severity,
        description: None,
    }
}

// ── Submission and duplicates ─────────────────────────────────

#[test]
fn duplicate_submission_is_refused_and_reported() {
    let (plant, _) = plant(quiet_config());
    let mut sink = RecordingSink::new();

    plant
        .handle_command(submit(IncidentType::MotorOverload, 3, AlarmSeverity::Medium), Role::Admin, &mut sink)
        .unwrap();
    assert_eq!(plant.actuator("MTR-3").unwrap().state, ActuatorState::Error);

    let err = plant
        .handle_command(submit(IncidentType::MotorOverload, 3, AlarmSeverity::High), Role::Admin, &mut sink)
        .unwrap_err();
    assert_eq!(err, CoreError::LimitExceeded(Limit::DuplicateIncident));
    assert_eq!(sink.created(), 1);
    assert_eq!(sink.rejected(), 1);
    assert_eq!(plant.active_incidents().len(), 1);
}

#[test]
fn unknown_line_is_not_found() {
    let (plant, _) = plant(quiet_config());
    let err = plant
        .create_incident(NewIncident::new(IncidentType::TempSpike, 9, AlarmSeverity::Low, 0))
        .unwrap_err();
    assert_eq!(err, CoreError::NotFound(Entity::Line));
    assert!(plant.incident_history().is_empty());
}

#[test]
fn depth_beyond_limit_is_refused() {
    let (plant, _) = plant(quiet_config());
    let depth = plant.config().incidents.max_cascade_depth + 1;
    let err = plant
        .create_incident(NewIncident::new(IncidentType::SignalLoss, 1, AlarmSeverity::High, depth))
        .unwrap_err();
    assert_eq!(err, CoreError::LimitExceeded(Limit::CascadeDepth));
}

// ── Cascades ──────────────────────────────────────────────────

#[test]
fn high_incident_cascades_one_step_down() {
    let mut config = quiet_config();
    config.incidents.cascade_probability = 1.0;
    let (plant, _) = plant(config);
    let mut sink = RecordingSink::new();

    let reply = plant
        .handle_command(submit(IncidentType::StuckValve, 1, AlarmSeverity::High), Role::Operator, &mut sink)
        .unwrap();
    let CommandReply::Incident { incident, children } = reply else {
        panic!("unexpected reply");
    };

    // HIGH parent → MEDIUM child, and MEDIUM never cascades further.
    assert_eq!(children.len(), 1);
    let child = &children[0];
    assert_eq!(child.kind, IncidentType::PressureLoss);
    assert_eq!(child.severity, AlarmSeverity::Medium);
    assert_eq!(child.cascade_depth, 1);
    assert_eq!(child.parent.as_ref(), Some(&incident.id));
    assert!(child.line == 1 || child.line == 2);
    assert_eq!(sink.created(), 2);
}

#[test]
fn critical_chain_respects_depth_limit() {
    let mut config = quiet_config();
    config.incidents.cascade_probability = 1.0;
    config.incidents.max_cascade_depth = 2;
    let (plant, _) = plant(config);

    let created = plant
        .create_incident(NewIncident::new(IncidentType::MotorOverload, 2, AlarmSeverity::Critical, 0))
        .unwrap();
    // CRITICAL → HIGH (depth 1) → MEDIUM (depth 2), then stop.
    assert_eq!(created.children.len(), 2);
    assert_eq!(created.children[0].kind, IncidentType::TempSpike);
    assert_eq!(created.children[1].kind, IncidentType::SafetyBypass);
    assert!(plant.incident_history().iter().all(|i| i.cascade_depth <= 2));
}

// ── Operator report ───────────────────────────────────────────

#[test]
fn report_with_matching_diagnosis_returns_verifiable_token() {
    let (plant, clock) = plant(quiet_config());
    let created = plant
        .create_incident(NewIncident::new(IncidentType::StuckValve, 1, AlarmSeverity::High, 0))
        .unwrap();
    let id = created.incident.id.clone();

    assert_eq!(
        plant.report_incident(&id, "pump cavitation").unwrap_err(),
        CoreError::Rejected(RejectReason::DiagnosisMismatch)
    );

    clock.set(30_000);
    let (view, token) = plant.report_incident(&id, "VLV-1 is jammed half open").unwrap();
    assert_eq!(view.status, IncidentStatus::Resolved);
    assert_eq!(token.len(), 64);
    assert!(plant.verify_token(&id, &token).unwrap());
    assert!(!plant.verify_token(&id, &"0".repeat(64)).unwrap());
    assert_eq!(plant.forensic_token(&id).unwrap(), token);
    assert_eq!(plant.actuator("VLV-1").unwrap().state, ActuatorState::Open);

    assert_eq!(
        plant.report_incident(&id, "VLV-1").unwrap_err(),
        CoreError::Rejected(RejectReason::AlreadyResolved)
    );
}

#[test]
fn report_command_emits_resolution() {
    let (plant, _) = plant(quiet_config());
    let mut sink = RecordingSink::new();
    let created = plant
        .create_incident(NewIncident::new(IncidentType::SignalLoss, 4, AlarmSeverity::Low, 0))
        .unwrap();

    let reply = plant
        .handle_command(
            PlantCommand::ReportIncident {
                incident: created.incident.id.clone(),
                diagnosis: bounded("flow transmitter signal loss"),
            },
            Role::Maintenance,
            &mut sink,
        )
        .unwrap();
    assert!(matches!(reply, CommandReply::Report { .. }));
    assert_eq!(sink.resolved(), 1);
    assert!(plant.fault_info(4, SensorKind::Flow).unwrap().is_none());
}

// ── Periodic pass ─────────────────────────────────────────────

#[test]
fn stale_incidents_auto_resolve_on_the_pass() {
    let mut config = quiet_config();
    config.incidents.auto_resolve_ms = 10_000;
    let (plant, clock) = plant(config);
    let mut sink = RecordingSink::new();

    plant
        .create_incident(NewIncident::new(IncidentType::TempSpike, 2, AlarmSeverity::Medium, 0))
        .unwrap();

    clock.set(9_999);
    assert!(plant.incident_pass(&mut sink).resolved.is_empty());

    clock.set(10_000);
    let pass = plant.incident_pass(&mut sink);
    assert_eq!(pass.resolved.len(), 1);
    assert_eq!(sink.resolved(), 1);
    assert!(plant.active_incidents().is_empty());
}

#[test]
fn certain_spawn_creates_depth_zero_incident() {
    let mut config = quiet_config();
    config.incidents.spawn_probability = 1.0;
    let (plant, _) = plant(config);
    let mut sink = RecordingSink::new();

    let pass = plant.incident_pass(&mut sink);
    assert_eq!(pass.created.len(), 1);
    assert_eq!(pass.created[0].cascade_depth, 0);
    assert_eq!(sink.created(), 1);
}

// ── Safety bypass ─────────────────────────────────────────────

#[test]
fn bypass_suppresses_trips_until_resolved() {
    let (plant, clock) = plant(quiet_config());
    let mut sink = RecordingSink::new();

    let created = plant
        .create_incident(NewIncident::new(IncidentType::SafetyBypass, 1, AlarmSeverity::Medium, 0))
        .unwrap();
    assert!(plant.interlock("IL-1-OVERPRESS").unwrap().bypassed);

    plant.set_base(1, SensorKind::Pressure, 12.0).unwrap();
    clock.set(500);
    assert!(plant.tick(&mut sink).trips.is_empty());

    plant.resolve_incident(&created.incident.id).unwrap();
    assert!(!plant.interlock("IL-1-OVERPRESS").unwrap().bypassed);

    clock.set(1_000);
    let report = plant.tick(&mut sink);
    assert_eq!(report.trips.len(), 1);
    assert_eq!(report.trips[0].interlock.as_str(), "IL-1-OVERPRESS");
}

// ── Forensics ─────────────────────────────────────────────────

#[test]
fn forensic_trail_exposes_tokens_and_commands() {
    let (plant, clock) = plant(quiet_config());
    plant.execute("PMP-2", "set_speed", Some("40"), Role::Operator).unwrap();
    let created = plant
        .create_incident(NewIncident::new(IncidentType::SensorFault, 2, AlarmSeverity::Low, 0))
        .unwrap();
    clock.set(500);
    plant.tick(&mut RecordingSink::new());

    let trail = plant.forensic_trail(2).unwrap();
    assert_eq!(trail.line, 2);
    assert_eq!(trail.incidents.len(), 1);
    assert_eq!(trail.incidents[0].token, plant.forensic_token(&created.incident.id).unwrap());
    assert!(trail.commands.iter().any(|c| c.actuator.as_str() == "PMP-2"));
    let temp = trail
        .sensors
        .iter()
        .find(|s| s.kind == SensorKind::Temperature)
        .unwrap();
    assert!(temp.fault.is_some());
    assert_eq!(temp.samples.len(), 1);

    assert!(plant.forensic_trail(3).unwrap().incidents.is_empty());
}
