//! Command layer, status and parameter backup tests over the simulated
//! controller.
//!
//! # Test Categories
//!
//! - **Sequence tests**: move/end-stop sequences, cycles, jog
//! - **Push tests**: argument checks and push-mode cleanup
//! - **Parameter tests**: device parameter validation, backup and restore
//! - **Status tests**: snapshots, alarm history, background monitor

mod common;

use common::{bare_actuator, fast_config, sim_actuator, tag};
use ec_common::{ActuatorError, AxisState, TagConfig};
use ec_motion::commands::{
    backup_parameters, cycle_motion, end_sequence, jog, move_sequence, push_operation,
    restore_parameters,
};
use ec_motion::{
    DeviceParameter, Direction, ParameterBackup, ParameterPort, StatusMonitor, StatusPort,
    StatusReport,
};
use ec_transport::TagValue;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const DWELL: Duration = Duration::from_millis(1);

fn true_writes(handle: &ec_transport::SimHandle, name: &str) -> usize {
    handle
        .writes_to(&tag(name))
        .into_iter()
        .filter(|v| *v == TagValue::Bool(true))
        .count()
}

// ============================================================================
// Sequence Tests
// ============================================================================

#[test]
fn test_move_sequence_visits_targets_in_order() {
    let (actuator, handle) = sim_actuator(&fast_config());

    move_sequence(&actuator, &[90.0, 180.0, 270.0, 0.0], None, DWELL).unwrap();

    assert_eq!(
        handle.writes_to(&tag("TargetPos")),
        vec![
            TagValue::Real(90.0),
            TagValue::Real(180.0),
            TagValue::Real(270.0),
            TagValue::Real(0.0),
        ]
    );
    assert_eq!(actuator.current_position().unwrap(), 0.0);
}

#[test]
fn test_move_sequence_aborts_on_first_failure() {
    let (actuator, handle) = sim_actuator(&fast_config());

    let result = move_sequence(&actuator, &[90.0, 400.0, 180.0], None, DWELL);

    assert!(matches!(result, Err(ActuatorError::InvalidArgument(_))));
    assert_eq!(handle.writes_to(&tag("TargetPos")), vec![TagValue::Real(90.0)]);
    assert_eq!(actuator.current_position().unwrap(), 90.0);
}

#[test]
fn test_end_sequence_and_cycles() {
    let (actuator, handle) = sim_actuator(&fast_config());

    end_sequence(
        &actuator,
        &[(Direction::Forward, DWELL), (Direction::Backward, DWELL)],
    )
    .unwrap();
    assert_eq!(true_writes(&handle, "ST1"), 1);
    assert_eq!(true_writes(&handle, "ST0"), 1);

    handle.clear_events();
    cycle_motion(&actuator, 3, DWELL).unwrap();
    assert_eq!(true_writes(&handle, "ST1"), 3);
    assert_eq!(true_writes(&handle, "ST0"), 3);
    assert_eq!(handle.get(&tag("LS0")), Some(TagValue::Bool(true)));
}

#[test]
fn test_cycle_aborts_on_alarm() {
    let (actuator, handle) = bare_actuator(&fast_config());
    handle.set(tag("ALM"), false);

    let result = cycle_motion(&actuator, 5, DWELL);

    assert!(matches!(result, Err(ActuatorError::AlarmDuringMotion { .. })));
    assert_eq!(true_writes(&handle, "ST1"), 1);
    assert_eq!(actuator.state(), AxisState::Alarm);
}

#[test]
fn test_timed_jog_stops() {
    let (actuator, handle) = sim_actuator(&fast_config());

    jog(&actuator, Direction::Forward, Some(30.0), Some(Duration::from_millis(10))).unwrap();

    assert_eq!(handle.writes_to(&tag("Speed")), vec![TagValue::Real(30.0)]);
    assert_eq!(handle.get(&tag("ST1")), Some(TagValue::Bool(false)));
    assert_eq!(actuator.state(), AxisState::Idle);
}

#[test]
fn test_jog_stopped_early_is_success() {
    let (actuator, handle) = sim_actuator(&fast_config());

    let result = crossbeam_utils::thread::scope(|s| {
        let jogger = s.spawn(|_| {
            jog(&actuator, Direction::Backward, None, Some(Duration::from_secs(30)))
        });
        thread::sleep(Duration::from_millis(30));
        actuator.stop();
        jogger.join().unwrap()
    })
    .unwrap();

    assert_eq!(result, Ok(()));
    assert_eq!(handle.get(&tag("ST0")), Some(TagValue::Bool(false)));
}

// ============================================================================
// Push Tests
// ============================================================================

#[test]
fn test_push_operation_sequence() {
    let (actuator, handle) = sim_actuator(&fast_config());

    push_operation(&actuator, 120.0, 50, 40.0).unwrap();

    let writes = handle.writes();
    let push: Vec<_> = writes
        .iter()
        .filter(|(a, _)| [tag("PushForce"), tag("PushPosition"), tag("PushMode")].contains(a))
        .cloned()
        .collect();
    assert_eq!(
        push,
        vec![
            (tag("PushForce"), TagValue::Int(50)),
            (tag("PushPosition"), TagValue::Real(120.0)),
            (tag("PushMode"), TagValue::Bool(true)),
            (tag("PushMode"), TagValue::Bool(false)),
        ]
    );
    assert_eq!(writes.last(), Some(&(tag("PushMode"), TagValue::Bool(false))));
    assert_eq!(actuator.current_position().unwrap(), 120.0);
}

#[test]
fn test_push_mode_disabled_after_failed_move() {
    let (actuator, handle) = sim_actuator(&fast_config());
    actuator.home(None).unwrap();
    handle.fail_writes(&tag("ST1"), true);

    let result = push_operation(&actuator, 120.0, 50, 40.0);

    assert!(matches!(result, Err(ActuatorError::TransportFailure(_))));
    assert_eq!(actuator.state(), AxisState::Idle);
    assert_eq!(
        handle.writes().last(),
        Some(&(tag("PushMode"), TagValue::Bool(false)))
    );
}

#[test]
fn test_push_arguments_checked_before_writes() {
    let (actuator, handle) = sim_actuator(&fast_config());
    handle.clear_events();

    let cases = [
        (120.0, 19, 40.0),
        (120.0, 71, 40.0),
        (500.0, 50, 40.0),
        (120.0, 50, 1.0),
    ];
    for (position, force, speed) in cases {
        assert!(
            matches!(
                push_operation(&actuator, position, force, speed),
                Err(ActuatorError::InvalidArgument(_))
            ),
            "{position} {force} {speed}"
        );
    }
    assert!(handle.writes().is_empty());
}

// ============================================================================
// Parameter Tests
// ============================================================================

#[test]
fn test_device_parameter_write_validates() {
    let (actuator, handle) = sim_actuator(&fast_config());
    handle.clear_events();

    actuator
        .write_device_parameter(DeviceParameter::HomeDirection, 1.0)
        .unwrap();
    assert!(matches!(
        actuator.write_device_parameter(DeviceParameter::MotionRange, 400.0),
        Err(ActuatorError::InvalidArgument(_))
    ));

    assert_eq!(
        handle.writes(),
        vec![(tag("Parameter3"), TagValue::Int(1))]
    );
    assert_eq!(
        actuator
            .read_device_parameter(DeviceParameter::HomeDirection)
            .unwrap(),
        1.0
    );
}

#[test]
fn test_backup_and_restore_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("params.toml");

    let (source, _) = sim_actuator(&fast_config());
    source
        .write_device_parameter(DeviceParameter::HomeOffset, 12.5)
        .unwrap();
    let backup = backup_parameters(&source, &path).unwrap();
    assert_eq!(backup.parameters.len(), 8);
    assert_eq!(backup.controller_model, "EC-RTC12");

    let saved: ParameterBackup = toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(saved, backup);

    let (target, handle) = sim_actuator(&fast_config());
    handle.clear_events();
    assert_eq!(restore_parameters(&target, &path).unwrap(), 8);
    assert_eq!(handle.writes().len(), 8);
    assert_eq!(
        target
            .read_device_parameter(DeviceParameter::HomeOffset)
            .unwrap(),
        12.5
    );
}

#[test]
fn test_restore_attempts_every_entry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("params.toml");
    std::fs::write(
        &path,
        r#"
controller_model = "EC-RTC9"
backup_time = "2024-05-01T10:00:00Z"

[parameters]
bogus = 1.0
home_offset = 3.0
motion_range = 400.0
power_save = 1.0
"#,
    )
    .unwrap();

    let (actuator, handle) = sim_actuator(&fast_config());
    handle.clear_events();

    let result = restore_parameters(&actuator, &path);

    assert!(matches!(result, Err(ActuatorError::InvalidArgument(_))));
    assert_eq!(
        handle.writes(),
        vec![
            (tag("Parameter4"), TagValue::Real(3.0)),
            (tag("Parameter8"), TagValue::Int(1)),
        ]
    );
}

#[test]
fn test_restore_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let (actuator, _) = sim_actuator(&fast_config());
    assert!(matches!(
        restore_parameters(&actuator, &dir.path().join("absent.toml")),
        Err(ActuatorError::Io(_))
    ));
}

// ============================================================================
// Status Tests
// ============================================================================

#[test]
fn test_snapshot_reflects_controller() {
    let (actuator, handle) = sim_actuator(&fast_config());
    actuator.move_to_position(90.0, None, None, None).unwrap();

    let snapshot = actuator.snapshot().unwrap();
    assert!(snapshot.connection.connected);
    assert_eq!(snapshot.connection.address, "simulated");
    assert_eq!(snapshot.position.current, Some(90.0));
    assert_eq!(snapshot.position.unit, "degree");
    assert!(snapshot.signals["LS1"]);
    assert!(!snapshot.signals["LS0"]);
    assert!(snapshot.motion.home_complete);
    assert_eq!(snapshot.motion.speed, Some(100.0));
    assert!(!snapshot.alarm.active);
    assert_eq!(snapshot.alarm.code, None);
    assert_eq!(snapshot.maintenance.total_moves, None);
    assert!(snapshot.active_alarm().is_none());

    handle.set(tag("ALM"), false);
    handle.set(tag("AlarmCode"), 0xA1u16);
    let snapshot = actuator.snapshot().unwrap();
    assert!(snapshot.alarm.active);
    assert_eq!(snapshot.alarm.code.as_deref(), Some("A1"));
    assert_eq!(snapshot.active_alarm().as_deref(), Some("Overload (A1)"));

    let flat = snapshot.flatten();
    assert!(flat.contains(&(String::from("alarm.code"), String::from("A1"))));
}

#[test]
fn test_snapshot_requires_connection() {
    let (actuator, _) = sim_actuator(&fast_config());
    actuator.disconnect();
    assert_eq!(actuator.snapshot(), Err(ActuatorError::NotConnected));
}

#[test]
fn test_alarm_history_from_configured_tags() {
    let mut config = fast_config();
    config.tags = TagConfig {
        alarm_history: vec![
            String::from("Controller.AlarmHistory0"),
            String::from("Controller.AlarmHistory1"),
            String::from("Controller.AlarmHistory2"),
        ],
        alarm_times: vec![
            String::from("Controller.AlarmTime0"),
            String::from("Controller.AlarmTime1"),
        ],
        total_moves: Some(String::from("Controller.TotalMoves")),
        ..TagConfig::default()
    };
    let (actuator, handle) = sim_actuator(&config);
    handle.set(tag("AlarmHistory0"), 0xC1u16);
    handle.set(tag("AlarmHistory1"), 0u16);
    handle.set(tag("AlarmHistory2"), 0xE2u16);
    handle.set(tag("AlarmTime0"), 1_700_000_000i64);
    handle.set(tag("TotalMoves"), 1234.0);

    let history = actuator.alarm_history().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].index, 0);
    assert_eq!(history[0].description, "Controller error (C1)");
    assert_eq!(history[1].index, 2);
    assert_eq!(history[1].code, "E2");
    assert_eq!(history[0].timestamp.as_deref(), Some("1700000000"));
    // Slot 2 has no timestamp tag
    assert_eq!(history[1].timestamp, None);

    assert_eq!(actuator.snapshot().unwrap().maintenance.total_moves, Some(1234.0));
}

#[test]
fn test_monitor_reports_snapshots() {
    let config = fast_config();
    let (actuator, handle) = sim_actuator(&config);
    let actuator = Arc::new(actuator);
    handle.set(tag("ALM"), false);

    let alarms = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&alarms);
    let mut monitor = StatusMonitor::new(config.timing.monitor_interval);
    monitor
        .start(Arc::clone(&actuator), move |snapshot| {
            sink.lock().unwrap().push(snapshot.alarm.active);
        })
        .unwrap();

    for _ in 0..500 {
        if monitor.snapshots_taken() >= 3 {
            break;
        }
        thread::sleep(Duration::from_millis(2));
    }
    monitor.stop();

    let alarms = alarms.lock().unwrap();
    assert!(alarms.len() >= 3);
    assert!(alarms.iter().all(|active| *active));
}
