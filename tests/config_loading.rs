// tests/config_loading.rs
mod common;
use crate::common::builders::{at, interval, t0};
use crate::common::init_tracing;

use std::error::Error;
use std::fs;
use std::path::PathBuf;

use arraysched::config::{load_and_validate, load_from_path};
use arraysched::engine::ScheduleEngine;
use arraysched::errors::SchedulerError;
use arraysched::task::{Predecessor, TaskPayload};
use arraysched::types::{DataProductType, StoragePolicy, TaskStatus};
use chrono::TimeDelta;
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn Error>>;

const FULL_SCHEDULE: &str = r#"
stations = ["CS001", "CS002"]
campaigns = ["LC1_001"]

[settings]
now = "2030-01-01T00:00:00Z"
min_schedule_gap = "5m"
storage_policy = "maximum-data-type"
undo_limit = 50

[preferences.data_type]
correlated = ["locus002"]

[storage.locus001]
id = 1
[[storage.locus001.partition]]
id = 0
path = "/data"
total_kb = 100000000

[storage.locus002]
id = 2
status = "operational"
[[storage.locus002.partition]]
id = 0
path = "/data"
total_kb = 100000000

[task.target]
type = "observation"
project = "LC1_001"
start = "2030-01-01T10:00:00Z"
duration = "1h"
stations = ["CS001"]
antenna_mode = "HBA_DUAL"
clock = "200MHz"
filter = "HBA_110_190"
bit_mode = "16"

[[task.target.beam]]
subbands = 10
angle1 = 1.2
angle2 = 0.7

[task.target.output.correlated]
files = 2
file_size_kb = 1000
identifications = ["target.uv"]

[task.calibrate]
type = "pipeline"
project = "LC1_001"
pipeline = "preprocessing"
start = "2030-01-01T11:00:00Z"
duration = "30m"
after = [{ task = "target", min_offset = "0s" }]

[task.calibrate.inputs]
correlated = ["target.uv"]

[task.calibrate.output.instrument-model]
files = 1
file_size_kb = 100
"#;

fn write_schedule(contents: &str) -> Result<(TempDir, PathBuf), Box<dyn Error>> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("Schedule.toml");
    fs::write(&path, contents)?;
    Ok((dir, path))
}

fn config_error_for(contents: &str) -> Result<String, Box<dyn Error>> {
    let (_dir, path) = write_schedule(contents)?;
    match load_and_validate(&path) {
        Err(SchedulerError::ConfigError(msg)) => Ok(msg),
        Err(other) => Err(format!("expected a config error, got: {other}").into()),
        Ok(_) => Err("schedule unexpectedly passed validation".into()),
    }
}

#[test]
fn full_schedule_loads() -> TestResult {
    let (_dir, path) = write_schedule(FULL_SCHEDULE)?;
    let cfg = load_and_validate(&path)?;

    assert_eq!(cfg.context.now, t0());
    assert_eq!(cfg.context.min_schedule_gap, TimeDelta::minutes(5));
    assert_eq!(cfg.context.storage_policy, StoragePolicy::MaximumDataType);
    assert_eq!(
        cfg.context.data_type_preferences.get(&DataProductType::Correlated),
        Some(&vec![2])
    );
    assert!(cfg.context.campaigns.contains("LC1_001"));
    assert_eq!(cfg.options.undo_limit, Some(50));
    assert!(cfg.options.retain_redo);
    assert_eq!(cfg.snapshot.nodes().count(), 2);

    let target = cfg.task_id("target").ok_or("target missing")?;
    let calibrate = cfg.task_id("calibrate").ok_or("calibrate missing")?;
    assert_eq!(cfg.task_name(target), Some("target"));

    let calibrate_task = cfg
        .tasks
        .iter()
        .find(|t| t.id == calibrate)
        .ok_or("calibrate task missing")?;
    assert_eq!(calibrate_task.predecessors, vec![Predecessor::local(target)]);
    assert_eq!(calibrate_task.schedule, Some(interval(at(11, 0), 30)));
    assert_eq!(calibrate_task.status, TaskStatus::Unscheduled);
    assert!(matches!(calibrate_task.payload, TaskPayload::Pipeline(_)));
    Ok(())
}

#[test]
fn loaded_schedule_can_be_scheduled() -> TestResult {
    let (_dir, path) = write_schedule(FULL_SCHEDULE)?;
    let cfg = load_and_validate(&path)?;
    let target = cfg.task_id("target").ok_or("target missing")?;
    let calibrate = cfg.task_id("calibrate").ok_or("calibrate missing")?;

    let mut engine = ScheduleEngine::new(cfg.snapshot.clone(), cfg.options);
    engine.load_tasks(cfg.tasks.iter().cloned())?;
    let report = engine.request_bulk_status_change(
        &[target, calibrate],
        TaskStatus::PreScheduled,
        false,
        &cfg.context,
    )?;
    assert_eq!(report.changed, vec![target, calibrate]);
    assert!(report.failed.is_empty());

    // Correlated data follows the data-type preference.
    let task = engine.task(target).ok_or("target missing")?;
    let locations = task
        .locations
        .get(&DataProductType::Correlated)
        .ok_or("no correlated locations")?;
    assert!(locations.iter().all(|l| l.node == 2));
    Ok(())
}

#[test]
fn raw_loading_keeps_unchecked_values() -> TestResult {
    let (_dir, path) = write_schedule(
        r#"
stations = ["CS001"]

[settings]
node_bandwidth_kbps = 0.0

[task.a]
type = "observation"
"#,
    )?;
    let raw = load_from_path(&path)?;
    assert_eq!(raw.settings.node_bandwidth_kbps, 0.0);
    assert_eq!(raw.settings.min_schedule_gap, "3m");
    assert_eq!(raw.task.len(), 1);
    Ok(())
}

#[test]
fn unknown_predecessor_is_rejected() -> TestResult {
    let msg = config_error_for(
        r#"
stations = ["CS001"]

[task.a]
type = "observation"
after = ["ghost"]
"#,
    )?;
    assert!(msg.contains("unknown predecessor 'ghost'"), "{msg}");
    Ok(())
}

#[test]
fn predecessor_cycle_is_rejected() -> TestResult {
    let (_dir, path) = write_schedule(
        r#"
stations = ["CS001"]

[task.a]
type = "observation"
after = ["b"]

[task.b]
type = "observation"
after = ["a"]
"#,
    )?;
    let err = load_and_validate(&path).unwrap_err();
    assert!(matches!(err, SchedulerError::PredecessorCycle(_)));
    Ok(())
}

#[test]
fn duplicate_partition_is_rejected() -> TestResult {
    let msg = config_error_for(
        r#"
stations = ["CS001"]

[storage.locus001]
id = 1
[[storage.locus001.partition]]
id = 0
total_kb = 100
[[storage.locus001.partition]]
id = 0
total_kb = 200

[task.a]
type = "observation"
"#,
    )?;
    assert!(msg.contains("partition 0 twice"), "{msg}");
    Ok(())
}

#[test]
fn preference_for_unknown_node_is_rejected() -> TestResult {
    let msg = config_error_for(
        r#"
stations = ["CS001"]

[preferences.project]
LC1_001 = ["nowhere"]

[task.a]
type = "observation"
"#,
    )?;
    assert!(msg.contains("unknown storage node 'nowhere'"), "{msg}");
    Ok(())
}

#[test]
fn schedule_needs_stations_and_tasks() -> TestResult {
    let msg = config_error_for(
        r#"
[task.a]
type = "observation"
"#,
    )?;
    assert!(msg.contains("at least one station"), "{msg}");

    let msg = config_error_for(r#"stations = ["CS001"]"#)?;
    assert!(msg.contains("at least one [task.<name>]"), "{msg}");
    Ok(())
}

#[test]
fn settings_are_sanity_checked() -> TestResult {
    let msg = config_error_for(
        r#"
stations = ["CS001"]

[settings]
node_bandwidth_kbps = 0.0

[task.a]
type = "observation"
"#,
    )?;
    assert!(msg.contains("node_bandwidth_kbps"), "{msg}");

    let msg = config_error_for(
        r#"
stations = ["CS001"]

[settings]
min_schedule_gap = "soon"

[task.a]
type = "observation"
"#,
    )?;
    assert!(msg.contains("invalid duration 'soon'"), "{msg}");
    Ok(())
}

#[test]
fn oversized_durations_are_config_errors() -> TestResult {
    let msg = config_error_for(
        r#"
stations = ["CS001"]

[task.a]
type = "observation"
duration = "999999999999999d"
"#,
    )?;
    assert!(msg.contains("invalid duration '999999999999999d'"), "{msg}");

    let msg = config_error_for(
        r#"
stations = ["CS001"]

[task.a]
type = "observation"
start = "2030-01-01T10:00:00Z"
duration = "9999999999999s"
"#,
    )?;
    assert!(msg.contains("end time out of range"), "{msg}");
    Ok(())
}

#[test]
fn reservation_must_name_a_reservation() -> TestResult {
    let msg = config_error_for(
        r#"
stations = ["CS001"]

[task.a]
type = "observation"
reservation = "b"

[task.b]
type = "maintenance"
"#,
    )?;
    assert!(msg.contains("not a reservation"), "{msg}");
    Ok(())
}

#[test]
fn pipeline_needs_a_kind() -> TestResult {
    let msg = config_error_for(
        r#"
stations = ["CS001"]

[task.p]
type = "pipeline"
"#,
    )?;
    assert!(msg.contains("needs a `pipeline` kind"), "{msg}");
    Ok(())
}

#[test]
fn malformed_toml_and_missing_file_are_reported() -> TestResult {
    let (dir, path) = write_schedule("stations = [")?;
    assert!(matches!(
        load_and_validate(&path),
        Err(SchedulerError::TomlError(_))
    ));

    let missing = dir.path().join("absent.toml");
    assert!(matches!(
        load_and_validate(&missing),
        Err(SchedulerError::IoError(_))
    ));
    Ok(())
}
