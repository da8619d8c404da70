// tests/conflict_detection.rs
mod common;
use crate::common::builders::{ObservationBuilder, at, context, interval, reservation};
use crate::common::{add_all, engine};

use std::error::Error;

use arraysched::conflict::station_conflicts;
use arraysched::errors::SchedulerError;
use arraysched::storage::AllocationFailure;
use arraysched::task::{Conflict, Task};
use arraysched::types::{DataProductType, TaskStatus};
use arraysched::validation::{ValidationKind, ValidationResult};

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn touching_intervals_do_not_conflict() -> TestResult {
    let ctx = context();
    let mut engine = engine();
    let ids = add_all(
        &mut engine,
        [
            ObservationBuilder::new("first").at(at(10, 0), 60).build(),
            ObservationBuilder::new("second").at(at(11, 0), 60).build(),
        ],
    );

    engine.request_status_change(ids[0], TaskStatus::PreScheduled, false, &ctx)?;
    engine.request_status_change(ids[1], TaskStatus::PreScheduled, false, &ctx)?;

    assert_eq!(engine.task(ids[1]).map(|t| t.status), Some(TaskStatus::PreScheduled));
    assert!(engine.conflicts().is_empty());
    Ok(())
}

#[test]
fn overlapping_interval_on_shared_station_is_refused() -> TestResult {
    let ctx = context();
    let mut engine = engine();
    let ids = add_all(
        &mut engine,
        [
            ObservationBuilder::new("first")
                .stations(&["CS001", "CS002"])
                .at(at(10, 0), 60)
                .build(),
            ObservationBuilder::new("second")
                .stations(&["CS002", "CS003"])
                .at(at(10, 30), 60)
                .build(),
        ],
    );
    engine.request_status_change(ids[0], TaskStatus::PreScheduled, false, &ctx)?;

    let err = engine
        .request_status_change(ids[1], TaskStatus::PreScheduled, false, &ctx)
        .unwrap_err();
    match err {
        SchedulerError::Validation {
            task,
            result: ValidationResult::Conflict { kind, .. },
        } => {
            assert_eq!(task, ids[1]);
            assert_eq!(kind, ValidationKind::StationOverlap);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(engine.task(ids[1]).map(|t| t.status), Some(TaskStatus::Unscheduled));
    Ok(())
}

#[test]
fn disjoint_stations_may_overlap_in_time() -> TestResult {
    let ctx = context();
    let mut engine = engine();
    let ids = add_all(
        &mut engine,
        [
            ObservationBuilder::new("core")
                .stations(&["CS001"])
                .at(at(10, 0), 60)
                .build(),
            ObservationBuilder::new("remote")
                .stations(&["RS106"])
                .at(at(10, 0), 60)
                .build(),
        ],
    );
    for id in &ids {
        engine.request_status_change(*id, TaskStatus::PreScheduled, false, &ctx)?;
    }

    let busy = engine.tasks_overlapping(&"CS001".to_string(), &interval(at(10, 30), 10));
    assert_eq!(busy.len(), 1);
    assert_eq!(busy[0].id, ids[0]);
    Ok(())
}

#[test]
fn unscheduled_tasks_do_not_block_stations() -> TestResult {
    let mut engine = engine();
    let ids = add_all(
        &mut engine,
        [
            ObservationBuilder::new("idle").at(at(10, 0), 60).build(),
            ObservationBuilder::new("probe").at(at(10, 0), 60).build(),
        ],
    );

    let probe = engine.task(ids[1]).cloned().ok_or("probe missing")?;
    let iv = probe.schedule.ok_or("probe has no schedule")?;
    assert!(station_conflicts(engine.registry(), &probe, &iv, &[]).is_empty());
    Ok(())
}

#[test]
fn task_may_share_stations_with_its_own_reservation() -> TestResult {
    let ctx = context();
    let mut engine = engine();
    let res = engine.add_task(reservation("block", &["CS001", "CS002"], at(9, 0), 240))?;
    engine.request_status_change(res, TaskStatus::PreScheduled, false, &ctx)?;

    let inside = engine.add_task(
        ObservationBuilder::new("inside")
            .stations(&["CS001"])
            .at(at(10, 0), 60)
            .reservation(res)
            .build(),
    )?;
    engine.request_status_change(inside, TaskStatus::PreScheduled, false, &ctx)?;

    let outsider = engine.add_task(
        ObservationBuilder::new("outsider")
            .stations(&["CS002"])
            .at(at(11, 0), 60)
            .build(),
    )?;
    let err = engine
        .request_status_change(outsider, TaskStatus::PreScheduled, false, &ctx)
        .unwrap_err();
    assert_eq!(
        err.validation().and_then(|r| r.kind()),
        Some(ValidationKind::StationOverlap)
    );
    Ok(())
}

#[test]
fn task_outside_its_reservation_is_refused() -> TestResult {
    let ctx = context();
    let mut engine = engine();
    let res = engine.add_task(reservation("block", &["CS001"], at(9, 0), 60))?;
    engine.request_status_change(res, TaskStatus::PreScheduled, false, &ctx)?;

    let late = engine.add_task(
        ObservationBuilder::new("late")
            .stations(&["CS001"])
            .at(at(9, 30), 60)
            .reservation(res)
            .build(),
    )?;
    let err = engine
        .request_status_change(late, TaskStatus::PreScheduled, false, &ctx)
        .unwrap_err();
    assert_eq!(
        err.validation().and_then(|r| r.kind()),
        Some(ValidationKind::ReservationMismatch)
    );
    Ok(())
}

#[test]
fn recorded_conflicts_survive_serialization() -> TestResult {
    let mut task = ObservationBuilder::new("flagged").at(at(10, 0), 60).build();
    task.conflicts.insert(Conflict::Validation {
        kind: ValidationKind::StationOverlap,
    });
    task.conflicts.insert(Conflict::Storage {
        product: DataProductType::Correlated,
        failure: AllocationFailure::TooFewNodes,
    });
    task.conflicts.insert(Conflict::OutOfDataslots {
        station: "CS001".to_string(),
    });

    let json = serde_json::to_string(&task)?;
    assert!(json.contains(r#""conflict":"validation""#), "{json}");
    let back: Task = serde_json::from_str(&json)?;
    assert_eq!(back.conflicts, task.conflicts);
    Ok(())
}
