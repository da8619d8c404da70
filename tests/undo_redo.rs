// tests/undo_redo.rs
mod common;
use crate::common::builders::{ObservationBuilder, at, context};
use crate::common::{add_all, engine, init_tracing, roomy_snapshot};

use std::error::Error;

use arraysched::engine::{EngineOptions, ScheduleEngine, UndoDirection};
use arraysched::types::TaskStatus;

type TestResult = Result<(), Box<dyn Error>>;

fn engine_with_options(options: EngineOptions) -> ScheduleEngine {
    init_tracing();
    ScheduleEngine::new(roomy_snapshot(), options)
}

#[test]
fn undo_then_redo_reproduces_the_schedule() -> TestResult {
    let ctx = context();
    let mut engine = engine();
    let id = engine.add_task(ObservationBuilder::new("obs").at(at(10, 0), 60).build())?;
    engine.request_status_change(id, TaskStatus::PreScheduled, false, &ctx)?;
    let scheduled = engine.schedule_state();

    let undone = engine.undo().ok_or("nothing to undo")?;
    assert_eq!(undone.direction, UndoDirection::Undo);
    assert_eq!(undone.tasks, vec![id]);
    assert!(!undone.noop);
    assert_eq!(engine.task(id).map(|t| t.status), Some(TaskStatus::Unscheduled));
    assert!(!engine.claims().holds(id));
    assert!(engine.can_redo());

    engine.redo().ok_or("nothing to redo")?;
    assert_eq!(engine.schedule_state(), scheduled);
    assert!(engine.claims().holds(id));
    assert!(!engine.can_redo());
    Ok(())
}

#[test]
fn undoing_a_creation_removes_the_task() -> TestResult {
    let mut engine = engine();
    let id = engine.add_task(ObservationBuilder::new("obs").build())?;

    engine.undo().ok_or("nothing to undo")?;
    assert!(engine.task(id).is_none());
    assert!(!engine.can_undo());
    assert!(engine.undo().is_none());
    Ok(())
}

#[test]
fn new_edit_clears_redo() -> TestResult {
    let mut engine = engine();
    engine.add_task(ObservationBuilder::new("first").build())?;
    engine.undo();
    assert!(engine.can_redo());

    engine.add_task(ObservationBuilder::new("second").build())?;
    assert!(!engine.can_redo());
    Ok(())
}

#[test]
fn deleting_then_undoing_restores_allocations() -> TestResult {
    let ctx = context();
    let mut engine = engine();
    let id = engine.add_task(ObservationBuilder::new("obs").at(at(10, 0), 60).build())?;
    engine.request_status_change(id, TaskStatus::PreScheduled, false, &ctx)?;
    let claims = engine.claims().clone();

    engine.request_delete(&[id])?;
    assert!(engine.task(id).is_none());
    assert_eq!(engine.deleted_tasks().count(), 1);
    assert!(engine.claims().is_empty());

    engine.undo().ok_or("nothing to undo")?;
    let task = engine.task(id).ok_or("task not restored")?;
    assert_eq!(task.status, TaskStatus::PreScheduled);
    assert!(task.has_complete_storage());
    assert_eq!(engine.claims(), &claims);
    assert_eq!(engine.deleted_tasks().count(), 0);

    // Redo deletes it again.
    engine.redo().ok_or("nothing to redo")?;
    assert!(engine.task(id).is_none());
    assert!(engine.claims().is_empty());
    Ok(())
}

#[test]
fn bulk_change_is_one_entry() -> TestResult {
    let ctx = context();
    let mut engine = engine();
    let ids = add_all(
        &mut engine,
        ["CS001", "CS002", "CS003"].into_iter().map(|station| {
            ObservationBuilder::new(station)
                .stations(&[station])
                .at(at(10, 0), 60)
                .build()
        }),
    );
    let entries = engine.undo_log().undo_len();

    engine.request_bulk_status_change(&ids, TaskStatus::PreScheduled, false, &ctx)?;
    assert_eq!(engine.undo_log().undo_len(), entries + 1);
    let scheduled = engine.schedule_state();
    let claims = engine.claims().clone();

    let undone = engine.undo().ok_or("nothing to undo")?;
    assert_eq!(undone.description, "schedule change");
    for id in &ids {
        assert_eq!(engine.task(*id).map(|t| t.status), Some(TaskStatus::Unscheduled));
    }
    assert!(engine.claims().is_empty());

    engine.redo().ok_or("nothing to redo")?;
    assert_eq!(engine.schedule_state(), scheduled);
    assert_eq!(engine.claims(), &claims);
    assert_eq!(engine.undo_log().undo_len(), entries + 1);
    Ok(())
}

#[test]
fn bulk_delete_redoes_exactly() -> TestResult {
    let ctx = context();
    let mut engine = engine();
    let ids = add_all(
        &mut engine,
        ["CS001", "CS002", "CS003"].into_iter().map(|station| {
            ObservationBuilder::new(station)
                .stations(&[station])
                .at(at(10, 0), 60)
                .build()
        }),
    );
    engine.request_bulk_status_change(&ids[..2], TaskStatus::PreScheduled, false, &ctx)?;
    let before = engine.schedule_state();
    let claims = engine.claims().clone();

    engine.request_delete(&ids)?;
    let deleted = engine.schedule_state();
    assert_eq!(engine.deleted_tasks().count(), 3);
    assert!(engine.claims().is_empty());

    engine.undo().ok_or("nothing to undo")?;
    assert_eq!(engine.schedule_state(), before);
    assert_eq!(engine.claims(), &claims);

    engine.redo().ok_or("nothing to redo")?;
    assert_eq!(engine.schedule_state(), deleted);
    assert!(engine.claims().is_empty());

    // And back once more.
    engine.undo().ok_or("nothing to undo")?;
    assert_eq!(engine.schedule_state(), before);
    Ok(())
}

#[test]
fn reported_task_is_left_alone_by_undo() -> TestResult {
    let ctx = context();
    let mut engine = engine();
    let ids = add_all(
        &mut engine,
        [
            ObservationBuilder::new("reported")
                .stations(&["CS001"])
                .at(at(10, 0), 60)
                .build(),
            ObservationBuilder::new("other")
                .stations(&["CS002"])
                .at(at(10, 0), 60)
                .build(),
        ],
    );
    engine.request_bulk_status_change(&ids, TaskStatus::PreScheduled, false, &ctx)?;
    engine.request_bulk_status_change(&ids, TaskStatus::Scheduled, false, &ctx)?;

    engine.apply_status_report(ids[0], TaskStatus::Starting, None)?;

    engine.undo().ok_or("nothing to undo")?;
    assert_eq!(engine.task(ids[0]).map(|t| t.status), Some(TaskStatus::Starting));
    assert_eq!(engine.task(ids[1]).map(|t| t.status), Some(TaskStatus::PreScheduled));
    assert!(engine.claims().holds(ids[0]));
    Ok(())
}

#[test]
fn status_report_drops_single_task_entries() -> TestResult {
    let ctx = context();
    let mut engine = engine();
    let id = engine.add_task(ObservationBuilder::new("obs").at(at(10, 0), 60).build())?;
    engine.request_status_change(id, TaskStatus::PreScheduled, false, &ctx)?;
    engine.request_status_change(id, TaskStatus::Scheduled, false, &ctx)?;
    assert_eq!(engine.undo_log().undo_len(), 3);

    engine.apply_status_report(id, TaskStatus::Starting, None)?;
    assert!(!engine.can_undo());
    Ok(())
}

#[test]
fn redo_of_a_reported_task_has_no_effect() -> TestResult {
    let mut engine = engine();
    let id = engine.add_task(ObservationBuilder::new("obs").build())?;
    engine.request_delete(&[id])?;
    engine.undo().ok_or("nothing to undo")?;

    engine.apply_status_report(id, TaskStatus::Obsolete, None)?;
    let redone = engine.redo().ok_or("nothing to redo")?;
    assert!(redone.noop);
    assert!(redone.to_string().ends_with("(no effect)"));
    assert_eq!(engine.task(id).map(|t| t.status), Some(TaskStatus::Obsolete));
    Ok(())
}

#[test]
fn purged_tasks_drop_out_of_history() -> TestResult {
    let ctx = context();
    let mut engine = engine();
    let ids = add_all(
        &mut engine,
        [
            ObservationBuilder::new("gone")
                .stations(&["CS001"])
                .at(at(10, 0), 60)
                .build(),
            ObservationBuilder::new("kept")
                .stations(&["CS002"])
                .at(at(10, 0), 60)
                .build(),
        ],
    );
    engine.request_bulk_status_change(&ids, TaskStatus::PreScheduled, false, &ctx)?;
    engine.request_delete(&[ids[0]])?;

    assert_eq!(engine.purge_deleted(), vec![ids[0]]);
    // Creation of "kept" and the bulk change remain.
    assert_eq!(engine.undo_log().undo_len(), 2);

    engine.undo().ok_or("nothing to undo")?;
    assert!(engine.task(ids[0]).is_none());
    assert_eq!(engine.deleted_tasks().count(), 0);
    assert_eq!(engine.task(ids[1]).map(|t| t.status), Some(TaskStatus::Unscheduled));
    Ok(())
}

#[test]
fn undo_depth_is_limited() -> TestResult {
    let mut engine = engine_with_options(EngineOptions {
        undo_limit: Some(2),
        retain_redo: true,
    });
    for name in ["a", "b", "c"] {
        engine.add_task(ObservationBuilder::new(name).build())?;
    }
    assert_eq!(engine.undo_log().undo_len(), 2);

    engine.undo();
    engine.undo();
    assert!(engine.undo().is_none());
    assert_eq!(engine.tasks().count(), 1);
    Ok(())
}

#[test]
fn redo_can_be_disabled() -> TestResult {
    let mut engine = engine_with_options(EngineOptions {
        undo_limit: None,
        retain_redo: false,
    });
    engine.add_task(ObservationBuilder::new("obs").build())?;
    engine.undo().ok_or("nothing to undo")?;
    assert!(!engine.undo_log().retains_redo());
    assert!(!engine.can_redo());
    assert!(engine.redo().is_none());
    Ok(())
}
