#![allow(dead_code)]

pub use arraysched_test_utils::builders;
pub use arraysched_test_utils::init_tracing;

use arraysched::engine::{EngineOptions, ScheduleEngine};
use arraysched::storage::StorageSnapshot;
use arraysched::task::{Task, TaskId};

use self::builders::SnapshotBuilder;

/// Three nodes with one roomy partition each.
pub fn roomy_snapshot() -> StorageSnapshot {
    SnapshotBuilder::new()
        .node(1, &[10_000_000])
        .node(2, &[10_000_000])
        .node(3, &[10_000_000])
        .build()
}

pub fn engine_with(snapshot: StorageSnapshot) -> ScheduleEngine {
    init_tracing();
    ScheduleEngine::new(snapshot, EngineOptions::default())
}

pub fn engine() -> ScheduleEngine {
    engine_with(roomy_snapshot())
}

/// Add every task, returning their ids in order.
pub fn add_all(engine: &mut ScheduleEngine, tasks: impl IntoIterator<Item = Task>) -> Vec<TaskId> {
    tasks
        .into_iter()
        .map(|t| engine.add_task(t).expect("add task"))
        .collect()
}
