// tests/storage_allocation.rs
mod common;
use crate::common::builders::{ContextBuilder, ObservationBuilder, SnapshotBuilder, at, context};
use crate::common::{add_all, engine_with, roomy_snapshot};

use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;

use arraysched::engine::AllocationScope;
use arraysched::errors::SchedulerError;
use arraysched::storage::{AllocationFailure, ClaimLedger, NodeId, allocate, commit_or_rollback};
use arraysched::task::{Conflict, ProductRequirement, Task, TaskId};
use arraysched::types::{DataProductType, StoragePolicy, TaskStatus};

type TestResult = Result<(), Box<dyn Error>>;

fn files_per_node(task: &Task, product: DataProductType) -> BTreeMap<NodeId, u32> {
    let mut out = BTreeMap::new();
    for loc in task.locations.get(&product).into_iter().flatten() {
        *out.entry(loc.node).or_insert(0) += loc.files;
    }
    out
}

fn nodes_of(task: &Task) -> BTreeSet<NodeId> {
    task.locations.values().flatten().map(|l| l.node).collect()
}

#[test]
fn minimum_policy_fills_smallest_nodes_first() -> TestResult {
    let snapshot = SnapshotBuilder::new()
        .node(1, &[100])
        .node(2, &[50])
        .node(3, &[10])
        .build();
    let ctx = ContextBuilder::new()
        .policy(StoragePolicy::MinimumDataType)
        .build();
    let task = ObservationBuilder::new("obs")
        .id(1)
        .output(DataProductType::Correlated, 120, 1)
        .at(at(10, 0), 60)
        .build();

    let plan = allocate(&[&task], &snapshot, &ClaimLedger::new(), &ctx);
    assert!(plan.is_complete());
    let mut placed = task.clone();
    placed.locations = plan.locations.get(&TaskId(1)).cloned().ok_or("no locations")?;

    let expected: BTreeMap<NodeId, u32> = [(1, 60), (2, 50), (3, 10)].into_iter().collect();
    assert_eq!(files_per_node(&placed, DataProductType::Correlated), expected);
    Ok(())
}

#[test]
fn maximum_policy_stays_on_preferred_nodes() -> TestResult {
    let ctx = ContextBuilder::new()
        .policy(StoragePolicy::MaximumDataType)
        .prefer_for_type(DataProductType::Correlated, &[2])
        .build();
    let mut engine = engine_with(
        SnapshotBuilder::new()
            .node(1, &[1_000])
            .node(2, &[1_000])
            .node(3, &[1_000])
            .build(),
    );
    let id = engine.add_task(
        ObservationBuilder::new("obs")
            .output(DataProductType::Correlated, 10, 10)
            .at(at(10, 0), 60)
            .build(),
    )?;

    engine.request_status_change(id, TaskStatus::PreScheduled, false, &ctx)?;
    let task = engine.task(id).ok_or("task missing")?;
    let expected: BTreeMap<NodeId, u32> = [(2, 10)].into_iter().collect();
    assert_eq!(files_per_node(task, DataProductType::Correlated), expected);
    Ok(())
}

#[test]
fn group_members_share_one_node_list() -> TestResult {
    let ctx = context();
    let mut engine = engine_with(
        SnapshotBuilder::new()
            .node(1, &[1_000])
            .node(2, &[1_000])
            .node(3, &[1_000])
            .build(),
    );
    let ids = add_all(
        &mut engine,
        ["CS001", "CS002", "CS003"].into_iter().map(|station| {
            ObservationBuilder::new(station)
                .stations(&[station])
                .output(DataProductType::Correlated, 4, 10)
                .group(7)
                .at(at(10, 0), 60)
                .build()
        }),
    );

    let report = engine.request_bulk_status_change(&ids[..2], TaskStatus::PreScheduled, false, &ctx)?;
    assert_eq!(report.changed.len(), 2);
    let first = nodes_of(engine.task(ids[0]).ok_or("first missing")?);
    let second = nodes_of(engine.task(ids[1]).ok_or("second missing")?);
    assert!(!first.is_empty());
    assert_eq!(first, second);

    // A member joining later is held to the list already in use.
    engine.request_status_change(ids[2], TaskStatus::PreScheduled, false, &ctx)?;
    let third = nodes_of(engine.task(ids[2]).ok_or("third missing")?);
    assert_eq!(third, first);
    Ok(())
}

#[test]
fn group_avoids_nodes_one_member_cannot_share() -> TestResult {
    let ctx = ContextBuilder::new()
        .policy(StoragePolicy::MinimumDataType)
        .build();
    // Node 1 holds a single 10 kB file, so only one member could use it.
    let mut engine = engine_with(
        SnapshotBuilder::new()
            .node(1, &[15])
            .node(2, &[50])
            .node(3, &[50])
            .build(),
    );
    let ids = add_all(
        &mut engine,
        ["CS001", "CS002"].into_iter().map(|station| {
            ObservationBuilder::new(station)
                .stations(&[station])
                .output(DataProductType::Correlated, 2, 10)
                .group(7)
                .at(at(10, 0), 60)
                .build()
        }),
    );

    let report = engine.request_bulk_status_change(&ids, TaskStatus::PreScheduled, false, &ctx)?;
    assert!(report.failed.is_empty(), "{:?}", report.failed);
    let first = engine.task(ids[0]).ok_or("first missing")?;
    let second = engine.task(ids[1]).ok_or("second missing")?;
    let expected: BTreeSet<NodeId> = [2].into_iter().collect();
    assert_eq!(nodes_of(first), expected);
    assert_eq!(nodes_of(second), expected);
    assert_eq!(engine.claims().claimed_kb(2, 0), 40);
    Ok(())
}

#[test]
fn group_fails_as_a_whole_when_no_shared_placement_exists() -> TestResult {
    let ctx = context();
    let snapshot = SnapshotBuilder::new().node(1, &[15]).node(2, &[15]).build();
    let first = ObservationBuilder::new("first")
        .id(1)
        .stations(&["CS001"])
        .output(DataProductType::Correlated, 1, 10)
        .group(3)
        .at(at(10, 0), 60)
        .build();
    let second = ObservationBuilder::new("second")
        .id(2)
        .stations(&["CS002"])
        .output(DataProductType::Correlated, 1, 10)
        .group(3)
        .at(at(10, 0), 60)
        .build();

    let plan = allocate(&[&first, &second], &snapshot, &ClaimLedger::new(), &ctx);
    assert!(plan.claims.is_empty());
    let failed: BTreeSet<TaskId> = plan.failures.iter().map(|f| f.task).collect();
    assert_eq!(failed, [TaskId(1), TaskId(2)].into_iter().collect());
    Ok(())
}

#[test]
fn maximum_policy_fills_preferred_node_before_extra_ones() -> TestResult {
    let snapshot = SnapshotBuilder::new()
        .node(1, &[100])
        .node(2, &[100])
        .node(3, &[100])
        .build();
    let ctx = ContextBuilder::new()
        .policy(StoragePolicy::MaximumDataType)
        .prefer_for_type(DataProductType::Correlated, &[1])
        .build();
    let task = ObservationBuilder::new("obs")
        .id(1)
        .output(DataProductType::Correlated, 12, 10)
        .at(at(10, 0), 60)
        .build();

    let plan = allocate(&[&task], &snapshot, &ClaimLedger::new(), &ctx);
    assert!(plan.is_complete());
    let mut placed = task.clone();
    placed.locations = plan.locations.get(&TaskId(1)).cloned().ok_or("no locations")?;

    let expected: BTreeMap<NodeId, u32> = [(1, 10), (2, 2)].into_iter().collect();
    assert_eq!(files_per_node(&placed, DataProductType::Correlated), expected);
    Ok(())
}

#[test]
fn minimum_policy_packs_but_keeps_the_node_minimum() -> TestResult {
    let snapshot = SnapshotBuilder::new()
        .node(1, &[100])
        .node(2, &[50])
        .node(3, &[10])
        .build();
    let ctx = ContextBuilder::new()
        .policy(StoragePolicy::MinimumDataType)
        .build();
    let task = ObservationBuilder::new("obs")
        .id(1)
        .output(DataProductType::Correlated, 8, 1)
        .min_nodes(2)
        .at(at(10, 0), 60)
        .build();

    let plan = allocate(&[&task], &snapshot, &ClaimLedger::new(), &ctx);
    assert!(plan.is_complete());
    let mut placed = task.clone();
    placed.locations = plan.locations.get(&TaskId(1)).cloned().ok_or("no locations")?;

    // All eight would fit on node 3 alone.
    let expected: BTreeMap<NodeId, u32> = [(2, 1), (3, 7)].into_iter().collect();
    assert_eq!(files_per_node(&placed, DataProductType::Correlated), expected);
    Ok(())
}

#[test]
fn group_members_must_agree_on_policy() -> TestResult {
    let ctx = context();
    let mut engine = engine_with(roomy_snapshot());
    let ids = add_all(
        &mut engine,
        [
            ObservationBuilder::new("lead")
                .stations(&["CS001"])
                .policy(StoragePolicy::MaximumProject)
                .group(9)
                .at(at(10, 0), 60)
                .build(),
            ObservationBuilder::new("member")
                .stations(&["CS002"])
                .group(9)
                .at(at(10, 0), 60)
                .build(),
        ],
    );
    engine.request_status_change(ids[0], TaskStatus::PreScheduled, false, &ctx)?;

    let err = engine
        .request_status_change(ids[1], TaskStatus::PreScheduled, false, &ctx)
        .unwrap_err();
    assert!(matches!(err, SchedulerError::GroupInconsistent { group: 9, .. }));
    assert!(err.is_structural());
    assert_eq!(engine.task(ids[1]).map(|t| t.status), Some(TaskStatus::Unscheduled));
    Ok(())
}

#[test]
fn manual_locations_are_spread_round_robin() -> TestResult {
    let ctx = context();
    let mut engine = engine_with(roomy_snapshot());
    let id = engine.add_task(
        ObservationBuilder::new("manual")
            .output(DataProductType::Correlated, 4, 10)
            .manual(&[(1, 0), (3, 0)])
            .at(at(10, 0), 60)
            .build(),
    )?;

    engine.request_status_change(id, TaskStatus::PreScheduled, false, &ctx)?;
    let task = engine.task(id).ok_or("task missing")?;
    let expected: BTreeMap<NodeId, u32> = [(1, 2), (3, 2)].into_iter().collect();
    assert_eq!(files_per_node(task, DataProductType::Correlated), expected);
    Ok(())
}

#[test]
fn manual_locations_must_span_enough_nodes() -> TestResult {
    let ctx = context();
    let mut engine = engine_with(roomy_snapshot());
    let id = engine.add_task(
        ObservationBuilder::new("manual")
            .output(DataProductType::Correlated, 4, 10)
            .min_nodes(2)
            .manual(&[(1, 0)])
            .at(at(10, 0), 60)
            .build(),
    )?;

    let err = engine
        .request_status_change(id, TaskStatus::PreScheduled, false, &ctx)
        .unwrap_err();
    match err {
        SchedulerError::Allocation { task, failures } => {
            assert_eq!(task, id);
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].failure, AllocationFailure::MinimumNodesNotMet);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(engine.claims().is_empty());
    Ok(())
}

#[test]
fn empty_snapshot_reports_no_data() -> TestResult {
    let ctx = context();
    let mut engine = engine_with(SnapshotBuilder::new().build());
    let id = engine.add_task(ObservationBuilder::new("obs").at(at(10, 0), 60).build())?;

    let err = engine
        .request_status_change(id, TaskStatus::PreScheduled, false, &ctx)
        .unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::Allocation { ref failures, .. }
            if failures.iter().all(|f| f.failure == AllocationFailure::NoData)
    ));
    Ok(())
}

#[test]
fn single_file_over_node_bandwidth_is_refused() {
    let snapshot = roomy_snapshot();
    // 1000 kB over one hour is about 0.28 kB/s per file.
    let ctx = ContextBuilder::new().bandwidth(0.1).build();
    let task = ObservationBuilder::new("fast").id(1).at(at(10, 0), 60).build();

    let plan = allocate(&[&task], &snapshot, &ClaimLedger::new(), &ctx);
    assert_eq!(plan.failures.len(), 1);
    assert_eq!(
        plan.failures[0].failure,
        AllocationFailure::SingleFileBandwidthTooHigh
    );
}

#[test]
fn failing_product_rolls_back_the_whole_task() -> TestResult {
    let snapshot = SnapshotBuilder::new().node(1, &[10_000]).build();
    let ctx = context();
    let mut task = ObservationBuilder::new("split")
        .id(1)
        .output(DataProductType::Correlated, 2, 100)
        .at(at(10, 0), 60)
        .build();
    task.storage.insert(
        DataProductType::IncoherentStokes,
        ProductRequirement {
            identifications: vec!["split.is".to_string()],
            file_count: 1,
            file_size_kb: 1_000_000,
            min_nodes: 0,
            manual_locations: Vec::new(),
        },
    );

    let mut ledger = ClaimLedger::new();
    let plan = allocate(&[&task], &snapshot, &ledger, &ctx);
    assert!(!plan.is_complete());
    let failures = commit_or_rollback(&mut ledger, plan).unwrap_err();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].product, DataProductType::IncoherentStokes);
    assert!(ledger.is_empty());

    let mut engine = engine_with(snapshot);
    let id = engine.add_task(task)?;
    assert!(engine
        .request_status_change(id, TaskStatus::PreScheduled, false, &ctx)
        .is_err());
    assert!(engine.claims().is_empty());
    assert!(engine.task(id).is_some_and(|t| t.locations.is_empty()));
    Ok(())
}

#[test]
fn claims_reduce_capacity_for_later_tasks() -> TestResult {
    let ctx = context();
    let mut engine = engine_with(SnapshotBuilder::new().node(1, &[1_500]).build());
    let ids = add_all(
        &mut engine,
        [
            ObservationBuilder::new("first")
                .stations(&["CS001"])
                .at(at(10, 0), 60)
                .build(),
            ObservationBuilder::new("second")
                .stations(&["CS002"])
                .at(at(10, 0), 60)
                .build(),
        ],
    );

    engine.request_status_change(ids[0], TaskStatus::PreScheduled, false, &ctx)?;
    let err = engine
        .request_status_change(ids[1], TaskStatus::PreScheduled, false, &ctx)
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Allocation { .. }));

    // Releasing the first task frees the space again.
    engine.request_status_change(ids[0], TaskStatus::Unscheduled, false, &ctx)?;
    engine.request_status_change(ids[1], TaskStatus::PreScheduled, false, &ctx)?;
    assert!(engine.claims().holds(ids[1]));
    Ok(())
}

#[test]
fn resource_pass_allocates_loaded_tasks_once() -> TestResult {
    let ctx = context();
    let mut engine = engine_with(roomy_snapshot());
    engine.load_tasks([ObservationBuilder::new("loaded")
        .id(1)
        .status(TaskStatus::PreScheduled)
        .at(at(10, 0), 60)
        .build()])?;

    let first = engine.assign_resources(AllocationScope::AllScheduled, true, &ctx)?;
    assert_eq!(first.allocated, vec![TaskId(1)]);
    assert!(first.is_clean());
    assert!(engine.claims().holds(TaskId(1)));

    let second = engine.assign_resources(AllocationScope::AllScheduled, false, &ctx)?;
    assert!(second.allocated.is_empty());
    assert_eq!(second.unchanged, vec![TaskId(1)]);
    Ok(())
}

#[test]
fn resource_pass_forces_conflict_when_storage_is_short() -> TestResult {
    let ctx = context();
    let mut engine = engine_with(SnapshotBuilder::new().node(1, &[10]).build());
    engine.load_tasks([ObservationBuilder::new("big")
        .id(1)
        .status(TaskStatus::PreScheduled)
        .at(at(10, 0), 60)
        .build()])?;

    let report = engine.assign_resources(AllocationScope::Task(TaskId(1)), true, &ctx)?;
    assert!(!report.is_clean());
    assert_eq!(report.forced.len(), 1);
    assert_eq!(report.forced[0].status, TaskStatus::Conflict);

    let task = engine.task(TaskId(1)).ok_or("task missing")?;
    assert_eq!(task.status, TaskStatus::Conflict);
    assert!(task.conflicts.contains(&Conflict::Storage {
        product: DataProductType::Correlated,
        failure: AllocationFailure::TooFewNodes,
    }));
    assert!(engine.conflicts().contains_key(&TaskId(1)));
    Ok(())
}

#[test]
fn resource_pass_forces_error_on_invalid_task() -> TestResult {
    let ctx = context();
    let mut engine = engine_with(roomy_snapshot());
    engine.load_tasks([ObservationBuilder::new("stray")
        .id(1)
        .project("GONE")
        .status(TaskStatus::Scheduled)
        .at(at(10, 0), 60)
        .build()])?;

    let report = engine.assign_resources(AllocationScope::AllScheduled, true, &ctx)?;
    assert_eq!(report.forced.len(), 1);
    assert_eq!(engine.task(TaskId(1)).map(|t| t.status), Some(TaskStatus::Error));
    assert!(!engine.claims().holds(TaskId(1)));
    Ok(())
}

#[test]
fn replaced_snapshot_applies_to_later_allocations() -> TestResult {
    let ctx = context();
    let mut engine = engine_with(SnapshotBuilder::new().node(1, &[10]).build());
    let id = engine.add_task(ObservationBuilder::new("obs").at(at(10, 0), 60).build())?;

    let err = engine
        .request_status_change(id, TaskStatus::PreScheduled, false, &ctx)
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Allocation { .. }));
    assert_eq!(engine.task(id).map(|t| t.status), Some(TaskStatus::Unscheduled));

    engine.replace_storage_snapshot(roomy_snapshot());
    assert_eq!(engine.storage_snapshot().nodes().count(), 3);
    engine.request_status_change(id, TaskStatus::PreScheduled, false, &ctx)?;
    assert!(engine.claims().holds(id));
    Ok(())
}
