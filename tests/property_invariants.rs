// tests/property_invariants.rs
mod common;
use crate::common::builders::{ContextBuilder, ObservationBuilder, STATIONS, SnapshotBuilder, at};
use crate::common::{add_all, engine_with};

use proptest::prelude::*;

use arraysched::engine::{AllocationScope, Move, ScheduleEngine};
use arraysched::storage::StorageSnapshot;
use arraysched::task::{Task, TaskId};
use arraysched::types::{DataProductType, TaskStatus};

/// One generated observation: station index, start hour, minutes, files,
/// file size in kB.
type Plan = (usize, i64, i64, u32, u64);

// Between one and four nodes, each with up to three partitions.
fn snapshot_strategy() -> impl Strategy<Value = StorageSnapshot> {
    proptest::collection::vec(proptest::collection::vec(50_000u64..2_000_000, 1..=3), 1..=4)
        .prop_map(|nodes| {
            let mut builder = SnapshotBuilder::new();
            for (idx, partitions) in nodes.iter().enumerate() {
                builder = builder.node(idx as u32 + 1, partitions);
            }
            builder.build()
        })
}

// Only the first three stations are used so overlaps are common.
fn plans_strategy(max_tasks: usize) -> impl Strategy<Value = Vec<Plan>> {
    proptest::collection::vec(
        (0..3usize, 1i64..24, 30i64..180, 1u32..40, 100u64..100_000),
        1..=max_tasks,
    )
}

fn build_tasks(plans: &[Plan]) -> Vec<Task> {
    plans
        .iter()
        .enumerate()
        .map(|(idx, (station, hour, minutes, files, file_kb))| {
            ObservationBuilder::new(&format!("obs_{idx}"))
                .stations(&[STATIONS[*station]])
                .at(at(*hour, 0), *minutes)
                .output(DataProductType::Correlated, *files, *file_kb)
                .build()
        })
        .collect()
}

fn schedule_all(engine: &mut ScheduleEngine, tasks: Vec<Task>, bandwidth: f64) -> Vec<TaskId> {
    let ctx = ContextBuilder::new().bandwidth(bandwidth).build();
    let ids = add_all(engine, tasks);
    engine
        .request_bulk_status_change(&ids, TaskStatus::PreScheduled, false, &ctx)
        .expect("bulk change");
    ids
}

fn overlapping_pairs(engine: &ScheduleEngine) -> Vec<(String, String)> {
    let live: Vec<&Task> = engine
        .tasks()
        .filter(|t| t.status.occupies_resources())
        .collect();
    let mut pairs = Vec::new();
    for (i, a) in live.iter().enumerate() {
        for b in &live[i + 1..] {
            let (Some(ia), Some(ib)) = (a.interval(), b.interval()) else {
                continue;
            };
            let shares_station = a
                .stations()
                .is_some_and(|s| s.iter().any(|st| b.uses_station(st)));
            if ia.overlaps(&ib) && shares_station {
                pairs.push((a.name.clone(), b.name.clone()));
            }
        }
    }
    pairs
}

proptest! {
    #[test]
    fn claims_never_exceed_capacity_or_bandwidth(
        snapshot in snapshot_strategy(),
        plans in plans_strategy(10),
        bandwidth in 200.0f64..5_000.0,
    ) {
        let mut engine = engine_with(snapshot.clone());
        schedule_all(&mut engine, build_tasks(&plans), bandwidth);

        for node in snapshot.nodes() {
            for part in &node.partitions {
                let claimed = engine.claims().claimed_kb(node.id, part.id);
                prop_assert!(
                    claimed <= part.free_kb(),
                    "node {} partition {} holds {} kB of {} free",
                    node.id, part.id, claimed, part.free_kb()
                );
            }
            let used = engine.claims().node_bandwidth(node.id);
            prop_assert!(used <= bandwidth * (1.0 + 1e-9), "node {} writes {} kB/s", node.id, used);
        }

        // Every scheduled task got all of its files.
        for task in engine.tasks().filter(|t| t.status.occupies_resources()) {
            prop_assert!(task.has_complete_storage(), "{} is incomplete", task.name);
        }
    }

    #[test]
    fn scheduled_tasks_never_share_a_station(
        plans in plans_strategy(12),
        moves in proptest::collection::vec((0..12usize, 1i64..24), 0..6),
    ) {
        let ctx = ContextBuilder::new().build();
        let mut engine = engine_with(
            SnapshotBuilder::new().node(1, &[100_000_000]).node(2, &[100_000_000]).build(),
        );
        let ids = schedule_all(&mut engine, build_tasks(&plans), ctx.node_bandwidth_kbps);
        prop_assert!(overlapping_pairs(&engine).is_empty());

        // Accepted or refused, no move leaves an overlap behind.
        for (idx, hour) in moves {
            if let Some(id) = ids.get(idx) {
                let _ = engine.request_move(&[Move { task: *id, start: at(hour, 0) }], &ctx);
            }
            let pairs = overlapping_pairs(&engine);
            prop_assert!(pairs.is_empty(), "overlaps: {:?}", pairs);
        }
    }

    #[test]
    fn resource_pass_is_idempotent(
        snapshot in snapshot_strategy(),
        plans in plans_strategy(8),
    ) {
        let ctx = ContextBuilder::new().build();
        let mut engine = engine_with(snapshot);
        schedule_all(&mut engine, build_tasks(&plans), ctx.node_bandwidth_kbps);

        engine
            .assign_resources(AllocationScope::AllScheduled, false, &ctx)
            .expect("first pass");
        let settled = engine.schedule_state();
        let claims = engine.claims().clone();

        let report = engine
            .assign_resources(AllocationScope::AllScheduled, false, &ctx)
            .expect("second pass");
        prop_assert!(report.allocated.is_empty());
        prop_assert!(report.forced.is_empty());
        prop_assert_eq!(engine.schedule_state(), settled);
        prop_assert_eq!(engine.claims(), &claims);
    }

    #[test]
    fn undo_and_redo_of_a_bulk_change_round_trip(plans in plans_strategy(8)) {
        let ctx = ContextBuilder::new().build();
        let mut engine = engine_with(
            SnapshotBuilder::new().node(1, &[1_000_000]).node(2, &[2_000_000]).build(),
        );
        let ids = add_all(&mut engine, build_tasks(&plans));
        let before = engine.schedule_state();
        let entries = engine.undo_log().undo_len();

        engine
            .request_bulk_status_change(&ids, TaskStatus::PreScheduled, false, &ctx)
            .expect("bulk change");
        if engine.undo_log().undo_len() > entries {
            let after = engine.schedule_state();
            let claims = engine.claims().clone();

            engine.undo();
            prop_assert_eq!(engine.schedule_state(), before);
            prop_assert!(engine.claims().is_empty());

            engine.redo();
            prop_assert_eq!(engine.schedule_state(), after);
            prop_assert_eq!(engine.claims(), &claims);
        }
    }
}
