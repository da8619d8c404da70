// src/lib.rs

pub mod cli;
pub mod config;
pub mod conflict;
pub mod context;
pub mod dataslot;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod storage;
pub mod task;
pub mod time;
pub mod types;
pub mod validation;

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::ScheduleFile;
use crate::engine::{AllocationScope, ScheduleEngine};
use crate::task::TaskId;
use crate::time::format_duration;
use crate::types::TaskStatus;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - schedule file loading
/// - engine construction from the file's tasks and storage nodes
/// - the optional bulk request into `prescheduled`
/// - one `assign_resources` pass and its report
pub fn run(args: CliArgs) -> Result<()> {
    let schedule_path = PathBuf::from(&args.schedule);
    let mut cfg = load_and_validate(&schedule_path)
        .with_context(|| format!("loading {}", schedule_path.display()))?;

    if let Some(now) = args.now.as_deref() {
        cfg.context.now = DateTime::parse_from_rfc3339(now)
            .with_context(|| format!("--now: invalid timestamp '{now}'"))?
            .with_timezone(&Utc);
    }

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let mut engine = ScheduleEngine::new(cfg.snapshot.clone(), cfg.options);
    engine.load_tasks(cfg.tasks.iter().cloned())?;
    info!(tasks = cfg.tasks.len(), now = %cfg.context.now, "schedule loaded");

    if args.schedule_all {
        let pending: Vec<TaskId> = engine
            .tasks()
            .filter(|t| t.status == TaskStatus::Unscheduled && !t.is_reservation_like())
            .map(|t| t.id)
            .collect();
        let bulk =
            engine.request_bulk_status_change(&pending, TaskStatus::PreScheduled, true, &cfg.context)?;
        for failure in &bulk.failed {
            warn!(task = %failure.task, reason = %failure.reason, "task not scheduled");
        }
        info!(
            changed = bulk.changed.len(),
            failed = bulk.failed.len(),
            "unscheduled tasks requested"
        );
    }

    let report = engine.assign_resources(AllocationScope::AllScheduled, true, &cfg.context)?;
    print!("{report}");
    if !report.is_clean() {
        warn!(
            forced = report.forced.len(),
            storage = report.storage_failures.len(),
            dataslots = report.dataslot_failures.len(),
            "resource pass left problems"
        );
    }

    if args.report {
        let state = engine.schedule_state();
        println!("{}", serde_json::to_string_pretty(&state)?);
    }

    Ok(())
}

/// Simple dry-run output: settings, storage nodes and tasks.
fn print_dry_run(cfg: &ScheduleFile) {
    let ctx = &cfg.context;
    println!("arraysched dry-run");
    println!("  now = {}", ctx.now);
    println!("  min_schedule_gap = {}", format_duration(ctx.min_schedule_gap));
    println!("  storage_policy = {:?}", ctx.storage_policy);
    println!("  node_bandwidth_kbps = {}", ctx.node_bandwidth_kbps);
    println!("  stations = {:?}", ctx.stations);
    println!();

    println!("storage ({} nodes):", cfg.snapshot.nodes().count());
    for node in cfg.snapshot.nodes() {
        println!(
            "  - {} (id {}, {:?}): {} partitions, {} kB free",
            node.name,
            node.id,
            node.status,
            node.partitions.len(),
            node.free_kb()
        );
    }
    println!();

    println!("tasks ({}):", cfg.tasks.len());
    for task in cfg.tasks.iter() {
        println!("  - {} {} [{}] {}", task.id, task.name, task.kind(), task.status);
        if let Some(iv) = task.schedule {
            println!("      at: {iv}");
        }
        if !task.predecessors.is_empty() {
            let after: Vec<String> = task
                .predecessors
                .iter()
                .map(|p| p.reference.to_string())
                .collect();
            println!("      after: {after:?}");
        }
        if let Some(stations) = task.stations() {
            if !stations.is_empty() {
                println!("      stations: {stations:?}");
            }
        }
        for (product, req) in task.storage.iter() {
            println!(
                "      output {product}: {} x {} kB",
                req.file_count, req.file_size_kb
            );
        }
    }

    debug!("dry-run complete (nothing allocated)");
}
