// src/engine/core.rs

//! The `ScheduleEngine` facade.
//!
//! Every mutating request follows the same shape: clone the state, apply
//! the edit to the clone, and on success refresh data slots, swap the clone
//! in and record one undo entry. A failed request returns its error and
//! leaves the engine exactly as it was.
//!
//! The engine is synchronous and does no IO; callers pass a
//! [`SchedulingContext`] into each operation that needs one.

use std::collections::{BTreeMap, BTreeSet};

use chrono::TimeDelta;
use tracing::{debug, info, warn};

use crate::conflict::{ConflictList, find_overlapping, station_conflicts};
use crate::context::SchedulingContext;
use crate::dataslot::DataSlotReport;
use crate::engine::report::{AllocationReport, BulkFailure, BulkReport, ForcedStatus};
use crate::engine::state::{EngineState, Env};
use crate::engine::transition::report_allowed;
use crate::engine::undo::{AppliedEntry, UndoDirection, UndoEntry, UndoLog};
use crate::engine::{AllocationScope, EngineOptions, Move};
use crate::errors::{Result, SchedulerError};
use crate::storage::{ClaimLedger, StorageSnapshot};
use crate::task::{
    Conflict, PredecessorGraph, PredecessorResolver, RegistryState, StationId, Task, TaskId, TaskProperty,
    TaskRegistry,
};
use crate::time::{Interval, Timestamp};
use crate::types::{StatusBucket, TaskStatus};
use crate::validation::{ValidationKind, ValidationResult};

/// Owner of the schedule: tasks, storage claims, the storage snapshot and
/// the undo/redo log.
pub struct ScheduleEngine {
    state: EngineState,
    snapshot: StorageSnapshot,
    undo: UndoLog,
    resolver: Option<Box<dyn PredecessorResolver>>,
}

impl std::fmt::Debug for ScheduleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleEngine")
            .field("tasks", &self.state.registry.len())
            .field("claims", &self.state.ledger.len())
            .field("undo", &self.undo.undo_len())
            .field("redo", &self.undo.redo_len())
            .field("custom_resolver", &self.resolver.is_some())
            .finish()
    }
}

impl ScheduleEngine {
    pub fn new(snapshot: StorageSnapshot, options: EngineOptions) -> Self {
        Self {
            state: EngineState::new(),
            snapshot,
            undo: UndoLog::new(options.undo_limit, options.retain_redo),
            resolver: None,
        }
    }

    /// Resolve external predecessor references through `resolver` instead
    /// of the registry's own external ids.
    pub fn set_resolver(&mut self, resolver: Box<dyn PredecessorResolver>) {
        self.resolver = Some(resolver);
    }

    fn env<'a>(&'a self, ctx: &'a SchedulingContext) -> Env<'a> {
        Env {
            snapshot: &self.snapshot,
            resolver: self.resolver.as_deref(),
            ctx,
        }
    }

    fn serialized_state(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.state.registry.state())?)
    }

    /// Swap in a successfully edited state and record its undo entry.
    fn commit(&mut self, mut work: EngineState, entry: UndoEntry) -> DataSlotReport {
        let report = work.refresh_data_slots();
        self.state = work;
        self.undo.push(entry);
        report
    }

    // ----- task creation and loading -----

    /// Add a new task. It gets a fresh id and starts `Unscheduled`.
    pub fn add_task(&mut self, task: Task) -> Result<TaskId> {
        let mut work = self.state.clone();
        let id = work.registry.insert_new(task);
        work.check_acyclic(self.resolver.as_deref())?;
        info!(task = %id, "task added");
        self.commit(
            work,
            UndoEntry::TaskSnapshot {
                task_id: id,
                previous: None,
            },
        );
        Ok(id)
    }

    /// Load tasks from a data source, keeping their ids, statuses and
    /// allocations. Not undoable.
    pub fn load_tasks(&mut self, tasks: impl IntoIterator<Item = Task>) -> Result<()> {
        let mut work = self.state.clone();
        let mut count = 0usize;
        for task in tasks {
            work.registry.insert_existing(task);
            count += 1;
        }
        work.check_acyclic(self.resolver.as_deref())?;
        work.rebuild_claims();
        work.refresh_data_slots();
        self.state = work;
        info!(tasks = count, "tasks loaded");
        Ok(())
    }

    // ----- status changes -----

    /// Move one task to `target`.
    ///
    /// Refused validations come back as [`SchedulerError::Validation`];
    /// a soft warning only blocks when `confirm_soft_warnings` is false.
    pub fn request_status_change(
        &mut self,
        id: TaskId,
        target: TaskStatus,
        confirm_soft_warnings: bool,
        ctx: &SchedulingContext,
    ) -> Result<()> {
        let before = self.state.registry.require(id)?.clone();
        let mut work = self.state.clone();
        let changed = work.change_status(&self.env(ctx), id, target, confirm_soft_warnings)?;
        if changed {
            self.commit(
                work,
                UndoEntry::TaskSnapshot {
                    task_id: id,
                    previous: Some(before),
                },
            );
        }
        Ok(())
    }

    /// Move many tasks to `target` as one undoable step.
    ///
    /// Tasks that fail are left as they were and listed in the report; the
    /// rest still change. Storage for group members is planned together.
    pub fn request_bulk_status_change(
        &mut self,
        ids: &[TaskId],
        target: TaskStatus,
        confirm_soft_warnings: bool,
        ctx: &SchedulingContext,
    ) -> Result<BulkReport> {
        for id in ids {
            self.state.registry.require(*id)?;
        }
        let before = self.serialized_state()?;
        let env = self.env(ctx);
        let mut work = self.state.clone();
        let mut report = BulkReport::default();
        let scheduling = matches!(target, TaskStatus::PreScheduled | TaskStatus::Scheduled);

        let mut seen = BTreeSet::new();
        for id in ids.iter().copied().filter(|id| seen.insert(*id)) {
            let mut trial = work.clone();
            let outcome = if scheduling {
                trial.change_status_deferred(&env, id, target, confirm_soft_warnings)
            } else {
                trial.change_status(&env, id, target, confirm_soft_warnings)
            };
            match outcome {
                Ok(true) => {
                    work = trial;
                    report.changed.push(id);
                }
                Ok(false) => {}
                Err(SchedulerError::Validation {
                    result: result @ ValidationResult::SoftWarning { .. },
                    ..
                }) => report.skipped.push((id, result)),
                Err(err) => report.failed.push(BulkFailure {
                    task: id,
                    reason: err.to_string(),
                    validation: err.validation().cloned(),
                }),
            }
        }

        if scheduling {
            let mut chunks: BTreeMap<u32, Vec<TaskId>> = BTreeMap::new();
            let mut singles = Vec::new();
            for id in &report.changed {
                match work.registry.get(*id).map(|t| t.group) {
                    Some(0) | None => singles.push(vec![*id]),
                    Some(group) => chunks.entry(group).or_default().push(*id),
                }
            }
            for chunk in singles.into_iter().chain(chunks.into_values()) {
                let mut trial = work.clone();
                match trial.allocate_storage(&env, &chunk) {
                    Ok(_) => work = trial,
                    Err(err) => {
                        warn!(tasks = ?chunk, %err, "bulk allocation failed");
                        for id in &chunk {
                            if let Some(original) = self.state.registry.get(*id) {
                                work.registry.insert_existing(original.clone());
                            }
                            report.changed.retain(|c| c != id);
                            report.failed.push(BulkFailure {
                                task: *id,
                                reason: err.to_string(),
                                validation: None,
                            });
                        }
                    }
                }
            }
            work.rebuild_claims();
        }

        if !report.changed.is_empty() {
            info!(
                changed = report.changed.len(),
                skipped = report.skipped.len(),
                failed = report.failed.len(),
                to = %target,
                "bulk status change"
            );
            self.commit(work, UndoEntry::ScheduleSnapshot { state: before });
        }
        Ok(report)
    }

    // ----- time edits -----

    /// Move tasks to new start times, keeping their durations.
    ///
    /// Nothing changes if any resource-holding task would overlap another
    /// on a station; the overlaps are returned instead. Scheduled tasks that
    /// moved, and their successors, are validated again and the first hard
    /// failure refuses the whole move.
    pub fn request_move(&mut self, moves: &[Move], ctx: &SchedulingContext) -> Result<()> {
        if moves.is_empty() {
            return Ok(());
        }
        let before_state = self.serialized_state()?;
        let mut work = self.state.clone();
        let mut previous: Vec<Task> = Vec::new();

        for mv in moves {
            let task = work.registry.require(mv.task)?;
            if !task.status.is_editable() {
                return Err(SchedulerError::TaskNotEditable {
                    task: mv.task,
                    status: task.status,
                });
            }
            if task.status.occupies_resources() && mv.start < ctx.earliest_start() {
                return Err(SchedulerError::Validation {
                    task: mv.task,
                    result: ValidationResult::HardError {
                        kind: ValidationKind::TooEarly,
                        message: format!("cannot move a scheduled task to {}", mv.start),
                    },
                });
            }
            previous.push(task.clone());
            work.registry.update(mv.task, |t| {
                t.schedule = Some(Interval::starting_at(mv.start, t.duration));
            })?;
        }

        let mut conflicts: ConflictList = Vec::new();
        for mv in moves {
            let Some(task) = work.registry.get(mv.task) else {
                continue;
            };
            if !task.status.occupies_resources() {
                continue;
            }
            if let Some(iv) = task.schedule {
                conflicts.extend(station_conflicts(&work.registry, task, &iv, &[]));
            }
        }
        if !conflicts.is_empty() {
            warn!(conflicts = conflicts.len(), "move refused");
            return Err(SchedulerError::StationConflicts(conflicts));
        }

        // Moved tasks and the tasks waiting on them must still validate.
        let env = self.env(ctx);
        let graph = PredecessorGraph::build(work.registry.iter(), work.resolver(&env));
        let mut affected: BTreeSet<TaskId> = moves.iter().map(|mv| mv.task).collect();
        let successors: Vec<TaskId> = affected.iter().flat_map(|id| graph.successors_of(*id)).collect();
        affected.extend(successors);
        for id in affected {
            let Some(task) = work.registry.get(id) else {
                continue;
            };
            if !matches!(task.status, TaskStatus::PreScheduled | TaskStatus::Scheduled) {
                continue;
            }
            let result = work.validate_task(&env, task, task.status, &[]);
            if result.blocks(true) {
                warn!(task = %id, %result, "move refused");
                return Err(SchedulerError::Validation { task: id, result });
            }
        }

        let entry = match previous.as_slice() {
            [single] => UndoEntry::TaskSnapshot {
                task_id: single.id,
                previous: Some(single.clone()),
            },
            _ => UndoEntry::ScheduleSnapshot {
                state: before_state,
            },
        };
        info!(tasks = moves.len(), "tasks moved");
        self.commit(work, entry);
        Ok(())
    }

    /// Copy tasks `count` times each.
    ///
    /// Copy `n` starts at `start + n * step` (defaults: the source start and
    /// its duration). Copies that cannot reach `target` stay `Unscheduled`.
    pub fn request_copy(
        &mut self,
        ids: &[TaskId],
        count: u32,
        start: Option<Timestamp>,
        step: Option<TimeDelta>,
        target: TaskStatus,
        ctx: &SchedulingContext,
    ) -> Result<Vec<TaskId>> {
        let before = self.serialized_state()?;
        let env = self.env(ctx);
        let mut work = self.state.clone();
        let mut created = Vec::new();

        for id in ids {
            let source = work.registry.require(*id)?.clone();
            let base = start.or(source.schedule.map(|iv| iv.start));
            let step = step.unwrap_or(source.duration);

            for n in 0..count {
                let mut copy = source.clone();
                copy.external_id = None;
                copy.schedule = base.map(|b| {
                    let offset = step * i32::try_from(n).unwrap_or(i32::MAX);
                    Interval::starting_at(b + offset, copy.duration)
                });
                let new_id = work.registry.insert_new(copy);
                created.push(new_id);

                if target == TaskStatus::Unscheduled {
                    continue;
                }
                let mut trial = work.clone();
                match trial.change_status(&env, new_id, target, false) {
                    Ok(_) => work = trial,
                    Err(err) if err.is_structural() => return Err(err),
                    Err(err) => {
                        warn!(source = %id, copy = %new_id, %err, "copy left unscheduled")
                    }
                }
            }
        }

        if !created.is_empty() {
            info!(copies = created.len(), "tasks copied");
            self.commit(work, UndoEntry::ScheduleSnapshot { state: before });
        }
        Ok(created)
    }

    /// Change one property of a task.
    ///
    /// For a task holding resources, a property that affects them triggers
    /// re-validation and re-allocation; failure leaves the task untouched.
    pub fn request_property_change(
        &mut self,
        id: TaskId,
        property: TaskProperty,
        ctx: &SchedulingContext,
    ) -> Result<()> {
        let before = self.state.registry.require(id)?.clone();
        let affects = property.affects_resources();
        if affects && !before.status.is_editable() {
            return Err(SchedulerError::TaskNotEditable {
                task: id,
                status: before.status,
            });
        }
        let predecessors_changed = matches!(property, TaskProperty::Predecessors(_));

        let env = self.env(ctx);
        let mut work = self.state.clone();
        let previous = work.registry.update(id, |t| property.apply(t))?;
        if work.registry.get(id) == Some(&before) {
            return Ok(());
        }
        if predecessors_changed {
            work.check_acyclic(env.resolver)?;
        }

        let entry = if affects && before.status.occupies_resources() {
            work.release(id)?;
            let task = work.registry.require(id)?.clone();
            let result = work.validate_task(&env, &task, task.status, &[]);
            if result.blocks(true) {
                warn!(task = %id, %result, "property change refused");
                return Err(SchedulerError::Validation { task: id, result });
            }
            work.allocate_storage(&env, &[id])?;
            UndoEntry::TaskSnapshot {
                task_id: id,
                previous: Some(before),
            }
        } else {
            UndoEntry::PropertyChange {
                task_id: id,
                previous,
            }
        };

        info!(task = %id, "property changed");
        self.commit(work, entry);
        Ok(())
    }

    // ----- delete / restore / purge -----

    /// Move tasks to the deleted bin, releasing what they hold.
    pub fn request_delete(&mut self, ids: &[TaskId]) -> Result<()> {
        let mut work = self.state.clone();
        let mut originals = Vec::new();
        for id in ids {
            if originals.iter().any(|t: &Task| t.id == *id) {
                continue;
            }
            let task = work.registry.require(*id)?.clone();
            if task.status.occupies_resources() && !task.status.is_editable() {
                return Err(SchedulerError::TaskNotEditable {
                    task: *id,
                    status: task.status,
                });
            }
            work.release(*id)?;
            work.registry.soft_delete(*id)?;
            originals.push(task);
        }
        if originals.is_empty() {
            return Ok(());
        }
        info!(tasks = originals.len(), "tasks deleted");
        self.commit(work, UndoEntry::DeleteBatch { tasks: originals });
        Ok(())
    }

    /// Bring tasks back from the deleted bin.
    ///
    /// A task that held resources when deleted comes back `Unscheduled`;
    /// its old allocations may have been taken since.
    pub fn restore(&mut self, ids: &[TaskId]) -> Result<()> {
        let before = self.serialized_state()?;
        let mut work = self.state.clone();
        let mut restored = 0usize;
        for id in ids {
            if work.registry.contains(*id) {
                continue;
            }
            work.registry.undelete(*id)?;
            work.registry.update(*id, |t| {
                if t.status.occupies_resources()
                    || matches!(t.status, TaskStatus::Error | TaskStatus::Conflict)
                {
                    t.status = TaskStatus::Unscheduled;
                    t.conflicts.clear();
                }
                t.clear_allocations();
            })?;
            restored += 1;
        }
        if restored == 0 {
            return Ok(());
        }
        info!(tasks = restored, "tasks restored");
        self.commit(work, UndoEntry::ScheduleSnapshot { state: before });
        Ok(())
    }

    /// Permanently drop tasks from the bin. Not undoable; undo entries
    /// referring to them are pruned.
    pub fn purge(&mut self, ids: &[TaskId]) -> Vec<TaskId> {
        let purged = self.state.registry.purge(ids);
        self.undo.prune(&purged);
        if !purged.is_empty() {
            info!(tasks = purged.len(), "tasks purged");
        }
        purged
    }

    pub fn purge_deleted(&mut self) -> Vec<TaskId> {
        let ids: Vec<TaskId> = self.state.registry.deleted().map(|t| t.id).collect();
        self.purge(&ids)
    }

    // ----- system pass -----

    /// Re-check and allocate resources for one task or all scheduled tasks.
    ///
    /// Tasks failing validation are forced to `Error`/`Conflict`; tasks
    /// whose storage cannot be placed are forced to `Conflict` with one
    /// storage conflict per failing product. Tasks already fully allocated
    /// are left alone.
    pub fn assign_resources(
        &mut self,
        scope: AllocationScope,
        show_result: bool,
        ctx: &SchedulingContext,
    ) -> Result<AllocationReport> {
        let before = self.serialized_state()?;
        let env = self.env(ctx);
        let mut work = self.state.clone();
        let mut report = AllocationReport::default();

        let mut ids: Vec<(Timestamp, TaskId)> = match scope {
            AllocationScope::Task(id) => {
                let task = work.registry.require(id)?;
                vec![(task.schedule.map(|iv| iv.start).unwrap_or(ctx.now), id)]
            }
            AllocationScope::AllScheduled => work
                .registry
                .iter()
                .filter(|t| matches!(t.status, TaskStatus::PreScheduled | TaskStatus::Scheduled))
                .map(|t| (t.schedule.map(|iv| iv.start).unwrap_or(ctx.now), t.id))
                .collect(),
        };
        ids.sort();

        for (_, id) in ids {
            let Some(task) = work.registry.get(id).cloned() else {
                continue;
            };
            if !matches!(task.status, TaskStatus::PreScheduled | TaskStatus::Scheduled) {
                continue;
            }

            let upcoming = task
                .schedule
                .is_some_and(|iv| iv.start >= ctx.earliest_start());
            if upcoming || task.schedule.is_none() {
                let result = work.validate_task(&env, &task, task.status, &[]);
                if let Some(status) = result.implied_status() {
                    let mut reasons: Vec<Conflict> = result
                        .kind()
                        .map(|kind| Conflict::Validation { kind })
                        .into_iter()
                        .collect();
                    if let Some(iv) = task.schedule {
                        reasons.extend(
                            station_conflicts(&work.registry, &task, &iv, &[])
                                .into_iter()
                                .map(|c| Conflict::StationOverlap {
                                    station: c.station,
                                    other: c.other,
                                }),
                        );
                    }
                    work.force_status(id, status, reasons)?;
                    warn!(task = %id, %status, %result, "task forced out of schedule");
                    report.forced.push(ForcedStatus {
                        task: id,
                        status,
                        reason: result.to_string(),
                    });
                    continue;
                }
            }

            if !task.needs_storage() {
                continue;
            }
            if work.ledger.holds(id) && task.has_complete_storage() {
                report.unchanged.push(id);
                continue;
            }

            let mut trial = work.clone();
            match trial.allocate_storage(&env, &[id]) {
                Ok(placed) => {
                    work = trial;
                    report.allocated.extend(placed);
                }
                Err(SchedulerError::Allocation { failures, .. }) => {
                    let failing: BTreeSet<TaskId> = failures.iter().map(|f| f.task).collect();
                    for task_id in failing {
                        let reasons = failures
                            .iter()
                            .filter(|f| f.task == task_id)
                            .map(|f| Conflict::Storage {
                                product: f.product,
                                failure: f.failure,
                            });
                        work.force_status(task_id, TaskStatus::Conflict, reasons)?;
                        report.forced.push(ForcedStatus {
                            task: task_id,
                            status: TaskStatus::Conflict,
                            reason: "storage allocation failed".to_string(),
                        });
                    }
                    report.storage_failures.extend(failures);
                }
                Err(err) => return Err(err),
            }
        }

        let slots = work.refresh_data_slots();
        report.dataslot_failures = slots.failures;

        if work.registry.state() != self.state.registry.state() {
            self.state = work;
            self.undo.push(UndoEntry::ScheduleSnapshot { state: before });
        } else {
            self.state = work;
        }

        if show_result {
            info!(
                allocated = report.allocated.len(),
                unchanged = report.unchanged.len(),
                forced = report.forced.len(),
                storage_failures = report.storage_failures.len(),
                dataslot_failures = report.dataslot_failures.len(),
                "resource assignment finished"
            );
        } else {
            debug!(allocated = report.allocated.len(), "resource assignment finished");
        }
        Ok(report)
    }

    // ----- external inputs -----

    /// Record a status reported by the control system. Not undoable; undo
    /// entries recorded so far no longer touch this task.
    pub fn apply_status_report(
        &mut self,
        id: TaskId,
        status: TaskStatus,
        actual_end: Option<Timestamp>,
    ) -> Result<()> {
        let from = self.state.registry.require(id)?.status;
        if !report_allowed(from, status) {
            return Err(SchedulerError::IllegalTransition {
                task: id,
                from,
                to: status,
            });
        }
        let mut work = self.state.clone();
        if status.is_terminal() {
            work.release(id)?;
        }
        work.registry.update(id, |t| {
            t.status = status;
            if actual_end.is_some() {
                t.actual_end = actual_end;
            }
        })?;
        work.refresh_data_slots();
        self.state = work;
        self.undo.pin(id);
        info!(task = %id, %from, to = %status, "status reported");
        Ok(())
    }

    /// Replace the storage node/partition snapshot. Existing claims stay.
    pub fn replace_storage_snapshot(&mut self, snapshot: StorageSnapshot) {
        debug!(nodes = snapshot.nodes().count(), "storage snapshot replaced");
        self.snapshot = snapshot;
    }

    // ----- undo / redo -----

    /// Revert the most recent edit. `None` when there is nothing to undo.
    pub fn undo(&mut self) -> Option<AppliedEntry> {
        let recorded = self.undo.pop_undo()?;
        let description = recorded.entry.describe();
        let tasks = recorded.entry.task_ids();
        let inert = self.undo.inert_for(recorded.seq);
        let mirror = self.apply_entry(recorded.entry, &inert);
        let noop = mirror.is_none();
        if let Some(mirror) = mirror {
            self.undo.mirror_to_redo(mirror);
        }
        let applied = AppliedEntry {
            direction: UndoDirection::Undo,
            description,
            tasks,
            noop,
        };
        info!(%applied, "undo");
        Some(applied)
    }

    /// Re-apply the most recently undone edit. `None` when there is
    /// nothing to redo.
    pub fn redo(&mut self) -> Option<AppliedEntry> {
        let recorded = self.undo.pop_redo()?;
        let description = recorded.entry.describe();
        let tasks = recorded.entry.task_ids();
        let inert = self.undo.inert_for(recorded.seq);
        let mirror = self.apply_entry(recorded.entry, &inert);
        let noop = mirror.is_none();
        if let Some(mirror) = mirror {
            self.undo.mirror_to_undo(mirror);
        }
        let applied = AppliedEntry {
            direction: UndoDirection::Redo,
            description,
            tasks,
            noop,
        };
        info!(%applied, "redo");
        Some(applied)
    }

    /// Restore what `entry` carries and return its mirror, or `None` when
    /// the entry had nothing left to apply.
    fn apply_entry(&mut self, entry: UndoEntry, inert: &BTreeSet<TaskId>) -> Option<UndoEntry> {
        let registry = &mut self.state.registry;
        let skip = |registry: &TaskRegistry, id: TaskId| inert.contains(&id) || registry.is_purged(id);

        let mirror = match entry {
            UndoEntry::TaskSnapshot { task_id, previous } => {
                if skip(registry, task_id) {
                    return None;
                }
                let current = registry.get(task_id).cloned();
                match previous {
                    Some(task) => registry.insert_existing(task),
                    None => {
                        registry.discard(task_id);
                    }
                }
                UndoEntry::TaskSnapshot {
                    task_id,
                    previous: current,
                }
            }
            UndoEntry::PropertyChange { task_id, previous } => {
                if skip(registry, task_id) {
                    return None;
                }
                let replaced = registry.update(task_id, |t| previous.apply(t)).ok()?;
                UndoEntry::PropertyChange {
                    task_id,
                    previous: replaced,
                }
            }
            UndoEntry::ScheduleSnapshot { state } => {
                let target: RegistryState = match serde_json::from_str(&state) {
                    Ok(s) => s,
                    Err(err) => {
                        warn!(%err, "undo snapshot unreadable; skipped");
                        return None;
                    }
                };
                let current = match serde_json::to_string(&registry.state()) {
                    Ok(s) => s,
                    Err(err) => {
                        warn!(%err, "cannot snapshot schedule; skipped");
                        return None;
                    }
                };
                let kept: Vec<Task> = inert
                    .iter()
                    .filter_map(|id| registry.get(*id).cloned())
                    .collect();
                registry.restore_state(target);
                for task in kept {
                    registry.insert_existing(task);
                }
                UndoEntry::ScheduleSnapshot { state: current }
            }
            UndoEntry::DeleteBatch { tasks } => {
                let mut ids = Vec::new();
                for task in tasks {
                    if skip(registry, task.id) {
                        continue;
                    }
                    ids.push(task.id);
                    registry.insert_existing(task);
                }
                if ids.is_empty() {
                    return None;
                }
                UndoEntry::Reinstated { task_ids: ids }
            }
            UndoEntry::Reinstated { task_ids } => {
                let mut tasks = Vec::new();
                for id in task_ids {
                    if skip(&self.state.registry, id) {
                        continue;
                    }
                    let Some(task) = self.state.registry.get(id).cloned() else {
                        continue;
                    };
                    if self.state.release(id).is_err() || self.state.registry.soft_delete(id).is_err()
                    {
                        continue;
                    }
                    tasks.push(task);
                }
                if tasks.is_empty() {
                    return None;
                }
                UndoEntry::DeleteBatch { tasks }
            }
        };

        self.state.rebuild_claims();
        self.state.refresh_data_slots();
        Some(mirror)
    }

    // ----- queries -----

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.state.registry.get(id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.state.registry.iter()
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.state.registry
    }

    pub fn tasks_in_bucket(&self, bucket: StatusBucket) -> Vec<&Task> {
        self.state.registry.tasks_in_bucket(bucket)
    }

    /// Resource-holding tasks using `station` during `interval`.
    pub fn tasks_overlapping(&self, station: &StationId, interval: &Interval) -> Vec<&Task> {
        find_overlapping(&self.state.registry, station, interval, None)
            .into_iter()
            .filter_map(|id| self.state.registry.get(id))
            .collect()
    }

    /// Tasks with at least one active conflict entry.
    pub fn conflicts(&self) -> BTreeMap<TaskId, &BTreeSet<Conflict>> {
        self.state
            .registry
            .iter()
            .filter(|t| !t.conflicts.is_empty())
            .map(|t| (t.id, &t.conflicts))
            .collect()
    }

    pub fn claims(&self) -> &ClaimLedger {
        &self.state.ledger
    }

    pub fn storage_snapshot(&self) -> &StorageSnapshot {
        &self.snapshot
    }

    pub fn deleted_tasks(&self) -> impl Iterator<Item = &Task> {
        self.state.registry.deleted()
    }

    pub fn can_undo(&self) -> bool {
        self.undo.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.undo.can_redo()
    }

    pub fn undo_log(&self) -> &UndoLog {
        &self.undo
    }

    /// Serializable view of tasks and the deleted bin.
    pub fn schedule_state(&self) -> RegistryState {
        self.state.registry.state()
    }
}
