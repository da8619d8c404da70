// src/engine/transition.rs

//! Task status state machine and its side effects.
//!
//! `change_status` is the single place where a user-requested transition
//! is checked, validated and turned into allocations. Storage for tasks
//! sharing a group id is planned together.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use crate::engine::state::{EngineState, Env};
use crate::errors::{Result, SchedulerError};
use crate::storage::{allocate, commit_or_rollback};
use crate::task::{Conflict, GroupId, Task, TaskId};
use crate::types::TaskStatus;
use crate::validation::{ValidationInput, ValidationResult, validate};

/// Whether a user may request `from -> to`.
///
/// `Error` and `Conflict` are only ever set by the engine itself.
pub fn user_transition_allowed(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    match to {
        PreScheduled => matches!(from, Unscheduled | Error | Conflict | Scheduled),
        Scheduled => from == PreScheduled,
        OnHold => matches!(from, Unscheduled | PreScheduled | Scheduled | Error),
        Unscheduled => matches!(from, PreScheduled | Scheduled | Error | Conflict | OnHold),
        _ => false,
    }
}

/// Whether an external status report `from -> to` is accepted.
pub fn report_allowed(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    if from.is_terminal() || from == to {
        return false;
    }
    match to {
        Starting | Active | Completing | Finished => {
            matches!(from, Scheduled | Starting | Active | Completing) && to > from
        }
        Aborted | Obsolete => true,
        _ => false,
    }
}

impl EngineState {
    /// Validate `task` for `target` against this state.
    pub fn validate_task(
        &self,
        env: &Env<'_>,
        task: &Task,
        target: TaskStatus,
        ignore: &[TaskId],
    ) -> ValidationResult {
        let input = ValidationInput {
            registry: &self.registry,
            resolver: self.resolver(env),
            ctx: env.ctx,
            ignore,
        };
        validate(task, target, &input)
    }

    /// Apply one user transition. Returns `false` when the task already was
    /// in `target`.
    ///
    /// On error the state may be partially modified; callers work on a
    /// clone and drop it.
    pub fn change_status(
        &mut self,
        env: &Env<'_>,
        id: TaskId,
        target: TaskStatus,
        confirm_soft_warnings: bool,
    ) -> Result<bool> {
        self.transition(env, id, target, confirm_soft_warnings, true)
    }

    /// Like [`change_status`](Self::change_status) but leaves storage
    /// allocation to the caller, so several tasks can be planned together.
    pub fn change_status_deferred(
        &mut self,
        env: &Env<'_>,
        id: TaskId,
        target: TaskStatus,
        confirm_soft_warnings: bool,
    ) -> Result<bool> {
        self.transition(env, id, target, confirm_soft_warnings, false)
    }

    fn transition(
        &mut self,
        env: &Env<'_>,
        id: TaskId,
        target: TaskStatus,
        confirm_soft_warnings: bool,
        allocate_now: bool,
    ) -> Result<bool> {
        let task = self.registry.require(id)?;
        let from = task.status;
        if from == target {
            return Ok(false);
        }
        if !user_transition_allowed(from, target) {
            return Err(SchedulerError::IllegalTransition {
                task: id,
                from,
                to: target,
            });
        }

        if matches!(target, TaskStatus::PreScheduled | TaskStatus::Scheduled) {
            let result = self.validate_task(env, task, target, &[]);
            if result.blocks(confirm_soft_warnings) {
                warn!(task = %id, %from, to = %target, %result, "status change refused");
                return Err(SchedulerError::Validation { task: id, result });
            }
            self.registry.update(id, |t| {
                t.status = target;
                t.conflicts.clear();
            })?;
            if allocate_now {
                self.allocate_storage(env, &[id])?;
            }
        } else {
            self.release(id)?;
            self.registry.update(id, |t| {
                t.status = target;
                t.conflicts.clear();
            })?;
        }

        info!(task = %id, %from, to = %target, "status changed");
        Ok(true)
    }

    /// Give storage to every task in `ids` that needs it and does not hold
    /// it yet. Group members are planned together; already placed members
    /// of the same group fix the node list.
    ///
    /// Returns the tasks that received new claims.
    pub fn allocate_storage(&mut self, env: &Env<'_>, ids: &[TaskId]) -> Result<Vec<TaskId>> {
        let mut singles: Vec<Vec<TaskId>> = Vec::new();
        let mut groups: BTreeMap<GroupId, Vec<TaskId>> = BTreeMap::new();

        for id in ids {
            let task = self.registry.require(*id)?;
            if !task.needs_storage() || (self.ledger.holds(*id) && task.has_complete_storage()) {
                continue;
            }
            if task.group == 0 {
                singles.push(vec![*id]);
            } else {
                groups.entry(task.group).or_default().push(*id);
            }
        }

        for (group, members) in groups.iter_mut() {
            let placed = self.registry.group_members(*group).into_iter().filter(|m| {
                !members.contains(m)
                    && self.ledger.holds(*m)
                    && self
                        .registry
                        .get(*m)
                        .is_some_and(|t| t.status.occupies_resources())
            });
            let placed: Vec<TaskId> = placed.collect();
            members.extend(placed);
        }

        let mut allocated = Vec::new();
        for chunk in singles.into_iter().chain(groups.into_values()) {
            allocated.extend(self.allocate_chunk(env, &chunk)?);
        }
        Ok(allocated)
    }

    fn allocate_chunk(&mut self, env: &Env<'_>, chunk: &[TaskId]) -> Result<Vec<TaskId>> {
        let tasks: Vec<&Task> = chunk.iter().filter_map(|id| self.registry.get(*id)).collect();

        let policies: BTreeSet<_> = tasks
            .iter()
            .filter(|t| t.needs_storage())
            .map(|t| t.storage_policy.unwrap_or(env.ctx.storage_policy))
            .collect();
        if policies.len() > 1 {
            let group = tasks.first().map(|t| t.group).unwrap_or(0);
            return Err(SchedulerError::GroupInconsistent {
                group,
                reason: "members use different storage policies".to_string(),
            });
        }

        let plan = allocate(&tasks, env.snapshot, &self.ledger, env.ctx);
        let lead = chunk.first().copied().unwrap_or(TaskId(0));

        match commit_or_rollback(&mut self.ledger, plan) {
            Ok(locations) => {
                let mut placed = Vec::new();
                for (id, locs) in locations {
                    self.registry.update(id, |t| {
                        t.locations.extend(locs);
                        t.conflicts.retain(|c| !matches!(c, Conflict::Storage { .. }));
                    })?;
                    debug!(task = %id, "storage allocated");
                    placed.push(id);
                }
                Ok(placed)
            }
            Err(failures) => {
                let task = failures.first().map(|f| f.task).unwrap_or(lead);
                Err(SchedulerError::Allocation { task, failures })
            }
        }
    }
}
