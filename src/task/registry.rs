// src/task/registry.rs

//! Owner of all tasks, indexed by id and by status bucket.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{Result, SchedulerError};
use crate::task::model::{ExternalId, GroupId, Task, TaskId};
use crate::types::{StatusBucket, TaskStatus};

/// Looks up the task behind an external `(namespace, id)` reference.
pub trait PredecessorResolver {
    fn resolve(&self, external: &ExternalId) -> Option<TaskId>;
}

/// Serializable view of the registry contents (live tasks plus the bin).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RegistryState {
    pub tasks: Vec<Task>,
    pub deleted: Vec<Task>,
}

/// Arena of tasks keyed by [`TaskId`].
///
/// Every mutation goes through methods that keep the bucket index in step,
/// so `tasks_in_bucket` never needs a scan.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: BTreeMap<TaskId, Task>,
    buckets: BTreeMap<StatusBucket, BTreeSet<TaskId>>,
    /// Soft-deleted tasks, recoverable until purged.
    deleted: BTreeMap<TaskId, Task>,
    purged: BTreeSet<TaskId>,
    next_id: u32,
}

fn bucket_for(task: &Task) -> StatusBucket {
    if task.is_reservation_like() {
        StatusBucket::Reservation
    } else {
        task.status.bucket()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    /// Add a brand new task: assigns a fresh id, status `Unscheduled`,
    /// no allocations.
    pub fn insert_new(&mut self, mut task: Task) -> TaskId {
        let id = self.allocate_id();
        task.id = id;
        task.status = TaskStatus::Unscheduled;
        task.clear_allocations();
        task.conflicts.clear();
        debug!(task = %id, name = %task.name, kind = %task.kind(), "task created");
        self.index_insert(&task);
        self.tasks.insert(id, task);
        id
    }

    /// Insert a task keeping its id and state (loading from a data source,
    /// undo restores). Ids above the counter advance it.
    pub fn insert_existing(&mut self, task: Task) {
        self.next_id = self.next_id.max(task.id.0 + 1);
        if let Some(old) = self.tasks.remove(&task.id) {
            self.index_remove(&old);
        }
        self.deleted.remove(&task.id);
        self.index_insert(&task);
        self.tasks.insert(task.id, task);
    }

    fn allocate_id(&mut self) -> TaskId {
        let id = TaskId(self.next_id.max(1));
        self.next_id = id.0 + 1;
        id
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn require(&self, id: TaskId) -> Result<&Task> {
        self.tasks.get(&id).ok_or_else(|| self.missing(id))
    }

    fn missing(&self, id: TaskId) -> SchedulerError {
        if self.purged.contains(&id) {
            SchedulerError::TaskPurged(id)
        } else if self.deleted.contains_key(&id) {
            SchedulerError::TaskDeleted(id)
        } else {
            SchedulerError::TaskNotFound(id)
        }
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    /// Mutate one task through a closure, re-indexing afterwards.
    pub fn update<R>(&mut self, id: TaskId, f: impl FnOnce(&mut Task) -> R) -> Result<R> {
        let missing = self.missing(id);
        let Some(mut task) = self.tasks.remove(&id) else {
            return Err(missing);
        };
        self.index_remove(&task);
        let out = f(&mut task);
        task.id = id;
        self.index_insert(&task);
        self.tasks.insert(id, task);
        Ok(out)
    }

    pub fn set_status(&mut self, id: TaskId, status: TaskStatus) -> Result<()> {
        self.update(id, |t| t.status = status)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.tasks.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn tasks_in_bucket(&self, bucket: StatusBucket) -> Vec<&Task> {
        self.buckets
            .get(&bucket)
            .into_iter()
            .flatten()
            .filter_map(|id| self.tasks.get(id))
            .collect()
    }

    pub fn tasks_with_status(&self, status: TaskStatus) -> impl Iterator<Item = &Task> {
        self.tasks.values().filter(move |t| t.status == status)
    }

    /// Live members of a co-scheduling group (empty for group 0).
    pub fn group_members(&self, group: GroupId) -> Vec<TaskId> {
        if group == 0 {
            return Vec::new();
        }
        self.tasks
            .values()
            .filter(|t| t.group == group)
            .map(|t| t.id)
            .collect()
    }

    /// Move a task into the soft-delete bin.
    pub fn soft_delete(&mut self, id: TaskId) -> Result<Task> {
        let missing = self.missing(id);
        let task = self.tasks.remove(&id).ok_or(missing)?;
        self.index_remove(&task);
        self.deleted.insert(id, task.clone());
        debug!(task = %id, "task moved to deleted bin");
        Ok(task)
    }

    /// Bring a task back from the bin, unchanged.
    pub fn undelete(&mut self, id: TaskId) -> Result<()> {
        let task = self
            .deleted
            .remove(&id)
            .ok_or_else(|| self.missing(id))?;
        self.index_insert(&task);
        self.tasks.insert(id, task);
        Ok(())
    }

    /// Remove a task without putting it in the bin (undo of a creation).
    pub fn discard(&mut self, id: TaskId) -> Option<Task> {
        let task = self.tasks.remove(&id)?;
        self.index_remove(&task);
        Some(task)
    }

    pub fn deleted(&self) -> impl Iterator<Item = &Task> {
        self.deleted.values()
    }

    pub fn deleted_task(&self, id: TaskId) -> Option<&Task> {
        self.deleted.get(&id)
    }

    pub fn is_deleted(&self, id: TaskId) -> bool {
        self.deleted.contains_key(&id)
    }

    /// Permanently drop tasks from the bin.
    pub fn purge(&mut self, ids: &[TaskId]) -> Vec<TaskId> {
        let mut purged = Vec::new();
        for id in ids {
            if self.deleted.remove(id).is_some() {
                self.purged.insert(*id);
                purged.push(*id);
            } else {
                warn!(task = %id, "purge requested for task not in deleted bin; ignoring");
            }
        }
        purged
    }

    pub fn is_purged(&self, id: TaskId) -> bool {
        self.purged.contains(&id)
    }

    pub fn state(&self) -> RegistryState {
        RegistryState {
            tasks: self.tasks.values().cloned().collect(),
            deleted: self.deleted.values().cloned().collect(),
        }
    }

    /// Replace live tasks and bin with `state`. Purged ids stay purged.
    pub fn restore_state(&mut self, state: RegistryState) {
        self.tasks.clear();
        self.buckets.clear();
        self.deleted.clear();
        for task in state.tasks {
            if self.purged.contains(&task.id) {
                continue;
            }
            self.insert_existing(task);
        }
        for task in state.deleted {
            if self.purged.contains(&task.id) {
                continue;
            }
            self.next_id = self.next_id.max(task.id.0 + 1);
            self.deleted.insert(task.id, task);
        }
    }

    fn index_insert(&mut self, task: &Task) {
        self.buckets
            .entry(bucket_for(task))
            .or_default()
            .insert(task.id);
    }

    fn index_remove(&mut self, task: &Task) {
        if let Some(set) = self.buckets.get_mut(&bucket_for(task)) {
            set.remove(&task.id);
        }
    }
}

impl PredecessorResolver for TaskRegistry {
    fn resolve(&self, external: &ExternalId) -> Option<TaskId> {
        self.tasks
            .values()
            .find(|t| t.external_id.as_ref() == Some(external))
            .map(|t| t.id)
    }
}
