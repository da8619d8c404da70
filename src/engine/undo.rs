// src/engine/undo.rs

//! Undo/redo stacks.
//!
//! Entries are plain values (owned task snapshots, property values or a
//! serialized schedule), so they stay valid whatever happens to the live
//! tasks afterwards. Applying them is the engine's job; this module only
//! keeps the stacks, limits and the bookkeeping that makes old entries
//! inert for tasks that were purged or externally reported on.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::task::{Task, TaskId, TaskProperty};

/// One reversible change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "kebab-case")]
pub enum UndoEntry {
    /// Whole task before the change; `None` when the change created it.
    TaskSnapshot {
        task_id: TaskId,
        previous: Option<Task>,
    },
    PropertyChange {
        task_id: TaskId,
        previous: TaskProperty,
    },
    /// Serialized tasks and deleted bin before a multi-task change.
    ScheduleSnapshot { state: String },
    /// Tasks as they were before being moved to the bin.
    DeleteBatch { tasks: Vec<Task> },
    /// Tasks brought back from the bin; reverting deletes them again.
    Reinstated { task_ids: Vec<TaskId> },
}

impl UndoEntry {
    /// Tasks this entry refers to by id. Empty for schedule snapshots.
    pub fn task_ids(&self) -> Vec<TaskId> {
        match self {
            UndoEntry::TaskSnapshot { task_id, .. } | UndoEntry::PropertyChange { task_id, .. } => {
                vec![*task_id]
            }
            UndoEntry::ScheduleSnapshot { .. } => Vec::new(),
            UndoEntry::DeleteBatch { tasks } => tasks.iter().map(|t| t.id).collect(),
            UndoEntry::Reinstated { task_ids } => task_ids.clone(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            UndoEntry::TaskSnapshot {
                task_id,
                previous: None,
            } => format!("create {task_id}"),
            UndoEntry::TaskSnapshot { task_id, .. } => format!("edit {task_id}"),
            UndoEntry::PropertyChange { task_id, previous } => {
                format!("change {} of {task_id}", property_name(previous))
            }
            UndoEntry::ScheduleSnapshot { .. } => "schedule change".to_string(),
            UndoEntry::DeleteBatch { tasks } => format!("delete {} task(s)", tasks.len()),
            UndoEntry::Reinstated { task_ids } => format!("reinstate {} task(s)", task_ids.len()),
        }
    }

    fn only_touches(&self, task: TaskId) -> bool {
        match self {
            UndoEntry::TaskSnapshot { task_id, .. } | UndoEntry::PropertyChange { task_id, .. } => {
                *task_id == task
            }
            _ => false,
        }
    }

    /// Drop references to `purged` tasks. Returns false when nothing is
    /// left to apply.
    fn prune(&mut self, purged: &BTreeSet<TaskId>) -> bool {
        match self {
            UndoEntry::TaskSnapshot { task_id, .. } | UndoEntry::PropertyChange { task_id, .. } => {
                !purged.contains(task_id)
            }
            UndoEntry::ScheduleSnapshot { .. } => true,
            UndoEntry::DeleteBatch { tasks } => {
                tasks.retain(|t| !purged.contains(&t.id));
                !tasks.is_empty()
            }
            UndoEntry::Reinstated { task_ids } => {
                task_ids.retain(|id| !purged.contains(id));
                !task_ids.is_empty()
            }
        }
    }
}

fn property_name(p: &TaskProperty) -> &'static str {
    match p {
        TaskProperty::Name(_) => "name",
        TaskProperty::Project(_) => "project",
        TaskProperty::Group(_) => "group",
        TaskProperty::Duration(_) => "duration",
        TaskProperty::Predecessors(_) => "predecessors",
        TaskProperty::Storage(_) => "storage",
        TaskProperty::Reservation(_) => "reservation",
        TaskProperty::StoragePolicy(_) => "storage policy",
    }
}

/// An entry together with its position in the edit history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recorded {
    pub seq: u64,
    pub entry: UndoEntry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UndoDirection {
    Undo,
    Redo,
}

/// What an `undo()`/`redo()` call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedEntry {
    pub direction: UndoDirection,
    pub description: String,
    pub tasks: Vec<TaskId>,
    /// The entry only touched purged or externally reported tasks.
    pub noop: bool,
}

impl fmt::Display for AppliedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.direction {
            UndoDirection::Undo => "undo",
            UndoDirection::Redo => "redo",
        };
        write!(f, "{verb}: {}", self.description)?;
        if self.noop {
            f.write_str(" (no effect)")?;
        }
        Ok(())
    }
}

/// Undo and redo stacks with their settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UndoLog {
    undo: Vec<Recorded>,
    redo: Vec<Recorded>,
    /// Maximum undo depth; `None` is unlimited.
    limit: Option<usize>,
    retain_redo: bool,
    next_seq: u64,
    /// Entries older than the recorded seq leave that task alone.
    pinned: BTreeMap<TaskId, u64>,
}

impl UndoLog {
    pub fn new(limit: Option<usize>, retain_redo: bool) -> Self {
        Self {
            limit,
            retain_redo,
            ..Self::default()
        }
    }

    fn next(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Record a new user edit. Clears the redo stack.
    pub fn push(&mut self, entry: UndoEntry) {
        debug!(entry = %entry.describe(), "undo entry recorded");
        self.redo.clear();
        self.push_undo(entry);
    }

    fn push_undo(&mut self, entry: UndoEntry) {
        let seq = self.next();
        self.undo.push(Recorded { seq, entry });
        if let Some(limit) = self.limit {
            if self.undo.len() > limit {
                let excess = self.undo.len() - limit;
                self.undo.drain(..excess);
            }
        }
    }

    pub fn pop_undo(&mut self) -> Option<Recorded> {
        self.undo.pop()
    }

    pub fn pop_redo(&mut self) -> Option<Recorded> {
        self.redo.pop()
    }

    /// Store the mirror of an undone entry, if redo is retained.
    pub fn mirror_to_redo(&mut self, entry: UndoEntry) {
        if self.retain_redo {
            let seq = self.next();
            self.redo.push(Recorded { seq, entry });
        }
    }

    /// Store the mirror of a redone entry without touching the redo stack.
    pub fn mirror_to_undo(&mut self, entry: UndoEntry) {
        self.push_undo(entry);
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    pub fn entries(&self) -> impl Iterator<Item = &Recorded> {
        self.undo.iter()
    }

    pub fn retains_redo(&self) -> bool {
        self.retain_redo
    }

    /// Remove references to purged tasks from both stacks.
    pub fn prune(&mut self, purged: &[TaskId]) {
        if purged.is_empty() {
            return;
        }
        let purged: BTreeSet<TaskId> = purged.iter().copied().collect();
        self.undo.retain_mut(|r| r.entry.prune(&purged));
        self.redo.retain_mut(|r| r.entry.prune(&purged));
        for id in &purged {
            self.pinned.remove(id);
        }
    }

    /// Make every entry recorded so far inert for `task`.
    pub fn pin(&mut self, task: TaskId) {
        let seq = self.next();
        self.pinned.insert(task, seq);
        self.undo.retain(|r| !r.entry.only_touches(task));
        self.redo.retain(|r| !r.entry.only_touches(task));
    }

    /// Tasks an entry with sequence number `seq` must leave untouched.
    pub fn inert_for(&self, seq: u64) -> BTreeSet<TaskId> {
        self.pinned
            .iter()
            .filter(|(_, pinned_at)| **pinned_at > seq)
            .map(|(id, _)| *id)
            .collect()
    }
}
