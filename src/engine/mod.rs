// src/engine/mod.rs

//! Scheduling engine.
//!
//! This module ties together:
//! - the task status state machine and its allocation side effects
//!   ([`transition`])
//! - the undo/redo log ([`undo`])
//! - the `ScheduleEngine` facade the presentation layer talks to
//!   ([`core`])
//!
//! Everything here is synchronous: one edit is fully validated, allocated
//! and recorded before the next one is accepted.

use crate::task::TaskId;
use crate::time::Timestamp;

pub mod core;
pub mod report;
pub mod state;
pub mod transition;
pub mod undo;

pub use core::ScheduleEngine;
pub use report::{AllocationReport, BulkFailure, BulkReport, ForcedStatus};
pub use undo::{AppliedEntry, UndoDirection, UndoEntry, UndoLog};

/// Which tasks `assign_resources` looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationScope {
    Task(TaskId),
    /// Every `PreScheduled` and `Scheduled` task.
    AllScheduled,
}

/// New start time for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Move {
    pub task: TaskId,
    pub start: Timestamp,
}

/// Undo log settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Maximum number of undo entries kept; `None` keeps all.
    pub undo_limit: Option<usize>,
    /// Keep undone entries so they can be redone.
    pub retain_redo: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            undo_limit: None,
            retain_redo: true,
        }
    }
}
