// src/engine/report.rs

//! Results of the multi-task operations.

use std::fmt;

use crate::dataslot::DataSlotFailure;
use crate::storage::ProductFailure;
use crate::task::TaskId;
use crate::types::TaskStatus;
use crate::validation::ValidationResult;

/// A task a system pass pushed into `Error` or `Conflict`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForcedStatus {
    pub task: TaskId,
    pub status: TaskStatus,
    pub reason: String,
}

/// Outcome of `assign_resources`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocationReport {
    /// Tasks that received storage in this pass.
    pub allocated: Vec<TaskId>,
    /// Tasks already holding complete allocations.
    pub unchanged: Vec<TaskId>,
    pub forced: Vec<ForcedStatus>,
    pub storage_failures: Vec<ProductFailure>,
    pub dataslot_failures: Vec<(TaskId, DataSlotFailure)>,
}

impl AllocationReport {
    pub fn is_clean(&self) -> bool {
        self.forced.is_empty()
            && self.storage_failures.is_empty()
            && self.dataslot_failures.is_empty()
    }
}

impl fmt::Display for AllocationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "allocated: {}, unchanged: {}",
            self.allocated.len(),
            self.unchanged.len()
        )?;
        for forced in &self.forced {
            writeln!(f, "  {} -> {}: {}", forced.task, forced.status, forced.reason)?;
        }
        for failure in &self.storage_failures {
            writeln!(f, "  storage {failure}")?;
        }
        for (task, failure) in &self.dataslot_failures {
            match failure {
                DataSlotFailure::BitmodeConflict { station, other } => {
                    writeln!(f, "  {task} bit-mode conflict with {other} on {station}")?
                }
                DataSlotFailure::OutOfDataslots { station } => {
                    writeln!(f, "  {task} out of data slots on {station}")?
                }
            }
        }
        Ok(())
    }
}

/// Why a task of a bulk request was left alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkFailure {
    pub task: TaskId,
    pub reason: String,
    pub validation: Option<ValidationResult>,
}

/// Outcome of `request_bulk_status_change`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkReport {
    pub changed: Vec<TaskId>,
    /// Tasks with only a soft warning, skipped because it was not confirmed.
    pub skipped: Vec<(TaskId, ValidationResult)>,
    pub failed: Vec<BulkFailure>,
}
