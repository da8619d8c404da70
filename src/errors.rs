// src/errors.rs

//! Crate-wide error type and `Result` alias.

use thiserror::Error;

use crate::conflict::ConflictList;
use crate::storage::ProductFailure;
use crate::task::{PredecessorRef, TaskId};
use crate::types::TaskStatus;
use crate::validation::ValidationResult;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Task {0} is in the deleted bin")]
    TaskDeleted(TaskId),

    #[error("Task {0} has been purged")]
    TaskPurged(TaskId),

    #[error("Predecessor {reference} of {task} not found")]
    PredecessorNotFound {
        task: TaskId,
        reference: PredecessorRef,
    },

    #[error("Cycle detected in predecessors: {0}")]
    PredecessorCycle(String),

    #[error("Group {group} is inconsistent: {reason}")]
    GroupInconsistent { group: u32, reason: String },

    #[error("Task {task} cannot be edited while {status}")]
    TaskNotEditable { task: TaskId, status: TaskStatus },

    #[error("Illegal transition for {task}: {from} -> {to}")]
    IllegalTransition {
        task: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Validation failed for {task}: {result}")]
    Validation {
        task: TaskId,
        result: ValidationResult,
    },

    #[error("Storage allocation failed for {task}: {}", format_failures(.failures))]
    Allocation {
        task: TaskId,
        failures: Vec<ProductFailure>,
    },

    #[error("{} station conflict(s), first: {}", .0.len(), .0.first().map(|c| c.to_string()).unwrap_or_default())]
    StationConflicts(ConflictList),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn format_failures(failures: &[ProductFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl SchedulerError {
    /// The validation result carried by a refused status change, if any.
    pub fn validation(&self) -> Option<&ValidationResult> {
        match self {
            SchedulerError::Validation { result, .. } => Some(result),
            _ => None,
        }
    }

    /// Structural failures abort an operation whatever its scope.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            SchedulerError::TaskNotFound(_)
                | SchedulerError::TaskDeleted(_)
                | SchedulerError::TaskPurged(_)
                | SchedulerError::PredecessorNotFound { .. }
                | SchedulerError::PredecessorCycle(_)
                | SchedulerError::GroupInconsistent { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
