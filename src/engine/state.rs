// src/engine/state.rs

//! Mutable engine state: the registry and the claim ledger.
//!
//! Edits run against a clone of this struct and are swapped in only on
//! success, which is what makes single requests all-or-nothing.

use tracing::debug;

use crate::context::SchedulingContext;
use crate::dataslot::{DataSlotReport, refresh_data_slots};
use crate::errors::{Result, SchedulerError};
use crate::storage::{ClaimLedger, StorageSnapshot};
use crate::task::{Conflict, PredecessorGraph, PredecessorResolver, TaskId, TaskRegistry};
use crate::types::TaskStatus;

/// Read-only collaborators of an edit.
#[derive(Clone, Copy)]
pub struct Env<'a> {
    pub snapshot: &'a StorageSnapshot,
    /// Caller-supplied resolver; the registry resolves when `None`.
    pub resolver: Option<&'a dyn PredecessorResolver>,
    pub ctx: &'a SchedulingContext,
}

#[derive(Debug, Clone, Default)]
pub struct EngineState {
    pub registry: TaskRegistry,
    pub ledger: ClaimLedger,
}

impl EngineState {
    pub fn new() -> Self {
        Self {
            registry: TaskRegistry::new(),
            ledger: ClaimLedger::new(),
        }
    }

    pub fn resolver<'a>(&'a self, env: &Env<'a>) -> &'a dyn PredecessorResolver {
        match env.resolver {
            Some(r) => r,
            None => &self.registry,
        }
    }

    /// Drop storage claims and data slots of `id`, plus the conflicts
    /// tied to them.
    pub fn release(&mut self, id: TaskId) -> Result<()> {
        let released = self.ledger.release(id);
        if released > 0 {
            debug!(task = %id, claims = released, "storage claims released");
        }
        self.registry.update(id, |t| t.clear_allocations())
    }

    /// Claims are derived data; rebuild them from task locations.
    pub fn rebuild_claims(&mut self) {
        self.ledger = ClaimLedger::from_tasks(self.registry.iter());
    }

    pub fn refresh_data_slots(&mut self) -> DataSlotReport {
        let report = refresh_data_slots(&mut self.registry);
        if !report.failures.is_empty() {
            debug!(failures = report.failures.len(), "data-slot refresh flagged tasks");
        }
        report
    }

    /// Reject predecessor cycles among live tasks.
    pub fn check_acyclic(&self, resolver: Option<&dyn PredecessorResolver>) -> Result<()> {
        let resolver = resolver.unwrap_or(&self.registry);
        let graph = PredecessorGraph::build(self.registry.iter(), resolver);
        match graph.has_cycle() {
            Some(id) => Err(SchedulerError::PredecessorCycle(format!(
                "task {id} depends on itself"
            ))),
            None => Ok(()),
        }
    }

    /// Put a task into `Error`/`Conflict` with the given reasons, releasing
    /// whatever it held.
    pub fn force_status(
        &mut self,
        id: TaskId,
        status: TaskStatus,
        reasons: impl IntoIterator<Item = Conflict>,
    ) -> Result<()> {
        self.release(id)?;
        let reasons: Vec<Conflict> = reasons.into_iter().collect();
        self.registry.update(id, |t| {
            t.status = status;
            t.conflicts.clear();
            t.conflicts.extend(reasons);
        })
    }
}
