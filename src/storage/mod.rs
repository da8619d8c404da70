// src/storage/mod.rs

//! Storage node/partition allocation.
//!
//! - [`model`]: the externally supplied snapshot and the claim ledger the
//!   allocator owns on top of it.
//! - [`search`]: per-product demand, capacity view and `candidate_search`.
//! - [`distribute`]: turning a search outcome into partition locations.
//! - [`allocator`]: single-task, grouped and manual allocation plus
//!   `commit_or_rollback`.
//!
//! The snapshot itself is never mutated here; allocations only ever add or
//! remove [`StorageClaim`]s.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod allocator;
pub mod distribute;
pub mod model;
pub mod search;

pub use allocator::{AllocationPlan, ProductFailure, allocate, commit_or_rollback};
pub use model::{ClaimLedger, NodeStatus, Partition, StorageClaim, StorageNode, StorageSnapshot};
pub use search::{CapacityView, NodeCapacity, ProductDemand, SearchOutcome, candidate_search};

pub type NodeId = u32;
pub type PartitionId = u32;

/// Why one data product of a task could not be placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AllocationFailure {
    /// Fewer usable nodes than the minimum the demand needs.
    TooFewNodes,
    /// No combination of candidate nodes can hold the files.
    NoOptions,
    /// One file alone needs more bandwidth than a node can write.
    SingleFileBandwidthTooHigh,
    /// Manually chosen locations span fewer nodes than required.
    MinimumNodesNotMet,
    /// No storage snapshot is available.
    NoData,
}

impl fmt::Display for AllocationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AllocationFailure::TooFewNodes => "too few storage nodes available",
            AllocationFailure::NoOptions => "no storage node combination can hold the data",
            AllocationFailure::SingleFileBandwidthTooHigh => {
                "a single file exceeds the per-node write bandwidth"
            }
            AllocationFailure::MinimumNodesNotMet => {
                "selected locations span fewer nodes than required"
            }
            AllocationFailure::NoData => "no storage node information available",
        };
        f.write_str(s)
    }
}
