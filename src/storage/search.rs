// src/storage/search.rs

//! Demand computation, capacity view and the candidate node search.

use std::collections::BTreeMap;

use chrono::TimeDelta;
use tracing::debug;

use crate::storage::model::{ClaimLedger, StorageClaim, StorageSnapshot};
use crate::storage::{AllocationFailure, NodeId, PartitionId};
use crate::task::{ProductRequirement, StorageLocation, TaskId};
use crate::types::DataProductType;

/// What one data product needs from storage.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductDemand {
    pub product: DataProductType,
    pub files: u32,
    pub file_kb: u64,
    /// Write bandwidth of one file, in kB/s.
    pub file_bandwidth: f64,
    pub min_nodes: u32,
}

impl ProductDemand {
    pub fn new(product: DataProductType, req: &ProductRequirement, duration: TimeDelta) -> Self {
        let secs = duration.num_seconds().max(1) as f64;
        Self {
            product,
            files: req.file_count,
            file_kb: req.file_size_kb,
            file_bandwidth: req.file_size_kb as f64 / secs,
            min_nodes: req.min_nodes,
        }
    }

    pub fn total_kb(&self) -> u64 {
        self.file_kb * u64::from(self.files)
    }

    pub fn total_bandwidth(&self) -> f64 {
        self.file_bandwidth * f64::from(self.files)
    }

    /// Demand of several tasks sharing one placement: summed files, the
    /// largest per-file figures.
    pub fn combined<'a>(parts: impl IntoIterator<Item = &'a ProductDemand>) -> Option<Self> {
        let mut iter = parts.into_iter();
        let mut acc = iter.next()?.clone();
        for d in iter {
            acc.files += d.files;
            acc.file_kb = acc.file_kb.max(d.file_kb);
            acc.file_bandwidth = acc.file_bandwidth.max(d.file_bandwidth);
            acc.min_nodes = acc.min_nodes.max(d.min_nodes);
        }
        Some(acc)
    }

    /// Claim for `loc.files` files of this product.
    pub fn claim(&self, task: TaskId, loc: &StorageLocation) -> StorageClaim {
        StorageClaim {
            task,
            product: self.product,
            node: loc.node,
            partition: loc.partition,
            files: loc.files,
            claimed_kb: self.file_kb * u64::from(loc.files),
            bandwidth_kbps: self.file_bandwidth * f64::from(loc.files),
        }
    }
}

/// Remaining room on one node after live claims.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeCapacity {
    pub node: NodeId,
    /// Free kB per partition, in snapshot order.
    pub partitions: Vec<(PartitionId, u64)>,
    pub bandwidth_free: f64,
}

impl NodeCapacity {
    pub fn free_kb(&self) -> u64 {
        self.partitions.iter().map(|(_, free)| free).sum()
    }

    /// Whole files of `file_kb` that fit on one partition.
    pub fn files_on_partition(free_kb: u64, file_kb: u64) -> u32 {
        if file_kb == 0 {
            return u32::MAX;
        }
        u32::try_from(free_kb / file_kb).unwrap_or(u32::MAX)
    }

    /// Files of this demand the node can take, limited by space and
    /// bandwidth.
    pub fn max_files(&self, demand: &ProductDemand) -> u32 {
        let by_space = self
            .partitions
            .iter()
            .map(|(_, free)| Self::files_on_partition(*free, demand.file_kb))
            .fold(0u32, u32::saturating_add);
        by_space.min(bandwidth_cap(self.bandwidth_free, demand.file_bandwidth))
    }
}

/// Files of `file_bandwidth` kB/s that fit in `budget` kB/s.
pub fn bandwidth_cap(budget: f64, file_bandwidth: f64) -> u32 {
    if file_bandwidth <= 0.0 {
        return u32::MAX;
    }
    let n = (budget / file_bandwidth).floor();
    if n <= 0.0 {
        0
    } else if n >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        n as u32
    }
}

/// Capacity of every node that accepts data, net of live claims.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CapacityView {
    nodes: BTreeMap<NodeId, NodeCapacity>,
    snapshot_empty: bool,
}

impl CapacityView {
    pub fn new(snapshot: &StorageSnapshot, ledger: &ClaimLedger, node_budget_kbps: f64) -> Self {
        let nodes = snapshot
            .nodes()
            .filter(|n| n.accepts_data())
            .map(|n| {
                let partitions = n
                    .partitions
                    .iter()
                    .map(|p| {
                        let free = p.free_kb().saturating_sub(ledger.claimed_kb(n.id, p.id));
                        (p.id, free)
                    })
                    .collect();
                let capacity = NodeCapacity {
                    node: n.id,
                    partitions,
                    bandwidth_free: (node_budget_kbps - ledger.node_bandwidth(n.id)).max(0.0),
                };
                (n.id, capacity)
            })
            .collect();
        Self {
            nodes,
            snapshot_empty: snapshot.is_empty(),
        }
    }

    pub fn snapshot_empty(&self) -> bool {
        self.snapshot_empty
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeCapacity> {
        self.nodes.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeCapacity> {
        self.nodes.values()
    }

    pub fn max_files(&self, id: NodeId, demand: &ProductDemand) -> u32 {
        self.node(id).map(|n| n.max_files(demand)).unwrap_or(0)
    }
}

/// Nodes chosen by a successful search and how many files each may take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOutcome {
    /// Preferred nodes first (in preference order), then extra nodes.
    pub nodes: Vec<NodeId>,
    /// Nodes of `nodes` that came from the preference lists.
    pub preferred: Vec<NodeId>,
    pub files_per_node: u32,
    pub minimum_nodes: u32,
}

/// Minimum number of nodes the total write bandwidth requires.
pub fn minimum_nodes(demand: &ProductDemand, node_budget_kbps: f64) -> u32 {
    let by_bandwidth = if node_budget_kbps > 0.0 {
        (demand.total_bandwidth() / node_budget_kbps).ceil() as u32
    } else {
        u32::MAX
    };
    demand.min_nodes.max(by_bandwidth).max(1)
}

/// Smallest files-per-node in `start..=cap` for which `nodes` can hold all
/// files.
fn smallest_fit(
    demand: &ProductDemand,
    view: &CapacityView,
    nodes: &[NodeId],
    start: u32,
    cap: u32,
) -> Option<u32> {
    let room: Vec<u32> = nodes.iter().map(|n| view.max_files(*n, demand)).collect();
    if room.iter().fold(0u64, |acc, r| acc + u64::from((*r).min(cap))) < u64::from(demand.files) {
        return None;
    }
    (start.max(1)..=cap).find(|fpn| {
        room.iter().map(|r| u64::from((*r).min(*fpn))).sum::<u64>() >= u64::from(demand.files)
    })
}

/// Find the node set and files-per-node for one product demand.
///
/// Preferred candidates are tried alone first; extra nodes are only added
/// when the preferred ones cannot hold the data.
pub fn candidate_search(
    demand: &ProductDemand,
    view: &CapacityView,
    preferred: &[NodeId],
    node_budget_kbps: f64,
) -> Result<SearchOutcome, AllocationFailure> {
    if view.snapshot_empty() {
        return Err(AllocationFailure::NoData);
    }
    if demand.file_bandwidth > node_budget_kbps {
        return Err(AllocationFailure::SingleFileBandwidthTooHigh);
    }

    let minimum = minimum_nodes(demand, node_budget_kbps);
    let candidates: Vec<NodeId> = view
        .nodes()
        .filter(|n| n.max_files(demand) >= 1)
        .map(|n| n.node)
        .collect();
    if (candidates.len() as u64) < u64::from(minimum) {
        debug!(
            product = %demand.product,
            candidates = candidates.len(),
            minimum,
            "too few storage candidates"
        );
        return Err(AllocationFailure::TooFewNodes);
    }

    let preferred_set: Vec<NodeId> = preferred
        .iter()
        .copied()
        .filter(|n| candidates.contains(n))
        .collect();
    let extra: Vec<NodeId> = candidates
        .iter()
        .copied()
        .filter(|n| !preferred_set.contains(n))
        .collect();

    let cap = bandwidth_cap(node_budget_kbps, demand.file_bandwidth).min(demand.files.max(1));
    let start = demand.files.div_ceil(candidates.len().max(1) as u32);

    let mut sets: Vec<Vec<NodeId>> = Vec::new();
    if !preferred_set.is_empty() {
        sets.push(preferred_set.clone());
    }
    sets.push(preferred_set.iter().chain(&extra).copied().collect());

    for nodes in sets {
        if (nodes.len() as u64) < u64::from(minimum) {
            continue;
        }
        if let Some(fpn) = smallest_fit(demand, view, &nodes, start, cap) {
            debug!(
                product = %demand.product,
                nodes = nodes.len(),
                files_per_node = fpn,
                minimum,
                "storage candidates found"
            );
            return Ok(SearchOutcome {
                preferred: nodes
                    .iter()
                    .copied()
                    .filter(|n| preferred_set.contains(n))
                    .collect(),
                nodes,
                files_per_node: fpn,
                minimum_nodes: minimum,
            });
        }
    }

    debug!(product = %demand.product, files = demand.files, "no storage option found");
    Err(AllocationFailure::NoOptions)
}

/// Search restricted to a fixed node list (grouped placement).
pub fn search_within(
    demand: &ProductDemand,
    view: &CapacityView,
    nodes: &[NodeId],
    node_budget_kbps: f64,
) -> Result<SearchOutcome, AllocationFailure> {
    let minimum = minimum_nodes(demand, node_budget_kbps);
    if (nodes.len() as u64) < u64::from(minimum) {
        return Err(AllocationFailure::NoOptions);
    }
    let cap = bandwidth_cap(node_budget_kbps, demand.file_bandwidth).min(demand.files.max(1));
    let start = demand.files.div_ceil(nodes.len().max(1) as u32);
    let fpn = smallest_fit(demand, view, nodes, start, cap).ok_or(AllocationFailure::NoOptions)?;
    Ok(SearchOutcome {
        nodes: nodes.to_vec(),
        preferred: Vec::new(),
        files_per_node: fpn,
        minimum_nodes: minimum,
    })
}
