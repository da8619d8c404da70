// src/storage/distribute.rs

//! Turning a search outcome into concrete partition locations.

use crate::storage::search::{CapacityView, NodeCapacity, ProductDemand, SearchOutcome};
use crate::storage::{AllocationFailure, NodeId, PartitionId};
use crate::task::StorageLocation;
use crate::types::StoragePolicy;

/// Order in which nodes are filled.
///
/// Maximum policies keep the search order, so preferred nodes fill up
/// before extra ones. Minimum policies take the node with the least free
/// space first.
pub fn fill_order(outcome: &SearchOutcome, view: &CapacityView, policy: StoragePolicy) -> Vec<NodeId> {
    let mut nodes = outcome.nodes.clone();
    if !policy.is_maximum() {
        nodes.sort_by_key(|n| (view.node(*n).map(NodeCapacity::free_kb).unwrap_or(0), *n));
    }
    nodes
}

/// Place `files` on one node, splitting over its partitions.
fn split_over_partitions(
    capacity: &NodeCapacity,
    demand: &ProductDemand,
    files: u32,
    policy: StoragePolicy,
) -> Vec<StorageLocation> {
    let mut parts: Vec<(PartitionId, u64)> = capacity.partitions.clone();
    if policy.is_maximum() {
        parts.sort_by_key(|(id, free)| (std::cmp::Reverse(*free), *id));
    } else {
        parts.sort_by_key(|(id, free)| (*free, *id));
    }

    let mut left = files;
    let mut out = Vec::new();
    for (partition, free) in parts {
        if left == 0 {
            break;
        }
        let take = NodeCapacity::files_on_partition(free, demand.file_kb).min(left);
        if take > 0 {
            out.push(StorageLocation {
                node: capacity.node,
                partition,
                files: take,
            });
            left -= take;
        }
    }
    out
}

/// One greedy pass with a per-node file limit. Returns the per-node counts
/// if every file was placed.
fn place_with_limit(
    demand: &ProductDemand,
    view: &CapacityView,
    order: &[NodeId],
    limit: u32,
) -> Option<Vec<(NodeId, u32)>> {
    let mut left = demand.files;
    let mut out = Vec::new();
    for node in order {
        if left == 0 {
            break;
        }
        let take = view.max_files(*node, demand).min(limit).min(left);
        if take > 0 {
            out.push((*node, take));
            left -= take;
        }
    }
    (left == 0).then_some(out)
}

/// Distribute a product over the nodes of `outcome`.
///
/// Nodes are filled in [`fill_order`] up to what each can hold. The
/// per-node limit is only lowered, never below `files_per_node`, when the
/// files would otherwise span fewer than `minimum_nodes` nodes.
pub fn distribute(
    demand: &ProductDemand,
    view: &CapacityView,
    outcome: &SearchOutcome,
    policy: StoragePolicy,
) -> Result<Vec<StorageLocation>, AllocationFailure> {
    let order = fill_order(outcome, view, policy);
    let wanted_nodes = outcome.minimum_nodes.min(demand.files) as usize;

    let ceiling = order
        .iter()
        .map(|n| view.max_files(*n, demand))
        .max()
        .unwrap_or(0)
        .min(demand.files)
        .max(1);
    let floor = outcome.files_per_node.clamp(1, ceiling);

    let per_node = (floor..=ceiling)
        .rev()
        .filter_map(|limit| place_with_limit(demand, view, &order, limit))
        .find(|placed| placed.len() >= wanted_nodes)
        .ok_or(AllocationFailure::NoOptions)?;

    let mut locations = Vec::new();
    for (node, files) in per_node {
        let Some(capacity) = view.node(node) else {
            return Err(AllocationFailure::NoOptions);
        };
        let locs = split_over_partitions(capacity, demand, files, policy);
        if locs.iter().map(|l| l.files).sum::<u32>() != files {
            return Err(AllocationFailure::NoOptions);
        }
        locations.extend(locs);
    }
    locations.sort();
    Ok(locations)
}

/// Check caller-chosen `(node, partition)` pairs and spread the files over
/// them round-robin.
pub fn distribute_manual(
    demand: &ProductDemand,
    view: &CapacityView,
    chosen: &[(NodeId, PartitionId)],
    node_budget_kbps: f64,
) -> Result<Vec<StorageLocation>, AllocationFailure> {
    if view.snapshot_empty() {
        return Err(AllocationFailure::NoData);
    }
    let mut chosen = chosen.to_vec();
    chosen.sort_unstable();
    chosen.dedup();
    let mut nodes: Vec<NodeId> = chosen.iter().map(|(n, _)| *n).collect();
    nodes.sort_unstable();
    nodes.dedup();
    let minimum = crate::storage::search::minimum_nodes(demand, node_budget_kbps);
    if (nodes.len() as u64) < u64::from(minimum) {
        return Err(AllocationFailure::MinimumNodesNotMet);
    }

    // Per-slot room, limited by partition space and node bandwidth.
    let mut room: Vec<(NodeId, PartitionId, u32)> = Vec::new();
    for (node, partition) in &chosen {
        let Some(cap) = view.node(*node) else {
            return Err(AllocationFailure::NoOptions);
        };
        let Some((_, free)) = cap.partitions.iter().find(|(p, _)| p == partition) else {
            return Err(AllocationFailure::NoOptions);
        };
        room.push((*node, *partition, NodeCapacity::files_on_partition(*free, demand.file_kb)));
    }
    let mut node_room: Vec<(NodeId, u32)> = nodes
        .iter()
        .map(|n| (*n, view.max_files(*n, demand)))
        .collect();

    let mut counts = vec![0u32; room.len()];
    let mut left = demand.files;
    while left > 0 {
        let mut progressed = false;
        for (idx, (node, _, slot_room)) in room.iter().enumerate() {
            if left == 0 {
                break;
            }
            let Some(nr) = node_room.iter_mut().find(|(n, _)| n == node) else {
                continue;
            };
            if counts[idx] < *slot_room && nr.1 > 0 {
                counts[idx] += 1;
                nr.1 -= 1;
                left -= 1;
                progressed = true;
            }
        }
        if !progressed {
            return Err(AllocationFailure::NoOptions);
        }
    }

    let mut locations: Vec<StorageLocation> = room
        .iter()
        .zip(counts)
        .filter(|(_, files)| *files > 0)
        .map(|((node, partition, _), files)| StorageLocation {
            node: *node,
            partition: *partition,
            files,
        })
        .collect();
    locations.sort();
    Ok(locations)
}
