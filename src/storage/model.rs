// src/storage/model.rs

//! Storage snapshot (owned by the caller) and claim ledger (owned by the
//! allocator).

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::storage::search::ProductDemand;
use crate::storage::{NodeId, PartitionId};
use crate::task::{StorageLocation, Task, TaskId};
use crate::types::DataProductType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Operational,
    Maintenance,
    Offline,
}

impl FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "operational" | "ok" => Ok(NodeStatus::Operational),
            "maintenance" => Ok(NodeStatus::Maintenance),
            "offline" | "down" => Ok(NodeStatus::Offline),
            other => Err(format!("invalid node status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub id: PartitionId,
    pub path: String,
    pub total_kb: u64,
    pub used_kb: u64,
    /// Space already claimed by tasks outside this engine.
    #[serde(default)]
    pub claimed_kb: u64,
}

impl Partition {
    pub fn free_kb(&self) -> u64 {
        self.total_kb
            .saturating_sub(self.used_kb)
            .saturating_sub(self.claimed_kb)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageNode {
    pub id: NodeId,
    pub name: String,
    #[serde(default)]
    pub status: NodeStatus,
    #[serde(default = "default_usable")]
    pub usable: bool,
    #[serde(default)]
    pub partitions: Vec<Partition>,
}

fn default_usable() -> bool {
    true
}

impl StorageNode {
    /// Whether the allocator may place anything on this node.
    pub fn accepts_data(&self) -> bool {
        self.usable && self.status == NodeStatus::Operational
    }

    pub fn free_kb(&self) -> u64 {
        self.partitions.iter().map(Partition::free_kb).sum()
    }
}

/// Full node/partition picture, replaced wholesale by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StorageSnapshot {
    nodes: BTreeMap<NodeId, StorageNode>,
}

impl StorageSnapshot {
    pub fn new(nodes: impl IntoIterator<Item = StorageNode>) -> Self {
        Self {
            nodes: nodes.into_iter().map(|n| (n.id, n)).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Option<&StorageNode> {
        self.nodes.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &StorageNode> {
        self.nodes.values()
    }

    pub fn partition(&self, node: NodeId, partition: PartitionId) -> Option<&Partition> {
        self.node(node)?
            .partitions
            .iter()
            .find(|p| p.id == partition)
    }
}

/// Space and bandwidth held by one task's product on one partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageClaim {
    pub task: TaskId,
    pub product: DataProductType,
    pub node: NodeId,
    pub partition: PartitionId,
    pub files: u32,
    pub claimed_kb: u64,
    pub bandwidth_kbps: f64,
}

/// Live claims of all tasks holding storage.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClaimLedger {
    claims: Vec<StorageClaim>,
}

impl ClaimLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild claims from the locations of resource-holding tasks.
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let mut ledger = Self::new();
        for task in tasks {
            if task.status.occupies_resources() {
                ledger.claims.extend(claims_from_locations(task));
            }
        }
        ledger
    }

    pub fn iter(&self) -> impl Iterator<Item = &StorageClaim> {
        self.claims.iter()
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    pub fn claims_for(&self, task: TaskId) -> impl Iterator<Item = &StorageClaim> {
        self.claims.iter().filter(move |c| c.task == task)
    }

    pub fn holds(&self, task: TaskId) -> bool {
        self.claims.iter().any(|c| c.task == task)
    }

    pub fn claimed_kb(&self, node: NodeId, partition: PartitionId) -> u64 {
        self.claims
            .iter()
            .filter(|c| c.node == node && c.partition == partition)
            .map(|c| c.claimed_kb)
            .sum()
    }

    pub fn node_bandwidth(&self, node: NodeId) -> f64 {
        self.claims
            .iter()
            .filter(|c| c.node == node)
            .map(|c| c.bandwidth_kbps)
            .sum()
    }

    pub fn extend(&mut self, claims: impl IntoIterator<Item = StorageClaim>) {
        self.claims.extend(claims);
    }

    /// Drop every claim of `task`; returns how many were removed.
    pub fn release(&mut self, task: TaskId) -> usize {
        let before = self.claims.len();
        self.claims.retain(|c| c.task != task);
        before - self.claims.len()
    }

    /// Locations per product for `task`, as stored on the task itself.
    pub fn locations_for(&self, task: TaskId) -> BTreeMap<DataProductType, Vec<StorageLocation>> {
        let mut out: BTreeMap<DataProductType, Vec<StorageLocation>> = BTreeMap::new();
        for c in self.claims_for(task) {
            out.entry(c.product).or_default().push(StorageLocation {
                node: c.node,
                partition: c.partition,
                files: c.files,
            });
        }
        for locs in out.values_mut() {
            locs.sort();
        }
        out
    }
}

/// Claims implied by the locations stored on `task`.
pub fn claims_from_locations(task: &Task) -> Vec<StorageClaim> {
    let mut out = Vec::new();
    for (product, locations) in &task.locations {
        let Some(req) = task.storage.get(product) else {
            continue;
        };
        let demand = ProductDemand::new(*product, req, task.duration);
        out.extend(locations.iter().map(|loc| demand.claim(task.id, loc)));
    }
    out
}
