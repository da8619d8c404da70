// src/storage/allocator.rs

//! Single-task and grouped allocation, and the all-or-nothing commit.
//!
//! [`allocate`] is pure: it plans on a scratch copy of the ledger and
//! returns an [`AllocationPlan`]. Only [`commit_or_rollback`] touches the
//! real ledger, and only when every product of every task resolved.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::context::SchedulingContext;
use crate::storage::distribute::{distribute, distribute_manual};
use crate::storage::model::{ClaimLedger, StorageClaim, StorageSnapshot};
use crate::storage::search::{CapacityView, ProductDemand, candidate_search, search_within};
use crate::storage::{AllocationFailure, NodeId, PartitionId};
use crate::task::{StorageLocation, Task, TaskId};
use crate::types::{DataProductType, StoragePolicy};

/// One product of one task that could not be placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductFailure {
    pub task: TaskId,
    pub product: DataProductType,
    pub failure: AllocationFailure,
}

impl fmt::Display for ProductFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.task, self.product, self.failure)
    }
}

pub type TaskLocations = BTreeMap<DataProductType, Vec<StorageLocation>>;

/// Outcome of planning an allocation, before anything is committed.
#[derive(Debug, Clone, Default)]
pub struct AllocationPlan {
    pub claims: Vec<StorageClaim>,
    pub locations: BTreeMap<TaskId, TaskLocations>,
    pub failures: Vec<ProductFailure>,
}

impl AllocationPlan {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

struct Planner<'a> {
    snapshot: &'a StorageSnapshot,
    ctx: &'a SchedulingContext,
    scratch: ClaimLedger,
    plan: AllocationPlan,
}

impl Planner<'_> {
    fn view(&self) -> CapacityView {
        CapacityView::new(self.snapshot, &self.scratch, self.ctx.node_bandwidth_kbps)
    }

    fn record(&mut self, task: TaskId, demand: &ProductDemand, locations: Vec<StorageLocation>) {
        let claims: Vec<StorageClaim> = locations.iter().map(|l| demand.claim(task, l)).collect();
        self.scratch.extend(claims.iter().cloned());
        self.plan.claims.extend(claims);
        self.plan
            .locations
            .entry(task)
            .or_default()
            .insert(demand.product, locations);
    }

    fn fail(&mut self, task: TaskId, product: DataProductType, failure: AllocationFailure) {
        debug!(task = %task, product = %product, %failure, "storage allocation failed");
        self.plan.failures.push(ProductFailure {
            task,
            product,
            failure,
        });
    }

    fn place_single(&mut self, task: &Task, demand: &ProductDemand) {
        let policy = task.storage_policy.unwrap_or(self.ctx.storage_policy);
        let view = self.view();
        let budget = self.ctx.node_bandwidth_kbps;

        let result = if policy == StoragePolicy::Manual {
            let chosen = task
                .storage
                .get(&demand.product)
                .map(|r| r.manual_locations.clone())
                .unwrap_or_default();
            distribute_manual(demand, &view, &chosen, budget)
        } else {
            let preferred = self
                .ctx
                .preferred_nodes(policy, demand.product, &task.project);
            candidate_search(demand, &view, &preferred, budget)
                .and_then(|outcome| distribute(demand, &view, &outcome, policy))
        };

        match result {
            Ok(locations) => self.record(task.id, demand, locations),
            Err(failure) => self.fail(task.id, demand.product, failure),
        }
    }

    /// Node list shared by every member of a group for one product.
    ///
    /// The search runs on the combined demand, then keeps only nodes that
    /// each member's own search also found.
    fn group_nodes(
        &self,
        members: &[(&Task, ProductDemand)],
        policy: StoragePolicy,
    ) -> Result<Vec<NodeId>, AllocationFailure> {
        let view = self.view();
        let budget = self.ctx.node_bandwidth_kbps;
        let Some((lead, _)) = members.first() else {
            return Ok(Vec::new());
        };
        let Some(combined) = ProductDemand::combined(members.iter().map(|(_, d)| d)) else {
            return Ok(Vec::new());
        };
        let preferred = self
            .ctx
            .preferred_nodes(policy, combined.product, &lead.project);

        let mut common = candidate_search(&combined, &view, &preferred, budget)?.nodes;
        for (_, demand) in members {
            let own = candidate_search(demand, &view, &preferred, budget)?.nodes;
            common.retain(|n| own.contains(n));
        }
        if common.is_empty() {
            return Err(AllocationFailure::NoOptions);
        }
        Ok(common)
    }

    /// Spread every member round-robin over the same `pairs`.
    ///
    /// Each member has to write to every pair. A member that cannot reports
    /// the nodes it missed so the caller can narrow the list.
    fn shared_placement(
        &self,
        members: &[(&Task, ProductDemand)],
        pairs: &[(NodeId, PartitionId)],
    ) -> Result<Vec<Vec<StorageLocation>>, Shortfall> {
        let budget = self.ctx.node_bandwidth_kbps;
        let mut scratch = self.scratch.clone();
        let mut placements = Vec::with_capacity(members.len());

        for (task, demand) in members {
            let view = CapacityView::new(self.snapshot, &scratch, budget);
            let locations = match distribute_manual(demand, &view, pairs, budget) {
                Ok(locations) => locations,
                Err(failure) => {
                    let full = pairs
                        .iter()
                        .map(|(n, _)| *n)
                        .filter(|n| view.max_files(*n, demand) == 0)
                        .collect();
                    return Err(Shortfall {
                        failure,
                        nodes: full,
                    });
                }
            };

            let missed: Vec<NodeId> = pairs
                .iter()
                .filter(|(n, p)| !locations.iter().any(|l| l.node == *n && l.partition == *p))
                .map(|(n, _)| *n)
                .collect();
            if !missed.is_empty() {
                debug!(task = %task.id, missed = ?missed, "group member cannot share every location");
                return Err(Shortfall {
                    failure: AllocationFailure::NoOptions,
                    nodes: missed,
                });
            }

            scratch.extend(locations.iter().map(|l| demand.claim(task.id, l)));
            placements.push(locations);
        }
        Ok(placements)
    }

    /// Plan the combined demand over `nodes` and share the result, dropping
    /// nodes some member cannot use until everyone fits.
    fn settle_group(
        &self,
        members: &[(&Task, ProductDemand)],
        mut nodes: Vec<NodeId>,
        policy: StoragePolicy,
    ) -> Result<Vec<Vec<StorageLocation>>, AllocationFailure> {
        let budget = self.ctx.node_bandwidth_kbps;
        let combined = ProductDemand::combined(members.iter().map(|(_, d)| d))
            .ok_or(AllocationFailure::NoOptions)?;
        let view = self.view();

        loop {
            let outcome = search_within(&combined, &view, &nodes, budget)?;
            let mut pairs: Vec<(NodeId, PartitionId)> = distribute(&combined, &view, &outcome, policy)?
                .iter()
                .map(|l| (l.node, l.partition))
                .collect();
            pairs.dedup();

            match self.shared_placement(members, &pairs) {
                Ok(placements) => return Ok(placements),
                Err(Shortfall { failure, nodes: missed }) => {
                    if missed.is_empty() {
                        return Err(failure);
                    }
                    nodes.retain(|n| !missed.contains(n));
                }
            }
        }
    }

    fn place_group(&mut self, members: &[&Task], ledger: &ClaimLedger, product: DataProductType) {
        let Some(lead) = members.first() else {
            return;
        };
        let policy = lead.storage_policy.unwrap_or(self.ctx.storage_policy);

        // A member already holding claims for this product fixes the pairs.
        let fixed: Option<Vec<(NodeId, PartitionId)>> = members
            .iter()
            .filter(|t| ledger.holds(t.id))
            .filter_map(|t| t.locations.get(&product))
            .find(|locs| !locs.is_empty())
            .map(|locs| {
                let mut pairs: Vec<(NodeId, PartitionId)> =
                    locs.iter().map(|l| (l.node, l.partition)).collect();
                pairs.sort_unstable();
                pairs.dedup();
                pairs
            });

        let pending: Vec<(&Task, ProductDemand)> = members
            .iter()
            .filter(|t| !(ledger.holds(t.id) && t.locations.contains_key(&product)))
            .filter_map(|t| {
                let req = t.storage.get(&product).filter(|r| r.file_count > 0)?;
                Some((*t, ProductDemand::new(product, req, t.duration)))
            })
            .collect();
        if pending.is_empty() {
            return;
        }

        let placed = match fixed {
            Some(pairs) => self
                .shared_placement(&pending, &pairs)
                .map_err(|shortfall| shortfall.failure),
            None => self
                .group_nodes(&pending, policy)
                .and_then(|nodes| self.settle_group(&pending, nodes, policy)),
        };

        match placed {
            Ok(placements) => {
                for ((task, demand), locations) in pending.iter().zip(placements) {
                    debug!(task = %task.id, product = %product, locations = locations.len(), "group member placed");
                    self.record(task.id, demand, locations);
                }
            }
            Err(failure) => {
                for (task, _) in &pending {
                    self.fail(task.id, product, failure);
                }
            }
        }
    }
}

/// Why a shared group placement did not fit.
struct Shortfall {
    failure: AllocationFailure,
    /// Nodes that should leave the shared list before another attempt.
    nodes: Vec<NodeId>,
}

/// Plan storage for one task or for all members of one group.
///
/// With more than one task, every member writing a product is placed on the
/// same (node, partition) list, or the whole group fails for that product.
/// Nothing is committed here.
pub fn allocate(
    tasks: &[&Task],
    snapshot: &StorageSnapshot,
    ledger: &ClaimLedger,
    ctx: &SchedulingContext,
) -> AllocationPlan {
    let mut planner = Planner {
        snapshot,
        ctx,
        scratch: ledger.clone(),
        plan: AllocationPlan::default(),
    };

    let products: BTreeSet<DataProductType> = tasks
        .iter()
        .flat_map(|t| {
            t.storage
                .iter()
                .filter(|(_, r)| r.file_count > 0)
                .map(|(p, _)| *p)
        })
        .collect();

    for product in products {
        let members: Vec<&Task> = tasks
            .iter()
            .copied()
            .filter(|t| t.storage.get(&product).is_some_and(|r| r.file_count > 0))
            .collect();

        match members.as_slice() {
            [single] => {
                if ledger.holds(single.id) && single.locations.contains_key(&product) {
                    continue;
                }
                let Some(req) = single.storage.get(&product) else {
                    continue;
                };
                let demand = ProductDemand::new(product, req, single.duration);
                planner.place_single(single, &demand);
            }
            _ => planner.place_group(&members, ledger, product),
        }
    }

    planner.plan
}

/// Commit `plan` to `ledger` when every product resolved.
///
/// On any failure the ledger is left as it was and the failures are
/// returned, one per failing product.
pub fn commit_or_rollback(
    ledger: &mut ClaimLedger,
    plan: AllocationPlan,
) -> Result<BTreeMap<TaskId, TaskLocations>, Vec<ProductFailure>> {
    if !plan.is_complete() {
        warn!(
            failures = plan.failures.len(),
            "storage allocation rolled back"
        );
        return Err(plan.failures);
    }
    debug!(claims = plan.claims.len(), "storage claims committed");
    ledger.extend(plan.claims);
    Ok(plan.locations)
}
