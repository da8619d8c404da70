// src/task/graph.rs

//! Predecessor graph over live tasks.

use std::collections::BTreeMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::task::model::{PredecessorRef, Task, TaskId};
use crate::task::registry::PredecessorResolver;

/// Directed graph of predecessor links. Edge direction: predecessor -> task.
///
/// Unresolvable references are left out; they are reported by the
/// validator, not here.
#[derive(Debug, Clone)]
pub struct PredecessorGraph {
    graph: DiGraphMap<TaskId, ()>,
}

impl PredecessorGraph {
    pub fn build<'a>(
        tasks: impl IntoIterator<Item = &'a Task>,
        resolver: &dyn PredecessorResolver,
    ) -> Self {
        let mut graph: DiGraphMap<TaskId, ()> = DiGraphMap::new();
        let mut links: BTreeMap<TaskId, Vec<TaskId>> = BTreeMap::new();

        for task in tasks {
            graph.add_node(task.id);
            let preds = task
                .predecessors
                .iter()
                .filter_map(|p| resolve_ref(&p.reference, resolver))
                .collect();
            links.insert(task.id, preds);
        }

        for (task, preds) in links {
            for pred in preds {
                if graph.contains_node(pred) {
                    graph.add_edge(pred, task, ());
                }
            }
        }

        Self { graph }
    }

    /// Immediate predecessors of a task.
    pub fn predecessors_of(&self, id: TaskId) -> Vec<TaskId> {
        self.graph
            .neighbors_directed(id, petgraph::Direction::Incoming)
            .collect()
    }

    /// Immediate successors (tasks that list `id` as predecessor).
    pub fn successors_of(&self, id: TaskId) -> Vec<TaskId> {
        self.graph
            .neighbors_directed(id, petgraph::Direction::Outgoing)
            .collect()
    }

    /// Tasks ordered so that every predecessor comes before its successors,
    /// or the id of a task on a cycle.
    pub fn topological_order(&self) -> std::result::Result<Vec<TaskId>, TaskId> {
        toposort(&self.graph, None).map_err(|cycle| cycle.node_id())
    }

    pub fn has_cycle(&self) -> Option<TaskId> {
        self.topological_order().err()
    }
}

/// Resolve a predecessor reference to a live task id.
pub fn resolve_ref(reference: &PredecessorRef, resolver: &dyn PredecessorResolver) -> Option<TaskId> {
    match reference {
        PredecessorRef::Local(id) => Some(*id),
        PredecessorRef::External(ext) => resolver.resolve(ext),
    }
}
