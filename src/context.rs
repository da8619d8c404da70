// src/context.rs

//! Explicit scheduling context passed into every engine operation.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{TimeDelta, Utc};

use crate::storage::NodeId;
use crate::task::StationId;
use crate::time::Timestamp;
use crate::types::{DataProductType, StoragePolicy};

/// Settings and external inputs an edit is evaluated against.
///
/// Nothing in the engine reads global state; callers build one of these
/// (usually from the schedule file) and hand it to each operation.
#[derive(Debug, Clone)]
pub struct SchedulingContext {
    /// "Now" as seen by the caller.
    pub now: Timestamp,
    /// Tasks may not start earlier than `now + min_schedule_gap`.
    pub min_schedule_gap: TimeDelta,
    /// Gap enforced after a predecessor's end, on top of per-link offsets.
    pub min_predecessor_gap: TimeDelta,
    /// Stations known to the array.
    pub stations: BTreeSet<StationId>,
    /// Known campaigns/projects. Empty means "do not check".
    pub campaigns: BTreeSet<String>,
    pub storage_policy: StoragePolicy,
    /// Write bandwidth budget per storage node, in kB/s.
    pub node_bandwidth_kbps: f64,
    pub data_type_preferences: BTreeMap<DataProductType, Vec<NodeId>>,
    pub project_preferences: BTreeMap<String, Vec<NodeId>>,
    /// Sources a demixing pipeline may subtract.
    pub demix_sources: BTreeSet<String>,
}

impl SchedulingContext {
    pub fn new(now: Timestamp) -> Self {
        Self {
            now,
            ..Self::default()
        }
    }

    /// Earliest start time accepted for a newly scheduled task.
    pub fn earliest_start(&self) -> Timestamp {
        self.now + self.min_schedule_gap
    }

    /// Preference-ordered nodes for a product of `project`, de-duplicated.
    ///
    /// The policy decides which list comes first; the other list follows.
    pub fn preferred_nodes(
        &self,
        policy: StoragePolicy,
        product: DataProductType,
        project: &str,
    ) -> Vec<NodeId> {
        let by_type = self
            .data_type_preferences
            .get(&product)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let by_project = self
            .project_preferences
            .get(project)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let (first, second) = if policy.prefers_data_type() {
            (by_type, by_project)
        } else {
            (by_project, by_type)
        };

        let mut out: Vec<NodeId> = Vec::new();
        for node in first.iter().chain(second) {
            if !out.contains(node) {
                out.push(*node);
            }
        }
        out
    }
}

impl Default for SchedulingContext {
    fn default() -> Self {
        Self {
            now: Utc::now(),
            min_schedule_gap: TimeDelta::minutes(3),
            min_predecessor_gap: TimeDelta::zero(),
            stations: BTreeSet::new(),
            campaigns: BTreeSet::new(),
            storage_policy: StoragePolicy::default(),
            node_bandwidth_kbps: 1_000_000.0,
            data_type_preferences: BTreeMap::new(),
            project_preferences: BTreeMap::new(),
            demix_sources: ["CasA", "CygA", "TauA", "HerA", "VirA"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}
