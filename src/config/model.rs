// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::context::SchedulingContext;
use crate::engine::EngineOptions;
use crate::storage::{NodeId, PartitionId, StorageSnapshot};
use crate::task::{AntennaMode, ClockFrequency, DirectionType, FilterBand, PipelineKind, Task, TaskId};
use crate::types::{BitMode, StoragePolicy};

/// Schedule file as read from TOML, before any checking.
///
/// ```toml
/// stations = ["CS001", "CS002"]
/// campaigns = ["LC1_001"]
///
/// [settings]
/// min_schedule_gap = "3m"
/// node_bandwidth_kbps = 1000000.0
/// storage_policy = "minimum-data-type"
///
/// [storage.locus001]
/// id = 1
/// [[storage.locus001.partition]]
/// id = 0
/// path = "/data"
/// total_kb = 100000000
/// used_kb = 0
///
/// [task.obs1]
/// type = "observation"
/// project = "LC1_001"
/// start = "2026-03-01T10:00:00Z"
/// duration = "1h"
/// stations = ["CS001"]
/// ```
///
/// All sections are optional apart from `stations` and at least one task.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub settings: RawSettings,

    #[serde(default)]
    pub stations: Vec<String>,

    #[serde(default)]
    pub campaigns: Vec<String>,

    #[serde(default)]
    pub preferences: RawPreferences,

    /// Storage nodes keyed by node name.
    #[serde(default)]
    pub storage: BTreeMap<String, RawStorageNode>,

    /// Tasks keyed by task name.
    #[serde(default)]
    pub task: BTreeMap<String, RawTaskConfig>,
}

/// `[settings]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RawSettings {
    /// Duration string, e.g. `"3m"`.
    #[serde(default = "default_min_schedule_gap")]
    pub min_schedule_gap: String,

    #[serde(default = "default_min_predecessor_gap")]
    pub min_predecessor_gap: String,

    #[serde(default = "default_node_bandwidth")]
    pub node_bandwidth_kbps: f64,

    #[serde(default)]
    pub storage_policy: StoragePolicy,

    #[serde(default = "default_retain_redo")]
    pub retain_redo: bool,

    #[serde(default)]
    pub undo_limit: Option<usize>,

    /// RFC 3339 timestamp used instead of the wall clock.
    #[serde(default)]
    pub now: Option<String>,

    #[serde(default)]
    pub demix_sources: Option<Vec<String>>,
}

fn default_min_schedule_gap() -> String {
    "3m".to_string()
}

fn default_min_predecessor_gap() -> String {
    "0s".to_string()
}

fn default_node_bandwidth() -> f64 {
    1_000_000.0
}

fn default_retain_redo() -> bool {
    true
}

impl Default for RawSettings {
    fn default() -> Self {
        Self {
            min_schedule_gap: default_min_schedule_gap(),
            min_predecessor_gap: default_min_predecessor_gap(),
            node_bandwidth_kbps: default_node_bandwidth(),
            storage_policy: StoragePolicy::default(),
            retain_redo: default_retain_redo(),
            undo_limit: None,
            now: None,
            demix_sources: None,
        }
    }
}

/// `[preferences.data_type]` and `[preferences.project]` node lists.
///
/// Lists hold storage node names.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawPreferences {
    #[serde(default)]
    pub data_type: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub project: BTreeMap<String, Vec<String>>,
}

/// `[storage.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RawStorageNode {
    pub id: NodeId,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default = "default_usable")]
    pub usable: bool,
    #[serde(default)]
    pub partition: Vec<RawPartition>,
}

fn default_usable() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPartition {
    pub id: PartitionId,
    #[serde(default)]
    pub path: String,
    pub total_kb: u64,
    #[serde(default)]
    pub used_kb: u64,
    #[serde(default)]
    pub claimed_kb: u64,
}

/// Either a bare task name or a table with offsets.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawPredecessor {
    Name(String),
    Link {
        task: String,
        #[serde(default)]
        min_offset: Option<String>,
        #[serde(default)]
        max_offset: Option<String>,
    },
}

impl RawPredecessor {
    pub fn task(&self) -> &str {
        match self {
            RawPredecessor::Name(name) => name,
            RawPredecessor::Link { task, .. } => task,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RawTaskType {
    Observation,
    Pipeline,
    Reservation,
    Maintenance,
    System,
}

/// `[[task.<name>.beam]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct RawBeam {
    pub subbands: u16,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub angle1: f64,
    #[serde(default)]
    pub angle2: f64,
    #[serde(default)]
    pub direction_type: DirectionType,
    #[serde(default)]
    pub tied_array_beams: u16,
}

/// `[task.<name>.output.<data type>]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct RawOutput {
    pub files: u32,
    pub file_size_kb: u64,
    #[serde(default)]
    pub min_nodes: u32,
    #[serde(default)]
    pub identifications: Vec<String>,
    /// `[node name, partition id]` pairs, used with the manual policy.
    #[serde(default)]
    pub manual_locations: Vec<(String, PartitionId)>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawStokes {
    #[serde(default)]
    pub coherent: bool,
    #[serde(default)]
    pub incoherent: bool,
    #[serde(default = "default_channels")]
    pub channels_per_subband: u16,
    #[serde(default = "default_integration")]
    pub time_integration: u16,
    #[serde(default)]
    pub collapse: bool,
}

fn default_channels() -> u16 {
    16
}

fn default_integration() -> u16 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawDemix {
    pub freq_step: u16,
    pub time_step: u16,
    pub demix_freq_step: u16,
    pub demix_time_step: u16,
    #[serde(default)]
    pub sources: Vec<String>,
}

/// `[task.<name>]` section. Which fields matter depends on `type`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTaskConfig {
    #[serde(rename = "type")]
    pub kind: RawTaskType,

    #[serde(default)]
    pub project: String,

    /// Status the task is loaded in; `unscheduled` when absent.
    #[serde(default)]
    pub status: Option<String>,

    /// RFC 3339 start time.
    #[serde(default)]
    pub start: Option<String>,

    #[serde(default)]
    pub duration: Option<String>,

    #[serde(default)]
    pub after: Vec<RawPredecessor>,

    #[serde(default)]
    pub group: u32,

    /// Name of the reservation this task runs in.
    #[serde(default)]
    pub reservation: Option<String>,

    #[serde(default)]
    pub storage_policy: Option<StoragePolicy>,

    #[serde(default)]
    pub stations: Vec<String>,

    // Observation settings.
    #[serde(default)]
    pub antenna_mode: Option<AntennaMode>,
    #[serde(default)]
    pub clock: Option<ClockFrequency>,
    #[serde(default)]
    pub filter: Option<FilterBand>,
    #[serde(default)]
    pub bit_mode: Option<BitMode>,
    #[serde(default)]
    pub beam: Vec<RawBeam>,
    #[serde(default)]
    pub stokes: Option<RawStokes>,

    // Pipeline settings.
    #[serde(default)]
    pub pipeline: Option<PipelineKind>,
    /// Consumed output identifications per data product type.
    #[serde(default)]
    pub inputs: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub demix: Option<RawDemix>,

    #[serde(default)]
    pub output: BTreeMap<String, RawOutput>,
}

/// Checked schedule file, ready to build an engine from.
///
/// Only constructible through `TryFrom<RawConfigFile>` (see
/// `config::validate`).
#[derive(Debug, Clone)]
pub struct ScheduleFile {
    pub context: SchedulingContext,
    pub options: EngineOptions,
    pub snapshot: StorageSnapshot,
    pub tasks: Vec<Task>,
    /// Task name to the id it was loaded under.
    pub names: BTreeMap<String, TaskId>,
    /// Storage node name to id.
    pub nodes: BTreeMap<String, NodeId>,
}

impl ScheduleFile {
    pub(crate) fn new_unchecked(
        context: SchedulingContext,
        options: EngineOptions,
        snapshot: StorageSnapshot,
        tasks: Vec<Task>,
        names: BTreeMap<String, TaskId>,
        nodes: BTreeMap<String, NodeId>,
    ) -> Self {
        Self {
            context,
            options,
            snapshot,
            tasks,
            names,
            nodes,
        }
    }

    pub fn task_id(&self, name: &str) -> Option<TaskId> {
        self.names.get(name).copied()
    }

    pub fn task_name(&self, id: TaskId) -> Option<&str> {
        self.names
            .iter()
            .find(|(_, v)| **v == id)
            .map(|(k, _)| k.as_str())
    }
}
