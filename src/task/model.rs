// src/task/model.rs

//! Task data model: a common header plus a kind-specific payload.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::dataslot::DataSlotRange;
use crate::storage::{AllocationFailure, NodeId, PartitionId};
use crate::time::{Interval, Timestamp, serde_opt_secs, serde_secs};
use crate::types::{BitMode, DataProductType, StoragePolicy, TaskKind, TaskStatus};
use crate::validation::ValidationKind;

/// Stable task identifier. Never reused within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u32);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub type StationId = String;

/// Co-scheduling group; `0` means "no group".
pub type GroupId = u32;

/// Identifier of a task in an external system (e.g. the proposal database).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExternalId {
    pub namespace: String,
    pub id: u64,
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredecessorRef {
    Local(TaskId),
    External(ExternalId),
}

impl fmt::Display for PredecessorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredecessorRef::Local(id) => write!(f, "{id}"),
            PredecessorRef::External(ext) => write!(f, "{ext}"),
        }
    }
}

/// A predecessor link with the allowed offset window between the
/// predecessor's end and this task's start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Predecessor {
    pub reference: PredecessorRef,
    #[serde(with = "serde_secs")]
    pub min_offset: TimeDelta,
    #[serde(with = "serde_opt_secs", default)]
    pub max_offset: Option<TimeDelta>,
}

impl Predecessor {
    pub fn local(id: TaskId) -> Self {
        Self {
            reference: PredecessorRef::Local(id),
            min_offset: TimeDelta::zero(),
            max_offset: None,
        }
    }
}

/// Storage needs of one data product type.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProductRequirement {
    /// Identification strings under which pipelines find this output.
    #[serde(default)]
    pub identifications: Vec<String>,
    pub file_count: u32,
    pub file_size_kb: u64,
    #[serde(default)]
    pub min_nodes: u32,
    /// Caller-chosen locations, only used with [`StoragePolicy::Manual`].
    #[serde(default)]
    pub manual_locations: Vec<(NodeId, PartitionId)>,
}

impl ProductRequirement {
    pub fn total_kb(&self) -> u64 {
        self.file_size_kb * u64::from(self.file_count)
    }
}

pub type StorageRequirement = BTreeMap<DataProductType, ProductRequirement>;

/// Files of one data product placed on one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StorageLocation {
    pub node: NodeId,
    pub partition: PartitionId,
    pub files: u32,
}

/// One active conflict attached to a task.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "conflict", rename_all = "kebab-case")]
pub enum Conflict {
    StationOverlap { station: StationId, other: TaskId },
    BitmodeConflict { station: StationId, other: TaskId },
    OutOfDataslots { station: StationId },
    Storage {
        product: DataProductType,
        failure: AllocationFailure,
    },
    /// Reason recorded when a system pass forced `Error`/`Conflict`.
    Validation { kind: ValidationKind },
}

impl Conflict {
    pub fn is_dataslot(&self) -> bool {
        matches!(
            self,
            Conflict::BitmodeConflict { .. } | Conflict::OutOfDataslots { .. }
        )
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conflict::StationOverlap { station, other } => {
                write!(f, "station {station} also used by {other}")
            }
            Conflict::BitmodeConflict { station, other } => {
                write!(f, "bit-mode differs from {other} on station {station}")
            }
            Conflict::OutOfDataslots { station } => {
                write!(f, "no data slots left on station {station}")
            }
            Conflict::Storage { product, failure } => {
                write!(f, "storage for {product}: {failure}")
            }
            Conflict::Validation { kind } => write!(f, "validation: {kind:?}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AntennaMode {
    #[serde(rename = "LBA_INNER")]
    LbaInner,
    #[serde(rename = "LBA_OUTER")]
    LbaOuter,
    #[serde(rename = "LBA_SPARSE")]
    LbaSparse,
    #[serde(rename = "HBA_ZERO")]
    HbaZero,
    #[serde(rename = "HBA_ONE")]
    HbaOne,
    #[serde(rename = "HBA_DUAL")]
    HbaDual,
    #[serde(rename = "HBA_JOINED")]
    HbaJoined,
}

impl AntennaMode {
    pub fn is_lba(self) -> bool {
        matches!(
            self,
            AntennaMode::LbaInner | AntennaMode::LbaOuter | AntennaMode::LbaSparse
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClockFrequency {
    #[serde(rename = "160MHz")]
    Mhz160,
    #[serde(rename = "200MHz")]
    Mhz200,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterBand {
    #[serde(rename = "LBA_10_70")]
    Lba10To70,
    #[serde(rename = "LBA_30_70")]
    Lba30To70,
    #[serde(rename = "LBA_10_90")]
    Lba10To90,
    #[serde(rename = "LBA_30_90")]
    Lba30To90,
    #[serde(rename = "HBA_110_190")]
    Hba110To190,
    #[serde(rename = "HBA_170_230")]
    Hba170To230,
    #[serde(rename = "HBA_210_250")]
    Hba210To250,
}

impl FilterBand {
    /// Sampling clock this filter is designed for.
    pub fn clock(self) -> ClockFrequency {
        match self {
            FilterBand::Lba10To70 | FilterBand::Lba30To70 | FilterBand::Hba170To230 => {
                ClockFrequency::Mhz160
            }
            FilterBand::Lba10To90
            | FilterBand::Lba30To90
            | FilterBand::Hba110To190
            | FilterBand::Hba210To250 => ClockFrequency::Mhz200,
        }
    }

    pub fn is_lba(self) -> bool {
        matches!(
            self,
            FilterBand::Lba10To70
                | FilterBand::Lba30To70
                | FilterBand::Lba10To90
                | FilterBand::Lba30To90
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum DirectionType {
    #[default]
    J2000,
    /// Azimuth/elevation, i.e. relative to the station horizon.
    Azel,
    Sun,
    Moon,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Direction {
    pub angle1: f64,
    pub angle2: f64,
    #[serde(default)]
    pub system: DirectionType,
}

/// One digital (station) beam of an observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigitalBeam {
    pub subbands: u16,
    #[serde(with = "serde_opt_secs", default)]
    pub duration: Option<TimeDelta>,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub tied_array_beams: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StokesSettings {
    pub coherent: bool,
    pub incoherent: bool,
    pub channels_per_subband: u16,
    pub time_integration: u16,
    #[serde(default)]
    pub collapse: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ObservationSpec {
    pub stations: BTreeSet<StationId>,
    pub antenna_mode: Option<AntennaMode>,
    pub clock: Option<ClockFrequency>,
    pub filter: Option<FilterBand>,
    #[serde(default)]
    pub bit_mode: BitMode,
    #[serde(default)]
    pub beams: Vec<DigitalBeam>,
    #[serde(default)]
    pub stokes: Option<StokesSettings>,
    /// Assigned data slots per station, owned by the data-slot allocator.
    #[serde(default)]
    pub data_slots: BTreeMap<StationId, Vec<DataSlotRange>>,
}

impl ObservationSpec {
    /// Subbands over all beams, i.e. data slots needed per station.
    pub fn total_subbands(&self) -> u32 {
        self.beams.iter().map(|b| u32::from(b.subbands)).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineKind {
    Calibration,
    Preprocessing,
    Imaging,
    Pulsar,
    LongBaseline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemixSettings {
    pub freq_step: u16,
    pub time_step: u16,
    pub demix_freq_step: u16,
    pub demix_time_step: u16,
    #[serde(default)]
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub kind: PipelineKind,
    /// Identifications of predecessor outputs consumed, per product type.
    #[serde(default)]
    pub inputs: BTreeMap<DataProductType, Vec<String>>,
    #[serde(default)]
    pub demix: Option<DemixSettings>,
}

/// Payload of reservations and maintenance tasks: a block of stations.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StationBlock {
    pub stations: BTreeSet<StationId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TaskPayload {
    Observation(ObservationSpec),
    Pipeline(PipelineSpec),
    Reservation(StationBlock),
    Maintenance(StationBlock),
    System,
}

/// A schedulable unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub external_id: Option<ExternalId>,
    pub status: TaskStatus,
    #[serde(default)]
    pub schedule: Option<Interval>,
    #[serde(with = "serde_secs")]
    pub duration: TimeDelta,
    /// Real end time reported by the control system, if known.
    #[serde(default)]
    pub actual_end: Option<Timestamp>,
    #[serde(default)]
    pub predecessors: Vec<Predecessor>,
    #[serde(default)]
    pub storage: StorageRequirement,
    #[serde(default)]
    pub locations: BTreeMap<DataProductType, Vec<StorageLocation>>,
    #[serde(default)]
    pub conflicts: BTreeSet<Conflict>,
    #[serde(default)]
    pub group: GroupId,
    #[serde(default)]
    pub reservation: Option<TaskId>,
    #[serde(default)]
    pub storage_policy: Option<StoragePolicy>,
    pub payload: TaskPayload,
}

impl Task {
    /// A fresh unscheduled task. The id is assigned by the registry.
    pub fn new(name: impl Into<String>, payload: TaskPayload) -> Self {
        Self {
            id: TaskId(0),
            name: name.into(),
            project: String::new(),
            external_id: None,
            status: TaskStatus::Unscheduled,
            schedule: None,
            duration: TimeDelta::zero(),
            actual_end: None,
            predecessors: Vec::new(),
            storage: StorageRequirement::new(),
            locations: BTreeMap::new(),
            conflicts: BTreeSet::new(),
            group: 0,
            reservation: None,
            storage_policy: None,
            payload,
        }
    }

    pub fn kind(&self) -> TaskKind {
        match self.payload {
            TaskPayload::Observation(_) => TaskKind::Observation,
            TaskPayload::Pipeline(_) => TaskKind::Pipeline,
            TaskPayload::Reservation(_) => TaskKind::Reservation,
            TaskPayload::Maintenance(_) => TaskKind::Maintenance,
            TaskPayload::System => TaskKind::System,
        }
    }

    /// Stations this task occupies; `None` for kinds that never use stations.
    pub fn stations(&self) -> Option<&BTreeSet<StationId>> {
        match &self.payload {
            TaskPayload::Observation(obs) => Some(&obs.stations),
            TaskPayload::Reservation(block) | TaskPayload::Maintenance(block) => {
                Some(&block.stations)
            }
            TaskPayload::Pipeline(_) | TaskPayload::System => None,
        }
    }

    pub fn uses_station(&self, station: &str) -> bool {
        self.stations().is_some_and(|s| s.contains(station))
    }

    pub fn observation(&self) -> Option<&ObservationSpec> {
        match &self.payload {
            TaskPayload::Observation(obs) => Some(obs),
            _ => None,
        }
    }

    pub fn observation_mut(&mut self) -> Option<&mut ObservationSpec> {
        match &mut self.payload {
            TaskPayload::Observation(obs) => Some(obs),
            _ => None,
        }
    }

    pub fn pipeline(&self) -> Option<&PipelineSpec> {
        match &self.payload {
            TaskPayload::Pipeline(p) => Some(p),
            _ => None,
        }
    }

    pub fn is_reservation_like(&self) -> bool {
        matches!(
            self.payload,
            TaskPayload::Reservation(_) | TaskPayload::Maintenance(_)
        )
    }

    /// Whether this task writes output data that needs storage.
    pub fn needs_storage(&self) -> bool {
        matches!(
            self.payload,
            TaskPayload::Observation(_) | TaskPayload::Pipeline(_)
        ) && self.storage.values().any(|p| p.file_count > 0)
    }

    /// Every product with files has locations holding exactly its files.
    pub fn has_complete_storage(&self) -> bool {
        self.storage
            .iter()
            .filter(|(_, req)| req.file_count > 0)
            .all(|(product, req)| {
                self.locations
                    .get(product)
                    .map(|locs| locs.iter().map(|l| l.files).sum::<u32>() == req.file_count)
                    .unwrap_or(false)
            })
    }

    /// Interval the task occupies, if scheduled in time.
    pub fn interval(&self) -> Option<Interval> {
        self.schedule
    }

    /// Identifications of all outputs this task produces.
    pub fn output_identifications(&self) -> impl Iterator<Item = (DataProductType, &str)> {
        self.storage.iter().flat_map(|(product, req)| {
            req.identifications
                .iter()
                .map(move |ident| (*product, ident.as_str()))
        })
    }

    /// Drop storage locations and data slots (allocations only, not status).
    pub fn clear_allocations(&mut self) {
        self.locations.clear();
        if let Some(obs) = self.observation_mut() {
            obs.data_slots.clear();
        }
        self.conflicts
            .retain(|c| !c.is_dataslot() && !matches!(c, Conflict::Storage { .. }));
    }
}

/// A single editable field, used for property edits and their undo entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "kebab-case")]
pub enum TaskProperty {
    Name(String),
    Project(String),
    Group(GroupId),
    #[serde(with = "serde_secs")]
    Duration(TimeDelta),
    Predecessors(Vec<Predecessor>),
    Storage(StorageRequirement),
    Reservation(Option<TaskId>),
    StoragePolicy(Option<StoragePolicy>),
}

impl TaskProperty {
    /// Properties that change what a scheduled task occupies.
    pub fn affects_resources(&self) -> bool {
        !matches!(self, TaskProperty::Name(_) | TaskProperty::Project(_))
    }

    /// Write this value into `task`, returning the value it replaced.
    pub fn apply(self, task: &mut Task) -> TaskProperty {
        match self {
            TaskProperty::Name(v) => TaskProperty::Name(std::mem::replace(&mut task.name, v)),
            TaskProperty::Project(v) => {
                TaskProperty::Project(std::mem::replace(&mut task.project, v))
            }
            TaskProperty::Group(v) => TaskProperty::Group(std::mem::replace(&mut task.group, v)),
            TaskProperty::Duration(v) => {
                let prev = std::mem::replace(&mut task.duration, v);
                if let Some(iv) = task.schedule.as_mut() {
                    iv.end = iv.start + v;
                }
                TaskProperty::Duration(prev)
            }
            TaskProperty::Predecessors(v) => {
                TaskProperty::Predecessors(std::mem::replace(&mut task.predecessors, v))
            }
            TaskProperty::Storage(v) => {
                TaskProperty::Storage(std::mem::replace(&mut task.storage, v))
            }
            TaskProperty::Reservation(v) => {
                TaskProperty::Reservation(std::mem::replace(&mut task.reservation, v))
            }
            TaskProperty::StoragePolicy(v) => {
                TaskProperty::StoragePolicy(std::mem::replace(&mut task.storage_policy, v))
            }
        }
    }
}
