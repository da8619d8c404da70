#![allow(dead_code)]

use std::collections::BTreeMap;

use arraysched::context::SchedulingContext;
use arraysched::storage::{NodeId, NodeStatus, Partition, PartitionId, StorageNode, StorageSnapshot};
use arraysched::task::{
    AntennaMode, ClockFrequency, DigitalBeam, Direction, DirectionType, FilterBand,
    ObservationSpec, PipelineKind, PipelineSpec, Predecessor, ProductRequirement, StationBlock,
    StokesSettings, Task, TaskId, TaskPayload,
};
use arraysched::time::{Interval, Timestamp};
use arraysched::types::{BitMode, DataProductType, StoragePolicy, TaskStatus};
use chrono::{TimeDelta, TimeZone, Utc};

pub const PROJECT: &str = "TEST";

pub const STATIONS: &[&str] = &["CS001", "CS002", "CS003", "CS004", "CS005", "RS106"];

/// Fixed "now" used by every test context.
pub fn t0() -> Timestamp {
    Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0)
        .single()
        .expect("valid base time")
}

/// `t0()` plus `hours` and `minutes`.
pub fn at(hours: i64, minutes: i64) -> Timestamp {
    t0() + TimeDelta::hours(hours) + TimeDelta::minutes(minutes)
}

pub fn interval(start: Timestamp, minutes: i64) -> Interval {
    Interval::starting_at(start, TimeDelta::minutes(minutes))
}

/// Builder for `SchedulingContext`, defaulting to `now = t0()`, the
/// `STATIONS` array and the `PROJECT` campaign.
pub struct ContextBuilder {
    ctx: SchedulingContext,
}

impl ContextBuilder {
    pub fn new() -> Self {
        let mut ctx = SchedulingContext::new(t0());
        ctx.stations = STATIONS.iter().map(|s| s.to_string()).collect();
        ctx.campaigns = [PROJECT.to_string()].into_iter().collect();
        Self { ctx }
    }

    pub fn now(mut self, now: Timestamp) -> Self {
        self.ctx.now = now;
        self
    }

    pub fn policy(mut self, policy: StoragePolicy) -> Self {
        self.ctx.storage_policy = policy;
        self
    }

    pub fn bandwidth(mut self, kbps: f64) -> Self {
        self.ctx.node_bandwidth_kbps = kbps;
        self
    }

    pub fn min_predecessor_gap(mut self, gap: TimeDelta) -> Self {
        self.ctx.min_predecessor_gap = gap;
        self
    }

    pub fn prefer_for_type(mut self, product: DataProductType, nodes: &[NodeId]) -> Self {
        self.ctx.data_type_preferences.insert(product, nodes.to_vec());
        self
    }

    pub fn prefer_for_project(mut self, project: &str, nodes: &[NodeId]) -> Self {
        self.ctx
            .project_preferences
            .insert(project.to_string(), nodes.to_vec());
        self
    }

    pub fn build(self) -> SchedulingContext {
        self.ctx
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Shorthand for `ContextBuilder::new().build()`.
pub fn context() -> SchedulingContext {
    ContextBuilder::new().build()
}

/// Builder for `StorageSnapshot`.
pub struct SnapshotBuilder {
    nodes: BTreeMap<NodeId, StorageNode>,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
        }
    }

    /// Add an operational node with one partition per entry of
    /// `partitions_kb`, numbered from 0.
    pub fn node(mut self, id: NodeId, partitions_kb: &[u64]) -> Self {
        let partitions = partitions_kb
            .iter()
            .enumerate()
            .map(|(idx, total)| Partition {
                id: idx as PartitionId,
                path: format!("/data{idx}"),
                total_kb: *total,
                used_kb: 0,
                claimed_kb: 0,
            })
            .collect();
        self.nodes.insert(
            id,
            StorageNode {
                id,
                name: format!("node{id:03}"),
                status: NodeStatus::Operational,
                usable: true,
                partitions,
            },
        );
        self
    }

    pub fn used(mut self, id: NodeId, partition: PartitionId, used_kb: u64) -> Self {
        if let Some(part) = self
            .nodes
            .get_mut(&id)
            .and_then(|n| n.partitions.iter_mut().find(|p| p.id == partition))
        {
            part.used_kb = used_kb;
        }
        self
    }

    pub fn status(mut self, id: NodeId, status: NodeStatus) -> Self {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.status = status;
        }
        self
    }

    pub fn build(self) -> StorageSnapshot {
        StorageSnapshot::new(self.nodes.into_values())
    }
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for observation tasks. The defaults pass validation: HBA dual
/// on CS001, 200 MHz with the 110-190 filter, one J2000 beam of 10
/// subbands and one correlated output file.
pub struct ObservationBuilder {
    task: Task,
}

impl ObservationBuilder {
    pub fn new(name: &str) -> Self {
        let spec = ObservationSpec {
            stations: ["CS001".to_string()].into_iter().collect(),
            antenna_mode: Some(AntennaMode::HbaDual),
            clock: Some(ClockFrequency::Mhz200),
            filter: Some(FilterBand::Hba110To190),
            bit_mode: BitMode::Sixteen,
            beams: vec![DigitalBeam {
                subbands: 10,
                duration: None,
                direction: Direction {
                    angle1: 1.2,
                    angle2: 0.7,
                    system: DirectionType::J2000,
                },
                tied_array_beams: 0,
            }],
            stokes: None,
            data_slots: BTreeMap::new(),
        };
        let mut task = Task::new(name, TaskPayload::Observation(spec));
        task.project = PROJECT.to_string();
        task.duration = TimeDelta::hours(1);
        task.storage.insert(
            DataProductType::Correlated,
            ProductRequirement {
                identifications: vec![format!("{name}.uv")],
                file_count: 1,
                file_size_kb: 1_000,
                min_nodes: 0,
                manual_locations: Vec::new(),
            },
        );
        Self { task }
    }

    fn spec(&mut self) -> &mut ObservationSpec {
        match &mut self.task.payload {
            TaskPayload::Observation(obs) => obs,
            _ => unreachable!("observation builder holds an observation"),
        }
    }

    pub fn id(mut self, id: u32) -> Self {
        self.task.id = TaskId(id);
        self
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.task.status = status;
        self
    }

    pub fn project(mut self, project: &str) -> Self {
        self.task.project = project.to_string();
        self
    }

    pub fn stations(mut self, stations: &[&str]) -> Self {
        self.spec().stations = stations.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Schedule at `start` for `minutes`.
    pub fn at(mut self, start: Timestamp, minutes: i64) -> Self {
        self.task.duration = TimeDelta::minutes(minutes);
        self.task.schedule = Some(interval(start, minutes));
        self
    }

    pub fn duration_minutes(mut self, minutes: i64) -> Self {
        self.task.duration = TimeDelta::minutes(minutes);
        self
    }

    pub fn unscheduled_time(mut self) -> Self {
        self.task.schedule = None;
        self
    }

    pub fn bit_mode(mut self, mode: BitMode) -> Self {
        self.spec().bit_mode = mode;
        self
    }

    pub fn subbands(mut self, subbands: u16) -> Self {
        if let Some(beam) = self.spec().beams.first_mut() {
            beam.subbands = subbands;
        }
        self
    }

    pub fn beam(mut self, beam: DigitalBeam) -> Self {
        self.spec().beams.push(beam);
        self
    }

    pub fn filter(mut self, clock: ClockFrequency, filter: FilterBand) -> Self {
        let spec = self.spec();
        spec.clock = Some(clock);
        spec.filter = Some(filter);
        self
    }

    pub fn antenna(mut self, mode: Option<AntennaMode>) -> Self {
        self.spec().antenna_mode = mode;
        self
    }

    pub fn stokes(mut self, stokes: StokesSettings) -> Self {
        self.spec().stokes = Some(stokes);
        self
    }

    /// Replace all outputs with one product of `files` files of `file_kb`.
    pub fn output(mut self, product: DataProductType, files: u32, file_kb: u64) -> Self {
        let name = self.task.name.clone();
        self.task.storage.clear();
        self.task.storage.insert(
            product,
            ProductRequirement {
                identifications: vec![format!("{name}.{product}")],
                file_count: files,
                file_size_kb: file_kb,
                min_nodes: 0,
                manual_locations: Vec::new(),
            },
        );
        self
    }

    pub fn no_output(mut self) -> Self {
        self.task.storage.clear();
        self
    }

    pub fn min_nodes(mut self, min_nodes: u32) -> Self {
        for req in self.task.storage.values_mut() {
            req.min_nodes = min_nodes;
        }
        self
    }

    pub fn manual(mut self, locations: &[(NodeId, PartitionId)]) -> Self {
        self.task.storage_policy = Some(StoragePolicy::Manual);
        for req in self.task.storage.values_mut() {
            req.manual_locations = locations.to_vec();
        }
        self
    }

    pub fn policy(mut self, policy: StoragePolicy) -> Self {
        self.task.storage_policy = Some(policy);
        self
    }

    pub fn group(mut self, group: u32) -> Self {
        self.task.group = group;
        self
    }

    pub fn reservation(mut self, id: TaskId) -> Self {
        self.task.reservation = Some(id);
        self
    }

    pub fn after(mut self, id: TaskId) -> Self {
        self.task.predecessors.push(Predecessor::local(id));
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

/// Builder for pipeline tasks with one correlated output file.
pub struct PipelineBuilder {
    task: Task,
}

impl PipelineBuilder {
    pub fn new(name: &str, kind: PipelineKind) -> Self {
        let spec = PipelineSpec {
            kind,
            inputs: BTreeMap::new(),
            demix: None,
        };
        let mut task = Task::new(name, TaskPayload::Pipeline(spec));
        task.project = PROJECT.to_string();
        task.duration = TimeDelta::hours(1);
        task.storage.insert(
            DataProductType::InstrumentModel,
            ProductRequirement {
                identifications: vec![format!("{name}.inst")],
                file_count: 1,
                file_size_kb: 100,
                min_nodes: 0,
                manual_locations: Vec::new(),
            },
        );
        Self { task }
    }

    pub fn at(mut self, start: Timestamp, minutes: i64) -> Self {
        self.task.duration = TimeDelta::minutes(minutes);
        self.task.schedule = Some(interval(start, minutes));
        self
    }

    pub fn after(mut self, id: TaskId) -> Self {
        self.task.predecessors.push(Predecessor::local(id));
        self
    }

    pub fn input(mut self, product: DataProductType, ident: &str) -> Self {
        if let TaskPayload::Pipeline(spec) = &mut self.task.payload {
            spec.inputs
                .entry(product)
                .or_default()
                .push(ident.to_string());
        }
        self
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.task.status = status;
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

/// A reservation over `stations` at `start` for `minutes`.
pub fn reservation(name: &str, stations: &[&str], start: Timestamp, minutes: i64) -> Task {
    let block = StationBlock {
        stations: stations.iter().map(|s| s.to_string()).collect(),
    };
    let mut task = Task::new(name, TaskPayload::Reservation(block));
    task.duration = TimeDelta::minutes(minutes);
    task.schedule = Some(interval(start, minutes));
    task
}

/// A maintenance block over `stations` at `start` for `minutes`.
pub fn maintenance(name: &str, stations: &[&str], start: Timestamp, minutes: i64) -> Task {
    let block = StationBlock {
        stations: stations.iter().map(|s| s.to_string()).collect(),
    };
    let mut task = Task::new(name, TaskPayload::Maintenance(block));
    task.duration = TimeDelta::minutes(minutes);
    task.schedule = Some(interval(start, minutes));
    task
}
