// src/config/validate.rs

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{
    RawConfigFile, RawOutput, RawPredecessor, RawSettings, RawStorageNode, RawTaskConfig,
    RawTaskType, ScheduleFile,
};
use crate::context::SchedulingContext;
use crate::engine::EngineOptions;
use crate::errors::{Result, SchedulerError};
use crate::storage::{NodeId, NodeStatus, Partition, StorageNode, StorageSnapshot};
use crate::task::{
    DemixSettings, DigitalBeam, Direction, ObservationSpec, PipelineSpec, Predecessor,
    ProductRequirement, StationBlock, StokesSettings, StorageRequirement, Task,
    TaskId, TaskPayload,
};
use crate::time::{Interval, Timestamp, parse_duration};
use crate::types::{DataProductType, TaskStatus};

impl TryFrom<RawConfigFile> for ScheduleFile {
    type Error = SchedulerError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;

        let nodes: BTreeMap<String, NodeId> = raw
            .storage
            .iter()
            .map(|(name, node)| (name.clone(), node.id))
            .collect();
        let names: BTreeMap<String, TaskId> = raw
            .task
            .keys()
            .enumerate()
            .map(|(idx, name)| (name.clone(), TaskId(idx as u32 + 1)))
            .collect();

        let context = build_context(&raw, &nodes)?;
        let options = EngineOptions {
            undo_limit: raw.settings.undo_limit,
            retain_redo: raw.settings.retain_redo,
        };
        let snapshot = build_snapshot(&raw.storage)?;

        let mut tasks = Vec::with_capacity(raw.task.len());
        for (name, task) in raw.task.iter() {
            tasks.push(build_task(name, task, &names, &nodes)?);
        }

        Ok(ScheduleFile::new_unchecked(
            context, options, snapshot, tasks, names, nodes,
        ))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    ensure_has_stations(cfg)?;
    validate_settings(&cfg.settings)?;
    validate_storage(cfg)?;
    validate_preferences(cfg)?;
    validate_task_references(cfg)?;
    validate_predecessor_graph(cfg)?;
    Ok(())
}

fn config_error(msg: impl Into<String>) -> SchedulerError {
    SchedulerError::ConfigError(msg.into())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(config_error(
            "schedule must contain at least one [task.<name>] section",
        ));
    }
    Ok(())
}

fn ensure_has_stations(cfg: &RawConfigFile) -> Result<()> {
    if cfg.stations.is_empty() {
        return Err(config_error("schedule must list at least one station"));
    }
    Ok(())
}

fn validate_settings(settings: &RawSettings) -> Result<()> {
    duration_field("[settings].min_schedule_gap", &settings.min_schedule_gap)?;
    duration_field("[settings].min_predecessor_gap", &settings.min_predecessor_gap)?;

    if settings.node_bandwidth_kbps.is_nan() || settings.node_bandwidth_kbps <= 0.0 {
        return Err(config_error(format!(
            "[settings].node_bandwidth_kbps must be > 0 (got {})",
            settings.node_bandwidth_kbps
        )));
    }
    if settings.undo_limit == Some(0) {
        return Err(config_error("[settings].undo_limit must be >= 1 (got 0)"));
    }
    if let Some(now) = settings.now.as_deref() {
        timestamp_field("[settings].now", now)?;
    }
    Ok(())
}

fn validate_storage(cfg: &RawConfigFile) -> Result<()> {
    let mut seen_ids: BTreeMap<NodeId, &str> = BTreeMap::new();
    for (name, node) in cfg.storage.iter() {
        if let Some(other) = seen_ids.insert(node.id, name.as_str()) {
            return Err(config_error(format!(
                "storage nodes '{other}' and '{name}' share id {}",
                node.id
            )));
        }
        if let Some(status) = node.status.as_deref() {
            NodeStatus::from_str(status)
                .map_err(|e| config_error(format!("[storage.{name}].status: {e}")))?;
        }

        let mut partitions = BTreeSet::new();
        for part in node.partition.iter() {
            if !partitions.insert(part.id) {
                return Err(config_error(format!(
                    "storage node '{name}' lists partition {} twice",
                    part.id
                )));
            }
            if part.used_kb > part.total_kb {
                return Err(config_error(format!(
                    "storage node '{name}' partition {}: used_kb exceeds total_kb",
                    part.id
                )));
            }
        }
    }
    Ok(())
}

fn validate_preferences(cfg: &RawConfigFile) -> Result<()> {
    for (product, nodes) in cfg.preferences.data_type.iter() {
        DataProductType::from_str(product)
            .map_err(|e| config_error(format!("[preferences.data_type]: {e}")))?;
        for node in nodes {
            ensure_known_node(cfg, node, &format!("[preferences.data_type].{product}"))?;
        }
    }
    for (project, nodes) in cfg.preferences.project.iter() {
        for node in nodes {
            ensure_known_node(cfg, node, &format!("[preferences.project].{project}"))?;
        }
    }
    Ok(())
}

fn ensure_known_node(cfg: &RawConfigFile, node: &str, field: &str) -> Result<()> {
    if !cfg.storage.contains_key(node) {
        return Err(config_error(format!(
            "{field} refers to unknown storage node '{node}'"
        )));
    }
    Ok(())
}

fn validate_task_references(cfg: &RawConfigFile) -> Result<()> {
    for (name, task) in cfg.task.iter() {
        for dep in task.after.iter().map(RawPredecessor::task) {
            if !cfg.task.contains_key(dep) {
                return Err(config_error(format!(
                    "task '{name}' has unknown predecessor '{dep}' in `after`"
                )));
            }
            if dep == name {
                return Err(config_error(format!(
                    "task '{name}' cannot depend on itself in `after`"
                )));
            }
        }

        if let Some(res) = task.reservation.as_deref() {
            let is_reservation = cfg
                .task
                .get(res)
                .is_some_and(|t| t.kind == RawTaskType::Reservation);
            if !is_reservation {
                return Err(config_error(format!(
                    "task '{name}' refers to '{res}', which is not a reservation"
                )));
            }
        }

        if task.kind == RawTaskType::Pipeline && task.pipeline.is_none() {
            return Err(config_error(format!(
                "pipeline task '{name}' needs a `pipeline` kind"
            )));
        }

        for (product, output) in task.output.iter() {
            DataProductType::from_str(product)
                .map_err(|e| config_error(format!("[task.{name}.output]: {e}")))?;
            for (node, _) in output.manual_locations.iter() {
                ensure_known_node(cfg, node, &format!("[task.{name}.output.{product}]"))?;
            }
        }
        for product in task.inputs.keys() {
            DataProductType::from_str(product)
                .map_err(|e| config_error(format!("[task.{name}].inputs: {e}")))?;
        }
    }
    Ok(())
}

fn validate_predecessor_graph(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: predecessor -> task.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.task.keys() {
        graph.add_node(name.as_str());
    }

    for (name, task) in cfg.task.iter() {
        for dep in task.after.iter() {
            graph.add_edge(dep.task(), name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(SchedulerError::PredecessorCycle(format!(
            "cycle detected in predecessors involving task '{}'",
            cycle.node_id()
        ))),
    }
}

fn duration_field(field: &str, value: &str) -> Result<TimeDelta> {
    parse_duration(value)
        .ok_or_else(|| config_error(format!("{field}: invalid duration '{value}'")))
}

fn timestamp_field(field: &str, value: &str) -> Result<Timestamp> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| config_error(format!("{field}: invalid timestamp '{value}': {e}")))
}

fn build_context(cfg: &RawConfigFile, nodes: &BTreeMap<String, NodeId>) -> Result<SchedulingContext> {
    let settings = &cfg.settings;
    let mut ctx = match settings.now.as_deref() {
        Some(now) => SchedulingContext::new(timestamp_field("[settings].now", now)?),
        None => SchedulingContext::default(),
    };

    ctx.min_schedule_gap = duration_field("[settings].min_schedule_gap", &settings.min_schedule_gap)?;
    ctx.min_predecessor_gap =
        duration_field("[settings].min_predecessor_gap", &settings.min_predecessor_gap)?;
    ctx.stations = cfg.stations.iter().cloned().collect();
    ctx.campaigns = cfg.campaigns.iter().cloned().collect();
    ctx.storage_policy = settings.storage_policy;
    ctx.node_bandwidth_kbps = settings.node_bandwidth_kbps;
    if let Some(sources) = settings.demix_sources.as_ref() {
        ctx.demix_sources = sources.iter().cloned().collect();
    }

    let node_ids = |list: &[String]| -> Vec<NodeId> {
        list.iter().filter_map(|n| nodes.get(n).copied()).collect()
    };
    for (product, list) in cfg.preferences.data_type.iter() {
        let product = DataProductType::from_str(product).map_err(config_error)?;
        ctx.data_type_preferences.insert(product, node_ids(list));
    }
    for (project, list) in cfg.preferences.project.iter() {
        ctx.project_preferences.insert(project.clone(), node_ids(list));
    }

    Ok(ctx)
}

fn build_snapshot(storage: &BTreeMap<String, RawStorageNode>) -> Result<StorageSnapshot> {
    let mut nodes = Vec::with_capacity(storage.len());
    for (name, raw) in storage.iter() {
        let status = match raw.status.as_deref() {
            Some(s) => NodeStatus::from_str(s).map_err(config_error)?,
            None => NodeStatus::default(),
        };
        nodes.push(StorageNode {
            id: raw.id,
            name: name.clone(),
            status,
            usable: raw.usable,
            partitions: raw
                .partition
                .iter()
                .map(|p| Partition {
                    id: p.id,
                    path: p.path.clone(),
                    total_kb: p.total_kb,
                    used_kb: p.used_kb,
                    claimed_kb: p.claimed_kb,
                })
                .collect(),
        });
    }
    Ok(StorageSnapshot::new(nodes))
}

fn build_task(
    name: &str,
    raw: &RawTaskConfig,
    names: &BTreeMap<String, TaskId>,
    nodes: &BTreeMap<String, NodeId>,
) -> Result<Task> {
    let field = |f: &str| format!("[task.{name}].{f}");

    let mut task = Task::new(name, build_payload(name, raw)?);
    task.id = names
        .get(name)
        .copied()
        .ok_or_else(|| config_error(format!("task '{name}' has no id")))?;
    task.project = raw.project.clone();
    task.group = raw.group;
    task.storage_policy = raw.storage_policy;

    if let Some(status) = raw.status.as_deref() {
        task.status = TaskStatus::from_str(status)
            .map_err(|e| config_error(format!("{}: {e}", field("status"))))?;
    }
    if let Some(duration) = raw.duration.as_deref() {
        task.duration = duration_field(&field("duration"), duration)?;
    }
    if let Some(start) = raw.start.as_deref() {
        let start = timestamp_field(&field("start"), start)?;
        let end = start
            .checked_add_signed(task.duration)
            .ok_or_else(|| config_error(format!("{}: end time out of range", field("duration"))))?;
        task.schedule = Some(Interval::new(start, end));
    }

    for link in raw.after.iter() {
        let id = names
            .get(link.task())
            .copied()
            .ok_or_else(|| config_error(format!("{}: unknown task", field("after"))))?;
        let mut pred = Predecessor::local(id);
        if let RawPredecessor::Link {
            min_offset,
            max_offset,
            ..
        } = link
        {
            if let Some(min) = min_offset.as_deref() {
                pred.min_offset = duration_field(&field("after.min_offset"), min)?;
            }
            if let Some(max) = max_offset.as_deref() {
                pred.max_offset = Some(duration_field(&field("after.max_offset"), max)?);
            }
        }
        task.predecessors.push(pred);
    }

    task.reservation = raw.reservation.as_deref().and_then(|r| names.get(r).copied());
    task.storage = build_storage(name, &raw.output, nodes)?;

    Ok(task)
}

fn build_payload(name: &str, raw: &RawTaskConfig) -> Result<TaskPayload> {
    let stations = raw.stations.iter().cloned().collect();
    let payload = match raw.kind {
        RawTaskType::Observation => {
            let mut beams = Vec::with_capacity(raw.beam.len());
            for beam in raw.beam.iter() {
                let duration = match beam.duration.as_deref() {
                    Some(d) => Some(duration_field(&format!("[task.{name}.beam].duration"), d)?),
                    None => None,
                };
                beams.push(DigitalBeam {
                    subbands: beam.subbands,
                    duration,
                    direction: Direction {
                        angle1: beam.angle1,
                        angle2: beam.angle2,
                        system: beam.direction_type,
                    },
                    tied_array_beams: beam.tied_array_beams,
                });
            }
            TaskPayload::Observation(ObservationSpec {
                stations,
                antenna_mode: raw.antenna_mode,
                clock: raw.clock,
                filter: raw.filter,
                bit_mode: raw.bit_mode.unwrap_or_default(),
                beams,
                stokes: raw.stokes.as_ref().map(|s| StokesSettings {
                    coherent: s.coherent,
                    incoherent: s.incoherent,
                    channels_per_subband: s.channels_per_subband,
                    time_integration: s.time_integration,
                    collapse: s.collapse,
                }),
                data_slots: BTreeMap::new(),
            })
        }
        RawTaskType::Pipeline => {
            let kind = raw
                .pipeline
                .ok_or_else(|| config_error(format!("pipeline task '{name}' needs a `pipeline` kind")))?;
            let mut inputs = BTreeMap::new();
            for (product, idents) in raw.inputs.iter() {
                let product = DataProductType::from_str(product).map_err(config_error)?;
                inputs.insert(product, idents.clone());
            }
            TaskPayload::Pipeline(PipelineSpec {
                kind,
                inputs,
                demix: raw.demix.as_ref().map(|d| DemixSettings {
                    freq_step: d.freq_step,
                    time_step: d.time_step,
                    demix_freq_step: d.demix_freq_step,
                    demix_time_step: d.demix_time_step,
                    sources: d.sources.clone(),
                }),
            })
        }
        RawTaskType::Reservation => TaskPayload::Reservation(StationBlock { stations }),
        RawTaskType::Maintenance => TaskPayload::Maintenance(StationBlock { stations }),
        RawTaskType::System => TaskPayload::System,
    };
    Ok(payload)
}

fn build_storage(
    name: &str,
    outputs: &BTreeMap<String, RawOutput>,
    nodes: &BTreeMap<String, NodeId>,
) -> Result<StorageRequirement> {
    let mut storage = StorageRequirement::new();
    for (product, out) in outputs.iter() {
        let product = DataProductType::from_str(product)
            .map_err(|e| config_error(format!("[task.{name}.output]: {e}")))?;
        let manual_locations = out
            .manual_locations
            .iter()
            .filter_map(|(node, part)| nodes.get(node).map(|id| (*id, *part)))
            .collect();
        storage.insert(
            product,
            ProductRequirement {
                identifications: out.identifications.clone(),
                file_count: out.files,
                file_size_kb: out.file_size_kb,
                min_nodes: out.min_nodes,
                manual_locations,
            },
        );
    }
    Ok(storage)
}
