// src/validation.rs

//! Pre-schedule validation.
//!
//! [`validate`] runs a fixed, prioritised list of checks and returns the
//! first failure. Soft checks (warnings a caller may confirm away) always
//! run last, so they only surface when nothing harder is wrong.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::conflict::{PredecessorViolation, check_predecessors, station_conflicts};
use crate::context::SchedulingContext;
use crate::task::graph::resolve_ref;
use crate::task::{
    DirectionType, ObservationSpec, PipelineSpec, PredecessorResolver, Task, TaskId, TaskPayload,
    TaskRegistry,
};
use crate::types::{DataProductType, TaskStatus};

/// What a validation failure is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationKind {
    StartEndUnset,
    ZeroDuration,
    TooEarly,
    PredecessorNotFound,
    PredecessorNotEligible,
    PredecessorTooClose,
    PredecessorTooFar,
    UnknownCampaign,
    MissingAntennaMode,
    MissingClock,
    MissingFilter,
    ClockFilterMismatch,
    AntennaFilterMismatch,
    NoStations,
    UnknownStation,
    TooManySubbands,
    MissingTiedArrayBeams,
    InvalidChannelCollapse,
    NoOutputData,
    InvalidDemixSettings,
    UnknownDemixSource,
    UnresolvedInput,
    StationOverlap,
    ReservationMismatch,
    BeamDurationMismatch,
    RelativeCoordinates,
}

/// Outcome of validating one task for one target status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "kebab-case")]
pub enum ValidationResult {
    Ok,
    SoftWarning { kind: ValidationKind, message: String },
    HardError { kind: ValidationKind, message: String },
    Conflict { kind: ValidationKind, message: String },
}

impl ValidationResult {
    fn hard(kind: ValidationKind, message: impl Into<String>) -> Self {
        ValidationResult::HardError {
            kind,
            message: message.into(),
        }
    }

    fn conflict(kind: ValidationKind, message: impl Into<String>) -> Self {
        ValidationResult::Conflict {
            kind,
            message: message.into(),
        }
    }

    fn soft(kind: ValidationKind, message: impl Into<String>) -> Self {
        ValidationResult::SoftWarning {
            kind,
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ValidationResult::Ok)
    }

    pub fn kind(&self) -> Option<ValidationKind> {
        match self {
            ValidationResult::Ok => None,
            ValidationResult::SoftWarning { kind, .. }
            | ValidationResult::HardError { kind, .. }
            | ValidationResult::Conflict { kind, .. } => Some(*kind),
        }
    }

    /// Whether the transition must be refused. Soft warnings only block
    /// when the caller has not confirmed them.
    pub fn blocks(&self, confirm_soft_warnings: bool) -> bool {
        match self {
            ValidationResult::Ok => false,
            ValidationResult::SoftWarning { .. } => !confirm_soft_warnings,
            ValidationResult::HardError { .. } | ValidationResult::Conflict { .. } => true,
        }
    }

    /// Status the failure puts a task in when a system pass applies it.
    pub fn implied_status(&self) -> Option<TaskStatus> {
        match self {
            ValidationResult::HardError { .. } => Some(TaskStatus::Error),
            ValidationResult::Conflict { .. } => Some(TaskStatus::Conflict),
            ValidationResult::Ok | ValidationResult::SoftWarning { .. } => None,
        }
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationResult::Ok => f.write_str("ok"),
            ValidationResult::SoftWarning { kind, message } => {
                write!(f, "warning ({kind:?}): {message}")
            }
            ValidationResult::HardError { kind, message } => {
                write!(f, "error ({kind:?}): {message}")
            }
            ValidationResult::Conflict { kind, message } => {
                write!(f, "conflict ({kind:?}): {message}")
            }
        }
    }
}

/// Read-only inputs the validator needs besides the task itself.
pub struct ValidationInput<'a> {
    pub registry: &'a TaskRegistry,
    pub resolver: &'a dyn PredecessorResolver,
    pub ctx: &'a SchedulingContext,
    /// Tasks to leave out of the station overlap check.
    pub ignore: &'a [TaskId],
}

type Check = fn(&Task, TaskStatus, &ValidationInput<'_>) -> ValidationResult;

/// Hard and conflict checks, in priority order.
const CHECKS: &[Check] = &[
    check_schedule_set,
    check_duration,
    check_not_too_early,
    check_predecessors_ok,
    check_campaign,
    check_payload,
    check_station_overlap,
    check_reservation,
];

const SOFT_CHECKS: &[Check] = &[check_beam_durations, check_relative_coordinates];

/// Validate `task` (with whatever schedule it carries) for `target`.
pub fn validate(task: &Task, target: TaskStatus, input: &ValidationInput<'_>) -> ValidationResult {
    CHECKS
        .iter()
        .chain(SOFT_CHECKS)
        .map(|check| check(task, target, input))
        .find(|r| !r.is_ok())
        .unwrap_or(ValidationResult::Ok)
}

fn check_schedule_set(task: &Task, _: TaskStatus, _: &ValidationInput<'_>) -> ValidationResult {
    match task.schedule {
        Some(_) => ValidationResult::Ok,
        None => ValidationResult::hard(
            ValidationKind::StartEndUnset,
            "start and end time are not set",
        ),
    }
}

fn check_duration(task: &Task, _: TaskStatus, _: &ValidationInput<'_>) -> ValidationResult {
    let empty = task.schedule.is_some_and(|iv| iv.is_empty());
    if task.duration <= chrono::TimeDelta::zero() || empty {
        return ValidationResult::hard(ValidationKind::ZeroDuration, "task has zero duration");
    }
    ValidationResult::Ok
}

fn check_not_too_early(task: &Task, _: TaskStatus, input: &ValidationInput<'_>) -> ValidationResult {
    let Some(iv) = task.schedule else {
        return ValidationResult::Ok;
    };
    let earliest = input.ctx.earliest_start();
    if iv.start < earliest {
        return ValidationResult::hard(
            ValidationKind::TooEarly,
            format!(
                "start {} is before the earliest allowed start {}",
                iv.start.format("%Y-%m-%d %H:%M:%S"),
                earliest.format("%Y-%m-%d %H:%M:%S")
            ),
        );
    }
    ValidationResult::Ok
}

fn check_predecessors_ok(
    task: &Task,
    target: TaskStatus,
    input: &ValidationInput<'_>,
) -> ValidationResult {
    let Some(iv) = task.schedule else {
        return ValidationResult::Ok;
    };
    match check_predecessors(task, iv.start, target, input.registry, input.resolver, input.ctx) {
        Ok(()) => ValidationResult::Ok,
        Err(v) => {
            let kind = match v {
                PredecessorViolation::NotFound(_) => ValidationKind::PredecessorNotFound,
                PredecessorViolation::NotEligible { .. } => ValidationKind::PredecessorNotEligible,
                PredecessorViolation::TooClose { .. } => ValidationKind::PredecessorTooClose,
                PredecessorViolation::TooFar { .. } => ValidationKind::PredecessorTooFar,
            };
            ValidationResult::hard(kind, v.to_string())
        }
    }
}

fn check_campaign(task: &Task, _: TaskStatus, input: &ValidationInput<'_>) -> ValidationResult {
    let campaigns = &input.ctx.campaigns;
    if campaigns.is_empty() || task.is_reservation_like() || campaigns.contains(&task.project) {
        return ValidationResult::Ok;
    }
    ValidationResult::hard(
        ValidationKind::UnknownCampaign,
        format!("project '{}' is not a known campaign", task.project),
    )
}

fn check_payload(task: &Task, _: TaskStatus, input: &ValidationInput<'_>) -> ValidationResult {
    match &task.payload {
        TaskPayload::Observation(obs) => check_observation(task, obs, input),
        TaskPayload::Pipeline(pipe) => check_pipeline(task, pipe, input),
        TaskPayload::Reservation(block) | TaskPayload::Maintenance(block) => {
            check_stations(&block.stations, input.ctx)
        }
        TaskPayload::System => ValidationResult::Ok,
    }
}

fn check_stations(stations: &BTreeSet<String>, ctx: &SchedulingContext) -> ValidationResult {
    if stations.is_empty() {
        return ValidationResult::hard(ValidationKind::NoStations, "no stations selected");
    }
    if !ctx.stations.is_empty() {
        if let Some(unknown) = stations.iter().find(|s| !ctx.stations.contains(*s)) {
            return ValidationResult::hard(
                ValidationKind::UnknownStation,
                format!("station {unknown} is not part of the array"),
            );
        }
    }
    ValidationResult::Ok
}

fn check_observation(task: &Task, obs: &ObservationSpec, input: &ValidationInput<'_>) -> ValidationResult {
    let Some(antenna) = obs.antenna_mode else {
        return ValidationResult::hard(ValidationKind::MissingAntennaMode, "antenna mode not set");
    };
    let Some(clock) = obs.clock else {
        return ValidationResult::hard(ValidationKind::MissingClock, "clock frequency not set");
    };
    let Some(filter) = obs.filter else {
        return ValidationResult::hard(ValidationKind::MissingFilter, "filter band not set");
    };
    if filter.clock() != clock {
        return ValidationResult::hard(
            ValidationKind::ClockFilterMismatch,
            format!("filter {filter:?} cannot be used with clock {clock:?}"),
        );
    }
    if filter.is_lba() != antenna.is_lba() {
        return ValidationResult::hard(
            ValidationKind::AntennaFilterMismatch,
            format!("filter {filter:?} does not match antenna mode {antenna:?}"),
        );
    }

    let stations = check_stations(&obs.stations, input.ctx);
    if !stations.is_ok() {
        return stations;
    }

    let subbands = obs.total_subbands();
    let limit = u32::from(obs.bit_mode.max_subbands());
    if subbands > limit {
        return ValidationResult::hard(
            ValidationKind::TooManySubbands,
            format!(
                "{subbands} subbands exceed the {} limit of {limit}",
                obs.bit_mode
            ),
        );
    }

    if let Some(stokes) = obs.stokes {
        if stokes.coherent && obs.beams.iter().any(|b| b.tied_array_beams == 0) {
            return ValidationResult::hard(
                ValidationKind::MissingTiedArrayBeams,
                "coherent stokes requires tied-array beams in every digital beam",
            );
        }
        let channels = stokes.channels_per_subband;
        let bad_channels = channels == 0 || channels > 256 || !channels.is_power_of_two();
        if bad_channels || stokes.time_integration == 0 || (stokes.collapse && channels == 1) {
            return ValidationResult::hard(
                ValidationKind::InvalidChannelCollapse,
                format!(
                    "invalid stokes settings: {channels} channels per subband, \
                     integration {}, collapse {}",
                    stokes.time_integration, stokes.collapse
                ),
            );
        }
    }

    check_output_selected(task)
}

fn check_output_selected(task: &Task) -> ValidationResult {
    if task.storage.values().any(|p| p.file_count > 0) {
        ValidationResult::Ok
    } else {
        ValidationResult::hard(ValidationKind::NoOutputData, "no output data type selected")
    }
}

fn check_pipeline(task: &Task, pipe: &PipelineSpec, input: &ValidationInput<'_>) -> ValidationResult {
    if let Some(demix) = &pipe.demix {
        let steps_ok = demix.freq_step > 0
            && demix.time_step > 0
            && demix.demix_freq_step > 0
            && demix.demix_time_step > 0
            && demix.demix_freq_step % demix.freq_step == 0
            && demix.demix_time_step % demix.time_step == 0;
        if !steps_ok {
            return ValidationResult::hard(
                ValidationKind::InvalidDemixSettings,
                "demix steps must be non-zero multiples of the averaging steps",
            );
        }
        if let Some(src) = demix
            .sources
            .iter()
            .find(|s| !input.ctx.demix_sources.contains(*s))
        {
            return ValidationResult::hard(
                ValidationKind::UnknownDemixSource,
                format!("unknown demix source '{src}'"),
            );
        }
    }

    let outputs: BTreeSet<(DataProductType, &str)> = task
        .predecessors
        .iter()
        .filter_map(|link| resolve_ref(&link.reference, input.resolver))
        .filter_map(|id| input.registry.get(id))
        .flat_map(|pred| pred.output_identifications())
        .collect();

    for (product, idents) in &pipe.inputs {
        if let Some(missing) = idents
            .iter()
            .find(|ident| !outputs.contains(&(*product, ident.as_str())))
        {
            return ValidationResult::hard(
                ValidationKind::UnresolvedInput,
                format!("input {product} '{missing}' is not produced by any predecessor"),
            );
        }
    }

    check_output_selected(task)
}

fn check_station_overlap(task: &Task, _: TaskStatus, input: &ValidationInput<'_>) -> ValidationResult {
    let Some(iv) = task.schedule else {
        return ValidationResult::Ok;
    };
    let conflicts = station_conflicts(input.registry, task, &iv, input.ignore);
    match conflicts.first() {
        None => ValidationResult::Ok,
        Some(first) => ValidationResult::conflict(
            ValidationKind::StationOverlap,
            format!(
                "{} station overlap(s), first: station {} used by {}",
                conflicts.len(),
                first.station,
                first.other
            ),
        ),
    }
}

fn check_reservation(task: &Task, _: TaskStatus, input: &ValidationInput<'_>) -> ValidationResult {
    let Some(res_id) = task.reservation else {
        return ValidationResult::Ok;
    };
    let mismatch =
        |msg: String| ValidationResult::conflict(ValidationKind::ReservationMismatch, msg);

    let Some(res) = input.registry.get(res_id) else {
        return mismatch(format!("reservation {res_id} not found"));
    };
    let TaskPayload::Reservation(block) = &res.payload else {
        return mismatch(format!("{res_id} is not a reservation"));
    };
    if !res.status.occupies_resources() {
        return mismatch(format!("reservation {res_id} is {}", res.status));
    }
    match (res.schedule, task.schedule) {
        (Some(r), Some(t)) if r.covers(&t) => {}
        _ => return mismatch(format!("task is not inside reservation {res_id}")),
    }
    if let Some(stations) = task.stations() {
        if let Some(outside) = stations.iter().find(|s| !block.stations.contains(*s)) {
            return mismatch(format!(
                "station {outside} is not reserved by {res_id}"
            ));
        }
    }
    ValidationResult::Ok
}

fn check_beam_durations(task: &Task, _: TaskStatus, _: &ValidationInput<'_>) -> ValidationResult {
    let Some(obs) = task.observation() else {
        return ValidationResult::Ok;
    };
    match obs
        .beams
        .iter()
        .position(|b| b.duration.is_some_and(|d| d != task.duration))
    {
        Some(idx) => ValidationResult::soft(
            ValidationKind::BeamDurationMismatch,
            format!("beam {idx} duration differs from the task duration"),
        ),
        None => ValidationResult::Ok,
    }
}

fn check_relative_coordinates(task: &Task, _: TaskStatus, _: &ValidationInput<'_>) -> ValidationResult {
    let Some(obs) = task.observation() else {
        return ValidationResult::Ok;
    };
    let suspicious = obs.beams.iter().position(|b| {
        let d = b.direction;
        d.system == DirectionType::Azel
            || (d.system == DirectionType::J2000 && d.angle1 == 0.0 && d.angle2 == 0.0)
    });
    match suspicious {
        Some(idx) => ValidationResult::soft(
            ValidationKind::RelativeCoordinates,
            format!("beam {idx} direction looks horizon-relative or unset"),
        ),
        None => ValidationResult::Ok,
    }
}
