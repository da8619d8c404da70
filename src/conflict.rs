// src/conflict.rs

//! Station/time conflict detection and predecessor dependency checks.
//!
//! Everything here is read-only: it reports blocking tasks and violations
//! without touching the registry.

use std::fmt;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::SchedulingContext;
use crate::task::graph::resolve_ref;
use crate::task::{PredecessorRef, PredecessorResolver, StationId, Task, TaskId, TaskRegistry};
use crate::time::{Interval, Timestamp};
use crate::types::TaskStatus;

/// One station double-booking.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StationConflict {
    pub task: TaskId,
    pub station: StationId,
    pub other: TaskId,
}

impl fmt::Display for StationConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} overlaps {} on station {}",
            self.task, self.other, self.station
        )
    }
}

pub type ConflictList = Vec<StationConflict>;

/// Tasks occupying `station` at some instant of `interval`.
///
/// Only tasks in a resource-holding status count. Intervals are half-open,
/// so a task ending exactly at `interval.start` is not returned.
pub fn find_overlapping(
    registry: &TaskRegistry,
    station: &str,
    interval: &Interval,
    exclude: Option<TaskId>,
) -> Vec<TaskId> {
    registry
        .iter()
        .filter(|t| Some(t.id) != exclude)
        .filter(|t| t.status.occupies_resources())
        .filter(|t| t.uses_station(station))
        .filter(|t| t.schedule.is_some_and(|iv| iv.overlaps(interval)))
        .map(|t| t.id)
        .collect()
}

/// Whether `a` and `b` are allowed to share stations: a task may run inside
/// its own reservation.
fn reservation_pair(a: &Task, b: &Task) -> bool {
    a.reservation == Some(b.id) || b.reservation == Some(a.id)
}

/// All station conflicts `task` would have if it occupied `interval`.
///
/// `ignore` lists tasks that are not considered (e.g. other tasks being
/// moved in the same batch, checked separately).
pub fn station_conflicts(
    registry: &TaskRegistry,
    task: &Task,
    interval: &Interval,
    ignore: &[TaskId],
) -> ConflictList {
    let Some(stations) = task.stations() else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for station in stations {
        for other_id in find_overlapping(registry, station, interval, Some(task.id)) {
            if ignore.contains(&other_id) {
                continue;
            }
            let Some(other) = registry.get(other_id) else {
                continue;
            };
            if reservation_pair(task, other) {
                continue;
            }
            debug!(
                task = %task.id,
                other = %other_id,
                station = %station,
                "station overlap"
            );
            out.push(StationConflict {
                task: task.id,
                station: station.clone(),
                other: other_id,
            });
        }
    }
    out
}

/// Why a predecessor link blocks scheduling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredecessorViolation {
    NotFound(PredecessorRef),
    NotEligible { predecessor: TaskId, status: TaskStatus },
    TooClose { predecessor: TaskId, earliest: Timestamp },
    TooFar { predecessor: TaskId, latest: Timestamp },
}

impl fmt::Display for PredecessorViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredecessorViolation::NotFound(r) => write!(f, "predecessor {r} not found"),
            PredecessorViolation::NotEligible {
                predecessor,
                status,
            } => write!(f, "predecessor {predecessor} is {status}"),
            PredecessorViolation::TooClose {
                predecessor,
                earliest,
            } => write!(
                f,
                "start must be at or after {} (end of predecessor {predecessor} plus gap)",
                earliest.format("%Y-%m-%d %H:%M:%S")
            ),
            PredecessorViolation::TooFar {
                predecessor,
                latest,
            } => write!(
                f,
                "start must be at or before {} (max offset after predecessor {predecessor})",
                latest.format("%Y-%m-%d %H:%M:%S")
            ),
        }
    }
}

/// Effective end of a predecessor: reported real end, else scheduled end.
pub fn predecessor_end(pred: &Task) -> Option<Timestamp> {
    pred.actual_end.or(pred.schedule.map(|iv| iv.end))
}

/// Check every predecessor link of `task` for a start at `start`, with the
/// dependent heading for `target`.
///
/// A predecessor is eligible when it is not aborted/obsolete and has
/// reached at least `target`.
pub fn check_predecessors(
    task: &Task,
    start: Timestamp,
    target: TaskStatus,
    registry: &TaskRegistry,
    resolver: &dyn PredecessorResolver,
    ctx: &SchedulingContext,
) -> Result<(), PredecessorViolation> {
    for link in &task.predecessors {
        let pred = resolve_ref(&link.reference, resolver)
            .and_then(|id| registry.get(id))
            .ok_or_else(|| PredecessorViolation::NotFound(link.reference.clone()))?;

        if matches!(pred.status, TaskStatus::Aborted | TaskStatus::Obsolete)
            || pred.status < target
        {
            return Err(PredecessorViolation::NotEligible {
                predecessor: pred.id,
                status: pred.status,
            });
        }

        let Some(end) = predecessor_end(pred) else {
            return Err(PredecessorViolation::NotEligible {
                predecessor: pred.id,
                status: pred.status,
            });
        };

        let gap: TimeDelta = link.min_offset.max(ctx.min_predecessor_gap);
        let earliest = end + gap;
        if start < earliest {
            return Err(PredecessorViolation::TooClose {
                predecessor: pred.id,
                earliest,
            });
        }
        if let Some(max) = link.max_offset {
            let latest = end + max;
            if start > latest {
                return Err(PredecessorViolation::TooFar {
                    predecessor: pred.id,
                    latest,
                });
            }
        }
    }
    Ok(())
}
