// src/dataslot.rs

//! Station data-slot assignment.
//!
//! Every observation needs one data slot per subband on each of its
//! stations. Slots live on [`RSP_BOARDS`] boards; how many fit on a board
//! depends on the bit-mode. Slots are numbered globally as
//! `board * slots_per_board + slot`, and a task takes a contiguous global
//! run, wrapping onto the next board when one fills up.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::task::{Conflict, StationId, Task, TaskId, TaskRegistry};
use crate::time::Interval;
use crate::types::{BitMode, TaskStatus};

/// Number of RSP boards per station.
pub const RSP_BOARDS: usize = 4;

/// Inclusive run of slots on one board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DataSlotRange {
    pub board: u8,
    pub first: u16,
    pub last: u16,
}

impl DataSlotRange {
    pub fn len(&self) -> u32 {
        u32::from(self.last) - u32::from(self.first) + 1
    }

    pub fn is_empty(&self) -> bool {
        self.last < self.first
    }

    /// Global index of the last slot in this range.
    fn last_global(&self, mode: BitMode) -> u32 {
        u32::from(self.board) * u32::from(mode.slots_per_board()) + u32::from(self.last)
    }

    pub fn intersects(&self, other: &DataSlotRange) -> bool {
        self.board == other.board && self.first <= other.last && other.first <= self.last
    }
}

impl fmt::Display for DataSlotRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "board {} slots {}..={}", self.board, self.first, self.last)
    }
}

/// Why a station could not be given slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSlotFailure {
    BitmodeConflict { station: StationId, other: TaskId },
    OutOfDataslots { station: StationId },
}

impl From<DataSlotFailure> for Conflict {
    fn from(f: DataSlotFailure) -> Self {
        match f {
            DataSlotFailure::BitmodeConflict { station, other } => {
                Conflict::BitmodeConflict { station, other }
            }
            DataSlotFailure::OutOfDataslots { station } => Conflict::OutOfDataslots { station },
        }
    }
}

/// Result of one refresh pass.
#[derive(Debug, Clone, Default)]
pub struct DataSlotReport {
    /// Tasks that received a fresh assignment.
    pub assigned: Vec<TaskId>,
    pub failures: Vec<(TaskId, DataSlotFailure)>,
}

/// Split `count` global slots starting at `first` into per-board ranges.
///
/// Returns `None` when the run would go past the last board.
pub fn slot_ranges(mode: BitMode, first: u32, count: u32) -> Option<Vec<DataSlotRange>> {
    let per_board = u32::from(mode.slots_per_board());
    let capacity = per_board * RSP_BOARDS as u32;
    if count == 0 {
        return Some(Vec::new());
    }
    if first + count > capacity {
        return None;
    }

    let mut out = Vec::new();
    let mut next = first;
    let end = first + count;
    while next < end {
        let board = next / per_board;
        let board_end = ((board + 1) * per_board).min(end);
        out.push(DataSlotRange {
            board: board as u8,
            first: (next % per_board) as u16,
            last: ((board_end - 1) % per_board) as u16,
        });
        next = board_end;
    }
    Some(out)
}

/// Snapshot of what the pass needs from one observation.
struct Entry {
    id: TaskId,
    interval: Interval,
    mode: BitMode,
    subbands: u32,
    keep: bool,
    slots: BTreeMap<StationId, Vec<DataSlotRange>>,
    stations: Vec<StationId>,
}

fn entry_for(task: &Task) -> Option<Entry> {
    let obs = task.observation()?;
    let interval = task.schedule?;
    if !task.status.occupies_resources() {
        return None;
    }
    // Prescheduled tasks are recomputed; later statuses keep what they have.
    let keep = task.status != TaskStatus::PreScheduled && !obs.data_slots.is_empty();
    Some(Entry {
        id: task.id,
        interval,
        mode: obs.bit_mode,
        subbands: obs.total_subbands(),
        keep,
        slots: if keep {
            obs.data_slots.clone()
        } else {
            BTreeMap::new()
        },
        stations: obs.stations.iter().cloned().collect(),
    })
}

/// Recompute data slots of every resource-holding observation.
///
/// Tasks past `PreScheduled` keep their existing slots and are placed
/// first; the rest are assigned in start order, each taking the run just
/// above the highest slot used by any overlapping task on that station.
/// Failures are recorded as conflicts on the task, never as errors.
pub fn refresh_data_slots(registry: &mut TaskRegistry) -> DataSlotReport {
    let mut entries: Vec<Entry> = registry.iter().filter_map(entry_for).collect();
    entries.sort_by_key(|e| (!e.keep, e.interval.start, e.id));

    let mut report = DataSlotReport::default();
    let mut flags: BTreeMap<TaskId, Vec<Conflict>> = BTreeMap::new();

    for idx in 0..entries.len() {
        let (placed, rest) = entries.split_at_mut(idx);
        let current = &mut rest[0];

        for station in current.stations.clone() {
            let clashing: Vec<TaskId> = placed
                .iter()
                .filter(|p| p.interval.overlaps(&current.interval))
                .filter(|p| p.stations.contains(&station))
                .filter(|p| p.mode != current.mode)
                .map(|p| p.id)
                .collect();

            if !clashing.is_empty() {
                // Neither side keeps slots on a station in mixed bit-modes.
                current.slots.remove(&station);
                for other in placed.iter_mut().filter(|p| clashing.contains(&p.id)) {
                    debug!(
                        task = %current.id,
                        other = %other.id,
                        station = %station,
                        "bit-mode conflict"
                    );
                    other.slots.remove(&station);
                    let failure = DataSlotFailure::BitmodeConflict {
                        station: station.clone(),
                        other: other.id,
                    };
                    flags.entry(current.id).or_default().push(failure.clone().into());
                    flags
                        .entry(other.id)
                        .or_default()
                        .push(Conflict::BitmodeConflict {
                            station: station.clone(),
                            other: current.id,
                        });
                    report.failures.push((current.id, failure));
                }
                continue;
            }

            let neighbours: Vec<&Entry> = placed
                .iter()
                .filter(|p| p.interval.overlaps(&current.interval))
                .filter(|p| p.stations.contains(&station))
                .collect();

            if current.keep && current.slots.contains_key(&station) {
                continue;
            }

            let first = neighbours
                .iter()
                .filter_map(|p| p.slots.get(&station))
                .flatten()
                .map(|r| r.last_global(current.mode) + 1)
                .max()
                .unwrap_or(0);

            match slot_ranges(current.mode, first, current.subbands) {
                Some(ranges) => {
                    current.slots.insert(station.clone(), ranges);
                }
                None => {
                    warn!(
                        task = %current.id,
                        station = %station,
                        needed = current.subbands,
                        first_free = first,
                        "out of data slots"
                    );
                    let failure = DataSlotFailure::OutOfDataslots {
                        station: station.clone(),
                    };
                    flags.entry(current.id).or_default().push(failure.clone().into());
                    report.failures.push((current.id, failure));
                }
            }
        }
    }

    let live: BTreeMap<TaskId, Entry> = entries.into_iter().map(|e| (e.id, e)).collect();
    let ids: Vec<TaskId> = registry.ids().collect();
    for id in ids {
        let entry = live.get(&id);
        let new_flags = flags.remove(&id).unwrap_or_default();
        let changed = registry.update(id, |task| {
            task.conflicts.retain(|c| !c.is_dataslot());
            task.conflicts.extend(new_flags);
            let Some(obs) = task.observation_mut() else {
                return false;
            };
            let slots = entry.map(|e| e.slots.clone()).unwrap_or_default();
            if obs.data_slots == slots {
                return false;
            }
            obs.data_slots = slots;
            true
        });
        if matches!(changed, Ok(true)) && entry.is_some() {
            report.assigned.push(id);
        }
    }

    report
}
