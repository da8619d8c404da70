// src/types.rs

//! Small shared enums used across the registry, allocators and engine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a task.
///
/// The declaration order is meaningful: `status >= PreScheduled` reads as
/// "has been put on the schedule".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Unscheduled,
    Error,
    Conflict,
    OnHold,
    PreScheduled,
    Scheduled,
    Starting,
    Active,
    Completing,
    Finished,
    Aborted,
    Obsolete,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 12] = [
        TaskStatus::Unscheduled,
        TaskStatus::Error,
        TaskStatus::Conflict,
        TaskStatus::OnHold,
        TaskStatus::PreScheduled,
        TaskStatus::Scheduled,
        TaskStatus::Starting,
        TaskStatus::Active,
        TaskStatus::Completing,
        TaskStatus::Finished,
        TaskStatus::Aborted,
        TaskStatus::Obsolete,
    ];

    /// Statuses in which a task holds stations, data slots and storage.
    pub fn occupies_resources(self) -> bool {
        matches!(
            self,
            TaskStatus::PreScheduled
                | TaskStatus::Scheduled
                | TaskStatus::Starting
                | TaskStatus::Active
                | TaskStatus::Completing
        )
    }

    /// No outgoing transitions through the engine.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Finished | TaskStatus::Aborted | TaskStatus::Obsolete
        )
    }

    /// Statuses the engine may still edit (move, reschedule, delete).
    pub fn is_editable(self) -> bool {
        self <= TaskStatus::Scheduled
    }

    pub fn bucket(self) -> StatusBucket {
        match self {
            TaskStatus::Unscheduled
            | TaskStatus::Error
            | TaskStatus::Conflict
            | TaskStatus::OnHold => StatusBucket::Unscheduled,
            TaskStatus::PreScheduled
            | TaskStatus::Scheduled
            | TaskStatus::Starting
            | TaskStatus::Active
            | TaskStatus::Completing => StatusBucket::Scheduled,
            TaskStatus::Finished | TaskStatus::Aborted | TaskStatus::Obsolete => {
                StatusBucket::Inactive
            }
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Unscheduled => "unscheduled",
            TaskStatus::Error => "error",
            TaskStatus::Conflict => "conflict",
            TaskStatus::OnHold => "on hold",
            TaskStatus::PreScheduled => "prescheduled",
            TaskStatus::Scheduled => "scheduled",
            TaskStatus::Starting => "starting",
            TaskStatus::Active => "active",
            TaskStatus::Completing => "completing",
            TaskStatus::Finished => "finished",
            TaskStatus::Aborted => "aborted",
            TaskStatus::Obsolete => "obsolete",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm: String = s
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .collect();
        TaskStatus::ALL
            .into_iter()
            .find(|st| st.to_string().replace(' ', "") == norm)
            .ok_or_else(|| format!("invalid task status: {s}"))
    }
}

/// Registry index buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusBucket {
    Unscheduled,
    Scheduled,
    Inactive,
    /// Reservations and maintenance, whatever their status.
    Reservation,
}

/// Kind tag of a task; the payload lives in `task::TaskPayload`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Observation,
    Pipeline,
    Reservation,
    Maintenance,
    System,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskKind::Observation => "observation",
            TaskKind::Pipeline => "pipeline",
            TaskKind::Reservation => "reservation",
            TaskKind::Maintenance => "maintenance",
            TaskKind::System => "system",
        };
        f.write_str(s)
    }
}

/// Sampling bit-mode of an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BitMode {
    #[serde(rename = "4")]
    Four,
    #[serde(rename = "8")]
    Eight,
    #[serde(rename = "16")]
    Sixteen,
}

impl BitMode {
    pub fn bits(self) -> u16 {
        match self {
            BitMode::Four => 4,
            BitMode::Eight => 8,
            BitMode::Sixteen => 16,
        }
    }

    /// Data slots available on one RSP board in this mode.
    pub fn slots_per_board(self) -> u16 {
        match self {
            BitMode::Sixteen => 61,
            BitMode::Eight => 122,
            BitMode::Four => 244,
        }
    }

    /// Maximum number of subbands over all four RSP boards.
    pub fn max_subbands(self) -> u16 {
        self.slots_per_board() * crate::dataslot::RSP_BOARDS as u16
    }
}

impl Default for BitMode {
    fn default() -> Self {
        BitMode::Sixteen
    }
}

impl fmt::Display for BitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

impl FromStr for BitMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_end_matches("-bit") {
            "4" => Ok(BitMode::Four),
            "8" => Ok(BitMode::Eight),
            "16" => Ok(BitMode::Sixteen),
            other => Err(format!("invalid bit mode: {other} (expected 4, 8 or 16)")),
        }
    }
}

/// Output data product types a task can write to storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataProductType {
    Correlated,
    CoherentStokes,
    IncoherentStokes,
    InstrumentModel,
    SkyImage,
    Pulsar,
}

impl fmt::Display for DataProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataProductType::Correlated => "correlated",
            DataProductType::CoherentStokes => "coherent-stokes",
            DataProductType::IncoherentStokes => "incoherent-stokes",
            DataProductType::InstrumentModel => "instrument-model",
            DataProductType::SkyImage => "sky-image",
            DataProductType::Pulsar => "pulsar",
        };
        f.write_str(s)
    }
}

impl FromStr for DataProductType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "correlated" | "uv" => Ok(DataProductType::Correlated),
            "coherent-stokes" | "cs" => Ok(DataProductType::CoherentStokes),
            "incoherent-stokes" | "is" => Ok(DataProductType::IncoherentStokes),
            "instrument-model" | "inst" => Ok(DataProductType::InstrumentModel),
            "sky-image" | "img" => Ok(DataProductType::SkyImage),
            "pulsar" | "pulp" => Ok(DataProductType::Pulsar),
            other => Err(format!("invalid data product type: {other}")),
        }
    }
}

/// How the storage allocator picks nodes.
///
/// `Maximum*` concentrates data on preferred nodes, `Minimum*` packs the
/// fullest nodes first. The suffix says which preference list is consulted
/// first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoragePolicy {
    Manual,
    MaximumDataType,
    MaximumProject,
    MinimumDataType,
    MinimumProject,
}

impl StoragePolicy {
    pub fn is_maximum(self) -> bool {
        matches!(
            self,
            StoragePolicy::MaximumDataType | StoragePolicy::MaximumProject
        )
    }

    pub fn prefers_data_type(self) -> bool {
        matches!(
            self,
            StoragePolicy::MaximumDataType | StoragePolicy::MinimumDataType
        )
    }
}

impl Default for StoragePolicy {
    fn default() -> Self {
        StoragePolicy::MinimumDataType
    }
}

impl FromStr for StoragePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "manual" => Ok(StoragePolicy::Manual),
            "maximum-data-type" => Ok(StoragePolicy::MaximumDataType),
            "maximum-project" => Ok(StoragePolicy::MaximumProject),
            "minimum-data-type" => Ok(StoragePolicy::MinimumDataType),
            "minimum-project" => Ok(StoragePolicy::MinimumProject),
            other => Err(format!(
                "invalid storage policy: {other} (expected manual, maximum-data-type, \
                 maximum-project, minimum-data-type or minimum-project)"
            )),
        }
    }
}
