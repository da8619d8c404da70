// src/task/mod.rs

//! Tasks and their registry.
//!
//! - [`model`] holds the `Task` type: a common header plus a tagged,
//!   kind-specific payload.
//! - [`registry`] owns all live tasks, the soft-delete bin and the
//!   status-bucket index.
//! - [`graph`] builds the predecessor graph used for ordering and cycle
//!   checks.

pub mod graph;
pub mod model;
pub mod registry;

pub use graph::PredecessorGraph;
pub use model::{
    AntennaMode, ClockFrequency, Conflict, DemixSettings, DigitalBeam, Direction,
    DirectionType, ExternalId, FilterBand, GroupId, ObservationSpec, PipelineKind,
    PipelineSpec, Predecessor, PredecessorRef, ProductRequirement, StationBlock, StationId,
    StokesSettings, StorageLocation, StorageRequirement, Task, TaskId, TaskPayload,
    TaskProperty,
};
pub use registry::{PredecessorResolver, RegistryState, TaskRegistry};
