// src/config/mod.rs

//! Schedule file loading and checking.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a schedule file from disk (`loader.rs`).
//! - Check references and turn raw sections into tasks, storage nodes and
//!   a scheduling context (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{RawConfigFile, RawTaskConfig, ScheduleFile};
