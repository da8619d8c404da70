// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{RawConfigFile, ScheduleFile};
use crate::errors::Result;

/// Read a schedule file and deserialize it into a [`RawConfigFile`].
///
/// Only TOML deserialization happens here; no semantic checks. Use
/// [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;
    debug!(path = %path.display(), tasks = config.task.len(), "schedule file read");

    Ok(config)
}

/// Load a schedule file and check it.
///
/// - Reads TOML.
/// - Applies defaults (serde + `Default` impls).
/// - Checks for:
///   - unknown predecessor, reservation and storage-node references,
///   - predecessor cycles,
///   - settings sanity (durations, bandwidth, undo limit).
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ScheduleFile> {
    let raw_config = load_from_path(&path)?;
    let config = ScheduleFile::try_from(raw_config)?;
    Ok(config)
}

/// Schedule file used when none is given: `Schedule.toml` in the current
/// working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Schedule.toml")
}
