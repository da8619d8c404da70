// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `arraysched`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "arraysched",
    version,
    about = "Allocate stations, data slots and storage for a telescope schedule.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the schedule file (TOML).
    ///
    /// Default: `Schedule.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Schedule.toml")]
    pub schedule: String,

    /// Request every unscheduled task into `prescheduled` before the
    /// resource pass.
    #[arg(long)]
    pub schedule_all: bool,

    /// Print the resulting schedule as JSON after the resource pass.
    #[arg(long)]
    pub report: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `ARRAYSCHED_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + check, print tasks and storage, but don't allocate anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Treat this RFC 3339 instant as "now" instead of the wall clock or
    /// `[settings].now`.
    #[arg(long, value_name = "TIME")]
    pub now: Option<String>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
