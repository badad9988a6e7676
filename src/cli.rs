// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `sdp-workflow`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "sdp-workflow",
    version,
    about = "Run a processing block workflow against an in-memory configuration store.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML). A missing file means defaults.
    #[arg(long, value_name = "PATH", default_value = "SdpWorkflow.toml")]
    pub config: String,

    /// Processing block to claim.
    ///
    /// Default: the first processing block in the seed.
    #[arg(long, value_name = "ID")]
    pub pb_id: Option<String>,

    /// JSON file with the scheduling block instances and processing blocks
    /// to load into the store before claiming. Without it a small built-in
    /// demo (one batch and one realtime PB) is loaded.
    #[arg(long, value_name = "PATH")]
    pub seed: Option<String>,

    /// Seconds after which the simulated controller ends every active
    /// scheduling block instance.
    #[arg(long, value_name = "SECONDS", default_value_t = 2.0)]
    pub sbi_duration: f64,

    /// Log verbosity. Overrides `SDP_WORKFLOW_LOG`; `info` if neither is set.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Load and validate config and seed, print them, but don't run.
    #[arg(long)]
    pub dry_run: bool,
}

/// `--log-level` values; converted to `tracing::Level` in `logging`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

pub fn parse() -> CliArgs {
    CliArgs::parse()
}
