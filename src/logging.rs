// src/logging.rs

//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! The level comes from `--log-level` if given, else from `SDP_WORKFLOW_LOG`
//! (e.g. "info", "debug"), else `info`. Output goes to stderr; stdout only
//! carries the final processing block report.

use std::str::FromStr;

use anyhow::{Result, anyhow};
use tracing::Level;
use tracing_subscriber::fmt;

use crate::cli::LogLevel;

pub const LOG_ENV: &str = "SDP_WORKFLOW_LOG";

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let level = resolve_level(cli_level, std::env::var(LOG_ENV).ok().as_deref());

    fmt()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow!("installing tracing subscriber: {err}"))
}

pub fn resolve_level(cli_level: Option<LogLevel>, env_value: Option<&str>) -> Level {
    if let Some(lvl) = cli_level {
        return lvl.into();
    }
    env_value.and_then(level_from_env).unwrap_or(Level::INFO)
}

fn level_from_env(value: &str) -> Option<Level> {
    match value.trim() {
        v if v.eq_ignore_ascii_case("warning") => Some(Level::WARN),
        v => Level::from_str(v).ok(),
    }
}

impl From<LogLevel> for Level {
    fn from(lvl: LogLevel) -> Self {
        match lvl {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}
