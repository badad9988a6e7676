// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{RawWorkflowConfig, WorkflowConfig};
use crate::errors::Result;

/// Environment variable overriding `[deploy].helm_namespace`.
pub const HELM_NAMESPACE_ENV: &str = "SDP_HELM_NAMESPACE";

/// Load a configuration file and return the raw, unvalidated model.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawWorkflowConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    let config: RawWorkflowConfig = toml::from_str(&contents)?;
    Ok(config)
}

/// Load, apply environment overrides, and validate.
///
/// A missing file is not an error: defaults are used instead, so the
/// binary runs without any configuration at all.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<WorkflowConfig> {
    let path = path.as_ref();
    let mut raw = if path.exists() {
        load_from_path(path)?
    } else {
        debug!(?path, "config file not found; using defaults");
        RawWorkflowConfig::default()
    };
    apply_env_overrides(&mut raw, std::env::var(HELM_NAMESPACE_ENV).ok());
    WorkflowConfig::try_from(raw)
}

/// Apply a `SDP_HELM_NAMESPACE` value, if any, to the raw config.
pub fn apply_env_overrides(raw: &mut RawWorkflowConfig, helm_namespace: Option<String>) {
    if let Some(ns) = helm_namespace.filter(|ns| !ns.trim().is_empty()) {
        debug!(namespace = %ns, "helm namespace taken from environment");
        raw.deploy.helm_namespace = ns;
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("SdpWorkflow.toml")
}
