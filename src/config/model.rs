// src/config/model.rs

use std::time::Duration;

use serde::Deserialize;

use crate::types::StoreBackend;

/// Configuration as read from a TOML file.
///
/// ```toml
/// [store]
/// backend = "memory"
///
/// [deploy]
/// helm_namespace = "sdp"
/// endpoint_retries = 200
/// endpoint_retry_interval_ms = 100
///
/// [receive]
/// service_name = "receive"
/// port = 9000
/// ```
///
/// Every section is optional and has defaults. This is the unchecked form;
/// convert it into [`WorkflowConfig`] to validate.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawWorkflowConfig {
    #[serde(default)]
    pub store: StoreSection,

    #[serde(default)]
    pub deploy: DeploySection,

    #[serde(default)]
    pub receive: ReceiveSection,
}

/// `[store]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreSection {
    /// Backend the client connects to. Only `"memory"` is built in.
    #[serde(default)]
    pub backend: StoreBackend,
}

/// `[deploy]` section: execution engine deployment knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct DeploySection {
    /// Kubernetes namespace Helm releases land in. Overridden by the
    /// `SDP_HELM_NAMESPACE` environment variable when set.
    #[serde(default = "default_helm_namespace")]
    pub helm_namespace: String,

    /// Port of the Dask scheduler service.
    #[serde(default = "default_dask_scheduler_port")]
    pub dask_scheduler_port: u16,

    /// How many times to probe an engine endpoint before giving up.
    #[serde(default = "default_endpoint_retries")]
    pub endpoint_retries: u32,

    /// Pause between two endpoint probes.
    #[serde(default = "default_endpoint_retry_interval_ms")]
    pub endpoint_retry_interval_ms: u64,

    /// Timeout of a single endpoint probe.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

fn default_helm_namespace() -> String {
    "sdp".to_string()
}

fn default_dask_scheduler_port() -> u16 {
    8786
}

fn default_endpoint_retries() -> u32 {
    200
}

fn default_endpoint_retry_interval_ms() -> u64 {
    100
}

fn default_probe_timeout_ms() -> u64 {
    500
}

impl Default for DeploySection {
    fn default() -> Self {
        Self {
            helm_namespace: default_helm_namespace(),
            dask_scheduler_port: default_dask_scheduler_port(),
            endpoint_retries: default_endpoint_retries(),
            endpoint_retry_interval_ms: default_endpoint_retry_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl DeploySection {
    pub fn endpoint_retry_interval(&self) -> Duration {
        Duration::from_millis(self.endpoint_retry_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// `[receive]` section: defaults for receive address generation.
#[derive(Debug, Clone, Deserialize)]
pub struct ReceiveSection {
    #[serde(default = "default_service_name")]
    pub service_name: String,

    #[serde(default = "default_receive_port")]
    pub port: u16,
}

fn default_service_name() -> String {
    "receive".to_string()
}

fn default_receive_port() -> u16 {
    9000
}

impl Default for ReceiveSection {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            port: default_receive_port(),
        }
    }
}

/// Validated configuration.
///
/// Only obtainable through `TryFrom<RawWorkflowConfig>` (see `validate.rs`)
/// or [`WorkflowConfig::default`].
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub store: StoreSection,
    pub deploy: DeploySection,
    pub receive: ReceiveSection,
}

impl WorkflowConfig {
    pub(crate) fn new_unchecked(
        store: StoreSection,
        deploy: DeploySection,
        receive: ReceiveSection,
    ) -> Self {
        Self {
            store,
            deploy,
            receive,
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self::new_unchecked(
            StoreSection::default(),
            DeploySection::default(),
            ReceiveSection::default(),
        )
    }
}
