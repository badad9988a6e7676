// src/store/model.rs

//! Records kept in the configuration store.
//!
//! Documents written by other components may carry fields this crate does
//! not interpret; those are kept in the flattened `extra` maps so a
//! read-modify-write never drops them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{DeployStatus, PbStatus, SbiStatus, WorkflowKind};

/// Workflow a processing block asks to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDescriptor {
    #[serde(rename = "type")]
    pub kind: WorkflowKind,
    pub id: String,
    pub version: String,
}

/// Immutable description of a unit of workflow execution, created by the
/// external scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingBlock {
    pub id: String,
    #[serde(default)]
    pub sbi_id: Option<String>,
    pub workflow: WorkflowDescriptor,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub dependencies: Vec<Value>,
}

/// Mutable state document of a processing block (`/pb/{id}/state`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingBlockState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PbStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources_available: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployments: Option<BTreeMap<String, DeployStatus>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receive_addresses: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProcessingBlockState {
    pub fn with_status(status: PbStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_some_and(PbStatus::is_terminal)
    }

    pub fn deployment_status(&self, deploy_id: &str) -> Option<DeployStatus> {
        self.deployments.as_ref()?.get(deploy_id).copied()
    }

    /// The `deployments` map, created empty if the document has none yet.
    pub fn deployments_mut(&mut self) -> &mut BTreeMap<String, DeployStatus> {
        self.deployments.get_or_insert_with(BTreeMap::new)
    }
}

/// One block of contiguous channels inside a scan type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelBlock {
    pub start: u64,
    #[serde(default)]
    pub count: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanType {
    pub id: String,
    #[serde(default)]
    pub channels: Vec<ChannelBlock>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Scheduling block instance: the observation session a realtime PB serves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulingBlock {
    pub id: String,
    #[serde(default)]
    pub status: SbiStatus,
    #[serde(default)]
    pub scan_types: Vec<ScanType>,
    #[serde(default)]
    pub pb_receive_addresses: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// How a deployment is realised by the orchestration layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentKind {
    Helm,
    /// In-process engine used for tests and examples; nothing is orchestrated.
    Fake,
}

/// Arguments of a Helm deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelmChart {
    pub chart: String,
    #[serde(default)]
    pub values: Map<String, Value>,
}

/// Deployment record (`/deploy/{id}`), picked up by external controllers.
///
/// Wire shape: `{"id": ..., "type": "helm", "args": {"chart": ..., "values": {...}}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: DeploymentKind,
    #[serde(default)]
    pub args: Value,
}

impl Deployment {
    pub fn helm(id: impl Into<String>, chart: HelmChart) -> crate::errors::Result<Self> {
        Ok(Self {
            id: id.into(),
            kind: DeploymentKind::Helm,
            args: serde_json::to_value(chart)?,
        })
    }

    pub fn fake(id: impl Into<String>, name: &str) -> Self {
        Self {
            id: id.into(),
            kind: DeploymentKind::Fake,
            args: serde_json::json!({ "name": name }),
        }
    }

    /// Helm arguments, if this is a Helm deployment.
    pub fn helm_chart(&self) -> Option<HelmChart> {
        match self.kind {
            DeploymentKind::Helm => serde_json::from_value(self.args.clone()).ok(),
            DeploymentKind::Fake => None,
        }
    }
}

/// Ownership record of a processing block, attached to the owner's lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRecord {
    pub lease: u64,
}

/// Deterministic deployment id for a logical deployment name within a PB.
pub fn deploy_id(pb_id: &str, name: &str) -> String {
    format!("proc-{pb_id}-{name}")
}
