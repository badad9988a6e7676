// src/types.rs

//! Status vocabulary shared with the configuration store.
//!
//! These enums serialize to the exact upper-case strings other components
//! read from the store (`"WAITING"`, `"RUNNING"`, ...), so their wire form
//! must not change.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Status of a processing block, as recorded in its state document.
///
/// `Finished` and `Cancelled` are terminal: once either is committed, no
/// further transition is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PbStatus {
    Waiting,
    Running,
    Finished,
    Cancelled,
}

impl PbStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, PbStatus::Finished | PbStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PbStatus::Waiting => "WAITING",
            PbStatus::Running => "RUNNING",
            PbStatus::Finished => "FINISHED",
            PbStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for PbStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PbStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "WAITING" => Ok(PbStatus::Waiting),
            "RUNNING" => Ok(PbStatus::Running),
            "FINISHED" => Ok(PbStatus::Finished),
            "CANCELLED" => Ok(PbStatus::Cancelled),
            other => Err(format!(
                "invalid processing block status: {other} (expected WAITING, RUNNING, FINISHED or CANCELLED)"
            )),
        }
    }
}

/// Status of a scheduling block instance (the observation session).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SbiStatus {
    Active,
    Finished,
    Cancelled,
}

impl SbiStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SbiStatus::Finished | SbiStatus::Cancelled)
    }

    /// Processing block status a realtime phase commits after observing
    /// this SBI status. `None` while the SBI is still active.
    pub fn terminal_pb_status(self) -> Option<PbStatus> {
        match self {
            SbiStatus::Active => None,
            SbiStatus::Finished => Some(PbStatus::Finished),
            SbiStatus::Cancelled => Some(PbStatus::Cancelled),
        }
    }
}

impl fmt::Display for SbiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SbiStatus::Active => "ACTIVE",
            SbiStatus::Finished => "FINISHED",
            SbiStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

impl Default for SbiStatus {
    fn default() -> Self {
        SbiStatus::Active
    }
}

/// Status of one entry in the state document's `deployments` map.
///
/// `Cancelled` is only written when a realtime phase sees its SBI cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeployStatus {
    Running,
    Finished,
    Cancelled,
}

impl DeployStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, DeployStatus::Running)
    }
}

impl fmt::Display for DeployStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeployStatus::Running => "RUNNING",
            DeployStatus::Finished => "FINISHED",
            DeployStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

impl From<SbiStatus> for DeployStatus {
    fn from(status: SbiStatus) -> Self {
        match status {
            SbiStatus::Active => DeployStatus::Running,
            SbiStatus::Finished => DeployStatus::Finished,
            SbiStatus::Cancelled => DeployStatus::Cancelled,
        }
    }
}

/// Kind of workflow a processing block runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowKind {
    /// Bound to a live observation; completion follows the SBI.
    Realtime,
    /// Self-contained; completion follows the phase body.
    Batch,
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowKind::Realtime => f.write_str("realtime"),
            WorkflowKind::Batch => f.write_str("batch"),
        }
    }
}

impl FromStr for WorkflowKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "realtime" => Ok(WorkflowKind::Realtime),
            "batch" => Ok(WorkflowKind::Batch),
            other => Err(format!(
                "invalid workflow type: {other} (expected \"realtime\" or \"batch\")"
            )),
        }
    }
}

/// Which store backend a client connects to.
///
/// Chosen explicitly in configuration and handed to
/// [`ConfigDb::connect`](crate::store::ConfigDb::connect).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local store; all clients created from the same
    /// [`MemoryBackend`](crate::store::MemoryBackend) share state.
    Memory,
}

impl Default for StoreBackend {
    fn default() -> Self {
        StoreBackend::Memory
    }
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unsupported store backend: {other} (expected \"memory\")")),
        }
    }
}
