// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkflowError {
    /// An operation that needs a live PB/SBI found it in a terminal state.
    #[error("Lifecycle violation: {0}")]
    LifecycleViolation(String),

    /// This client no longer holds the ownership lease for the PB.
    #[error("Lost ownership of processing block {pb_id}")]
    LostOwnership { pb_id: String },

    /// The PB was cancelled while we were waiting on it.
    #[error("Processing block {pb_id} is CANCELLED")]
    Cancelled { pb_id: String },

    /// Another live lease already owns the PB.
    #[error("Processing block {pb_id} is already owned by lease {owner}")]
    OwnershipConflict { pb_id: String, owner: u64 },

    #[error("Deployment {deploy_id} failed: {reason}")]
    DeploymentFailure { deploy_id: String, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),

    /// The operation does not apply to this kind of workflow.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WorkflowError {
    pub fn lifecycle(msg: impl Into<String>) -> Self {
        WorkflowError::LifecycleViolation(msg.into())
    }

    /// Errors after which this client must not write to the store again.
    pub fn forbids_writes(&self) -> bool {
        matches!(self, WorkflowError::LostOwnership { .. })
    }
}

pub type Result<T> = std::result::Result<T, WorkflowError>;
