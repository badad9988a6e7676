// src/store/mod.rs

//! Configuration store client.
//!
//! This is the collaborator the lifecycle code is written against:
//! - [`model`] holds the records (processing blocks, their state, SBIs,
//!   deployments).
//! - [`memory`] is the in-process backend: revisioned keys, leases and
//!   change broadcast.
//! - [`txn`] implements optimistic transactions with typed accessors.
//! - [`client`] is the session handle (`ConfigDb`) that runs transactions
//!   and blocks on watched changes.

pub mod client;
pub mod memory;
pub mod model;
pub mod txn;

pub use client::ConfigDb;
pub use memory::{LeaseId, MemoryBackend, WatchSet};
pub use model::{
    ChannelBlock, Deployment, DeploymentKind, HelmChart, OwnerRecord, ProcessingBlock,
    ProcessingBlockState, ScanType, SchedulingBlock, WorkflowDescriptor, deploy_id,
};
pub use txn::Txn;
