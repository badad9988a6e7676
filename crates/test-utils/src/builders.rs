#![allow(dead_code)]

use serde_json::{Value, json};
use sdp_workflow::config::{RawWorkflowConfig, WorkflowConfig};
use sdp_workflow::store::{
    ChannelBlock, ConfigDb, ProcessingBlock, ProcessingBlockState, ScanType, SchedulingBlock,
    WorkflowDescriptor,
};
use sdp_workflow::types::{PbStatus, SbiStatus, WorkflowKind};

/// Builder for `ProcessingBlock` to simplify test setup.
pub struct PbBuilder {
    pb: ProcessingBlock,
}

impl PbBuilder {
    pub fn batch(id: &str) -> Self {
        Self::new(id, WorkflowKind::Batch, "test_batch")
    }

    pub fn realtime(id: &str, sbi_id: &str) -> Self {
        Self::new(id, WorkflowKind::Realtime, "test_realtime").sbi(sbi_id)
    }

    pub fn new(id: &str, kind: WorkflowKind, workflow: &str) -> Self {
        Self {
            pb: ProcessingBlock {
                id: id.to_string(),
                sbi_id: None,
                workflow: WorkflowDescriptor {
                    kind,
                    id: workflow.to_string(),
                    version: "0.1.0".to_string(),
                },
                parameters: json!({}),
                dependencies: vec![],
            },
        }
    }

    pub fn sbi(mut self, sbi_id: &str) -> Self {
        self.pb.sbi_id = Some(sbi_id.to_string());
        self
    }

    pub fn parameters(mut self, parameters: Value) -> Self {
        self.pb.parameters = parameters;
        self
    }

    pub fn build(self) -> ProcessingBlock {
        self.pb
    }
}

/// Builder for `SchedulingBlock`.
pub struct SbiBuilder {
    sbi: SchedulingBlock,
}

impl SbiBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            sbi: SchedulingBlock {
                id: id.to_string(),
                status: SbiStatus::Active,
                scan_types: vec![],
                pb_receive_addresses: None,
                extra: Default::default(),
            },
        }
    }

    pub fn status(mut self, status: SbiStatus) -> Self {
        self.sbi.status = status;
        self
    }

    /// Add a scan type made of `(start, count)` channel blocks.
    pub fn scan_type(mut self, id: &str, blocks: &[(u64, u64)]) -> Self {
        self.sbi.scan_types.push(scan_type(id, blocks));
        self
    }

    pub fn build(self) -> SchedulingBlock {
        self.sbi
    }
}

pub fn scan_type(id: &str, blocks: &[(u64, u64)]) -> ScanType {
    ScanType {
        id: id.to_string(),
        channels: blocks
            .iter()
            .map(|&(start, count)| ChannelBlock {
                start,
                count,
                extra: Default::default(),
            })
            .collect(),
        extra: Default::default(),
    }
}

/// Builder for `WorkflowConfig`, going through the same validation as a
/// config file.
pub struct ConfigBuilder {
    raw: RawWorkflowConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            raw: RawWorkflowConfig::default(),
        }
    }

    pub fn helm_namespace(mut self, ns: &str) -> Self {
        self.raw.deploy.helm_namespace = ns.to_string();
        self
    }

    /// Probe settings for Dask deployments.
    pub fn endpoint_retries(mut self, retries: u32, interval_ms: u64) -> Self {
        self.raw.deploy.endpoint_retries = retries;
        self.raw.deploy.endpoint_retry_interval_ms = interval_ms;
        self
    }

    pub fn build(self) -> WorkflowConfig {
        WorkflowConfig::try_from(self.raw).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a PB with an empty state document, as the processing controller
/// would before the workflow starts.
pub fn seed_pb(db: &ConfigDb, pb: &ProcessingBlock) {
    db.txn(|txn| {
        txn.create_processing_block(pb)?;
        txn.create_processing_block_state(&pb.id, &ProcessingBlockState::default())
    })
    .expect("seeding processing block");
}

pub fn seed_sbi(db: &ConfigDb, sbi: &SchedulingBlock) {
    db.txn(|txn| txn.create_scheduling_block(sbi))
        .expect("seeding scheduling block instance");
}

/// Read the current state document of a PB.
pub fn pb_state(db: &ConfigDb, pb_id: &str) -> ProcessingBlockState {
    db.txn(|txn| txn.require_processing_block_state(pb_id))
        .expect("reading processing block state")
}

pub fn pb_status(db: &ConfigDb, pb_id: &str) -> Option<PbStatus> {
    pb_state(db, pb_id).status
}

/// Ids of every deployment record in the registry.
pub fn deployment_ids(db: &ConfigDb) -> Vec<String> {
    db.txn(|txn| Ok(txn.list_deployments(""))).expect("listing deployments")
}
