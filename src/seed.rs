// src/seed.rs

//! Initial store contents for the binary.
//!
//! In a deployed system the processing controller creates processing blocks
//! and their state documents before a workflow starts. The binary has no
//! such controller, so it loads them from a JSON seed file (or uses a
//! built-in demo).

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::errors::Result;
use crate::store::{
    ChannelBlock, ConfigDb, ProcessingBlock, ProcessingBlockState, ScanType, SchedulingBlock,
    WorkflowDescriptor,
};
use crate::types::{SbiStatus, WorkflowKind};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub scheduling_blocks: Vec<SchedulingBlock>,
    #[serde(default)]
    pub processing_blocks: Vec<ProcessingBlock>,
}

impl SeedFile {
    /// One SBI with a realtime PB bound to it, and one batch PB.
    pub fn demo() -> Self {
        let sbi = SchedulingBlock {
            id: "sbi-demo-001".to_string(),
            status: SbiStatus::Active,
            scan_types: vec![ScanType {
                id: "science_A".to_string(),
                channels: vec![ChannelBlock {
                    start: 0,
                    count: 744,
                    extra: Default::default(),
                }],
                extra: Default::default(),
            }],
            pb_receive_addresses: None,
            extra: Default::default(),
        };
        let batch = ProcessingBlock {
            id: "pb-demo-batch".to_string(),
            sbi_id: None,
            workflow: WorkflowDescriptor {
                kind: WorkflowKind::Batch,
                id: "test_batch".to_string(),
                version: "0.2.1".to_string(),
            },
            parameters: json!({ "duration": 0.5 }),
            dependencies: Vec::new(),
        };
        let realtime = ProcessingBlock {
            id: "pb-demo-realtime".to_string(),
            sbi_id: Some(sbi.id.clone()),
            workflow: WorkflowDescriptor {
                kind: WorkflowKind::Realtime,
                id: "test_realtime".to_string(),
                version: "0.2.1".to_string(),
            },
            parameters: json!({}),
            dependencies: Vec::new(),
        };
        Self {
            scheduling_blocks: vec![sbi],
            processing_blocks: vec![batch, realtime],
        }
    }

    pub fn first_pb_id(&self) -> Option<&str> {
        self.processing_blocks.first().map(|pb| pb.id.as_str())
    }
}

pub fn load_seed(path: impl AsRef<Path>) -> Result<SeedFile> {
    let path = path.as_ref();
    debug!(?path, "loading seed file");
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Create every SBI and PB of the seed, each PB with an empty state
/// document, in one transaction.
pub fn seed_store(db: &ConfigDb, seed: &SeedFile) -> Result<()> {
    db.txn(|txn| {
        for sbi in &seed.scheduling_blocks {
            txn.create_scheduling_block(sbi)?;
        }
        for pb in &seed.processing_blocks {
            txn.create_processing_block(pb)?;
            txn.create_processing_block_state(&pb.id, &ProcessingBlockState::default())?;
        }
        Ok(())
    })?;
    info!(
        scheduling_blocks = seed.scheduling_blocks.len(),
        processing_blocks = seed.processing_blocks.len(),
        "store seeded"
    );
    Ok(())
}
