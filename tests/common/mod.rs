#![allow(dead_code)]

pub use sdp_workflow_test_utils::builders;
pub use sdp_workflow_test_utils::fake_probe::FakeProbe;
pub use sdp_workflow_test_utils::{init_tracing, sessions, with_timeout};

use std::sync::Arc;
use std::time::Duration;

use sdp_workflow::config::WorkflowConfig;
use sdp_workflow::store::{ConfigDb, ProcessingBlock};
use sdp_workflow::workflow::ProcessingBlockHandle;

use crate::common::builders::{ConfigBuilder, seed_pb};

/// Config with fast endpoint probing.
pub fn fast_config() -> Arc<WorkflowConfig> {
    Arc::new(ConfigBuilder::new().endpoint_retries(3, 1).build())
}

/// Seed `pb` and claim it on `db`.
pub fn seed_and_claim(db: &ConfigDb, pb: ProcessingBlock) -> ProcessingBlockHandle {
    seed_pb(db, &pb);
    ProcessingBlockHandle::claim_with_config(db.clone(), &pb.id, fast_config())
        .expect("claiming processing block")
}

/// Run `action` on the controller session after `delay`.
pub fn after<F>(delay: Duration, action: F) -> tokio::task::JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        action();
    })
}
