// src/workflows.rs

//! Built-in test workflows run by the binary.
//!
//! - `test_batch`: requests buffer space, deploys a test engine that sleeps
//!   for `parameters.duration` seconds, and finishes once it has.
//! - `test_realtime`: publishes receive addresses, deploys a receive chart
//!   and runs until the SBI ends.

use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::errors::Result;
use crate::phase::Phase;
use crate::types::WorkflowKind;
use crate::workflow::{ProcessingBlockHandle, ReceiveOptions, ResourceRequest};

#[derive(Debug, Clone, Deserialize)]
pub struct BatchParameters {
    /// Seconds the test engine pretends to process.
    #[serde(default = "default_duration")]
    pub duration: f64,
}

fn default_duration() -> f64 {
    1.0
}

pub async fn test_batch(pb: &ProcessingBlockHandle) -> Result<()> {
    let parameters: BatchParameters = pb.get_parameters_as()?;
    let requests: Vec<ResourceRequest> = vec![
        pb.request_buffer(100e6, &["sdm"]).into(),
        pb.request_buffer(parameters.duration * 6e15 / 3600.0, &["visibilities"])
            .into(),
    ];

    let mut phase = pb.create_phase("Work", requests);
    let duration = parameters.duration;
    phase
        .run(async |phase: &mut Phase| {
            phase.ee_deploy_test(
                "test_batch",
                |secs: f64| {
                    info!(seconds = secs, "starting processing");
                    std::thread::sleep(Duration::from_secs_f64(secs.max(0.0)));
                    info!("finished processing");
                    Ok(secs)
                },
                duration,
            )?;
            Ok(())
        })
        .await
}

pub async fn test_realtime(pb: &ProcessingBlockHandle) -> Result<()> {
    let scan_types = pb.get_scan_types()?;
    let requests: Vec<ResourceRequest> = vec![pb.request_buffer(100e6, &["sdm"]).into()];

    let mut phase = pb.create_phase("Work", requests);
    phase
        .run(async |phase: &mut Phase| {
            let receive = phase.ee_deploy_helm("receive", None)?;
            let addresses = pb.receive_addresses(
                &scan_types,
                ReceiveOptions {
                    statefulset: Some(receive.id().to_string()),
                    ..ReceiveOptions::default()
                },
            )?;
            info!(%addresses, "receive addresses");
            Ok(())
        })
        .await
}

/// Run the built-in workflow for the PB's workflow kind.
pub async fn run_builtin(pb: &ProcessingBlockHandle) -> Result<()> {
    match pb.workflow_kind() {
        WorkflowKind::Batch => test_batch(pb).await,
        WorkflowKind::Realtime => test_realtime(pb).await,
    }
}
