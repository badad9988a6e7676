// tests/controller.rs

mod common;
use crate::common::builders::{PbBuilder, SbiBuilder, deployment_ids, pb_state, seed_sbi};
use crate::common::{fast_config, init_tracing, seed_and_claim, sessions, with_timeout};

use std::time::Duration;

use sdp_workflow::controller::{ControllerOptions, SimulatedController};
use sdp_workflow::phase::{Phase, PhaseState};
use sdp_workflow::seed::{SeedFile, seed_store};
use sdp_workflow::store::ConfigDb;
use sdp_workflow::types::{DeployStatus, PbStatus, SbiStatus};
use sdp_workflow::workflow::ProcessingBlockHandle;
use sdp_workflow::workflows::run_builtin;

fn sbi_status(db: &ConfigDb, sbi_id: &str) -> SbiStatus {
    db.txn(|txn| txn.get_scheduling_block(sbi_id))
        .unwrap()
        .expect("scheduling block instance exists")
        .status
}

#[tokio::test]
async fn grants_resources_to_waiting_pbs() {
    init_tracing();
    let (db, controller_db) = sessions();
    let pb = seed_and_claim(&db, PbBuilder::batch("pb-c").build());
    let controller = SimulatedController::spawn(
        &controller_db,
        ControllerOptions {
            grant_resources: true,
            ..ControllerOptions::default()
        },
    );

    let mut phase = pb.create_phase("Work", vec![]);
    with_timeout(phase.start()).await.unwrap();

    assert_eq!(phase.state(), PhaseState::Running);
    assert_eq!(pb_state(&db, "pb-c").resources_available, Some(true));
    assert_eq!(phase.finish().await.unwrap(), PbStatus::Finished);

    controller.shutdown().await.unwrap();
}

#[tokio::test]
async fn ends_active_sbis_after_the_duration() {
    init_tracing();
    let (db, controller_db) = sessions();
    seed_sbi(&db, &SbiBuilder::new("sbi-c").build());
    seed_sbi(
        &db,
        &SbiBuilder::new("sbi-old").status(SbiStatus::Cancelled).build(),
    );
    let controller = SimulatedController::spawn(
        &controller_db,
        ControllerOptions {
            sbi_duration: Some(Duration::from_millis(50)),
            ..ControllerOptions::default()
        },
    );

    assert_eq!(sbi_status(&db, "sbi-c"), SbiStatus::Active);
    with_timeout(async {
        while sbi_status(&db, "sbi-c") == SbiStatus::Active {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    assert_eq!(sbi_status(&db, "sbi-c"), SbiStatus::Finished);
    assert_eq!(sbi_status(&db, "sbi-old"), SbiStatus::Cancelled);
    controller.shutdown().await.unwrap();
}

#[tokio::test]
async fn finishes_helm_charts_so_batch_exit_completes() {
    init_tracing();
    let (db, controller_db) = sessions();
    let pb = seed_and_claim(&db, PbBuilder::batch("pb-h").build());
    let controller = SimulatedController::spawn(
        &controller_db,
        ControllerOptions {
            grant_resources: true,
            finish_helm: true,
            ..ControllerOptions::default()
        },
    );

    let mut phase = pb.create_phase("Work", vec![]);
    with_timeout(phase.run(async |phase: &mut Phase| {
        phase.ee_deploy_helm("imaging", None)?;
        Ok(())
    }))
    .await
    .unwrap();

    assert_eq!(phase.state(), PhaseState::Finished);
    let state = pb_state(&db, "pb-h");
    assert_eq!(state.status, Some(PbStatus::Finished));
    assert_eq!(
        state.deployment_status("proc-pb-h-imaging"),
        Some(DeployStatus::Finished)
    );
    assert!(deployment_ids(&db).is_empty());

    controller.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_without_work_is_clean() {
    init_tracing();
    let (_db, controller_db) = sessions();
    let controller = SimulatedController::spawn(&controller_db, ControllerOptions::default());
    with_timeout(controller.shutdown()).await.unwrap();
}

async fn run_demo(pb_id: &str, sbi_duration: Duration) -> ConfigDb {
    let (db, controller_db) = sessions();
    seed_store(&db, &SeedFile::demo()).unwrap();
    let controller = SimulatedController::spawn(
        &controller_db,
        ControllerOptions {
            grant_resources: true,
            sbi_duration: Some(sbi_duration),
            finish_helm: true,
        },
    );

    let pb = ProcessingBlockHandle::claim_with_config(db.clone(), pb_id, fast_config()).unwrap();
    with_timeout(run_builtin(&pb)).await.unwrap();
    pb.exit();
    controller.shutdown().await.unwrap();
    controller_db
}

#[tokio::test]
async fn demo_batch_workflow_runs_to_completion() {
    init_tracing();
    let db = run_demo("pb-demo-batch", Duration::from_secs(60)).await;

    let state = pb_state(&db, "pb-demo-batch");
    assert_eq!(state.status, Some(PbStatus::Finished));
    assert_eq!(
        state.deployment_status("proc-pb-demo-batch-test_batch"),
        Some(DeployStatus::Finished)
    );
    assert!(deployment_ids(&db).is_empty());
    // The realtime PB was never claimed.
    assert_eq!(pb_state(&db, "pb-demo-realtime").status, None);
}

#[tokio::test]
async fn demo_realtime_workflow_follows_the_sbi() {
    init_tracing();
    let db = run_demo("pb-demo-realtime", Duration::from_millis(300)).await;

    let state = pb_state(&db, "pb-demo-realtime");
    assert_eq!(state.status, Some(PbStatus::Finished));
    assert_eq!(
        state.deployment_status("proc-pb-demo-realtime-receive"),
        Some(DeployStatus::Finished)
    );
    assert!(state.receive_addresses.is_some());
    assert_eq!(sbi_status(&db, "sbi-demo-001"), SbiStatus::Finished);
    assert!(deployment_ids(&db).is_empty());
}
