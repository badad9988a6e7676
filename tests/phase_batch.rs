// tests/phase_batch.rs

mod common;
use crate::common::builders::{PbBuilder, deployment_ids, pb_state, pb_status};
use crate::common::{after, init_tracing, seed_and_claim, sessions, with_timeout};

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::anyhow;

use sdp_workflow::controller::{cancel_processing_block, finish_deployment, grant_resources};
use sdp_workflow::errors::WorkflowError;
use sdp_workflow::phase::{Phase, PhaseState};
use sdp_workflow::types::{DeployStatus, PbStatus};

#[tokio::test]
async fn empty_phase_finishes_the_pb() {
    init_tracing();
    let (db, controller) = sessions();
    let pb = seed_and_claim(&db, PbBuilder::batch("pb-1").build());
    grant_resources(&controller, "pb-1").unwrap();

    let mut phase = pb.create_phase("Work", vec![]);
    with_timeout(phase.run(async |_phase: &mut Phase| Ok(()))).await.unwrap();

    assert_eq!(phase.state(), PhaseState::Finished);
    assert_eq!(phase.waits_during_enter(), 0);
    let state = pb_state(&db, "pb-1");
    assert_eq!(state.status, Some(PbStatus::Finished));
    assert_eq!(state.deployments, Some(BTreeMap::new()));
}

#[tokio::test]
async fn start_waits_for_resources() {
    init_tracing();
    let (db, controller) = sessions();
    let pb = seed_and_claim(&db, PbBuilder::batch("pb-1").build());

    let mut phase = pb.create_phase("Work", vec![]);
    let watcher = controller.clone();
    let grant = after(Duration::from_millis(50), move || {
        // Still gated when the scheduler gets round to it.
        assert_eq!(pb_status(&watcher, "pb-1"), Some(PbStatus::Waiting));
        grant_resources(&watcher, "pb-1").unwrap();
    });

    with_timeout(phase.start()).await.unwrap();
    grant.await.unwrap();

    assert_eq!(phase.state(), PhaseState::Running);
    assert!(phase.waits_during_enter() >= 1);
    assert_eq!(pb_status(&db, "pb-1"), Some(PbStatus::Running));

    with_timeout(phase.finish()).await.unwrap();
    assert_eq!(pb_status(&db, "pb-1"), Some(PbStatus::Finished));
}

#[tokio::test]
async fn function_deployment_finishes_before_the_pb() {
    init_tracing();
    let (db, controller) = sessions();
    let pb = seed_and_claim(&db, PbBuilder::batch("pb-3").build());
    grant_resources(&controller, "pb-3").unwrap();

    let mut phase = pb.create_phase("Work", vec![]);
    let handle = with_timeout(phase.run(async |phase: &mut Phase| {
        phase.ee_deploy_test("calc", |(a, b): (i32, i32)| Ok(a + b), (2, 3))
    }))
    .await
    .unwrap();

    assert_eq!(handle.id(), "proc-pb-3-calc");
    let state = pb_state(&db, "pb-3");
    assert_eq!(state.status, Some(PbStatus::Finished));
    assert_eq!(
        state.deployment_status("proc-pb-3-calc"),
        Some(DeployStatus::Finished)
    );
    assert!(deployment_ids(&db).is_empty());
}

#[tokio::test]
async fn helm_deployment_waits_for_the_controller() {
    init_tracing();
    let (db, controller) = sessions();
    let pb = seed_and_claim(&db, PbBuilder::batch("pb-1").build());
    grant_resources(&controller, "pb-1").unwrap();

    let mut phase = pb.create_phase("Work", vec![]);
    with_timeout(phase.start()).await.unwrap();
    phase.ee_deploy_helm("cbf-sdp-emulator", None).unwrap();

    let watcher = controller.clone();
    let finish = after(Duration::from_millis(50), move || {
        assert_eq!(pb_status(&watcher, "pb-1"), Some(PbStatus::Running));
        finish_deployment(&watcher, "pb-1", "proc-pb-1-cbf-sdp-emulator").unwrap();
    });

    let status = with_timeout(phase.finish()).await.unwrap();
    finish.await.unwrap();

    assert_eq!(status, PbStatus::Finished);
    assert_eq!(pb_status(&db, "pb-1"), Some(PbStatus::Finished));
    assert!(deployment_ids(&db).is_empty());
}

#[tokio::test]
async fn body_error_cancels_the_pb_and_removes_deployments() {
    init_tracing();
    let (db, controller) = sessions();
    let pb = seed_and_claim(&db, PbBuilder::batch("pb-1").build());
    grant_resources(&controller, "pb-1").unwrap();

    let mut phase = pb.create_phase("Work", vec![]);
    let result: Result<(), _> = with_timeout(phase.run(async |phase: &mut Phase| {
        phase.ee_deploy_helm("vis-receive", None)?;
        assert_eq!(deployment_ids(&db), vec!["proc-pb-1-vis-receive".to_string()]);
        Err(WorkflowError::Other(anyhow!("processing failed")))
    }))
    .await;

    assert!(matches!(result, Err(WorkflowError::Other(_))));
    assert_eq!(phase.state(), PhaseState::Cancelled);
    assert_eq!(pb_status(&db, "pb-1"), Some(PbStatus::Cancelled));
    assert!(deployment_ids(&db).is_empty());
}

#[tokio::test]
async fn failing_function_leaves_the_exit_status_to_the_caller() {
    init_tracing();
    let (db, controller) = sessions();
    let pb = seed_and_claim(&db, PbBuilder::batch("pb-1").build());
    grant_resources(&controller, "pb-1").unwrap();

    let mut phase = pb.create_phase("Work", vec![]);
    let result = with_timeout(phase.run(async |phase: &mut Phase| {
        phase.ee_deploy_test(
            "broken",
            |_: ()| -> anyhow::Result<()> { Err(anyhow!("no data")) },
            (),
        )?;
        Ok(())
    }))
    .await;

    match result {
        Err(WorkflowError::DeploymentFailure { deploy_id, reason }) => {
            assert_eq!(deploy_id, "proc-pb-1-broken");
            assert!(reason.contains("no data"), "unexpected reason: {reason}");
        }
        other => panic!("Expected DeploymentFailure, got: {other:?}"),
    }
    // Nothing committed yet: the phase is still running.
    assert_eq!(phase.state(), PhaseState::Running);
    assert_eq!(pb_status(&db, "pb-1"), Some(PbStatus::Running));
    assert_eq!(deployment_ids(&db), vec!["proc-pb-1-broken".to_string()]);

    phase.set_status(PbStatus::Cancelled).unwrap();
    let status = with_timeout(phase.finish()).await.unwrap();

    assert_eq!(status, PbStatus::Cancelled);
    assert_eq!(phase.state(), PhaseState::Cancelled);
    assert_eq!(pb_status(&db, "pb-1"), Some(PbStatus::Cancelled));
    assert!(deployment_ids(&db).is_empty());
}

#[tokio::test]
async fn caller_may_finish_after_a_deployment_failure() {
    init_tracing();
    let (db, controller) = sessions();
    let pb = seed_and_claim(&db, PbBuilder::batch("pb-1").build());
    grant_resources(&controller, "pb-1").unwrap();

    let mut phase = pb.create_phase("Work", vec![]);
    with_timeout(phase.start()).await.unwrap();
    phase
        .ee_deploy_test(
            "broken",
            |_: ()| -> anyhow::Result<()> { Err(anyhow!("no data")) },
            (),
        )
        .unwrap();
    phase
        .ee_deploy_test("ok", |x: u32| Ok(x + 1), 1)
        .unwrap();

    assert!(matches!(
        with_timeout(phase.finish()).await,
        Err(WorkflowError::DeploymentFailure { .. })
    ));
    assert_eq!(pb_status(&db, "pb-1"), Some(PbStatus::Running));

    // No override: the failed deployment counts as settled.
    let status = with_timeout(phase.finish()).await.unwrap();

    assert_eq!(status, PbStatus::Finished);
    let state = pb_state(&db, "pb-1");
    assert_eq!(state.status, Some(PbStatus::Finished));
    assert_eq!(
        state.deployment_status("proc-pb-1-ok"),
        Some(DeployStatus::Finished)
    );
    assert_eq!(
        state.deployment_status("proc-pb-1-broken"),
        Some(DeployStatus::Running)
    );
    assert!(deployment_ids(&db).is_empty());
}

#[tokio::test]
async fn dropping_after_a_deployment_failure_cancels_the_pb() {
    init_tracing();
    let (db, controller) = sessions();
    let pb = seed_and_claim(&db, PbBuilder::batch("pb-1").build());
    grant_resources(&controller, "pb-1").unwrap();

    {
        let mut phase = pb.create_phase("Work", vec![]);
        with_timeout(phase.start()).await.unwrap();
        phase
            .ee_deploy_test(
                "broken",
                |_: ()| -> anyhow::Result<()> { Err(anyhow!("no data")) },
                (),
            )
            .unwrap();
        assert!(with_timeout(phase.finish()).await.is_err());
    }

    assert_eq!(pb_status(&db, "pb-1"), Some(PbStatus::Cancelled));
    assert!(deployment_ids(&db).is_empty());
}

#[tokio::test]
async fn status_override_is_committed_on_exit() {
    init_tracing();
    let (db, controller) = sessions();
    let pb = seed_and_claim(&db, PbBuilder::batch("pb-1").build());
    grant_resources(&controller, "pb-1").unwrap();

    let mut phase = pb.create_phase("Work", vec![]);
    assert!(matches!(
        phase.set_status(PbStatus::Running),
        Err(WorkflowError::LifecycleViolation(_))
    ));
    with_timeout(phase.run(async |phase: &mut Phase| phase.set_status(PbStatus::Cancelled)))
        .await
        .unwrap();

    assert_eq!(phase.state(), PhaseState::Cancelled);
    assert_eq!(pb_status(&db, "pb-1"), Some(PbStatus::Cancelled));
}

#[tokio::test]
async fn external_cancel_during_exit_is_reported() {
    init_tracing();
    let (db, controller) = sessions();
    let pb = seed_and_claim(&db, PbBuilder::batch("pb-1").build());
    grant_resources(&controller, "pb-1").unwrap();

    let mut phase = pb.create_phase("Work", vec![]);
    with_timeout(phase.start()).await.unwrap();
    phase.ee_deploy_helm("never-ends", None).unwrap();

    let cancel = after(Duration::from_millis(50), move || {
        cancel_processing_block(&controller, "pb-1").unwrap();
    });
    let result = with_timeout(phase.finish()).await;
    cancel.await.unwrap();

    assert!(matches!(result, Err(WorkflowError::Cancelled { .. })));
    assert_eq!(phase.state(), PhaseState::Cancelled);
    assert_eq!(pb_status(&db, "pb-1"), Some(PbStatus::Cancelled));
    assert!(deployment_ids(&db).is_empty());
}

#[tokio::test]
async fn enter_on_a_terminal_pb_is_a_lifecycle_violation() {
    init_tracing();
    let (db, controller) = sessions();
    let pb = seed_and_claim(&db, PbBuilder::batch("pb-1").build());
    grant_resources(&controller, "pb-1").unwrap();
    cancel_processing_block(&controller, "pb-1").unwrap();

    let mut phase = pb.create_phase("Work", vec![]);
    let result = with_timeout(phase.start()).await;

    assert!(matches!(result, Err(WorkflowError::LifecycleViolation(_))));
    assert_eq!(phase.state(), PhaseState::Created);
    assert_eq!(pb_status(&db, "pb-1"), Some(PbStatus::Cancelled));
}

#[tokio::test]
async fn deploying_outside_running_is_rejected() {
    init_tracing();
    let (db, _controller) = sessions();
    let pb = seed_and_claim(&db, PbBuilder::batch("pb-1").build());

    let mut phase = pb.create_phase("Work", vec![]);
    assert!(matches!(
        phase.ee_deploy_helm("too-early", None),
        Err(WorkflowError::LifecycleViolation(_))
    ));
    assert!(deployment_ids(&db).is_empty());
}

#[tokio::test]
async fn dropping_a_started_phase_cancels_the_pb() {
    init_tracing();
    let (db, controller) = sessions();
    let pb = seed_and_claim(&db, PbBuilder::batch("pb-1").build());
    grant_resources(&controller, "pb-1").unwrap();

    {
        let mut phase = pb.create_phase("Work", vec![]);
        with_timeout(phase.start()).await.unwrap();
        phase.ee_deploy_helm("orphan", None).unwrap();
    }

    assert_eq!(pb_status(&db, "pb-1"), Some(PbStatus::Cancelled));
    assert!(deployment_ids(&db).is_empty());
}

#[tokio::test]
async fn a_second_phase_cannot_start_after_the_first_finished() {
    init_tracing();
    let (db, controller) = sessions();
    let pb = seed_and_claim(&db, PbBuilder::batch("pb-1").build());
    grant_resources(&controller, "pb-1").unwrap();

    let mut first = pb.create_phase("Work", vec![]);
    with_timeout(first.run(async |_phase: &mut Phase| Ok(()))).await.unwrap();

    let mut second = pb.create_phase("Again", vec![]);
    assert!(matches!(
        with_timeout(second.start()).await,
        Err(WorkflowError::LifecycleViolation(_))
    ));
    assert!(matches!(
        with_timeout(first.start()).await,
        Err(WorkflowError::LifecycleViolation(_))
    ));
}

#[tokio::test]
async fn start_without_ownership_is_lost_ownership_and_writes_nothing() {
    init_tracing();
    let (db, controller) = sessions();
    let pb = seed_and_claim(&db, PbBuilder::batch("pb-1").build());
    db.close();

    let mut phase = pb.create_phase("Work", vec![]);
    let result = with_timeout(phase.start()).await;

    assert!(matches!(result, Err(WorkflowError::LostOwnership { .. })));
    assert_eq!(phase.state(), PhaseState::Created);
    assert_eq!(pb_status(&controller, "pb-1"), None);
}
