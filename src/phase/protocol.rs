// src/phase/protocol.rs

//! Store-side steps of the phase enter/exit protocols.
//!
//! Every function here runs inside one transaction and decides one step;
//! `Phase` strings them together with `WaitLoop`. Keeping the steps free of
//! any waiting makes each observe-then-commit step atomic: ownership, the
//! observed statuses and the commit all belong to the same transaction.

use tracing::{debug, info};

use crate::errors::{Result, WorkflowError};
use crate::exec::DeploymentHandle;
use crate::exec::deployment::remove_record;
use crate::store::Txn;
use crate::types::{DeployStatus, PbStatus, WorkflowKind};
use crate::watch::Step;

/// Which PB (and, for realtime workflows, which SBI) a phase is bound to.
#[derive(Debug, Clone)]
pub struct PbBinding {
    pub pb_id: String,
    pub sbi_id: Option<String>,
    pub kind: WorkflowKind,
}

impl PbBinding {
    fn realtime_sbi_id(&self) -> Result<&str> {
        self.sbi_id.as_deref().ok_or_else(|| {
            WorkflowError::lifecycle(format!(
                "realtime processing block {} has no scheduling block instance",
                self.pb_id
            ))
        })
    }

    /// Prefix of every deployment id belonging to this PB.
    fn deploy_prefix(&self) -> String {
        format!("proc-{}-", self.pb_id)
    }
}

/// PB not terminal, ownership held, and (realtime) SBI not terminal.
pub(crate) fn check_liveness(txn: &mut Txn<'_>, binding: &PbBinding) -> Result<()> {
    let pb_id = binding.pb_id.as_str();
    let state = txn.require_processing_block_state(pb_id)?;
    if let Some(status) = state.status.filter(|s| s.is_terminal()) {
        return Err(WorkflowError::lifecycle(format!(
            "processing block {pb_id} is already {status}"
        )));
    }
    if !txn.is_processing_block_owner(pb_id)? {
        return Err(WorkflowError::LostOwnership {
            pb_id: pb_id.to_string(),
        });
    }
    if binding.kind == WorkflowKind::Realtime {
        let sbi_id = binding.realtime_sbi_id()?;
        let sbi = txn
            .get_scheduling_block(sbi_id)?
            .ok_or_else(|| WorkflowError::NotFound(format!("scheduling block instance {sbi_id}")))?;
        if sbi.status.is_terminal() {
            return Err(WorkflowError::lifecycle(format!(
                "scheduling block instance {sbi_id} is already {}",
                sbi.status
            )));
        }
    }
    Ok(())
}

/// Liveness check, then status WAITING.
pub(crate) fn mark_waiting(txn: &mut Txn<'_>, binding: &PbBinding) -> Result<()> {
    check_liveness(txn, binding)?;
    set_status(txn, &binding.pb_id, PbStatus::Waiting)
}

/// One iteration of the resource wait.
///
/// Once `resources_available` is true the deployments map is created if
/// missing and the status moves to RUNNING, in the same transaction.
pub(crate) fn resources_step(txn: &mut Txn<'_>, binding: &PbBinding) -> Result<Step<()>> {
    check_liveness(txn, binding)?;
    let pb_id = binding.pb_id.as_str();
    let mut state = txn.require_processing_block_state(pb_id)?;
    if state.resources_available != Some(true) {
        debug!(pb_id, "resources not available yet");
        return Ok(Step::Continue);
    }
    state.deployments_mut();
    state.status = Some(PbStatus::Running);
    txn.update_processing_block_state(pb_id, &state)?;
    Ok(Step::Break(()))
}

/// One iteration of the realtime exit.
///
/// While the SBI is active nothing is written. Once it is terminal:
/// tracked deployments get the SBI's terminal status, registry records of
/// this PB's terminal deployments are deleted, and the PB status is
/// committed (CANCELLED if the SBI was cancelled, otherwise the override
/// or FINISHED).
pub(crate) fn realtime_exit_step(
    txn: &mut Txn<'_>,
    binding: &PbBinding,
    tracked: &[DeploymentHandle],
    status_override: Option<PbStatus>,
) -> Result<Step<PbStatus>> {
    let pb_id = binding.pb_id.as_str();
    let sbi_id = binding.realtime_sbi_id()?;
    let sbi = txn
        .get_scheduling_block(sbi_id)?
        .ok_or_else(|| WorkflowError::NotFound(format!("scheduling block instance {sbi_id}")))?;
    let Some(observed) = sbi.status.terminal_pb_status() else {
        return Ok(Step::Continue);
    };
    info!(pb_id, sbi_id, sbi_status = %sbi.status, "scheduling block instance ended");

    let mut state = txn.require_processing_block_state(pb_id)?;
    let deploy_status = DeployStatus::from(sbi.status);
    for handle in tracked {
        state.deployments_mut().insert(handle.id().to_string(), deploy_status);
    }

    for deploy_id in txn.list_deployments(&binding.deploy_prefix()) {
        if state.deployment_status(&deploy_id).is_some_and(DeployStatus::is_terminal) {
            remove_record(txn, &deploy_id);
            debug!(pb_id, %deploy_id, "deployment record removed");
        }
    }

    let committed = match observed {
        PbStatus::Finished => status_override.unwrap_or(PbStatus::Finished),
        other => other,
    };
    state.status = Some(committed);
    txn.update_processing_block_state(pb_id, &state)?;
    Ok(Step::Break(committed))
}

/// One iteration of the batch exit: wait until every live deployment is
/// FINISHED, then commit the override or FINISHED.
///
/// `failed` holds deployments whose driver already failed and whose failure
/// the caller has seen. They never report FINISHED, so they are not waited
/// on; their registry records are removed with the final commit.
pub(crate) fn batch_exit_step(
    txn: &mut Txn<'_>,
    binding: &PbBinding,
    live: &[DeploymentHandle],
    failed: &[DeploymentHandle],
    status_override: Option<PbStatus>,
) -> Result<Step<PbStatus>> {
    let mut all_finished = true;
    for handle in live {
        if !handle.is_finished(txn)? {
            all_finished = false;
        }
    }
    if !all_finished {
        return Ok(Step::Continue);
    }

    for handle in failed {
        remove_record(txn, handle.id());
    }
    let committed = status_override.unwrap_or(PbStatus::Finished);
    set_status(txn, &binding.pb_id, committed)?;
    Ok(Step::Break(committed))
}

/// Forced tear-down for a phase that did not complete normally.
///
/// Returns the terminal status the PB ends up with, or `None` if this
/// client no longer owns it (nothing is written then).
pub(crate) fn abandon(
    txn: &mut Txn<'_>,
    binding: &PbBinding,
    tracked: &[DeploymentHandle],
    status_override: Option<PbStatus>,
) -> Result<Option<PbStatus>> {
    let pb_id = binding.pb_id.as_str();
    if !txn.is_processing_block_owner(pb_id)? {
        return Ok(None);
    }
    for handle in tracked {
        remove_record(txn, handle.id());
    }

    let Some(mut state) = txn.get_processing_block_state(pb_id)? else {
        return Ok(None);
    };
    if let Some(status) = state.status.filter(|s| s.is_terminal()) {
        return Ok(Some(status));
    }
    let committed = status_override.unwrap_or(PbStatus::Cancelled);
    state.status = Some(committed);
    txn.update_processing_block_state(pb_id, &state)?;
    Ok(Some(committed))
}

fn set_status(txn: &mut Txn<'_>, pb_id: &str, status: PbStatus) -> Result<()> {
    let mut state = txn.require_processing_block_state(pb_id)?;
    state.status = Some(status);
    txn.update_processing_block_state(pb_id, &state)
}
