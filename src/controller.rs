// src/controller.rs

//! Stand-ins for the external controllers a workflow program relies on.
//!
//! In a deployed system a resource scheduler grants resources, the
//! observation controller ends SBIs, and the Helm controller reports when a
//! chart is done. The free functions here perform one such action each;
//! [`SimulatedController`] runs them in the background so the binary and
//! the tests can drive workflows end to end.

use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info};

use crate::errors::{Result, WorkflowError};
use crate::store::{ConfigDb, DeploymentKind, Txn};
use crate::types::{DeployStatus, PbStatus, SbiStatus};

/// Set `resources_available` on a PB.
pub fn grant_resources(db: &ConfigDb, pb_id: &str) -> Result<()> {
    db.txn(|txn| grant_in(txn, pb_id).map(|_| ()))?;
    info!(pb_id, "resources granted");
    Ok(())
}

/// Set the status of an SBI.
pub fn set_sbi_status(db: &ConfigDb, sbi_id: &str, status: SbiStatus) -> Result<()> {
    db.txn(|txn| {
        let mut sbi = txn
            .get_scheduling_block(sbi_id)?
            .ok_or_else(|| WorkflowError::NotFound(format!("scheduling block instance {sbi_id}")))?;
        sbi.status = status;
        txn.update_scheduling_block(&sbi)
    })?;
    info!(sbi_id, %status, "scheduling block instance status set");
    Ok(())
}

/// Report a deployment as FINISHED in its PB's state document.
pub fn finish_deployment(db: &ConfigDb, pb_id: &str, deploy_id: &str) -> Result<()> {
    db.txn(|txn| {
        let mut state = txn.require_processing_block_state(pb_id)?;
        state
            .deployments_mut()
            .insert(deploy_id.to_string(), DeployStatus::Finished);
        txn.update_processing_block_state(pb_id, &state)
    })?;
    info!(pb_id, deploy_id, "deployment reported finished");
    Ok(())
}

/// Cancel a PB from outside. A PB that is already terminal is left alone.
pub fn cancel_processing_block(db: &ConfigDb, pb_id: &str) -> Result<()> {
    db.txn(|txn| {
        let mut state = txn.require_processing_block_state(pb_id)?;
        if state.is_terminal() {
            return Ok(());
        }
        state.status = Some(PbStatus::Cancelled);
        txn.update_processing_block_state(pb_id, &state)
    })?;
    info!(pb_id, "processing block cancelled");
    Ok(())
}

fn grant_in(txn: &mut Txn<'_>, pb_id: &str) -> Result<bool> {
    let mut state = txn.require_processing_block_state(pb_id)?;
    if state.resources_available == Some(true) {
        return Ok(false);
    }
    state.resources_available = Some(true);
    txn.update_processing_block_state(pb_id, &state)?;
    Ok(true)
}

#[derive(Debug, Clone, Default)]
pub struct ControllerOptions {
    /// Grant resources to every WAITING PB.
    pub grant_resources: bool,
    /// End every ACTIVE SBI this long after the controller starts.
    pub sbi_duration: Option<Duration>,
    /// Report Helm chart deployments (not Dask clusters) FINISHED as soon
    /// as they appear.
    pub finish_helm: bool,
}

/// Background task reacting to store changes like the external controllers
/// would.
pub struct SimulatedController {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl SimulatedController {
    /// Spawn the controller on its own store session.
    pub fn spawn(db: &ConfigDb, options: ControllerOptions) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = ControllerTask {
            db: db.new_session(),
            sbi_deadline: options.sbi_duration.map(|d| Instant::now() + d),
            options,
            shutdown_rx,
        };
        let handle = tokio::spawn(async move {
            let result = task.run().await;
            if let Err(err) = &result {
                error!(?err, "simulated controller terminated with error");
            }
            result
        });
        Self {
            shutdown_tx,
            handle,
        }
    }

    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.trigger_shutdown();
        match self.handle.await {
            Ok(result) => result,
            Err(err) => Err(anyhow!("simulated controller task panicked: {err}")),
        }
    }
}

struct ControllerTask {
    db: ConfigDb,
    options: ControllerOptions,
    sbi_deadline: Option<Instant>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ControllerTask {
    async fn run(mut self) -> anyhow::Result<()> {
        info!(options = ?self.options, "starting simulated controller");
        let mut revisions = self.db.backend().subscribe();

        loop {
            self.pass()?;

            let deadline = self.sbi_deadline;
            tokio::select! {
                changed = revisions.changed() => {
                    if changed.is_err() {
                        debug!("config DB change channel closed");
                        break;
                    }
                }
                _ = async {
                    match deadline {
                        Some(at) => sleep_until(at).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    self.end_sbis()?;
                    self.sbi_deadline = None;
                }
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!("simulated controller shutting down");
                        break;
                    }
                }
            }
        }
        self.db.close();
        Ok(())
    }

    /// React to the current store contents.
    fn pass(&self) -> Result<()> {
        let options = &self.options;
        if !options.grant_resources && !options.finish_helm {
            return Ok(());
        }

        self.db.txn(|txn| {
            for pb_id in txn.list_processing_blocks() {
                let Some(state) = txn.get_processing_block_state(&pb_id)? else {
                    continue;
                };
                if options.grant_resources
                    && state.status == Some(PbStatus::Waiting)
                    && grant_in(txn, &pb_id)?
                {
                    debug!(%pb_id, "controller granted resources");
                }
                if options.finish_helm {
                    finish_helm_in(txn, &pb_id)?;
                }
            }
            Ok(())
        })
    }

    fn end_sbis(&self) -> Result<()> {
        let ended = self.db.txn(|txn| {
            let mut ended = Vec::new();
            for sbi_id in txn.list_scheduling_blocks() {
                let Some(mut sbi) = txn.get_scheduling_block(&sbi_id)? else {
                    continue;
                };
                if sbi.status == SbiStatus::Active {
                    sbi.status = SbiStatus::Finished;
                    txn.update_scheduling_block(&sbi)?;
                    ended.push(sbi_id);
                }
            }
            Ok(ended)
        })?;
        for sbi_id in ended {
            info!(%sbi_id, "controller ended scheduling block instance");
        }
        Ok(())
    }
}

fn finish_helm_in(txn: &mut Txn<'_>, pb_id: &str) -> Result<()> {
    let Some(mut state) = txn.get_processing_block_state(pb_id)? else {
        return Ok(());
    };
    let running: Vec<String> = match &state.deployments {
        Some(deployments) => deployments
            .iter()
            .filter(|(_, status)| **status == DeployStatus::Running)
            .map(|(id, _)| id.clone())
            .collect(),
        None => return Ok(()),
    };

    let mut changed = false;
    for deploy_id in running {
        let Some(deployment) = txn.get_deployment(&deploy_id)? else {
            continue;
        };
        let is_chart = deployment.kind == DeploymentKind::Helm
            && deployment
                .helm_chart()
                .is_some_and(|chart| chart.chart != "dask/dask");
        if is_chart {
            state
                .deployments_mut()
                .insert(deploy_id.clone(), DeployStatus::Finished);
            debug!(pb_id, %deploy_id, "controller finished helm deployment");
            changed = true;
        }
    }
    if changed {
        txn.update_processing_block_state(pb_id, &state)?;
    }
    Ok(())
}
