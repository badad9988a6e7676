// src/phase/handle.rs

//! `Phase`: a resource-gated segment of a workflow.
//!
//! Use [`Phase::run`] for the scoped form, or call [`Phase::start`] and
//! [`Phase::finish`] explicitly. A started phase that is dropped without
//! finishing (body error, panic, or the owning future being cancelled)
//! tears itself down in `Drop`, so the PB never stays WAITING or RUNNING.

use std::fmt;

use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::errors::{Result, WorkflowError};
use crate::exec::task_runner::DeploymentJob;
use crate::exec::{DeployOptions, DeploymentHandle};
use crate::phase::protocol::{self, PbBinding};
use crate::phase::state::PhaseState;
use crate::store::ConfigDb;
use crate::types::{PbStatus, WorkflowKind};
use crate::watch::{Completion, WaitLoop};
use crate::workflow::ResourceRequest;

pub struct Phase {
    name: String,
    binding: PbBinding,
    db: ConfigDb,
    requests: Vec<ResourceRequest>,
    deploy_options: DeployOptions,
    state: PhaseState,
    deployments: Vec<DeploymentHandle>,
    status_override: Option<PbStatus>,
    waits_during_enter: u64,
    /// A driver failure has been returned from `finish` once.
    failure_reported: bool,
}

impl fmt::Debug for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Phase")
            .field("name", &self.name)
            .field("pb_id", &self.binding.pb_id)
            .field("kind", &self.binding.kind)
            .field("state", &self.state)
            .field("deployments", &self.deployments)
            .finish_non_exhaustive()
    }
}

impl Phase {
    pub(crate) fn new(
        name: impl Into<String>,
        binding: PbBinding,
        db: ConfigDb,
        requests: Vec<ResourceRequest>,
        deploy_options: DeployOptions,
    ) -> Self {
        Self {
            name: name.into(),
            binding,
            db,
            requests,
            deploy_options,
            state: PhaseState::Created,
            deployments: Vec::new(),
            status_override: None,
            waits_during_enter: 0,
            failure_reported: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pb_id(&self) -> &str {
        &self.binding.pb_id
    }

    pub fn kind(&self) -> WorkflowKind {
        self.binding.kind
    }

    pub fn state(&self) -> PhaseState {
        self.state
    }

    pub fn requests(&self) -> &[ResourceRequest] {
        &self.requests
    }

    /// Deployments created by this phase, in creation order.
    pub fn deployments(&self) -> &[DeploymentHandle] {
        &self.deployments
    }

    /// How many times `start` blocked waiting for resources.
    pub fn waits_during_enter(&self) -> u64 {
        self.waits_during_enter
    }

    pub fn status_override(&self) -> Option<PbStatus> {
        self.status_override
    }

    /// Status to commit on exit instead of the default.
    ///
    /// Only terminal statuses are accepted. For realtime phases the override
    /// is ignored when the SBI ends CANCELLED.
    pub fn set_status(&mut self, status: PbStatus) -> Result<()> {
        if !status.is_terminal() {
            return Err(WorkflowError::lifecycle(format!(
                "cannot set phase {} exit status to {status}",
                self.name
            )));
        }
        self.status_override = Some(status);
        Ok(())
    }

    /// Enter protocol: check liveness, go WAITING, wait for resources, go
    /// RUNNING.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != PhaseState::Created {
            return Err(WorkflowError::lifecycle(format!(
                "phase {} already started ({})",
                self.name, self.state
            )));
        }
        info!(pb_id = %self.binding.pb_id, phase = %self.name, "entering phase");

        let binding = self.binding.clone();
        self.db.txn(|txn| protocol::mark_waiting(txn, &binding))?;
        self.state.transition(PhaseState::Waiting)?;
        info!(pb_id = %binding.pb_id, "waiting for resources");

        let mut wait_loop = WaitLoop::new(&self.db, binding.pb_id.clone());
        let result = wait_loop
            .run(|txn| protocol::resources_step(txn, &binding))
            .await;
        self.waits_during_enter = wait_loop.waits();

        let result = match result {
            Ok(Completion::Ready(())) => Ok(()),
            Ok(Completion::Terminal(status)) => Err(WorkflowError::lifecycle(format!(
                "processing block {} became {status} while waiting for resources",
                binding.pb_id
            ))),
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            self.abandon(&err);
            return Err(err);
        }

        self.state.transition(PhaseState::Running)?;
        info!(pb_id = %binding.pb_id, phase = %self.name, "resources available; phase running");
        Ok(())
    }

    /// Exit protocol after a successful body.
    ///
    /// Realtime phases wait for the SBI to end; batch phases wait for
    /// their deployments.
    ///
    /// A failed deployment driver is returned as `DeploymentFailure` with
    /// nothing written and the phase still RUNNING. The caller picks the
    /// outcome with [`Phase::set_status`] and calls `finish` again; failed
    /// deployments then count as settled. Any other failure tears the
    /// phase down before the error is returned.
    pub async fn finish(&mut self) -> Result<PbStatus> {
        if self.state != PhaseState::Running {
            return Err(WorkflowError::lifecycle(format!(
                "phase {} is not running ({})",
                self.name, self.state
            )));
        }
        info!(pb_id = %self.binding.pb_id, phase = %self.name, "exiting phase");

        let result = match self.binding.kind {
            WorkflowKind::Realtime => self.realtime_exit().await,
            WorkflowKind::Batch => self.batch_exit().await,
        };
        match result {
            Ok(status) => {
                self.state.transition(PhaseState::from(status))?;
                info!(pb_id = %self.binding.pb_id, %status, "phase exited");
                Ok(status)
            }
            Err(err @ WorkflowError::DeploymentFailure { .. }) => {
                warn!(pb_id = %self.binding.pb_id, phase = %self.name, error = %err, "deployment failed; exit status left to the caller");
                Err(err)
            }
            Err(err) => {
                self.abandon(&err);
                Err(err)
            }
        }
    }

    /// Scoped form: `start`, run `body`, then `finish` on success or tear
    /// down on a body error. A `DeploymentFailure` from `finish` leaves the
    /// phase running, as with an explicit `finish`.
    pub async fn run<T, F>(&mut self, body: F) -> Result<T>
    where
        F: AsyncFnOnce(&mut Phase) -> Result<T>,
    {
        self.start().await?;
        match body(&mut *self).await {
            Ok(value) => {
                self.finish().await?;
                Ok(value)
            }
            Err(err) => {
                warn!(pb_id = %self.binding.pb_id, phase = %self.name, error = %err, "phase body failed");
                self.abandon(&err);
                Err(err)
            }
        }
    }

    async fn realtime_exit(&self) -> Result<PbStatus> {
        let status_override = self.status_override;
        let binding = &self.binding;
        let tracked = &self.deployments;
        info!(pb_id = %binding.pb_id, "waiting for scheduling block instance to end");

        let mut wait_loop = WaitLoop::new(&self.db, binding.pb_id.clone());
        let completion = wait_loop
            .run(|txn| protocol::realtime_exit_step(txn, binding, tracked, status_override))
            .await?;
        Ok(completed_status(completion))
    }

    async fn batch_exit(&mut self) -> Result<PbStatus> {
        for handle in &self.deployments {
            if let Err(err) = handle.wait().await {
                if !self.failure_reported {
                    self.failure_reported = true;
                    return Err(err);
                }
                debug!(deploy_id = %handle.id(), "deployment failure already reported");
            }
        }

        let (failed, live): (Vec<DeploymentHandle>, Vec<DeploymentHandle>) = self
            .deployments
            .iter()
            .cloned()
            .partition(DeploymentHandle::has_failed);
        let status_override = self.status_override;
        let binding = &self.binding;
        debug!(pb_id = %binding.pb_id, count = live.len(), "waiting for deployments to finish");

        let mut wait_loop = WaitLoop::new(&self.db, binding.pb_id.clone());
        let completion = wait_loop
            .run(|txn| protocol::batch_exit_step(txn, binding, &live, &failed, status_override))
            .await?;
        Ok(completed_status(completion))
    }

    /// Tear down without waiting. Does nothing once the phase is terminal,
    /// and writes nothing if `cause` means ownership is gone.
    fn abandon(&mut self, cause: &WorkflowError) {
        if self.state.is_terminal() {
            return;
        }
        let pb_id = self.binding.pb_id.clone();
        if cause.forbids_writes() {
            warn!(%pb_id, phase = %self.name, error = %cause, "ownership lost; abandoning phase without writes");
            self.state = PhaseState::Cancelled;
            return;
        }

        let status_override = self.status_override;
        let binding = &self.binding;
        let tracked = &self.deployments;
        let committed = self
            .db
            .txn(|txn| protocol::abandon(txn, binding, tracked, status_override));

        self.state = match committed {
            Ok(Some(status)) => {
                info!(%pb_id, %status, cause = %cause, "phase torn down");
                PhaseState::from(status)
            }
            Ok(None) => {
                warn!(%pb_id, "not the owner any more; phase torn down without writes");
                PhaseState::Cancelled
            }
            Err(err) => {
                error!(%pb_id, error = %err, "failed to tear down phase");
                PhaseState::Cancelled
            }
        };
    }

    fn require_running(&self, what: &str) -> Result<()> {
        if self.state != PhaseState::Running {
            return Err(WorkflowError::lifecycle(format!(
                "cannot {what} in phase {} while {}",
                self.name, self.state
            )));
        }
        Ok(())
    }

    fn track(&mut self, handle: DeploymentHandle) -> DeploymentHandle {
        match self.deployments.iter_mut().find(|h| h.id() == handle.id()) {
            Some(existing) => *existing = handle.clone(),
            None => self.deployments.push(handle.clone()),
        }
        handle
    }

    /// Deploy a Helm chart named `name`.
    pub fn ee_deploy_helm(
        &mut self,
        name: &str,
        values: Option<Map<String, Value>>,
    ) -> Result<DeploymentHandle> {
        self.require_running("deploy")?;
        let handle =
            DeploymentHandle::helm(&self.db, &self.binding.pb_id, name, values.unwrap_or_default())?;
        Ok(self.track(handle))
    }

    /// Deploy a Dask cluster with `n_workers` workers and run `f(address,
    /// args)` once its scheduler is reachable.
    pub fn ee_deploy_dask<F, A, R>(
        &mut self,
        name: &str,
        n_workers: u32,
        f: F,
        args: A,
    ) -> Result<DeploymentHandle>
    where
        F: FnOnce(&str, A) -> anyhow::Result<R> + Send + 'static,
        A: Send + 'static,
        R: fmt::Debug + Send + 'static,
    {
        self.require_running("deploy")?;
        let job: DeploymentJob = Box::new(move |address: &str| {
            let value = f(address, args)?;
            info!(result = ?value, "dask function returned");
            Ok(())
        });
        let handle = DeploymentHandle::dask(
            &self.db,
            &self.binding.pb_id,
            name,
            n_workers,
            job,
            &self.deploy_options,
        )?;
        Ok(self.track(handle))
    }

    /// Deploy a test engine that runs `f(args)` in-process.
    pub fn ee_deploy_test<F, A, R>(&mut self, name: &str, f: F, args: A) -> Result<DeploymentHandle>
    where
        F: FnOnce(A) -> anyhow::Result<R> + Send + 'static,
        A: Send + 'static,
        R: fmt::Debug + Send + 'static,
    {
        self.require_running("deploy")?;
        let job: DeploymentJob = Box::new(move |_address: &str| {
            let value = f(args)?;
            info!(result = ?value, "test function returned");
            Ok(())
        });
        let handle = DeploymentHandle::fake(&self.db, &self.binding.pb_id, name, job)?;
        Ok(self.track(handle))
    }
}

fn completed_status(completion: Completion<PbStatus>) -> PbStatus {
    match completion {
        Completion::Ready(status) | Completion::Terminal(status) => status,
    }
}

impl Drop for Phase {
    fn drop(&mut self) {
        if matches!(self.state, PhaseState::Waiting | PhaseState::Running) {
            warn!(pb_id = %self.binding.pb_id, phase = %self.name, state = %self.state, "phase dropped before finishing");
            let cause = WorkflowError::lifecycle(format!("phase {} dropped before finishing", self.name));
            self.abandon(&cause);
        }
    }
}
