// src/exec/deployment.rs

//! Execution engine deployments owned by a phase.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::DeploySection;
use crate::errors::{Result, WorkflowError};
use crate::exec::backend::{EndpointProbe, TcpProbe};
use crate::exec::task_runner::{DeploymentJob, DriverContext, spawn_dask_driver, spawn_job_driver};
use crate::store::{ConfigDb, Deployment, HelmChart, Txn, deploy_id};
use crate::types::DeployStatus;

/// Settings shared by every deployment a phase creates.
#[derive(Clone)]
pub struct DeployOptions {
    pub helm_namespace: String,
    pub dask_scheduler_port: u16,
    pub endpoint_retries: u32,
    pub endpoint_retry_interval: Duration,
    pub probe: Arc<dyn EndpointProbe>,
}

impl fmt::Debug for DeployOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeployOptions")
            .field("helm_namespace", &self.helm_namespace)
            .field("dask_scheduler_port", &self.dask_scheduler_port)
            .field("endpoint_retries", &self.endpoint_retries)
            .field("endpoint_retry_interval", &self.endpoint_retry_interval)
            .finish_non_exhaustive()
    }
}

impl DeployOptions {
    pub fn from_config(cfg: &DeploySection) -> Self {
        Self {
            helm_namespace: cfg.helm_namespace.clone(),
            dask_scheduler_port: cfg.dask_scheduler_port,
            endpoint_retries: cfg.endpoint_retries,
            endpoint_retry_interval: cfg.endpoint_retry_interval(),
            probe: Arc::new(TcpProbe::new(cfg.probe_timeout())),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn EndpointProbe>) -> Self {
        self.probe = probe;
        self
    }
}

/// Retained driver task of a deployment and, once joined, its outcome.
#[derive(Default)]
struct DriverSlot {
    task: Mutex<Option<JoinHandle<Result<()>>>>,
    outcome: OnceLock<std::result::Result<(), String>>,
}

/// Handle on one deployment of a processing block.
///
/// Cheap to clone; clones share the driver task. Completion is read from
/// the `deployments` map of the PB state document, never from the driver
/// task itself: who writes `FINISHED` depends on the kind of deployment.
/// - function-executing deployments (test, Dask): their driver task, after
///   the function returns;
/// - Helm deployments: an external controller, or the realtime phase exit
///   when the SBI ends.
#[derive(Clone)]
pub struct DeploymentHandle {
    id: String,
    pb_id: String,
    db: ConfigDb,
    driver: Arc<DriverSlot>,
}

impl fmt::Debug for DeploymentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeploymentHandle")
            .field("id", &self.id)
            .field("pb_id", &self.pb_id)
            .finish_non_exhaustive()
    }
}

impl DeploymentHandle {
    /// Record `RUNNING` for the deployment and submit its record, in one
    /// transaction. Deploying the same name twice is idempotent: the
    /// existing registry record is kept.
    fn register(db: &ConfigDb, pb_id: &str, deployment: &Deployment) -> Result<Self> {
        let id = deployment.id.clone();
        db.txn(|txn| {
            if !txn.is_processing_block_owner(pb_id)? {
                return Err(WorkflowError::LostOwnership {
                    pb_id: pb_id.to_string(),
                });
            }
            let mut state = txn.require_processing_block_state(pb_id)?;
            state.deployments_mut().insert(id.clone(), DeployStatus::Running);
            txn.update_processing_block_state(pb_id, &state)?;
            if txn.get_deployment(&id)?.is_none() {
                txn.create_deployment(deployment)?;
            } else {
                debug!(deploy_id = %id, "deployment record already present");
            }
            Ok(())
        })?;
        info!(deploy_id = %id, kind = ?deployment.kind, "deployment submitted");

        Ok(Self {
            id,
            pb_id: pb_id.to_string(),
            db: db.clone(),
            driver: Arc::new(DriverSlot::default()),
        })
    }

    fn with_driver(mut self, task: JoinHandle<Result<()>>) -> Self {
        self.driver = Arc::new(DriverSlot {
            task: Mutex::new(Some(task)),
            outcome: OnceLock::new(),
        });
        self
    }

    fn driver_context(&self) -> DriverContext {
        DriverContext {
            db: self.db.clone(),
            pb_id: self.pb_id.clone(),
            deploy_id: self.id.clone(),
        }
    }

    /// Deploy a Helm chart. Nothing runs in-process: the chart is picked up
    /// by the orchestration controllers.
    pub(crate) fn helm(
        db: &ConfigDb,
        pb_id: &str,
        name: &str,
        values: Map<String, Value>,
    ) -> Result<Self> {
        info!(pb_id, name, "deploying Helm chart");
        let chart = HelmChart {
            chart: name.to_string(),
            values,
        };
        let deployment = Deployment::helm(deploy_id(pb_id, name), chart)?;
        Self::register(db, pb_id, &deployment)
    }

    /// Deploy a Dask cluster and run `job` against it once reachable.
    pub(crate) fn dask(
        db: &ConfigDb,
        pb_id: &str,
        name: &str,
        n_workers: u32,
        job: DeploymentJob,
        options: &DeployOptions,
    ) -> Result<Self> {
        info!(pb_id, name, n_workers, "deploying Dask");
        let id = deploy_id(pb_id, name);
        let values = json!({
            "jupyter.enabled": "false",
            "jupyter.rbac": "false",
            "worker.replicas": n_workers,
            "scheduler.serviceType": "ClusterIP",
        });
        let values = match values {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let chart = HelmChart {
            chart: "dask/dask".to_string(),
            values,
        };
        let deployment = Deployment::helm(id.clone(), chart)?;
        let handle = Self::register(db, pb_id, &deployment)?;

        let endpoint = format!(
            "{id}-scheduler.{}:{}",
            options.helm_namespace, options.dask_scheduler_port
        );
        let task = spawn_dask_driver(handle.driver_context(), endpoint, options.clone(), job);
        Ok(handle.with_driver(task))
    }

    /// Deploy a fake engine that runs `job` in-process.
    pub(crate) fn fake(db: &ConfigDb, pb_id: &str, name: &str, job: DeploymentJob) -> Result<Self> {
        info!(pb_id, name, "deploying test engine");
        let deployment = Deployment::fake(deploy_id(pb_id, name), name);
        let handle = Self::register(db, pb_id, &deployment)?;
        let task = spawn_job_driver(handle.driver_context(), job);
        Ok(handle.with_driver(task))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pb_id(&self) -> &str {
        &self.pb_id
    }

    /// True once the shared status of this deployment is `FINISHED`.
    ///
    /// The first call that sees `FINISHED` also deletes the registry
    /// record, inside `txn`; later calls find it gone and only report.
    pub fn is_finished(&self, txn: &mut Txn<'_>) -> Result<bool> {
        let state = txn.require_processing_block_state(&self.pb_id)?;
        match state.deployment_status(&self.id) {
            Some(DeployStatus::Finished) => {
                if remove_record(txn, &self.id) {
                    info!(deploy_id = %self.id, "finished deployment removed");
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Delete the registry record of `deploy_id`, whatever its status.
    /// Returns false if there was nothing to delete.
    pub fn remove(&self, deploy_id: &str) -> Result<bool> {
        self.db.txn(|txn| Ok(remove_record(txn, deploy_id)))
    }

    /// Wait for the driver task, if any, and return its outcome.
    ///
    /// Deployments without a driver (Helm) return immediately. The outcome
    /// is kept, so every clone of the handle sees the same result. The slot
    /// stays locked until the outcome is recorded: a concurrent waiter
    /// blocks on the lock instead of finding an empty slot.
    pub async fn wait(&self) -> Result<()> {
        {
            let mut slot = self.driver.task.lock().await;
            if let Some(task) = slot.take() {
                let outcome = match task.await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(WorkflowError::DeploymentFailure { reason, .. })) => Err(reason),
                    Ok(Err(err)) => Err(err.to_string()),
                    Err(join_err) => Err(format!("driver task aborted: {join_err}")),
                };
                let _ = self.driver.outcome.set(outcome);
            }
        }
        match self.driver.outcome.get() {
            Some(Err(reason)) => Err(WorkflowError::DeploymentFailure {
                deploy_id: self.id.clone(),
                reason: reason.clone(),
            }),
            _ => Ok(()),
        }
    }

    /// True once `wait` has seen the driver fail.
    pub fn has_failed(&self) -> bool {
        matches!(self.driver.outcome.get(), Some(Err(_)))
    }
}

/// Delete a deployment record inside `txn`.
pub(crate) fn remove_record(txn: &mut Txn<'_>, deploy_id: &str) -> bool {
    let removed = txn.delete_deployment(deploy_id);
    if !removed {
        debug!(deploy_id, "deployment record already absent");
    }
    removed
}

/// Write a deployment's status into the PB state document.
///
/// Skipped (returns false) when this session no longer owns the PB.
pub(crate) fn update_deploy_status(
    db: &ConfigDb,
    pb_id: &str,
    deploy_id: &str,
    status: DeployStatus,
) -> Result<bool> {
    let written = db.txn(|txn| {
        if !txn.is_processing_block_owner(pb_id)? {
            return Ok(false);
        }
        let mut state = txn.require_processing_block_state(pb_id)?;
        state.deployments_mut().insert(deploy_id.to_string(), status);
        txn.update_processing_block_state(pb_id, &state)?;
        Ok(true)
    })?;
    if !written {
        warn!(pb_id, deploy_id, ?status, "lost ownership; deployment status not written");
    }
    Ok(written)
}
