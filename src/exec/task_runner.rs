// src/exec/task_runner.rs

//! Driver tasks for function-executing deployments.
//!
//! Each driver runs as its own tokio task so several deployments can be in
//! flight at once. The user function itself is run on the blocking pool:
//! workflow functions are ordinary synchronous code. A driver reports
//! completion only through the store, by writing `FINISHED` for its
//! deployment; its `JoinHandle` is kept by the `DeploymentHandle` so
//! failures can be surfaced to the phase.

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::errors::{Result, WorkflowError};
use crate::exec::deployment::{DeployOptions, update_deploy_status};
use crate::store::ConfigDb;
use crate::types::DeployStatus;

/// Type-erased user function. Receives the address of the engine it runs
/// against (the scheduler endpoint for Dask, the deploy id for test
/// deployments).
pub type DeploymentJob = Box<dyn FnOnce(&str) -> anyhow::Result<()> + Send + 'static>;

/// What a driver needs to report back.
#[derive(Debug, Clone)]
pub(crate) struct DriverContext {
    pub db: ConfigDb,
    pub pb_id: String,
    pub deploy_id: String,
}

impl DriverContext {
    fn failure(&self, reason: impl Into<String>) -> WorkflowError {
        WorkflowError::DeploymentFailure {
            deploy_id: self.deploy_id.clone(),
            reason: reason.into(),
        }
    }
}

/// Run `job` right away and mark the deployment `FINISHED` when it returns.
pub(crate) fn spawn_job_driver(ctx: DriverContext, job: DeploymentJob) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        let address = ctx.deploy_id.clone();
        let result = run_job(&ctx, address, job).await;
        log_driver_exit(&ctx, &result);
        result
    })
}

/// Wait for the Dask scheduler at `endpoint`, then run `job` against it.
pub(crate) fn spawn_dask_driver(
    ctx: DriverContext,
    endpoint: String,
    options: DeployOptions,
    job: DeploymentJob,
) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        let result = match wait_for_endpoint(&ctx, &endpoint, &options).await {
            Ok(()) => run_job(&ctx, endpoint, job).await,
            Err(err) => Err(err),
        };
        log_driver_exit(&ctx, &result);
        result
    })
}

/// Probe `endpoint` up to `endpoint_retries` times.
async fn wait_for_endpoint(ctx: &DriverContext, endpoint: &str, options: &DeployOptions) -> Result<()> {
    let retries = options.endpoint_retries;
    info!(deploy_id = %ctx.deploy_id, %endpoint, retries, "waiting for engine endpoint");

    for attempt in 1..=retries {
        if options.probe.probe(endpoint).await {
            debug!(deploy_id = %ctx.deploy_id, attempt, "engine endpoint reachable");
            return Ok(());
        }
        if attempt < retries {
            tokio::time::sleep(options.endpoint_retry_interval).await;
        }
    }

    warn!(deploy_id = %ctx.deploy_id, %endpoint, retries, "engine endpoint never became reachable");
    Err(ctx.failure(format!(
        "endpoint {endpoint} not reachable after {retries} attempts"
    )))
}

async fn run_job(ctx: &DriverContext, address: String, job: DeploymentJob) -> Result<()> {
    debug!(deploy_id = %ctx.deploy_id, %address, "running deployment function");
    match tokio::task::spawn_blocking(move || job(&address)).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => return Err(ctx.failure(format!("function failed: {err:#}"))),
        Err(join_err) => return Err(ctx.failure(format!("function panicked: {join_err}"))),
    }

    update_deploy_status(&ctx.db, &ctx.pb_id, &ctx.deploy_id, DeployStatus::Finished)?;
    Ok(())
}

fn log_driver_exit(ctx: &DriverContext, result: &Result<()>) {
    match result {
        Ok(()) => info!(deploy_id = %ctx.deploy_id, "deployment driver finished"),
        Err(err) => error!(deploy_id = %ctx.deploy_id, error = %err, "deployment driver failed"),
    }
}
