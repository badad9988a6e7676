// src/config/validate.rs

use crate::config::model::{RawWorkflowConfig, WorkflowConfig};
use crate::errors::{Result, WorkflowError};

impl TryFrom<RawWorkflowConfig> for WorkflowConfig {
    type Error = WorkflowError;

    fn try_from(raw: RawWorkflowConfig) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(WorkflowConfig::new_unchecked(raw.store, raw.deploy, raw.receive))
    }
}

fn validate_raw_config(cfg: &RawWorkflowConfig) -> Result<()> {
    validate_deploy(cfg)?;
    validate_receive(cfg)?;
    Ok(())
}

fn validate_deploy(cfg: &RawWorkflowConfig) -> Result<()> {
    if cfg.deploy.helm_namespace.trim().is_empty() {
        return Err(WorkflowError::Config(
            "[deploy].helm_namespace must not be empty".to_string(),
        ));
    }
    if cfg.deploy.endpoint_retries == 0 {
        return Err(WorkflowError::Config(
            "[deploy].endpoint_retries must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.deploy.dask_scheduler_port == 0 {
        return Err(WorkflowError::Config(
            "[deploy].dask_scheduler_port must not be 0".to_string(),
        ));
    }
    Ok(())
}

fn validate_receive(cfg: &RawWorkflowConfig) -> Result<()> {
    if cfg.receive.service_name.trim().is_empty() {
        return Err(WorkflowError::Config(
            "[receive].service_name must not be empty".to_string(),
        ));
    }
    Ok(())
}
