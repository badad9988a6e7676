// src/workflow/processing_block.rs

//! Claimed processing block: the entry point of every workflow program.

use std::fmt;
use std::sync::Arc;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::info;

use crate::config::WorkflowConfig;
use crate::errors::{Result, WorkflowError};
use crate::exec::{DeployOptions, EndpointProbe};
use crate::phase::{PbBinding, Phase};
use crate::store::{ConfigDb, ProcessingBlock, ScanType, deploy_id};
use crate::types::WorkflowKind;
use crate::workflow::receive::{ReceiveOptions, dns_name, generate_receive_addresses};
use crate::workflow::requests::{BufferRequest, ComputeRequest, ResourceRequest};

/// External parameter schema check.
///
/// Returns the validated (possibly normalised) parameters.
pub trait ParameterValidator {
    fn validate(&self, parameters: &Value) -> anyhow::Result<Value>;
}

pub struct ProcessingBlockHandle {
    db: ConfigDb,
    config: Arc<WorkflowConfig>,
    pb: ProcessingBlock,
    deploy_options: DeployOptions,
}

impl fmt::Debug for ProcessingBlockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingBlockHandle")
            .field("pb", &self.pb)
            .field("db", &self.db)
            .finish_non_exhaustive()
    }
}

impl ProcessingBlockHandle {
    /// Claim `pb_id` with default configuration.
    pub fn claim(db: ConfigDb, pb_id: &str) -> Result<Self> {
        Self::claim_with_config(db, pb_id, Arc::new(WorkflowConfig::default()))
    }

    /// Take ownership of `pb_id` for this session and read the PB, in one
    /// transaction.
    ///
    /// Fails with `OwnershipConflict` if another live session owns it and
    /// with `NotFound` if the PB does not exist.
    pub fn claim_with_config(db: ConfigDb, pb_id: &str, config: Arc<WorkflowConfig>) -> Result<Self> {
        info!(pb_id, lease = db.client_lease(), "claiming processing block");
        let lease = db.client_lease();
        let pb = db.txn(|txn| {
            let pb = txn
                .get_processing_block(pb_id)?
                .ok_or_else(|| WorkflowError::NotFound(format!("processing block {pb_id}")))?;
            txn.take_processing_block(pb_id, lease)?;
            Ok(pb)
        })?;
        info!(
            pb_id,
            kind = %pb.workflow.kind,
            workflow = %pb.workflow.id,
            version = %pb.workflow.version,
            "processing block claimed"
        );

        let deploy_options = DeployOptions::from_config(&config.deploy);
        Ok(Self {
            db,
            config,
            pb,
            deploy_options,
        })
    }

    /// Replace the endpoint probe used by Dask deployments.
    pub fn with_probe(mut self, probe: Arc<dyn EndpointProbe>) -> Self {
        self.deploy_options = self.deploy_options.with_probe(probe);
        self
    }

    pub fn id(&self) -> &str {
        &self.pb.id
    }

    pub fn sbi_id(&self) -> Option<&str> {
        self.pb.sbi_id.as_deref()
    }

    pub fn workflow_kind(&self) -> WorkflowKind {
        self.pb.workflow.kind
    }

    pub fn processing_block(&self) -> &ProcessingBlock {
        &self.pb
    }

    pub fn db(&self) -> &ConfigDb {
        &self.db
    }

    /// Raw parameter payload.
    pub fn get_parameters(&self) -> &Value {
        &self.pb.parameters
    }

    /// Parameters deserialized into a typed schema.
    pub fn get_parameters_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.pb.parameters.clone())?)
    }

    /// Parameters checked by an external validator.
    pub fn get_parameters_with(&self, validator: &dyn ParameterValidator) -> Result<Value> {
        let validated = validator
            .validate(&self.pb.parameters)
            .with_context(|| format!("validating parameters of processing block {}", self.pb.id))?;
        Ok(validated)
    }

    fn sbi_id_for(&self, what: &str) -> Result<&str> {
        if self.workflow_kind() != WorkflowKind::Realtime {
            return Err(WorkflowError::Unsupported(format!(
                "{what} is only defined for realtime workflows"
            )));
        }
        self.sbi_id().ok_or_else(|| {
            WorkflowError::NotFound(format!(
                "scheduling block instance of processing block {}",
                self.pb.id
            ))
        })
    }

    /// Scan types of the SBI this PB belongs to. Realtime only.
    pub fn get_scan_types(&self) -> Result<Vec<ScanType>> {
        let sbi_id = self.sbi_id_for("get_scan_types")?;
        let sbi = self.db.txn(|txn| {
            txn.get_scheduling_block(sbi_id)?
                .ok_or_else(|| WorkflowError::NotFound(format!("scheduling block instance {sbi_id}")))
        })?;
        Ok(sbi.scan_types)
    }

    pub fn request_buffer(&self, size_bytes: f64, tags: &[&str]) -> BufferRequest {
        BufferRequest::new(size_bytes, tags)
    }

    pub fn request_compute(&self, nodes: u32, tags: &[&str]) -> ComputeRequest {
        ComputeRequest::new(nodes, tags)
    }

    /// New phase bound to this PB. Nothing is written until it starts.
    pub fn create_phase(&self, name: &str, requests: Vec<ResourceRequest>) -> Phase {
        let binding = PbBinding {
            pb_id: self.pb.id.clone(),
            sbi_id: self.pb.sbi_id.clone(),
            kind: self.pb.workflow.kind,
        };
        Phase::new(
            name,
            binding,
            self.db.clone(),
            requests,
            self.deploy_options.clone(),
        )
    }

    /// Generate receive addresses for `scan_types` and publish them.
    ///
    /// The document goes into the PB state, and the PB id into the SBI's
    /// `pb_receive_addresses`, in one ownership-checked transaction.
    pub fn receive_addresses(&self, scan_types: &[ScanType], options: ReceiveOptions) -> Result<Value> {
        let sbi_id = self.sbi_id_for("receive_addresses")?;
        let pb_id = self.pb.id.as_str();
        let service = options
            .service
            .unwrap_or_else(|| self.config.receive.service_name.clone());
        let namespace = options
            .namespace
            .unwrap_or_else(|| self.config.deploy.helm_namespace.clone());
        let port = options.port.unwrap_or(self.config.receive.port);

        let addresses = self.db.txn(|txn| {
            if !txn.is_processing_block_owner(pb_id)? {
                return Err(WorkflowError::LostOwnership {
                    pb_id: pb_id.to_string(),
                });
            }
            let mut state = txn.require_processing_block_state(pb_id)?;
            let statefulset = match &options.statefulset {
                Some(name) => name.clone(),
                None => state
                    .deployments
                    .as_ref()
                    .and_then(|d| d.keys().next().cloned())
                    .unwrap_or_else(|| deploy_id(pb_id, "receive")),
            };
            let host = dns_name(&statefulset, &service, &namespace);
            let addresses = generate_receive_addresses(scan_types, &host, port);

            state.receive_addresses = Some(addresses.clone());
            txn.update_processing_block_state(pb_id, &state)?;

            let mut sbi = txn
                .get_scheduling_block(sbi_id)?
                .ok_or_else(|| WorkflowError::NotFound(format!("scheduling block instance {sbi_id}")))?;
            sbi.pb_receive_addresses = Some(pb_id.to_string());
            txn.update_scheduling_block(&sbi)?;
            Ok(addresses)
        })?;

        info!(pb_id, sbi_id, scan_types = scan_types.len(), "receive addresses published");
        Ok(addresses)
    }

    /// Release the PB: close the store session, which revokes its lease.
    pub fn exit(self) {
        info!(pb_id = %self.pb.id, "exiting processing block");
        self.db.close();
    }
}
