// src/store/txn.rs

//! Optimistic transactions over the store.
//!
//! A [`Txn`] records the revision of everything it reads and buffers every
//! write. Nothing becomes visible until [`ConfigDb::txn`](super::ConfigDb::txn)
//! commits it; a commit whose reads went stale is thrown away and the
//! transaction body is run again.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::errors::{Result, WorkflowError};
use crate::store::memory::{LeaseId, MemoryBackend, ReadSet, WatchSet, Write};
use crate::store::model::{
    Deployment, OwnerRecord, ProcessingBlock, ProcessingBlockState, SchedulingBlock,
};

const PB_PREFIX: &str = "/pb/";
const SB_PREFIX: &str = "/sb/";
const DEPLOY_PREFIX: &str = "/deploy/";

fn pb_key(pb_id: &str) -> String {
    format!("{PB_PREFIX}{pb_id}")
}

fn pb_state_key(pb_id: &str) -> String {
    format!("{PB_PREFIX}{pb_id}/state")
}

fn pb_owner_key(pb_id: &str) -> String {
    format!("{PB_PREFIX}{pb_id}/owner")
}

fn sb_key(sbi_id: &str) -> String {
    format!("{SB_PREFIX}{sbi_id}")
}

fn deploy_key(deploy_id: &str) -> String {
    format!("{DEPLOY_PREFIX}{deploy_id}")
}

pub struct Txn<'a> {
    backend: &'a MemoryBackend,
    lease: LeaseId,
    reads: ReadSet,
    writes: BTreeMap<String, Write>,
}

impl<'a> Txn<'a> {
    pub(crate) fn new(backend: &'a MemoryBackend, lease: LeaseId) -> Self {
        Self {
            backend,
            lease,
            reads: ReadSet::default(),
            writes: BTreeMap::new(),
        }
    }

    pub(crate) fn into_parts(self) -> (ReadSet, BTreeMap<String, Write>) {
        (self.reads, self.writes)
    }

    /// Keys and prefixes this transaction depends on, for a later wait.
    pub(crate) fn watch_set(reads: &ReadSet, revision: u64) -> WatchSet {
        WatchSet {
            keys: reads.keys.keys().cloned().collect(),
            prefixes: reads.prefixes.keys().cloned().collect(),
            revision,
        }
    }

    /// Lease of the client running this transaction.
    pub fn lease(&self) -> LeaseId {
        self.lease
    }

    // ---------------------------------------------------------------------
    // Raw key access
    // ---------------------------------------------------------------------

    fn get_raw(&mut self, key: &str) -> Option<Value> {
        if let Some(pending) = self.writes.get(key) {
            return match pending {
                Write::Put { value, .. } => Some(value.clone()),
                Write::Delete => None,
            };
        }
        let (value, revision) = self.backend.read(key);
        self.reads.keys.entry(key.to_string()).or_insert(revision);
        value
    }

    fn get_typed<T: DeserializeOwned>(&mut self, key: &str) -> Result<Option<T>> {
        match self.get_raw(key) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    fn put<T: Serialize>(&mut self, key: String, value: &T, lease: Option<LeaseId>) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.writes.insert(key, Write::Put { value, lease });
        Ok(())
    }

    fn create<T: Serialize>(&mut self, key: String, value: &T) -> Result<()> {
        if self.get_raw(&key).is_some() {
            return Err(WorkflowError::Other(anyhow::anyhow!("key {key} already exists")));
        }
        self.put(key, value, None)
    }

    fn update<T: Serialize>(&mut self, key: String, value: &T) -> Result<()> {
        if self.get_raw(&key).is_none() {
            return Err(WorkflowError::NotFound(key));
        }
        self.put(key, value, None)
    }

    /// Delete a key; returns false if it did not exist.
    fn delete(&mut self, key: String) -> bool {
        if self.get_raw(&key).is_none() {
            return false;
        }
        self.writes.insert(key, Write::Delete);
        true
    }

    /// Live keys under `prefix`, including this transaction's pending writes.
    fn list_raw(&mut self, prefix: &str) -> Vec<String> {
        let (keys, revision) = self.backend.list(prefix);
        self.reads.prefixes.entry(prefix.to_string()).or_insert(revision);

        let mut keys: HashSet<String> = keys.into_iter().collect();
        for (key, write) in self.writes.range(prefix.to_string()..) {
            if !key.starts_with(prefix) {
                break;
            }
            match write {
                Write::Put { .. } => {
                    keys.insert(key.clone());
                }
                Write::Delete => {
                    keys.remove(key);
                }
            }
        }
        let mut keys: Vec<String> = keys.into_iter().collect();
        keys.sort();
        keys
    }

    /// Ids of records directly under `prefix` (no nested keys).
    fn list_ids(&mut self, prefix: &str) -> Vec<String> {
        self.list_raw(prefix)
            .into_iter()
            .filter_map(|key| {
                let id = key.strip_prefix(prefix)?;
                (!id.contains('/')).then(|| id.to_string())
            })
            .collect()
    }

    // ---------------------------------------------------------------------
    // Processing blocks
    // ---------------------------------------------------------------------

    pub fn list_processing_blocks(&mut self) -> Vec<String> {
        self.list_ids(PB_PREFIX)
    }

    pub fn get_processing_block(&mut self, pb_id: &str) -> Result<Option<ProcessingBlock>> {
        self.get_typed(&pb_key(pb_id))
    }

    pub fn create_processing_block(&mut self, pb: &ProcessingBlock) -> Result<()> {
        self.create(pb_key(&pb.id), pb)
    }

    pub fn get_processing_block_state(
        &mut self,
        pb_id: &str,
    ) -> Result<Option<ProcessingBlockState>> {
        self.get_typed(&pb_state_key(pb_id))
    }

    pub fn create_processing_block_state(
        &mut self,
        pb_id: &str,
        state: &ProcessingBlockState,
    ) -> Result<()> {
        self.create(pb_state_key(pb_id), state)
    }

    pub fn update_processing_block_state(
        &mut self,
        pb_id: &str,
        state: &ProcessingBlockState,
    ) -> Result<()> {
        self.update(pb_state_key(pb_id), state)
    }

    /// State document of a PB, or `NotFound` if it has none.
    pub fn require_processing_block_state(&mut self, pb_id: &str) -> Result<ProcessingBlockState> {
        self.get_processing_block_state(pb_id)?
            .ok_or_else(|| WorkflowError::NotFound(format!("state of processing block {pb_id}")))
    }

    pub fn get_processing_block_owner(&mut self, pb_id: &str) -> Result<Option<OwnerRecord>> {
        self.get_typed(&pb_owner_key(pb_id))
    }

    /// Claim ownership of a PB for `lease`.
    ///
    /// Re-claiming with the lease that already owns it is a no-op. A
    /// different lease that is still live makes this fail with
    /// `OwnershipConflict`; an owner record left by a dead lease is taken
    /// over.
    pub fn take_processing_block(&mut self, pb_id: &str, lease: LeaseId) -> Result<()> {
        if let Some(owner) = self.get_processing_block_owner(pb_id)? {
            if owner.lease == lease {
                return Ok(());
            }
            if self.backend.is_lease_live(owner.lease) {
                return Err(WorkflowError::OwnershipConflict {
                    pb_id: pb_id.to_string(),
                    owner: owner.lease,
                });
            }
        }
        self.put(pb_owner_key(pb_id), &OwnerRecord { lease }, Some(lease))
    }

    /// True if this transaction's client holds a live lease on the PB.
    pub fn is_processing_block_owner(&mut self, pb_id: &str) -> Result<bool> {
        let owner = self.get_processing_block_owner(pb_id)?;
        Ok(owner.is_some_and(|o| o.lease == self.lease && self.backend.is_lease_live(o.lease)))
    }

    // ---------------------------------------------------------------------
    // Scheduling block instances
    // ---------------------------------------------------------------------

    pub fn list_scheduling_blocks(&mut self) -> Vec<String> {
        self.list_ids(SB_PREFIX)
    }

    pub fn get_scheduling_block(&mut self, sbi_id: &str) -> Result<Option<SchedulingBlock>> {
        self.get_typed(&sb_key(sbi_id))
    }

    pub fn create_scheduling_block(&mut self, sbi: &SchedulingBlock) -> Result<()> {
        self.create(sb_key(&sbi.id), sbi)
    }

    pub fn update_scheduling_block(&mut self, sbi: &SchedulingBlock) -> Result<()> {
        self.update(sb_key(&sbi.id), sbi)
    }

    // ---------------------------------------------------------------------
    // Deployments
    // ---------------------------------------------------------------------

    /// Ids of deployment records starting with `prefix` ("" for all).
    pub fn list_deployments(&mut self, prefix: &str) -> Vec<String> {
        self.list_ids(DEPLOY_PREFIX)
            .into_iter()
            .filter(|id| id.starts_with(prefix))
            .collect()
    }

    pub fn get_deployment(&mut self, deploy_id: &str) -> Result<Option<Deployment>> {
        self.get_typed(&deploy_key(deploy_id))
    }

    pub fn create_deployment(&mut self, deployment: &Deployment) -> Result<()> {
        self.create(deploy_key(&deployment.id), deployment)
    }

    /// Delete a deployment record; returns false if it was already gone.
    pub fn delete_deployment(&mut self, deploy_id: &str) -> bool {
        self.delete(deploy_key(deploy_id))
    }
}
