// src/store/client.rs

use std::fmt;

use tracing::{debug, trace, warn};

use crate::errors::{Result, WorkflowError};
use crate::store::memory::{CommitError, LeaseId, MemoryBackend, WatchSet};
use crate::store::txn::Txn;
use crate::types::StoreBackend;

/// Client session on the configuration store.
///
/// Each session holds one lease, granted on connect. Clones share the
/// session (and lease); [`ConfigDb::new_session`] opens an independent one
/// on the same backend.
#[derive(Clone)]
pub struct ConfigDb {
    backend: MemoryBackend,
    lease: LeaseId,
}

impl fmt::Debug for ConfigDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigDb")
            .field("lease", &self.lease)
            .finish_non_exhaustive()
    }
}

impl ConfigDb {
    /// Open a session on a fresh backend of the given kind.
    pub fn connect(kind: StoreBackend) -> Result<Self> {
        debug!(backend = ?kind, "opening connection to config DB");
        match kind {
            StoreBackend::Memory => Ok(Self::with_backend(MemoryBackend::new())),
        }
    }

    /// Open a session on an existing in-memory backend.
    pub fn with_backend(backend: MemoryBackend) -> Self {
        let lease = backend.grant_lease();
        Self { backend, lease }
    }

    /// Open another, independent session on the same backend.
    pub fn new_session(&self) -> Self {
        Self::with_backend(self.backend.clone())
    }

    pub fn backend(&self) -> &MemoryBackend {
        &self.backend
    }

    /// Lease held by this session.
    pub fn client_lease(&self) -> LeaseId {
        self.lease
    }

    pub fn is_live(&self) -> bool {
        self.backend.is_lease_live(self.lease)
    }

    /// Close the session: revoke the lease, releasing everything attached
    /// to it (in particular processing block ownership).
    pub fn close(&self) {
        debug!(lease = self.lease, "closing config DB session");
        self.backend.revoke_lease(self.lease);
    }

    /// Run `body` in a transaction and commit it.
    ///
    /// If the commit conflicts with a concurrent writer the body is run
    /// again against fresh reads. If the body returns an error nothing is
    /// written and the error is returned as-is.
    pub fn txn<T, F>(&self, body: F) -> Result<T>
    where
        F: FnMut(&mut Txn<'_>) -> Result<T>,
    {
        self.txn_watched(body).map(|(value, _)| value)
    }

    /// Like [`ConfigDb::txn`], also returning what the transaction read so
    /// the caller can wait for it to change.
    pub fn txn_watched<T, F>(&self, mut body: F) -> Result<(T, WatchSet)>
    where
        F: FnMut(&mut Txn<'_>) -> Result<T>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let mut txn = Txn::new(&self.backend, self.lease);
            let value = body(&mut txn)?;
            let (reads, writes) = txn.into_parts();

            match self.backend.commit(&reads, writes) {
                Ok(revision) => {
                    trace!(revision, attempt, "transaction committed");
                    return Ok((value, Txn::watch_set(&reads, revision)));
                }
                Err(CommitError::Conflict) => {
                    debug!(attempt, "transaction conflict; retrying");
                }
                Err(CommitError::DeadLease(lease)) => {
                    warn!(lease, "transaction wrote under a revoked lease");
                    return Err(WorkflowError::Other(anyhow::anyhow!(
                        "lease {lease} is no longer live"
                    )));
                }
            }
        }
    }

    /// Block until something in `watch` changes.
    ///
    /// Edge-triggered: returns only after a modification newer than
    /// `watch.revision` to one of the watched keys or prefixes.
    pub async fn wait_for_change(&self, watch: &WatchSet) {
        let mut revisions = self.backend.subscribe();
        loop {
            if self.backend.changed_since(watch) {
                return;
            }
            if revisions.changed().await.is_err() {
                // Every sender is gone, so nothing can change any more.
                warn!("config DB change channel closed");
                return;
            }
        }
    }
}
