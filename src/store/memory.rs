// src/store/memory.rs

//! Process-local key/value backend with revisions, leases and change
//! notification.
//!
//! Every key keeps the revision at which it was last modified. Deleted keys
//! stay behind as tombstones so that a watcher of a deleted key still sees
//! the change. The store revision is broadcast over a `tokio::sync::watch`
//! channel; waiters re-check their keys on every broadcast.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;

/// Lease identifier. A lease is live from grant until revoked.
pub type LeaseId = u64;

#[derive(Debug, Clone)]
struct Entry {
    value: Option<Value>,
    mod_revision: u64,
    lease: Option<LeaseId>,
}

#[derive(Debug, Default)]
struct Inner {
    revision: u64,
    entries: BTreeMap<String, Entry>,
    live_leases: HashSet<LeaseId>,
    next_lease: LeaseId,
}

/// A pending write, applied atomically at commit.
#[derive(Debug, Clone)]
pub enum Write {
    Put { value: Value, lease: Option<LeaseId> },
    Delete,
}

/// Keys and prefixes a transaction read, with the revisions it observed.
#[derive(Debug, Clone, Default)]
pub struct ReadSet {
    pub keys: BTreeMap<String, u64>,
    pub prefixes: BTreeMap<String, u64>,
}

/// Why a commit was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitError {
    /// Something the transaction read has changed since.
    Conflict,
    /// A write is attached to a lease that is no longer live.
    DeadLease(LeaseId),
}

/// What to wait on after a committed transaction.
#[derive(Debug, Clone, Default)]
pub struct WatchSet {
    pub keys: HashSet<String>,
    pub prefixes: HashSet<String>,
    /// Revision at which the transaction's view was current.
    pub revision: u64,
}

#[derive(Debug, Clone)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
    revision_tx: Arc<watch::Sender<u64>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (revision_tx, _rx) = watch::channel(0);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                next_lease: 1,
                ..Inner::default()
            })),
            revision_tx: Arc::new(revision_tx),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Writes are applied only after validation, in one pass, so a
        // poisoned map is still consistent.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn current_revision(&self) -> u64 {
        self.lock().revision
    }

    pub fn grant_lease(&self) -> LeaseId {
        let mut inner = self.lock();
        let id = inner.next_lease;
        inner.next_lease += 1;
        inner.live_leases.insert(id);
        debug!(lease = id, "granted lease");
        id
    }

    pub fn is_lease_live(&self, lease: LeaseId) -> bool {
        self.lock().live_leases.contains(&lease)
    }

    /// Revoke a lease and delete every key attached to it.
    pub fn revoke_lease(&self, lease: LeaseId) {
        let revision = {
            let mut inner = self.lock();
            if !inner.live_leases.remove(&lease) {
                return;
            }
            let attached: Vec<String> = inner
                .entries
                .iter()
                .filter(|(_, e)| e.lease == Some(lease) && e.value.is_some())
                .map(|(k, _)| k.clone())
                .collect();
            if attached.is_empty() {
                debug!(lease, "revoked lease (no attached keys)");
                return;
            }
            inner.revision += 1;
            let revision = inner.revision;
            for key in &attached {
                if let Some(entry) = inner.entries.get_mut(key) {
                    entry.value = None;
                    entry.lease = None;
                    entry.mod_revision = revision;
                }
            }
            debug!(lease, keys = ?attached, "revoked lease and deleted attached keys");
            revision
        };
        self.revision_tx.send_replace(revision);
    }

    /// Current value and modification revision of a key (0 if never written).
    pub fn read(&self, key: &str) -> (Option<Value>, u64) {
        let inner = self.lock();
        match inner.entries.get(key) {
            Some(entry) => (entry.value.clone(), entry.mod_revision),
            None => (None, 0),
        }
    }

    /// Live keys under `prefix`, with the store revision of the listing.
    pub fn list(&self, prefix: &str) -> (Vec<String>, u64) {
        let inner = self.lock();
        let keys = inner
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(_, e)| e.value.is_some())
            .map(|(k, _)| k.clone())
            .collect();
        (keys, inner.revision)
    }

    /// Validate the read set and apply the writes atomically.
    ///
    /// Returns the revision at which the transaction's view is current: the
    /// new revision if anything was written, the current one otherwise.
    pub fn commit(
        &self,
        reads: &ReadSet,
        writes: BTreeMap<String, Write>,
    ) -> Result<u64, CommitError> {
        let revision = {
            let mut inner = self.lock();

            for (key, seen) in &reads.keys {
                let current = inner.entries.get(key).map_or(0, |e| e.mod_revision);
                if current != *seen {
                    return Err(CommitError::Conflict);
                }
            }
            for (prefix, seen) in &reads.prefixes {
                let changed = inner
                    .entries
                    .range(prefix.clone()..)
                    .take_while(|(k, _)| k.starts_with(prefix.as_str()))
                    .any(|(_, e)| e.mod_revision > *seen);
                if changed {
                    return Err(CommitError::Conflict);
                }
            }

            if writes.is_empty() {
                return Ok(inner.revision);
            }

            for write in writes.values() {
                if let Write::Put { lease: Some(lease), .. } = write {
                    if !inner.live_leases.contains(lease) {
                        return Err(CommitError::DeadLease(*lease));
                    }
                }
            }

            inner.revision += 1;
            let revision = inner.revision;
            for (key, write) in writes {
                let entry = match write {
                    Write::Put { value, lease } => Entry {
                        value: Some(value),
                        mod_revision: revision,
                        lease,
                    },
                    Write::Delete => Entry {
                        value: None,
                        mod_revision: revision,
                        lease: None,
                    },
                };
                inner.entries.insert(key, entry);
            }
            revision
        };

        self.revision_tx.send_replace(revision);
        Ok(revision)
    }

    /// True if any watched key or prefix was modified after `watch.revision`.
    pub fn changed_since(&self, watch: &WatchSet) -> bool {
        let inner = self.lock();
        let key_changed = watch.keys.iter().any(|key| {
            inner
                .entries
                .get(key)
                .is_some_and(|e| e.mod_revision > watch.revision)
        });
        if key_changed {
            return true;
        }
        watch.prefixes.iter().any(|prefix| {
            inner
                .entries
                .range(prefix.clone()..)
                .take_while(|(k, _)| k.starts_with(prefix.as_str()))
                .any(|(_, e)| e.mod_revision > watch.revision)
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision_tx.subscribe()
    }
}
