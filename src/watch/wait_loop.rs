// src/watch/wait_loop.rs

//! Ownership-checked, edge-triggered transaction loop.
//!
//! Each iteration is one store transaction that:
//! 1. fails with `LostOwnership` if this session no longer owns the PB,
//! 2. fails with `Cancelled` if the PB is CANCELLED, or stops the loop
//!    (without error) if it is FINISHED,
//! 3. hands the transaction to the caller's body.
//!
//! If the body asks to continue, the loop blocks until a key read in that
//! transaction changes, then runs the next iteration. Waiting for
//! resources, for the SBI to end and for deployments to finish are all
//! just different bodies.

use tracing::{debug, trace};

use crate::errors::{Result, WorkflowError};
use crate::store::{ConfigDb, Txn, WatchSet};
use crate::types::PbStatus;

/// What a loop body decided for this iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<T> {
    /// Condition not met yet; wait for a change and try again.
    Continue,
    /// Done; stop the loop with this value.
    Break(T),
}

/// Tagged result of one loop iteration.
#[derive(Debug)]
pub enum Outcome<T> {
    /// Nothing conclusive; the next iteration should wait for a change.
    Continue,
    /// The body finished the loop.
    Ready(T),
    /// The PB reached a terminal status that ends the loop normally.
    NormalTerminal(PbStatus),
    /// Ownership lost, PB cancelled, or the body failed.
    Fatal(WorkflowError),
}

/// How a completed loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion<T> {
    Ready(T),
    Terminal(PbStatus),
}

#[derive(Debug)]
pub struct WaitLoop<'a> {
    db: &'a ConfigDb,
    pb_id: String,
    watch: Option<WatchSet>,
    iterations: u64,
    waits: u64,
}

impl<'a> WaitLoop<'a> {
    pub fn new(db: &'a ConfigDb, pb_id: impl Into<String>) -> Self {
        Self {
            db,
            pb_id: pb_id.into(),
            watch: None,
            iterations: 0,
            waits: 0,
        }
    }

    pub fn pb_id(&self) -> &str {
        &self.pb_id
    }

    /// Number of iterations run so far.
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Number of times the loop blocked waiting for a change.
    pub fn waits(&self) -> u64 {
        self.waits
    }

    /// Run a single iteration without blocking.
    pub fn poll_once<T, F>(&mut self, mut body: F) -> Outcome<T>
    where
        F: FnMut(&mut Txn<'_>) -> Result<Step<T>>,
    {
        self.iterations += 1;
        let pb_id = self.pb_id.clone();
        trace!(pb_id = %pb_id, iteration = self.iterations, "wait loop iteration");

        let result = self.db.txn_watched(|txn| {
            if !txn.is_processing_block_owner(&pb_id)? {
                return Err(WorkflowError::LostOwnership {
                    pb_id: pb_id.clone(),
                });
            }
            let state = txn.require_processing_block_state(&pb_id)?;
            match state.status {
                Some(PbStatus::Cancelled) => {
                    return Err(WorkflowError::Cancelled {
                        pb_id: pb_id.clone(),
                    });
                }
                Some(PbStatus::Finished) => return Ok(Outcome::NormalTerminal(PbStatus::Finished)),
                _ => {}
            }
            Ok(match body(txn)? {
                Step::Continue => Outcome::Continue,
                Step::Break(value) => Outcome::Ready(value),
            })
        });

        match result {
            Ok((outcome, watch)) => {
                self.watch = Some(watch);
                outcome
            }
            Err(err) => {
                self.watch = None;
                Outcome::Fatal(err)
            }
        }
    }

    /// Block until something the last iteration read has changed.
    pub async fn wait(&mut self) {
        if let Some(watch) = &self.watch {
            self.waits += 1;
            debug!(pb_id = %self.pb_id, revision = watch.revision, "waiting for config DB change");
            self.db.wait_for_change(watch).await;
        }
    }

    /// Iterate until the body breaks, the PB finishes, or a fatal error.
    pub async fn run<T, F>(&mut self, mut body: F) -> Result<Completion<T>>
    where
        F: FnMut(&mut Txn<'_>) -> Result<Step<T>>,
    {
        loop {
            match self.poll_once(&mut body) {
                Outcome::Continue => self.wait().await,
                Outcome::Ready(value) => return Ok(Completion::Ready(value)),
                Outcome::NormalTerminal(status) => {
                    debug!(pb_id = %self.pb_id, %status, "wait loop ended: PB terminal");
                    return Ok(Completion::Terminal(status));
                }
                Outcome::Fatal(err) => return Err(err),
            }
        }
    }
}
