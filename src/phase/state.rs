// src/phase/state.rs

//! Pure phase state machine.
//!
//! No store, no tokio: just which phase states may follow which. The async
//! protocol in `protocol.rs` moves a phase through these states and relies
//! on `transition` to reject anything out of order.

use std::fmt;

use crate::errors::{Result, WorkflowError};
use crate::types::PbStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseState {
    /// Created by `create_phase`, not started.
    Created,
    /// Waiting for resources.
    Waiting,
    /// Resources granted; deployments may be created.
    Running,
    Finished,
    Cancelled,
}

impl PhaseState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PhaseState::Finished | PhaseState::Cancelled)
    }

    /// Whether `self -> next` is a legal move.
    ///
    /// Terminal states are absorbing. A phase may finish or be cancelled
    /// from any live state (an enter that fails while waiting still has to
    /// end the phase).
    pub fn can_transition_to(self, next: PhaseState) -> bool {
        use PhaseState::*;
        match (self, next) {
            (Created, Waiting) => true,
            (Waiting, Running) => true,
            (Created | Waiting | Running, Finished | Cancelled) => true,
            _ => false,
        }
    }

    /// Move to `next`, or fail with `LifecycleViolation`.
    pub fn transition(&mut self, next: PhaseState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(WorkflowError::lifecycle(format!(
                "illegal phase transition {self} -> {next}"
            )));
        }
        *self = next;
        Ok(())
    }
}

impl From<PbStatus> for PhaseState {
    fn from(status: PbStatus) -> Self {
        match status {
            PbStatus::Waiting => PhaseState::Waiting,
            PbStatus::Running => PhaseState::Running,
            PbStatus::Finished => PhaseState::Finished,
            PbStatus::Cancelled => PhaseState::Cancelled,
        }
    }
}

impl fmt::Display for PhaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PhaseState::Created => "CREATED",
            PhaseState::Waiting => "WAITING",
            PhaseState::Running => "RUNNING",
            PhaseState::Finished => "FINISHED",
            PhaseState::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}
