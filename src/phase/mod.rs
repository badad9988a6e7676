// src/phase/mod.rs

//! Phase lifecycle.
//!
//! - [`state`] is the pure state machine (`PhaseState`), with no IO.
//! - [`protocol`] holds the single-transaction steps of the enter and exit
//!   protocols.
//! - [`handle`] is the async shell (`Phase`) that drives those steps with
//!   `WaitLoop` and owns the phase's deployments.

pub mod handle;
pub mod protocol;
pub mod state;

pub use handle::Phase;
pub use protocol::PbBinding;
pub use state::PhaseState;
