// src/workflow/mod.rs

//! Workflow author API.
//!
//! - [`processing_block`]: `ProcessingBlockHandle`, claimed per PB.
//! - [`requests`]: declarative resource requests passed to phases.
//! - [`receive`]: the receive address document of realtime workflows.

pub mod processing_block;
pub mod receive;
pub mod requests;

pub use processing_block::{ParameterValidator, ProcessingBlockHandle};
pub use receive::{RECEIVE_ADDRESSES_INTERFACE, ReceiveOptions};
pub use requests::{BufferRequest, ComputeRequest, ResourceRequest};
