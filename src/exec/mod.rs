// src/exec/mod.rs

//! Execution engine deployments.
//!
//! A phase creates deployments; this module submits them to the store and
//! drives the ones that execute a function in-process.
//!
//! - [`deployment`] owns `DeploymentHandle`: registration, completion
//!   checks and registry cleanup.
//! - [`task_runner`] holds the per-deployment driver tasks.
//! - [`backend`] provides the `EndpointProbe` trait and the TCP probe used
//!   in production, which tests replace with a fake implementation.

pub mod backend;
pub mod deployment;
pub mod task_runner;

pub use backend::{EndpointProbe, TcpProbe};
pub use deployment::{DeployOptions, DeploymentHandle};
pub use task_runner::DeploymentJob;
