// src/config/mod.rs

//! Configuration loading and validation.
//!
//! - `model.rs`: the TOML-backed data model, raw and validated.
//! - `loader.rs`: reading a file and applying environment overrides.
//! - `validate.rs`: the checks that turn a raw model into a validated one.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{apply_env_overrides, load_and_validate, load_from_path};
pub use model::{DeploySection, RawWorkflowConfig, ReceiveSection, StoreSection, WorkflowConfig};
