// src/config/mod.rs

//! Workflow configuration loading and validation.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a workflow file from disk (`loader.rs`).
//! - Validate invariants like acyclicity and task-group consistency
//!   (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, parse_str};
pub use model::{
    BindingConfig, DefaultSection, DispatcherSection, NodeConfig, RawWorkflowFile, WorkflowFile,
};
