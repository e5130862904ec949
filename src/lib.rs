//! Workflow recording for image-processing pipelines.
//!
//! Calls to tracked functions are captured as tasks of a directed acyclic
//! graph whose edges are image artifacts. The graph can be pruned to the
//! tasks that feed an export, saved to YAML, loaded back and replayed.

// Core infrastructure modules
pub mod core {
    pub mod config;
    pub mod errors;
}

pub mod workflow;

pub use crate::core::config::{WorkflowConfig, INPUT_PLACEHOLDER, PLANTSEG_VERSION};
pub use crate::core::errors::{Result, WorkflowError};
pub use plantseg_workflow_macros::task_tracker;
pub use workflow::*;
