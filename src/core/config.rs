use serde::{Deserialize, Serialize};
use std::path::Path;

use super::errors::{Result, WorkflowError};

/// Sentinel stored for every external input until a caller fills it in.
pub const INPUT_PLACEHOLDER: &str = "FILL THIS VALUE TO RUN THE WORKFLOW";

/// Upper bound on worklist steps while pruning; a valid graph never gets close.
pub const DEFAULT_PRUNE_ITERATION_LIMIT: u64 = 1_000_000;

/// Version stamp written into every saved workflow.
pub const PLANTSEG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Configuration for recording, persisting and replaying workflows
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowConfig {
    /// Maximum pruning steps before the graph is declared malformed
    #[serde(default)]
    pub prune_iteration_limit: Option<u64>,
    /// Create missing parent directories when saving
    #[serde(default = "default_true")]
    pub create_parent_dirs: bool,
    /// Check graph invariants before accepting a loaded document
    #[serde(default = "default_true")]
    pub validate_on_load: bool,
    /// Value stored for unfilled external inputs
    #[serde(default = "default_placeholder")]
    pub placeholder: String,
    /// Overrides the version stamp of new documents
    #[serde(default)]
    pub version_stamp: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_placeholder() -> String {
    INPUT_PLACEHOLDER.to_string()
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            prune_iteration_limit: Some(DEFAULT_PRUNE_ITERATION_LIMIT),
            create_parent_dirs: true,
            validate_on_load: true,
            placeholder: default_placeholder(),
            version_stamp: None,
        }
    }
}

impl WorkflowConfig {
    pub fn prune_limit(&self) -> u64 {
        self.prune_iteration_limit
            .unwrap_or(DEFAULT_PRUNE_ITERATION_LIMIT)
    }

    pub fn version(&self) -> &str {
        self.version_stamp.as_deref().unwrap_or(PLANTSEG_VERSION)
    }

    /// Validates configuration values
    pub fn validate(&self) -> Result<()> {
        if let Some(limit) = self.prune_iteration_limit {
            if limit == 0 {
                return Err(WorkflowError::configuration_field(
                    "prune_iteration_limit must be greater than 0",
                    "prune_iteration_limit",
                ));
            }
        }

        if self.placeholder.trim().is_empty() {
            return Err(WorkflowError::configuration_field(
                "placeholder cannot be empty",
                "placeholder",
            ));
        }

        if let Some(version) = &self.version_stamp {
            if version.trim().is_empty() {
                return Err(WorkflowError::configuration_field(
                    "version_stamp cannot be empty",
                    "version_stamp",
                ));
            }
        }

        Ok(())
    }

    /// Merges two configurations, with override_with taking precedence
    pub fn merge(base: &Self, override_with: &Self) -> Result<Self> {
        let merged = Self {
            prune_iteration_limit: override_with
                .prune_iteration_limit
                .or(base.prune_iteration_limit),
            create_parent_dirs: override_with.create_parent_dirs,
            validate_on_load: override_with.validate_on_load,
            placeholder: override_with.placeholder.clone(),
            version_stamp: override_with
                .version_stamp
                .clone()
                .or_else(|| base.version_stamp.clone()),
        };

        merged.validate()?;
        Ok(merged)
    }

    /// Loads and validates a configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| WorkflowError::io(format!("read config {}", path.display()), e))?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }
}
