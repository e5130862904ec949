//! Registry mapping stable function names to their implementations.

use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::args::TaskCallable;
use crate::core::errors::{Result, WorkflowError};

/// Registry for tracked functions. Clones share the same table.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    funcs: Arc<DashMap<String, TaskCallable>>,
}

impl FunctionRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function; a later registration under the same name wins
    pub fn register(&self, name: impl Into<String>, func: TaskCallable) {
        let name = name.into();
        if self.funcs.insert(name.clone(), func).is_some() {
            debug!(function = %name, "Replaced registered function");
        } else {
            debug!(function = %name, "Registered function");
        }
    }

    /// Get a function by name
    pub fn resolve(&self, name: &str) -> Result<TaskCallable> {
        self.funcs
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| WorkflowError::usage(format!("Function {} not registered", name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.funcs.contains_key(name)
    }

    /// All registered names, sorted
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.funcs.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.funcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("funcs", &self.list_names())
            .finish()
    }
}
