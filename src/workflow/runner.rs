//! Re-execution of a recorded workflow.
//!
//! Every task is replayed in dependency order. Image inputs resolve either to
//! an external input value or to the artifact an earlier task produced under
//! the recorded identifier. New artifacts get fresh unique names, so the
//! runner keeps a binding from recorded identifier to live artifact.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};
use uuid::Uuid;

use super::args::{Arg, CallArgs};
use super::dag::DagDocument;
use super::image::ImageHandle;
use super::registry::FunctionRegistry;
use super::tracker::parse_outputs;
use crate::core::config::WorkflowConfig;
use crate::core::errors::{Result, WorkflowError};

/// Outcome of one replay
#[derive(Debug, Default)]
pub struct RunReport {
    /// Ids of the tasks that ran, in execution order
    pub executed: Vec<Uuid>,
    /// Recorded image identifier to the artifact produced in this run
    pub artifacts: HashMap<String, ImageHandle>,
}

impl RunReport {
    pub fn artifact(&self, recorded_name: &str) -> Option<&ImageHandle> {
        self.artifacts.get(recorded_name)
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowRunner {
    registry: FunctionRegistry,
    config: WorkflowConfig,
}

impl WorkflowRunner {
    pub fn new(registry: FunctionRegistry) -> Self {
        Self {
            registry,
            config: WorkflowConfig::default(),
        }
    }

    pub fn with_config(registry: FunctionRegistry, config: WorkflowConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { registry, config })
    }

    /// External input values: the supplied ones override the document's.
    /// Every slot a task references must end up holding a real value.
    fn resolve_inputs(
        &self,
        dag: &DagDocument,
        supplied: &BTreeMap<String, Value>,
    ) -> Result<BTreeMap<String, Value>> {
        let mut resolved = dag.inputs.clone();
        for (slot, value) in supplied {
            if !resolved.contains_key(slot) {
                return Err(WorkflowError::usage(format!(
                    "Workflow has no input named {}",
                    slot
                )));
            }
            resolved.insert(slot.clone(), value.clone());
        }

        for task in &dag.list_tasks {
            for slot in task.images_inputs.values() {
                if let Some(value) = resolved.get(slot) {
                    if value.is_null() || value.as_str() == Some(self.config.placeholder.as_str()) {
                        return Err(WorkflowError::missing_input(slot.clone()));
                    }
                }
            }
        }
        Ok(resolved)
    }

    /// Replay `dag` once with the given external input values
    pub fn run(&self, dag: &DagDocument, inputs: &BTreeMap<String, Value>) -> Result<RunReport> {
        let values = self.resolve_inputs(dag, inputs)?;
        let order = dag.execution_order()?;

        // Resolve everything up front so an unknown function fails before any work.
        let funcs = order
            .iter()
            .map(|&idx| self.registry.resolve(&dag.list_tasks[idx].func))
            .collect::<Result<Vec<_>>>()?;

        let mut report = RunReport::default();
        for (&idx, func) in order.iter().zip(funcs) {
            let task = &dag.list_tasks[idx];

            let mut args = CallArgs::new();
            for (param, reference) in &task.images_inputs {
                if let Some(value) = values.get(reference) {
                    args.set(param.clone(), Arg::Param(value.clone()));
                } else {
                    let image = report.artifacts.get(reference).ok_or_else(|| {
                        WorkflowError::integrity(format!(
                            "Image '{}' needed by {} was never produced",
                            reference, task.func
                        ))
                    })?;
                    args.set(param.clone(), Arg::Image(image.clone()));
                }
            }
            for (param, value) in &task.parameters {
                args.set(param.clone(), Arg::Param(value.clone()));
            }

            debug!(function = %task.func, id = %task.id, "Running task");
            let returned =
                func(&args).map_err(|e| WorkflowError::execution(task.func.clone(), e))?;
            let produced = parse_outputs(&task.func, &returned, true)?;
            if produced.len() != task.outputs.len() {
                return Err(WorkflowError::type_error(
                    task.func.clone(),
                    format!(
                        "Expected {} outputs, got {}",
                        task.outputs.len(),
                        produced.len()
                    ),
                ));
            }

            for (recorded, image) in task.outputs.iter().zip(returned.image_list()) {
                report.artifacts.insert(recorded.clone(), image.clone());
            }
            report.executed.push(task.id);
        }

        info!(
            tasks = report.executed.len(),
            artifacts = report.artifacts.len(),
            "Workflow run complete"
        );
        Ok(report)
    }

    /// Replay `dag` once per input mapping, stopping at the first failure
    pub fn run_batch(
        &self,
        dag: &DagDocument,
        batch: &[BTreeMap<String, Value>],
    ) -> Result<Vec<RunReport>> {
        batch
            .iter()
            .enumerate()
            .map(|(i, inputs)| {
                debug!(run = i, "Starting batch run");
                self.run(dag, inputs)
            })
            .collect()
    }
}
