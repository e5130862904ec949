//! Workflow capture.
//!
//! A [`TrackedTask`] wraps a function together with its declared role. Calling
//! it through a [`WorkflowTracker`] runs the function unchanged and appends one
//! [`Task`] describing the call to the tracker's [`DagDocument`]. The tracker
//! is the recording session: `&mut` access is what makes a capture exclusive.
//! Use [`SharedTracker`] when several threads record into the same workflow.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use super::args::{Arg, CallArgs, Returned, TaskCallable};
use super::dag::{DagDocument, NodeType, Task};
use super::registry::FunctionRegistry;
use crate::core::config::WorkflowConfig;
use crate::core::errors::{Result, WorkflowError};

/// A function together with everything the tracker needs to record its calls.
#[derive(Clone)]
pub struct TrackedTask {
    name: String,
    func: TaskCallable,
    node_type: NodeType,
    multi_output: bool,
    list_inputs: Vec<String>,
    list_private_params: Vec<String>,
}

impl TrackedTask {
    pub fn builder<F>(name: impl Into<String>, func: F) -> TrackedTaskBuilder
    where
        F: Fn(&CallArgs) -> anyhow::Result<Returned> + Send + Sync + 'static,
    {
        TrackedTaskBuilder {
            name: name.into(),
            func: Arc::new(func),
            is_root: false,
            is_leaf: false,
            multi_output: false,
            list_inputs: Vec::new(),
            list_private_params: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    pub fn is_multi_output(&self) -> bool {
        self.multi_output
    }

    pub fn list_inputs(&self) -> &[String] {
        &self.list_inputs
    }

    pub fn list_private_params(&self) -> &[String] {
        &self.list_private_params
    }

    /// Run the function and record the call in `tracker`
    pub fn call(&self, tracker: &mut WorkflowTracker, args: CallArgs) -> Result<Returned> {
        tracker.call(self, args)
    }
}

impl fmt::Debug for TrackedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedTask")
            .field("name", &self.name)
            .field("node_type", &self.node_type)
            .field("multi_output", &self.multi_output)
            .field("list_inputs", &self.list_inputs)
            .field("list_private_params", &self.list_private_params)
            .finish()
    }
}

pub struct TrackedTaskBuilder {
    name: String,
    func: TaskCallable,
    is_root: bool,
    is_leaf: bool,
    multi_output: bool,
    list_inputs: Vec<String>,
    list_private_params: Vec<String>,
}

impl TrackedTaskBuilder {
    pub fn root(mut self) -> Self {
        self.is_root = true;
        self
    }

    pub fn leaf(mut self) -> Self {
        self.is_leaf = true;
        self
    }

    /// Allow the function to return a tuple of images
    pub fn multi_output(mut self) -> Self {
        self.multi_output = true;
        self
    }

    /// Parameters recorded as external input slots instead of values
    pub fn list_inputs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.list_inputs.extend(names.into_iter().map(Into::into));
        self
    }

    /// Parameters that must always be passed explicitly as plain values
    pub fn list_private_params<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.list_private_params
            .extend(names.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> Result<TrackedTask> {
        let node_type = match (self.is_root, self.is_leaf) {
            (true, true) => {
                return Err(WorkflowError::configuration_field(
                    format!(
                        "Task {} cannot be both root and leaf at the same time",
                        self.name
                    ),
                    "node_type",
                ))
            }
            (true, false) => NodeType::Root,
            (false, true) => NodeType::Leaf,
            (false, false) => NodeType::Node,
        };

        Ok(TrackedTask {
            name: self.name,
            func: self.func,
            node_type,
            multi_output: self.multi_output,
            list_inputs: self.list_inputs,
            list_private_params: self.list_private_params,
        })
    }

    /// Build the task and register its function under the task name
    pub fn register(self, registry: &FunctionRegistry) -> Result<TrackedTask> {
        let task = self.build()?;
        registry.register(task.name.clone(), task.func.clone());
        Ok(task)
    }
}

/// Turns a returned value into the list of produced image identifiers.
pub(crate) fn parse_outputs(function: &str, returned: &Returned, multi_output: bool) -> Result<Vec<String>> {
    match returned {
        Returned::Nothing => Ok(Vec::new()),
        Returned::Single(Arg::Image(image)) => Ok(vec![image.unique_name().to_string()]),
        Returned::Tuple(items) if multi_output => items
            .iter()
            .enumerate()
            .map(|(i, item)| match item {
                Arg::Image(image) => Ok(image.unique_name().to_string()),
                other => Err(WorkflowError::type_error(
                    function,
                    format!("Output {} is not an image, but {}", i, other.kind()),
                )),
            })
            .collect(),
        Returned::Tuple(_) => Err(WorkflowError::type_error(
            function,
            "Tuple outputs are only allowed for multi-output functions",
        )),
        Returned::Single(other) => Err(WorkflowError::type_error(
            function,
            format!(
                "Output of a workflow function should be one of nothing, an image or a tuple of images. Got {}",
                other.kind()
            ),
        )),
    }
}

/// Records calls to tracked functions into a [`DagDocument`].
#[derive(Debug)]
pub struct WorkflowTracker {
    registry: FunctionRegistry,
    dag: DagDocument,
    config: WorkflowConfig,
}

impl WorkflowTracker {
    pub fn new(registry: FunctionRegistry) -> Self {
        let config = WorkflowConfig::default();
        Self {
            registry,
            dag: DagDocument::new(config.version()),
            config,
        }
    }

    pub fn with_config(registry: FunctionRegistry, config: WorkflowConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            registry,
            dag: DagDocument::new(config.version()),
            config,
        })
    }

    pub fn dag(&self) -> &DagDocument {
        &self.dag
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// First free slot name of the form `base_0`, `base_1`, ...
    fn unique_input_name(&self, base: &str, staged: &[String]) -> String {
        let taken = |candidate: &str| {
            self.dag.inputs.contains_key(candidate) || staged.iter().any(|s| s == candidate)
        };
        // One more candidate than there are names is always enough.
        let bound = self.dag.inputs.len() + staged.len();
        (0..=bound)
            .map(|id| format!("{}_{}", base, id))
            .find(|candidate| !taken(candidate))
            .unwrap_or_else(|| format!("{}_{}", base, bound + 1))
    }

    /// Declare a new external input and return its slot name
    pub fn add_input(&mut self, name: &str) -> String {
        let slot = self.unique_input_name(name, &[]);
        debug!(slot = %slot, "Declared external input");
        self.dag
            .inputs
            .insert(slot.clone(), Value::String(self.config.placeholder.clone()));
        slot
    }

    /// Set the value of an existing external input
    pub fn fill_input(&mut self, slot: &str, value: Value) -> Result<()> {
        match self.dag.inputs.get_mut(slot) {
            Some(current) => {
                *current = value;
                Ok(())
            }
            None => Err(WorkflowError::usage(format!("Unknown input slot {}", slot))),
        }
    }

    /// True when `name` is a declared input or the output of a recorded task
    fn is_known_image(&self, name: &str) -> bool {
        self.dag.inputs.contains_key(name)
            || self
                .dag
                .list_tasks
                .iter()
                .any(|task| task.outputs.iter().any(|out| out == name))
    }

    /// Every image input must come from an earlier task, a declared input or
    /// a slot staged by the same call.
    fn check_image_inputs(
        &self,
        function: &str,
        images_inputs: &BTreeMap<String, String>,
        staged: &[String],
    ) -> Result<()> {
        for (param, name) in images_inputs {
            if staged.iter().any(|s| s == name) || self.is_known_image(name) {
                continue;
            }
            error!(function = %function, image = %name, "Image input has no producer");
            return Err(WorkflowError::integrity(format!(
                "Input '{}' of {} references image '{}', which no recorded task produced and no input declares",
                param, function, name
            )));
        }
        Ok(())
    }

    fn check_collision(task: &Task) -> Result<()> {
        if let Some(name) = task.self_consumed_output() {
            error!(function = %task.func, image = %name, "Output collides with input");
            return Err(WorkflowError::integrity(format!(
                "Function {} has an output image with the same name as an input image: {}",
                task.func, name
            )));
        }
        Ok(())
    }

    /// Append an already built task. Its function must be registered and its
    /// image inputs must resolve within the current workflow.
    pub fn add_task(&mut self, task: Task) -> Result<()> {
        if !self.registry.contains(&task.func) {
            return Err(WorkflowError::usage(format!(
                "Function {} not registered",
                task.func
            )));
        }
        self.check_image_inputs(&task.func, &task.images_inputs, &[])?;
        Self::check_collision(&task)?;
        self.dag.list_tasks.push(task);
        Ok(())
    }

    /// Run `task` with `args` and record the call. Nothing is recorded unless
    /// every check passes and the function succeeds.
    pub fn call(&mut self, task: &TrackedTask, args: CallArgs) -> Result<Returned> {
        if !args.positional_args().is_empty() {
            return Err(WorkflowError::usage(format!(
                "Workflow function {} should not have positional arguments",
                task.name
            )));
        }
        if !self.registry.contains(&task.name) {
            return Err(WorkflowError::usage(format!(
                "Function {} not registered",
                task.name
            )));
        }

        let mut images_inputs = BTreeMap::new();
        let mut parameters = BTreeMap::new();
        let mut staged_inputs: Vec<String> = Vec::new();

        for (name, arg) in args.kwargs() {
            match arg {
                Arg::Image(image) => {
                    images_inputs.insert(name.to_string(), image.unique_name().to_string());
                }
                Arg::Param(_) if task.list_inputs.iter().any(|n| n == name) => {
                    let slot = self.unique_input_name(name, &staged_inputs);
                    images_inputs.insert(name.to_string(), slot.clone());
                    staged_inputs.push(slot);
                }
                Arg::Param(value) => {
                    parameters.insert(name.to_string(), value.clone());
                }
            }
        }

        for private in &task.list_private_params {
            if !parameters.contains_key(private) {
                return Err(WorkflowError::configuration_field(
                    format!(
                        "Private parameter {} not found in the parameters of {}",
                        private, task.name
                    ),
                    private.clone(),
                ));
            }
        }

        self.check_image_inputs(&task.name, &images_inputs, &staged_inputs)?;

        let returned =
            (task.func)(&args).map_err(|e| WorkflowError::execution(task.name.clone(), e))?;

        let outputs = parse_outputs(&task.name, &returned, task.multi_output)?;

        let record = Task::new(
            task.name.clone(),
            images_inputs,
            parameters,
            task.list_private_params.clone(),
            outputs,
            task.node_type,
        );
        Self::check_collision(&record)?;
        self.dag.list_tasks.push(record);

        for slot in staged_inputs {
            debug!(slot = %slot, "Declared external input");
            self.dag
                .inputs
                .insert(slot, Value::String(self.config.placeholder.clone()));
        }

        debug!(
            function = %task.name,
            node_type = ?task.node_type,
            tasks = self.dag.list_tasks.len(),
            "Recorded task"
        );
        Ok(returned)
    }

    /// Discard every recorded task and input
    pub fn clean_dag(&mut self) {
        self.dag = DagDocument::new(self.config.version());
    }

    /// Keep only the tasks that feed a leaf task
    pub fn prune_dag(&mut self) -> Result<()> {
        self.dag = self.dag.pruned(self.config.prune_limit())?;
        Ok(())
    }

    /// Prune, then write the workflow as YAML
    pub fn save_to_yaml(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let pruned = self.dag.pruned(self.config.prune_limit())?;
        let yaml = pruned.to_yaml_string()?;

        if self.config.create_parent_dirs {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| {
                    WorkflowError::io(format!("create directory {}", parent.display()), e)
                })?;
            }
        }
        std::fs::write(path, yaml)
            .map_err(|e| WorkflowError::io(format!("write workflow {}", path.display()), e))?;

        info!(
            path = %path.display(),
            tasks = pruned.list_tasks.len(),
            inputs = pruned.inputs.len(),
            "Saved workflow"
        );
        self.dag = pruned;
        Ok(())
    }

    /// Replace the current workflow with the one stored at `path`. On error
    /// the current workflow is left as it was.
    pub fn from_yaml(&mut self, path: impl AsRef<Path>) -> Result<&mut Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| WorkflowError::io(format!("read workflow {}", path.display()), e))?;
        let dag = DagDocument::from_yaml_str(&content)?;
        if self.config.validate_on_load {
            dag.validate()?;
        }
        if !dag.recorded_with(self.config.version()) {
            warn!(
                file_version = %dag.plantseg_version,
                running_version = self.config.version(),
                "Workflow was recorded with a different version"
            );
        }

        info!(
            path = %path.display(),
            tasks = dag.list_tasks.len(),
            inputs = dag.inputs.len(),
            "Loaded workflow"
        );
        self.dag = dag;
        Ok(self)
    }
}

/// A tracker shared between threads. Each capture holds the lock for the
/// whole call, so a tracked function must not record through the same
/// `SharedTracker` from inside its own body.
#[derive(Debug, Clone)]
pub struct SharedTracker {
    inner: Arc<Mutex<WorkflowTracker>>,
}

impl SharedTracker {
    pub fn new(tracker: WorkflowTracker) -> Self {
        Self {
            inner: Arc::new(Mutex::new(tracker)),
        }
    }

    /// Exclusive access to the underlying tracker
    pub fn session(&self) -> Result<MutexGuard<'_, WorkflowTracker>> {
        self.inner
            .lock()
            .map_err(|_| WorkflowError::concurrency("workflow tracker lock poisoned"))
    }

    pub fn call(&self, task: &TrackedTask, args: CallArgs) -> Result<Returned> {
        self.session()?.call(task, args)
    }
}
