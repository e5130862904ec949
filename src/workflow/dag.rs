//! The recorded workflow: tasks, external inputs, and the graph operations
//! (pruning, validation, ordering) defined over them.

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Topo;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::core::config::{INPUT_PLACEHOLDER, PLANTSEG_VERSION};
use crate::core::errors::{Result, WorkflowError};

/// Role of a task in the workflow graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    /// Source: consumes only external inputs
    Root,
    #[default]
    Node,
    /// Sink: nothing downstream consumes its result
    Leaf,
}

/// One recorded function invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Registered name of the invoked function
    pub func: String,
    /// Parameter name to image identifier (or external input slot)
    pub images_inputs: BTreeMap<String, String>,
    /// Parameter name to plain value
    pub parameters: BTreeMap<String, Value>,
    /// Parameters that were required to be passed explicitly
    pub list_private_parameters: Vec<String>,
    /// Produced image identifiers, in return order
    pub outputs: Vec<String>,
    pub node_type: NodeType,
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
}

impl Task {
    pub fn new(
        func: impl Into<String>,
        images_inputs: BTreeMap<String, String>,
        parameters: BTreeMap<String, Value>,
        list_private_parameters: Vec<String>,
        outputs: Vec<String>,
        node_type: NodeType,
    ) -> Self {
        Self {
            func: func.into(),
            images_inputs,
            parameters,
            list_private_parameters,
            outputs,
            node_type,
            id: Uuid::new_v4(),
        }
    }

    /// First output that is also consumed by this same task
    pub fn self_consumed_output(&self) -> Option<&str> {
        self.outputs
            .iter()
            .find(|out| self.images_inputs.values().any(|inp| inp == *out))
            .map(String::as_str)
    }
}

/// The full recorded workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagDocument {
    #[serde(default = "default_version")]
    pub plantseg_version: String,
    /// External input slot to its value (the placeholder until filled)
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,
    /// Tasks in capture order
    #[serde(default)]
    pub list_tasks: Vec<Task>,
}

fn default_version() -> String {
    PLANTSEG_VERSION.to_string()
}

impl Default for DagDocument {
    fn default() -> Self {
        Self::new(PLANTSEG_VERSION)
    }
}

impl DagDocument {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            plantseg_version: version.into(),
            inputs: BTreeMap::new(),
            list_tasks: Vec::new(),
        }
    }

    pub fn list_inputs(&self) -> Vec<&str> {
        self.inputs.keys().map(String::as_str).collect()
    }

    /// Drop every task and input, keeping the version stamp
    pub fn reset(&mut self) {
        self.inputs.clear();
        self.list_tasks.clear();
    }

    /// Slots whose value is still the given placeholder
    pub fn unfilled_inputs<'a>(&'a self, placeholder: &'a str) -> impl Iterator<Item = &'a str> {
        self.inputs
            .iter()
            .filter(move |(_, value)| value.as_str() == Some(placeholder))
            .map(|(slot, _)| slot.as_str())
    }

    /// Returns a copy keeping only tasks whose outputs feed, directly or
    /// transitively, at least one leaf task. Relative order is preserved.
    pub fn pruned(&self, iteration_limit: u64) -> Result<DagDocument> {
        let mut producers: HashMap<&str, Vec<usize>> = HashMap::new();
        for (idx, task) in self.list_tasks.iter().enumerate() {
            for out in &task.outputs {
                producers.entry(out.as_str()).or_default().push(idx);
            }
        }

        let mut reachable: HashSet<usize> = HashSet::new();
        let mut demanded: HashSet<&str> = HashSet::new();
        let mut frontier: Vec<&str> = Vec::new();

        for (idx, task) in self.list_tasks.iter().enumerate() {
            if task.node_type == NodeType::Leaf {
                reachable.insert(idx);
                for inp in task.images_inputs.values() {
                    if demanded.insert(inp.as_str()) {
                        frontier.push(inp.as_str());
                    }
                }
            }
        }

        let mut steps: u64 = 0;
        while let Some(name) = frontier.pop() {
            steps += 1;
            if steps > iteration_limit {
                error!(steps, "Pruning exceeded its iteration limit");
                return Err(WorkflowError::integrity(format!(
                    "Pruning did not converge within {} steps",
                    iteration_limit
                )));
            }

            let Some(indices) = producers.get(name) else {
                continue;
            };
            for &idx in indices {
                if !reachable.insert(idx) {
                    continue;
                }
                for inp in self.list_tasks[idx].images_inputs.values() {
                    if demanded.insert(inp.as_str()) {
                        frontier.push(inp.as_str());
                    }
                }
            }
        }

        let list_tasks: Vec<Task> = self
            .list_tasks
            .iter()
            .enumerate()
            .filter(|(idx, _)| reachable.contains(idx))
            .map(|(_, task)| task.clone())
            .collect();

        let dropped = self.list_tasks.len() - list_tasks.len();
        if dropped > 0 {
            warn!(dropped, kept = list_tasks.len(), "Pruned tasks not feeding any leaf");
        } else {
            info!(kept = list_tasks.len(), "Pruning kept every task");
        }

        Ok(DagDocument {
            plantseg_version: self.plantseg_version.clone(),
            inputs: self.inputs.clone(),
            list_tasks,
        })
    }

    /// Producer-to-consumer graph over task indices.
    pub fn dependency_graph(&self) -> Result<DiGraph<usize, ()>> {
        let mut graph = DiGraph::new();
        let indices: Vec<NodeIndex> = (0..self.list_tasks.len())
            .map(|idx| graph.add_node(idx))
            .collect();

        let mut producer: HashMap<&str, usize> = HashMap::new();
        for (idx, task) in self.list_tasks.iter().enumerate() {
            for out in &task.outputs {
                if let Some(prev) = producer.insert(out.as_str(), idx) {
                    return Err(WorkflowError::integrity(format!(
                        "Image '{}' is produced by both task {} and task {}",
                        out, self.list_tasks[prev].id, task.id
                    )));
                }
            }
        }

        for (idx, task) in self.list_tasks.iter().enumerate() {
            for (param, inp) in &task.images_inputs {
                match producer.get(inp.as_str()) {
                    Some(&src) => {
                        graph.add_edge(indices[src], indices[idx], ());
                    }
                    None if self.inputs.contains_key(inp) => {}
                    None => {
                        return Err(WorkflowError::integrity(format!(
                            "Input '{}' of task {} ({}) references unknown image '{}'",
                            param, task.id, task.func, inp
                        )));
                    }
                }
            }
        }

        Ok(graph)
    }

    /// Checks id uniqueness, self-consumption, reference closure and acyclicity.
    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        for task in &self.list_tasks {
            if !ids.insert(task.id) {
                return Err(WorkflowError::integrity(format!(
                    "Duplicate task id {}",
                    task.id
                )));
            }
            if let Some(name) = task.self_consumed_output() {
                return Err(WorkflowError::integrity(format!(
                    "Task {} ({}) consumes its own output '{}'",
                    task.id, task.func, name
                )));
            }
        }

        let graph = self.dependency_graph()?;
        if is_cyclic_directed(&graph) {
            error!(tasks = self.list_tasks.len(), "Cycle in workflow graph");
            return Err(WorkflowError::integrity(
                "The workflow is not a DAG as it contains cycles.",
            ));
        }
        Ok(())
    }

    /// Task indices in an order where producers precede their consumers.
    pub fn execution_order(&self) -> Result<Vec<usize>> {
        self.validate()?;
        let graph = self.dependency_graph()?;
        let mut topo = Topo::new(&graph);
        let mut order = Vec::with_capacity(self.list_tasks.len());
        while let Some(node) = topo.next(&graph) {
            order.push(graph[node]);
        }
        Ok(order)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Whether the version stamp matches `version`
    pub fn recorded_with(&self, version: &str) -> bool {
        self.plantseg_version == version
    }
}

/// True when the value is the default unfilled placeholder
pub fn is_placeholder(value: &Value) -> bool {
    value.as_str() == Some(INPUT_PLACEHOLDER)
}
