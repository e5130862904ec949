pub mod args;
pub mod dag;
pub mod image;
pub mod registry;
pub mod runner;
pub mod tracker;

pub use args::{Arg, CallArgs, Returned, TaskCallable};
pub use dag::{is_placeholder, DagDocument, NodeType, Task};
pub use image::{Image, ImageArtifact, ImageHandle};
pub use registry::FunctionRegistry;
pub use runner::{RunReport, WorkflowRunner};
pub use tracker::{SharedTracker, TrackedTask, TrackedTaskBuilder, WorkflowTracker};
