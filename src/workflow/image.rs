//! Image artifacts as the tracker sees them: opaque values with a stable,
//! globally unique name. Pixel data lives with the collaborator that
//! implements [`ImageArtifact`].

use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Capability every image-like value must expose to be tracked by reference.
pub trait ImageArtifact: fmt::Debug + Send + Sync {
    /// Identifier used as the graph key. Must never be reused by another artifact.
    fn unique_name(&self) -> &str;

    /// Human readable name.
    fn name(&self) -> &str;
}

pub type ImageHandle = Arc<dyn ImageArtifact>;

/// Minimal artifact carrying only its identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    name: String,
    unique_name: String,
}

impl Image {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let unique_name = format!("{}_{}", name, Uuid::new_v4());
        Self { name, unique_name }
    }

    /// A new artifact named `<name>_<suffix>` after this one, with its own identity.
    pub fn derive(&self, suffix: &str) -> Self {
        Self::new(format!("{}_{}", self.name, suffix))
    }

    pub fn handle(self) -> ImageHandle {
        Arc::new(self)
    }
}

impl ImageArtifact for Image {
    fn unique_name(&self) -> &str {
        &self.unique_name
    }

    fn name(&self) -> &str {
        &self.name
    }
}
