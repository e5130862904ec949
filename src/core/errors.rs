use thiserror::Error;

/// Unified error type for workflow capture, pruning, serialization and replay
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Invalid task declaration or configuration values
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// The tracker was called in a way it does not support
    #[error("Usage error: {message}")]
    Usage { message: String },

    /// A wrapped function returned a shape the tracker cannot record
    #[error("Type error in {function}: {message}")]
    Type { function: String, message: String },

    /// The graph violates one of its structural invariants
    #[error("Integrity error: {message}")]
    Integrity { message: String },

    /// Filesystem errors
    #[error("IO operation failed: {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// Serialization errors
    #[error("Serialization failed: {format}")]
    Serialization {
        format: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// An external input still holds the placeholder or has no value at all
    #[error("External input '{slot}' must be supplied before execution")]
    MissingInput { slot: String },

    /// The wrapped function itself failed
    #[error("Function {function} failed")]
    Execution {
        function: String,
        #[source]
        source: anyhow::Error,
    },

    /// Lock poisoning on a shared tracker
    #[error("Concurrency error: {operation}")]
    Concurrency { operation: String },
}

impl WorkflowError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            field: None,
        }
    }

    /// Create a configuration error pointing at a specific field or parameter
    pub fn configuration_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Configuration {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn usage<S: Into<String>>(message: S) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    pub fn type_error<F: Into<String>, M: Into<String>>(function: F, message: M) -> Self {
        Self::Type {
            function: function.into(),
            message: message.into(),
        }
    }

    pub fn integrity<S: Into<String>>(message: S) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }

    /// Create an IO error
    pub fn io<S: Into<String>>(operation: S, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        format: S,
        source: E,
    ) -> Self {
        Self::Serialization {
            format: format.into(),
            source: Box::new(source),
        }
    }

    pub fn missing_input<S: Into<String>>(slot: S) -> Self {
        Self::MissingInput { slot: slot.into() }
    }

    pub fn execution<S: Into<String>>(function: S, source: anyhow::Error) -> Self {
        Self::Execution {
            function: function.into(),
            source,
        }
    }

    pub fn concurrency<S: Into<String>>(operation: S) -> Self {
        Self::Concurrency {
            operation: operation.into(),
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::Usage { .. } => "usage",
            Self::Type { .. } => "type",
            Self::Integrity { .. } => "integrity",
            Self::Io { .. } => "io",
            Self::Serialization { .. } => "serialization",
            Self::MissingInput { .. } => "missing_input",
            Self::Execution { .. } => "execution",
            Self::Concurrency { .. } => "concurrency",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, WorkflowError>;

impl From<std::io::Error> for WorkflowError {
    fn from(err: std::io::Error) -> Self {
        Self::io("io_operation", err)
    }
}

impl From<serde_yaml::Error> for WorkflowError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::serialization("yaml", err)
    }
}

impl From<serde_json::Error> for WorkflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization("json", err)
    }
}
