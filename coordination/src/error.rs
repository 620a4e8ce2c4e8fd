//! Coordination error types
//!
//! One taxonomy for every control-layer operation. Configuration errors are
//! fatal and surface before any node runs; everything a single branch can get
//! wrong is recovered locally and never reaches this enum.

use thiserror::Error;

/// Result type alias for coordination operations
pub type CoordinationResult<T> = Result<T, CoordinationError>;

/// Errors that can occur while compiling or driving a pipeline
#[derive(Error, Debug)]
pub enum CoordinationError {
    /// No analyst steps were requested
    #[error("Step selection is empty: at least one analyst step is required")]
    EmptySelection,

    /// Requested step identifier is not in the catalogue
    #[error("Unknown step identifier: {id}")]
    UnknownStep { id: String },

    /// Step exists but belongs to the other pipeline shape
    #[error("Step '{step}' is not available for the {shape} pipeline")]
    StepNotInShape { step: String, shape: String },

    /// Consensus was asked to aggregate zero opinions
    #[error("Cannot aggregate consensus from zero opinions")]
    NoOpinions,

    /// Configuration value is out of range or malformed
    #[error("Configuration error: {message}")]
    InvalidConfig { message: String },

    /// Compiled graph failed structural validation
    #[error("Invalid topology: {message}")]
    InvalidTopology { message: String },

    /// A node body reported a failure
    #[error("Node '{node}' failed: {message}")]
    NodeFailed { node: String, message: String },

    /// The graph names a node the runner has no body for
    #[error("No node body registered for '{node}'")]
    UnregisteredNode { node: String },

    /// The runner exceeded its visit budget
    #[error("Execution exceeded {visits} node visits without terminating")]
    RunawayExecution { visits: usize },

    /// Progress store failure
    #[error("Progress store error: {message}")]
    Store { message: String },

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML config parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// YAML config parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CoordinationError {
    /// Create an unknown step error
    pub fn unknown_step(id: impl Into<String>) -> Self {
        Self::UnknownStep { id: id.into() }
    }

    /// Create a step/shape mismatch error
    pub fn step_not_in_shape(step: impl Into<String>, shape: impl Into<String>) -> Self {
        Self::StepNotInShape {
            step: step.into(),
            shape: shape.into(),
        }
    }

    /// Create an invalid config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create an invalid topology error
    pub fn topology(message: impl Into<String>) -> Self {
        Self::InvalidTopology {
            message: message.into(),
        }
    }

    /// Create a node failure error
    pub fn node_failed(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NodeFailed {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Create a store error
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Whether this is a fatal configuration error that must fail fast
    /// before any node executes.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::EmptySelection
                | Self::UnknownStep { .. }
                | Self::StepNotInShape { .. }
                | Self::NoOpinions
                | Self::InvalidConfig { .. }
                | Self::Toml(_)
                | Self::Yaml(_)
        )
    }

    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptySelection => "EMPTY_SELECTION",
            Self::UnknownStep { .. } => "UNKNOWN_STEP",
            Self::StepNotInShape { .. } => "STEP_NOT_IN_SHAPE",
            Self::NoOpinions => "NO_OPINIONS",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::InvalidTopology { .. } => "INVALID_TOPOLOGY",
            Self::NodeFailed { .. } => "NODE_FAILED",
            Self::UnregisteredNode { .. } => "UNREGISTERED_NODE",
            Self::RunawayExecution { .. } => "RUNAWAY_EXECUTION",
            Self::Store { .. } => "STORE_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Toml(_) => "TOML_ERROR",
            Self::Yaml(_) => "YAML_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_classification() {
        assert!(CoordinationError::EmptySelection.is_configuration_error());
        assert!(CoordinationError::unknown_step("crypto").is_configuration_error());
        assert!(CoordinationError::NoOpinions.is_configuration_error());
        assert!(!CoordinationError::node_failed("bull", "timeout").is_configuration_error());
        assert!(!CoordinationError::RunawayExecution { visits: 10 }.is_configuration_error());
    }

    #[test]
    fn test_error_display() {
        let err = CoordinationError::step_not_in_shape("macro", "per_entity");
        assert!(err.to_string().contains("macro"));
        assert!(err.to_string().contains("per_entity"));

        let err = CoordinationError::unknown_step("crypto");
        assert_eq!(err.code(), "UNKNOWN_STEP");
        assert!(err.to_string().contains("crypto"));
    }
}
