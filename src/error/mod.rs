//! Error types and handling for the flowgraph engine.

use thiserror::Error;

/// Result type alias for flow operations
pub type FlowResult<T> = Result<T, FlowError>;

/// Comprehensive error types for flow execution
#[derive(Error, Debug)]
pub enum FlowError {
    /// The loaded flow configuration is structurally invalid
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A component's `process` failed
    #[error("Component '{component}' failed: {source}")]
    Component {
        /// Name of the failing component
        component: String,
        /// The wrapped underlying error
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The execution deadline passed
    #[error("Flow timed out after {elapsed:.3}s at step '{at_step}'")]
    Timeout {
        /// Elapsed wall-clock seconds when the deadline was observed
        elapsed: f64,
        /// Step or node at which the timeout was observed
        at_step: String,
    },

    /// Strict-mode deadline check violation
    #[error(
        "Component '{component}' ran {observed:.3}s without calling check_deadline (threshold {threshold:.1}s)"
    )]
    DeadlineCheck {
        /// Name of the offending component
        component: String,
        /// Observed seconds since the last deadline check
        observed: f64,
        /// The enforcement threshold in seconds
        threshold: f64,
    },

    /// A step condition could not be evaluated
    #[error("Condition '{expression}' failed to evaluate: {reason}")]
    ConditionEval {
        /// The expression text
        expression: String,
        /// Why evaluation failed (unsafe construct, parse error, evaluation error)
        reason: String,
    },

    /// The cyclic graph executor exceeded its iteration budget
    #[error(
        "Cycle through '{cycle_entry_node}' exceeded max_iterations ({actual_iterations}/{max_iterations})"
    )]
    MaxIterations {
        /// Configured iteration budget
        max_iterations: u32,
        /// Iterations performed when the budget tripped
        actual_iterations: u32,
        /// Back-edge target that re-entered the cycle
        cycle_entry_node: String,
    },

    /// `resume` was called with an unknown checkpoint id
    #[error("Checkpoint '{checkpoint_id}' not found")]
    CheckpointNotFound {
        /// The id that failed to resolve
        checkpoint_id: String,
    },

    /// Checkpoint persistence errors
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FlowError {
    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a new component error wrapping an underlying failure
    pub fn component<S, E>(component: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Component {
            component: component.into(),
            source: Box::new(source),
        }
    }

    /// Create a new component error from a plain message
    pub fn component_message<S: Into<String>, M: Into<String>>(component: S, message: M) -> Self {
        Self::Component {
            component: component.into(),
            source: message.into().into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(elapsed: f64, at_step: S) -> Self {
        Self::Timeout {
            elapsed,
            at_step: at_step.into(),
        }
    }

    /// Create a new condition evaluation error
    pub fn condition_eval<S: Into<String>, R: Into<String>>(expression: S, reason: R) -> Self {
        Self::ConditionEval {
            expression: expression.into(),
            reason: reason.into(),
        }
    }

    /// Create a new checkpoint error
    pub fn checkpoint<S: Into<String>>(message: S) -> Self {
        Self::Checkpoint(message.into())
    }

    /// Errors that abort the current execution regardless of `fail_fast`
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FlowError::Timeout { .. }
                | FlowError::DeadlineCheck { .. }
                | FlowError::MaxIterations { .. }
        )
    }

    /// Get the error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            FlowError::Configuration(_) => "configuration",
            FlowError::Component { .. } => "component",
            FlowError::Timeout { .. } => "timeout",
            FlowError::DeadlineCheck { .. } => "deadline_check",
            FlowError::ConditionEval { .. } => "condition_eval",
            FlowError::MaxIterations { .. } => "max_iterations",
            FlowError::CheckpointNotFound { .. } => "checkpoint_not_found",
            FlowError::Checkpoint(_) => "checkpoint",
            FlowError::Serialization(_) => "serialization",
            FlowError::Io(_) => "io",
            FlowError::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        let errors = vec![
            FlowError::configuration("bad config"),
            FlowError::component_message("fetch", "connection refused"),
            FlowError::timeout(1.5, "step-2"),
            FlowError::condition_eval("context.data.x ==", "parse error"),
        ];

        for error in errors {
            assert!(!error.category().is_empty());
        }
    }

    #[test]
    fn test_fatal_errors() {
        assert!(FlowError::timeout(0.5, "a").is_fatal());
        assert!(FlowError::MaxIterations {
            max_iterations: 3,
            actual_iterations: 3,
            cycle_entry_node: "plan".to_string(),
        }
        .is_fatal());
        assert!(!FlowError::component_message("a", "boom").is_fatal());
    }

    #[test]
    fn test_component_error_display() {
        let err = FlowError::component_message("validate", "schema mismatch");
        let rendered = err.to_string();
        assert!(rendered.contains("validate"));
        assert!(rendered.contains("schema mismatch"));
    }
}
