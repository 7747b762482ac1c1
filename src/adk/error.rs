// SPDX-License-Identifier: MIT

//! Typed error handling for weave-rs
//!
//! Every fallible operation in the crate returns [`FrameworkError`]. The
//! sub-enums ([`WorkflowError`], [`ParseError`], [`ToolError`], ...) convert
//! into it with `?`, and every variant can report whether it is fatal and
//! whether the operation that produced it may be retried.

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Boxed error returned by user supplied handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Which kind of component wrapped a foreign error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Agent,
    Workflow,
    Tool,
    Emitter,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Agent => "Agent",
            ErrorKind::Workflow => "Workflow",
            ErrorKind::Tool => "Tool",
            ErrorKind::Emitter => "Emitter",
        };
        f.write_str(s)
    }
}

/// Top-level error type for weave-rs
#[derive(Debug, Error)]
pub enum FrameworkError {
    /// State or input failed its declared schema. Never retried.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Model output did not follow the declared grammar
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A tool failed while executing
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// Tool not found during execution
    #[error("Tool '{name}' not found")]
    ToolNotFound { name: String },

    /// A retry budget ran out
    #[error("Max {kind} reached: {limit}")]
    RetryExhausted {
        kind: String,
        limit: usize,
        context: Option<Value>,
        #[source]
        cause: Option<Box<FrameworkError>>,
    },

    /// The run was cancelled through its abort signal
    #[error("Operation aborted: {reason}")]
    Aborted { reason: String },

    /// Agent-level failure
    #[error("Agent error: {message}")]
    Agent {
        message: String,
        fatal: bool,
        context: Option<Value>,
        #[source]
        cause: Option<Box<FrameworkError>>,
    },

    /// Workflow-specific errors
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    /// Model/LLM errors
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Listener failures and emitter misuse
    #[error(transparent)]
    Emitter(#[from] EmitterError),

    /// Prompt template could not be rendered
    #[error("Template error: {0}")]
    Template(String),

    /// `run()` was called on an owner that is already running
    #[error("'{owner}' is already running")]
    AlreadyRunning { owner: String },

    /// JSON serialization/deserialization errors
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Foreign error that crossed a run boundary
    #[error("{kind} error: {message}")]
    Wrapped {
        kind: ErrorKind,
        message: String,
        #[source]
        cause: BoxError,
    },
}

/// Schema validation failures
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("missing required field '{field}'")]
    MissingField { field: String },

    #[error("field '{field}' expected {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: String,
        found: String,
    },

    #[error("expected a JSON object, found {found}")]
    NotAnObject { found: String },

    #[error("value at '{path}' is invalid: {reason}")]
    Constraint { path: String, reason: String },

    #[error("{0}")]
    Invalid(String),
}

/// Errors raised by the incremental line parser
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParseError {
    #[error("Transition from '{from}' to '{to}' is not allowed")]
    InvalidTransition { from: String, to: String },

    #[error("Field '{field}' cannot start the output")]
    NotAStartField { field: String },

    #[error("Output must start with a known field prefix, got '{line}'")]
    MissingPrefix { line: String },

    #[error("Field '{field}' has already been parsed")]
    DuplicateField { field: String },

    #[error("Invalid value for field '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Output ended in unexpected state (last field: {})", .field.as_deref().unwrap_or("none"))]
    UnexpectedEnd { field: Option<String> },
}

impl ParseError {
    /// The grammar field the error is about, if any
    pub fn field(&self) -> Option<&str> {
        match self {
            ParseError::InvalidTransition { to, .. } => Some(to),
            ParseError::NotAStartField { field }
            | ParseError::DuplicateField { field }
            | ParseError::InvalidValue { field, .. } => Some(field),
            ParseError::UnexpectedEnd { field } => field.as_deref(),
            ParseError::MissingPrefix { .. } => None,
        }
    }
}

/// Error raised by a tool's execution
#[derive(Debug, Error)]
#[error("Tool '{tool}' failed: {message}")]
pub struct ToolError {
    pub tool: String,
    pub message: String,
    pub retryable: bool,
    #[source]
    pub cause: Option<BoxError>,
}

impl ToolError {
    pub fn new(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            message: message.into(),
            retryable: false,
            cause: None,
        }
    }

    /// Mark the failure as transient so the runner may re-execute the tool
    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    pub fn with_cause(mut self, cause: impl Into<BoxError>) -> Self {
        self.cause = Some(cause.into());
        self
    }
}

/// Workflow-specific errors
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Step '{0}' is already registered")]
    DuplicateStep(String),

    #[error("Unknown step: {0}")]
    UnknownStep(String),

    #[error("Workflow has no steps")]
    NoSteps,

    #[error("Step '{0}' has no previous step")]
    NoPreviousStep(String),

    #[error("Workflow exceeded {limit} step executions")]
    StepLimitExceeded { limit: usize },
}

/// Model/LLM-specific errors
#[derive(Debug, Error)]
pub enum ModelError {
    /// Rate limit exceeded
    #[error("Rate limit exceeded, retry after {retry_after_secs:?} seconds")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Invalid response from model
    #[error("Invalid response from model: {0}")]
    InvalidResponse(String),

    /// Provider-side failure
    #[error("Model provider error: {message}")]
    Provider { message: String, retryable: bool },
}

/// Event emitter errors
#[derive(Debug, Error)]
pub enum EmitterError {
    #[error("{} listener(s) failed for '{path}': {}", .errors.len(), .errors.join("; "))]
    Listeners { path: String, errors: Vec<String> },

    #[error("Event '{path}' was emitted again from one of its own blocking listeners")]
    Reentrant { path: String },

    #[error("Invalid event matcher: {0}")]
    InvalidMatcher(#[from] regex::Error),
}

/// Cloneable, serializable view of an error for event payloads
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorSnapshot {
    pub message: String,
    pub explanation: String,
    pub fatal: bool,
    pub retryable: bool,
}

impl FrameworkError {
    /// Create an aborted error
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }

    /// Create a tool not found error
    pub fn tool_not_found(name: impl Into<String>) -> Self {
        Self::ToolNotFound { name: name.into() }
    }

    /// Create a fatal agent error
    pub fn agent_fatal(message: impl Into<String>) -> Self {
        Self::Agent {
            message: message.into(),
            fatal: true,
            context: None,
            cause: None,
        }
    }

    /// Normalize an error that crossed a run boundary.
    ///
    /// Framework errors pass through unchanged; anything else is wrapped
    /// with the original kept as the source.
    pub fn ensure(err: BoxError, kind: ErrorKind) -> Self {
        match err.downcast::<FrameworkError>() {
            Ok(err) => *err,
            Err(other) => match other.downcast::<ToolError>() {
                Ok(tool) => Self::Tool(*tool),
                Err(other) => Self::Wrapped {
                    kind,
                    message: other.to_string(),
                    cause: other,
                },
            },
        }
    }

    /// Attach structured context (e.g. the iteration log) to the error
    pub fn with_context(mut self, value: Value) -> Self {
        match &mut self {
            Self::RetryExhausted { context, .. } | Self::Agent { context, .. } => {
                *context = Some(value);
            }
            _ => {}
        }
        self
    }

    /// Structured context attached to the error, if any
    pub fn context(&self) -> Option<&Value> {
        match self {
            Self::RetryExhausted { context, .. } | Self::Agent { context, .. } => {
                context.as_ref()
            }
            _ => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Validation(_)
            | Self::RetryExhausted { .. }
            | Self::Aborted { .. }
            | Self::Workflow(_)
            | Self::Emitter(_)
            | Self::Template(_)
            | Self::AlreadyRunning { .. } => true,
            Self::Agent { fatal, .. } => *fatal,
            _ => false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Parse(_) | Self::ToolNotFound { .. } | Self::Json(_) => true,
            Self::Tool(err) => err.retryable,
            Self::Model(ModelError::RateLimited { .. }) => true,
            Self::Model(ModelError::InvalidResponse(_)) => true,
            Self::Model(ModelError::Provider { retryable, .. }) => *retryable,
            Self::Agent { fatal, .. } => !*fatal,
            Self::Wrapped { .. } => true,
            _ => false,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }

    /// Human-readable explanation: the message followed by its cause chain
    pub fn explain(&self) -> String {
        let mut lines = vec![self.to_string()];
        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            lines.push(format!("{}caused by: {}", "  ".repeat(depth), err));
            source = err.source();
            depth += 1;
        }
        lines.join("\n")
    }

    pub fn snapshot(&self) -> ErrorSnapshot {
        ErrorSnapshot {
            message: self.to_string(),
            explanation: self.explain(),
            fatal: self.is_fatal(),
            retryable: self.is_retryable(),
        }
    }
}

// Allow conversion from strings for handler ergonomics
impl From<&str> for FrameworkError {
    fn from(s: &str) -> Self {
        Self::Wrapped {
            kind: ErrorKind::Workflow,
            message: s.to_string(),
            cause: s.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explain_includes_cause_chain() {
        let inner = FrameworkError::Tool(ToolError::new("search", "timeout"));
        let err = FrameworkError::RetryExhausted {
            kind: "retries".to_string(),
            limit: 3,
            context: None,
            cause: Some(Box::new(inner)),
        };

        let explanation = err.explain();
        assert!(explanation.starts_with("Max retries reached: 3"));
        assert!(explanation.contains("caused by: Tool 'search' failed: timeout"));
        assert!(err.is_fatal());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_ensure_passes_framework_errors_through() {
        let boxed: BoxError = Box::new(FrameworkError::aborted("user"));
        let err = FrameworkError::ensure(boxed, ErrorKind::Workflow);
        assert!(err.is_aborted());
    }

    #[test]
    fn test_ensure_wraps_foreign_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let err = FrameworkError::ensure(Box::new(io), ErrorKind::Workflow);

        match &err {
            FrameworkError::Wrapped { kind, message, .. } => {
                assert_eq!(*kind, ErrorKind::Workflow);
                assert_eq!(message, "disk on fire");
            }
            other => panic!("Expected Wrapped, got {:?}", other),
        }
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.explain().contains("disk on fire"));
    }

    #[test]
    fn test_ensure_unboxes_tool_errors() {
        let boxed: BoxError = Box::new(ToolError::new("calc", "division by zero").retryable());
        let err = FrameworkError::ensure(boxed, ErrorKind::Agent);
        assert!(matches!(err, FrameworkError::Tool(_)));
        assert!(err.is_retryable());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_parse_error_field() {
        let err = ParseError::InvalidTransition {
            from: "thought".to_string(),
            to: "tool_input".to_string(),
        };
        assert_eq!(err.field(), Some("tool_input"));
        assert!(err.to_string().contains("thought"));

        let err = FrameworkError::from(err);
        assert!(err.is_retryable());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_context_attaches_only_to_contextual_variants() {
        let err = FrameworkError::agent_fatal("stuck").with_context(serde_json::json!({"n": 1}));
        assert_eq!(err.context(), Some(&serde_json::json!({"n": 1})));

        let err = FrameworkError::aborted("x").with_context(serde_json::json!({}));
        assert!(err.context().is_none());
    }
}
