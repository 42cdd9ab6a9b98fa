//! Error types for reconciliation runs.
//!
//! Errors are categorized so the engine can tell configuration mistakes
//! (fatal, never retried) from transient backend trouble, timeouts and
//! cancellation when it builds the run report.

use crate::target::TargetKind;
use crate::types::TaskKey;
use serde::Serialize;
use thiserror::Error;

/// Categories of errors, used for reporting and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Dangling dependency, cycle, unsupported target, disallowed change
    Configuration,
    /// Network failure, throttling and other transient backend trouble
    Transient,
    /// A backend operation did not finish in time
    Timeout,
    /// The run was cancelled before the call was issued
    Cancelled,
    /// A resource that must exist was not found
    NotFound,
    /// Anything else
    Other,
}

impl ErrorCategory {
    /// Whether an error of this category is worth retrying by a backend client.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Configuration => "Configuration error",
            Self::Transient => "Transient backend error",
            Self::Timeout => "Operation timed out",
            Self::Cancelled => "Run cancelled",
            Self::NotFound => "Resource not found",
            Self::Other => "Unexpected error",
        }
    }
}

/// Errors raised by a [`Backend`](crate::Backend) implementation.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The addressed resource does not exist (never used for discovery,
    /// where absence is `Ok(None)`)
    #[error("not found: {0}")]
    NotFound(TaskKey),

    /// Network failure, throttling, quota exhaustion
    #[error("transient backend error: {message}")]
    Transient {
        /// Detail from the provider
        message: String,
    },

    /// The backend refused the request
    #[error("request rejected for {key}: {message}")]
    Rejected {
        /// Resource the request addressed
        key: TaskKey,
        /// Detail from the provider
        message: String,
    },

    /// An asynchronous operation did not reach a terminal state in time
    #[error("operation {operation} did not complete within {seconds:.1}s")]
    Timeout {
        /// Operation identifier
        operation: String,
        /// Timeout that elapsed
        seconds: f64,
    },

    /// An asynchronous operation finished with an error
    #[error("operation {operation} failed: {message}")]
    OperationFailed {
        /// Operation identifier
        operation: String,
        /// Detail from the provider
        message: String,
    },

    /// The run was cancelled before the call was issued
    #[error("backend call not issued: run cancelled")]
    Cancelled,

    /// IO error (file-backed backends)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BackendError {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound(_) => ErrorCategory::NotFound,
            Self::Transient { .. } => ErrorCategory::Transient,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::Rejected { .. } | Self::OperationFailed { .. } => ErrorCategory::Other,
            Self::Io(_) | Self::Json(_) => ErrorCategory::Other,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }
}

/// Errors that can occur while building or running a task graph.
#[derive(Debug, Error)]
pub enum Error {
    /// A task references another task that was never declared
    #[error("{dependent} depends on {missing}, which is not declared")]
    DanglingDependency {
        /// Task holding the reference
        dependent: TaskKey,
        /// The undeclared task
        missing: TaskKey,
    },

    /// The dependency graph is not acyclic
    #[error("dependency cycle: {}", format_cycle(.nodes))]
    Cycle {
        /// Participating tasks, in dependency order
        nodes: Vec<TaskKey>,
    },

    /// The same task was declared twice with different contents
    #[error("{0} declared more than once with different fields")]
    ConflictingDeclaration(TaskKey),

    /// Some tasks cannot be rendered for the active target
    #[error("target {target} is not supported by: {}", join_keys(.tasks))]
    UnsupportedTarget {
        /// The active target
        target: TargetKind,
        /// Tasks lacking a renderer for it
        tasks: Vec<TaskKey>,
    },

    /// Distinct tasks would render under the same terraform resource name
    #[error("{} all render as terraform resource {name}", join_keys(.tasks))]
    NameCollision {
        /// Shared resource name after sanitising
        name: String,
        /// Colliding tasks
        tasks: Vec<TaskKey>,
    },

    /// A terraform block was registered twice
    #[error("terraform resource {resource_type}.{name} is already defined")]
    DuplicateResource { resource_type: String, name: String },

    /// The validation hook rejected a field transition
    #[error("cannot change {field} on {key}: {reason}")]
    DisallowedChange {
        /// Rejected task
        key: TaskKey,
        /// Offending field
        field: String,
        /// Why the transition is not allowed
        reason: String,
    },

    /// The resource does not exist and its lifecycle forbids creating it
    #[error("{0} does not exist and its lifecycle does not allow creating it")]
    MissingResource(TaskKey),

    /// A cross-resource value is not available yet
    #[error("{key} has not yet been created: {attribute} is not assigned")]
    Unresolved {
        /// Referenced task
        key: TaskKey,
        /// Attribute that was looked up
        attribute: &'static str,
    },

    /// A validate-only resource differs from its declaration
    #[error("{key} differs from its declaration in: {}", .fields.join(", "))]
    Drift {
        /// Drifted task
        key: TaskKey,
        /// Fields that differ
        fields: Vec<String>,
    },

    /// An engine-computed field was written twice
    #[error("computed field {0} already written")]
    ComputedAlreadySet(&'static str),

    /// The generated artifact could not be written
    #[error("failed to write {}: {source}", .path.display())]
    Output {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The generated artifact could not be serialized
    #[error("failed to serialize output: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The worker pool could not be created
    #[error("failed to create worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    /// Backend call failed
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Resource-specific mapping or rendering error
    #[error(transparent)]
    Task(#[from] anyhow::Error),
}

impl Error {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::DanglingDependency { .. }
            | Self::Cycle { .. }
            | Self::ConflictingDeclaration(_)
            | Self::UnsupportedTarget { .. }
            | Self::NameCollision { .. }
            | Self::DuplicateResource { .. }
            | Self::DisallowedChange { .. }
            | Self::ComputedAlreadySet(_) => ErrorCategory::Configuration,
            Self::MissingResource(_) | Self::Unresolved { .. } => ErrorCategory::NotFound,
            Self::Drift { .. } => ErrorCategory::Configuration,
            Self::Output { .. } | Self::Serialize(_) | Self::WorkerPool(_) => ErrorCategory::Other,
            Self::Backend(e) => e.category(),
            Self::Task(_) => ErrorCategory::Other,
        }
    }

    /// Whether this error is a configuration error (fatal, not retried).
    pub fn is_configuration(&self) -> bool {
        self.category() == ErrorCategory::Configuration
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

fn format_cycle(nodes: &[TaskKey]) -> String {
    let mut parts: Vec<String> = nodes.iter().map(ToString::to_string).collect();
    if let Some(first) = nodes.first() {
        parts.push(first.to_string());
    }
    parts.join(" -> ")
}

fn join_keys(keys: &[TaskKey]) -> String {
    keys.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
