//! Error types for the Keel reconciliation engine.
//!
//! This module provides the error hierarchy for every stage of a run:
//! configuration, graph construction, state management, providers and
//! reconciliation.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the Keel reconciliation engine.
#[derive(Debug, Error)]
pub enum KeelError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Resource graph construction errors.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Provider errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Reconciliation errors.
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },
}

/// Errors raised while building the resource graph.
///
/// All of these are fatal and are raised before any provider call is made.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// Two declarations share the same identity.
    #[error("Duplicate resource identity: {id}")]
    DuplicateIdentity {
        /// The duplicated identity.
        id: String,
    },

    /// A resource reference could not be parsed.
    #[error("Invalid resource identity '{value}': {reason}")]
    InvalidIdentity {
        /// The raw reference.
        value: String,
        /// Why it is invalid.
        reason: String,
    },

    /// A dependency names a resource that is not declared.
    #[error("Resource {id} depends on undeclared resource {dependency}")]
    UnknownDependency {
        /// Resource declaring the edge.
        id: String,
        /// The missing dependency.
        dependency: String,
    },

    /// Dependency edges form a cycle.
    #[error("Dependency cycle detected: {cycle}")]
    CycleDetected {
        /// The cycle, rendered as `a -> b -> a`.
        cycle: String,
    },

    /// A resource spec failed its kind's schema.
    #[error("Resource {id} violates its schema: {message}")]
    SchemaViolation {
        /// Offending resource.
        id: String,
        /// Schema failure description.
        message: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Reading or writing the state backend failed.
    #[error("State store I/O failed: {message}")]
    Io {
        /// Description of the I/O failure.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// S3 backend error.
    #[error("S3 state backend error: {message}")]
    S3Error {
        /// Description of the S3 error.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State belongs to another project or environment.
    #[error("State belongs to {found}, expected {expected}")]
    ProjectMismatch {
        /// Expected `project/environment`.
        expected: String,
        /// Found `project/environment`.
        found: String,
    },
}

/// Errors returned by providers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// A failure that may succeed if retried (network, throttling, 5xx).
    #[error("Transient provider failure: {message}")]
    Transient {
        /// Description of the failure.
        message: String,
    },

    /// A failure that will not succeed on retry.
    #[error("Permanent provider failure: {message}")]
    Permanent {
        /// Description of the failure.
        message: String,
    },

    /// The resource does not exist on the platform.
    #[error("Resource not found on platform: {id}")]
    NotFound {
        /// Identity of the missing resource.
        id: String,
    },

    /// Transient failures persisted past the retry budget.
    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Message of the final failure.
        last_error: String,
    },

    /// No provider is registered for a resource kind.
    #[error("No provider registered for kind '{kind}'")]
    Unsupported {
        /// The resource kind.
        kind: String,
    },
}

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Reconciliation was aborted.
    #[error("Reconciliation aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },

    /// A worker task panicked or was torn down.
    #[error("Worker task for {resource} failed: {message}")]
    WorkerFailed {
        /// Resource the worker was applying.
        resource: String,
        /// Failure description.
        message: String,
    },
}

/// Result type alias for Keel operations.
pub type Result<T> = std::result::Result<T, KeelError>;

impl KeelError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(e) => e.is_retryable(),
            Self::State(StateError::LockFailed { .. }) => true,
            _ => false,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl StateError {
    /// Creates an I/O error with the given message.
    #[must_use]
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Creates an S3 error with the given message.
    #[must_use]
    pub fn s3(message: impl Into<String>) -> Self {
        Self::S3Error {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl ProviderError {
    /// Creates a transient error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Creates a permanent error.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }

    /// Returns true if the failure may succeed on retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}
