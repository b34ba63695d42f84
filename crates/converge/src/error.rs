//! Error types for the reconciliation engine.
//!
//! Errors are categorized so the executor can decide whether an operation
//! should be retried, whether it only fails one task, or whether the whole
//! run must stop before anything is rendered.

use crate::target::TargetKind;
use crate::task::TaskKey;
use crate::types::FailureInfo;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Categories of engine errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCategory {
    /// Invalid graph or task definition (cycles, dangling references, missing fields)
    Configuration,
    /// A field that cannot be changed on an existing object was changed
    ImmutableField,
    /// Rate limiting, eventual consistency lag, flaky network
    Transient,
    /// Permission denied, quota exceeded, malformed request
    Permanent,
    /// Aggregated failures and anything unclassified
    Other,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Configuration => "Configuration error",
            Self::ImmutableField => "Immutable field changed",
            Self::Transient => "Transient backend error",
            Self::Permanent => "Permanent backend error",
            Self::Other => "Unexpected error",
        }
    }
}

/// Errors that can occur while building or executing a task graph.
#[derive(Debug, Error)]
pub enum Error {
    /// The dependency edges form a cycle
    #[error("dependency cycle detected: {}", format_keys(.members))]
    CycleDetected {
        /// Tasks on the cycle, in traversal order
        members: Vec<TaskKey>,
    },

    /// A task depends on a key that was never registered
    #[error("{task} depends on {missing}, which was never registered")]
    DanglingDependency {
        /// Task declaring the dependency
        task: TaskKey,
        /// The unregistered dependency
        missing: TaskKey,
    },

    /// Two different tasks were registered under the same key
    #[error("task {key} is already registered with a different definition")]
    DuplicateTask {
        /// Conflicting key
        key: TaskKey,
    },

    /// A mandatory field is missing on create
    #[error("field {field} is required")]
    RequiredField {
        /// Name of the missing field
        field: String,
    },

    /// An immutable field differs on an existing object
    #[error("field {field} cannot be changed on an existing object")]
    CannotChangeField {
        /// Name of the immutable field
        field: String,
    },

    /// The task cannot render to the active target
    #[error("{task} cannot be rendered to the {target} target")]
    NoRenderer {
        /// Task without a renderer
        task: TaskKey,
        /// Active target
        target: TargetKind,
    },

    /// A task-dependent value was read before its owner executed
    #[error("value owned by {owner} was read before {owner} executed")]
    ResourceNotReady {
        /// Task that produces the value
        owner: TaskKey,
    },

    /// Observed state violates the task's lifecycle policy
    #[error("{message}")]
    Validation {
        /// What did not validate
        message: String,
    },

    /// Backend rate limiting (HTTP 429, throttling)
    #[error("throttled: {message}")]
    Throttled {
        /// Backend message
        message: String,
    },

    /// Backend temporarily unavailable (HTTP 5xx)
    #[error("service unavailable: {message}")]
    Unavailable {
        /// Backend message
        message: String,
    },

    /// A just-created object is not visible yet
    #[error("not found yet: {message}")]
    NotFoundYet {
        /// Backend message
        message: String,
    },

    /// Connection, DNS or timeout failure
    #[error("network error: {message}")]
    Network {
        /// Transport message
        message: String,
    },

    /// Caller lacks permission
    #[error("access denied: {message}")]
    AccessDenied {
        /// Backend message
        message: String,
    },

    /// Account quota exhausted
    #[error("quota exceeded: {message}")]
    QuotaExceeded {
        /// Backend message
        message: String,
    },

    /// Backend rejected the request as malformed
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// Backend message
        message: String,
    },

    /// Object does not exist
    #[error("not found: {message}")]
    NotFound {
        /// What was not found
        message: String,
    },

    /// Downloaded or read content does not match its expected digest
    #[error("hash mismatch for {location}: expected {expected}, got {actual}")]
    HashMismatch {
        /// Where the content came from
        location: String,
        /// Expected blake3 digest
        expected: String,
        /// Actual blake3 digest
        actual: String,
    },

    /// The run was cancelled before this operation started
    #[error("run cancelled")]
    Cancelled,

    /// One or more tasks did not converge
    #[error("{0}")]
    Run(RunFailures),

    /// IO error with the path involved
    #[error("IO error at {}: {source}", path.display())]
    Io {
        /// Path being read or written
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for [`Error::RequiredField`].
    pub fn required(field: impl Into<String>) -> Self {
        Self::RequiredField {
            field: field.into(),
        }
    }

    /// Shorthand for [`Error::CannotChangeField`].
    pub fn cannot_change(field: impl Into<String>) -> Self {
        Self::CannotChangeField {
            field: field.into(),
        }
    }

    /// Wrap an IO error with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Get the error category for retry and propagation logic.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::CycleDetected { .. }
            | Error::DanglingDependency { .. }
            | Error::DuplicateTask { .. }
            | Error::RequiredField { .. }
            | Error::NoRenderer { .. }
            | Error::ResourceNotReady { .. }
            | Error::Validation { .. } => ErrorCategory::Configuration,
            Error::CannotChangeField { .. } => ErrorCategory::ImmutableField,
            Error::Throttled { .. }
            | Error::Unavailable { .. }
            | Error::NotFoundYet { .. }
            | Error::Network { .. } => ErrorCategory::Transient,
            Error::AccessDenied { .. }
            | Error::QuotaExceeded { .. }
            | Error::InvalidRequest { .. }
            | Error::NotFound { .. }
            | Error::HashMismatch { .. } => ErrorCategory::Permanent,
            _ => ErrorCategory::Other,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// The field in violation, for field-level errors.
    pub fn field(&self) -> Option<&str> {
        match self {
            Error::RequiredField { field } | Error::CannotChangeField { field } => Some(field),
            _ => None,
        }
    }

    /// Create an error from an HTTP-style status code returned by a backend.
    ///
    /// 429 and 5xx are transient; 401/403, 400/422 and 404 are permanent.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => Error::Throttled { message },
            500..=599 => Error::Unavailable { message },
            401 | 403 => Error::AccessDenied { message },
            404 => Error::NotFound { message },
            400 | 409 | 422 => Error::InvalidRequest { message },
            _ => Error::Other(format!("HTTP {status}: {message}")),
        }
    }
}

impl From<ureq::Error> for Error {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::StatusCode(code) => Self::from_status(code, format!("HTTP {code}")),
            other => Self::Network {
                message: other.to_string(),
            },
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Aggregate of every task that did not converge in one run.
#[derive(Debug, Clone, Default)]
pub struct RunFailures {
    /// One entry per failed, blocked or not-attempted task
    pub entries: Vec<TaskFailure>,
}

/// A single task that did not converge.
#[derive(Debug, Clone)]
pub struct TaskFailure {
    /// Graph key of the task
    pub key: TaskKey,
    /// Name the backend knows the object by
    pub cloud_name: String,
    /// Why it did not converge
    pub kind: FailureKind,
}

/// Why a task did not converge.
#[derive(Debug, Clone)]
pub enum FailureKind {
    /// The task itself failed
    Failed(FailureInfo),
    /// A dependency failed, so the task was never rendered
    Blocked {
        /// The failed task that caused the block
        by: TaskKey,
    },
    /// The run was cancelled before the task was dispatched
    NotAttempted,
}

impl RunFailures {
    /// Whether nothing failed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Find the entry for a key.
    pub fn get(&self, key: &TaskKey) -> Option<&TaskFailure> {
        self.entries.iter().find(|e| &e.key == key)
    }
}

impl fmt::Display for RunFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} task(s) did not converge:", self.entries.len())?;
        for entry in &self.entries {
            write!(f, "  {} ({}): ", entry.key, entry.cloud_name)?;
            match &entry.kind {
                FailureKind::Failed(info) => {
                    if let Some(field) = &info.field {
                        write!(f, "[field {field}] ")?;
                    }
                    let nature = if info.exhausted {
                        format!("transient, gave up after {} attempts", info.attempts)
                    } else {
                        info.category.description().to_lowercase()
                    };
                    writeln!(f, "{} ({nature})", info.message)?;
                }
                FailureKind::Blocked { by } => writeln!(f, "blocked by failed dependency {by}")?,
                FailureKind::NotAttempted => writeln!(f, "not attempted")?,
            }
        }
        Ok(())
    }
}

fn format_keys(keys: &[TaskKey]) -> String {
    keys.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_retryable() {
        assert!(ErrorCategory::Transient.is_retryable());
        assert!(!ErrorCategory::Permanent.is_retryable());
        assert!(!ErrorCategory::Configuration.is_retryable());
        assert!(!ErrorCategory::ImmutableField.is_retryable());
    }

    #[test]
    fn test_from_status_classification() {
        assert!(Error::from_status(429, "slow down").is_retryable());
        assert!(Error::from_status(503, "unavailable").is_retryable());
        assert!(Error::from_status(500, "boom").is_retryable());
        assert_eq!(
            Error::from_status(403, "denied").category(),
            ErrorCategory::Permanent
        );
        assert_eq!(
            Error::from_status(400, "bad").category(),
            ErrorCategory::Permanent
        );
        assert!(!Error::from_status(404, "gone").is_retryable());
    }

    #[test]
    fn test_field_errors() {
        let err = Error::cannot_change("cidr");
        assert_eq!(err.category(), ErrorCategory::ImmutableField);
        assert_eq!(err.field(), Some("cidr"));

        let err = Error::required("name");
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert_eq!(err.field(), Some("name"));
    }

    #[test]
    fn test_cycle_message_names_members() {
        let err = Error::CycleDetected {
            members: vec![
                TaskKey::new("Test", "a"),
                TaskKey::new("Test", "b"),
                TaskKey::new("Test", "c"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "dependency cycle detected: Test/a -> Test/b -> Test/c"
        );
    }
}
