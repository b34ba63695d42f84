//! Core types for task execution: per-task state, reports and options

use crate::context::CancelToken;
use crate::diff::{Action, Changeset, PlannedChange};
use crate::error::{Error, ErrorCategory, FailureKind, Result, RunFailures, TaskFailure};
use crate::retry::RetryConfig;
use crate::task::TaskKey;
use serde::{Deserialize, Serialize};

/// Details of a task failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    /// Error message
    pub message: String,
    /// Error category
    pub category: ErrorCategory,
    /// Field in violation, when known
    pub field: Option<String>,
    /// Number of attempts made by the failing operation
    pub attempts: u32,
    /// Whether a transient error persisted until the retry budget ran out
    pub exhausted: bool,
}

impl FailureInfo {
    pub fn from_error(error: &Error, attempts: u32) -> Self {
        Self {
            message: error.to_string(),
            category: error.category(),
            field: error.field().map(ToString::to_string),
            attempts,
            exhausted: error.is_retryable(),
        }
    }
}

/// State of a task within one run.
///
/// `Pending -> Found -> Diffed -> {Skipped | Missing | Rendering -> {Succeeded | Failed}}`,
/// plus `Blocked` for dependents of a task that did not converge and
/// `NotAttempted` for tasks never dispatched because the run was cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Pending,
    Found { exists: bool },
    Diffed { action: Action },
    Rendering,
    Skipped { reason: String },
    /// The lifecycle only warns about this object and it does not exist,
    /// so nothing dependents would read from it is available
    Missing { reason: String },
    Blocked { by: TaskKey },
    Succeeded { action: Action },
    Failed(FailureInfo),
    NotAttempted,
}

impl TaskState {
    /// Whether no further transition can happen.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Skipped { .. }
                | Self::Missing { .. }
                | Self::Blocked { .. }
                | Self::Succeeded { .. }
                | Self::Failed(_)
                | Self::NotAttempted
        )
    }

    /// Whether dependents must not run.
    pub fn blocks_dependents(&self) -> bool {
        matches!(
            self,
            Self::Failed(_) | Self::Missing { .. } | Self::Blocked { .. } | Self::NotAttempted
        )
    }
}

/// Outcome of one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    pub key: TaskKey,
    pub cloud_name: String,
    /// Terminal state
    pub state: TaskState,
    /// Planned action, once the task was diffed
    pub action: Option<Action>,
    /// Field changes, once the task was diffed
    pub changes: Changeset,
    /// Lifecycle and target warnings
    pub warnings: Vec<String>,
    /// Number of render calls made
    pub renders: u32,
}

impl TaskReport {
    pub fn new(key: TaskKey, cloud_name: String) -> Self {
        Self {
            key,
            cloud_name,
            state: TaskState::Pending,
            action: None,
            changes: Changeset::default(),
            warnings: Vec::new(),
            renders: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self.state,
            TaskState::Succeeded { .. } | TaskState::Skipped { .. } | TaskState::Missing { .. }
        )
    }
}

/// Summary of execution results
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecuteSummary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
    pub blocked: usize,
    pub not_attempted: usize,
}

impl ExecuteSummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.updated
    }

    /// Check if execution was fully successful
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.blocked == 0 && self.not_attempted == 0
    }

    /// Total number of tasks processed
    pub fn total(&self) -> usize {
        self.created
            + self.updated
            + self.unchanged
            + self.skipped
            + self.failed
            + self.blocked
            + self.not_attempted
    }

    /// Merge another summary into this one
    pub fn merge(&mut self, other: &ExecuteSummary) {
        self.created += other.created;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.blocked += other.blocked;
        self.not_attempted += other.not_attempted;
    }

    /// Add a terminal state to the summary
    pub fn add_state(&mut self, state: &TaskState) {
        match state {
            TaskState::Succeeded {
                action: Action::Create,
            } => self.created += 1,
            TaskState::Succeeded {
                action: Action::Update | Action::Delete,
            } => self.updated += 1,
            TaskState::Succeeded {
                action: Action::NoChange,
            } => self.unchanged += 1,
            TaskState::Skipped { .. } | TaskState::Missing { .. } => self.skipped += 1,
            TaskState::Failed(_) => self.failed += 1,
            TaskState::Blocked { .. } => self.blocked += 1,
            TaskState::NotAttempted => self.not_attempted += 1,
            TaskState::Pending
            | TaskState::Found { .. }
            | TaskState::Diffed { .. }
            | TaskState::Rendering => {}
        }
    }
}

/// Options for execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Number of worker threads
    pub jobs: usize,
    /// Retry policy for find and render
    pub retry: RetryConfig,
    /// Cancellation signal
    pub cancel: CancelToken,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            retry: RetryConfig::default(),
            cancel: CancelToken::new(),
        }
    }
}

/// Everything one run did, in topological order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub tasks: Vec<TaskReport>,
    pub summary: ExecuteSummary,
}

impl RunReport {
    pub fn get(&self, key: &TaskKey) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| &t.key == key)
    }

    /// Total render calls across the run.
    pub fn renders(&self) -> u32 {
        self.tasks.iter().map(|t| t.renders).sum()
    }

    /// Tasks whose plan contains a change.
    pub fn planned_changes(&self) -> Vec<PlannedChange> {
        self.tasks
            .iter()
            .filter_map(|t| match t.action {
                Some(action) if action.is_change() => Some(PlannedChange {
                    key: t.key.clone(),
                    cloud_name: t.cloud_name.clone(),
                    action,
                    changes: t.changes.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Every failed, blocked and not-attempted task.
    pub fn failures(&self) -> RunFailures {
        let entries = self
            .tasks
            .iter()
            .filter_map(|t| {
                let kind = match &t.state {
                    TaskState::Failed(info) => FailureKind::Failed(info.clone()),
                    TaskState::Blocked { by } => FailureKind::Blocked { by: by.clone() },
                    TaskState::NotAttempted => FailureKind::NotAttempted,
                    _ => return None,
                };
                Some(TaskFailure {
                    key: t.key.clone(),
                    cloud_name: t.cloud_name.clone(),
                    kind,
                })
            })
            .collect();
        RunFailures { entries }
    }

    /// `Ok(self)` when every task converged, otherwise the aggregate error.
    pub fn into_result(self) -> Result<Self> {
        let failures = self.failures();
        if failures.is_empty() {
            Ok(self)
        } else {
            Err(Error::Run(failures))
        }
    }
}
