//! Lifecycle policies governing whether a task may create or update objects.

use crate::context::Context;
use crate::diff::Changeset;
use crate::error::Result;
use crate::target::{RenderTarget, TargetKind};
use crate::task::{Change, Task, TaskKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Policy for a task's backend object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lifecycle {
    /// Create and update as needed; deletion only through an explicit prune
    #[default]
    Sync,
    /// Never mutate; absence or divergence is logged as a warning
    ExistsAndWarnIfChanges,
    /// Never mutate; absence or divergence fails the task
    ExistsAndValidates,
    /// The engine does nothing for this task
    Ignore,
}

/// What the executor should do after applying a lifecycle to a diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleDecision {
    /// Continue to check and render
    Proceed,
    /// Stop without rendering, reporting these warnings
    Warn(Vec<String>),
    /// Fail the task
    Reject(String),
}

impl Lifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sync => "Sync",
            Self::ExistsAndWarnIfChanges => "ExistsAndWarnIfChanges",
            Self::ExistsAndValidates => "ExistsAndValidates",
            Self::Ignore => "Ignore",
        }
    }

    /// Whether the engine may create or update the object.
    pub fn allows_mutation(&self) -> bool {
        matches!(self, Self::Sync)
    }

    /// Whether a task may be skipped with a warning when it has no renderer
    /// for the active target.
    pub fn tolerates_missing_renderer(&self) -> bool {
        matches!(self, Self::ExistsAndWarnIfChanges | Self::Ignore)
    }

    /// Apply the policy to the observed state of an object.
    ///
    /// `cloud_name` is used in messages only.
    pub fn evaluate(&self, cloud_name: &str, found: bool, changes: &Changeset) -> LifecycleDecision {
        match self {
            Self::Sync => LifecycleDecision::Proceed,
            Self::Ignore => LifecycleDecision::Warn(Vec::new()),
            Self::ExistsAndWarnIfChanges => {
                if !found {
                    LifecycleDecision::Warn(vec![format!("{cloud_name} does not exist")])
                } else if changes.is_empty() {
                    LifecycleDecision::Warn(Vec::new())
                } else {
                    LifecycleDecision::Warn(
                        changes
                            .iter()
                            .map(|c| format!("{cloud_name}: {c}"))
                            .collect(),
                    )
                }
            }
            Self::ExistsAndValidates => {
                if !found {
                    LifecycleDecision::Reject(format!("{cloud_name} does not exist"))
                } else if changes.is_empty() {
                    LifecycleDecision::Warn(Vec::new())
                } else {
                    let fields: Vec<&str> = changes.iter().map(|c| c.field.as_str()).collect();
                    LifecycleDecision::Reject(format!(
                        "{cloud_name} differs from its definition in: {}",
                        fields.join(", ")
                    ))
                }
            }
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lifecycle {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Sync" => Ok(Self::Sync),
            "ExistsAndWarnIfChanges" => Ok(Self::ExistsAndWarnIfChanges),
            "ExistsAndValidates" => Ok(Self::ExistsAndValidates),
            "Ignore" => Ok(Self::Ignore),
            other => Err(format!("unknown lifecycle: {other}")),
        }
    }
}

/// A task with its lifecycle replaced, e.g. from per-kind configuration.
/// Everything else is delegated to the inner task.
#[derive(Debug, Clone, PartialEq)]
pub struct WithLifecycle<T> {
    pub task: T,
    pub lifecycle: Lifecycle,
}

impl<T> WithLifecycle<T> {
    pub fn new(task: T, lifecycle: Lifecycle) -> Self {
        Self { task, lifecycle }
    }
}

impl<C: ?Sized, T: Task<C>> Task<C> for WithLifecycle<T> {
    type State = T::State;

    fn kind(&self) -> &'static str {
        self.task.kind()
    }

    fn name(&self) -> &str {
        self.task.name()
    }

    fn key(&self) -> TaskKey {
        Task::key(&self.task)
    }

    fn cloud_name(&self) -> String {
        self.task.cloud_name()
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        self.task.dependencies()
    }

    fn lock_key(&self) -> Option<TaskKey> {
        self.task.lock_key()
    }

    fn supports_target(&self, target: TargetKind) -> bool {
        self.task.supports_target(target)
    }

    fn find(&self, ctx: &Context<'_, C>) -> Result<Option<Self::State>> {
        self.task.find(ctx)
    }

    fn expected(&self, ctx: &Context<'_, C>) -> Result<Self::State> {
        self.task.expected(ctx)
    }

    fn diff(&self, actual: Option<&Self::State>, expected: &Self::State) -> Changeset {
        self.task.diff(actual, expected)
    }

    fn check_changes(&self, change: &Change<'_, Self::State>) -> Result<()> {
        self.task.check_changes(change)
    }

    fn render(
        &self,
        ctx: &Context<'_, C>,
        target: RenderTarget<'_, C>,
        change: &Change<'_, Self::State>,
    ) -> Result<()> {
        self.task.render(ctx, target, change)
    }
}
