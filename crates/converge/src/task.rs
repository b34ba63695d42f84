//! The Task trait: one unit of desired infrastructure state.
//!
//! A task knows how to find the real object, compute the state it should
//! have, diff the two field by field, validate the change and render it to
//! the active target. Tasks are generic over a provider context `C` (a cloud
//! API, a node host) so one engine drives every kind of backend.

use crate::context::Context;
use crate::diff::Changeset;
use crate::error::Result;
use crate::executor::TaskRunner;
use crate::lifecycle::Lifecycle;
use crate::target::{RenderTarget, TargetKind};
use crate::types::TaskReport;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;

/// Identity of a task in the graph: its kind plus its logical name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskKey {
    /// Task kind, e.g. `Vpc`
    pub kind: String,
    /// Logical name, unique within the kind
    pub name: String,
}

impl TaskKey {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// The change a task is asked to validate or render.
#[derive(Debug)]
pub struct Change<'a, S> {
    /// Observed state, `None` when the object does not exist
    pub actual: Option<&'a S>,
    /// Desired state
    pub expected: &'a S,
    /// Fields that differ
    pub changes: &'a Changeset,
}

impl<S> Clone for Change<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for Change<'_, S> {}

impl<S> Change<'_, S> {
    /// Whether rendering this change creates the object.
    pub fn is_create(&self) -> bool {
        self.actual.is_none()
    }

    /// Whether a field is part of the change.
    pub fn touches(&self, field: &str) -> bool {
        self.changes.contains(field)
    }
}

/// A unit of desired state with a find / check / render lifecycle.
///
/// `State` is the comparable view of the object: `find` returns the observed
/// one and `expected` the desired one, so diffing is symmetric. Reference
/// fields hold resolved ids (see [`Context::output`]) so they compare by the
/// identity of the object they point at.
///
/// # Example
///
/// ```ignore
/// #[derive(Debug, PartialEq)]
/// struct Bucket { name: String, versioned: bool }
///
/// impl Task<dyn Store> for Bucket {
///     type State = BucketState;
///     fn kind(&self) -> &'static str { "Bucket" }
///     fn name(&self) -> &str { &self.name }
///     fn find(&self, ctx: &Context<'_, dyn Store>) -> Result<Option<BucketState>> {
///         ctx.api()?.bucket(&self.name)
///     }
///     fn expected(&self, _ctx: &Context<'_, dyn Store>) -> Result<BucketState> {
///         Ok(BucketState { versioned: self.versioned })
///     }
///     fn diff(&self, a: Option<&BucketState>, e: &BucketState) -> Changeset {
///         Diff::new(a, e).field("versioned", |s| &s.versioned).finish()
///     }
///     fn render(&self, _: &Context<'_, dyn Store>, t: RenderTarget<'_, dyn Store>, c: &Change<'_, BucketState>) -> Result<()> {
///         match t { /* one arm per target */ }
///     }
/// }
/// ```
pub trait Task<C: ?Sized>: fmt::Debug + PartialEq + Send + Sync + 'static {
    /// Comparable state of the backend object
    type State: Clone + fmt::Debug + Send + Sync;

    /// Task kind, shared by every task of this type
    fn kind(&self) -> &'static str;

    /// Logical name, unique within the kind
    fn name(&self) -> &str;

    /// Graph key
    fn key(&self) -> TaskKey {
        TaskKey::new(self.kind(), self.name())
    }

    /// Name the backend knows the object by
    fn cloud_name(&self) -> String {
        self.name().to_string()
    }

    /// Lifecycle policy
    fn lifecycle(&self) -> Lifecycle {
        Lifecycle::Sync
    }

    /// Tasks that must complete before this one, including the owners of
    /// any resources the task embeds
    fn dependencies(&self) -> Vec<TaskKey> {
        Vec::new()
    }

    /// Shared backend object this task mutates; tasks with the same lock
    /// key never render concurrently
    fn lock_key(&self) -> Option<TaskKey> {
        None
    }

    /// Whether this task can render to the given target
    fn supports_target(&self, target: TargetKind) -> bool {
        let _ = target;
        true
    }

    /// Read the real object. `Ok(None)` means it does not exist.
    fn find(&self, ctx: &Context<'_, C>) -> Result<Option<Self::State>>;

    /// Compute the desired state.
    fn expected(&self, ctx: &Context<'_, C>) -> Result<Self::State>;

    /// Field-level delta between observed and desired state.
    fn diff(&self, actual: Option<&Self::State>, expected: &Self::State) -> Changeset;

    /// Reject changes that cannot be applied (immutable or missing fields).
    fn check_changes(&self, change: &Change<'_, Self::State>) -> Result<()> {
        let _ = change;
        Ok(())
    }

    /// Apply the change to the target. The only phase that mutates anything.
    fn render(
        &self,
        ctx: &Context<'_, C>,
        target: RenderTarget<'_, C>,
        change: &Change<'_, Self::State>,
    ) -> Result<()>;
}

/// Object-safe view of a [`Task`], used for graph storage.
///
/// Implemented for every `Task<C>`; there is no reason to implement it by hand.
pub trait DynTask<C: ?Sized>: fmt::Debug + Send + Sync {
    fn key(&self) -> TaskKey;
    fn cloud_name(&self) -> String;
    fn lifecycle(&self) -> Lifecycle;
    fn dependencies(&self) -> Vec<TaskKey>;
    fn lock_key(&self) -> Option<TaskKey>;

    /// Drive the task through its pipeline.
    fn run(&self, runner: &TaskRunner<'_, '_, C>) -> TaskReport;

    fn as_any(&self) -> &dyn Any;

    /// Whether `other` is a task of the same type with equal definition.
    fn same_as(&self, other: &dyn DynTask<C>) -> bool;
}

impl<C, T> DynTask<C> for T
where
    C: ?Sized + Sync,
    T: Task<C>,
{
    fn key(&self) -> TaskKey {
        Task::key(self)
    }

    fn cloud_name(&self) -> String {
        Task::cloud_name(self)
    }

    fn lifecycle(&self) -> Lifecycle {
        Task::lifecycle(self)
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        Task::dependencies(self)
    }

    fn lock_key(&self) -> Option<TaskKey> {
        Task::lock_key(self)
    }

    fn run(&self, runner: &TaskRunner<'_, '_, C>) -> TaskReport {
        runner.run(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn same_as(&self, other: &dyn DynTask<C>) -> bool {
        other.as_any().downcast_ref::<T>() == Some(self)
    }
}
