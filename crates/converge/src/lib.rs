//! # Converge
//!
//! A dependency-aware reconciliation engine for infrastructure.
//!
//! Every object the engine manages is a typed [`Task`] that can find the
//! real object, state what it should look like, diff the two field by
//! field, validate the change and render it. Tasks are registered into a
//! [`GraphBuilder`], sealed into an immutable, topologically ordered
//! [`Graph`], and executed on a worker pool against a [`Target`].
//!
//! ## Core Concepts
//!
//! - **Task**: a unit of desired state with a find / check / render lifecycle
//! - **Resource**: a lazily readable byte source a task consumes, possibly
//!   produced by another task during the run
//! - **Changeset**: the per-field delta between observed and desired state
//! - **Target**: direct provider calls, a dry run, or an emitted Terraform
//!   or CloudFormation document
//! - **Lifecycle**: whether the engine may create and update an object
//!
//! ## Example
//!
//! ```ignore
//! use converge::{Context, ExecuteOptions, GraphBuilder, NoProgress, Target, execute};
//!
//! let mut builder = GraphBuilder::new();
//! builder.add_task(Vpc { name: "main".into(), cidr: "10.0.0.0/16".into() })?;
//! builder.add_task(Subnet { name: "a".into(), vpc: vpc_key, cidr: "10.0.1.0/24".into() })?;
//! let graph = builder.seal()?;
//!
//! let ctx = Context::new(Target::Direct(&cloud));
//! let report = execute(&graph, &ctx, &ExecuteOptions::default(), &mut NoProgress)?;
//! report.into_result()?;
//! ```
//!
//! ## Provider Traits
//!
//! The engine is generic over the provider context a task talks to, so it
//! has no dependency on any cloud SDK:
//!
//! - [`Keystore`]: certificates and private keys
//! - [`ProgressCallback`]: receives task state transitions
//! - [`Deleter`]: deletes unmanaged objects during a prune

pub mod context;
pub mod diff;
pub mod error;
pub mod executor;
pub mod graph;
pub mod keystore;
pub mod lifecycle;
pub mod prune;
pub mod resource;
pub mod retry;
pub mod target;
pub mod task;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export main types at crate root
pub use context::{CancelToken, Context, NoProgress, Outputs, ProgressCallback};
pub use diff::{Action, Changeset, Diff, DiffSummary, DiffValue, FieldChange, PlannedChange, group_by_kind};
pub use error::{Error, ErrorCategory, FailureKind, Result, RunFailures, TaskFailure};
pub use executor::execute;
pub use graph::{Graph, GraphBuilder, ModelBuilder, ModelBuilderContext, build_graph};
pub use keystore::{
    Certificate, CertificateResource, Keyset, KeysetItem, Keystore, MemoryKeystore, PrivateKey,
    PrivateKeyResource,
};
pub use lifecycle::{Lifecycle, LifecycleDecision, WithLifecycle};
pub use prune::{
    Deleter, ObservedResource, PruneEntry, PruneOptions, PruneOutcome, PrunePlan, PruneReport,
    execute_prune, plan_prune,
};
pub use resource::{
    ConcatResource, DeferredResource, FileResource, HashedResource, Resource, ResourceHandle,
    TaskDependentResource, UrlResource, hash_resource, new_bytes_resource, new_string_resource,
    wrap_resource,
};
pub use retry::{RetryConfig, with_retry};
pub use target::{CloudFormationWriter, RenderTarget, Target, TargetKind, TerraformWriter};
pub use task::{Change, DynTask, Task, TaskKey};
pub use types::{
    ExecuteOptions, ExecuteSummary, FailureInfo, RunReport, TaskReport, TaskState,
};
