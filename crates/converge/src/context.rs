//! Run context and provider traits
//!
//! The context is shared read-only by every task of a run. Its only mutable
//! part is the [`Outputs`] map through which tasks publish the ids of the
//! objects they found or created.

use crate::error::{Error, Result};
use crate::keystore::Keystore;
use crate::target::Target;
use crate::task::TaskKey;
use crate::types::{ExecuteSummary, TaskState};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Per-run map of resolved backend ids, keyed by task.
#[derive(Debug, Default)]
pub struct Outputs {
    ids: RwLock<BTreeMap<TaskKey, String>>,
}

impl Outputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id published by a task, if any.
    pub fn get(&self, key: &TaskKey) -> Option<String> {
        match self.ids.read() {
            Ok(ids) => ids.get(key).cloned(),
            Err(poisoned) => poisoned.into_inner().get(key).cloned(),
        }
    }

    /// Record the id of a task's object. A later publish overwrites.
    pub fn publish(&self, key: &TaskKey, id: impl Into<String>) {
        let id = id.into();
        log::trace!("output {key} = {id}");
        match self.ids.write() {
            Ok(mut ids) => ids.insert(key.clone(), id),
            Err(poisoned) => poisoned.into_inner().insert(key.clone(), id),
        };
    }

    pub fn contains(&self, key: &TaskKey) -> bool {
        self.get(key).is_some()
    }

    /// Copy of every published id.
    pub fn snapshot(&self) -> BTreeMap<TaskKey, String> {
        match self.ids.read() {
            Ok(ids) => ids.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Stand-in id for an object that will only exist once the run is
    /// applied (dry runs and emitting targets).
    pub fn placeholder(key: &TaskKey) -> String {
        format!("<{key}>")
    }
}

/// Cooperative cancellation signal with an optional deadline.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that cancels itself once `timeout` has elapsed.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::default(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Progress callback for execution operations
///
/// Called from the thread that drives the run, never from workers.
pub trait ProgressCallback: Send {
    /// Called once before any task is dispatched
    fn on_run_start(&mut self, total: usize);

    /// Called on every task state transition
    fn on_task_state(&mut self, key: &TaskKey, state: &TaskState);

    /// Called once after every task reached a terminal state
    fn on_run_complete(&mut self, summary: &ExecuteSummary);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_run_start(&mut self, _total: usize) {}
    fn on_task_state(&mut self, _key: &TaskKey, _state: &TaskState) {}
    fn on_run_complete(&mut self, _summary: &ExecuteSummary) {}
}

/// Context passed to every task operation of a run
pub struct Context<'a, C: ?Sized> {
    target: Target<'a, C>,
    outputs: Outputs,
    keystore: Option<&'a dyn Keystore>,
    cluster_name: String,
}

impl<'a, C: ?Sized> Context<'a, C> {
    /// Create a context rendering to `target`
    pub fn new(target: Target<'a, C>) -> Self {
        Self {
            target,
            outputs: Outputs::new(),
            keystore: None,
            cluster_name: String::new(),
        }
    }

    #[must_use]
    pub fn with_keystore(mut self, keystore: &'a dyn Keystore) -> Self {
        self.keystore = Some(keystore);
        self
    }

    #[must_use]
    pub fn with_cluster_name(mut self, name: impl Into<String>) -> Self {
        self.cluster_name = name.into();
        self
    }

    pub fn target(&self) -> Target<'a, C> {
        self.target
    }

    /// The provider, or an error on targets that do not talk to it
    pub fn api(&self) -> Result<&'a C> {
        self.target.provider().ok_or_else(|| {
            Error::Other(format!(
                "the {} target has no provider to query",
                self.target.kind()
            ))
        })
    }

    /// Resolved id of another task's object
    pub fn output(&self, key: &TaskKey) -> Result<String> {
        self.outputs
            .get(key)
            .ok_or_else(|| Error::ResourceNotReady { owner: key.clone() })
    }

    /// Publish the id of this run's object for `key`
    pub fn publish(&self, key: &TaskKey, id: impl Into<String>) {
        self.outputs.publish(key, id);
    }

    pub fn outputs(&self) -> &Outputs {
        &self.outputs
    }

    /// The keystore, or an error if the run was started without one
    pub fn keystore(&self) -> Result<&'a dyn Keystore> {
        self.keystore
            .ok_or_else(|| Error::Other("no keystore configured for this run".to_string()))
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::TerraformWriter;

    #[test]
    fn test_outputs_publish_and_overwrite() {
        let outputs = Outputs::new();
        let key = TaskKey::new("Vpc", "main");
        assert!(!outputs.contains(&key));

        outputs.publish(&key, "vpc-1");
        assert_eq!(outputs.get(&key).as_deref(), Some("vpc-1"));
        outputs.publish(&key, "vpc-2");
        assert_eq!(outputs.snapshot().get(&key).map(String::as_str), Some("vpc-2"));
    }

    #[test]
    fn test_output_before_publish_is_not_ready() {
        let provider = ();
        let ctx: Context<'_, ()> = Context::new(Target::Direct(&provider));
        let err = ctx.output(&TaskKey::new("Vpc", "main")).unwrap_err();
        assert!(matches!(err, Error::ResourceNotReady { .. }));
    }

    #[test]
    fn test_api_unavailable_for_emitting_target() {
        let writer = TerraformWriter::new();
        let ctx: Context<'_, ()> = Context::new(Target::Terraform(&writer));
        assert!(ctx.api().is_err());
        assert!(ctx.keystore().is_err());
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());

        assert!(CancelToken::with_timeout(Duration::ZERO).is_cancelled());
        assert!(!CancelToken::with_timeout(Duration::from_secs(3600)).is_cancelled());
    }
}
