//! Explicit deletion of cluster-owned objects that no task manages anymore.
//!
//! Sync tasks never delete anything on their own. A prune pass compares
//! what the provider reports as owned by the cluster against the sealed
//! graph and deletes the leftovers, dependents before their dependencies.

use crate::context::CancelToken;
use crate::error::{Error, FailureKind, Result, RunFailures, TaskFailure};
use crate::graph::{Graph, topological_order};
use crate::retry::{LogRetry, RetryConfig, with_retry};
use crate::task::TaskKey;
use crate::types::FailureInfo;
use serde::{Deserialize, Serialize};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::BTreeMap;

/// An object the provider reports as owned by the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedResource {
    /// Key the object would have as a task
    pub key: TaskKey,
    /// Provider id
    pub id: String,
    /// Other observed objects this one depends on
    pub dependencies: Vec<TaskKey>,
}

/// Deletes one observed object through the provider `C`.
pub trait Deleter<C: ?Sized> {
    fn delete(&self, api: &C, resource: &ObservedResource) -> Result<()>;
}

/// Objects to delete, in deletion order.
#[derive(Debug, Clone, Default)]
pub struct PrunePlan {
    /// Unmanaged objects, dependents first
    pub deletions: Vec<ObservedResource>,
    /// Keys of observed objects kept because a task manages them
    pub retained: Vec<TaskKey>,
    /// Objects sharing a managed key with another observed object. All of
    /// them are kept; which one the task tracks is up to the provider.
    pub duplicates: Vec<ObservedResource>,
}

impl PrunePlan {
    pub fn is_empty(&self) -> bool {
        self.deletions.is_empty()
    }
}

/// Work out which owned objects are unmanaged and the order to delete them.
///
/// Anything matching a registered task key is kept, whatever the task's
/// lifecycle: a task that only validates an object still claims it.
/// Unmanaged objects are planned per provider id, so two leftovers with
/// the same key are both deleted.
pub fn plan_prune<C: ?Sized>(graph: &Graph<C>, observed: Vec<ObservedResource>) -> Result<PrunePlan> {
    let (managed, unmanaged): (Vec<_>, Vec<_>) =
        observed.into_iter().partition(|r| graph.contains(&r.key));

    // edges point from a dependent to what it depends on
    let mut dag: DiGraph<TaskKey, ()> = DiGraph::with_capacity(unmanaged.len(), 0);
    let mut by_key: BTreeMap<&TaskKey, Vec<NodeIndex>> = BTreeMap::new();
    for resource in &unmanaged {
        let node = dag.add_node(resource.key.clone());
        by_key.entry(&resource.key).or_default().push(node);
    }
    for (i, resource) in unmanaged.iter().enumerate() {
        for dep in resource.dependencies.iter().filter(|d| **d != resource.key) {
            for &target in by_key.get(dep).into_iter().flatten() {
                dag.update_edge(NodeIndex::new(i), target, ());
            }
        }
    }

    let order = topological_order(&dag)?;
    let mut slots: Vec<Option<ObservedResource>> = unmanaged.into_iter().map(Some).collect();
    let deletions: Vec<ObservedResource> = order
        .into_iter()
        .filter_map(|i| slots[i.index()].take())
        .collect();

    let mut claimed: BTreeMap<TaskKey, Vec<ObservedResource>> = BTreeMap::new();
    for resource in managed {
        claimed.entry(resource.key.clone()).or_default().push(resource);
    }
    let retained = claimed.keys().cloned().collect();
    let duplicates: Vec<ObservedResource> = claimed
        .into_values()
        .filter(|objects| objects.len() > 1)
        .flatten()
        .collect();
    for resource in &duplicates {
        log::warn!("{} is observed more than once ({})", resource.key, resource.id);
    }

    log::debug!("Prune plan: {} deletion(s)", deletions.len());
    Ok(PrunePlan {
        deletions,
        retained,
        duplicates,
    })
}

/// Options for a prune pass.
#[derive(Debug, Clone, Default)]
pub struct PruneOptions {
    /// List deletions without performing them
    pub dry_run: bool,
    pub retry: RetryConfig,
    pub cancel: CancelToken,
}

/// What happened to one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PruneOutcome {
    Deleted,
    WouldDelete,
    Failed(FailureInfo),
    /// An object depending on this one could not be deleted
    Blocked { by: TaskKey },
    NotAttempted,
}

#[derive(Debug, Clone)]
pub struct PruneEntry {
    pub resource: ObservedResource,
    pub outcome: PruneOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct PruneReport {
    pub entries: Vec<PruneEntry>,
}

impl PruneReport {
    pub fn deleted(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.outcome == PruneOutcome::Deleted)
            .count()
    }

    /// `Ok(self)` when every deletion succeeded, otherwise the aggregate error.
    pub fn into_result(self) -> Result<Self> {
        let entries: Vec<TaskFailure> = self
            .entries
            .iter()
            .filter_map(|e| {
                let kind = match &e.outcome {
                    PruneOutcome::Failed(info) => FailureKind::Failed(info.clone()),
                    PruneOutcome::Blocked { by } => FailureKind::Blocked { by: by.clone() },
                    PruneOutcome::NotAttempted => FailureKind::NotAttempted,
                    PruneOutcome::Deleted | PruneOutcome::WouldDelete => return None,
                };
                Some(TaskFailure {
                    key: e.resource.key.clone(),
                    cloud_name: e.resource.id.clone(),
                    kind,
                })
            })
            .collect();
        if entries.is_empty() {
            Ok(self)
        } else {
            Err(Error::Run(RunFailures { entries }))
        }
    }
}

/// Delete the planned objects in order.
///
/// When an object cannot be deleted, the objects it depends on are kept
/// (reported as blocked) since deleting them would fail or orphan it.
pub fn execute_prune<C: ?Sized>(
    plan: &PrunePlan,
    api: &C,
    deleter: &dyn Deleter<C>,
    options: &PruneOptions,
) -> PruneReport {
    let mut held: BTreeMap<TaskKey, TaskKey> = BTreeMap::new();
    let mut entries = Vec::with_capacity(plan.deletions.len());

    for resource in &plan.deletions {
        let outcome = if let Some(by) = held.get(&resource.key) {
            PruneOutcome::Blocked { by: by.clone() }
        } else if options.cancel.is_cancelled() {
            PruneOutcome::NotAttempted
        } else if options.dry_run {
            log::info!("Would delete {} ({})", resource.key, resource.id);
            PruneOutcome::WouldDelete
        } else {
            let label = resource.key.to_string();
            match with_retry(&options.retry, Some(&LogRetry(&label)), || {
                deleter.delete(api, resource)
            }) {
                Ok(()) => {
                    log::info!("Deleted {} ({})", resource.key, resource.id);
                    PruneOutcome::Deleted
                }
                Err(failure) => {
                    log::error!("Failed to delete {}: {}", resource.key, failure.error);
                    PruneOutcome::Failed(FailureInfo::from_error(&failure.error, failure.attempts))
                }
            }
        };

        if matches!(
            outcome,
            PruneOutcome::Failed(_) | PruneOutcome::Blocked { .. } | PruneOutcome::NotAttempted
        ) {
            let root = match &outcome {
                PruneOutcome::Blocked { by } => by.clone(),
                _ => resource.key.clone(),
            };
            for dep in &resource.dependencies {
                held.entry(dep.clone()).or_insert_with(|| root.clone());
            }
        }

        entries.push(PruneEntry {
            resource: resource.clone(),
            outcome,
        });
    }

    PruneReport { entries }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;
    use crate::testing::{Probe, TestBackend, probe_key};
    use std::sync::Mutex;
    use std::time::Duration;

    fn observed(name: &str, deps: &[&str]) -> ObservedResource {
        ObservedResource {
            key: probe_key(name),
            id: format!("id-{name}"),
            dependencies: deps.iter().map(|d| probe_key(d)).collect(),
        }
    }

    fn managed_graph() -> Graph<TestBackend> {
        let mut builder = GraphBuilder::new();
        builder.add_task(Probe::new("vpc")).unwrap();
        builder.seal().unwrap()
    }

    #[derive(Default)]
    struct Recording {
        deleted: Mutex<Vec<String>>,
        fail: Option<String>,
    }

    impl Deleter<TestBackend> for Recording {
        fn delete(&self, api: &TestBackend, resource: &ObservedResource) -> Result<()> {
            if self.fail.as_deref() == Some(resource.key.name.as_str()) {
                return Err(Error::InvalidRequest {
                    message: "dependency violation".to_string(),
                });
            }
            api.remove(&resource.key.name);
            self.deleted.lock().unwrap().push(resource.key.name.clone());
            Ok(())
        }
    }

    fn fast() -> PruneOptions {
        PruneOptions {
            retry: RetryConfig::new(2, Duration::from_millis(1), 1.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_plan_keeps_managed_and_orders_dependents_first() {
        let graph = managed_graph();
        let plan = plan_prune(
            &graph,
            vec![
                observed("vpc", &[]),
                observed("old-subnet", &["vpc", "old-table"]),
                observed("old-table", &[]),
                observed("old-instance", &["old-subnet"]),
            ],
        )
        .unwrap();

        assert_eq!(plan.retained, vec![probe_key("vpc")]);
        let order: Vec<&str> = plan.deletions.iter().map(|r| r.key.name.as_str()).collect();
        assert_eq!(order, vec!["old-instance", "old-subnet", "old-table"]);
    }

    #[test]
    fn test_leftovers_sharing_a_key_are_all_deleted() {
        let graph = managed_graph();
        let twin = |id: &str| ObservedResource {
            id: id.to_string(),
            ..observed("old", &[])
        };
        let plan = plan_prune(
            &graph,
            vec![twin("subnet-1"), twin("subnet-2"), observed("old-instance", &["old"])],
        )
        .unwrap();

        let ids: Vec<&str> = plan.deletions.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[0], "id-old-instance");
        assert!(ids.contains(&"subnet-1") && ids.contains(&"subnet-2"));
    }

    #[test]
    fn test_duplicates_of_managed_key_are_reported() {
        let graph = managed_graph();
        let second = ObservedResource {
            id: "id-vpc-2".to_string(),
            ..observed("vpc", &[])
        };
        let plan = plan_prune(&graph, vec![observed("vpc", &[]), second]).unwrap();

        assert!(plan.is_empty());
        assert_eq!(plan.retained, vec![probe_key("vpc")]);
        let ids: Vec<&str> = plan.duplicates.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["id-vpc", "id-vpc-2"]);
    }

    #[test]
    fn test_execute_deletes_in_order() {
        let graph = managed_graph();
        let backend = TestBackend::new();
        let plan = plan_prune(
            &graph,
            vec![observed("a", &["b"]), observed("b", &[])],
        )
        .unwrap();
        let deleter = Recording::default();

        let report = execute_prune(&plan, &backend, &deleter, &fast())
            .into_result()
            .unwrap();
        assert_eq!(report.deleted(), 2);
        assert_eq!(*deleter.deleted.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_failed_deletion_keeps_dependencies() {
        let graph = managed_graph();
        let backend = TestBackend::new();
        let plan = plan_prune(
            &graph,
            vec![
                observed("instance", &["subnet"]),
                observed("subnet", &["table"]),
                observed("table", &[]),
                observed("bucket", &[]),
            ],
        )
        .unwrap();
        let deleter = Recording {
            fail: Some("instance".to_string()),
            ..Default::default()
        };

        let report = execute_prune(&plan, &backend, &deleter, &fast());
        let outcome = |name: &str| {
            report
                .entries
                .iter()
                .find(|e| e.resource.key.name == name)
                .map(|e| e.outcome.clone())
                .unwrap()
        };
        assert!(matches!(outcome("instance"), PruneOutcome::Failed(_)));
        assert_eq!(
            outcome("subnet"),
            PruneOutcome::Blocked {
                by: probe_key("instance")
            }
        );
        assert_eq!(
            outcome("table"),
            PruneOutcome::Blocked {
                by: probe_key("instance")
            }
        );
        assert_eq!(outcome("bucket"), PruneOutcome::Deleted);

        let Err(Error::Run(failures)) = report.into_result() else {
            panic!("expected aggregate error");
        };
        assert_eq!(failures.len(), 3);
    }

    #[test]
    fn test_dry_run_deletes_nothing() {
        let graph = managed_graph();
        let backend = TestBackend::new();
        let plan = plan_prune(&graph, vec![observed("old", &[])]).unwrap();
        let deleter = Recording::default();

        let report = execute_prune(
            &plan,
            &backend,
            &deleter,
            &PruneOptions {
                dry_run: true,
                ..fast()
            },
        );
        assert_eq!(report.entries[0].outcome, PruneOutcome::WouldDelete);
        assert!(deleter.deleted.lock().unwrap().is_empty());
    }
}
