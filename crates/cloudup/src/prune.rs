//! Cluster-owned objects as the prune pass sees them.

use crate::api::{CloudApi, CloudResource, NAME_TAG};
use converge::{Deleter, ObservedResource, Result, TaskKey};
use serde_json::Value;
use std::collections::BTreeMap;

/// Everything the provider reports as owned by `cluster`, with dependencies
/// taken from `*_id` / `*_ids` properties that point at other owned objects.
pub fn observe_owned(api: &dyn CloudApi, cluster: &str) -> Result<Vec<ObservedResource>> {
    let owned = api.list_owned(cluster)?;
    let by_id: BTreeMap<&str, TaskKey> = owned
        .iter()
        .map(|r| (r.id.as_str(), task_key(r)))
        .collect();

    let observed = owned
        .iter()
        .map(|resource| {
            let mut dependencies: Vec<TaskKey> = referenced_ids(resource)
                .filter_map(|id| by_id.get(id).cloned())
                .filter(|key| key.kind != resource.kind || key.name != task_name(resource))
                .collect();
            dependencies.sort();
            dependencies.dedup();
            ObservedResource {
                key: task_key(resource),
                id: resource.id.clone(),
                dependencies,
            }
        })
        .collect::<Vec<_>>();
    log::debug!("Observed {} owned object(s) for {cluster}", observed.len());
    Ok(observed)
}

fn task_name(resource: &CloudResource) -> &str {
    resource
        .tags
        .get(NAME_TAG)
        .map(String::as_str)
        .unwrap_or(&resource.name)
}

fn task_key(resource: &CloudResource) -> TaskKey {
    TaskKey::new(resource.kind.as_str(), task_name(resource))
}

fn referenced_ids(resource: &CloudResource) -> impl Iterator<Item = &str> {
    resource
        .properties
        .iter()
        .filter(|(name, _)| name.ends_with("_id") || name.ends_with("_ids"))
        .flat_map(|(_, value)| match value {
            Value::String(id) => vec![id.as_str()],
            Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        })
}

/// Deletes observed objects through the provider.
#[derive(Debug, Default, Clone, Copy)]
pub struct CloudDeleter;

impl Deleter<dyn CloudApi> for CloudDeleter {
    fn delete(&self, api: &dyn CloudApi, resource: &ObservedResource) -> Result<()> {
        api.delete(&resource.key.kind, &resource.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCloud;
    use crate::model::{ModelOptions, build_cluster_graph};
    use crate::spec::fixtures::cluster;
    use crate::tasks::test_support::options;
    use converge::{
        Context, NoProgress, PruneOptions, PruneOutcome, Target, execute, execute_prune,
        plan_prune,
    };

    fn converge_cluster(cloud: &MemoryCloud, spec: &crate::spec::ClusterSpec) {
        let graph = build_cluster_graph(spec, &ModelOptions::default()).unwrap();
        let ctx = Context::new(Target::Direct(cloud as &dyn CloudApi)).with_cluster_name("demo");
        execute(&graph, &ctx, &options(), &mut NoProgress)
            .unwrap()
            .into_result()
            .unwrap();
    }

    #[test]
    fn test_nothing_to_prune_after_converge() {
        let cloud = MemoryCloud::new("us-test-1");
        let spec = cluster();
        converge_cluster(&cloud, &spec);

        let graph = build_cluster_graph(&spec, &ModelOptions::default()).unwrap();
        let observed = observe_owned(&cloud, "demo").unwrap();
        assert!(!observed.is_empty());
        let plan = plan_prune(&graph, observed).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_removed_subnet_is_pruned_dependents_first() {
        let cloud = MemoryCloud::new("us-test-1");
        let spec = cluster();
        converge_cluster(&cloud, &spec);

        let mut shrunk = cluster();
        shrunk.network.subnets.truncate(1);
        shrunk.instance_groups.truncate(1);
        converge_cluster(&cloud, &shrunk);

        let graph = build_cluster_graph(&shrunk, &ModelOptions::default()).unwrap();
        let plan = plan_prune(&graph, observe_owned(&cloud, "demo").unwrap()).unwrap();
        let order: Vec<String> = plan.deletions.iter().map(|r| r.key.to_string()).collect();
        let position = |key: &str| order.iter().position(|k| k == key).unwrap();
        // the old node group still references subnet b and its template
        assert!(position("AutoscalingGroup/nodes.demo") < position("Subnet/b.demo"));
        assert!(position("AutoscalingGroup/nodes.demo") < position("LaunchTemplate/nodes.demo"));

        let report = execute_prune(&plan, &cloud as &dyn CloudApi, &CloudDeleter, &PruneOptions::default());
        assert!(report.entries.iter().all(|e| e.outcome == PruneOutcome::Deleted));
        assert_eq!(cloud.resources("Subnet").len(), 1);
        assert_eq!(cloud.resources("AutoscalingGroup").len(), 1);
        assert!(plan_prune(&graph, observe_owned(&cloud, "demo").unwrap())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_dry_run_deletes_nothing() {
        let cloud = MemoryCloud::new("us-test-1");
        let spec = cluster();
        converge_cluster(&cloud, &spec);

        let mut shrunk = cluster();
        shrunk.network.subnets.truncate(1);
        shrunk.instance_groups.truncate(1);
        let graph = build_cluster_graph(&shrunk, &ModelOptions::default()).unwrap();
        let plan = plan_prune(&graph, observe_owned(&cloud, "demo").unwrap()).unwrap();
        let before = cloud.mutations();

        let report = execute_prune(
            &plan,
            &cloud as &dyn CloudApi,
            &CloudDeleter,
            &PruneOptions {
                dry_run: true,
                ..Default::default()
            },
        );
        assert!(report.entries.iter().all(|e| e.outcome == PruneOutcome::WouldDelete));
        assert_eq!(cloud.mutations(), before);
    }
}
