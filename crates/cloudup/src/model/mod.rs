//! Model builders: turn a [`ClusterSpec`] into cloud tasks.
//!
//! Each builder contributes one area of the cluster. Builders refer to each
//! other's tasks through the key helpers below rather than by passing keys
//! around, so they can run in any order.

mod api;
mod autoscaling;
mod firewall;
mod iam;
mod network;

pub use api::ApiModelBuilder;
pub use autoscaling::AutoscalingModelBuilder;
pub use firewall::FirewallModelBuilder;
pub use iam::IamModelBuilder;
pub use network::NetworkModelBuilder;

use crate::api::CloudApi;
use crate::spec::ClusterSpec;
use converge::{
    Graph, Keystore, ModelBuilder, ModelBuilderContext, Result, Task, TaskKey, TargetKind,
    WithLifecycle, build_graph,
};
use nodeup::NodeRole;
use std::sync::Arc;

/// Keyset holding the cluster CA.
pub const CA_KEYSET: &str = "ca";

/// What the builders need to know beyond the cluster definition.
#[derive(Clone, Default)]
pub struct ModelOptions {
    /// Target the graph will run against; CloudFormation has no object
    /// store files, so builders leave them out
    pub target: Option<TargetKind>,
    pub keystore: Option<Arc<dyn Keystore>>,
}

impl ModelOptions {
    pub fn for_target(target: TargetKind) -> Self {
        Self {
            target: Some(target),
            keystore: None,
        }
    }

    pub fn with_keystore(mut self, keystore: Arc<dyn Keystore>) -> Self {
        self.keystore = Some(keystore);
        self
    }

    pub(crate) fn has_object_store(&self) -> bool {
        self.target != Some(TargetKind::CloudFormation)
    }
}

impl std::fmt::Debug for ModelOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelOptions")
            .field("target", &self.target)
            .field("keystore", &self.keystore.is_some())
            .finish()
    }
}

/// Validate `spec` and build its task graph.
pub fn build_cluster_graph(spec: &ClusterSpec, options: &ModelOptions) -> Result<Graph<dyn CloudApi>> {
    spec.validate()?;
    let network = NetworkModelBuilder::new(spec);
    let firewall = FirewallModelBuilder::new(spec);
    let iam = IamModelBuilder::new(spec);
    let api = ApiModelBuilder::new(spec, options);
    let autoscaling = AutoscalingModelBuilder::new(spec, options);
    let builders: [&dyn ModelBuilder<dyn CloudApi>; 5] =
        [&network, &firewall, &iam, &api, &autoscaling];
    build_graph(&builders)
}

/// Register `task`, applying the cluster lifecycle override for its kind.
pub(crate) fn add<T: Task<dyn CloudApi>>(
    spec: &ClusterSpec,
    ctx: &mut ModelBuilderContext<dyn CloudApi>,
    task: T,
) -> Result<TaskKey> {
    match spec.lifecycle_overrides.get(task.kind()) {
        Some(lifecycle) => {
            log::debug!("{}: lifecycle {lifecycle}", Task::key(&task));
            ctx.add_task(WithLifecycle::new(task, *lifecycle))
        }
        None => ctx.add_task(task),
    }
}

/// Cluster-qualified object name, e.g. `masters.demo`.
pub(crate) fn scoped(spec: &ClusterSpec, name: &str) -> String {
    format!("{name}.{}", spec.name)
}

pub(crate) fn role_name(role: NodeRole) -> &'static str {
    match role {
        NodeRole::Master => "masters",
        NodeRole::Node => "nodes",
    }
}

pub(crate) fn vpc_key(spec: &ClusterSpec) -> TaskKey {
    TaskKey::new("Vpc", spec.name.as_str())
}

pub(crate) fn subnet_keys(spec: &ClusterSpec) -> Vec<TaskKey> {
    spec.network
        .subnets
        .iter()
        .map(|s| TaskKey::new("Subnet", scoped(spec, &s.name)))
        .collect()
}

pub(crate) fn security_group_key(spec: &ClusterSpec, role: NodeRole) -> TaskKey {
    TaskKey::new("SecurityGroup", scoped(spec, role_name(role)))
}

pub(crate) fn iam_role_key(spec: &ClusterSpec, role: NodeRole) -> TaskKey {
    TaskKey::new("IamRole", scoped(spec, role_name(role)))
}
