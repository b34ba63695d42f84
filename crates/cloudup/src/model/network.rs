use super::{add, scoped, vpc_key};
use crate::api::CloudApi;
use crate::spec::ClusterSpec;
use crate::tasks::{Subnet, Vpc};
use converge::{Lifecycle, ModelBuilder, ModelBuilderContext, Result};

/// The VPC and one subnet per configured zone.
pub struct NetworkModelBuilder<'a> {
    spec: &'a ClusterSpec,
}

impl<'a> NetworkModelBuilder<'a> {
    pub fn new(spec: &'a ClusterSpec) -> Self {
        Self { spec }
    }
}

impl ModelBuilder<dyn CloudApi> for NetworkModelBuilder<'_> {
    fn name(&self) -> &str {
        "network"
    }

    fn build(&self, ctx: &mut ModelBuilderContext<dyn CloudApi>) -> Result<()> {
        let spec = self.spec;
        let mut vpc = Vpc::new(spec.name.as_str(), spec.network.cidr.as_str());
        if let Some(id) = &spec.network.shared_vpc_id {
            // Someone else's VPC: only report drift
            vpc.shared_id = Some(id.clone());
            vpc.lifecycle = Lifecycle::ExistsAndWarnIfChanges;
        }
        let vpc = add(spec, ctx, vpc)?;
        debug_assert_eq!(vpc, vpc_key(spec));

        for subnet in &spec.network.subnets {
            add(
                spec,
                ctx,
                Subnet {
                    name: scoped(spec, &subnet.name),
                    vpc: vpc.clone(),
                    cidr: subnet.cidr.clone(),
                    zone: subnet.zone.clone(),
                },
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCloud;
    use crate::spec::fixtures::cluster;
    use crate::tasks::test_support::options;
    use converge::{Context, NoProgress, Target, TaskKey, build_graph, execute};
    use serde_json::json;

    #[test]
    fn test_shared_vpc_is_only_referenced() {
        let cloud = MemoryCloud::new("us-test-1");
        let shared = cloud.insert_external(
            "Vpc",
            "corp",
            crate::tasks::to_map(json!({"cidr": "10.0.0.0/16", "enable_dns_hostnames": true})),
        );
        let mut spec = cluster();
        spec.network.shared_vpc_id = Some(shared.clone());

        let builder = NetworkModelBuilder::new(&spec);
        let graph = build_graph::<dyn CloudApi>(&[&builder]).unwrap();
        assert_eq!(graph.len(), 3);

        let ctx = Context::new(Target::Direct(&cloud as &dyn CloudApi)).with_cluster_name("demo");
        execute(&graph, &ctx, &options(), &mut NoProgress)
            .unwrap()
            .into_result()
            .unwrap();
        assert_eq!(cloud.resources("Vpc").len(), 1);
        let subnets = cloud.resources("Subnet");
        assert_eq!(subnets.len(), 2);
        assert!(subnets.iter().all(|s| s.str_property("vpc_id") == Some(shared.as_str())));
        assert!(graph.contains(&TaskKey::new("Subnet", "b.demo")));
    }
}
