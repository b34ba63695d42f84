use super::{add, role_name, scoped, security_group_key, vpc_key};
use crate::api::CloudApi;
use crate::spec::ClusterSpec;
use crate::tasks::{Direction, SecurityGroup, SecurityGroupRule};
use converge::{ModelBuilder, ModelBuilderContext, Result};
use nodeup::NodeRole;

const ROLES: [NodeRole; 2] = [NodeRole::Master, NodeRole::Node];

/// Security groups for masters and nodes and the rules between them.
///
/// Masters and nodes trust each other and themselves fully; the API port is
/// open to the admin networks; all egress is allowed.
pub struct FirewallModelBuilder<'a> {
    spec: &'a ClusterSpec,
}

impl<'a> FirewallModelBuilder<'a> {
    pub fn new(spec: &'a ClusterSpec) -> Self {
        Self { spec }
    }
}

impl ModelBuilder<dyn CloudApi> for FirewallModelBuilder<'_> {
    fn name(&self) -> &str {
        "firewall"
    }

    fn build(&self, ctx: &mut ModelBuilderContext<dyn CloudApi>) -> Result<()> {
        let spec = self.spec;
        for role in ROLES {
            add(
                spec,
                ctx,
                SecurityGroup {
                    name: scoped(spec, role_name(role)),
                    vpc: vpc_key(spec),
                    description: format!("Security group for {} of {}", role_name(role), spec.name),
                },
            )?;
        }

        for role in ROLES {
            let group = security_group_key(spec, role);
            for peer in ROLES {
                let rule_name = format!("{}-to-{}", role_name(peer), role_name(role));
                add(
                    spec,
                    ctx,
                    SecurityGroupRule::from_group(
                        scoped(spec, &rule_name),
                        group.clone(),
                        security_group_key(spec, peer),
                    ),
                )?;
            }
            add(
                spec,
                ctx,
                SecurityGroupRule {
                    direction: Direction::Egress,
                    protocol: "-1".to_string(),
                    from_port: 0,
                    to_port: 0,
                    ..SecurityGroupRule::ingress(
                        scoped(spec, &format!("{}-egress", role_name(role))),
                        group,
                        0,
                        "0.0.0.0/0",
                    )
                },
            )?;
        }

        let masters = security_group_key(spec, NodeRole::Master);
        for cidr in &spec.api.admin_cidrs {
            add(
                spec,
                ctx,
                SecurityGroupRule::ingress(
                    scoped(spec, &format!("https-api-{cidr}")),
                    masters.clone(),
                    spec.api.port,
                    cidr.as_str(),
                ),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NetworkModelBuilder;
    use crate::spec::fixtures::cluster;
    use converge::{TaskKey, build_graph};

    #[test]
    fn test_rules_reference_their_groups() {
        let mut spec = cluster();
        spec.api.admin_cidrs = vec!["10.10.0.0/16".to_string(), "192.168.0.0/24".to_string()];
        let network = NetworkModelBuilder::new(&spec);
        let firewall = FirewallModelBuilder::new(&spec);
        let graph = build_graph::<dyn CloudApi>(&[&network, &firewall]).unwrap();

        // two groups, four peer rules, two egress rules, two api rules
        let rules = graph
            .order()
            .into_iter()
            .filter(|k| k.kind == "SecurityGroupRule")
            .count();
        assert_eq!(rules, 8);

        let api_rule = TaskKey::new("SecurityGroupRule", "https-api-10.10.0.0/16.demo");
        assert_eq!(
            graph.dependencies_of(&api_rule),
            vec![security_group_key(&spec, NodeRole::Master)]
        );
        let cross = TaskKey::new("SecurityGroupRule", "nodes-to-masters.demo");
        let mut deps = graph.dependencies_of(&cross);
        deps.sort();
        assert_eq!(
            deps,
            vec![
                security_group_key(&spec, NodeRole::Master),
                security_group_key(&spec, NodeRole::Node),
            ]
        );
    }
}
