use super::{add, role_name, scoped};
use crate::api::CloudApi;
use crate::spec::ClusterSpec;
use crate::tasks::IamRole;
use converge::{ModelBuilder, ModelBuilderContext, Result};
use nodeup::NodeRole;
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// One IAM role per node role, trusted by EC2.
pub struct IamModelBuilder<'a> {
    spec: &'a ClusterSpec,
}

impl<'a> IamModelBuilder<'a> {
    pub fn new(spec: &'a ClusterSpec) -> Self {
        Self { spec }
    }

    fn state_store_bucket(&self) -> &str {
        let rest = self
            .spec
            .state_store
            .strip_prefix("s3://")
            .unwrap_or(&self.spec.state_store);
        rest.split('/').next().unwrap_or(rest)
    }

    fn policies(&self, role: NodeRole) -> BTreeMap<String, String> {
        let bucket = self.state_store_bucket();
        let objects = self.spec.state_path("*");
        let actions: Value = match role {
            NodeRole::Master => json!(["ec2:*", "autoscaling:Describe*", "elasticloadbalancing:*"]),
            NodeRole::Node => json!(["ec2:DescribeInstances", "ec2:DescribeRegions"]),
        };
        let mut policies = BTreeMap::new();
        policies.insert(
            "compute".to_string(),
            statement(json!({ "Effect": "Allow", "Action": actions, "Resource": "*" })),
        );
        policies.insert(
            "state-store".to_string(),
            statement(json!({
                "Effect": "Allow",
                "Action": ["s3:GetObject", "s3:ListBucket"],
                "Resource": [
                    format!("arn:aws:s3:::{bucket}"),
                    format!("arn:aws:s3:::{}", objects.trim_start_matches("s3://")),
                ],
            })),
        );
        policies
    }
}

fn statement(statement: Value) -> String {
    json!({ "Version": "2012-10-17", "Statement": [statement] }).to_string()
}

fn assume_role_policy() -> String {
    statement(json!({
        "Effect": "Allow",
        "Principal": { "Service": "ec2.amazonaws.com" },
        "Action": "sts:AssumeRole",
    }))
}

impl ModelBuilder<dyn CloudApi> for IamModelBuilder<'_> {
    fn name(&self) -> &str {
        "iam"
    }

    fn build(&self, ctx: &mut ModelBuilderContext<dyn CloudApi>) -> Result<()> {
        for role in [NodeRole::Master, NodeRole::Node] {
            let name = scoped(self.spec, role_name(role));
            add(
                self.spec,
                ctx,
                IamRole {
                    role_name: name.clone(),
                    name,
                    assume_role_policy: assume_role_policy(),
                    policies: self.policies(role),
                },
            )?;
        }
        Ok(())
    }
}
