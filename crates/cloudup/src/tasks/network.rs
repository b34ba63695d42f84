use super::{
    cloudformation_tags, find_named, owned_tags, string_prop, terraform_tags, to_map, upsert,
};
use crate::api::CloudApi;
use converge::{
    Change, Changeset, Context, Diff, Error, Lifecycle, RenderTarget, Result, Task, TaskKey,
};
use serde_json::json;
use std::collections::BTreeMap;

/// The cluster network. With `shared_id` set, the VPC belongs to someone
/// else: it is looked up by id, never tagged, and only referenced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vpc {
    pub name: String,
    pub cidr: String,
    pub enable_dns_hostnames: bool,
    pub shared_id: Option<String>,
    pub lifecycle: Lifecycle,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VpcState {
    pub cidr: String,
    pub enable_dns_hostnames: bool,
    pub tags: BTreeMap<String, String>,
}

impl Vpc {
    pub fn new(name: impl Into<String>, cidr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cidr: cidr.into(),
            enable_dns_hostnames: true,
            shared_id: None,
            lifecycle: Lifecycle::Sync,
        }
    }
}

impl Task<dyn CloudApi> for Vpc {
    type State = VpcState;

    fn kind(&self) -> &'static str {
        "Vpc"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn cloud_name(&self) -> String {
        self.shared_id.clone().unwrap_or_else(|| self.name.clone())
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn find(&self, ctx: &Context<'_, dyn CloudApi>) -> Result<Option<VpcState>> {
        let key = Task::key(self);
        let found = match &self.shared_id {
            Some(id) => {
                let found = ctx.api()?.get("Vpc", id)?;
                if let Some(vpc) = &found {
                    ctx.publish(&key, &vpc.id);
                }
                found
            }
            None => find_named(ctx, &key, &self.name)?,
        };
        Ok(found.map(|vpc| VpcState {
            cidr: string_prop(&vpc, "cidr"),
            enable_dns_hostnames: vpc
                .properties
                .get("enable_dns_hostnames")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false),
            tags: if self.shared_id.is_some() {
                BTreeMap::new()
            } else {
                vpc.tags
            },
        }))
    }

    fn expected(&self, ctx: &Context<'_, dyn CloudApi>) -> Result<VpcState> {
        Ok(VpcState {
            cidr: self.cidr.clone(),
            enable_dns_hostnames: self.enable_dns_hostnames,
            tags: if self.shared_id.is_some() {
                BTreeMap::new()
            } else {
                owned_tags(ctx, &self.name)
            },
        })
    }

    fn diff(&self, actual: Option<&VpcState>, expected: &VpcState) -> Changeset {
        Diff::new(actual, expected)
            .field("cidr", |s| &s.cidr)
            .field("enable_dns_hostnames", |s| &s.enable_dns_hostnames)
            .field("tags", |s| &s.tags)
            .finish()
    }

    fn check_changes(&self, change: &Change<'_, VpcState>) -> Result<()> {
        if change.is_create() {
            if change.expected.cidr.is_empty() && self.shared_id.is_none() {
                return Err(Error::required("cidr"));
            }
        } else if change.touches("cidr") {
            return Err(Error::cannot_change("cidr"));
        }
        Ok(())
    }

    fn render(
        &self,
        ctx: &Context<'_, dyn CloudApi>,
        target: RenderTarget<'_, dyn CloudApi>,
        change: &Change<'_, VpcState>,
    ) -> Result<()> {
        let key = Task::key(self);
        let state = change.expected;
        match target {
            RenderTarget::Direct(api) => {
                if let Some(id) = &self.shared_id {
                    return Err(Error::Validation {
                        message: format!("shared VPC {id} is not managed by this cluster"),
                    });
                }
                upsert(
                    ctx,
                    api,
                    &key,
                    &self.name,
                    change.is_create(),
                    state.tags.clone(),
                    to_map(json!({
                        "cidr": state.cidr,
                        "enable_dns_hostnames": state.enable_dns_hostnames,
                    })),
                )?;
            }
            RenderTarget::Terraform(w) => match &self.shared_id {
                Some(id) => w.add_literal(&key, id.clone()),
                None => {
                    w.add_resource(
                        &key,
                        "aws_vpc",
                        &self.name,
                        json!({
                            "cidr_block": state.cidr,
                            "enable_dns_hostnames": state.enable_dns_hostnames,
                            "enable_dns_support": true,
                            "tags": terraform_tags(&state.tags),
                        }),
                    )?;
                }
            },
            RenderTarget::CloudFormation(w) => match &self.shared_id {
                Some(id) => w.add_literal(&key, id.clone()),
                None => {
                    w.add_resource(
                        &key,
                        "AWS::EC2::VPC",
                        &self.name,
                        json!({
                            "CidrBlock": state.cidr,
                            "EnableDnsHostnames": state.enable_dns_hostnames,
                            "EnableDnsSupport": true,
                            "Tags": cloudformation_tags(&state.tags),
                        }),
                    )?;
                }
            },
        }
        Ok(())
    }
}

/// A subnet in one availability zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subnet {
    pub name: String,
    pub vpc: TaskKey,
    pub cidr: String,
    pub zone: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubnetState {
    pub vpc_id: String,
    pub cidr: String,
    pub zone: String,
    pub tags: BTreeMap<String, String>,
}

impl Task<dyn CloudApi> for Subnet {
    type State = SubnetState;

    fn kind(&self) -> &'static str {
        "Subnet"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        vec![self.vpc.clone()]
    }

    fn find(&self, ctx: &Context<'_, dyn CloudApi>) -> Result<Option<SubnetState>> {
        Ok(find_named(ctx, &Task::key(self), &self.name)?.map(|subnet| SubnetState {
            vpc_id: string_prop(&subnet, "vpc_id"),
            cidr: string_prop(&subnet, "cidr"),
            zone: string_prop(&subnet, "zone"),
            tags: subnet.tags,
        }))
    }

    fn expected(&self, ctx: &Context<'_, dyn CloudApi>) -> Result<SubnetState> {
        Ok(SubnetState {
            vpc_id: ctx.output(&self.vpc)?,
            cidr: self.cidr.clone(),
            zone: self.zone.clone(),
            tags: owned_tags(ctx, &self.name),
        })
    }

    fn diff(&self, actual: Option<&SubnetState>, expected: &SubnetState) -> Changeset {
        Diff::new(actual, expected)
            .field("vpc_id", |s| &s.vpc_id)
            .field("cidr", |s| &s.cidr)
            .field("zone", |s| &s.zone)
            .field("tags", |s| &s.tags)
            .finish()
    }

    fn check_changes(&self, change: &Change<'_, SubnetState>) -> Result<()> {
        if change.is_create() {
            for (field, value) in [("cidr", &change.expected.cidr), ("zone", &change.expected.zone)] {
                if value.is_empty() {
                    return Err(Error::required(field));
                }
            }
            return Ok(());
        }
        for field in ["vpc_id", "cidr", "zone"] {
            if change.touches(field) {
                return Err(Error::cannot_change(field));
            }
        }
        Ok(())
    }

    fn render(
        &self,
        ctx: &Context<'_, dyn CloudApi>,
        target: RenderTarget<'_, dyn CloudApi>,
        change: &Change<'_, SubnetState>,
    ) -> Result<()> {
        let key = Task::key(self);
        let state = change.expected;
        match target {
            RenderTarget::Direct(api) => {
                upsert(
                    ctx,
                    api,
                    &key,
                    &self.name,
                    change.is_create(),
                    state.tags.clone(),
                    to_map(json!({
                        "vpc_id": state.vpc_id,
                        "cidr": state.cidr,
                        "zone": state.zone,
                    })),
                )?;
            }
            RenderTarget::Terraform(w) => {
                w.add_resource(
                    &key,
                    "aws_subnet",
                    &self.name,
                    json!({
                        "vpc_id": w.reference(&self.vpc, "id")?,
                        "cidr_block": state.cidr,
                        "availability_zone": state.zone,
                        "tags": terraform_tags(&state.tags),
                    }),
                )?;
            }
            RenderTarget::CloudFormation(w) => {
                w.add_resource(
                    &key,
                    "AWS::EC2::Subnet",
                    &self.name,
                    json!({
                        "VpcId": w.reference(&self.vpc)?,
                        "CidrBlock": state.cidr,
                        "AvailabilityZone": state.zone,
                        "Tags": cloudformation_tags(&state.tags),
                    }),
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCloud;
    use crate::tasks::test_support::converge;
    use converge::{ExecuteOptions, GraphBuilder, NoProgress, Target, TaskState, TerraformWriter, execute};

    fn network(builder: &mut GraphBuilder<dyn CloudApi>) {
        let vpc = builder.add_task(Vpc::new("main", "10.0.0.0/16")).unwrap();
        builder
            .add_task(Subnet {
                name: "us-test-1a".to_string(),
                vpc,
                cidr: "10.0.1.0/24".to_string(),
                zone: "us-test-1a".to_string(),
            })
            .unwrap();
    }

    #[test]
    fn test_subnet_resolves_vpc_id() {
        let cloud = MemoryCloud::new("us-test-1");
        let report = converge(&cloud, network);
        assert!(report.summary.is_success());

        let vpc = &cloud.resources("Vpc")[0];
        let subnet = &cloud.resources("Subnet")[0];
        assert_eq!(subnet.str_property("vpc_id"), Some(vpc.id.as_str()));
        assert!(subnet.owned_by("demo"));

        let again = converge(&cloud, network);
        assert_eq!(again.renders(), 0);
        assert_eq!(again.summary.unchanged, 2);
    }

    #[test]
    fn test_cidr_is_immutable() {
        let cloud = MemoryCloud::new("us-test-1");
        converge(&cloud, network);

        let report = converge(&cloud, |b| {
            b.add_task(Vpc::new("main", "10.1.0.0/16")).unwrap();
        });
        let task = report.get(&TaskKey::new("Vpc", "main")).unwrap();
        let TaskState::Failed(info) = &task.state else {
            panic!("expected failure, got {:?}", task.state);
        };
        assert_eq!(info.field.as_deref(), Some("cidr"));
        assert_eq!(cloud.resources("Vpc")[0].str_property("cidr"), Some("10.0.0.0/16"));
    }

    #[test]
    fn test_shared_vpc_is_referenced_not_managed() {
        let cloud = MemoryCloud::new("us-test-1");
        let shared = cloud.insert_external(
            "Vpc",
            "corp",
            to_map(json!({"cidr": "172.16.0.0/16", "enable_dns_hostnames": true})),
        );

        let report = converge(&cloud, |b| {
            let vpc = b
                .add_task(Vpc {
                    shared_id: Some(shared.clone()),
                    lifecycle: Lifecycle::ExistsAndWarnIfChanges,
                    ..Vpc::new("main", "172.16.0.0/16")
                })
                .unwrap();
            b.add_task(Subnet {
                name: "a".to_string(),
                vpc,
                cidr: "172.16.1.0/24".to_string(),
                zone: "us-test-1a".to_string(),
            })
            .unwrap();
        });
        assert!(report.summary.is_success());
        assert_eq!(cloud.resources("Vpc")[0].tags, BTreeMap::new());
        assert_eq!(
            cloud.resources("Subnet")[0].str_property("vpc_id"),
            Some(shared.as_str())
        );
    }

    #[test]
    fn test_terraform_shared_vpc_is_a_literal() {
        let writer = TerraformWriter::new();
        let mut builder = GraphBuilder::<dyn CloudApi>::new();
        let vpc = builder
            .add_task(Vpc {
                shared_id: Some("vpc-corp".to_string()),
                ..Vpc::new("main", "172.16.0.0/16")
            })
            .unwrap();
        builder
            .add_task(Subnet {
                name: "a".to_string(),
                vpc,
                cidr: "172.16.1.0/24".to_string(),
                zone: "us-test-1a".to_string(),
            })
            .unwrap();
        let graph = builder.seal().unwrap();
        let ctx = Context::new(Target::Terraform(&writer));
        execute(&graph, &ctx, &ExecuteOptions::default(), &mut NoProgress)
            .unwrap()
            .into_result()
            .unwrap();

        let doc = writer.to_json();
        assert_eq!(doc["resource"]["aws_subnet"]["a"]["vpc_id"], "vpc-corp");
        assert!(doc["resource"].get("aws_vpc").is_none());
    }
}
