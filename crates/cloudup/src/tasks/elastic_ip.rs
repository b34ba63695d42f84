use super::{cloudformation_tags, find_named, owned_tags, terraform_tags, upsert};
use crate::api::CloudApi;
use converge::{
    Change, Changeset, Context, Diff, Outputs, RenderTarget, Result, Task, TaskDependentResource,
    TaskKey, TargetKind, new_string_resource,
};
use serde_json::{Map, json};
use std::collections::BTreeMap;

/// A static public address. Its address is published through
/// [`ElasticIp::address`] for tasks that embed it (the kubeconfig).
#[derive(Debug, Clone, PartialEq)]
pub struct ElasticIp {
    pub name: String,
    pub address: TaskDependentResource,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElasticIpState {
    pub tags: BTreeMap<String, String>,
}

impl ElasticIp {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let address = TaskDependentResource::new(TaskKey::new("ElasticIp", name.as_str()));
        Self { name, address }
    }

    fn set_address(&self, address: impl Into<String>) {
        self.address.set(new_string_resource(address));
    }
}

impl Task<dyn CloudApi> for ElasticIp {
    type State = ElasticIpState;

    fn kind(&self) -> &'static str {
        "ElasticIp"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn find(&self, ctx: &Context<'_, dyn CloudApi>) -> Result<Option<ElasticIpState>> {
        let key = Task::key(self);
        let found = find_named(ctx, &key, &self.name)?;
        match &found {
            Some(eip) => self.set_address(eip.str_property("public_ip").unwrap_or_default()),
            // Lets dependents resolve during a dry run. A real run leaves the
            // address unset until the render allocates it.
            None if ctx.target().kind() == TargetKind::DryRun => {
                self.set_address(Outputs::placeholder(&key));
            }
            None => {}
        }
        Ok(found.map(|eip| ElasticIpState { tags: eip.tags }))
    }

    fn expected(&self, ctx: &Context<'_, dyn CloudApi>) -> Result<ElasticIpState> {
        Ok(ElasticIpState {
            tags: owned_tags(ctx, &self.name),
        })
    }

    fn diff(&self, actual: Option<&ElasticIpState>, expected: &ElasticIpState) -> Changeset {
        Diff::new(actual, expected).field("tags", |s| &s.tags).finish()
    }

    fn render(
        &self,
        ctx: &Context<'_, dyn CloudApi>,
        target: RenderTarget<'_, dyn CloudApi>,
        change: &Change<'_, ElasticIpState>,
    ) -> Result<()> {
        let key = Task::key(self);
        let tags = &change.expected.tags;
        match target {
            RenderTarget::Direct(api) => {
                let eip = upsert(ctx, api, &key, &self.name, change.is_create(), tags.clone(), Map::new())?;
                self.set_address(eip.str_property("public_ip").unwrap_or_default());
            }
            RenderTarget::Terraform(w) => {
                w.add_resource(
                    &key,
                    "aws_eip",
                    &self.name,
                    json!({ "domain": "vpc", "tags": terraform_tags(tags) }),
                )?;
                self.set_address(w.reference(&key, "public_ip")?);
            }
            RenderTarget::CloudFormation(w) => {
                w.add_resource(
                    &key,
                    "AWS::EC2::EIP",
                    &self.name,
                    json!({ "Domain": "vpc", "Tags": cloudformation_tags(tags) }),
                )?;
                self.set_address(Outputs::placeholder(&key));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCloud;
    use crate::tasks::test_support::options;
    use converge::{GraphBuilder, NoProgress, Resource, Target, TerraformWriter, execute};

    #[test]
    fn test_address_published_on_create_and_find() {
        let cloud = MemoryCloud::new("us-test-1");
        let eip = ElasticIp::new("api");
        let address = eip.address.clone();
        let mut builder = GraphBuilder::<dyn CloudApi>::new();
        builder.add_task(eip.clone()).unwrap();
        let graph = builder.seal().unwrap();

        let ctx = Context::new(Target::Direct(&cloud as &dyn CloudApi));
        execute(&graph, &ctx, &options(), &mut NoProgress).unwrap();
        let created = address.as_string().unwrap();
        assert!(created.starts_with("203.0.113."));

        let fresh = ElasticIp::new("api");
        let mut builder = GraphBuilder::<dyn CloudApi>::new();
        builder.add_task(fresh.clone()).unwrap();
        let graph = builder.seal().unwrap();
        let ctx = Context::new(Target::Direct(&cloud as &dyn CloudApi));
        execute(&graph, &ctx, &options(), &mut NoProgress).unwrap();
        assert_eq!(fresh.address.as_string().unwrap(), created);
    }

    #[test]
    fn test_dry_run_uses_placeholder() {
        let cloud = MemoryCloud::new("us-test-1");
        let eip = ElasticIp::new("api");
        let mut builder = GraphBuilder::<dyn CloudApi>::new();
        builder.add_task(eip.clone()).unwrap();
        let graph = builder.seal().unwrap();

        let ctx = Context::new(Target::DryRun(&cloud as &dyn CloudApi));
        execute(&graph, &ctx, &options(), &mut NoProgress).unwrap();
        assert_eq!(eip.address.as_string().unwrap(), "<ElasticIp/api>");
        assert!(cloud.resources("ElasticIp").is_empty());
    }

    #[test]
    fn test_terraform_address_is_interpolated() {
        let writer = TerraformWriter::new();
        let eip = ElasticIp::new("api");
        let mut builder = GraphBuilder::<dyn CloudApi>::new();
        builder.add_task(eip.clone()).unwrap();
        let graph = builder.seal().unwrap();

        let ctx = Context::new(Target::Terraform(&writer));
        execute(&graph, &ctx, &options(), &mut NoProgress).unwrap();
        assert_eq!(eip.address.as_string().unwrap(), "${aws_eip.api.public_ip}");
    }
}
