use super::{cloudformation_tags, find_named, owned_tags, string_prop, to_map, upsert};
use crate::api::{CloudApi, CloudResource};
use converge::{Change, Changeset, Context, Diff, Error, RenderTarget, Result, Task, TaskKey};
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// Instance group backed by a launch template, spread over subnets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoscalingGroup {
    pub name: String,
    pub launch_template: TaskKey,
    pub subnets: Vec<TaskKey>,
    pub min_size: u32,
    pub max_size: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutoscalingGroupState {
    pub launch_template_id: String,
    pub subnet_ids: Vec<String>,
    pub min_size: u32,
    pub max_size: u32,
    pub tags: BTreeMap<String, String>,
}

fn size_property(resource: &CloudResource, name: &str) -> u32 {
    resource
        .u64_property(name)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or_default()
}

impl Task<dyn CloudApi> for AutoscalingGroup {
    type State = AutoscalingGroupState;

    fn kind(&self) -> &'static str {
        "AutoscalingGroup"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        let mut deps = vec![self.launch_template.clone()];
        deps.extend(self.subnets.iter().cloned());
        deps
    }

    fn find(&self, ctx: &Context<'_, dyn CloudApi>) -> Result<Option<AutoscalingGroupState>> {
        Ok(find_named(ctx, &Task::key(self), &self.name)?.map(|asg| AutoscalingGroupState {
            launch_template_id: string_prop(&asg, "launch_template_id"),
            subnet_ids: match asg.properties.get("subnet_ids") {
                Some(Value::Array(ids)) => ids
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect(),
                _ => Vec::new(),
            },
            min_size: size_property(&asg, "min_size"),
            max_size: size_property(&asg, "max_size"),
            tags: asg.tags,
        }))
    }

    fn expected(&self, ctx: &Context<'_, dyn CloudApi>) -> Result<AutoscalingGroupState> {
        Ok(AutoscalingGroupState {
            launch_template_id: ctx.output(&self.launch_template)?,
            subnet_ids: self
                .subnets
                .iter()
                .map(|k| ctx.output(k))
                .collect::<Result<_>>()?,
            min_size: self.min_size,
            max_size: self.max_size,
            tags: owned_tags(ctx, &self.name),
        })
    }

    fn diff(
        &self,
        actual: Option<&AutoscalingGroupState>,
        expected: &AutoscalingGroupState,
    ) -> Changeset {
        Diff::new(actual, expected)
            .field("launch_template_id", |s| &s.launch_template_id)
            .field("subnet_ids", |s| &s.subnet_ids)
            .field("min_size", |s| &s.min_size)
            .field("max_size", |s| &s.max_size)
            .field("tags", |s| &s.tags)
            .finish()
    }

    fn check_changes(&self, change: &Change<'_, AutoscalingGroupState>) -> Result<()> {
        let state = change.expected;
        if state.subnet_ids.is_empty() {
            return Err(Error::required("subnet_ids"));
        }
        if state.min_size > state.max_size {
            return Err(Error::Validation {
                message: format!(
                    "min_size {} is greater than max_size {}",
                    state.min_size, state.max_size
                ),
            });
        }
        Ok(())
    }

    fn render(
        &self,
        ctx: &Context<'_, dyn CloudApi>,
        target: RenderTarget<'_, dyn CloudApi>,
        change: &Change<'_, AutoscalingGroupState>,
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
                        "launch_template_id": state.launch_template_id,
                        "subnet_ids": state.subnet_ids,
                        "min_size": state.min_size,
                        "max_size": state.max_size,
                    })),
                )?;
            }
            RenderTarget::Terraform(w) => {
                let subnets = self
                    .subnets
                    .iter()
                    .map(|k| w.reference(k, "id"))
                    .collect::<Result<Vec<_>>>()?;
                // Autoscaling tags are a list of blocks, not a map
                let tags: Vec<Value> = state
                    .tags
                    .iter()
                    .map(|(k, v)| json!({ "key": k, "value": v, "propagate_at_launch": true }))
                    .collect();
                w.add_resource(
                    &key,
                    "aws_autoscaling_group",
                    &self.name,
                    json!({
                        "name": self.name,
                        "min_size": state.min_size,
                        "max_size": state.max_size,
                        "vpc_zone_identifier": subnets,
                        "launch_template": {
                            "id": w.reference(&self.launch_template, "id")?,
                            "version": w.reference(&self.launch_template, "latest_version")?,
                        },
                        "tag": tags,
                    }),
                )?;
            }
            RenderTarget::CloudFormation(w) => {
                let subnets = self
                    .subnets
                    .iter()
                    .map(|k| w.reference(k))
                    .collect::<Result<Vec<_>>>()?;
                let mut tags = cloudformation_tags(&state.tags);
                if let Value::Array(items) = &mut tags {
                    for item in items {
                        item["PropagateAtLaunch"] = json!(true);
                    }
                }
                w.add_resource(
                    &key,
                    "AWS::AutoScaling::AutoScalingGroup",
                    &self.name,
                    json!({
                        "AutoScalingGroupName": self.name,
                        "MinSize": state.min_size.to_string(),
                        "MaxSize": state.max_size.to_string(),
                        "VPCZoneIdentifier": subnets,
                        "LaunchTemplate": {
                            "LaunchTemplateId": w.reference(&self.launch_template)?,
                            "Version": w.get_att(&self.launch_template, "LatestVersionNumber")?,
                        },
                        "Tags": tags,
                    }),
                )?;
            }
        }
        Ok(())
    }
}
