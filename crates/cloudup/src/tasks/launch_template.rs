use super::{cloudformation_tags, find_named, owned_tags, string_prop, terraform_tags, to_map, upsert};
use crate::api::CloudApi;
use converge::{
    Change, Changeset, Context, Diff, Error, RenderTarget, Resource, ResourceHandle, Result, Task,
    TaskKey, TerraformWriter, hash_resource,
};
use serde_json::{Value, json};
use std::collections::BTreeMap;

const ROOT_DEVICE: &str = "/dev/xvda";

/// Machine definition for an instance group.
///
/// User data is compared by its blake3 digest; updating any field creates a
/// new template version on the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchTemplate {
    pub name: String,
    pub image: String,
    pub machine_type: String,
    pub root_volume_size: u32,
    pub security_groups: Vec<TaskKey>,
    pub role: Option<TaskKey>,
    pub user_data: ResourceHandle,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchTemplateState {
    pub image: String,
    pub machine_type: String,
    pub root_volume_size: u32,
    pub security_group_ids: Vec<String>,
    pub iam_role_id: Option<String>,
    pub user_data_hash: String,
    pub tags: BTreeMap<String, String>,
}

impl LaunchTemplate {
    fn terraform_body(&self, w: &TerraformWriter, state: &LaunchTemplateState) -> Result<Value> {
        let security_groups = self
            .security_groups
            .iter()
            .map(|k| w.reference(k, "id"))
            .collect::<Result<Vec<_>>>()?;
        let user_data = w.add_file(
            "aws_launch_template",
            &self.name,
            "user_data",
            &self.user_data.as_bytes()?,
        );
        let mut body = json!({
            "name": self.name,
            "image_id": state.image,
            "instance_type": state.machine_type,
            "vpc_security_group_ids": security_groups,
            "block_device_mappings": [{
                "device_name": ROOT_DEVICE,
                "ebs": { "volume_size": state.root_volume_size, "volume_type": "gp3" },
            }],
            "user_data": TerraformWriter::filebase64(&user_data),
            "tags": terraform_tags(&state.tags),
        });
        if let Some(role) = &self.role {
            body["iam_instance_profile"] = json!({ "name": w.reference(role, "name")? });
        }
        Ok(body)
    }
}

impl Task<dyn CloudApi> for LaunchTemplate {
    type State = LaunchTemplateState;

    fn kind(&self) -> &'static str {
        "LaunchTemplate"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        let mut deps = self.security_groups.clone();
        deps.extend(self.role.clone());
        deps.extend(self.user_data.dependencies());
        deps
    }

    fn find(&self, ctx: &Context<'_, dyn CloudApi>) -> Result<Option<LaunchTemplateState>> {
        Ok(find_named(ctx, &Task::key(self), &self.name)?.map(|lt| LaunchTemplateState {
            image: string_prop(&lt, "image"),
            machine_type: string_prop(&lt, "machine_type"),
            root_volume_size: lt
                .u64_property("root_volume_size")
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or_default(),
            security_group_ids: match lt.properties.get("security_group_ids") {
                Some(Value::Array(ids)) => ids
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect(),
                _ => Vec::new(),
            },
            iam_role_id: lt.str_property("iam_role_id").map(str::to_string),
            user_data_hash: string_prop(&lt, "user_data_hash"),
            tags: lt.tags,
        }))
    }

    fn expected(&self, ctx: &Context<'_, dyn CloudApi>) -> Result<LaunchTemplateState> {
        Ok(LaunchTemplateState {
            image: self.image.clone(),
            machine_type: self.machine_type.clone(),
            root_volume_size: self.root_volume_size,
            security_group_ids: self
                .security_groups
                .iter()
                .map(|k| ctx.output(k))
                .collect::<Result<_>>()?,
            iam_role_id: self.role.as_ref().map(|k| ctx.output(k)).transpose()?,
            user_data_hash: hash_resource(&self.user_data)?,
            tags: owned_tags(ctx, &self.name),
        })
    }

    fn diff(&self, actual: Option<&LaunchTemplateState>, expected: &LaunchTemplateState) -> Changeset {
        Diff::new(actual, expected)
            .field("image", |s| &s.image)
            .field("machine_type", |s| &s.machine_type)
            .field("root_volume_size", |s| &s.root_volume_size)
            .field("security_group_ids", |s| &s.security_group_ids)
            .field("iam_role_id", |s| &s.iam_role_id)
            .field("user_data_hash", |s| &s.user_data_hash)
            .field("tags", |s| &s.tags)
            .finish()
    }

    fn check_changes(&self, change: &Change<'_, LaunchTemplateState>) -> Result<()> {
        let state = change.expected;
        if state.image.is_empty() {
            return Err(Error::required("image"));
        }
        if state.machine_type.is_empty() {
            return Err(Error::required("machine_type"));
        }
        if state.root_volume_size == 0 {
            return Err(Error::required("root_volume_size"));
        }
        Ok(())
    }

    fn render(
        &self,
        ctx: &Context<'_, dyn CloudApi>,
        target: RenderTarget<'_, dyn CloudApi>,
        change: &Change<'_, LaunchTemplateState>,
    ) -> Result<()> {
        let key = Task::key(self);
        let state = change.expected;
        match target {
            RenderTarget::Direct(api) => {
                let mut properties = to_map(json!({
                    "image": state.image,
                    "machine_type": state.machine_type,
                    "root_volume_size": state.root_volume_size,
                    "security_group_ids": state.security_group_ids,
                    "user_data_hash": state.user_data_hash,
                    "user_data": self.user_data.as_string()?,
                }));
                if let Some(role) = &state.iam_role_id {
                    properties.insert("iam_role_id".to_string(), json!(role));
                }
                upsert(ctx, api, &key, &self.name, change.is_create(), state.tags.clone(), properties)?;
            }
            RenderTarget::Terraform(w) => {
                w.add_resource(&key, "aws_launch_template", &self.name, self.terraform_body(w, state)?)?;
            }
            RenderTarget::CloudFormation(w) => {
                let security_groups = self
                    .security_groups
                    .iter()
                    .map(|k| w.reference(k))
                    .collect::<Result<Vec<_>>>()?;
                let mut data = json!({
                    "ImageId": state.image,
                    "InstanceType": state.machine_type,
                    "SecurityGroupIds": security_groups,
                    "BlockDeviceMappings": [{
                        "DeviceName": ROOT_DEVICE,
                        "Ebs": { "VolumeSize": state.root_volume_size, "VolumeType": "gp3" },
                    }],
                    "UserData": { "Fn::Base64": self.user_data.as_string()? },
                });
                if let Some(role) = &self.role {
                    data["IamInstanceProfile"] = json!({ "Name": w.reference(role)? });
                }
                w.add_resource(
                    &key,
                    "AWS::EC2::LaunchTemplate",
                    &self.name,
                    json!({
                        "LaunchTemplateName": self.name,
                        "LaunchTemplateData": data,
                        "TagSpecifications": [{
                            "ResourceType": "launch-template",
                            "Tags": cloudformation_tags(&state.tags),
                        }],
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
    use crate::tasks::test_support::{converge, options};
    use crate::tasks::{SecurityGroup, Vpc};
    use converge::{GraphBuilder, NoProgress, Target, new_string_resource, execute};
    use tempfile::TempDir;

    fn template(builder: &mut GraphBuilder<dyn CloudApi>, user_data: &str) {
        let vpc = builder.add_task(Vpc::new("main", "10.0.0.0/16")).unwrap();
        let sg = builder
            .add_task(SecurityGroup {
                name: "nodes".to_string(),
                vpc,
                description: "nodes".to_string(),
            })
            .unwrap();
        builder
            .add_task(LaunchTemplate {
                name: "nodes".to_string(),
                image: "ami-123".to_string(),
                machine_type: "t3.medium".to_string(),
                root_volume_size: 64,
                security_groups: vec![sg],
                role: None,
                user_data: new_string_resource(user_data),
            })
            .unwrap();
    }

    #[test]
    fn test_user_data_change_is_an_update() {
        let cloud = MemoryCloud::new("us-test-1");
        converge(&cloud, |b| template(b, "#!/bin/sh\necho one\n"));
        let again = converge(&cloud, |b| template(b, "#!/bin/sh\necho one\n"));
        assert_eq!(again.renders(), 0);

        let report = converge(&cloud, |b| template(b, "#!/bin/sh\necho two\n"));
        let task = report.get(&TaskKey::new("LaunchTemplate", "nodes")).unwrap();
        assert_eq!(task.changes.fields(), vec!["user_data_hash"]);
        assert_eq!(
            cloud.resources("LaunchTemplate")[0].str_property("user_data"),
            Some("#!/bin/sh\necho two\n")
        );
    }

    #[test]
    fn test_terraform_user_data_is_a_data_file() {
        let writer = converge::TerraformWriter::new();
        let mut builder = GraphBuilder::<dyn CloudApi>::new();
        template(&mut builder, "#!/bin/sh\n");
        let graph = builder.seal().unwrap();
        let ctx = Context::new(Target::Terraform(&writer));
        execute(&graph, &ctx, &options(), &mut NoProgress)
            .unwrap()
            .into_result()
            .unwrap();

        let doc = writer.to_json();
        let lt = &doc["resource"]["aws_launch_template"]["nodes"];
        assert_eq!(
            lt["user_data"],
            "${filebase64(\"${path.module}/data/aws_launch_template_nodes_user_data\")}"
        );
        assert_eq!(lt["vpc_security_group_ids"][0], "${aws_security_group.nodes.id}");

        let dir = TempDir::new().unwrap();
        writer.write_to(dir.path()).unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("data/aws_launch_template_nodes_user_data"))
                .unwrap(),
            "#!/bin/sh\n"
        );
    }
}
