//! Cloud task kinds.
//!
//! Every task here renders to the provider directly, to Terraform, and
//! (except [`ManagedFile`]) to CloudFormation. Reference fields hold the
//! [`TaskKey`] of the referenced task; the resolved id is looked up through
//! the run's outputs when computing the expected state, so references
//! compare by identity of the object they point at.

mod autoscaling;
mod elastic_ip;
mod iam;
mod launch_template;
mod managed_file;
mod network;
mod security_group;

pub use autoscaling::{AutoscalingGroup, AutoscalingGroupState};
pub use elastic_ip::{ElasticIp, ElasticIpState};
pub use iam::{IamRole, IamRoleState};
pub use launch_template::{LaunchTemplate, LaunchTemplateState};
pub use managed_file::{ManagedFile, ManagedFileState};
pub use network::{Subnet, SubnetState, Vpc, VpcState};
pub use security_group::{
    Direction, SecurityGroup, SecurityGroupRule, SecurityGroupRuleState, SecurityGroupState,
};

use crate::api::{CloudApi, CloudResource, NAME_TAG, cluster_tag};
use converge::{Context, Result, TaskKey};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

/// Tags every cluster-owned object carries.
pub(crate) fn owned_tags(ctx: &Context<'_, dyn CloudApi>, name: &str) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::from([(NAME_TAG.to_string(), name.to_string())]);
    if !ctx.cluster_name().is_empty() {
        let (key, value) = cluster_tag(ctx.cluster_name());
        tags.insert(key, value);
    }
    tags
}

/// Create the object, or update the one `find` published an id for, then
/// publish the resulting id.
pub(crate) fn upsert(
    ctx: &Context<'_, dyn CloudApi>,
    api: &dyn CloudApi,
    key: &TaskKey,
    name: &str,
    create: bool,
    tags: BTreeMap<String, String>,
    properties: Map<String, Value>,
) -> Result<CloudResource> {
    let resource = if create {
        let created = api.create(&key.kind, name, tags, properties)?;
        log::info!("Created {key} ({})", created.id);
        created
    } else {
        let id = ctx.output(key)?;
        let updated = api.update(&key.kind, &id, tags, properties)?;
        log::info!("Updated {key} ({id})");
        updated
    };
    ctx.publish(key, &resource.id);
    Ok(resource)
}

/// Look the object up by name and publish its id when found.
pub(crate) fn find_named(
    ctx: &Context<'_, dyn CloudApi>,
    key: &TaskKey,
    name: &str,
) -> Result<Option<CloudResource>> {
    let found = ctx.api()?.find_by_name(&key.kind, name)?;
    if let Some(resource) = &found {
        ctx.publish(key, &resource.id);
    }
    Ok(found)
}

pub(crate) fn string_prop(resource: &CloudResource, name: &str) -> String {
    resource.str_property(name).unwrap_or_default().to_string()
}

pub(crate) fn to_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Tags as a Terraform map.
pub(crate) fn terraform_tags(tags: &BTreeMap<String, String>) -> Value {
    json!(tags)
}

/// Tags as a CloudFormation `[{Key, Value}]` list.
pub(crate) fn cloudformation_tags(tags: &BTreeMap<String, String>) -> Value {
    Value::Array(
        tags.iter()
            .map(|(k, v)| json!({ "Key": k, "Value": v }))
            .collect(),
    )
}
