use super::{
    cloudformation_tags, find_named, owned_tags, string_prop, terraform_tags, to_map, upsert,
};
use crate::api::CloudApi;
use converge::{
    Change, Changeset, Context, Diff, Error, RenderTarget, Result, Task, TaskKey,
};
use serde_json::{Value, json};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityGroup {
    pub name: String,
    pub vpc: TaskKey,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityGroupState {
    pub vpc_id: String,
    pub description: String,
    pub tags: BTreeMap<String, String>,
}

impl Task<dyn CloudApi> for SecurityGroup {
    type State = SecurityGroupState;

    fn kind(&self) -> &'static str {
        "SecurityGroup"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        vec![self.vpc.clone()]
    }

    fn find(&self, ctx: &Context<'_, dyn CloudApi>) -> Result<Option<SecurityGroupState>> {
        Ok(find_named(ctx, &Task::key(self), &self.name)?.map(|sg| SecurityGroupState {
            vpc_id: string_prop(&sg, "vpc_id"),
            description: string_prop(&sg, "description"),
            tags: sg.tags,
        }))
    }

    fn expected(&self, ctx: &Context<'_, dyn CloudApi>) -> Result<SecurityGroupState> {
        Ok(SecurityGroupState {
            vpc_id: ctx.output(&self.vpc)?,
            description: self.description.clone(),
            tags: owned_tags(ctx, &self.name),
        })
    }

    fn diff(&self, actual: Option<&SecurityGroupState>, expected: &SecurityGroupState) -> Changeset {
        Diff::new(actual, expected)
            .field("vpc_id", |s| &s.vpc_id)
            .field("description", |s| &s.description)
            .field("tags", |s| &s.tags)
            .finish()
    }

    fn check_changes(&self, change: &Change<'_, SecurityGroupState>) -> Result<()> {
        if change.is_create() {
            if change.expected.description.is_empty() {
                return Err(Error::required("description"));
            }
            return Ok(());
        }
        for field in ["vpc_id", "description"] {
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
        change: &Change<'_, SecurityGroupState>,
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
                        "description": state.description,
                    })),
                )?;
            }
            RenderTarget::Terraform(w) => {
                w.add_resource(
                    &key,
                    "aws_security_group",
                    &self.name,
                    json!({
                        "name": self.name,
                        "vpc_id": w.reference(&self.vpc, "id")?,
                        "description": state.description,
                        "tags": terraform_tags(&state.tags),
                    }),
                )?;
            }
            RenderTarget::CloudFormation(w) => {
                w.add_resource(
                    &key,
                    "AWS::EC2::SecurityGroup",
                    &self.name,
                    json!({
                        "GroupName": self.name,
                        "VpcId": w.reference(&self.vpc)?,
                        "GroupDescription": state.description,
                        "Tags": cloudformation_tags(&state.tags),
                    }),
                )?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Ingress,
    Egress,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingress => "ingress",
            Self::Egress => "egress",
        }
    }
}

/// One rule of a security group. Rules of the same group are rendered one
/// at a time; a changed rule is replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityGroupRule {
    pub name: String,
    pub group: TaskKey,
    pub direction: Direction,
    /// `tcp`, `udp` or `-1` for all
    pub protocol: String,
    pub from_port: u16,
    pub to_port: u16,
    pub cidr: Option<String>,
    /// Peer group, instead of a CIDR
    pub source_group: Option<TaskKey>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityGroupRuleState {
    pub group_id: String,
    pub direction: String,
    pub protocol: String,
    pub from_port: u16,
    pub to_port: u16,
    pub cidr: Option<String>,
    pub source_group_id: Option<String>,
}

impl SecurityGroupRule {
    /// Ingress TCP rule for a single port from a CIDR.
    pub fn ingress(name: impl Into<String>, group: TaskKey, port: u16, cidr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group,
            direction: Direction::Ingress,
            protocol: "tcp".to_string(),
            from_port: port,
            to_port: port,
            cidr: Some(cidr.into()),
            source_group: None,
        }
    }

    /// Rule allowing all traffic from (or to) another group.
    pub fn from_group(name: impl Into<String>, group: TaskKey, source: TaskKey) -> Self {
        Self {
            name: name.into(),
            group,
            direction: Direction::Ingress,
            protocol: "-1".to_string(),
            from_port: 0,
            to_port: 0,
            cidr: None,
            source_group: Some(source),
        }
    }

    fn terraform_body(&self, w: &converge::TerraformWriter) -> Result<Value> {
        let mut body = json!({
            "type": self.direction.as_str(),
            "security_group_id": w.reference(&self.group, "id")?,
            "protocol": self.protocol,
            "from_port": self.from_port,
            "to_port": self.to_port,
        });
        if let Some(cidr) = &self.cidr {
            body["cidr_blocks"] = json!([cidr]);
        }
        if let Some(source) = &self.source_group {
            body["source_security_group_id"] = Value::String(w.reference(source, "id")?);
        }
        Ok(body)
    }

    fn cloudformation_body(&self, w: &converge::CloudFormationWriter) -> Result<(&'static str, Value)> {
        let mut body = json!({
            "GroupId": w.reference(&self.group)?,
            "IpProtocol": self.protocol,
            "FromPort": self.from_port,
            "ToPort": self.to_port,
        });
        if let Some(cidr) = &self.cidr {
            body["CidrIp"] = json!(cidr);
        }
        let (resource_type, peer_field) = match self.direction {
            Direction::Ingress => ("AWS::EC2::SecurityGroupIngress", "SourceSecurityGroupId"),
            Direction::Egress => ("AWS::EC2::SecurityGroupEgress", "DestinationSecurityGroupId"),
        };
        if let Some(source) = &self.source_group {
            body[peer_field] = w.reference(source)?;
        }
        Ok((resource_type, body))
    }
}

impl Task<dyn CloudApi> for SecurityGroupRule {
    type State = SecurityGroupRuleState;

    fn kind(&self) -> &'static str {
        "SecurityGroupRule"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        let mut deps = vec![self.group.clone()];
        deps.extend(self.source_group.clone());
        deps
    }

    fn lock_key(&self) -> Option<TaskKey> {
        Some(self.group.clone())
    }

    fn find(&self, ctx: &Context<'_, dyn CloudApi>) -> Result<Option<SecurityGroupRuleState>> {
        Ok(find_named(ctx, &Task::key(self), &self.name)?.map(|rule| SecurityGroupRuleState {
            group_id: string_prop(&rule, "group_id"),
            direction: string_prop(&rule, "direction"),
            protocol: string_prop(&rule, "protocol"),
            from_port: rule
                .u64_property("from_port")
                .and_then(|p| u16::try_from(p).ok())
                .unwrap_or_default(),
            to_port: rule
                .u64_property("to_port")
                .and_then(|p| u16::try_from(p).ok())
                .unwrap_or_default(),
            cidr: rule.str_property("cidr").map(str::to_string),
            source_group_id: rule.str_property("source_group_id").map(str::to_string),
        }))
    }

    fn expected(&self, ctx: &Context<'_, dyn CloudApi>) -> Result<SecurityGroupRuleState> {
        Ok(SecurityGroupRuleState {
            group_id: ctx.output(&self.group)?,
            direction: self.direction.as_str().to_string(),
            protocol: self.protocol.clone(),
            from_port: self.from_port,
            to_port: self.to_port,
            cidr: self.cidr.clone(),
            source_group_id: self
                .source_group
                .as_ref()
                .map(|k| ctx.output(k))
                .transpose()?,
        })
    }

    fn diff(
        &self,
        actual: Option<&SecurityGroupRuleState>,
        expected: &SecurityGroupRuleState,
    ) -> Changeset {
        Diff::new(actual, expected)
            .field("group_id", |s| &s.group_id)
            .field("direction", |s| &s.direction)
            .field("protocol", |s| &s.protocol)
            .field("from_port", |s| &s.from_port)
            .field("to_port", |s| &s.to_port)
            .field("cidr", |s| &s.cidr)
            .field("source_group_id", |s| &s.source_group_id)
            .finish()
    }

    fn check_changes(&self, change: &Change<'_, SecurityGroupRuleState>) -> Result<()> {
        let state = change.expected;
        match (&state.cidr, &state.source_group_id) {
            (None, None) => return Err(Error::required("cidr")),
            (Some(_), Some(_)) => {
                return Err(Error::Validation {
                    message: format!("rule {} sets both a CIDR and a source group", self.name),
                });
            }
            _ => {}
        }
        if change.touches("group_id") && !change.is_create() {
            return Err(Error::cannot_change("group_id"));
        }
        if state.from_port > state.to_port {
            return Err(Error::Validation {
                message: format!(
                    "rule {}: port range {}-{} is inverted",
                    self.name, state.from_port, state.to_port
                ),
            });
        }
        Ok(())
    }

    fn render(
        &self,
        ctx: &Context<'_, dyn CloudApi>,
        target: RenderTarget<'_, dyn CloudApi>,
        change: &Change<'_, SecurityGroupRuleState>,
    ) -> Result<()> {
        let key = Task::key(self);
        let state = change.expected;
        match target {
            RenderTarget::Direct(api) => {
                // Rules cannot be modified in place. A retried render may
                // find the old rule already deleted.
                if !change.is_create() {
                    let old = ctx.output(&key)?;
                    if api.get("SecurityGroupRule", &old)?.is_some() {
                        log::info!("Replacing {key} ({old})");
                        match api.delete("SecurityGroupRule", &old) {
                            Ok(()) | Err(Error::NotFound { .. }) => {}
                            Err(e) => return Err(e),
                        }
                    } else {
                        log::debug!("{key} ({old}) is already gone");
                    }
                }
                let mut properties = to_map(json!({
                    "group_id": state.group_id,
                    "direction": state.direction,
                    "protocol": state.protocol,
                    "from_port": state.from_port,
                    "to_port": state.to_port,
                }));
                if let Some(cidr) = &state.cidr {
                    properties.insert("cidr".to_string(), json!(cidr));
                }
                if let Some(source) = &state.source_group_id {
                    properties.insert("source_group_id".to_string(), json!(source));
                }
                upsert(ctx, api, &key, &self.name, true, owned_tags(ctx, &self.name), properties)?;
            }
            RenderTarget::Terraform(w) => {
                w.add_resource(&key, "aws_security_group_rule", &self.name, self.terraform_body(w)?)?;
            }
            RenderTarget::CloudFormation(w) => {
                let (resource_type, body) = self.cloudformation_body(w)?;
                w.add_resource(&key, resource_type, &self.name, body)?;
            }
        }
        Ok(())
    }
}
