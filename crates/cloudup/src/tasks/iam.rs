use super::{find_named, owned_tags, string_prop, terraform_tags, to_map, upsert};
use crate::api::CloudApi;
use converge::{
    Change, Changeset, Context, Diff, Error, RenderTarget, Result, Task, TaskKey,
};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

/// An IAM role with inline policies.
///
/// Policy documents are compared in canonical JSON form, so formatting and
/// key order differences are not changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IamRole {
    pub name: String,
    pub role_name: String,
    pub assume_role_policy: String,
    /// Inline policy name to policy document
    pub policies: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IamRoleState {
    pub role_name: String,
    pub assume_role_policy: String,
    pub policies: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
}

fn parse_policy(text: &str, what: &str) -> Result<Value> {
    serde_json::from_str(text).map_err(|e| Error::Validation {
        message: format!("{what} is not valid JSON: {e}"),
    })
}

/// Compact JSON with object keys sorted at every level.
fn canonical(text: &str, what: &str) -> Result<String> {
    Ok(sort_keys(parse_policy(text, what)?).to_string())
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k, sort_keys(v))).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

impl IamRole {
    fn policy_key(&self, policy: &str) -> TaskKey {
        TaskKey::new("IamRolePolicy", format!("{}-{policy}", self.name))
    }
}

impl Task<dyn CloudApi> for IamRole {
    type State = IamRoleState;

    fn kind(&self) -> &'static str {
        "IamRole"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn cloud_name(&self) -> String {
        self.role_name.clone()
    }

    fn find(&self, ctx: &Context<'_, dyn CloudApi>) -> Result<Option<IamRoleState>> {
        let Some(role) = find_named(ctx, &Task::key(self), &self.name)? else {
            return Ok(None);
        };
        let policies = match role.properties.get("policies") {
            Some(Value::Object(map)) => map
                .iter()
                .map(|(name, doc)| (name.clone(), sort_keys(doc.clone()).to_string()))
                .collect(),
            _ => BTreeMap::new(),
        };
        Ok(Some(IamRoleState {
            role_name: string_prop(&role, "role_name"),
            assume_role_policy: role
                .properties
                .get("assume_role_policy")
                .map(|doc| sort_keys(doc.clone()).to_string())
                .unwrap_or_default(),
            policies,
            tags: role.tags,
        }))
    }

    fn expected(&self, ctx: &Context<'_, dyn CloudApi>) -> Result<IamRoleState> {
        let policies = self
            .policies
            .iter()
            .map(|(name, doc)| Ok((name.clone(), canonical(doc, &format!("policy {name}"))?)))
            .collect::<Result<_>>()?;
        Ok(IamRoleState {
            role_name: self.role_name.clone(),
            assume_role_policy: canonical(&self.assume_role_policy, "assume role policy")?,
            policies,
            tags: owned_tags(ctx, &self.name),
        })
    }

    fn diff(&self, actual: Option<&IamRoleState>, expected: &IamRoleState) -> Changeset {
        Diff::new(actual, expected)
            .field("role_name", |s| &s.role_name)
            .field("assume_role_policy", |s| &s.assume_role_policy)
            .field("policies", |s| &s.policies)
            .field("tags", |s| &s.tags)
            .finish()
    }

    fn check_changes(&self, change: &Change<'_, IamRoleState>) -> Result<()> {
        if change.is_create() && change.expected.role_name.is_empty() {
            return Err(Error::required("role_name"));
        }
        if !change.is_create() && change.touches("role_name") {
            return Err(Error::cannot_change("role_name"));
        }
        Ok(())
    }

    fn render(
        &self,
        ctx: &Context<'_, dyn CloudApi>,
        target: RenderTarget<'_, dyn CloudApi>,
        change: &Change<'_, IamRoleState>,
    ) -> Result<()> {
        let key = Task::key(self);
        let state = change.expected;
        let assume = parse_policy(&state.assume_role_policy, "assume role policy")?;
        let mut documents = Map::new();
        for (name, doc) in &state.policies {
            documents.insert(name.clone(), parse_policy(doc, name)?);
        }

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
                        "role_name": state.role_name,
                        "assume_role_policy": assume,
                        "policies": documents,
                    })),
                )?;
            }
            RenderTarget::Terraform(w) => {
                w.add_resource(
                    &key,
                    "aws_iam_role",
                    &self.name,
                    json!({
                        "name": state.role_name,
                        "assume_role_policy": state.assume_role_policy,
                        "tags": terraform_tags(&state.tags),
                    }),
                )?;
                let role = w.reference(&key, "name")?;
                for (policy, doc) in &state.policies {
                    w.add_resource(
                        &self.policy_key(policy),
                        "aws_iam_role_policy",
                        &format!("{}-{policy}", self.name),
                        json!({ "name": policy, "role": role, "policy": doc }),
                    )?;
                }
            }
            RenderTarget::CloudFormation(w) => {
                let policies: Vec<Value> = documents
                    .into_iter()
                    .map(|(name, doc)| json!({ "PolicyName": name, "PolicyDocument": doc }))
                    .collect();
                w.add_resource(
                    &key,
                    "AWS::IAM::Role",
                    &self.name,
                    json!({
                        "RoleName": state.role_name,
                        "AssumeRolePolicyDocument": assume,
                        "Policies": policies,
                    }),
                )?;
            }
        }
        Ok(())
    }
}
