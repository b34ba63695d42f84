use crate::api::CloudApi;
use converge::{
    Change, Changeset, Context, Diff, Error, RenderTarget, Resource, ResourceHandle, Result, Task,
    TaskKey, TargetKind,
};
use serde_json::json;

/// A file in the state store, e.g. `s3://bucket/cluster/config`.
///
/// Only direct and Terraform rendering are supported; CloudFormation has
/// no resource for object contents.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedFile {
    pub name: String,
    pub location: String,
    pub contents: ResourceHandle,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagedFileState {
    pub hash: String,
    pub size: u64,
}

impl ManagedFileState {
    fn of(bytes: &[u8]) -> Self {
        Self {
            hash: blake3::hash(bytes).to_hex().to_string(),
            size: bytes.len() as u64,
        }
    }
}

/// Split `s3://bucket/key` into bucket and key.
fn split_location(location: &str) -> Result<(&str, &str)> {
    location
        .strip_prefix("s3://")
        .and_then(|rest| rest.split_once('/'))
        .filter(|(bucket, key)| !bucket.is_empty() && !key.is_empty())
        .ok_or_else(|| Error::Validation {
            message: format!("invalid state store location {location:?}, expected s3://bucket/key"),
        })
}

impl Task<dyn CloudApi> for ManagedFile {
    type State = ManagedFileState;

    fn kind(&self) -> &'static str {
        "ManagedFile"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn cloud_name(&self) -> String {
        self.location.clone()
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        self.contents.dependencies()
    }

    fn supports_target(&self, target: TargetKind) -> bool {
        target != TargetKind::CloudFormation
    }

    fn find(&self, ctx: &Context<'_, dyn CloudApi>) -> Result<Option<ManagedFileState>> {
        let found = ctx.api()?.get_object(&self.location)?;
        if found.is_some() {
            ctx.publish(&Task::key(self), &self.location);
        }
        Ok(found.map(|bytes| ManagedFileState::of(&bytes)))
    }

    fn expected(&self, _ctx: &Context<'_, dyn CloudApi>) -> Result<ManagedFileState> {
        Ok(ManagedFileState::of(&self.contents.as_bytes()?))
    }

    fn diff(&self, actual: Option<&ManagedFileState>, expected: &ManagedFileState) -> Changeset {
        Diff::new(actual, expected)
            .field("hash", |s| &s.hash)
            .field("size", |s| &s.size)
            .finish()
    }

    fn check_changes(&self, _change: &Change<'_, ManagedFileState>) -> Result<()> {
        split_location(&self.location).map(|_| ())
    }

    fn render(
        &self,
        ctx: &Context<'_, dyn CloudApi>,
        target: RenderTarget<'_, dyn CloudApi>,
        _change: &Change<'_, ManagedFileState>,
    ) -> Result<()> {
        let key = Task::key(self);
        let bytes = self.contents.as_bytes()?;
        match target {
            RenderTarget::Direct(api) => {
                api.put_object(&self.location, &bytes)?;
                log::info!("Wrote {} ({} bytes)", self.location, bytes.len());
                ctx.publish(&key, &self.location);
            }
            RenderTarget::Terraform(w) => {
                let (bucket, object_key) = split_location(&self.location)?;
                let content = w.text_content("aws_s3_object", &self.name, "content", &bytes);
                w.add_resource(
                    &key,
                    "aws_s3_object",
                    &self.name,
                    json!({
                        "bucket": bucket,
                        "key": object_key,
                        "content": content,
                        "server_side_encryption": "AES256",
                    }),
                )?;
            }
            RenderTarget::CloudFormation(_) => {
                return Err(Error::NoRenderer {
                    task: key,
                    target: TargetKind::CloudFormation,
                });
            }
        }
        Ok(())
    }
}
