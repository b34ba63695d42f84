//! Render targets.
//!
//! A run applies changes directly through the provider context, simulates
//! them (dry run), or emits an infrastructure-as-code document.

pub mod cloudformation;
pub mod terraform;

pub use cloudformation::CloudFormationWriter;
pub use terraform::TerraformWriter;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Discriminant of a [`Target`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Direct,
    DryRun,
    Terraform,
    CloudFormation,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::DryRun => "dryrun",
            Self::Terraform => "terraform",
            Self::CloudFormation => "cloudformation",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "dryrun" | "dry-run" => Ok(Self::DryRun),
            "terraform" => Ok(Self::Terraform),
            "cloudformation" => Ok(Self::CloudFormation),
            other => Err(format!("unknown target: {other}")),
        }
    }
}

/// The backend a run renders against, selected once at run start.
pub enum Target<'a, C: ?Sized> {
    /// Apply changes through the provider context
    Direct(&'a C),
    /// Find and diff against the provider, render nothing
    DryRun(&'a C),
    /// Emit Terraform JSON
    Terraform(&'a TerraformWriter),
    /// Emit a CloudFormation template
    CloudFormation(&'a CloudFormationWriter),
}

impl<C: ?Sized> Clone for Target<'_, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C: ?Sized> Copy for Target<'_, C> {}

impl<C: ?Sized> fmt::Debug for Target<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Target::{:?}", self.kind())
    }
}

impl<'a, C: ?Sized> Target<'a, C> {
    pub fn kind(&self) -> TargetKind {
        match self {
            Self::Direct(_) => TargetKind::Direct,
            Self::DryRun(_) => TargetKind::DryRun,
            Self::Terraform(_) => TargetKind::Terraform,
            Self::CloudFormation(_) => TargetKind::CloudFormation,
        }
    }

    /// Whether tasks should look up existing objects. Emitting targets
    /// describe the whole cluster, so every task is treated as a create.
    pub fn check_existing(&self) -> bool {
        matches!(self, Self::Direct(_) | Self::DryRun(_))
    }

    pub fn is_dry_run(&self) -> bool {
        matches!(self, Self::DryRun(_))
    }

    /// The provider context, for targets that talk to the backend.
    pub fn provider(&self) -> Option<&'a C> {
        match *self {
            Self::Direct(c) | Self::DryRun(c) => Some(c),
            Self::Terraform(_) | Self::CloudFormation(_) => None,
        }
    }

    /// The view handed to `Task::render`; `None` for a dry run.
    pub fn render_target(&self) -> Option<RenderTarget<'a, C>> {
        match *self {
            Self::Direct(c) => Some(RenderTarget::Direct(c)),
            Self::DryRun(_) => None,
            Self::Terraform(w) => Some(RenderTarget::Terraform(w)),
            Self::CloudFormation(w) => Some(RenderTarget::CloudFormation(w)),
        }
    }
}

/// What a task renders to. Tasks match on it exhaustively.
pub enum RenderTarget<'a, C: ?Sized> {
    Direct(&'a C),
    Terraform(&'a TerraformWriter),
    CloudFormation(&'a CloudFormationWriter),
}

impl<C: ?Sized> Clone for RenderTarget<'_, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C: ?Sized> Copy for RenderTarget<'_, C> {}

impl<C: ?Sized> RenderTarget<'_, C> {
    pub fn kind(&self) -> TargetKind {
        match self {
            Self::Direct(_) => TargetKind::Direct,
            Self::Terraform(_) => TargetKind::Terraform,
            Self::CloudFormation(_) => TargetKind::CloudFormation,
        }
    }
}

/// Make a name safe for use as a Terraform or CloudFormation identifier.
pub(crate) fn sanitize_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_kind_parse() {
        assert_eq!("direct".parse::<TargetKind>(), Ok(TargetKind::Direct));
        assert_eq!("dry-run".parse::<TargetKind>(), Ok(TargetKind::DryRun));
        assert_eq!(
            "CloudFormation".parse::<TargetKind>(),
            Ok(TargetKind::CloudFormation)
        );
        assert!("pulumi".parse::<TargetKind>().is_err());
    }

    #[test]
    fn test_target_views() {
        let provider = 7u32;
        let direct: Target<'_, u32> = Target::Direct(&provider);
        assert!(direct.check_existing());
        assert_eq!(direct.provider(), Some(&7));
        assert_eq!(
            direct.render_target().map(|t| t.kind()),
            Some(TargetKind::Direct)
        );

        let dry: Target<'_, u32> = Target::DryRun(&provider);
        assert!(dry.check_existing());
        assert!(dry.render_target().is_none());

        let writer = TerraformWriter::new();
        let tf: Target<'_, u32> = Target::Terraform(&writer);
        assert!(!tf.check_existing());
        assert!(tf.provider().is_none());
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("nodes.example.com"), "nodes-example-com");
        assert_eq!(sanitize_name("1a"), "_1a");
        assert_eq!(sanitize_name("web_443"), "web_443");
    }
}
