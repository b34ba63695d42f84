//! # Nodeup
//!
//! Converges a single cluster node: files on disk and the systemd units
//! that run the kubelet and friends.
//!
//! Tasks here are ordinary [`converge::Task`]s whose provider context is a
//! [`NodeHost`]. They only render directly against the host; asking for a
//! Terraform or CloudFormation rendering of a node is a configuration error.
//!
//! ```ignore
//! let config = NodeupConfig::load(Path::new("/var/cache/kubeforge/nodeup.json"))?;
//! let graph = build_graph(&[&NodeModelBuilder::new(config)])?;
//! let host = NodeHost::new("/", Systemd::default());
//! let ctx = Context::new(Target::Direct(&host));
//! execute(&graph, &ctx, &ExecuteOptions::default(), &mut NoProgress)?.into_result()?;
//! ```

pub mod config;
pub mod host;
pub mod model;
pub mod services;
pub mod tasks;

pub use config::{FileSpec, NodeRole, NodeupConfig, ServiceSpec};
pub use host::NodeHost;
pub use model::NodeModelBuilder;
pub use services::{MemoryServices, ServiceManager, Systemd, UnitStatus};
pub use tasks::{File, FileType, Service};
