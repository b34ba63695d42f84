//! # Cloudup
//!
//! Cloud side of cluster provisioning: the task kinds for networks,
//! firewalls, IAM, instance groups and state-store files, the [`CloudApi`]
//! provider seam they talk to, and the model builders that turn a
//! [`ClusterSpec`] into a task graph.
//!
//! ```ignore
//! let spec: ClusterSpec = toml::from_str(&text)?;
//! let graph = build_cluster_graph(&spec, &ModelOptions::for_target(TargetKind::Direct))?;
//! let cloud = MemoryCloud::open(&spec.region, &state_file)?;
//! let ctx = Context::new(Target::Direct(&cloud as &dyn CloudApi)).with_cluster_name(&spec.name);
//! execute(&graph, &ctx, &ExecuteOptions::default(), &mut NoProgress)?.into_result()?;
//! cloud.save()?;
//! ```
//!
//! [`MemoryCloud`] is a complete in-process provider: ids, ownership tags,
//! dependency violations on delete and injectable faults. Real SDK clients
//! plug in by implementing [`CloudApi`].

pub mod api;
pub mod memory;
pub mod model;
pub mod prune;
pub mod spec;
pub mod tasks;

pub use api::{CloudApi, CloudResource, NAME_TAG, cluster_tag};
pub use memory::{FaultKind, MemoryCloud, Op};
pub use model::{CA_KEYSET, ModelOptions, build_cluster_graph};
pub use prune::{CloudDeleter, observe_owned};
pub use spec::{ApiSpec, ClusterSpec, InstanceGroupSpec, NetworkSpec, SubnetSpec};
