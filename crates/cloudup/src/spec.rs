//! Cluster specification: the user-facing description of a cluster that the
//! model builders turn into tasks.

use converge::{Error, Lifecycle, Result};
use nodeup::NodeRole;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetSpec {
    pub name: String,
    pub zone: String,
    pub cidr: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSpec {
    pub cidr: String,
    /// Id of an existing VPC to use instead of creating one
    pub shared_vpc_id: Option<String>,
    pub subnets: Vec<SubnetSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSpec {
    pub port: u16,
    /// Networks allowed to reach the API server
    pub admin_cidrs: Vec<String>,
}

impl Default for ApiSpec {
    fn default() -> Self {
        Self {
            port: 443,
            admin_cidrs: vec!["0.0.0.0/0".to_string()],
        }
    }
}

fn default_volume_size() -> u32 {
    64
}

fn default_size() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceGroupSpec {
    pub name: String,
    #[serde(default)]
    pub role: NodeRole,
    pub image: String,
    pub machine_type: String,
    #[serde(default = "default_volume_size")]
    pub root_volume_size: u32,
    #[serde(default = "default_size")]
    pub min_size: u32,
    #[serde(default = "default_size")]
    pub max_size: u32,
}

/// A whole cluster.
///
/// `lifecycle_overrides` maps a task kind (`Vpc`, `SecurityGroup`, ...) to
/// the lifecycle every task of that kind gets, e.g. `ExistsAndValidates`
/// for objects managed by another team.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSpec {
    pub name: String,
    pub region: String,
    pub kubernetes_version: String,
    /// Object store prefix for cluster files, `s3://bucket/prefix`
    pub state_store: String,
    pub network: NetworkSpec,
    pub api: ApiSpec,
    pub instance_groups: Vec<InstanceGroupSpec>,
    pub lifecycle_overrides: BTreeMap<String, Lifecycle>,
}

fn invalid(message: String) -> Error {
    Error::Validation { message }
}

fn check_cidr(what: &str, cidr: &str) -> Result<()> {
    let Some((addr, prefix)) = cidr.split_once('/') else {
        return Err(invalid(format!("{what}: {cidr:?} is not a CIDR block")));
    };
    let octets: Vec<&str> = addr.split('.').collect();
    let valid_addr = octets.len() == 4 && octets.iter().all(|o| o.parse::<u8>().is_ok());
    let valid_prefix = prefix.parse::<u8>().is_ok_and(|p| p <= 32);
    if valid_addr && valid_prefix {
        Ok(())
    } else {
        Err(invalid(format!("{what}: {cidr:?} is not a CIDR block")))
    }
}

impl ClusterSpec {
    /// Location of a cluster file in the state store.
    pub fn state_path(&self, file: &str) -> String {
        format!(
            "{}/{}/{file}",
            self.state_store.trim_end_matches('/'),
            self.name
        )
    }

    /// Lifecycle for tasks of `kind`.
    pub fn lifecycle_for(&self, kind: &str) -> Lifecycle {
        self.lifecycle_overrides.get(kind).copied().unwrap_or_default()
    }

    pub fn masters(&self) -> impl Iterator<Item = &InstanceGroupSpec> {
        self.instance_groups
            .iter()
            .filter(|g| g.role == NodeRole::Master)
    }

    /// Check the cluster definition is complete and consistent before building a model.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::required("name"));
        }
        if self.region.is_empty() {
            return Err(Error::required("region"));
        }
        if !self.state_store.starts_with("s3://") {
            return Err(invalid(format!(
                "state_store {:?} must be an s3:// location",
                self.state_store
            )));
        }
        if self.network.shared_vpc_id.is_none() {
            check_cidr("network.cidr", &self.network.cidr)?;
        }
        if self.network.subnets.is_empty() {
            return Err(invalid("at least one subnet is required".to_string()));
        }

        let mut seen = BTreeSet::new();
        for subnet in &self.network.subnets {
            if !seen.insert(subnet.name.as_str()) {
                return Err(invalid(format!("duplicate subnet {:?}", subnet.name)));
            }
            check_cidr(&format!("subnet {}", subnet.name), &subnet.cidr)?;
            if subnet.zone.is_empty() {
                return Err(invalid(format!("subnet {} has no zone", subnet.name)));
            }
        }
        for cidr in &self.api.admin_cidrs {
            check_cidr("api.admin_cidrs", cidr)?;
        }

        let mut seen = BTreeSet::new();
        for group in &self.instance_groups {
            if !seen.insert(group.name.as_str()) {
                return Err(invalid(format!("duplicate instance group {:?}", group.name)));
            }
            if group.min_size > group.max_size {
                return Err(invalid(format!(
                    "instance group {}: min_size {} exceeds max_size {}",
                    group.name, group.min_size, group.max_size
                )));
            }
        }
        if self.masters().next().is_none() {
            return Err(invalid("at least one master instance group is required".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// A small valid cluster: one master group, one node group, two subnets.
    pub fn cluster() -> ClusterSpec {
        ClusterSpec {
            name: "demo".to_string(),
            region: "us-test-1".to_string(),
            kubernetes_version: "1.31.0".to_string(),
            state_store: "s3://state".to_string(),
            network: NetworkSpec {
                cidr: "10.0.0.0/16".to_string(),
                shared_vpc_id: None,
                subnets: vec![
                    SubnetSpec {
                        name: "a".to_string(),
                        zone: "us-test-1a".to_string(),
                        cidr: "10.0.1.0/24".to_string(),
                    },
                    SubnetSpec {
                        name: "b".to_string(),
                        zone: "us-test-1b".to_string(),
                        cidr: "10.0.2.0/24".to_string(),
                    },
                ],
            },
            api: ApiSpec::default(),
            instance_groups: vec![
                InstanceGroupSpec {
                    name: "masters".to_string(),
                    role: NodeRole::Master,
                    image: "ami-master".to_string(),
                    machine_type: "t3.medium".to_string(),
                    root_volume_size: 64,
                    min_size: 1,
                    max_size: 1,
                },
                InstanceGroupSpec {
                    name: "nodes".to_string(),
                    role: NodeRole::Node,
                    image: "ami-node".to_string(),
                    machine_type: "t3.large".to_string(),
                    root_volume_size: 128,
                    min_size: 2,
                    max_size: 4,
                },
            ],
            lifecycle_overrides: BTreeMap::new(),
        }
    }
}
