//! Per-instance-group node configuration, written by cloudup and read on
//! the node at boot.

use crate::tasks::FileType;
use converge::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Role of the machines in an instance group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Master,
    #[default]
    Node,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::Node => "node",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file nodeup should converge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSpec {
    pub path: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
    pub contents: Option<String>,
    /// URL the contents are downloaded from instead
    pub source: Option<String>,
    /// blake3 digest the download must match
    pub hash: Option<String>,
    pub symlink: Option<String>,
    /// Octal permission bits, e.g. `"0644"`
    pub mode: Option<String>,
}

impl FileSpec {
    pub fn file(path: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            contents: Some(contents.into()),
            ..Self::default()
        }
    }

    /// A file downloaded from `url`, verified against `hash` when given.
    pub fn asset(path: impl Into<String>, url: impl Into<String>, hash: Option<String>) -> Self {
        Self {
            path: path.into(),
            source: Some(url.into()),
            hash,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: &str) -> Self {
        self.mode = Some(mode.to_string());
        self
    }

    /// Permission bits parsed from the octal text
    pub fn parsed_mode(&self) -> Result<Option<u32>> {
        self.mode
            .as_deref()
            .map(|m| {
                u32::from_str_radix(m.trim_start_matches("0o"), 8).map_err(|_| Error::Validation {
                    message: format!("{}: invalid file mode {m:?}", self.path),
                })
            })
            .transpose()
    }
}

fn default_true() -> bool {
    true
}

/// A systemd unit nodeup should converge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    pub definition: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub running: bool,
}

/// Everything a node needs to bootstrap itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeupConfig {
    pub cluster_name: String,
    pub instance_group: String,
    pub role: NodeRole,
    pub kubernetes_version: String,
    /// Cluster CA certificate in PEM form
    pub ca_certificate: Option<String>,
    pub files: Vec<FileSpec>,
    pub services: Vec<ServiceSpec>,
}

const KUBELET_UNIT: &str = "[Unit]
Description=Kubernetes Kubelet Server
After=network-online.target

[Service]
EnvironmentFile=/etc/sysconfig/kubelet
ExecStart=/usr/local/bin/kubelet $KUBELET_ARGS
Restart=always
RestartSec=2s

[Install]
WantedBy=multi-user.target
";

impl NodeupConfig {
    /// Configuration for one instance group: kubelet settings and unit.
    pub fn for_instance_group(
        cluster_name: &str,
        instance_group: &str,
        role: NodeRole,
        kubernetes_version: &str,
    ) -> Self {
        let mut args = vec![
            "--kubeconfig=/var/lib/kubelet/kubeconfig".to_string(),
            format!("--node-labels=kubernetes.io/role={role},kubeforge.io/instancegroup={instance_group}"),
        ];
        if role == NodeRole::Master {
            args.push("--register-with-taints=node-role.kubernetes.io/master=:NoSchedule".to_string());
        }
        Self {
            cluster_name: cluster_name.to_string(),
            instance_group: instance_group.to_string(),
            role,
            kubernetes_version: kubernetes_version.to_string(),
            ca_certificate: None,
            files: vec![
                FileSpec::file(
                    "/etc/sysconfig/kubelet",
                    format!("KUBELET_ARGS=\"{}\"\n", args.join(" ")),
                )
                .with_mode("0644"),
            ],
            services: vec![ServiceSpec {
                name: "kubelet.service".to_string(),
                definition: KUBELET_UNIT.to_string(),
                enabled: true,
                running: true,
            }],
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Digest of the serialized configuration, embedded in user data so a
    /// changed configuration changes the launch template.
    pub fn hash(&self) -> Result<String> {
        Ok(blake3::hash(self.to_json()?.as_bytes()).to_hex().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_instance_group_defaults() {
        let config = NodeupConfig::for_instance_group("demo", "masters", NodeRole::Master, "1.31.0");
        assert_eq!(config.services[0].name, "kubelet.service");
        let env = config.files[0].contents.as_deref().unwrap();
        assert!(env.contains("kubeforge.io/instancegroup=masters"));
        assert!(env.contains("NoSchedule"));

        let nodes = NodeupConfig::for_instance_group("demo", "nodes", NodeRole::Node, "1.31.0");
        assert!(!nodes.files[0].contents.as_deref().unwrap().contains("NoSchedule"));
    }

    #[test]
    fn test_load_applies_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nodeup.json");
        std::fs::write(
            &path,
            r#"{
                "cluster_name": "demo",
                "role": "master",
                "files": [{"path": "/etc/motd", "contents": "hi"}],
                "services": [{"name": "a.service", "definition": "[Service]"}]
            }"#,
        )
        .unwrap();

        let config = NodeupConfig::load(&path).unwrap();
        assert_eq!(config.role, NodeRole::Master);
        assert_eq!(config.files[0].file_type, FileType::File);
        assert!(config.services[0].enabled);
        assert!(config.services[0].running);
    }

    #[test]
    fn test_hash_tracks_content() {
        let a = NodeupConfig::for_instance_group("demo", "nodes", NodeRole::Node, "1.31.0");
        let mut b = a.clone();
        assert_eq!(a.hash().unwrap(), b.hash().unwrap());
        b.kubernetes_version = "1.32.0".to_string();
        assert_ne!(a.hash().unwrap(), b.hash().unwrap());
    }

    #[test]
    fn test_parsed_mode() {
        assert_eq!(FileSpec::file("/a", "").with_mode("0600").parsed_mode().unwrap(), Some(0o600));
        assert_eq!(FileSpec::file("/a", "").parsed_mode().unwrap(), None);
        assert!(FileSpec::file("/a", "").with_mode("rw").parsed_mode().is_err());
    }
}
