//! Turns a [`NodeupConfig`] into node tasks.

use crate::config::{FileSpec, NodeupConfig};
use crate::host::NodeHost;
use crate::tasks::{File, FileType, Service};
use converge::{
    Error, ModelBuilder, ModelBuilderContext, ResourceHandle, Result, TaskKey, UrlResource,
    new_string_resource, wrap_resource,
};
use std::path::Path;

pub const CA_CERTIFICATE_PATH: &str = "/etc/kubernetes/pki/ca.crt";

pub struct NodeModelBuilder {
    config: NodeupConfig,
}

impl NodeModelBuilder {
    pub fn new(config: NodeupConfig) -> Self {
        Self { config }
    }

    /// Register the parent directories of `path`, outermost first, and
    /// return the key of the innermost one.
    fn ensure_parents(ctx: &mut ModelBuilderContext<NodeHost>, path: &str) -> Result<Option<TaskKey>> {
        let mut parents: Vec<&Path> = Path::new(path)
            .ancestors()
            .skip(1)
            .filter(|p| p.parent().is_some())
            .collect();
        parents.reverse();

        let mut previous: Option<TaskKey> = None;
        for dir in parents {
            let mut task = File::directory(dir.to_string_lossy());
            task.after.extend(previous.take());
            previous = Some(ctx.ensure_task(task)?);
        }
        Ok(previous)
    }
}

impl NodeModelBuilder {
    /// Inline contents, or a download for files with a `source`.
    fn contents(spec: &FileSpec) -> Result<ResourceHandle> {
        match (&spec.contents, &spec.source) {
            (Some(_), Some(_)) => Err(Error::Validation {
                message: format!("{}: set either contents or source, not both", spec.path),
            }),
            (_, Some(url)) => Ok(wrap_resource(UrlResource::new(url.clone(), spec.hash.clone()))),
            (contents, None) => Ok(new_string_resource(contents.clone().unwrap_or_default())),
        }
    }
}

impl ModelBuilder<NodeHost> for NodeModelBuilder {
    fn name(&self) -> &str {
        "node"
    }

    fn build(&self, ctx: &mut ModelBuilderContext<NodeHost>) -> Result<()> {
        let mut files = Vec::new();

        for spec in &self.config.files {
            if !spec.path.starts_with('/') {
                return Err(Error::Validation {
                    message: format!("file path must be absolute: {}", spec.path),
                });
            }
            let mut task = match spec.file_type {
                FileType::File => File::new(spec.path.clone(), Self::contents(spec)?),
                FileType::Directory => File::directory(spec.path.clone()),
                FileType::Symlink => File::symlink(
                    spec.path.clone(),
                    spec.symlink.clone().ok_or_else(|| Error::required("symlink"))?,
                ),
            };
            task.mode = spec.parsed_mode()?;
            task.after.extend(Self::ensure_parents(ctx, &spec.path)?);
            // A directory listed explicitly may already exist as a parent
            files.push(if spec.file_type == FileType::Directory && task.mode.is_none() {
                ctx.ensure_task(task)?
            } else {
                ctx.add_task(task)?
            });
        }

        if let Some(pem) = &self.config.ca_certificate {
            let mut task = File::new(CA_CERTIFICATE_PATH, new_string_resource(pem.clone()))
                .with_mode(0o644);
            task.after.extend(Self::ensure_parents(ctx, CA_CERTIFICATE_PATH)?);
            files.push(ctx.add_task(task)?);
        }

        for spec in &self.config.services {
            let mut service = Service::new(spec.name.clone(), spec.definition.clone());
            service.enabled = spec.enabled;
            service.running = spec.running;
            service.after = files.clone();
            ctx.add_task(service)?;
        }

        log::debug!(
            "node model for {}/{}: {} task(s)",
            self.config.cluster_name,
            self.config.instance_group,
            ctx.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeRole;
    use crate::services::MemoryServices;
    use converge::{Context, ExecuteOptions, NoProgress, Target, build_graph, execute};
    use tempfile::TempDir;

    fn config() -> NodeupConfig {
        let mut config = NodeupConfig::for_instance_group("demo", "nodes", NodeRole::Node, "1.31.0");
        config.ca_certificate = Some("-----BEGIN CERTIFICATE-----\n".to_string());
        config
    }

    #[test]
    fn test_parents_precede_files_and_services_come_last() {
        let graph = build_graph::<NodeHost>(&[&NodeModelBuilder::new(config())]).unwrap();
        let order = graph.order();
        let pos = |kind: &str, name: &str| {
            order
                .iter()
                .position(|k| k == &TaskKey::new(kind, name))
                .unwrap()
        };

        assert!(pos("File", "/etc") < pos("File", "/etc/kubernetes"));
        assert!(pos("File", "/etc/kubernetes/pki") < pos("File", CA_CERTIFICATE_PATH));
        assert!(pos("File", "/etc/sysconfig/kubelet") < pos("Service", "kubelet.service"));
        assert!(pos("File", CA_CERTIFICATE_PATH) < pos("Service", "kubelet.service"));
    }

    #[test]
    fn test_converges_node_root() {
        let dir = TempDir::new().unwrap();
        let host = NodeHost::new(dir.path(), MemoryServices::new());
        let graph = build_graph::<NodeHost>(&[&NodeModelBuilder::new(config())]).unwrap();
        let ctx = Context::new(Target::Direct(&host));

        let report = execute(&graph, &ctx, &ExecuteOptions::default(), &mut NoProgress)
            .unwrap()
            .into_result()
            .unwrap();
        assert!(report.summary.created > 0);
        assert!(dir.path().join("etc/kubernetes/pki/ca.crt").is_file());
        assert!(host.services().status("kubelet.service").unwrap().active);

        let ctx = Context::new(Target::Direct(&host));
        let again = execute(&graph, &ctx, &ExecuteOptions::default(), &mut NoProgress).unwrap();
        assert_eq!(again.renders(), 0);
        assert_eq!(again.summary.unchanged, graph.len());
    }

    #[test]
    fn test_relative_path_is_rejected() {
        let mut config = config();
        config.files.push(FileSpec::file("etc/motd", "hi"));
        let err = build_graph::<NodeHost>(&[&NodeModelBuilder::new(config)]).err().unwrap();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn test_asset_is_downloaded_lazily() {
        let mut config = config();
        config.files.push(
            FileSpec::asset("/usr/local/bin/kubelet", "https://dl.example.com/kubelet", None)
                .with_mode("0755"),
        );
        // building the graph must not fetch anything
        let graph = build_graph::<NodeHost>(&[&NodeModelBuilder::new(config)]).unwrap();
        assert!(graph.contains(&TaskKey::new("File", "/usr/local/bin/kubelet")));
        assert!(graph.contains(&TaskKey::new("File", "/usr/local/bin")));
    }

    #[test]
    fn test_contents_and_source_conflict() {
        let mut config = config();
        let mut spec = FileSpec::file("/etc/motd", "hi");
        spec.source = Some("https://dl.example.com/motd".to_string());
        config.files.push(spec);
        let err = build_graph::<NodeHost>(&[&NodeModelBuilder::new(config)]).err().unwrap();
        assert!(err.to_string().contains("either contents or source"));
    }
}
