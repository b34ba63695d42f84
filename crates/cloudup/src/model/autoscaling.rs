use super::{CA_KEYSET, ModelOptions, add, iam_role_key, scoped, security_group_key, subnet_keys};
use crate::api::CloudApi;
use crate::spec::{ClusterSpec, InstanceGroupSpec};
use crate::tasks::{AutoscalingGroup, LaunchTemplate, ManagedFile};
use converge::{ModelBuilder, ModelBuilderContext, Result, new_string_resource};
use nodeup::NodeupConfig;

/// Where user data drops the node configuration before running nodeup.
pub const NODEUP_CONFIG_PATH: &str = "/etc/kubeforge/nodeup.json";

/// Launch template and autoscaling group per instance group, plus the
/// nodeup configuration the instances boot with.
pub struct AutoscalingModelBuilder<'a> {
    spec: &'a ClusterSpec,
    options: &'a ModelOptions,
}

impl<'a> AutoscalingModelBuilder<'a> {
    pub fn new(spec: &'a ClusterSpec, options: &'a ModelOptions) -> Self {
        Self { spec, options }
    }

    fn nodeup_config(&self, group: &InstanceGroupSpec) -> Result<NodeupConfig> {
        let mut config = NodeupConfig::for_instance_group(
            &self.spec.name,
            &group.name,
            group.role,
            &self.spec.kubernetes_version,
        );
        if let Some(keystore) = &self.options.keystore {
            config.ca_certificate = keystore.find_cert(CA_KEYSET)?.map(|c| c.pem);
        }
        Ok(config)
    }
}

/// Boot script: write the configuration and converge the node with it.
///
/// The configuration hash is on its own line so a changed configuration is
/// visible in the launch template diff even when only the digest is shown.
pub(crate) fn user_data(config: &NodeupConfig) -> Result<String> {
    Ok(format!(
        "#!/bin/bash
set -o errexit -o nounset -o pipefail
# nodeup config hash: {hash}
mkdir -p /etc/kubeforge
cat > {NODEUP_CONFIG_PATH} <<'__NODEUP_CONFIG__'
{json}
__NODEUP_CONFIG__
kubeforge nodeup --config {NODEUP_CONFIG_PATH}
",
        hash = config.hash()?,
        json = config.to_json()?,
    ))
}

impl ModelBuilder<dyn CloudApi> for AutoscalingModelBuilder<'_> {
    fn name(&self) -> &str {
        "autoscaling"
    }

    fn build(&self, ctx: &mut ModelBuilderContext<dyn CloudApi>) -> Result<()> {
        let spec = self.spec;
        for group in &spec.instance_groups {
            let name = scoped(spec, &group.name);
            let config = self.nodeup_config(group)?;

            if self.options.has_object_store() {
                add(
                    spec,
                    ctx,
                    ManagedFile {
                        name: scoped(spec, &format!("nodeup-{}", group.name)),
                        location: spec.state_path(&format!("igconfig/{}/nodeup.json", group.name)),
                        contents: new_string_resource(config.to_json()?),
                    },
                )?;
            }

            let template = add(
                spec,
                ctx,
                LaunchTemplate {
                    name: name.clone(),
                    image: group.image.clone(),
                    machine_type: group.machine_type.clone(),
                    root_volume_size: group.root_volume_size,
                    security_groups: vec![security_group_key(spec, group.role)],
                    role: Some(iam_role_key(spec, group.role)),
                    user_data: new_string_resource(user_data(&config)?),
                },
            )?;

            add(
                spec,
                ctx,
                AutoscalingGroup {
                    name,
                    launch_template: template,
                    subnets: subnet_keys(spec),
                    min_size: group.min_size,
                    max_size: group.max_size,
                },
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::fixtures::cluster;
    use nodeup::NodeRole;

    #[test]
    fn test_user_data_embeds_config() {
        let config = NodeupConfig::for_instance_group("demo", "nodes", NodeRole::Node, "1.31.0");
        let script = user_data(&config).unwrap();
        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains(&format!("# nodeup config hash: {}", config.hash().unwrap())));

        let start = script.find("<<'__NODEUP_CONFIG__'\n").unwrap() + "<<'__NODEUP_CONFIG__'\n".len();
        let end = script.find("\n__NODEUP_CONFIG__\n").unwrap();
        assert_eq!(NodeupConfig::from_json(&script[start..end]).unwrap(), config);
    }

    #[test]
    fn test_version_change_changes_user_data() {
        let spec = cluster();
        let options = ModelOptions::default();
        let builder = AutoscalingModelBuilder::new(&spec, &options);
        let before = user_data(&builder.nodeup_config(&spec.instance_groups[0]).unwrap()).unwrap();

        let mut upgraded = cluster();
        upgraded.kubernetes_version = "1.32.0".to_string();
        let builder = AutoscalingModelBuilder::new(&upgraded, &options);
        let after = user_data(&builder.nodeup_config(&upgraded.instance_groups[0]).unwrap()).unwrap();
        assert_ne!(before, after);
    }
}
