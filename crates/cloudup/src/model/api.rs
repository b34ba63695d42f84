use super::{CA_KEYSET, ModelOptions, add, scoped};
use crate::api::CloudApi;
use crate::spec::ClusterSpec;
use crate::tasks::{ElasticIp, ManagedFile};
use converge::{
    CertificateResource, DeferredResource, ModelBuilder, ModelBuilderContext, Resource, Result,
    wrap_resource,
};
use nodeup::model::CA_CERTIFICATE_PATH;

/// The API endpoint: a static address and, where the target has an object
/// store, the admin kubeconfig and CA certificate pointing at it.
pub struct ApiModelBuilder<'a> {
    spec: &'a ClusterSpec,
    options: &'a ModelOptions,
}

impl<'a> ApiModelBuilder<'a> {
    pub fn new(spec: &'a ClusterSpec, options: &'a ModelOptions) -> Self {
        Self { spec, options }
    }
}

fn kubeconfig(cluster: &str, server: &str) -> String {
    format!(
        "apiVersion: v1
kind: Config
clusters:
- name: {cluster}
  cluster:
    server: {server}
    certificate-authority: {CA_CERTIFICATE_PATH}
contexts:
- name: {cluster}
  context:
    cluster: {cluster}
    user: admin
current-context: {cluster}
users:
- name: admin
  user: {{}}
"
    )
}

impl ModelBuilder<dyn CloudApi> for ApiModelBuilder<'_> {
    fn name(&self) -> &str {
        "api"
    }

    fn build(&self, ctx: &mut ModelBuilderContext<dyn CloudApi>) -> Result<()> {
        let spec = self.spec;
        let eip = ElasticIp::new(scoped(spec, "api"));
        let address = eip.address.clone();
        let eip_key = add(spec, ctx, eip)?;

        if !self.options.has_object_store() {
            log::debug!("Target has no object store, skipping kubeconfig");
            return Ok(());
        }

        let cluster = spec.name.clone();
        let port = spec.api.port;
        let contents = DeferredResource::new("kubeconfig", vec![eip_key], move || {
            let server = format!("https://{}:{port}", address.as_string()?);
            Ok(kubeconfig(&cluster, &server).into_bytes())
        });
        add(
            spec,
            ctx,
            ManagedFile {
                name: scoped(spec, "kubeconfig"),
                location: spec.state_path("kubeconfig"),
                contents: wrap_resource(contents),
            },
        )?;

        if let Some(keystore) = &self.options.keystore {
            add(
                spec,
                ctx,
                ManagedFile {
                    name: scoped(spec, "ca"),
                    location: spec.state_path("pki/ca.crt"),
                    contents: wrap_resource(CertificateResource::new(keystore.clone(), CA_KEYSET)),
                },
            )?;
        }
        Ok(())
    }
}
