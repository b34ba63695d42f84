use crate::cli::ClusterArgs;
use crate::config;
use crate::paths;
use crate::state::History;
use anyhow::{Context as _, Result};
use cloudup::{ClusterSpec, CloudApi, MemoryCloud, ModelOptions, build_cluster_graph};
use converge::{Context, Graph, Keystore, MemoryKeystore, Target, TargetKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Everything one command needs about a cluster: its definition, keys and
/// the saved provider state.
pub struct Session {
    pub spec: ClusterSpec,
    pub keystore: Option<Arc<MemoryKeystore>>,
    pub cloud: MemoryCloud,
    pub state_dir: PathBuf,
}

impl Session {
    /// Open a session from command-line arguments and the default state directory.
    pub fn open(args: &ClusterArgs) -> Result<Self> {
        Self::open_in(args, &paths::state_dir()?)
    }

    pub fn open_in(args: &ClusterArgs, state_dir: &Path) -> Result<Self> {
        let spec = config::load_cluster(&paths::expand(&args.config.to_string_lossy()))?;

        let keystore = match &args.pki {
            Some(dir) => {
                let dir = paths::expand(&dir.to_string_lossy());
                let store = MemoryKeystore::load_dir(&dir)
                    .with_context(|| format!("Failed to load keys from {}", dir.display()))?;
                Some(Arc::new(store))
            }
            None => None,
        };

        let cloud_file = paths::cloud_file(state_dir, &spec.name);
        let cloud = MemoryCloud::open(&spec.region, &cloud_file)
            .with_context(|| format!("Failed to open provider state {}", cloud_file.display()))?;

        Ok(Self {
            spec,
            keystore,
            cloud,
            state_dir: state_dir.to_path_buf(),
        })
    }

    pub fn model_options(&self, target: TargetKind) -> ModelOptions {
        let options = ModelOptions::for_target(target);
        match &self.keystore {
            Some(keystore) => options.with_keystore(keystore.clone() as Arc<dyn Keystore>),
            None => options,
        }
    }

    /// Build the cluster's task graph for `target`.
    pub fn graph(&self, target: TargetKind) -> Result<Graph<dyn CloudApi>> {
        build_cluster_graph(&self.spec, &self.model_options(target))
            .with_context(|| format!("Failed to build task graph for {}", self.spec.name))
    }

    /// Execution context for `target`, carrying the keystore and cluster name.
    pub fn context<'a>(&'a self, target: Target<'a, dyn CloudApi>) -> Context<'a, dyn CloudApi> {
        let ctx = Context::new(target).with_cluster_name(&self.spec.name);
        match &self.keystore {
            Some(keystore) => ctx.with_keystore(&**keystore),
            None => ctx,
        }
    }

    pub fn api(&self) -> &(dyn CloudApi + 'static) {
        &self.cloud
    }

    pub fn history(&self) -> Result<History> {
        History::load(&paths::history_file(&self.state_dir, &self.spec.name))
    }
}
