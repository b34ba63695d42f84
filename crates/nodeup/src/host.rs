//! The node a nodeup run converges.

use crate::services::ServiceManager;
use std::fmt;
use std::path::{Path, PathBuf};

/// Provider context for node tasks: a filesystem root plus an init system.
///
/// Task paths are absolute paths on the node; they are resolved under
/// `root`, which is `/` on a real node and a scratch directory in tests.
pub struct NodeHost {
    root: PathBuf,
    services: Box<dyn ServiceManager>,
}

impl NodeHost {
    pub fn new(root: impl Into<PathBuf>, services: impl ServiceManager + 'static) -> Self {
        Self {
            root: root.into(),
            services: Box::new(services),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a node path onto the host filesystem
    pub fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    pub fn services(&self) -> &dyn ServiceManager {
        self.services.as_ref()
    }
}

impl fmt::Debug for NodeHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeHost").field("root", &self.root).finish_non_exhaustive()
    }
}
