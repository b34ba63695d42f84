//! Path resolution for kubeforge
//!
//! # Environment Variables
//!
//! - `KUBEFORGE_STATE_DIR` - Override the state directory
//!
//! For state_dir():
//! 1. `KUBEFORGE_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/kubeforge` (if set)
//! 3. Platform default:
//!    - Windows: `%LOCALAPPDATA%\kubeforge`
//!    - macOS/Linux: `~/.local/state/kubeforge`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "KUBEFORGE_STATE_DIR";

/// Get the kubeforge state directory path
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join("kubeforge");
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(local_app_data) = dirs::data_local_dir() {
            let path = local_app_data.join("kubeforge");
            log::debug!("Using Windows state dir: {}", path.display());
            return Ok(path);
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("state").join("kubeforge");
    log::debug!("Using default state dir: {}", path.display());
    Ok(path)
}

/// Directory holding everything kubeforge keeps about one cluster.
pub fn cluster_dir(state_dir: &Path, cluster: &str) -> PathBuf {
    state_dir.join(cluster)
}

/// Saved provider state for a cluster.
pub fn cloud_file(state_dir: &Path, cluster: &str) -> PathBuf {
    cluster_dir(state_dir, cluster).join("cloud.json")
}

/// Run history for a cluster.
pub fn history_file(state_dir: &Path, cluster: &str) -> PathBuf {
    cluster_dir(state_dir, cluster).join("history.toml")
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_files() {
        let root = Path::new("/var/lib/kubeforge");
        assert_eq!(
            cloud_file(root, "demo"),
            PathBuf::from("/var/lib/kubeforge/demo/cloud.json")
        );
        assert_eq!(
            history_file(root, "demo"),
            PathBuf::from("/var/lib/kubeforge/demo/history.toml")
        );
    }

    #[test]
    fn test_expand_plain_path() {
        assert_eq!(expand("/tmp/state"), PathBuf::from("/tmp/state"));
    }

    #[test]
    fn test_expand_tilde() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand("~/state"), home.join("state"));
        }
    }
}
