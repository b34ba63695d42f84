use anyhow::{Context, Result, bail};
use cloudup::ClusterSpec;
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

/// Cluster names end up in DNS names and cloud tags.
static CLUSTER_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9.]{0,61}[a-z0-9])?$").expect("cluster name regex is valid")
});

/// Supported cluster definition formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// Pick a format from the file extension; TOML unless it says `.json`.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::Json,
            _ => Self::Toml,
        }
    }
}

/// Parse a cluster definition in the given format and validate it.
pub fn parse_cluster(content: &str, format: ConfigFormat) -> Result<ClusterSpec> {
    let spec: ClusterSpec = match format {
        ConfigFormat::Toml => toml::from_str(content).context("Invalid TOML cluster definition")?,
        ConfigFormat::Json => {
            serde_json::from_str(content).context("Invalid JSON cluster definition")?
        }
    };
    if !CLUSTER_NAME.is_match(&spec.name) {
        bail!(
            "Invalid cluster name '{}': use lowercase letters, digits, '-' and '.'",
            spec.name
        );
    }
    spec.validate()?;
    Ok(spec)
}

/// Load and validate a cluster definition from disk.
pub fn load_cluster(path: &Path) -> Result<ClusterSpec> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Could not read {}", path.display()))?;
    let spec = parse_cluster(&content, ConfigFormat::from_path(path))
        .with_context(|| format!("Failed to load {}", path.display()))?;
    log::debug!("Loaded cluster {} from {}", spec.name, path.display());
    Ok(spec)
}
