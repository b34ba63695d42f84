//! Provider seam for cloud tasks.
//!
//! Objects are addressed generically by kind and id; the kind strings match
//! the task kinds (`"Vpc"`, `"Subnet"`, ...) so that owned objects listed by
//! the provider can be matched against graph keys when pruning.

use converge::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Tag marking an object as owned by a cluster.
pub fn cluster_tag(cluster: &str) -> (String, String) {
    (format!("kubernetes.io/cluster/{cluster}"), "owned".to_string())
}

pub const NAME_TAG: &str = "Name";

/// A provider object as the API reports it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloudResource {
    pub kind: String,
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl CloudResource {
    pub fn str_property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(Value::as_str)
    }

    pub fn u64_property(&self, name: &str) -> Option<u64> {
        self.properties.get(name).and_then(Value::as_u64)
    }

    pub fn owned_by(&self, cluster: &str) -> bool {
        let (key, value) = cluster_tag(cluster);
        self.tags.get(&key) == Some(&value)
    }
}

/// The calls cloud tasks make against a provider.
///
/// Errors are classified through [`converge::Error`] so the engine can tell
/// throttling from permission problems.
pub trait CloudApi: Send + Sync {
    fn region(&self) -> &str;

    /// Look an object up by the name it was created with
    fn find_by_name(&self, kind: &str, name: &str) -> Result<Option<CloudResource>>;

    fn get(&self, kind: &str, id: &str) -> Result<Option<CloudResource>>;

    /// Create an object and return it with its assigned id
    fn create(
        &self,
        kind: &str,
        name: &str,
        tags: BTreeMap<String, String>,
        properties: Map<String, Value>,
    ) -> Result<CloudResource>;

    /// Replace tags and merge properties of an existing object
    fn update(
        &self,
        kind: &str,
        id: &str,
        tags: BTreeMap<String, String>,
        properties: Map<String, Value>,
    ) -> Result<CloudResource>;

    fn delete(&self, kind: &str, id: &str) -> Result<()>;

    /// Every object tagged as owned by the cluster
    fn list_owned(&self, cluster: &str) -> Result<Vec<CloudResource>>;

    fn get_object(&self, location: &str) -> Result<Option<Vec<u8>>>;

    fn put_object(&self, location: &str, data: &[u8]) -> Result<()>;

    fn delete_object(&self, location: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owned_by() {
        let (key, value) = cluster_tag("demo");
        let resource = CloudResource {
            kind: "Vpc".to_string(),
            tags: BTreeMap::from([(key, value)]),
            ..Default::default()
        };
        assert!(resource.owned_by("demo"));
        assert!(!resource.owned_by("other"));
    }
}
