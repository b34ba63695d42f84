//! Terraform JSON emission.
//!
//! Tasks rendered against this target register resources instead of calling
//! the provider. References between tasks become `${type.name.attr}`
//! interpolations, so the emitted document is self-contained.

use super::sanitize_name;
use crate::error::{Error, Result};
use crate::task::TaskKey;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Name of the main file written by [`TerraformWriter::write_to`].
pub const TERRAFORM_FILE: &str = "kubernetes.tf.json";

#[derive(Debug, Clone)]
enum Address {
    Resource { kind: String, name: String },
    Literal(String),
}

#[derive(Debug, Default)]
struct State {
    provider: Option<(String, Value)>,
    resources: BTreeMap<String, BTreeMap<String, Value>>,
    addresses: BTreeMap<TaskKey, Address>,
    outputs: BTreeMap<String, Value>,
    files: BTreeMap<String, Vec<u8>>,
    /// Interpolations handed out by `reference`
    issued: BTreeSet<String>,
}

/// Collects rendered resources and writes them as Terraform JSON.
#[derive(Debug, Default)]
pub struct TerraformWriter {
    state: Mutex<State>,
}

impl TerraformWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Set the provider block, e.g. `("aws", {"region": "us-east-1"})`.
    pub fn set_provider(&self, name: &str, body: Value) {
        self.lock().provider = Some((name.to_string(), body));
    }

    /// Register the resource a task rendered to.
    ///
    /// Returns the sanitized resource name. Registering a different body
    /// under an existing address fails.
    pub fn add_resource(
        &self,
        key: &TaskKey,
        resource_type: &str,
        name: &str,
        body: Value,
    ) -> Result<String> {
        let name = sanitize_name(name);
        let mut state = self.lock();
        let by_name = state
            .resources
            .entry(resource_type.to_string())
            .or_default();
        if let Some(existing) = by_name.get(&name)
            && existing != &body
        {
            return Err(Error::Other(format!(
                "terraform resource {resource_type}.{name} registered twice with different bodies"
            )));
        }
        by_name.insert(name.clone(), body);
        state.addresses.insert(
            key.clone(),
            Address::Resource {
                kind: resource_type.to_string(),
                name: name.clone(),
            },
        );
        log::debug!("terraform: {key} -> {resource_type}.{name}");
        Ok(name)
    }

    /// Record a plain value for a task that does not emit a resource
    /// (an object that already exists outside the cluster).
    pub fn add_literal(&self, key: &TaskKey, value: impl Into<String>) {
        self.lock()
            .addresses
            .insert(key.clone(), Address::Literal(value.into()));
    }

    /// Interpolation for an attribute of a task that has already rendered.
    pub fn reference(&self, key: &TaskKey, attr: &str) -> Result<String> {
        let mut state = self.lock();
        let reference = match state.addresses.get(key) {
            Some(Address::Resource { kind, name }) => format!("${{{kind}.{name}.{attr}}}"),
            Some(Address::Literal(value)) => return Ok(value.clone()),
            None => return Err(Error::ResourceNotReady { owner: key.clone() }),
        };
        state.issued.insert(reference.clone());
        Ok(reference)
    }

    /// Expression for a text attribute holding `contents`.
    ///
    /// Text that embeds interpolations from [`Self::reference`] is inlined
    /// so Terraform resolves them, with every other `${` and `%{` escaped.
    /// Anything else is stored as a data file and read with `file()`.
    pub fn text_content(&self, resource_type: &str, name: &str, suffix: &str, contents: &[u8]) -> String {
        if let Ok(text) = std::str::from_utf8(contents) {
            let embedded: Vec<String> = self
                .lock()
                .issued
                .iter()
                .filter(|reference| text.contains(reference.as_str()))
                .cloned()
                .collect();
            if !embedded.is_empty() {
                let mut inline = text.replace("${", "$${").replace("%{", "%%{");
                for reference in &embedded {
                    inline = inline.replace(&format!("${reference}"), reference);
                }
                return inline;
            }
        }
        Self::file(&self.add_file(resource_type, name, suffix, contents))
    }

    pub fn add_output(&self, name: &str, value: Value) {
        self.lock()
            .outputs
            .insert(sanitize_name(name), json!({ "value": value }));
    }

    /// Store a data file next to the main document and return its
    /// module-relative path, suitable for `file()` or `filebase64()`.
    pub fn add_file(&self, resource_type: &str, name: &str, suffix: &str, contents: &[u8]) -> String {
        let file_name = format!("{resource_type}_{}_{suffix}", sanitize_name(name));
        self.lock()
            .files
            .insert(file_name.clone(), contents.to_vec());
        format!("${{path.module}}/data/{file_name}")
    }

    /// Expression reading a data file as base64.
    pub fn filebase64(path: &str) -> String {
        format!("${{filebase64(\"{path}\")}}")
    }

    /// Expression reading a data file as text.
    pub fn file(path: &str) -> String {
        format!("${{file(\"{path}\")}}")
    }

    /// Number of registered resources.
    pub fn resource_count(&self) -> usize {
        self.lock().resources.values().map(BTreeMap::len).sum()
    }

    /// Build the Terraform JSON document.
    pub fn to_json(&self) -> Value {
        let state = self.lock();
        let mut doc = Map::new();

        if let Some((name, body)) = &state.provider {
            let mut provider = Map::new();
            provider.insert(name.clone(), body.clone());
            doc.insert("provider".to_string(), Value::Object(provider));
        }
        if !state.resources.is_empty() {
            doc.insert("resource".to_string(), json!(state.resources));
        }
        if !state.outputs.is_empty() {
            doc.insert("output".to_string(), json!(state.outputs));
        }
        doc.insert(
            "terraform".to_string(),
            json!({ "required_version": ">= 0.15.0" }),
        );
        Value::Object(doc)
    }

    /// Write `kubernetes.tf.json` and any data files into `dir`.
    pub fn write_to(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;

        let mut written = Vec::new();
        let main = dir.join(TERRAFORM_FILE);
        let content = serde_json::to_string_pretty(&self.to_json())?;
        fs::write(&main, content).map_err(|e| Error::io(&main, e))?;
        written.push(main);

        let files = self.lock().files.clone();
        if !files.is_empty() {
            let data_dir = dir.join("data");
            fs::create_dir_all(&data_dir).map_err(|e| Error::io(&data_dir, e))?;
            for (name, contents) in files {
                let path = data_dir.join(name);
                fs::write(&path, contents).map_err(|e| Error::io(&path, e))?;
                written.push(path);
            }
        }

        log::info!("Wrote {} terraform file(s) to {}", written.len(), dir.display());
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_reference_after_add() {
        let writer = TerraformWriter::new();
        let key = TaskKey::new("Vpc", "main.example.com");
        writer
            .add_resource(&key, "aws_vpc", "main.example.com", json!({"cidr_block": "10.0.0.0/16"}))
            .unwrap();

        assert_eq!(
            writer.reference(&key, "id").unwrap(),
            "${aws_vpc.main-example-com.id}"
        );
    }

    #[test]
    fn test_text_with_references_is_inlined() {
        let writer = TerraformWriter::new();
        let key = TaskKey::new("ElasticIp", "api");
        writer.add_resource(&key, "aws_eip", "api", json!({"domain": "vpc"})).unwrap();
        let address = writer.reference(&key, "public_ip").unwrap();

        let text = format!("server: https://{address}:443\nuser: ${{HOME}}\n");
        let content = writer.text_content("aws_s3_object", "kubeconfig", "content", text.as_bytes());
        assert_eq!(
            content,
            "server: https://${aws_eip.api.public_ip}:443\nuser: $${HOME}\n"
        );
        assert!(writer.lock().files.is_empty());
    }

    #[test]
    fn test_plain_text_goes_to_data_file() {
        let writer = TerraformWriter::new();
        let content = writer.text_content("aws_s3_object", "ca", "content", b"-----BEGIN-----\n");
        assert_eq!(
            content,
            "${file(\"${path.module}/data/aws_s3_object_ca_content\")}"
        );
        assert_eq!(writer.lock().files.len(), 1);
    }

    #[test]
    fn test_reference_before_add_fails() {
        let writer = TerraformWriter::new();
        let err = writer
            .reference(&TaskKey::new("Vpc", "main"), "id")
            .unwrap_err();
        assert!(matches!(err, Error::ResourceNotReady { .. }));
    }

    #[test]
    fn test_literal_reference() {
        let writer = TerraformWriter::new();
        let key = TaskKey::new("Vpc", "shared");
        writer.add_literal(&key, "vpc-123");
        assert_eq!(writer.reference(&key, "id").unwrap(), "vpc-123");
        assert_eq!(writer.resource_count(), 0);
    }

    #[test]
    fn test_conflicting_bodies_rejected() {
        let writer = TerraformWriter::new();
        let key = TaskKey::new("Vpc", "main");
        writer
            .add_resource(&key, "aws_vpc", "main", json!({"a": 1}))
            .unwrap();
        writer
            .add_resource(&key, "aws_vpc", "main", json!({"a": 1}))
            .unwrap();
        assert!(
            writer
                .add_resource(&key, "aws_vpc", "main", json!({"a": 2}))
                .is_err()
        );
    }

    #[test]
    fn test_write_to_dir() {
        let temp = TempDir::new().unwrap();
        let writer = TerraformWriter::new();
        writer.set_provider("aws", json!({"region": "us-east-1"}));
        let key = TaskKey::new("LaunchTemplate", "nodes");
        let path = writer.add_file("aws_launch_template", "nodes", "user_data", b"#!/bin/sh\n");
        writer
            .add_resource(
                &key,
                "aws_launch_template",
                "nodes",
                json!({"user_data": TerraformWriter::filebase64(&path)}),
            )
            .unwrap();
        writer.add_output("cluster_name", json!("example"));

        let written = writer.write_to(temp.path()).unwrap();
        assert_eq!(written.len(), 2);

        let doc: Value =
            serde_json::from_str(&fs::read_to_string(temp.path().join(TERRAFORM_FILE)).unwrap())
                .unwrap();
        assert_eq!(doc["provider"]["aws"]["region"], "us-east-1");
        assert_eq!(
            doc["resource"]["aws_launch_template"]["nodes"]["user_data"],
            "${filebase64(\"${path.module}/data/aws_launch_template_nodes_user_data\")}"
        );
        assert_eq!(doc["output"]["cluster_name"]["value"], "example");
        assert_eq!(
            fs::read(temp.path().join("data/aws_launch_template_nodes_user_data")).unwrap(),
            b"#!/bin/sh\n"
        );
    }
}
