//! CloudFormation template emission.

use crate::error::{Error, Result};
use crate::task::TaskKey;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Name of the template written by [`CloudFormationWriter::write_to`].
pub const CLOUDFORMATION_FILE: &str = "kubernetes.json";

#[derive(Debug, Clone)]
enum Address {
    Logical(String),
    Literal(Value),
}

#[derive(Debug, Default)]
struct State {
    resources: BTreeMap<String, Value>,
    addresses: BTreeMap<TaskKey, Address>,
    outputs: BTreeMap<String, Value>,
}

/// Collects rendered resources into a CloudFormation template.
#[derive(Debug, Default)]
pub struct CloudFormationWriter {
    state: Mutex<State>,
}

/// Logical id for a resource: the type without separators followed by the
/// alphanumeric characters of the name, e.g. `AWSEC2VPCmainexamplecom`.
pub fn logical_id(resource_type: &str, name: &str) -> String {
    let mut id: String = resource_type.replace("::", "");
    id.extend(name.chars().filter(char::is_ascii_alphanumeric));
    id
}

impl CloudFormationWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register the resource a task rendered to and return its logical id.
    pub fn add_resource(
        &self,
        key: &TaskKey,
        resource_type: &str,
        name: &str,
        properties: Value,
    ) -> Result<String> {
        let id = logical_id(resource_type, name);
        let body = json!({ "Type": resource_type, "Properties": properties });
        let mut state = self.lock();
        if let Some(existing) = state.resources.get(&id)
            && existing != &body
        {
            return Err(Error::Other(format!(
                "cloudformation resource {id} registered twice with different properties"
            )));
        }
        state.resources.insert(id.clone(), body);
        state
            .addresses
            .insert(key.clone(), Address::Logical(id.clone()));
        log::debug!("cloudformation: {key} -> {id}");
        Ok(id)
    }

    /// Record a plain value for a task that does not emit a resource.
    pub fn add_literal(&self, key: &TaskKey, value: impl Into<String>) {
        self.lock()
            .addresses
            .insert(key.clone(), Address::Literal(Value::String(value.into())));
    }

    /// `{"Ref": id}` for a task that has already rendered.
    pub fn reference(&self, key: &TaskKey) -> Result<Value> {
        match self.lock().addresses.get(key) {
            Some(Address::Logical(id)) => Ok(json!({ "Ref": id })),
            Some(Address::Literal(value)) => Ok(value.clone()),
            None => Err(Error::ResourceNotReady { owner: key.clone() }),
        }
    }

    /// `{"Fn::GetAtt": [id, attr]}` for a task that has already rendered.
    pub fn get_att(&self, key: &TaskKey, attr: &str) -> Result<Value> {
        match self.lock().addresses.get(key) {
            Some(Address::Logical(id)) => Ok(json!({ "Fn::GetAtt": [id, attr] })),
            Some(Address::Literal(value)) => Ok(value.clone()),
            None => Err(Error::ResourceNotReady { owner: key.clone() }),
        }
    }

    pub fn add_output(&self, name: &str, value: Value) {
        let id: String = name.chars().filter(char::is_ascii_alphanumeric).collect();
        self.lock().outputs.insert(id, json!({ "Value": value }));
    }

    /// Number of registered resources.
    pub fn resource_count(&self) -> usize {
        self.lock().resources.len()
    }

    /// Build the template document.
    pub fn template(&self) -> Value {
        let state = self.lock();
        let mut doc = Map::new();
        doc.insert(
            "AWSTemplateFormatVersion".to_string(),
            json!("2010-09-09"),
        );
        doc.insert("Resources".to_string(), json!(state.resources));
        if !state.outputs.is_empty() {
            doc.insert("Outputs".to_string(), json!(state.outputs));
        }
        Value::Object(doc)
    }

    /// Write `kubernetes.json` into `dir`.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        let path = dir.join(CLOUDFORMATION_FILE);
        let content = serde_json::to_string_pretty(&self.template())?;
        fs::write(&path, content).map_err(|e| Error::io(&path, e))?;
        log::info!("Wrote cloudformation template to {}", path.display());
        Ok(path)
    }
}
