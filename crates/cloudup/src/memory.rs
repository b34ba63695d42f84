//! An emulated provider kept in memory and optionally persisted as JSON.
//!
//! Used by tests and by the CLI as its local provider. It behaves like a
//! small, strict cloud: ids are assigned on create, names are unique per
//! kind, and deleting an object other objects still reference fails with a
//! dependency violation.

use crate::api::{CloudApi, CloudResource};
use converge::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Provider call, for fault injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Op {
    Find,
    Create,
    Update,
    Delete,
    List,
    GetObject,
    PutObject,
    DeleteObject,
}

/// Error a faulty call returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Throttle,
    Unavailable,
    NotFoundYet,
    AccessDenied,
    QuotaExceeded,
}

impl FaultKind {
    fn to_error(self, op: Op, kind: &str) -> Error {
        let message = format!("{op:?} {kind}");
        match self {
            Self::Throttle => Error::from_status(429, message),
            Self::Unavailable => Error::from_status(503, message),
            Self::NotFoundYet => Error::NotFoundYet { message },
            Self::AccessDenied => Error::from_status(403, message),
            Self::QuotaExceeded => Error::QuotaExceeded { message },
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CloudState {
    next_id: u64,
    resources: BTreeMap<String, CloudResource>,
    objects: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug)]
struct Fault {
    op: Op,
    kind: String,
    fault: FaultKind,
    remaining: u32,
}

#[derive(Debug)]
pub struct MemoryCloud {
    region: String,
    path: Option<PathBuf>,
    state: Mutex<CloudState>,
    faults: Mutex<Vec<Fault>>,
    calls: Mutex<BTreeMap<Op, usize>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn id_prefix(kind: &str) -> String {
    match kind {
        "Vpc" => "vpc".to_string(),
        "Subnet" => "subnet".to_string(),
        "SecurityGroup" => "sg".to_string(),
        "SecurityGroupRule" => "sgr".to_string(),
        "ElasticIp" => "eipalloc".to_string(),
        "LaunchTemplate" => "lt".to_string(),
        "IamRole" => "role".to_string(),
        other => other.to_ascii_lowercase(),
    }
}

impl MemoryCloud {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            path: None,
            state: Mutex::new(CloudState::default()),
            faults: Mutex::new(Vec::new()),
            calls: Mutex::new(BTreeMap::new()),
        }
    }

    /// Load the provider state saved at `path`, or start empty.
    pub fn open(region: impl Into<String>, path: &Path) -> Result<Self> {
        let mut cloud = Self::new(region);
        if path.exists() {
            let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
            cloud.state = Mutex::new(serde_json::from_str(&text)?);
        }
        cloud.path = Some(path.to_path_buf());
        Ok(cloud)
    }

    /// Persist the state to the path it was opened from.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let text = serde_json::to_string_pretty(&*lock(&self.state))?;
        fs::write(path, text).map_err(|e| Error::io(path, e))?;
        log::debug!("Saved provider state to {}", path.display());
        Ok(())
    }

    /// Make the next `count` calls of `op` on `kind` fail.
    pub fn fail(&self, op: Op, kind: &str, fault: FaultKind, count: u32) {
        lock(&self.faults).push(Fault {
            op,
            kind: kind.to_string(),
            fault,
            remaining: count,
        });
    }

    pub fn calls(&self, op: Op) -> usize {
        lock(&self.calls).get(&op).copied().unwrap_or(0)
    }

    /// Calls that changed provider state
    pub fn mutations(&self) -> usize {
        [Op::Create, Op::Update, Op::Delete, Op::PutObject, Op::DeleteObject]
            .into_iter()
            .map(|op| self.calls(op))
            .sum()
    }

    /// Add an object created outside the cluster (a shared VPC, say).
    pub fn insert_external(&self, kind: &str, name: &str, properties: Map<String, Value>) -> String {
        let mut state = lock(&self.state);
        let id = Self::next_id(&mut state, kind);
        state.resources.insert(
            id.clone(),
            CloudResource {
                kind: kind.to_string(),
                id: id.clone(),
                name: name.to_string(),
                tags: BTreeMap::new(),
                properties,
            },
        );
        id
    }

    pub fn resources(&self, kind: &str) -> Vec<CloudResource> {
        lock(&self.state)
            .resources
            .values()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect()
    }

    pub fn object(&self, location: &str) -> Option<Vec<u8>> {
        lock(&self.state).objects.get(location).cloned()
    }

    fn next_id(state: &mut CloudState, kind: &str) -> String {
        state.next_id += 1;
        format!("{}-{:08x}", id_prefix(kind), state.next_id)
    }

    fn call(&self, op: Op, kind: &str) -> Result<()> {
        *lock(&self.calls).entry(op).or_default() += 1;
        let mut faults = lock(&self.faults);
        if let Some(fault) = faults
            .iter_mut()
            .find(|f| f.op == op && f.kind == kind && f.remaining > 0)
        {
            fault.remaining -= 1;
            return Err(fault.fault.to_error(op, kind));
        }
        Ok(())
    }
}

impl CloudApi for MemoryCloud {
    fn region(&self) -> &str {
        &self.region
    }

    fn find_by_name(&self, kind: &str, name: &str) -> Result<Option<CloudResource>> {
        self.call(Op::Find, kind)?;
        Ok(lock(&self.state)
            .resources
            .values()
            .find(|r| r.kind == kind && r.name == name)
            .cloned())
    }

    fn get(&self, kind: &str, id: &str) -> Result<Option<CloudResource>> {
        self.call(Op::Find, kind)?;
        Ok(lock(&self.state)
            .resources
            .get(id)
            .filter(|r| r.kind == kind)
            .cloned())
    }

    fn create(
        &self,
        kind: &str,
        name: &str,
        tags: BTreeMap<String, String>,
        mut properties: Map<String, Value>,
    ) -> Result<CloudResource> {
        self.call(Op::Create, kind)?;
        let mut state = lock(&self.state);
        if state
            .resources
            .values()
            .any(|r| r.kind == kind && r.name == name)
        {
            return Err(Error::InvalidRequest {
                message: format!("{kind} {name} already exists"),
            });
        }
        let id = Self::next_id(&mut state, kind);
        if kind == "ElasticIp" {
            let host = state.next_id % 254 + 1;
            properties.insert("public_ip".to_string(), Value::from(format!("203.0.113.{host}")));
        }
        let resource = CloudResource {
            kind: kind.to_string(),
            id: id.clone(),
            name: name.to_string(),
            tags,
            properties,
        };
        state.resources.insert(id, resource.clone());
        Ok(resource)
    }

    fn update(
        &self,
        kind: &str,
        id: &str,
        tags: BTreeMap<String, String>,
        properties: Map<String, Value>,
    ) -> Result<CloudResource> {
        self.call(Op::Update, kind)?;
        let mut state = lock(&self.state);
        let resource = state
            .resources
            .get_mut(id)
            .filter(|r| r.kind == kind)
            .ok_or_else(|| Error::NotFound {
                message: format!("{kind} {id}"),
            })?;
        resource.tags = tags;
        resource.properties.extend(properties);
        Ok(resource.clone())
    }

    fn delete(&self, kind: &str, id: &str) -> Result<()> {
        self.call(Op::Delete, kind)?;
        let mut state = lock(&self.state);
        if !state.resources.get(id).is_some_and(|r| r.kind == kind) {
            return Err(Error::NotFound {
                message: format!("{kind} {id}"),
            });
        }
        let referenced_by = state.resources.values().find(|r| {
            r.id != id
                && r.properties
                    .iter()
                    .any(|(k, v)| k.ends_with("_id") && v.as_str() == Some(id))
        });
        if let Some(other) = referenced_by {
            return Err(Error::InvalidRequest {
                message: format!("DependencyViolation: {id} is still used by {}", other.id),
            });
        }
        state.resources.remove(id);
        Ok(())
    }

    fn list_owned(&self, cluster: &str) -> Result<Vec<CloudResource>> {
        self.call(Op::List, "*")?;
        Ok(lock(&self.state)
            .resources
            .values()
            .filter(|r| r.owned_by(cluster))
            .cloned()
            .collect())
    }

    fn get_object(&self, location: &str) -> Result<Option<Vec<u8>>> {
        self.call(Op::GetObject, "object")?;
        Ok(self.object(location))
    }

    fn put_object(&self, location: &str, data: &[u8]) -> Result<()> {
        self.call(Op::PutObject, "object")?;
        lock(&self.state)
            .objects
            .insert(location.to_string(), data.to_vec());
        Ok(())
    }

    fn delete_object(&self, location: &str) -> Result<()> {
        self.call(Op::DeleteObject, "object")?;
        lock(&self.state).objects.remove(location);
        Ok(())
    }
}
