//! Probe task and in-memory backend shared by the engine's tests.

use crate::context::Context;
use crate::diff::{Changeset, Diff};
use crate::error::{Error, Result};
use crate::lifecycle::Lifecycle;
use crate::resource::{Resource, ResourceHandle, TaskDependentResource, new_string_resource};
use crate::target::{RenderTarget, TargetKind};
use crate::task::{Change, Task, TaskKey};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub enum Fault {
    Permanent,
    Transient(u32),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeState {
    pub name: String,
    pub port: u16,
    pub description: String,
    pub peer: Option<String>,
    pub input: Option<String>,
}

#[derive(Debug, Default)]
pub struct TestBackend {
    objects: Mutex<BTreeMap<String, (String, ProbeState)>>,
    next_id: AtomicUsize,
    pub find_calls: AtomicUsize,
    pub render_calls: AtomicUsize,
    render_log: Mutex<Vec<String>>,
    render_faults: Mutex<BTreeMap<String, Fault>>,
    find_faults: Mutex<BTreeMap<String, Fault>>,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn take_fault(faults: &Mutex<BTreeMap<String, Fault>>, name: &str) -> Result<()> {
    let mut faults = lock(faults);
    match faults.get_mut(name) {
        Some(Fault::Permanent) => Err(Error::AccessDenied {
            message: format!("{name} is forbidden"),
        }),
        Some(Fault::Transient(left)) if *left > 0 => {
            *left -= 1;
            Err(Error::Throttled {
                message: format!("{name} throttled"),
            })
        }
        _ => Ok(()),
    }
}

impl TestBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str, state: ProbeState) -> String {
        let id = format!("id-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        lock(&self.objects).insert(name.to_string(), (id.clone(), state));
        id
    }

    pub fn get(&self, name: &str) -> Option<(String, ProbeState)> {
        lock(&self.objects).get(name).cloned()
    }

    pub fn remove(&self, name: &str) -> bool {
        lock(&self.objects).remove(name).is_some()
    }

    pub fn fail_render(&self, name: &str, fault: Fault) {
        lock(&self.render_faults).insert(name.to_string(), fault);
    }

    pub fn fail_find(&self, name: &str, fault: Fault) {
        lock(&self.find_faults).insert(name.to_string(), fault);
    }

    pub fn rendered(&self) -> Vec<String> {
        lock(&self.render_log).clone()
    }

    pub fn renders(&self) -> usize {
        self.render_calls.load(Ordering::SeqCst)
    }

    fn find(&self, name: &str) -> Result<Option<(String, ProbeState)>> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        take_fault(&self.find_faults, name)?;
        Ok(self.get(name))
    }

    fn put(&self, name: &str, state: ProbeState, delay: Duration) -> Result<String> {
        self.render_calls.fetch_add(1, Ordering::SeqCst);
        take_fault(&self.render_faults, name)?;

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(delay);
        self.active.fetch_sub(1, Ordering::SeqCst);

        lock(&self.render_log).push(name.to_string());
        let existing = self.get(name).map(|(id, _)| id);
        let id = match existing {
            Some(id) => {
                lock(&self.objects).insert(name.to_string(), (id.clone(), state));
                id
            }
            None => self.insert(name, state),
        };
        Ok(id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Probe {
    pub name: String,
    pub port: u16,
    pub description: String,
    pub deps: Vec<TaskKey>,
    pub peer: Option<TaskKey>,
    pub lifecycle: Lifecycle,
    pub immutable_port: bool,
    pub lock: Option<TaskKey>,
    pub address: Option<TaskDependentResource>,
    pub input: Option<ResourceHandle>,
    pub cloudformation: bool,
    pub delay_ms: u64,
}

pub fn probe_key(name: &str) -> TaskKey {
    TaskKey::new("Probe", name)
}

impl Probe {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            port: 80,
            description: String::new(),
            deps: Vec::new(),
            peer: None,
            lifecycle: Lifecycle::Sync,
            immutable_port: false,
            lock: None,
            address: None,
            input: None,
            cloudformation: true,
            delay_ms: 0,
        }
    }

    pub fn depends_on(mut self, names: &[&str]) -> Self {
        self.deps.extend(names.iter().map(|n| probe_key(n)));
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_peer(mut self, name: &str) -> Self {
        self.peer = Some(probe_key(name));
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn immutable_port(mut self) -> Self {
        self.immutable_port = true;
        self
    }

    pub fn locked_by(mut self, name: &str) -> Self {
        self.lock = Some(TaskKey::new("Lock", name));
        self
    }

    pub fn publishes(mut self, address: TaskDependentResource) -> Self {
        self.address = Some(address);
        self
    }

    pub fn consumes(mut self, input: ResourceHandle) -> Self {
        self.input = Some(input);
        self
    }

    pub fn without_cloudformation(mut self) -> Self {
        self.cloudformation = false;
        self
    }

    pub fn slow(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn state(&self) -> ProbeState {
        ProbeState {
            name: self.name.clone(),
            port: self.port,
            description: self.description.clone(),
            peer: None,
            input: None,
        }
    }
}

impl Task<TestBackend> for Probe {
    type State = ProbeState;

    fn kind(&self) -> &'static str {
        "Probe"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        let mut deps = self.deps.clone();
        deps.extend(self.peer.clone());
        if let Some(input) = &self.input {
            deps.extend(input.dependencies());
        }
        deps
    }

    fn lock_key(&self) -> Option<TaskKey> {
        self.lock.clone()
    }

    fn supports_target(&self, target: TargetKind) -> bool {
        target != TargetKind::CloudFormation || self.cloudformation
    }

    fn find(&self, ctx: &Context<'_, TestBackend>) -> Result<Option<ProbeState>> {
        let Some((id, state)) = ctx.api()?.find(&self.name)? else {
            return Ok(None);
        };
        ctx.publish(&Task::key(self), &id);
        if let Some(address) = &self.address {
            address.set(new_string_resource(id));
        }
        Ok(Some(state))
    }

    fn expected(&self, ctx: &Context<'_, TestBackend>) -> Result<ProbeState> {
        Ok(ProbeState {
            peer: self.peer.as_ref().map(|k| ctx.output(k)).transpose()?,
            input: self.input.as_ref().map(|r| r.as_string()).transpose()?,
            ..self.state()
        })
    }

    fn diff(&self, actual: Option<&ProbeState>, expected: &ProbeState) -> Changeset {
        Diff::new(actual, expected)
            .field("name", |s| &s.name)
            .field("port", |s| &s.port)
            .field("description", |s| &s.description)
            .field("peer", |s| &s.peer)
            .field("input", |s| &s.input)
            .finish()
    }

    fn check_changes(&self, change: &Change<'_, ProbeState>) -> Result<()> {
        if change.is_create() && change.expected.port == 0 {
            return Err(Error::required("port"));
        }
        if self.immutable_port && !change.is_create() && change.touches("port") {
            return Err(Error::cannot_change("port"));
        }
        Ok(())
    }

    fn render(
        &self,
        ctx: &Context<'_, TestBackend>,
        target: RenderTarget<'_, TestBackend>,
        change: &Change<'_, ProbeState>,
    ) -> Result<()> {
        let key = Task::key(self);
        match target {
            RenderTarget::Direct(api) => {
                let id = api.put(
                    &self.name,
                    change.expected.clone(),
                    Duration::from_millis(self.delay_ms),
                )?;
                ctx.publish(&key, &id);
                if let Some(address) = &self.address {
                    address.set(new_string_resource(id));
                }
            }
            RenderTarget::Terraform(w) => {
                let peer = match &self.peer {
                    Some(k) => Some(w.reference(k, "id")?),
                    None => None,
                };
                w.add_resource(
                    &key,
                    "test_probe",
                    &self.name,
                    json!({ "port": self.port, "peer": peer }),
                )?;
                if let Some(address) = &self.address {
                    address.set(new_string_resource(w.reference(&key, "id")?));
                }
            }
            RenderTarget::CloudFormation(w) => {
                let peer = match &self.peer {
                    Some(k) => Some(w.reference(k)?),
                    None => None,
                };
                w.add_resource(
                    &key,
                    "Test::Probe",
                    &self.name,
                    json!({ "Port": self.port, "Peer": peer }),
                )?;
            }
        }
        Ok(())
    }
}
