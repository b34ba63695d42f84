//! Resources: lazily readable byte sources consumed by tasks.
//!
//! A resource may be a literal, a local file, a download, or a value that
//! only exists once another task has run. Every resource reports the tasks
//! it needs, so embedding one in a task adds the right graph edges.

use crate::error::{Error, Result};
use crate::task::TaskKey;
use std::fmt;
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

/// Maximum size of a downloaded resource (512 MiB)
const MAX_DOWNLOAD_SIZE: u64 = 512 * 1024 * 1024;

/// A byte-producing value.
pub trait Resource: fmt::Debug + Send + Sync {
    /// Produce the bytes.
    fn as_bytes(&self) -> Result<Vec<u8>>;

    /// Produce the bytes as UTF-8 text.
    fn as_string(&self) -> Result<String> {
        String::from_utf8(self.as_bytes()?)
            .map_err(|e| Error::Other(format!("resource is not valid UTF-8: {e}")))
    }

    /// Tasks that must run before this resource can be read.
    fn dependencies(&self) -> Vec<TaskKey> {
        Vec::new()
    }
}

/// Shared handle to a resource.
///
/// Two handles are equal when they point at the same resource or their
/// resources have the same debug rendering (same literal, same path, same
/// owner).
#[derive(Clone)]
pub struct ResourceHandle(Arc<dyn Resource>);

impl ResourceHandle {
    pub fn new(resource: impl Resource + 'static) -> Self {
        Self(Arc::new(resource))
    }
}

impl Deref for ResourceHandle {
    type Target = dyn Resource;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl PartialEq for ResourceHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || format!("{:?}", self.0) == format!("{:?}", other.0)
    }
}

impl Resource for ResourceHandle {
    fn as_bytes(&self) -> Result<Vec<u8>> {
        self.0.as_bytes()
    }

    fn as_string(&self) -> Result<String> {
        self.0.as_string()
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        self.0.dependencies()
    }
}

/// Resource holding a string literal.
pub fn new_string_resource(value: impl Into<String>) -> ResourceHandle {
    ResourceHandle::new(StringResource(value.into()))
}

/// Resource holding raw bytes.
pub fn new_bytes_resource(value: impl Into<Vec<u8>>) -> ResourceHandle {
    ResourceHandle::new(BytesResource(value.into()))
}

/// Wrap any resource in a shareable handle.
pub fn wrap_resource(resource: impl Resource + 'static) -> ResourceHandle {
    ResourceHandle::new(resource)
}

/// Hex blake3 digest of a resource's bytes.
pub fn hash_resource(resource: &dyn Resource) -> Result<String> {
    Ok(blake3::hash(&resource.as_bytes()?).to_hex().to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringResource(pub String);

impl Resource for StringResource {
    fn as_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.0.as_bytes().to_vec())
    }

    fn as_string(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct BytesResource(pub Vec<u8>);

impl fmt::Debug for BytesResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BytesResource(blake3:{})", blake3::hash(&self.0).to_hex())
    }
}

impl Resource for BytesResource {
    fn as_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.0.clone())
    }
}

/// Contents of a local file, read on every access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileResource {
    pub path: PathBuf,
}

impl FileResource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Resource for FileResource {
    fn as_bytes(&self) -> Result<Vec<u8>> {
        std::fs::read(&self.path).map_err(|e| Error::io(&self.path, e))
    }
}

type Producer = dyn Fn() -> Result<Vec<u8>> + Send + Sync;

/// Bytes computed by a closure when first needed.
#[derive(Clone)]
pub struct DeferredResource {
    label: String,
    dependencies: Vec<TaskKey>,
    produce: Arc<Producer>,
}

impl DeferredResource {
    /// `label` identifies the value in debug output and equality checks.
    pub fn new(
        label: impl Into<String>,
        dependencies: Vec<TaskKey>,
        produce: impl Fn() -> Result<Vec<u8>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            dependencies,
            produce: Arc::new(produce),
        }
    }
}

impl fmt::Debug for DeferredResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredResource")
            .field("label", &self.label)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

impl Resource for DeferredResource {
    fn as_bytes(&self) -> Result<Vec<u8>> {
        (self.produce)()
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        self.dependencies.clone()
    }
}

/// The blake3 hex digest of another resource.
#[derive(Debug, Clone, PartialEq)]
pub struct HashedResource {
    pub inner: ResourceHandle,
}

impl Resource for HashedResource {
    fn as_bytes(&self) -> Result<Vec<u8>> {
        Ok(hash_resource(&*self.inner)?.into_bytes())
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        self.inner.dependencies()
    }
}

/// Several resources read back to back.
#[derive(Debug, Clone, PartialEq)]
pub struct ConcatResource {
    pub parts: Vec<ResourceHandle>,
}

impl Resource for ConcatResource {
    fn as_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for part in &self.parts {
            out.extend(part.as_bytes()?);
        }
        Ok(out)
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        let mut deps: Vec<TaskKey> = self.parts.iter().flat_map(|p| p.dependencies()).collect();
        deps.sort();
        deps.dedup();
        deps
    }
}

/// A file downloaded over HTTP, optionally verified against a blake3 digest.
///
/// The body is fetched once and cached for the life of the resource.
pub struct UrlResource {
    url: String,
    hash: Option<String>,
    cache: Mutex<Option<Vec<u8>>>,
}

impl UrlResource {
    pub fn new(url: impl Into<String>, hash: Option<String>) -> Self {
        Self {
            url: url.into(),
            hash,
            cache: Mutex::new(None),
        }
    }

    fn download(&self) -> Result<Vec<u8>> {
        log::debug!("Downloading {}", self.url);
        let agent = ureq::Agent::new_with_defaults();
        let mut response = agent
            .get(&self.url)
            .header("User-Agent", "kubeforge")
            .call()?;
        let bytes = response
            .body_mut()
            .with_config()
            .limit(MAX_DOWNLOAD_SIZE)
            .read_to_vec()?;

        if let Some(expected) = &self.hash {
            let actual = blake3::hash(&bytes).to_hex().to_string();
            if &actual != expected {
                return Err(Error::HashMismatch {
                    location: self.url.clone(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        Ok(bytes)
    }
}

impl fmt::Debug for UrlResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrlResource")
            .field("url", &self.url)
            .field("hash", &self.hash)
            .finish()
    }
}

impl Resource for UrlResource {
    fn as_bytes(&self) -> Result<Vec<u8>> {
        let mut cache = match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(bytes) = cache.as_ref() {
            return Ok(bytes.clone());
        }
        let bytes = self.download()?;
        *cache = Some(bytes.clone());
        Ok(bytes)
    }
}

/// A value produced by another task during the run.
///
/// The owning task calls [`set`](Self::set) from its find or render; readers
/// declare the owner as a dependency through [`Resource::dependencies`], so
/// the executor runs the owner first. Reading an unset value returns
/// [`Error::ResourceNotReady`].
#[derive(Clone)]
pub struct TaskDependentResource {
    owner: TaskKey,
    value: Arc<RwLock<Option<ResourceHandle>>>,
}

impl TaskDependentResource {
    pub fn new(owner: TaskKey) -> Self {
        Self {
            owner,
            value: Arc::default(),
        }
    }

    pub fn owner(&self) -> &TaskKey {
        &self.owner
    }

    /// Fill in the value. A later call replaces it (render after find).
    pub fn set(&self, value: ResourceHandle) {
        match self.value.write() {
            Ok(mut slot) => *slot = Some(value),
            Err(poisoned) => *poisoned.into_inner() = Some(value),
        }
    }

    pub fn is_ready(&self) -> bool {
        match self.value.read() {
            Ok(slot) => slot.is_some(),
            Err(poisoned) => poisoned.into_inner().is_some(),
        }
    }

    fn current(&self) -> Result<ResourceHandle> {
        let slot = match self.value.read() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.clone().ok_or_else(|| Error::ResourceNotReady {
            owner: self.owner.clone(),
        })
    }
}

impl fmt::Debug for TaskDependentResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskDependentResource({})", self.owner)
    }
}

impl PartialEq for TaskDependentResource {
    fn eq(&self, other: &Self) -> bool {
        self.owner == other.owner
    }
}

impl Resource for TaskDependentResource {
    fn as_bytes(&self) -> Result<Vec<u8>> {
        self.current()?.as_bytes()
    }

    fn as_string(&self) -> Result<String> {
        self.current()?.as_string()
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        vec![self.owner.clone()]
    }
}
