//! Files, directories and symlinks on the node.

use crate::host::NodeHost;
use converge::{
    Change, Changeset, Context, Diff, Error, RenderTarget, Resource, ResourceHandle, Result, Task,
    TaskKey, TargetKind, hash_resource,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    #[default]
    File,
    Directory,
    Symlink,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "directory",
            Self::Symlink => "symlink",
        }
    }
}

/// A path on the node with the desired type, contents and mode.
#[derive(Debug, Clone, PartialEq)]
pub struct File {
    /// Absolute path on the node
    pub path: String,
    pub file_type: FileType,
    pub contents: Option<ResourceHandle>,
    /// Link target, for symlinks
    pub symlink: Option<String>,
    /// Permission bits; left alone when `None`
    pub mode: Option<u32>,
    /// Tasks that must run first (usually the parent directory)
    pub after: Vec<TaskKey>,
}

/// Comparable view of a path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileState {
    pub file_type: String,
    /// blake3 of the contents, regular files only
    pub hash: Option<String>,
    pub symlink: Option<String>,
    /// Octal permission bits, only observed when the task manages them
    pub mode: Option<String>,
}

impl File {
    pub fn new(path: impl Into<String>, contents: ResourceHandle) -> Self {
        Self {
            path: path.into(),
            file_type: FileType::File,
            contents: Some(contents),
            symlink: None,
            mode: None,
            after: Vec::new(),
        }
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            file_type: FileType::Directory,
            contents: None,
            symlink: None,
            mode: None,
            after: Vec::new(),
        }
    }

    pub fn symlink(path: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            file_type: FileType::Symlink,
            contents: None,
            symlink: Some(target.into()),
            mode: None,
            after: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    #[must_use]
    pub fn after(mut self, key: TaskKey) -> Self {
        self.after.push(key);
        self
    }

    fn observe(&self, path: &Path) -> Result<Option<FileState>> {
        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io(path, e)),
        };

        let mut state = FileState {
            mode: self.mode.and_then(|_| mode_of(&meta)),
            ..FileState::default()
        };
        if meta.file_type().is_symlink() {
            state.file_type = FileType::Symlink.as_str().to_string();
            let target = fs::read_link(path).map_err(|e| Error::io(path, e))?;
            state.symlink = Some(target.to_string_lossy().into_owned());
            state.mode = None;
        } else if meta.is_dir() {
            state.file_type = FileType::Directory.as_str().to_string();
        } else {
            state.file_type = FileType::File.as_str().to_string();
            let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
            state.hash = Some(blake3::hash(&bytes).to_hex().to_string());
        }
        Ok(Some(state))
    }

    fn apply(&self, host: &NodeHost, change: &Change<'_, FileState>) -> Result<()> {
        let path = host.resolve(&self.path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        match self.file_type {
            FileType::Directory => {
                fs::create_dir_all(&path).map_err(|e| Error::io(&path, e))?;
            }
            FileType::File => {
                if change.is_create() || change.touches("hash") {
                    let contents = self
                        .contents
                        .as_ref()
                        .ok_or_else(|| Error::required("contents"))?;
                    fs::write(&path, contents.as_bytes()?).map_err(|e| Error::io(&path, e))?;
                }
            }
            FileType::Symlink => {
                let target = self.symlink.as_deref().ok_or_else(|| Error::required("symlink"))?;
                if fs::symlink_metadata(&path).is_ok() {
                    fs::remove_file(&path).map_err(|e| Error::io(&path, e))?;
                }
                create_symlink(target, &path)?;
            }
        }

        if let Some(mode) = self.mode
            && self.file_type != FileType::Symlink
        {
            set_mode(&path, mode)?;
        }
        log::info!("Wrote {} {}", self.file_type.as_str(), self.path);
        Ok(())
    }
}

#[cfg(unix)]
fn mode_of(meta: &fs::Metadata) -> Option<String> {
    use std::os::unix::fs::PermissionsExt;
    Some(format!("{:04o}", meta.permissions().mode() & 0o7777))
}

#[cfg(not(unix))]
fn mode_of(_meta: &fs::Metadata) -> Option<String> {
    None
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| Error::io(path, e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn create_symlink(target: &str, path: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, path).map_err(|e| Error::io(path, e))
}

#[cfg(not(unix))]
fn create_symlink(_target: &str, path: &Path) -> Result<()> {
    Err(Error::Other(format!(
        "symlinks are not supported on this platform: {}",
        path.display()
    )))
}

impl Task<NodeHost> for File {
    type State = FileState;

    fn kind(&self) -> &'static str {
        "File"
    }

    fn name(&self) -> &str {
        &self.path
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        let mut deps = self.after.clone();
        if let Some(contents) = &self.contents {
            deps.extend(contents.dependencies());
        }
        deps
    }

    fn supports_target(&self, target: TargetKind) -> bool {
        target == TargetKind::Direct
    }

    fn find(&self, ctx: &Context<'_, NodeHost>) -> Result<Option<FileState>> {
        let path = ctx.api()?.resolve(&self.path);
        self.observe(&path)
    }

    fn expected(&self, _ctx: &Context<'_, NodeHost>) -> Result<FileState> {
        let hash = match (&self.file_type, &self.contents) {
            (FileType::File, Some(contents)) => Some(hash_resource(contents)?),
            _ => None,
        };
        Ok(FileState {
            file_type: self.file_type.as_str().to_string(),
            hash,
            symlink: self.symlink.clone(),
            mode: match self.file_type {
                FileType::Symlink => None,
                _ => self.mode.map(|m| format!("{m:04o}")),
            },
        })
    }

    fn diff(&self, actual: Option<&FileState>, expected: &FileState) -> Changeset {
        Diff::new(actual, expected)
            .field("type", |s| &s.file_type)
            .field("hash", |s| &s.hash)
            .field("symlink", |s| &s.symlink)
            .field("mode", |s| &s.mode)
            .finish()
    }

    fn check_changes(&self, change: &Change<'_, FileState>) -> Result<()> {
        if change.touches("type") && !change.is_create() {
            return Err(Error::cannot_change("type"));
        }
        match self.file_type {
            FileType::File if self.contents.is_none() => Err(Error::required("contents")),
            FileType::Symlink if self.symlink.is_none() => Err(Error::required("symlink")),
            _ => Ok(()),
        }
    }

    fn render(
        &self,
        _ctx: &Context<'_, NodeHost>,
        target: RenderTarget<'_, NodeHost>,
        change: &Change<'_, FileState>,
    ) -> Result<()> {
        match target {
            RenderTarget::Direct(host) => self.apply(host, change),
            RenderTarget::Terraform(_) | RenderTarget::CloudFormation(_) => Err(Error::NoRenderer {
                task: Task::key(self),
                target: target.kind(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MemoryServices;
    use converge::{ExecuteOptions, GraphBuilder, NoProgress, Target, execute, new_string_resource};
    use tempfile::TempDir;

    fn host() -> (TempDir, NodeHost) {
        let dir = TempDir::new().unwrap();
        let host = NodeHost::new(dir.path(), MemoryServices::new());
        (dir, host)
    }

    fn run(host: &NodeHost, tasks: Vec<File>) -> converge::RunReport {
        let mut builder = GraphBuilder::new();
        for task in tasks {
            builder.add_task(task).unwrap();
        }
        let graph = builder.seal().unwrap();
        let ctx = Context::new(Target::Direct(host));
        execute(&graph, &ctx, &ExecuteOptions::default(), &mut NoProgress).unwrap()
    }

    #[test]
    fn test_file_created_then_converged() {
        let (dir, host) = host();
        let file = || File::new("/etc/kubernetes/kubelet.env", new_string_resource("A=1\n"));

        let report = run(&host, vec![file()]);
        assert_eq!(report.summary.created, 1);
        assert_eq!(
            fs::read_to_string(dir.path().join("etc/kubernetes/kubelet.env")).unwrap(),
            "A=1\n"
        );

        let report = run(&host, vec![file()]);
        assert_eq!(report.summary.unchanged, 1);
        assert_eq!(report.renders(), 0);
    }

    #[test]
    fn test_changed_contents_rewrite_file() {
        let (dir, host) = host();
        run(&host, vec![File::new("/etc/motd", new_string_resource("old"))]);

        let report = run(&host, vec![File::new("/etc/motd", new_string_resource("new"))]);
        assert_eq!(report.summary.updated, 1);
        let task = report.get(&TaskKey::new("File", "/etc/motd")).unwrap();
        assert_eq!(task.changes.fields(), vec!["hash"]);
        assert_eq!(fs::read_to_string(dir.path().join("etc/motd")).unwrap(), "new");
    }

    #[cfg(unix)]
    #[test]
    fn test_mode_is_managed_only_when_set() {
        use std::os::unix::fs::PermissionsExt;

        let (dir, host) = host();
        let report = run(
            &host,
            vec![File::new("/etc/secret", new_string_resource("s")).with_mode(0o600)],
        );
        assert!(report.summary.is_success());
        let meta = fs::metadata(dir.path().join("etc/secret")).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);

        // Without a managed mode the existing bits are not compared
        let report = run(&host, vec![File::new("/etc/secret", new_string_resource("s"))]);
        assert_eq!(report.summary.unchanged, 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_and_directory() {
        let (dir, host) = host();
        let report = run(
            &host,
            vec![
                File::directory("/opt/cni/bin"),
                File::symlink("/usr/local/bin/kubectl", "/opt/bin/kubectl"),
            ],
        );
        assert!(report.summary.is_success());
        assert!(dir.path().join("opt/cni/bin").is_dir());
        assert_eq!(
            fs::read_link(dir.path().join("usr/local/bin/kubectl")).unwrap(),
            Path::new("/opt/bin/kubectl")
        );
    }

    #[test]
    fn test_type_change_is_rejected() {
        let (dir, host) = host();
        fs::create_dir_all(dir.path().join("etc/thing")).unwrap();

        let report = run(&host, vec![File::new("/etc/thing", new_string_resource("x"))]);
        let task = report.get(&TaskKey::new("File", "/etc/thing")).unwrap();
        let converge::TaskState::Failed(info) = &task.state else {
            panic!("expected failure, got {:?}", task.state);
        };
        assert_eq!(info.field.as_deref(), Some("type"));
        assert!(dir.path().join("etc/thing").is_dir());
    }

    #[test]
    fn test_terraform_target_has_no_renderer() {
        let writer = converge::TerraformWriter::new();
        let mut builder = GraphBuilder::<NodeHost>::new();
        builder.add_task(File::directory("/etc/kubernetes")).unwrap();
        let graph = builder.seal().unwrap();
        let ctx = Context::new(Target::Terraform(&writer));

        let report = execute(&graph, &ctx, &ExecuteOptions::default(), &mut NoProgress).unwrap();
        assert_eq!(report.summary.failed, 1);
        assert_eq!(writer.resource_count(), 0);
    }
}
