//! Service manager seam: systemd on real nodes, an in-memory fake in tests.

use converge::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Observed state of one unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitStatus {
    /// Installed unit file contents, `None` when the unit is not installed
    pub definition: Option<String>,
    pub enabled: bool,
    pub active: bool,
}

/// Operations nodeup needs from the init system.
pub trait ServiceManager: Send + Sync {
    fn status(&self, name: &str) -> Result<UnitStatus>;

    /// Write (or overwrite) a unit file
    fn install_unit(&self, name: &str, definition: &str) -> Result<()>;

    /// Make the init system pick up changed unit files
    fn daemon_reload(&self) -> Result<()>;

    fn enable(&self, name: &str) -> Result<()>;

    fn start(&self, name: &str) -> Result<()>;

    fn restart(&self, name: &str) -> Result<()>;
}

/// systemd, driven through `systemctl`.
#[derive(Debug, Clone)]
pub struct Systemd {
    unit_dir: PathBuf,
}

impl Default for Systemd {
    fn default() -> Self {
        Self::new("/etc/systemd/system")
    }
}

impl Systemd {
    pub fn new(unit_dir: impl Into<PathBuf>) -> Self {
        Self {
            unit_dir: unit_dir.into(),
        }
    }

    /// Run systemctl, returning whether it exited successfully
    fn systemctl_status(args: &[&str]) -> Result<bool> {
        let status = Command::new("systemctl")
            .args(args)
            .status()
            .map_err(|e| Error::io("systemctl", e))?;
        Ok(status.success())
    }

    fn systemctl(args: &[&str]) -> Result<()> {
        let output = Command::new("systemctl")
            .args(args)
            .output()
            .map_err(|e| Error::io("systemctl", e))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(Error::Other(format!(
                "systemctl {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

impl ServiceManager for Systemd {
    fn status(&self, name: &str) -> Result<UnitStatus> {
        let path = self.unit_dir.join(name);
        let definition = match fs::read_to_string(&path) {
            Ok(text) => Some(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(Error::io(path, e)),
        };
        if definition.is_none() {
            return Ok(UnitStatus::default());
        }
        Ok(UnitStatus {
            definition,
            enabled: Self::systemctl_status(&["is-enabled", "--quiet", name])?,
            active: Self::systemctl_status(&["is-active", "--quiet", name])?,
        })
    }

    fn install_unit(&self, name: &str, definition: &str) -> Result<()> {
        fs::create_dir_all(&self.unit_dir).map_err(|e| Error::io(&self.unit_dir, e))?;
        let path = self.unit_dir.join(name);
        fs::write(&path, definition).map_err(|e| Error::io(path, e))
    }

    fn daemon_reload(&self) -> Result<()> {
        Self::systemctl(&["daemon-reload"])
    }

    fn enable(&self, name: &str) -> Result<()> {
        Self::systemctl(&["enable", name])
    }

    fn start(&self, name: &str) -> Result<()> {
        Self::systemctl(&["start", name])
    }

    fn restart(&self, name: &str) -> Result<()> {
        Self::systemctl(&["restart", name])
    }
}

/// In-memory service manager recording every action it performs.
#[derive(Debug, Default)]
pub struct MemoryServices {
    units: Mutex<BTreeMap<String, UnitStatus>>,
    actions: Mutex<Vec<String>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryServices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Actions performed so far, e.g. `"start kubelet.service"`
    pub fn actions(&self) -> Vec<String> {
        lock(&self.actions).clone()
    }

    /// Simulate a unit stopping on its own
    pub fn stop(&self, name: &str) {
        if let Some(unit) = lock(&self.units).get_mut(name) {
            unit.active = false;
        }
    }

    fn record(&self, action: String) {
        log::trace!("services: {action}");
        lock(&self.actions).push(action);
    }

    fn with_unit(&self, name: &str, f: impl FnOnce(&mut UnitStatus)) -> Result<()> {
        let mut units = lock(&self.units);
        let unit = units.get_mut(name).ok_or_else(|| Error::NotFound {
            message: format!("unit {name} is not installed"),
        })?;
        f(unit);
        Ok(())
    }
}

impl ServiceManager for MemoryServices {
    fn status(&self, name: &str) -> Result<UnitStatus> {
        Ok(lock(&self.units).get(name).cloned().unwrap_or_default())
    }

    fn install_unit(&self, name: &str, definition: &str) -> Result<()> {
        lock(&self.units).entry(name.to_string()).or_default().definition =
            Some(definition.to_string());
        self.record(format!("install {name}"));
        Ok(())
    }

    fn daemon_reload(&self) -> Result<()> {
        self.record("daemon-reload".to_string());
        Ok(())
    }

    fn enable(&self, name: &str) -> Result<()> {
        self.with_unit(name, |u| u.enabled = true)?;
        self.record(format!("enable {name}"));
        Ok(())
    }

    fn start(&self, name: &str) -> Result<()> {
        self.with_unit(name, |u| u.active = true)?;
        self.record(format!("start {name}"));
        Ok(())
    }

    fn restart(&self, name: &str) -> Result<()> {
        self.with_unit(name, |u| u.active = true)?;
        self.record(format!("restart {name}"));
        Ok(())
    }
}
