use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use converge::{ExecuteSummary, TargetKind};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Number of runs kept per cluster.
const MAX_RUNS: usize = 20;

/// One recorded run against a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub command: String,
    pub target: TargetKind,
    pub finished_at: DateTime<Utc>,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    #[serde(default)]
    pub deleted: usize,
    pub failed: usize,
    pub success: bool,
}

impl RunRecord {
    pub fn from_summary(command: &str, target: TargetKind, summary: &ExecuteSummary) -> Self {
        Self {
            command: command.to_string(),
            target,
            finished_at: Utc::now(),
            created: summary.created,
            updated: summary.updated,
            unchanged: summary.unchanged,
            deleted: 0,
            failed: summary.failed + summary.blocked + summary.not_attempted,
            success: summary.is_success(),
        }
    }
}

/// Run history for one cluster, newest last.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct History {
    #[serde(skip)]
    path: PathBuf,

    #[serde(default)]
    pub runs: Vec<RunRecord>,
}

impl History {
    /// Load history from disk, or start empty if the file doesn't exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("History file does not exist, starting empty");
            return Ok(Self {
                path: path.to_path_buf(),
                runs: Vec::new(),
            });
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read history file: {}", path.display()))?;
        let mut history: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse history file: {}", path.display()))?;
        history.path = path.to_path_buf();

        log::debug!("Loaded {} run(s) from {}", history.runs.len(), path.display());
        Ok(history)
    }

    /// Save history to disk
    pub fn save(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize history")?;
        fs::write(&self.path, content)
            .with_context(|| format!("Failed to write history file: {}", self.path.display()))?;

        log::debug!("Saved history to {}", self.path.display());
        Ok(())
    }

    /// Append a run, dropping the oldest beyond the retention limit, and save
    pub fn record(&mut self, run: RunRecord) -> Result<()> {
        self.runs.push(run);
        if self.runs.len() > MAX_RUNS {
            let excess = self.runs.len() - MAX_RUNS;
            self.runs.drain(..excess);
        }
        self.save()
    }

    pub fn last(&self) -> Option<&RunRecord> {
        self.runs.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn summary() -> ExecuteSummary {
        ExecuteSummary {
            created: 3,
            unchanged: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_record_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("demo").join("history.toml");

        let mut history = History::load(&path).unwrap();
        assert!(history.runs.is_empty());
        history
            .record(RunRecord::from_summary("update", TargetKind::Direct, &summary()))
            .unwrap();

        let reloaded = History::load(&path).unwrap();
        let last = reloaded.last().unwrap();
        assert_eq!(last.command, "update");
        assert_eq!(last.target, TargetKind::Direct);
        assert_eq!(last.created, 3);
        assert!(last.success);
    }

    #[test]
    fn test_history_is_bounded() {
        let dir = TempDir::new().unwrap();
        let mut history = History::load(&dir.path().join("history.toml")).unwrap();
        for i in 0..MAX_RUNS + 5 {
            let mut run = RunRecord::from_summary("update", TargetKind::Direct, &summary());
            run.created = i;
            history.record(run).unwrap();
        }
        assert_eq!(history.runs.len(), MAX_RUNS);
        assert_eq!(history.runs[0].created, 5);
    }

    #[test]
    fn test_failures_are_counted() {
        let summary = ExecuteSummary {
            failed: 1,
            blocked: 2,
            ..Default::default()
        };
        let run = RunRecord::from_summary("update", TargetKind::Direct, &summary);
        assert_eq!(run.failed, 3);
        assert!(!run.success);
    }
}
