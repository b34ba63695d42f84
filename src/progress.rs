//! Progress display for task runs.

use colored::Colorize;
use converge::{ExecuteSummary, ProgressCallback, TaskKey, TaskState};
use indicatif::{ProgressBar, ProgressStyle};

/// Progress bar driven by task state transitions.
pub struct BarProgress {
    label: String,
    bar: Option<ProgressBar>,
    hidden: bool,
}

impl BarProgress {
    pub fn new(label: impl Into<String>, hidden: bool) -> Self {
        Self {
            label: label.into(),
            bar: None,
            hidden,
        }
    }

    fn style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("{spinner:.green} {prefix} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-")
    }
}

/// Symbol for a terminal state, `None` while the task is still moving.
pub fn state_symbol(state: &TaskState) -> Option<&'static str> {
    match state {
        TaskState::Succeeded { action } if action.is_change() => Some("✓"),
        TaskState::Succeeded { .. } => Some("○"),
        TaskState::Skipped { .. } | TaskState::Missing { .. } => Some("⊘"),
        TaskState::Failed(_) => Some("✗"),
        TaskState::Blocked { .. } | TaskState::NotAttempted => Some("…"),
        TaskState::Pending
        | TaskState::Found { .. }
        | TaskState::Diffed { .. }
        | TaskState::Rendering => None,
    }
}

impl ProgressCallback for BarProgress {
    fn on_run_start(&mut self, total: usize) {
        let bar = if self.hidden {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(total as u64)
        };
        bar.set_style(Self::style());
        bar.set_prefix(self.label.clone());
        self.bar = Some(bar);
    }

    fn on_task_state(&mut self, key: &TaskKey, state: &TaskState) {
        let Some(bar) = &self.bar else {
            return;
        };
        if let TaskState::Failed(info) = state {
            bar.println(format!("  {} {key}: {}", "✗".red(), info.message));
        }
        if let Some(symbol) = state_symbol(state) {
            bar.set_message(format!("{symbol} {key}"));
            bar.inc(1);
        }
    }

    fn on_run_complete(&mut self, _summary: &ExecuteSummary) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}
