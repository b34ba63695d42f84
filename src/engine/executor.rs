//! Execution: converging the provider, emitting documents and pruning.

use super::Session;
use crate::progress::BarProgress;
use crate::state::RunRecord;
use crate::ui;
use anyhow::{Context as _, Result};
use cloudup::{CloudApi, CloudDeleter};
use colored::Colorize;
use converge::{
    CancelToken, CloudFormationWriter, ExecuteOptions, ExecuteSummary, PruneOptions, PruneOutcome, PrunePlan,
    PruneReport, RunReport, Target, TargetKind, TaskState, TerraformWriter, execute,
    execute_prune,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Options for a cluster run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Parallel jobs
    pub jobs: usize,
    /// Skip confirmation prompts
    pub yes: bool,
    /// Hide progress output
    pub quiet: bool,
    /// Stop dispatching tasks after this long
    pub timeout: Option<Duration>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            yes: false,
            quiet: false,
            timeout: None,
        }
    }
}

impl RunOptions {
    /// Options for one run. A timeout starts counting here.
    fn execute_options(&self) -> ExecuteOptions {
        ExecuteOptions {
            jobs: self.jobs,
            cancel: cancel_token(self.timeout),
            ..Default::default()
        }
    }
}

fn cancel_token(timeout: Option<Duration>) -> CancelToken {
    timeout.map_or_else(CancelToken::new, CancelToken::with_timeout)
}

/// Apply the cluster through the provider.
///
/// Provider state and run history are saved even when some tasks fail, so
/// the next run starts from what was actually created.
pub fn converge_cluster(session: &Session, options: &RunOptions) -> Result<RunReport> {
    let graph = session.graph(TargetKind::Direct)?;
    let ctx = session.context(Target::Direct(session.api()));
    let report = execute(
        &graph,
        &ctx,
        &options.execute_options(),
        &mut BarProgress::new("Converging", options.quiet),
    )?;

    session.cloud.save()?;
    session.history()?.record(RunRecord::from_summary(
        "update",
        TargetKind::Direct,
        &report.summary,
    ))?;
    Ok(report)
}

/// Render the cluster as Terraform JSON or a CloudFormation template into `out`.
pub fn emit(
    session: &Session,
    kind: TargetKind,
    out: &Path,
    options: &RunOptions,
) -> Result<Vec<PathBuf>> {
    let graph = session.graph(kind)?;
    let mut progress = BarProgress::new("Rendering", options.quiet);

    let (report, files) = match kind {
        TargetKind::Terraform => {
            let writer = TerraformWriter::new();
            writer.set_provider("aws", json!({ "region": session.spec.region }));
            let target: Target<'_, dyn CloudApi> = Target::Terraform(&writer);
            let report = execute(
                &graph,
                &session.context(target),
                &options.execute_options(),
                &mut progress,
            )?
            .into_result()?;
            let files = writer
                .write_to(out)
                .with_context(|| format!("Failed to write Terraform to {}", out.display()))?;
            (report, files)
        }
        TargetKind::CloudFormation => {
            let writer = CloudFormationWriter::new();
            let target: Target<'_, dyn CloudApi> = Target::CloudFormation(&writer);
            let report = execute(
                &graph,
                &session.context(target),
                &options.execute_options(),
                &mut progress,
            )?
            .into_result()?;
            let file = writer
                .write_to(out)
                .with_context(|| format!("Failed to write template to {}", out.display()))?;
            (report, vec![file])
        }
        TargetKind::Direct | TargetKind::DryRun => {
            anyhow::bail!("{kind} is not an emitting target");
        }
    };

    session
        .history()?
        .record(RunRecord::from_summary("update", kind, &report.summary))?;
    log::info!("Emitted {} object(s) to {}", report.tasks.len(), out.display());
    Ok(files)
}

/// Delete what `plan` lists, dependents first.
pub fn prune_cluster(
    session: &Session,
    plan: &PrunePlan,
    dry_run: bool,
    timeout: Option<Duration>,
) -> Result<PruneReport> {
    let report = execute_prune(
        plan,
        session.api(),
        &CloudDeleter,
        &PruneOptions {
            dry_run,
            cancel: cancel_token(timeout),
            ..Default::default()
        },
    );
    if !dry_run {
        session.cloud.save()?;
        let mut run = RunRecord::from_summary("prune", TargetKind::Direct, &ExecuteSummary::default());
        run.deleted = report.deleted();
        run.failed = report
            .entries
            .iter()
            .filter(|e| e.outcome != PruneOutcome::Deleted)
            .count();
        run.success = run.failed == 0;
        session.history()?.record(run)?;
    }
    Ok(report)
}

/// Confirm with user
pub fn confirm_proceed(prompt: &str) -> Result<bool> {
    use dialoguer::Confirm;

    let confirmed = Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()?;

    Ok(confirmed)
}

/// Print tasks that did not converge, with why
pub fn print_failures(report: &RunReport) {
    for task in &report.tasks {
        match &task.state {
            TaskState::Failed(info) => {
                println!("    {} {}: {}", "✗".red(), task.key, info.message);
                if info.exhausted {
                    println!("      {}", format!("gave up after {} attempts", info.attempts).dimmed());
                }
            }
            TaskState::Blocked { by } => {
                println!("    {} {} {}", "…".yellow(), task.key, format!("blocked by {by}").dimmed());
            }
            TaskState::NotAttempted => {
                println!("    {} {} {}", "…".yellow(), task.key, "not attempted".dimmed());
            }
            TaskState::Missing { reason } => {
                println!("    {} {} {}", "⊘".yellow(), task.key, format!("missing, {reason}").dimmed());
            }
            _ => {}
        }
        for warning in &task.warnings {
            println!("    {} {}: {}", "⚠".yellow(), task.key, warning);
        }
    }
}

/// Print final summary
pub fn print_summary(summary: &ExecuteSummary) {
    println!();
    if summary.is_success() {
        println!("  {} Cluster converged", "✓".green().bold());
    } else {
        println!("  {} Cluster converged with errors", "⚠".yellow().bold());
    }

    if summary.created > 0 {
        println!("    • {} objects created", summary.created);
    }
    if summary.updated > 0 {
        println!("    • {} objects updated", summary.updated);
    }
    if summary.unchanged > 0 {
        println!("    • {} objects unchanged", summary.unchanged);
    }
    if summary.skipped > 0 {
        println!("    • {} objects skipped", summary.skipped);
    }
    if summary.failed > 0 {
        println!("    • {} {} failed", summary.failed, "objects".red());
    }
    if summary.blocked + summary.not_attempted > 0 {
        println!(
            "    • {} {} not reached",
            summary.blocked + summary.not_attempted,
            "objects".yellow()
        );
    }
}

/// Warn about managed objects the provider reports more than once.
pub fn warn_duplicates(plan: &PrunePlan) {
    if plan.duplicates.is_empty() {
        return;
    }
    ui::warn(&format!(
        "{} object(s) share a name with another managed object and are kept; remove the extras by hand",
        plan.duplicates.len()
    ));
    for resource in &plan.duplicates {
        ui::dim(&format!("{} ({})", resource.key, resource.id));
    }
}

/// Print what a prune did to each object
pub fn print_prune(report: &PruneReport) {
    for entry in &report.entries {
        let key = &entry.resource.key;
        match &entry.outcome {
            PruneOutcome::Deleted => println!("    {} {key}", "-".red()),
            PruneOutcome::WouldDelete => {
                println!("    {} {key} {}", "-".red(), entry.resource.id.dimmed());
            }
            PruneOutcome::Failed(info) => println!("    {} {key}: {}", "✗".red(), info.message),
            PruneOutcome::Blocked { by } => {
                println!("    {} {key} {}", "…".yellow(), format!("kept, {by} was not deleted").dimmed());
            }
            PruneOutcome::NotAttempted => {
                println!("    {} {key} {}", "…".yellow(), "not attempted".dimmed());
            }
        }
    }
}
