//! Planning: a dry run against the saved provider state.

use super::Session;
use crate::progress::BarProgress;
use anyhow::Result;
use converge::{ExecuteOptions, PrunePlan, RunReport, Target, TargetKind, execute, plan_prune};

/// Find and diff every task without rendering anything.
pub fn plan(session: &Session, jobs: usize, quiet: bool) -> Result<RunReport> {
    let graph = session.graph(TargetKind::DryRun)?;
    let ctx = session.context(Target::DryRun(session.api()));
    let options = ExecuteOptions {
        jobs,
        ..Default::default()
    };
    let report = execute(&graph, &ctx, &options, &mut BarProgress::new("Planning", quiet))?;
    log::info!(
        "Planned {} change(s) across {} task(s)",
        report.planned_changes().len(),
        report.tasks.len()
    );
    Ok(report)
}

/// Objects owned by the cluster that the current definition no longer declares.
pub fn plan_deletions(session: &Session) -> Result<PrunePlan> {
    let graph = session.graph(TargetKind::Direct)?;
    let observed = cloudup::observe_owned(session.api(), &session.spec.name)?;
    Ok(plan_prune(&graph, observed)?)
}
