use crate::Context;
use crate::cli::PruneArgs;
use crate::engine::{Session, executor, planner};
use crate::ui;
use anyhow::Result;
use std::time::Duration;

pub fn run(ctx: &Context, args: &PruneArgs) -> Result<()> {
    let session = Session::open(&args.cluster)?;
    let plan = planner::plan_deletions(&session)?;
    executor::warn_duplicates(&plan);
    if plan.is_empty() {
        ui::success("Nothing to prune");
        return Ok(());
    }

    if !ctx.quiet {
        ui::header(&format!("Prune {}", session.spec.name));
    }
    if !args.dry_run {
        for resource in &plan.deletions {
            ui::dim(&format!("{} ({})", resource.key, resource.id));
        }
        if !args.yes
            && !executor::confirm_proceed(&format!("Delete {} object(s)?", plan.deletions.len()))?
        {
            ui::info("Cancelled");
            return Ok(());
        }
    }

    let report = executor::prune_cluster(
        &session,
        &plan,
        args.dry_run,
        args.timeout.map(Duration::from_secs),
    )?;
    executor::print_prune(&report);
    let report = report.into_result()?;
    if !args.dry_run {
        ui::success(&format!("Deleted {} object(s)", report.deleted()));
    }
    Ok(())
}
