use crate::Context;
use crate::cli::PlanArgs;
use crate::engine::{Session, differ, executor, planner};
use crate::ui;
use anyhow::{Result, bail};

pub fn run(ctx: &Context, args: &PlanArgs) -> Result<()> {
    let session = Session::open(&args.cluster)?;
    if !ctx.quiet {
        ui::header(&format!("Plan for {}", session.spec.name));
        if let Some(last) = session.history()?.last() {
            ui::kv(
                "last run",
                &format!("{} ({}) at {}", last.command, last.target, last.finished_at.to_rfc3339()),
            );
        }
    }

    let report = planner::plan(&session, args.jobs, ctx.quiet)?;
    differ::display_plan(&report.planned_changes());

    let deletions = planner::plan_deletions(&session)?;
    executor::warn_duplicates(&deletions);
    if !deletions.is_empty() {
        println!();
        ui::warn(&format!(
            "{} object(s) are no longer declared; run `kubeforge prune` to delete them",
            deletions.deletions.len()
        ));
        for resource in &deletions.deletions {
            ui::dim(&format!("{} ({})", resource.key, resource.id));
        }
    }

    if !report.summary.is_success() {
        println!();
        executor::print_failures(&report);
        bail!("Some tasks could not be planned");
    }
    Ok(())
}
