use crate::Context;
use crate::cli::UpdateArgs;
use crate::engine::executor::{self, RunOptions};
use crate::engine::{Session, differ, planner};
use crate::ui;
use anyhow::{Result, bail};
use converge::TargetKind;
use std::time::Duration;

pub fn run(ctx: &Context, args: &UpdateArgs) -> Result<()> {
    let session = Session::open(&args.cluster)?;
    let options = RunOptions {
        jobs: args.jobs,
        yes: args.yes,
        quiet: ctx.quiet,
        timeout: args.timeout.map(Duration::from_secs),
    };

    let target = TargetKind::from(args.target);
    if target != TargetKind::Direct {
        let files = executor::emit(&session, target, &args.out, &options)?;
        ui::success(&format!("Wrote {target} output for {}", session.spec.name));
        if ctx.verbose > 0 {
            for file in &files {
                ui::dim(&file.display().to_string());
            }
        }
        return Ok(());
    }

    let plan = planner::plan(&session, options.jobs, options.quiet)?;
    let changes = plan.planned_changes();
    differ::display_plan(&changes);
    if changes.is_empty() && plan.summary.is_success() {
        return Ok(());
    }

    if !options.yes && !executor::confirm_proceed("Apply these changes?")? {
        ui::info("Cancelled");
        return Ok(());
    }

    let report = executor::converge_cluster(&session, &options)?;
    executor::print_failures(&report);
    executor::print_summary(&report.summary);
    if !report.summary.is_success() {
        bail!("{} task(s) did not converge", report.failures().len());
    }
    Ok(())
}
