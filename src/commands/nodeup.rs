use crate::Context;
use crate::cli::NodeupArgs;
use crate::engine::{differ, executor};
use crate::progress::BarProgress;
use crate::ui;
use anyhow::{Context as _, Result};
use converge::{ExecuteOptions, RunReport, Target, build_graph, execute};
use nodeup::{NodeHost, NodeModelBuilder, NodeupConfig, Systemd};

/// Converge `host` to `config`.
pub fn converge_node(
    config: NodeupConfig,
    host: &NodeHost,
    dry_run: bool,
    quiet: bool,
) -> Result<RunReport> {
    log::info!(
        "Converging {} node of instance group {} in cluster {}",
        config.role,
        config.instance_group,
        config.cluster_name
    );
    let cluster = config.cluster_name.clone();
    let graph = build_graph::<NodeHost>(&[&NodeModelBuilder::new(config)])?;
    let target = if dry_run {
        Target::DryRun(host)
    } else {
        Target::Direct(host)
    };
    let ctx = converge::Context::new(target).with_cluster_name(cluster);
    let report = execute(
        &graph,
        &ctx,
        &ExecuteOptions::default(),
        &mut BarProgress::new("Node", quiet),
    )?;
    Ok(report)
}

pub fn run(ctx: &Context, args: &NodeupArgs) -> Result<()> {
    let config = NodeupConfig::load(&args.config)
        .with_context(|| format!("Failed to load node configuration {}", args.config.display()))?;
    let host = NodeHost::new(&args.root, Systemd::new(&args.unit_dir));

    let report = converge_node(config, &host, args.dry_run, ctx.quiet)?;
    if args.dry_run {
        differ::display_plan(&report.planned_changes());
    } else {
        executor::print_failures(&report);
        if !ctx.quiet {
            ui::success(&format!(
                "Node converged: {} created, {} updated",
                report.summary.created, report.summary.updated
            ));
        }
    }
    report.into_result()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodeup::{MemoryServices, NodeRole};
    use tempfile::TempDir;

    fn config() -> NodeupConfig {
        NodeupConfig::for_instance_group("demo", "nodes", NodeRole::Node, "1.31.0")
    }

    #[test]
    fn test_node_converges_then_settles() {
        let dir = TempDir::new().unwrap();
        let host = NodeHost::new(dir.path(), MemoryServices::new());

        let report = converge_node(config(), &host, false, true).unwrap();
        assert!(report.summary.is_success());
        assert!(dir.path().join("etc/sysconfig/kubelet").is_file());

        let again = converge_node(config(), &host, false, true).unwrap();
        assert_eq!(again.summary.total_changes(), 0);
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let host = NodeHost::new(dir.path(), MemoryServices::new());

        let report = converge_node(config(), &host, true, true).unwrap();
        assert!(!report.planned_changes().is_empty());
        assert!(!dir.path().join("etc").exists());
    }
}
