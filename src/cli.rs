use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use converge::TargetKind;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kubeforge")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Declarative Kubernetes cluster provisioning", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show what an update would change, without changing anything
    Plan(PlanArgs),

    /// Converge the cluster, or emit it as Terraform / CloudFormation
    Update(UpdateArgs),

    /// Delete cluster-owned objects that are no longer declared
    Prune(PruneArgs),

    /// Print the task graph in Graphviz dot format
    Graph(ClusterArgs),

    /// Converge this machine as a cluster node
    Nodeup(NodeupArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Options shared by every command that reads a cluster definition.
#[derive(Args, Debug, Clone)]
pub struct ClusterArgs {
    /// Cluster definition (TOML or JSON)
    #[arg(short = 'f', long = "config", env = "KUBEFORGE_CONFIG")]
    pub config: PathBuf,

    /// Directory of `<name>.crt` / `<name>.key` pairs
    #[arg(long, env = "KUBEFORGE_PKI_DIR")]
    pub pki: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct PlanArgs {
    #[command(flatten)]
    pub cluster: ClusterArgs,

    /// Parallel jobs
    #[arg(short, long, default_value = "4")]
    pub jobs: usize,
}

#[derive(Args, Debug, Clone)]
pub struct UpdateArgs {
    #[command(flatten)]
    pub cluster: ClusterArgs,

    /// Where to render the cluster
    #[arg(short, long, value_enum, default_value = "direct")]
    pub target: OutputTarget,

    /// Output directory for emitted targets
    #[arg(short, long, default_value = "out")]
    pub out: PathBuf,

    /// Parallel jobs
    #[arg(short, long, default_value = "4")]
    pub jobs: usize,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Stop starting new tasks after this many seconds
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct PruneArgs {
    #[command(flatten)]
    pub cluster: ClusterArgs,

    /// List what would be deleted without deleting it
    #[arg(long)]
    pub dry_run: bool,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Stop starting new deletions after this many seconds
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct NodeupArgs {
    /// Node configuration written by the instance user data
    #[arg(long, default_value = "/etc/kubeforge/nodeup.json")]
    pub config: PathBuf,

    /// Root the node's paths are resolved against
    #[arg(long, default_value = "/")]
    pub root: PathBuf,

    /// Directory systemd units are written to
    #[arg(long, default_value = "/etc/systemd/system")]
    pub unit_dir: PathBuf,

    /// Show what would change without changing it
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputTarget {
    /// Apply changes through the provider
    Direct,
    /// Write Terraform JSON
    Terraform,
    /// Write a CloudFormation template
    Cloudformation,
}

impl From<OutputTarget> for TargetKind {
    fn from(target: OutputTarget) -> Self {
        match target {
            OutputTarget::Direct => TargetKind::Direct,
            OutputTarget::Terraform => TargetKind::Terraform,
            OutputTarget::Cloudformation => TargetKind::CloudFormation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_update_parses_target() {
        let cli = Cli::try_parse_from([
            "kubeforge",
            "update",
            "-f",
            "cluster.toml",
            "--target",
            "terraform",
            "--out",
            "build",
        ])
        .unwrap();
        let Command::Update(args) = cli.command else {
            panic!("expected update");
        };
        assert_eq!(TargetKind::from(args.target), TargetKind::Terraform);
        assert_eq!(args.out, PathBuf::from("build"));
        assert!(!args.yes);
        assert_eq!(args.timeout, None);
    }

    #[test]
    fn test_timeout_in_seconds() {
        let cli = Cli::try_parse_from(["kubeforge", "prune", "-f", "c.toml", "--timeout", "90"])
            .unwrap();
        let Command::Prune(args) = cli.command else {
            panic!("expected prune");
        };
        assert_eq!(args.timeout, Some(90));
    }

    #[test]
    fn test_global_verbosity() {
        let cli = Cli::try_parse_from(["kubeforge", "-vv", "graph", "-f", "c.toml"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }
}
