use crate::Context;
use crate::cli::ClusterArgs;
use crate::engine::Session;
use anyhow::Result;
use converge::TargetKind;

pub fn run(_ctx: &Context, args: &ClusterArgs) -> Result<()> {
    let session = Session::open(args)?;
    let graph = session.graph(TargetKind::Direct)?;
    print!("{}", graph.to_dot());
    Ok(())
}
