use super::{Cluster, execute_with_progress, target};
use crate::Context;
use crate::cli::RunArgs;
use crate::{report, ui};
use anyhow::{Result, bail};

/// Discover, diff and report; never renders
pub fn run(ctx: &Context, args: &RunArgs) -> Result<()> {
    let cluster = Cluster::load(&args.cluster)?;
    let graph = cluster.graph()?;
    let target = target(args, &cluster)?;

    if !ctx.quiet {
        ui::header(&format!("Plan for {}", cluster.config.name));
        ui::kv("cluster file", &cluster.path.display().to_string());
        ui::kv("target", &target.kind().to_string());
        ui::kv("tasks", &graph.len().to_string());
        println!();
    }

    let report = execute_with_progress(ctx, &graph, &target, args.jobs, true)?;
    report::print(&report, ctx.verbose > 0);

    if !report.is_success() {
        bail!("plan did not complete for every task");
    }
    Ok(())
}
