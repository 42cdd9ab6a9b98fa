use super::Cluster;
use crate::Context;
use crate::cli::ClusterArgs;
use crate::ui;
use anyhow::Result;
use colored::Colorize;

/// Print every task in execution order with its dependencies
pub fn run(ctx: &Context, args: &ClusterArgs) -> Result<()> {
    let cluster = Cluster::load(args)?;
    let graph = cluster.graph()?;

    if !ctx.quiet {
        ui::header(&format!("{} ({} tasks)", cluster.config.name, graph.len()));
    }
    for (position, key) in graph.order().iter().enumerate() {
        println!("{:>3}. {}", position + 1, key.to_string().as_str().bold());
        for dependency in graph.dependencies(key) {
            ui::dim(&format!("   requires {dependency}"));
        }
    }
    Ok(())
}
