use super::{Cluster, execute_with_progress, target};
use crate::Context;
use crate::cli::ApplyArgs;
use crate::{report, ui};
use anyhow::{Context as AnyhowContext, Result, bail};
use declarative::Target;

/// Plan, confirm, then reconcile
pub fn run(ctx: &Context, args: &ApplyArgs) -> Result<()> {
    let run = &args.run;
    let cluster = Cluster::load(&run.cluster)?;
    let graph = cluster.graph()?;
    let target = target(run, &cluster)?;

    if !ctx.quiet {
        ui::header(&format!("Apply {}", cluster.config.name));
        ui::kv("cluster file", &cluster.path.display().to_string());
        ui::kv("target", &target.kind().to_string());
        println!();
    }

    let plan = execute_with_progress(ctx, &graph, &target, run.jobs, true)?;
    report::print(&plan, ctx.verbose > 0);
    if !plan.is_success() {
        bail!("plan did not complete for every task; nothing applied");
    }
    if args.dry_run {
        return Ok(());
    }

    let changes = plan.summary().total_changes();
    let writes_config = matches!(target, Target::Terraform(_));
    if changes == 0 && !writes_config {
        ui::success("Infrastructure matches the cluster file");
        return Ok(());
    }

    if !args.yes && !writes_config {
        println!();
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(format!("Apply {changes} change(s)?"))
            .default(false)
            .interact()
            .context("Failed to read confirmation")?;
        if !confirmed {
            ui::warn("Aborted. No changes made.");
            return Ok(());
        }
    }

    let report = execute_with_progress(ctx, &graph, &target, run.jobs, false)?;
    report::print(&report, ctx.verbose > 0);

    if !report.is_success() {
        let failed = report.failed().count();
        let skipped = report.skipped().count();
        for outcome in report.failed() {
            ui::error(&format!("{}: {}", outcome.key, outcome.status));
        }
        bail!("{failed} task(s) failed, {skipped} skipped");
    }

    if let Target::Terraform(tf) = &target {
        ui::success(&format!("Wrote {}", tf.output_path().display()));
    }
    Ok(())
}
