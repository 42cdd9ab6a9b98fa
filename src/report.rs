//! Terminal rendering of run reports

use colored::{ColoredString, Colorize};
use declarative::{NodeOutcome, NodeStatus, RunReport, RunSummary};

/// What happened to (or, in a plan, would happen to) one node
pub fn action(status: &NodeStatus, dry_run: bool) -> String {
    match (status, dry_run) {
        (NodeStatus::Created, true) => "will create".to_string(),
        (NodeStatus::Updated { fields }, true) => format!("will update {}", fields.join(", ")),
        (NodeStatus::Unchanged, true) => "no changes".to_string(),
        (NodeStatus::Updated { fields }, false) => format!("updated {}", fields.join(", ")),
        (other, _) => other.to_string(),
    }
}

fn marker(status: &NodeStatus) -> ColoredString {
    match status {
        NodeStatus::Created => "+".green(),
        NodeStatus::Updated { .. } => "~".yellow(),
        NodeStatus::Unchanged => "=".dimmed(),
        NodeStatus::Deferred { .. } => "-".dimmed(),
        NodeStatus::Failed { .. } => "✗".red(),
        NodeStatus::Skipped { .. } => "↷".yellow(),
        NodeStatus::Cancelled => "○".dimmed(),
    }
}

fn print_outcome(outcome: &NodeOutcome, dry_run: bool) {
    let text = action(&outcome.status, dry_run);
    let text = match outcome.status {
        NodeStatus::Failed { .. } => text.as_str().red(),
        NodeStatus::Skipped { .. } | NodeStatus::Cancelled => text.as_str().yellow(),
        NodeStatus::Unchanged | NodeStatus::Deferred { .. } => text.as_str().dimmed(),
        _ => text.as_str().normal(),
    };
    println!(
        "  {} {} {}",
        marker(&outcome.status),
        outcome.key.to_string().as_str().bold(),
        text
    );
}

/// One line of counts, omitting zeroes
pub fn summary_line(summary: &RunSummary, dry_run: bool) -> String {
    let (created, updated) = if dry_run {
        ("to create", "to update")
    } else {
        ("created", "updated")
    };
    let parts: Vec<String> = [
        (summary.created, created),
        (summary.updated, updated),
        (summary.unchanged, "unchanged"),
        (summary.deferred, "deferred"),
        (summary.failed, "failed"),
        (summary.skipped, "skipped"),
        (summary.cancelled, "cancelled"),
    ]
    .into_iter()
    .filter(|(count, _)| *count > 0)
    .map(|(count, label)| format!("{count} {label}"))
    .collect();

    if parts.is_empty() {
        "nothing declared".to_string()
    } else {
        parts.join(", ")
    }
}

/// Print each node (unchanged ones only when verbose) and the summary
pub fn print(report: &RunReport, verbose: bool) {
    for outcome in &report.outcomes {
        let quiet_status = matches!(
            outcome.status,
            NodeStatus::Unchanged | NodeStatus::Deferred { .. }
        );
        if quiet_status && !verbose {
            continue;
        }
        print_outcome(outcome, report.dry_run);
    }

    let summary = report.summary();
    let line = summary_line(&summary, report.dry_run);
    println!();
    if summary.is_success() {
        println!("{} {}", "✓".green(), line);
    } else {
        println!("{} {}", "✗".red(), line);
    }
}
