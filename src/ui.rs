use anyhow::Result;
use colored::Colorize;
use declarative::{NodeOutcome, NodeStatus, Observer, RunReport, TaskKey};
use indicatif::{ProgressBar, ProgressStyle};

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

// ============================================================================
// Run progress
// ============================================================================

/// Progress bar fed by the engine's worker threads
pub struct ProgressObserver {
    bar: ProgressBar,
}

impl ProgressObserver {
    pub fn new(quiet: bool) -> Result<Self> {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(0)
        };
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                .progress_chars("=>-"),
        );
        Ok(Self { bar })
    }
}

impl Observer for ProgressObserver {
    fn on_run_start(&self, total: usize) {
        self.bar.set_length(total as u64);
    }

    fn on_node_start(&self, key: &TaskKey) {
        self.bar.set_message(key.to_string());
    }

    fn on_node_complete(&self, outcome: &NodeOutcome) {
        if let NodeStatus::Failed { reason, .. } = &outcome.status {
            self.bar.suspend(|| {
                println!("  {} {} ({})", "✗".red(), outcome.key, reason);
            });
        }
        self.bar.inc(1);
    }

    fn on_run_complete(&self, _report: &RunReport) {
        self.bar.finish_and_clear();
    }
}
