use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use declarative::TargetKind;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cloudup")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Declare cluster infrastructure once, then plan, apply or render it", long_about = None)]
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
    /// Discover live state and show what apply would change
    Plan(RunArgs),

    /// Make the infrastructure match the cluster file
    Apply(ApplyArgs),

    /// Print the tasks in dependency order
    Graph(ClusterArgs),

    /// Print the OIDC discovery document and key set
    Oidc(OidcArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Shared arguments
// ============================================================================

#[derive(Args, Clone)]
pub struct ClusterArgs {
    /// Cluster file (default: cluster.toml in the config dir)
    #[arg(short = 'f', long = "config", env = "CLOUDUP_CLUSTER")]
    pub config: Option<PathBuf>,
}

#[derive(Args, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub cluster: ClusterArgs,

    /// Render target: api or terraform
    #[arg(short, long, default_value = "api")]
    pub target: TargetKind,

    /// Output directory for the terraform target
    #[arg(short, long, default_value = "out/terraform")]
    pub out: PathBuf,

    /// Number of parallel workers
    #[arg(short, long, default_value = "4")]
    pub jobs: usize,

    /// Seconds to wait for each provider operation
    #[arg(long, default_value = "600")]
    pub operation_timeout: u64,

    /// Local cloud state file (default: cloud.json in the state dir)
    #[arg(long, env = "CLOUDUP_CLOUD_STATE")]
    pub state: Option<PathBuf>,

    /// With the terraform target, discover live state to report changes
    #[arg(long)]
    pub discover: bool,
}

// ============================================================================
// Apply
// ============================================================================

#[derive(Args)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Show what would change without applying
    #[arg(long)]
    pub dry_run: bool,
}

// ============================================================================
// OIDC
// ============================================================================

#[derive(Args)]
pub struct OidcArgs {
    #[command(flatten)]
    pub cluster: ClusterArgs,

    /// Print only one document
    #[arg(long, value_parser = ["discovery", "jwks"])]
    pub only: Option<String>,
}
