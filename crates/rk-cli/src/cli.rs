//! CLI argument definitions using clap derive API

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Rekon - reconcile SQL and YAML artifacts into an OLAP catalog
#[derive(Parser, Debug)]
#[command(name = "rk")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Global arguments available to all commands
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to project directory
    #[arg(short = 'p', long, global = true, default_value = ".")]
    pub project_dir: String,

    /// Override config file path
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set a template variable, overriding rekon.yml (repeatable)
    #[arg(long = "var", global = true, value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub vars: Vec<(String, String)>,
}

/// Parse a `KEY=VALUE` pair
pub fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("variable name is empty in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reconcile the catalog with the project's artifacts
    Reconcile(ReconcileArgs),

    /// Write an artifact and reconcile it
    Put(PutArgs),

    /// Delete an artifact and reconcile the removal
    Rm(RmArgs),

    /// Move an artifact and reconcile both paths
    Mv(MvArgs),

    /// Re-migrate one artifact even if unchanged (re-ingests sources)
    Refresh(RefreshArgs),

    /// Inspect the persisted catalog
    Catalog(CatalogArgs),
}

/// Output formats for commands that report results
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON output
    Json,
}

/// Options shared by every command that runs a reconcile
#[derive(Args, Debug, Clone)]
pub struct RunFlags {
    /// Validate only; make no catalog or OLAP changes
    #[arg(long)]
    pub dry: bool,

    /// Stop at the first error
    #[arg(long)]
    pub strict: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

/// Arguments for the reconcile command
#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Artifact paths that changed (repeatable; default: every artifact)
    #[arg(long = "changed", value_name = "PATH")]
    pub changed: Vec<String>,

    /// Artifact paths to migrate even if unchanged (repeatable)
    #[arg(long = "forced", value_name = "PATH")]
    pub forced: Vec<String>,

    #[command(flatten)]
    pub flags: RunFlags,
}

/// Arguments for the put command
#[derive(Args, Debug)]
pub struct PutArgs {
    /// Artifact path inside the project, e.g. /models/orders.sql
    pub path: String,

    /// File to read the artifact from, or `-` for stdin
    pub file: String,

    /// Fail if the artifact already exists
    #[arg(long)]
    pub create_only: bool,

    #[command(flatten)]
    pub flags: RunFlags,
}

/// Arguments for the rm command
#[derive(Args, Debug)]
pub struct RmArgs {
    /// Artifact path to delete
    pub path: String,

    #[command(flatten)]
    pub flags: RunFlags,
}

/// Arguments for the mv command
#[derive(Args, Debug)]
pub struct MvArgs {
    /// Current artifact path
    pub from: String,

    /// New artifact path
    pub to: String,

    #[command(flatten)]
    pub flags: RunFlags,
}

/// Arguments for the refresh command
#[derive(Args, Debug)]
pub struct RefreshArgs {
    /// Artifact path to refresh
    pub path: String,

    #[command(flatten)]
    pub flags: RunFlags,
}

/// Arguments for the catalog command
#[derive(Args, Debug)]
pub struct CatalogArgs {
    #[command(subcommand)]
    pub command: CatalogCommands,
}

/// Catalog subcommands
#[derive(Subcommand, Debug)]
pub enum CatalogCommands {
    /// List catalog entries
    Ls(CatalogLsArgs),

    /// Show one entry as JSON
    Show(CatalogShowArgs),

    /// Register OLAP tables no artifact manages
    Sync,
}

/// Entry kinds accepted by `--kind`
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindFilter {
    Table,
    Source,
    Model,
    MetricsView,
}

/// Arguments for catalog ls
#[derive(Args, Debug)]
pub struct CatalogLsArgs {
    /// Only list entries of this kind
    #[arg(short, long, value_enum)]
    pub kind: Option<KindFilter>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

/// Arguments for catalog show
#[derive(Args, Debug)]
pub struct CatalogShowArgs {
    /// Entry name
    pub name: String,
}

#[cfg(test)]
#[path = "cli_test.rs"]
mod tests;
