//! CLI argument definitions using clap derive

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Keel - push-to-deploy build and release orchestrator
///
/// Builds each pushed commit into its own directory and atomically
/// repoints `latest` at the released one.
#[derive(Parser, Debug)]
#[command(name = "keel")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "KEEL_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub paths: PathArgs,
}

/// Locations shared by every subcommand
#[derive(Args, Debug, Clone, Default)]
pub struct PathArgs {
    /// Plugin manifest describing the hooks
    #[arg(short = 'p', long, global = true, env = "KEEL_PLUGIN")]
    pub plugin: Option<PathBuf>,

    /// Directory holding one build directory per commit
    #[arg(short = 'b', long, global = true, env = "KEEL_BUILDS_PATH")]
    pub builds_path: Option<PathBuf>,

    /// Ledger and cache database
    #[arg(short = 'd', long, global = true, env = "KEEL_DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// Bare git repository
    #[arg(short = 'r', long, global = true, env = "KEEL_REPO_PATH")]
    pub repo_path: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a reference
    Build(BuildArgs),

    /// Release a reference that has already been built
    Release(ReleaseArgs),

    /// Install the post-receive hook into the repository
    Install(InstallArgs),

    /// Write a starter plugin manifest
    Init(InitArgs),

    /// Show ledger entries and the live release
    Status(StatusArgs),

    /// Read and write the checksum cache (for use from hooks)
    Cache(CacheArgs),
}

/// Arguments for the build command
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Reference to build (branch, tag or commit)
    pub reference: String,

    /// Who triggered the build
    pub actor: String,

    /// Release the snapshot after a successful build
    #[arg(long)]
    pub release: bool,

    /// Claim again if the previous attempt failed
    #[arg(long)]
    pub retry: bool,
}

/// Arguments for the release command
#[derive(Parser, Debug)]
pub struct ReleaseArgs {
    /// Reference to release
    pub reference: String,

    /// Who triggered the release
    pub actor: String,

    /// Claim again if the previous attempt failed
    #[arg(long)]
    pub retry: bool,
}

/// Arguments for the install command
#[derive(Parser, Debug)]
pub struct InstallArgs {
    /// keel executable the hook should call (defaults to this binary)
    #[arg(long)]
    pub cli_path: Option<PathBuf>,

    /// Overwrite an existing post-receive hook
    #[arg(short, long)]
    pub force: bool,
}

/// Arguments for the init command
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Where to write the manifest
    #[arg(default_value = "keel.toml")]
    pub path: PathBuf,

    /// Overwrite an existing file
    #[arg(short, long)]
    pub force: bool,
}

/// Arguments for the status command
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Number of ledger entries to show
    #[arg(short, long, default_value = "20")]
    pub limit: usize,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,

    /// Show the transition history of one commit instead
    #[arg(long)]
    pub sha: Option<String>,
}

/// Output format for list-style commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Print the checksum stored for a key
    Get { key: String },

    /// Store a checksum for a key
    Set { key: String, checksum: String },

    /// Exit 0 if the key holds exactly this checksum, 1 otherwise
    Check { key: String, checksum: String },

    /// Print the SHA-256 of one or more files
    Checksum {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Remove a key
    Remove { key: String },

    /// List all entries
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },
}
