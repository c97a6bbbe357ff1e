use clap::{ArgAction, Parser, Subcommand};
use forgectl_common::BuildStatus;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(version, about = "Build orchestrator for the pkgforge package distribution")]
pub struct Args {
    /// Verbose logging
    #[arg(short, long, action(ArgAction::Count), global = true)]
    pub verbose: u8,
    /// Path to the build queue database
    #[arg(long, default_value = "buildqueue.db", global = true)]
    pub db: PathBuf,
    #[command(subcommand)]
    pub subcommand: SubCommand,
}

#[derive(Debug, Subcommand)]
pub enum SubCommand {
    /// Scan the recipe repository and record a sync point
    Sync(Sync),
    /// Add recipes to the build queue
    Queue(Queue),
    /// Force-queue a single package ahead of normal work
    Force(Force),
    /// Claim queued builds and run the build driver
    Build(Build),
    /// Show queue status
    Status(Status),
    /// Show build statistics
    Stats,
    /// Clear builds from the queue
    Reset(Reset),
    /// Cancel a queued build
    Cancel(Cancel),
    /// List builds
    List(List),
    /// Generate catalogue metadata
    Generate(Generate),
}

#[derive(Debug, clap::Args)]
pub struct Sync {
    /// Path to the recipe repository
    #[arg(long)]
    pub repo: PathBuf,
}

#[derive(Debug, clap::Args)]
pub struct Queue {
    /// Path to the recipe repository
    #[arg(long)]
    pub repo: PathBuf,
    /// Package name to queue
    #[arg(long, conflicts_with = "all")]
    pub pkg: Option<String>,
    /// Queue every recipe
    #[arg(long)]
    pub all: bool,
    /// Architecture to queue for (default: all supported architectures)
    #[arg(long)]
    pub arch: Option<String>,
    /// Build priority, higher builds first
    #[arg(long, default_value_t = 10)]
    pub priority: i32,
    /// Mark the builds as forced
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, clap::Args)]
pub struct Force {
    /// Path to the recipe repository
    #[arg(long)]
    pub repo: PathBuf,
    /// Package name to build
    #[arg(long)]
    pub pkg: String,
    /// Architecture to build for
    #[arg(long, default_value = "x86_64-Linux")]
    pub arch: String,
}

#[derive(Debug, clap::Args)]
pub struct Build {
    /// Path to the recipe repository
    #[arg(long)]
    pub repo: PathBuf,
    /// Number of parallel workers
    #[arg(long, default_value_t = 1)]
    pub workers: usize,
    /// Architecture to build
    #[arg(long, default_value = "x86_64-Linux")]
    pub arch: String,
    /// Path to the build driver
    #[arg(long, default_value = "sbuild")]
    pub sbuild: PathBuf,
    /// Maximum runtime in minutes (0 = run until the queue drains)
    #[arg(long, default_value_t = 0)]
    pub max_duration: u64,
    /// Run one specific build id instead of draining the queue
    #[arg(long)]
    pub id: Option<i64>,
}

#[derive(Debug, clap::Args)]
pub struct Status {
    /// Show history for one package
    #[arg(long)]
    pub pkg: Option<String>,
}

#[derive(Debug, clap::Args)]
pub struct Reset {
    /// Clear only failed builds
    #[arg(long)]
    pub failed: bool,
    /// Clear only queued builds
    #[arg(long)]
    pub queued: bool,
}

#[derive(Debug, clap::Args)]
pub struct Cancel {
    /// Build id to cancel
    pub id: i64,
}

#[derive(Debug, clap::Args)]
pub struct List {
    /// Filter by status
    #[arg(long)]
    pub status: Option<BuildStatus>,
    /// Maximum number of builds to list (0 = unlimited)
    #[arg(long, default_value_t = 20)]
    pub limit: i64,
}

#[derive(Debug, clap::Args)]
pub struct Generate {
    /// Output directory for catalogue files
    #[arg(long, default_value = "./artifacts")]
    pub output: PathBuf,
    /// Generate the bincache catalogue
    #[arg(long)]
    pub bincache: bool,
    /// Generate the pkgcache catalogue
    #[arg(long)]
    pub pkgcache: bool,
    /// Architecture to generate for
    #[arg(long, default_value = "x86_64-Linux")]
    pub arch: String,
}
