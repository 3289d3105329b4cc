//! CLI command definitions.

use super::output::OutputFormat;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RunModeArg {
    Greenfield,
    Brownfield,
}

/// Harness Commander - run and supervise autonomous coding agents in
/// isolated git worktrees.
#[derive(Parser)]
#[command(name = "c-harness")]
#[command(version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "table")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Start a new agent run (branch + worktree + handoff)
    Start(StartArgs),

    /// Execute the agent inside a run's worktree
    Run(RunArgs),

    /// Finish a run: verify the handoff, check docs, push the branch
    Finish(FinishArgs),

    /// Remove a run's worktree (and optionally its branch)
    Clean(CleanArgs),

    /// List runs known to the registry
    List,

    /// Show the cockpit: projects, runs, and drift warnings
    Status,

    /// Show the single next recommended action
    Next,

    /// Start an interactive controller session with a heartbeat
    Session(SessionArgs),

    /// Show or set the focus project
    #[command(subcommand)]
    Focus(FocusCommands),

    /// Capture, list, promote, or dismiss inbox items
    Inbox(InboxArgs),

    /// Health-check commander state files
    Doctor(DoctorArgs),

    /// Check the installation and home directory layout
    Bootstrap(BootstrapArgs),

    /// Print the handoff.json schema template
    Schema,
}

#[derive(Args)]
pub struct StartArgs {
    /// Name of the run (used for the branch and the worktree folder)
    pub run_name: String,

    /// Path to the target repository
    #[arg(long, default_value = ".")]
    pub repo_path: PathBuf,

    /// Path to an existing handoff.json to copy into the worktree
    #[arg(long)]
    pub handoff_path: Option<PathBuf>,

    /// Run mode: greenfield generates a template handoff
    #[arg(long, value_enum, default_value = "greenfield")]
    pub mode: RunModeArg,

    /// Take over a stale or inconsistent controller lock
    #[arg(long)]
    pub force_lock: bool,
}

#[derive(Args)]
pub struct RunArgs {
    /// Name of the run to execute
    pub run_name: String,

    /// Path to the target repository
    #[arg(long, default_value = ".")]
    pub repo_path: PathBuf,

    /// Agent binary to spawn
    #[arg(long, default_value = "claude")]
    pub agent_binary: PathBuf,

    /// Model identifier passed to the agent
    #[arg(long)]
    pub model: Option<String>,

    /// Take over a stale or inconsistent controller lock
    #[arg(long)]
    pub force_lock: bool,
}

#[derive(Args)]
pub struct FinishArgs {
    /// Name of the run to finish
    pub run_name: String,

    /// Path to the target repository
    #[arg(long, default_value = ".")]
    pub repo_path: PathBuf,

    /// Path to the handoff (defaults to the worktree's handoff.json)
    #[arg(long)]
    pub handoff_path: Option<PathBuf>,

    /// Abort when documentation drift is unresolved
    #[arg(long)]
    pub doc_strict: bool,

    /// Finish even if tasks are incomplete
    #[arg(long, short = 'F')]
    pub force: bool,

    /// Take over a stale or inconsistent controller lock
    #[arg(long)]
    pub force_lock: bool,
}

#[derive(Args)]
pub struct CleanArgs {
    /// Name of the run to clean
    pub run_name: String,

    /// Also delete the local run branch
    #[arg(long)]
    pub delete_branch: bool,

    /// Clean even if the run is not finished or parked
    #[arg(long, short = 'F')]
    pub force: bool,

    /// Take over a stale or inconsistent controller lock
    #[arg(long)]
    pub force_lock: bool,
}

#[derive(Args)]
pub struct SessionArgs {
    /// Take over a stale or inconsistent controller lock
    #[arg(long)]
    pub force_lock: bool,
}

#[derive(Subcommand)]
pub enum FocusCommands {
    /// Show the current focus project
    Show,
    /// Set the focus project by id or name
    Set(FocusSetArgs),
}

#[derive(Args)]
pub struct FocusSetArgs {
    /// Project id (or unique prefix) or name
    pub project: String,

    /// Take over a stale or inconsistent controller lock
    #[arg(long)]
    pub force_lock: bool,
}

#[derive(Args)]
pub struct InboxArgs {
    /// Text to capture (observer-safe; needs no lease)
    pub text: Option<String>,

    /// List inbox items
    #[arg(long = "list", conflicts_with_all = ["promote", "dismiss"])]
    pub list_items: bool,

    /// Promote an item (by id prefix) to a task on the focus project
    #[arg(long, value_name = "ID")]
    pub promote: Option<String>,

    /// Dismiss an item (by id prefix), keeping it in history
    #[arg(long, value_name = "ID", conflicts_with = "promote")]
    pub dismiss: Option<String>,

    /// Take over a stale or inconsistent controller lock
    #[arg(long)]
    pub force_lock: bool,
}

#[derive(Args)]
pub struct DoctorArgs {
    /// Back up a corrupt registry and start fresh
    #[arg(long)]
    pub repair_state: bool,

    /// Take over a stale or inconsistent controller lock
    #[arg(long)]
    pub force_lock: bool,
}

#[derive(Args)]
pub struct BootstrapArgs {
    /// Create any missing home directories and files
    #[arg(long)]
    pub apply: bool,
}
