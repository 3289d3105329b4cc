//! Structured error types.
//!
//! Every failure the commander can surface maps to one of the variants
//! below. Each variant carries a stable machine tag (for the event log and
//! JSON output), a user-facing message, and a process exit code.

use std::path::PathBuf;

/// Errors surfaced by commander operations.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// Handoff document failed validation.
    #[error("Invalid handoff: {0}")]
    Schema(String),

    /// The registry file exists but cannot be parsed.
    #[error("State file is corrupt: {0}")]
    StateCorrupt(String),

    /// Another process holds the controller lease.
    #[error("Controller lock held by PID {pid}")]
    LockHeld { pid: i32 },

    /// Lock and heartbeat files reference different sessions.
    #[error("Lock and heartbeat are inconsistent; use --force to take over")]
    LockInconsistent,

    /// Working tree has uncommitted changes.
    #[error("Working tree is dirty ({files_changed} files changed) at {}", path.display())]
    DirtyTree { path: PathBuf, files_changed: usize },

    /// Run name collides with an existing run, branch, or worktree.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A run's worktree is gone from the filesystem.
    #[error("Worktree missing for run '{0}'")]
    MissingWorktree(String),

    /// A worktree exists but lacks the `.harness-worktree` marker.
    #[error("Marker file missing in {}", .0.display())]
    MarkerMissing(PathBuf),

    /// Path failed the normalize/allowlist/marker safety gate.
    #[error("Refusing unsafe path: {0}")]
    UnsafePath(String),

    /// Remote rejected the push (non-fast-forward).
    #[error("Push rejected by remote: {0}")]
    PushRejected(String),

    /// Remote refused authentication.
    #[error("Authentication failed while pushing: {0}")]
    AuthError(String),

    /// Unresolved documentation drift in strict mode.
    #[error("Documentation drift: {} unresolved item(s): {}", .0.len(), .0.join(", "))]
    DocDrift(Vec<String>),

    /// Git invocation failed; stderr is captured.
    #[error("Git command failed: git {command}\n{stderr}")]
    Git { command: String, stderr: String },

    /// IO error outside git.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything else that aborts a command.
    #[error("{0}")]
    Other(String),
}

impl HarnessError {
    /// Stable machine tag for logs and JSON output.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Schema(_) => "SchemaError",
            Self::StateCorrupt(_) => "StateCorrupt",
            Self::LockHeld { .. } => "LockHeld",
            Self::LockInconsistent => "LockInconsistent",
            Self::DirtyTree { .. } => "DirtyTree",
            Self::Conflict(_) => "Conflict",
            Self::MissingWorktree(_) => "MissingWorktree",
            Self::MarkerMissing(_) => "MarkerMissing",
            Self::UnsafePath(_) => "UnsafePath",
            Self::PushRejected(_) => "PushRejected",
            Self::AuthError(_) => "AuthError",
            Self::DocDrift(_) => "DocDrift",
            Self::Git { .. } => "GitError",
            Self::Io(_) => "IoError",
            Self::Other(_) => "Error",
        }
    }

    /// One-line remediation suggestion, where one exists.
    #[must_use]
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::DirtyTree { .. } => Some("Commit or stash changes first"),
            Self::StateCorrupt(_) => Some("Run 'c-harness doctor --repair-state' to fix"),
            Self::LockHeld { .. } => {
                Some("Wait for the controller to finish, or stop that process")
            }
            Self::LockInconsistent => Some("Re-run with --force to take over the lease"),
            Self::DocDrift(_) => Some("Run finish without --doc-strict to triage interactively"),
            Self::PushRejected(_) => Some("Fetch and rebase the run branch, then finish again"),
            _ => None,
        }
    }

    /// Process exit code per the command contract.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Schema(_) | Self::Conflict(_) => 2,
            Self::LockHeld { .. } | Self::LockInconsistent => 3,
            Self::DirtyTree { .. } => 4,
            Self::UnsafePath(_) => 5,
            Self::DocDrift(_) => 6,
            Self::PushRejected(_) => 7,
            _ => 1,
        }
    }
}

/// Result type using `HarnessError`.
pub type Result<T> = std::result::Result<T, HarnessError>;
