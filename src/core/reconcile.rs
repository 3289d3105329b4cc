//! Git-first reconciliation: fold filesystem/git reality into the view of
//! the registry.
//!
//! The registry is a cache of reality, not the other way around. Where the
//! two disagree, the reconciled view adopts git: runs whose worktrees are
//! gone are parked in the view, unknown worktrees are surfaced, and branch
//! changes are reported but never silently adopted.

use crate::core::error::{HarnessError, Result};
use crate::core::git::GitDriver;
use crate::core::handoff::Handoff;
use crate::core::state::{RunState, State};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Reconcile cache lifetime.
pub const CACHE_DURATION_SECS: i64 = 30;

/// Name of the per-worktree sigil gating destructive operations.
pub const MARKER_FILE: &str = ".harness-worktree";

/// A discrepancy between the registry and git reality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Drift {
    /// Registry run has no worktree on disk; parked in the view.
    MissingWorktree { run_id: Uuid, run_name: String },
    /// Worktree exists but the marker file is gone.
    MarkerMissing { run_id: Uuid, path: PathBuf },
    /// Worktree has a different branch checked out than recorded.
    BranchChanged {
        run_id: Uuid,
        recorded: String,
        actual: String,
    },
    /// Git reports a worktree the registry does not know.
    UnknownWorktree {
        path: PathBuf,
        branch: Option<String>,
    },
    /// The focus project's working tree has uncommitted changes.
    DirtyTree {
        project_id: Uuid,
        files_changed: usize,
    },
}

impl std::fmt::Display for Drift {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingWorktree { run_name, .. } => {
                write!(f, "run '{run_name}' has no worktree on disk (parked)")
            }
            Self::MarkerMissing { path, .. } => {
                write!(f, "worktree {} lost its marker file", path.display())
            }
            Self::BranchChanged {
                recorded, actual, ..
            } => write!(
                f,
                "worktree branch changed: recorded '{recorded}', actual '{actual}'"
            ),
            Self::UnknownWorktree { path, .. } => {
                write!(f, "unregistered worktree at {}", path.display())
            }
            Self::DirtyTree { files_changed, .. } => {
                write!(f, "focus project tree is dirty ({files_changed} files)")
            }
        }
    }
}

/// Per-run health gathered during reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHealth {
    pub run_id: Uuid,
    pub worktree_present: bool,
    pub marker_present: bool,
    pub clean: Option<bool>,
    /// (passing, total) from the worktree's handoff, when readable.
    pub handoff_counts: Option<(usize, usize)>,
    pub first_open_task: Option<String>,
}

/// The registry folded together with git reality.
#[derive(Debug, Clone)]
pub struct ReconciledView {
    pub state: State,
    pub drift: Vec<Drift>,
    pub runs: Vec<RunHealth>,
    pub refreshed_at: DateTime<Utc>,
}

impl ReconciledView {
    #[must_use]
    pub fn run_health(&self, run_id: Uuid) -> Option<&RunHealth> {
        self.runs.iter().find(|h| h.run_id == run_id)
    }
}

/// Reconciliation engine with a 30-second memoized view.
#[derive(Debug, Default)]
pub struct Reconciler {
    cache: Option<(BTreeSet<PathBuf>, ReconciledView)>,
}

impl Reconciler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops any cached view; every mutating command calls this first.
    pub fn invalidate(&mut self) {
        self.cache = None;
    }

    /// Returns a fresh-enough view, refreshing from git when the cache is
    /// cold, aged out, or keyed on a different project set.
    pub fn view(&mut self, state: State) -> Result<ReconciledView> {
        let key: BTreeSet<PathBuf> = state
            .projects
            .iter()
            .map(|p| p.repo_path.clone())
            .collect();

        if let Some((cached_key, view)) = &self.cache {
            let fresh = Utc::now() - view.refreshed_at < Duration::seconds(CACHE_DURATION_SECS);
            if fresh && *cached_key == key {
                return Ok(view.clone());
            }
        }

        let view = reconcile(state)?;
        self.cache = Some((key, view.clone()));
        Ok(view)
    }
}

/// One full reconciliation pass over every registered project.
pub fn reconcile(state: State) -> Result<ReconciledView> {
    let mut view = ReconciledView {
        state,
        drift: Vec::new(),
        runs: Vec::new(),
        refreshed_at: Utc::now(),
    };

    for project in view.state.projects.clone() {
        let git = GitDriver::new(&project.repo_path);
        if !git.is_repo() {
            continue;
        }

        let worktrees = git.worktree_list()?;
        let registered: Vec<(Uuid, PathBuf)> = view
            .state
            .runs
            .iter()
            .filter(|r| r.project_id == project.id)
            .map(|r| (r.id, r.worktree_path.clone()))
            .collect();

        // Registry runs vs. git-reported worktrees.
        for run in view
            .state
            .runs
            .iter_mut()
            .filter(|r| r.project_id == project.id)
        {
            let reported = worktrees.iter().find(|w| w.path == run.worktree_path);

            let Some(entry) = reported else {
                view.drift.push(Drift::MissingWorktree {
                    run_id: run.id,
                    run_name: run.run_name.clone(),
                });
                // Adopt reality in the view; persisting is the caller's call.
                run.state = RunState::Parked;
                view.runs.push(RunHealth {
                    run_id: run.id,
                    worktree_present: false,
                    marker_present: false,
                    clean: None,
                    handoff_counts: None,
                    first_open_task: None,
                });
                continue;
            };

            let marker_present = run.worktree_path.join(MARKER_FILE).exists();
            if !marker_present {
                view.drift.push(Drift::MarkerMissing {
                    run_id: run.id,
                    path: run.worktree_path.clone(),
                });
            }

            if let Some(actual) = &entry.branch {
                if *actual != run.branch_name {
                    view.drift.push(Drift::BranchChanged {
                        run_id: run.id,
                        recorded: run.branch_name.clone(),
                        actual: actual.clone(),
                    });
                }
            }

            let clean = git.status_of(&run.worktree_path).ok().map(|s| s.clean);
            let handoff = Handoff::load(&run.worktree_path.join("handoff.json")).ok();
            view.runs.push(RunHealth {
                run_id: run.id,
                worktree_present: true,
                marker_present,
                clean,
                handoff_counts: handoff.as_ref().map(Handoff::count_passing),
                first_open_task: handoff
                    .as_ref()
                    .and_then(|h| h.first_open_task())
                    .map(|t| t.title.clone()),
            });
        }

        // Git-reported worktrees the registry does not know. The primary
        // checkout of the repo itself is not drift.
        for entry in &worktrees {
            if entry.is_bare || entry.path == project.repo_path {
                continue;
            }
            if !registered.iter().any(|(_, p)| *p == entry.path) {
                view.drift.push(Drift::UnknownWorktree {
                    path: entry.path.clone(),
                    branch: entry.branch.clone(),
                });
            }
        }

        // Dirty-tree policy input for the focus project.
        if view.state.focus_project_id == Some(project.id) {
            if let Ok(status) = git.status() {
                if !status.clean {
                    view.drift.push(Drift::DirtyTree {
                        project_id: project.id,
                        files_changed: status.files_changed,
                    });
                }
            }
        }
    }

    Ok(view)
}

/// Refuses the mutation when the given working tree is dirty.
pub fn ensure_clean(git: &GitDriver, path: &Path) -> Result<()> {
    let status = git.status_of(path)?;
    if status.clean {
        Ok(())
    } else {
        Err(HarnessError::DirtyTree {
            path: path.to_path_buf(),
            files_changed: status.files_changed,
        })
    }
}

/// Path-safety gate for destructive worktree operations.
///
/// Normalize, then allowlist (under a registered project's repo or its
/// `runs/` directory), then require the marker file. Any failure refuses
/// with `UnsafePath`; callers never delete on failure.
pub fn validate_worktree_path(path: &Path, state: &State) -> Result<PathBuf> {
    let real = path
        .canonicalize()
        .map_err(|e| HarnessError::UnsafePath(format!("{}: {e}", path.display())))?;

    let allowed = state.projects.iter().any(|project| {
        let repo_real = project
            .repo_path
            .canonicalize()
            .unwrap_or_else(|_| project.repo_path.clone());
        real.starts_with(repo_real.join("runs")) || real.starts_with(&repo_real)
    });
    if !allowed {
        return Err(HarnessError::UnsafePath(format!(
            "{} is not under a registered project",
            real.display()
        )));
    }

    if !real.join(MARKER_FILE).exists() {
        return Err(HarnessError::UnsafePath(format!(
            "{} has no {MARKER_FILE} marker",
            real.display()
        )));
    }

    Ok(real)
}
