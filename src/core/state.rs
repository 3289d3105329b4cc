//! Registry of projects, runs, tasks, and inbox items.
//!
//! A single `state.json` under the commander home is the only durable
//! registry. Writes go through the atomic temp-file protocol so readers
//! never observe a partial file; a leftover temp file from a crashed writer
//! is deleted on the next load.

use crate::core::error::{HarnessError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Project lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Active,
    Archived,
}

/// A registered repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub repo_path: PathBuf,
    pub status: ProjectStatus,
    pub last_touched_at: DateTime<Utc>,
}

impl Project {
    pub fn new(name: impl Into<String>, repo_path: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            repo_path: repo_path.into(),
            status: ProjectStatus::Active,
            last_touched_at: Utc::now(),
        }
    }
}

/// Run state, registry-side.
///
/// `Parked` and `Missing` are terminal-until-reconciled: they mean git
/// reality contradicted the registry and a human (or `doctor`) must decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Created,
    Running,
    Finished,
    Parked,
    Missing,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Parked => "parked",
            Self::Missing => "missing",
        };
        write!(f, "{s}")
    }
}

/// One isolated unit of agent work: a worktree plus a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: Uuid,
    pub project_id: Uuid,
    pub run_name: String,
    pub worktree_path: PathBuf,
    pub branch_name: String,
    pub state: RunState,
    pub last_command: Option<String>,
    pub last_result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_touched_at: DateTime<Utc>,
}

/// A lightweight task card tracked in the registry (not the handoff task).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: Uuid,
    pub project_id: Uuid,
    pub title: String,
    pub column: String,
    pub created_at: DateTime<Utc>,
}

/// Triage status for an inbox item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriageStatus {
    Promoted,
    Dismissed,
}

/// A captured thought awaiting triage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxItem {
    pub id: Uuid,
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub triage_status: Option<TriageStatus>,
}

impl InboxItem {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            created_at: Utc::now(),
            triage_status: None,
        }
    }
}

/// Complete commander state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct State {
    #[serde(default)]
    pub focus_project_id: Option<Uuid>,
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub runs: Vec<Run>,
    #[serde(default)]
    pub tasks: Vec<TaskRecord>,
    #[serde(default)]
    pub inbox: Vec<InboxItem>,
}

impl State {
    #[must_use]
    pub fn project(&self, id: Uuid) -> Option<&Project> {
        self.projects.iter().find(|p| p.id == id)
    }

    #[must_use]
    pub fn project_by_name(&self, name: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.name == name)
    }

    #[must_use]
    pub fn focus_project(&self) -> Option<&Project> {
        self.focus_project_id.and_then(|id| self.project(id))
    }

    #[must_use]
    pub fn run_by_name(&self, run_name: &str) -> Option<&Run> {
        self.runs.iter().find(|r| r.run_name == run_name)
    }

    pub fn run_by_name_mut(&mut self, run_name: &str) -> Option<&mut Run> {
        self.runs.iter_mut().find(|r| r.run_name == run_name)
    }

    #[must_use]
    pub fn inbox_item(&self, id: Uuid) -> Option<&InboxItem> {
        self.inbox.iter().find(|i| i.id == id)
    }
}

/// Writes `bytes` to `path` atomically: temp file in the same directory,
/// flush + fsync, then rename over the destination.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp_path = tmp_path_for(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = File::create(&tmp_path)?;
    file.write_all(bytes)?;
    file.flush()?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".tmp");
    path.with_file_name(name)
}

/// Durable store for the registry, rooted at an injected home directory.
#[derive(Debug, Clone)]
pub struct StateStore {
    home: PathBuf,
}

impl StateStore {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    #[must_use]
    pub fn home(&self) -> &Path {
        &self.home
    }

    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        self.home.join("state.json")
    }

    #[must_use]
    pub fn tmp_path(&self) -> PathBuf {
        self.home.join("state.json.tmp")
    }

    #[must_use]
    pub fn inbox_log_path(&self) -> PathBuf {
        self.home.join("inbox.log")
    }

    /// Loads the registry, recovering from an interrupted write.
    ///
    /// Missing file yields an empty state. A malformed file is surfaced as
    /// `StateCorrupt`; see [`StateStore::repair`].
    pub fn load(&self) -> Result<State> {
        std::fs::create_dir_all(&self.home)?;

        let tmp = self.tmp_path();
        if tmp.exists() {
            tracing::warn!(path = %tmp.display(), "removing incomplete state write");
            std::fs::remove_file(&tmp)?;
        }

        let path = self.state_path();
        if !path.exists() {
            return Ok(State::default());
        }

        let bytes = std::fs::read(&path)?;
        serde_json::from_slice(&bytes).map_err(|e| HarnessError::StateCorrupt(e.to_string()))
    }

    /// Saves the registry atomically.
    pub fn save(&self, state: &State) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(state)
            .map_err(|e| HarnessError::Other(format!("serialize state: {e}")))?;
        atomic_write(&self.state_path(), &bytes)
    }

    /// Backs up a corrupt registry and returns a fresh empty state.
    ///
    /// Returns the backup path when a corrupt file was actually found.
    pub fn repair(&self) -> Result<(State, Option<PathBuf>)> {
        match self.load() {
            Ok(state) => Ok((state, None)),
            Err(HarnessError::StateCorrupt(_)) => {
                let backup = self.home.join(format!(
                    "state.json.corrupt-{}",
                    Utc::now().format("%Y%m%dT%H%M%SZ")
                ));
                std::fs::rename(self.state_path(), &backup)?;
                let state = State::default();
                self.save(&state)?;
                Ok((state, Some(backup)))
            }
            Err(e) => Err(e),
        }
    }

    /// Appends an inbox capture without touching the registry.
    ///
    /// This is the one write an observer may perform: a dedicated
    /// append-only log the controller drains on its next mutation.
    pub fn capture_inbox_item(&self, item: &InboxItem) -> Result<()> {
        std::fs::create_dir_all(&self.home)?;
        let line = serde_json::to_string(item)
            .map_err(|e| HarnessError::Other(format!("serialize inbox item: {e}")))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.inbox_log_path())?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Folds pending captures into the state and truncates the capture log.
    /// Returns the number of items drained. Controller-only.
    pub fn drain_inbox_captures(&self, state: &mut State) -> Result<usize> {
        let path = self.inbox_log_path();
        if !path.exists() {
            return Ok(0);
        }

        let content = std::fs::read_to_string(&path)?;
        let mut drained = 0;
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<InboxItem>(line) {
                Ok(item) => {
                    if state.inbox_item(item.id).is_none() {
                        state.inbox.push(item);
                        drained += 1;
                    }
                }
                Err(e) => tracing::warn!(error = %e, "skipping malformed inbox capture"),
            }
        }

        std::fs::remove_file(&path)?;
        Ok(drained)
    }

    /// Pending captures not yet drained into the registry (read-only view).
    pub fn pending_inbox_captures(&self) -> Result<Vec<InboxItem>> {
        let path = self.inbox_log_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect())
    }
}

/// Resolves the commander home (`~/.cloud-harness`) from `$HOME`.
#[must_use]
pub fn commander_home() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cloud-harness")
}
