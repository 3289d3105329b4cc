//! Run lifecycle: start, run, finish, clean.
//!
//! Every mutation follows Plan -> Execute -> Verify -> Commit. The plan and
//! its postconditions go to the event log before anything touches git; the
//! registry is written only after every postcondition verifies, so a failed
//! command leaves the registry exactly as it found it.

use crate::adapters::runtime::{AgentAdapter, AgentInput, ExecutionReport};
use crate::core::doc_check::{check_drift_before_finish, extract_cli_flags};
use crate::core::error::{HarnessError, Result};
use crate::core::events::{EventKind, EventLog};
use crate::core::git::{GitDriver, PushOutcome};
use crate::core::handoff::Handoff;
use crate::core::reconcile::{ensure_clean, validate_worktree_path, MARKER_FILE};
use crate::core::state::{
    InboxItem, Project, Run, RunState, State, StateStore, TaskRecord, TriageStatus,
};
use crate::event_fields;
use chrono::Utc;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Handoff file name inside a run's worktree.
pub const HANDOFF_FILE: &str = "handoff.json";

/// Run mode for `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Fresh work: a template handoff is generated.
    Greenfield,
    /// Existing plan: the provided handoff is copied in.
    Brownfield,
}

#[derive(Debug, Clone)]
pub struct StartOptions {
    pub run_name: String,
    pub repo_path: PathBuf,
    pub handoff_path: Option<PathBuf>,
    pub mode: RunMode,
}

#[derive(Debug, Clone)]
pub struct FinishOptions {
    pub run_name: String,
    pub handoff_path: Option<PathBuf>,
    pub doc_strict: bool,
    /// Waives the all-tasks-passing precondition.
    pub force: bool,
}

#[derive(Debug, Clone)]
pub struct CleanOptions {
    pub run_name: String,
    pub delete_branch: bool,
    /// Waives the finished-or-parked precondition.
    pub force: bool,
}

/// Result of a successful finish.
#[derive(Debug, Clone)]
pub struct FinishOutcome {
    pub branch: String,
    pub pr_hint: Option<String>,
}

/// Orchestrates run mutations over the git driver and the state store.
///
/// The engine assumes the caller holds the controller lease; it never
/// acquires one itself.
pub struct LifecycleEngine {
    store: StateStore,
    events: EventLog,
}

impl LifecycleEngine {
    pub fn new(store: StateStore, events: EventLog) -> Self {
        Self { store, events }
    }

    #[must_use]
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Loads the registry and folds in pending observer captures.
    fn load_for_mutation(&self) -> Result<State> {
        let mut state = self.store.load()?;
        let drained = self.store.drain_inbox_captures(&mut state)?;
        if drained > 0 {
            tracing::debug!(drained, "drained observer inbox captures");
        }
        Ok(state)
    }

    fn verify_fail(&self, command: &str, error: &HarnessError) {
        self.events.emit(
            EventKind::CommandVerifyFail,
            event_fields! {"command" => command, "error" => error.to_string(), "tag" => error.tag()},
        );
    }

    /// Creates the branch, worktree, marker, and handoff for a new run.
    pub fn start(&self, opts: &StartOptions) -> Result<Run> {
        let repo_path = opts
            .repo_path
            .canonicalize()
            .map_err(|e| HarnessError::Other(format!("repo path: {e}")))?;
        let git = GitDriver::new(&repo_path);
        if !git.is_repo() {
            return Err(HarnessError::Other(format!(
                "{} is not a git repository",
                repo_path.display()
            )));
        }

        let branch_name = format!("run/{}", opts.run_name);
        let worktree_path = repo_path.join("runs").join(&opts.run_name);

        let mut state = self.load_for_mutation()?;

        // Preconditions: clean tree, no collisions anywhere.
        ensure_clean(&git, &repo_path)?;
        if state.run_by_name(&opts.run_name).is_some() {
            return Err(HarnessError::Conflict(format!(
                "run '{}' already exists in the registry",
                opts.run_name
            )));
        }
        if git.branch_exists(&branch_name) {
            return Err(HarnessError::Conflict(format!(
                "branch '{branch_name}' already exists; choose a different run name"
            )));
        }
        if worktree_path.exists() {
            return Err(HarnessError::Conflict(format!(
                "worktree path {} already exists",
                worktree_path.display()
            )));
        }

        // The source handoff must parse before we create anything.
        let handoff = match (opts.mode, &opts.handoff_path) {
            (RunMode::Brownfield, Some(path)) => Handoff::load(path)?,
            (RunMode::Brownfield, None) => {
                return Err(HarnessError::Schema(
                    "brownfield start requires --handoff-path".to_string(),
                ))
            }
            (RunMode::Greenfield, Some(path)) => Handoff::load(path)?,
            (RunMode::Greenfield, None) => {
                let project_name = repo_name(&repo_path);
                Handoff::template(&project_name)
            }
        };

        self.events.emit(
            EventKind::CommandPlan,
            event_fields! {
                "command" => "start",
                "plan" => serde_json::json!({
                    "branch": branch_name,
                    "worktreePath": worktree_path.display().to_string(),
                    "baseRef": "HEAD",
                    "postconditions": [
                        "worktree exists",
                        "marker exists",
                        "branch checked out in worktree",
                        "handoff parses",
                    ],
                }),
            },
        );
        self.events
            .emit(EventKind::CommandExecute, event_fields! {"command" => "start"});

        // Execute. Harness-managed paths must never count as dirt in the
        // project tree.
        git.ensure_excludes(&["/runs/", "/.harness/"])?;
        git.worktree_add(&worktree_path, &branch_name, "HEAD")?;
        std::fs::write(worktree_path.join(MARKER_FILE), "{}\n")?;
        handoff.write(&worktree_path.join(HANDOFF_FILE))?;
        // Commit the scaffold on the run branch so the worktree starts clean.
        git.commit_all(&worktree_path, &format!("Initialize run {}", opts.run_name))?;

        // Verify postconditions.
        if let Err(e) = verify_start(&git, &worktree_path, &branch_name) {
            self.verify_fail("start", &e);
            return Err(e);
        }
        self.events
            .emit(EventKind::CommandVerifyOk, event_fields! {"command" => "start"});

        // Commit to the registry.
        let project_id = ensure_project(&mut state, &repo_path);
        let now = Utc::now();
        let run = Run {
            id: Uuid::new_v4(),
            project_id,
            run_name: opts.run_name.clone(),
            worktree_path,
            branch_name,
            state: RunState::Created,
            last_command: Some("start".to_string()),
            last_result: None,
            created_at: now,
            last_touched_at: now,
        };
        state.runs.push(run.clone());
        self.store.save(&state)?;
        self.events.emit(
            EventKind::StateUpdated,
            event_fields! {"run" => run.run_name, "state" => "created"},
        );

        Ok(run)
    }

    /// Spawns the agent in the run's worktree and records the outcome.
    pub fn run_agent(
        &self,
        run_name: &str,
        adapter: &mut dyn AgentAdapter,
    ) -> Result<ExecutionReport> {
        let mut state = self.load_for_mutation()?;
        let run = state
            .run_by_name(run_name)
            .ok_or_else(|| HarnessError::Other(format!("no run named '{run_name}'")))?
            .clone();

        if !run.worktree_path.exists() {
            return Err(HarnessError::MissingWorktree(run_name.to_string()));
        }

        let handoff_path = run.worktree_path.join(HANDOFF_FILE);
        Handoff::load(&handoff_path)?;

        {
            let entry = state
                .run_by_name_mut(run_name)
                .expect("run existence checked above");
            entry.state = RunState::Running;
            entry.last_command = Some(format!("run ({})", adapter.name()));
            entry.last_touched_at = Utc::now();
        }
        self.store.save(&state)?;

        self.events.emit(
            EventKind::CommandExecute,
            event_fields! {"command" => "run", "run" => run_name, "adapter" => adapter.name()},
        );

        let input = AgentInput {
            prompt: crate::adapters::claude_code::render_prompt(run_name, &handoff_path),
            handoff_path,
        };
        let report = adapter
            .execute(&run.worktree_path, &input)
            .map_err(|e| HarnessError::Other(format!("agent adapter failed: {e}")))?;

        // Exit 0 completes the run; anything else leaves it running with
        // the result recorded for the cockpit.
        {
            let entry = state
                .run_by_name_mut(run_name)
                .expect("run existence checked above");
            entry.last_result = Some(format!("agent exit {}", report.exit_code));
            entry.last_touched_at = Utc::now();
            if report.is_success() {
                entry.state = RunState::Finished;
            }
        }
        self.store.save(&state)?;
        self.events.emit(
            EventKind::StateUpdated,
            event_fields! {"run" => run_name, "agentExit" => report.exit_code},
        );

        Ok(report)
    }

    /// Verifies the handoff, checks doc drift, pushes the run branch.
    pub fn finish(&self, opts: &FinishOptions) -> Result<FinishOutcome> {
        let mut state = self.load_for_mutation()?;
        let run = state
            .run_by_name(&opts.run_name)
            .ok_or_else(|| HarnessError::Other(format!("no run named '{}'", opts.run_name)))?
            .clone();
        let project = state
            .project(run.project_id)
            .ok_or_else(|| HarnessError::Other("run has no project".to_string()))?
            .clone();

        self.events.emit(
            EventKind::CommandPlan,
            event_fields! {
                "command" => "finish",
                "plan" => serde_json::json!({
                    "branch": run.branch_name,
                    "remote": "origin",
                    "postconditions": ["remote branch at local head", "registry run finished"],
                }),
            },
        );

        if !run.worktree_path.exists() {
            let err = HarnessError::MissingWorktree(opts.run_name.clone());
            self.verify_fail("finish", &err);
            return Err(err);
        }

        // Dirty-tree policy: both the run's worktree and the project repo
        // must be clean; the worktree (the mutation target) is named first.
        let git = GitDriver::new(&project.repo_path);
        if let Err(e) = ensure_clean(&git, &run.worktree_path)
            .and_then(|()| ensure_clean(&git, &project.repo_path))
        {
            self.verify_fail("finish", &e);
            return Err(e);
        }

        let handoff_path = opts
            .handoff_path
            .clone()
            .unwrap_or_else(|| run.worktree_path.join(HANDOFF_FILE));
        let handoff = Handoff::load(&handoff_path)?;
        let (passing, total) = handoff.count_passing();
        if passing < total && !opts.force {
            let failing: Vec<String> = handoff
                .tasks
                .iter()
                .filter(|t| !t.passes)
                .map(|t| t.id.clone())
                .collect();
            let err = HarnessError::Schema(format!(
                "{} of {total} tasks passing; incomplete: {}",
                passing,
                failing.join(", ")
            ));
            self.verify_fail("finish", &err);
            return Err(err);
        }

        // Documentation drift gate: detect in the worktree, remember
        // decisions at the project repo so they outlive this run.
        let flags = extract_cli_flags(&run.worktree_path)?;
        let (pending, _store) =
            check_drift_before_finish(&run.worktree_path, &project.repo_path, &flags)?;
        if !pending.is_empty() {
            if opts.doc_strict {
                let err =
                    HarnessError::DocDrift(pending.into_iter().map(|d| d.item).collect());
                self.verify_fail("finish", &err);
                return Err(err);
            }
            for item in &pending {
                tracing::warn!(item = %item.item, location = %item.location, "undocumented change");
            }
        }

        self.events
            .emit(EventKind::CommandExecute, event_fields! {"command" => "finish"});

        // Push from the worktree so the branch ref is current.
        let worktree_git = GitDriver::new(&run.worktree_path);
        match worktree_git.push("origin", &run.branch_name)? {
            PushOutcome::Ok => {}
            PushOutcome::Rejected(stderr) => {
                let err = HarnessError::PushRejected(stderr);
                self.verify_fail("finish", &err);
                return Err(err);
            }
            PushOutcome::AuthError(stderr) => {
                let err = HarnessError::AuthError(stderr);
                self.verify_fail("finish", &err);
                return Err(err);
            }
        }

        // Verify: the remote-tracking ref matches the local head.
        let local = worktree_git.rev_parse("HEAD")?;
        let remote = worktree_git.rev_parse(&format!("refs/remotes/origin/{}", run.branch_name));
        match remote {
            Ok(remote) if remote == local => {}
            other => {
                let err = HarnessError::Other(format!(
                    "push verification failed: remote ref is {other:?}, local is {local}"
                ));
                self.verify_fail("finish", &err);
                return Err(err);
            }
        }
        self.events
            .emit(EventKind::CommandVerifyOk, event_fields! {"command" => "finish"});

        {
            let entry = state
                .run_by_name_mut(&opts.run_name)
                .expect("run existence checked above");
            entry.state = RunState::Finished;
            entry.last_command = Some("finish".to_string());
            entry.last_result = Some(format!("pushed {}", run.branch_name));
            entry.last_touched_at = Utc::now();
        }
        self.store.save(&state)?;
        self.events.emit(
            EventKind::StateUpdated,
            event_fields! {"run" => opts.run_name, "state" => "finished"},
        );

        Ok(FinishOutcome {
            branch: run.branch_name.clone(),
            pr_hint: pr_url_hint(&git, &run.branch_name),
        })
    }

    /// Removes a run's worktree (and optionally its branch) and drops the
    /// run from the registry.
    pub fn clean(&self, opts: &CleanOptions) -> Result<()> {
        let mut state = self.load_for_mutation()?;
        let run = state
            .run_by_name(&opts.run_name)
            .ok_or_else(|| HarnessError::Other(format!("no run named '{}'", opts.run_name)))?
            .clone();
        let project = state
            .project(run.project_id)
            .ok_or_else(|| HarnessError::Other("run has no project".to_string()))?
            .clone();

        if !matches!(run.state, RunState::Finished | RunState::Parked) && !opts.force {
            return Err(HarnessError::Conflict(format!(
                "run '{}' is {}; clean only finished or parked runs (or pass --force)",
                opts.run_name, run.state
            )));
        }

        self.events.emit(
            EventKind::CommandPlan,
            event_fields! {
                "command" => "clean",
                "plan" => serde_json::json!({
                    "worktreePath": run.worktree_path.display().to_string(),
                    "deleteBranch": opts.delete_branch,
                    "postconditions": ["worktree directory gone", "run removed from registry"],
                }),
            },
        );
        self.events
            .emit(EventKind::CommandExecute, event_fields! {"command" => "clean"});

        let git = GitDriver::new(&project.repo_path);
        if run.worktree_path.exists() {
            // The safety gate guards every destructive path operation.
            let safe_path = match validate_worktree_path(&run.worktree_path, &state) {
                Ok(path) => path,
                Err(e) => {
                    self.verify_fail("clean", &e);
                    return Err(e);
                }
            };
            git.worktree_remove(&safe_path, true)?;
        }

        if opts.delete_branch {
            // Soft-fail: the branch may already be gone.
            if let Err(e) = git.branch_delete(&run.branch_name, true) {
                tracing::warn!(branch = %run.branch_name, error = %e, "branch delete failed");
            }
        }

        if run.worktree_path.exists() {
            let err = HarnessError::Other(format!(
                "worktree {} still exists after removal",
                run.worktree_path.display()
            ));
            self.verify_fail("clean", &err);
            return Err(err);
        }
        self.events
            .emit(EventKind::CommandVerifyOk, event_fields! {"command" => "clean"});

        state.runs.retain(|r| r.id != run.id);
        self.store.save(&state)?;
        self.events.emit(
            EventKind::StateUpdated,
            event_fields! {"run" => opts.run_name, "state" => "removed"},
        );

        Ok(())
    }

    /// Sets the focus project by id or name.
    pub fn focus_set(&self, selector: &str) -> Result<Project> {
        let mut state = self.load_for_mutation()?;

        let project = selector
            .parse::<Uuid>()
            .ok()
            .and_then(|id| state.project(id))
            .or_else(|| state.project_by_name(selector))
            .cloned()
            .ok_or_else(|| {
                HarnessError::Other(format!("no project matching '{selector}'"))
            })?;

        state.focus_project_id = Some(project.id);
        if let Some(entry) = state.projects.iter_mut().find(|p| p.id == project.id) {
            entry.last_touched_at = Utc::now();
        }
        self.store.save(&state)?;
        self.events.emit(
            EventKind::StateUpdated,
            event_fields! {"focusProjectId" => project.id},
        );
        Ok(project)
    }

    /// Promotes an inbox item into a task on the focus project.
    pub fn inbox_promote(&self, id_prefix: &str) -> Result<TaskRecord> {
        let mut state = self.load_for_mutation()?;
        let focus_id = state
            .focus_project_id
            .ok_or_else(|| HarnessError::Other("no focus project set".to_string()))?;

        let item = find_inbox_item(&state, id_prefix)?.clone();
        let task = TaskRecord {
            id: Uuid::new_v4(),
            project_id: focus_id,
            title: item.text.clone(),
            column: "todo".to_string(),
            created_at: Utc::now(),
        };

        if let Some(entry) = state.inbox.iter_mut().find(|i| i.id == item.id) {
            entry.triage_status = Some(TriageStatus::Promoted);
        }
        state.tasks.push(task.clone());
        self.store.save(&state)?;
        self.events.emit(
            EventKind::StateUpdated,
            event_fields! {"inboxPromoted" => item.id, "taskId" => task.id},
        );
        Ok(task)
    }

    /// Dismisses an inbox item, keeping it in log-visible history.
    pub fn inbox_dismiss(&self, id_prefix: &str) -> Result<InboxItem> {
        let mut state = self.load_for_mutation()?;
        let item = find_inbox_item(&state, id_prefix)?.clone();

        let entry = state
            .inbox
            .iter_mut()
            .find(|i| i.id == item.id)
            .expect("item found above");
        entry.triage_status = Some(TriageStatus::Dismissed);
        let dismissed = entry.clone();

        self.store.save(&state)?;
        self.events.emit(
            EventKind::StateUpdated,
            event_fields! {"inboxDismissed" => item.id},
        );
        Ok(dismissed)
    }
}

fn find_inbox_item<'a>(state: &'a State, id_prefix: &str) -> Result<&'a InboxItem> {
    let matches: Vec<&InboxItem> = state
        .inbox
        .iter()
        .filter(|i| i.triage_status.is_none() && i.id.to_string().starts_with(id_prefix))
        .collect();
    match matches.as_slice() {
        [] => Err(HarnessError::Other(format!(
            "no untriaged inbox item matching '{id_prefix}'"
        ))),
        [item] => Ok(*item),
        _ => Err(HarnessError::Other(format!(
            "'{id_prefix}' is ambiguous; use more of the id"
        ))),
    }
}

fn ensure_project(state: &mut State, repo_path: &Path) -> Uuid {
    if let Some(project) = state.projects.iter().find(|p| p.repo_path == repo_path) {
        return project.id;
    }
    let project = Project::new(repo_name(repo_path), repo_path);
    let id = project.id;
    state.projects.push(project);
    if state.focus_project_id.is_none() {
        state.focus_project_id = Some(id);
    }
    id
}

fn repo_name(repo_path: &Path) -> String {
    repo_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string())
}

fn verify_start(git: &GitDriver, worktree_path: &Path, branch_name: &str) -> Result<()> {
    if !worktree_path.exists() {
        return Err(HarnessError::Other(format!(
            "worktree {} was not created",
            worktree_path.display()
        )));
    }
    if !worktree_path.join(MARKER_FILE).exists() {
        return Err(HarnessError::MarkerMissing(worktree_path.to_path_buf()));
    }
    let checked_out = git
        .worktree_list()?
        .into_iter()
        .find(|w| w.path == worktree_path)
        .and_then(|w| w.branch);
    if checked_out.as_deref() != Some(branch_name) {
        return Err(HarnessError::Other(format!(
            "worktree has {checked_out:?} checked out, expected {branch_name}"
        )));
    }
    Handoff::load(&worktree_path.join(HANDOFF_FILE))?;
    Ok(())
}

/// Best-effort PR URL for GitHub-style remotes.
fn pr_url_hint(git: &GitDriver, branch: &str) -> Option<String> {
    let url = git.remote_url("origin").ok()?;
    let trimmed = url.trim_end_matches(".git");
    let repo = trimmed
        .strip_prefix("git@github.com:")
        .or_else(|| trimmed.strip_prefix("https://github.com/"))?;
    Some(format!("https://github.com/{repo}/pull/new/{branch}"))
}
