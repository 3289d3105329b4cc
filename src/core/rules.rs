//! Priority-based selection of the single next action.
//!
//! Pure function of the reconciled view: never mutates, never touches disk.

use crate::core::reconcile::ReconciledView;
use crate::core::state::{Run, RunState};

/// The chosen action, its rationale, and a done criterion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextAction {
    pub action: String,
    pub why: String,
    pub done: String,
}

/// Picks the next action, first matching rule wins:
/// 1. finished run with a worktree still on disk → clean
/// 2. running run with open handoff tasks → continue tests
/// 3. run with all tasks passing and a clean worktree → finish
/// 4. no focus project → focus set
/// 5. focus project without runs → start
/// 6. otherwise → the first open task of the most recent active run
#[must_use]
pub fn compute_next_action(view: &ReconciledView) -> NextAction {
    let state = &view.state;

    // Rule 1: finished runs that still occupy a worktree.
    for run in &state.runs {
        let has_worktree = view
            .run_health(run.id)
            .is_some_and(|h| h.worktree_present);
        if run.state == RunState::Finished && has_worktree {
            return NextAction {
                action: format!("c-harness clean {}", run.run_name),
                why: format!("Run '{}' is finished but its worktree remains", run.run_name),
                done: "Worktree removed and run dropped from the registry".to_string(),
            };
        }
    }

    // Rule 2: running runs with open tasks.
    for run in &state.runs {
        if run.state != RunState::Running {
            continue;
        }
        if let Some((passing, total)) = view.run_health(run.id).and_then(|h| h.handoff_counts) {
            if passing < total {
                return NextAction {
                    action: format!("c-harness run {}", run.run_name),
                    why: format!(
                        "Run '{}' has {} of {} tasks passing",
                        run.run_name, passing, total
                    ),
                    done: "Every handoff task reports passes=true".to_string(),
                };
            }
        }
    }

    // Rule 3: complete handoffs in clean worktrees are ready to finish.
    for run in &state.runs {
        let Some(health) = view.run_health(run.id) else {
            continue;
        };
        let complete = health
            .handoff_counts
            .is_some_and(|(passing, total)| total > 0 && passing == total);
        if complete && health.clean == Some(true) {
            return NextAction {
                action: format!("c-harness finish {}", run.run_name),
                why: format!("Run '{}' has all tasks passing and a clean tree", run.run_name),
                done: "Branch pushed and run marked finished".to_string(),
            };
        }
    }

    // Rule 4: no focus project.
    if state.focus_project().is_none() {
        return if state.projects.is_empty() {
            NextAction {
                action: "c-harness start <run-name> --repo-path <p>".to_string(),
                why: "No projects exist yet; the first run registers one".to_string(),
                done: "A project and its first run exist".to_string(),
            }
        } else {
            NextAction {
                action: "c-harness focus set <id|name>".to_string(),
                why: "No focus project is set".to_string(),
                done: "Subsequent commands target the focus project".to_string(),
            }
        };
    }

    // Rule 5: focus project without runs.
    let focus = state.focus_project().expect("focus checked above");
    let focus_runs: Vec<&Run> = state
        .runs
        .iter()
        .filter(|r| r.project_id == focus.id)
        .collect();
    if focus_runs.is_empty() {
        return NextAction {
            action: format!("c-harness start <run-name> --repo-path {}", focus.repo_path.display()),
            why: format!("Project '{}' has no runs", focus.name),
            done: "A new isolated run exists for the focus project".to_string(),
        };
    }

    // Rule 6: surface the first open task of the most recent active run.
    let most_recent = focus_runs
        .iter()
        .filter(|r| matches!(r.state, RunState::Created | RunState::Running))
        .max_by_key(|r| r.last_touched_at)
        .or_else(|| focus_runs.iter().max_by_key(|r| r.last_touched_at))
        .expect("focus_runs is non-empty");

    let task_title = view
        .run_health(most_recent.id)
        .and_then(|h| h.first_open_task.clone());

    match task_title {
        Some(title) => NextAction {
            action: title.clone(),
            why: format!("First open task of run '{}'", most_recent.run_name),
            done: format!("Task '{title}' passes its acceptance criteria"),
        },
        None => NextAction {
            action: format!(
                "c-harness start <run-name> --repo-path {}",
                focus.repo_path.display()
            ),
            why: "No active tasks remain; start a new run".to_string(),
            done: "A new isolated run exists for the focus project".to_string(),
        },
    }
}
