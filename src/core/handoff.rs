//! Canonical handoff.json format: parser, validator, writer.
//!
//! Two input forms are accepted: the modern form (object with `meta` and
//! `tasks`) and the legacy form (bare array of tasks). Output is always the
//! modern form. The only field an agent may flip after handoff creation is
//! `passes`, and only from false to true.

use crate::core::error::{HarnessError, Result};
use crate::core::state::atomic_write;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Closed set of task categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskCategory {
    Security,
    Oidc,
    Roles,
    Infrastructure,
    Cli,
    Testing,
    Docs,
    Functional,
    Style,
    Api,
    Database,
    Auth,
    Ui,
}

/// A single task in the handoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffTask {
    pub id: String,
    pub category: TaskCategory,
    pub title: String,
    pub description: String,
    pub acceptance_criteria: Vec<String>,
    pub passes: bool,
    #[serde(default)]
    pub files_expected: Vec<String>,
    #[serde(default)]
    pub steps: Vec<String>,
}

/// Handoff metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffMeta {
    pub project: String,
    pub phase: String,
    pub source: String,
    pub lock: bool,
}

/// Complete handoff document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handoff {
    pub meta: HandoffMeta,
    pub tasks: Vec<HandoffTask>,
}

/// Raw task as found on disk; fields are validated into [`HandoffTask`].
#[derive(Debug, Deserialize)]
struct RawTask {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    category: Option<serde_json::Value>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    acceptance_criteria: Option<serde_json::Value>,
    #[serde(default)]
    passes: Option<serde_json::Value>,
    #[serde(default)]
    files_expected: Option<serde_json::Value>,
    #[serde(default)]
    steps: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawMeta {
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    phase: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    lock: Option<bool>,
}

/// The two accepted wire forms.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDocument {
    Modern { meta: RawMeta, tasks: Vec<RawTask> },
    Legacy(Vec<RawTask>),
}

impl Handoff {
    /// Parses and validates a handoff document.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let raw: RawDocument = serde_json::from_slice(bytes)
            .map_err(|e| HarnessError::Schema(format!("not a valid handoff document: {e}")))?;

        let (meta, raw_tasks) = match raw {
            RawDocument::Modern { meta, tasks } => (
                HandoffMeta {
                    project: meta.project.unwrap_or_else(|| "Unknown".to_string()),
                    phase: meta.phase.unwrap_or_default(),
                    source: meta.source.unwrap_or_default(),
                    lock: meta.lock.unwrap_or(true),
                },
                tasks,
            ),
            RawDocument::Legacy(tasks) => (
                HandoffMeta {
                    project: "Unknown".to_string(),
                    phase: String::new(),
                    source: "legacy".to_string(),
                    lock: false,
                },
                tasks,
            ),
        };

        if raw_tasks.is_empty() {
            return Err(HarnessError::Schema("handoff has no tasks".to_string()));
        }

        let mut tasks = Vec::with_capacity(raw_tasks.len());
        for (index, raw) in raw_tasks.into_iter().enumerate() {
            tasks.push(validate_task(raw, index)?);
        }

        let mut seen = std::collections::HashSet::new();
        for task in &tasks {
            if !seen.insert(task.id.clone()) {
                return Err(HarnessError::Schema(format!(
                    "duplicate task id '{}'",
                    task.id
                )));
            }
        }

        Ok(Self { meta, tasks })
    }

    /// Loads and parses a handoff file.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::parse(&bytes)
    }

    /// Writes the handoff in modern form via the atomic-write protocol.
    pub fn write(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| HarnessError::Other(format!("serialize handoff: {e}")))?;
        atomic_write(path, &bytes)
    }

    /// Returns (passing, total).
    #[must_use]
    pub fn count_passing(&self) -> (usize, usize) {
        let passing = self.tasks.iter().filter(|t| t.passes).count();
        (passing, self.tasks.len())
    }

    /// First task with `passes == false`, if any.
    #[must_use]
    pub fn first_open_task(&self) -> Option<&HandoffTask> {
        self.tasks.iter().find(|t| !t.passes)
    }

    /// Marks a task as passing. Passing is monotonic: a task already at
    /// `true` stays there, and there is no way back through this API.
    pub fn mark_pass(&mut self, task_id: &str) -> Result<()> {
        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| HarnessError::Schema(format!("no task with id '{task_id}'")))?;
        task.passes = true;
        Ok(())
    }

    /// Template used by `start` in greenfield mode and the `schema` command.
    #[must_use]
    pub fn template(project: &str) -> Self {
        Self {
            meta: HandoffMeta {
                project: project.to_string(),
                phase: "Phase 1".to_string(),
                source: "manual".to_string(),
                lock: true,
            },
            tasks: vec![HandoffTask {
                id: "TASK-001".to_string(),
                category: TaskCategory::Functional,
                title: "Describe the first task".to_string(),
                description: "What must be implemented".to_string(),
                acceptance_criteria: vec!["Verifiable criterion".to_string()],
                passes: false,
                files_expected: Vec::new(),
                steps: Vec::new(),
            }],
        }
    }
}

fn string_list(value: serde_json::Value, task: &str, field: &str) -> Result<Vec<String>> {
    let items = value
        .as_array()
        .ok_or_else(|| HarnessError::Schema(format!("task {task}: '{field}' must be a list")))?;
    items
        .iter()
        .map(|v| {
            v.as_str().map(str::to_string).ok_or_else(|| {
                HarnessError::Schema(format!("task {task}: '{field}' must contain only strings"))
            })
        })
        .collect()
}

fn validate_task(raw: RawTask, index: usize) -> Result<HandoffTask> {
    let id = match raw.id {
        Some(id) if !id.is_empty() => id,
        _ => format!("TASK-{:03}", index + 1),
    };

    let category_value = raw
        .category
        .ok_or_else(|| HarnessError::Schema(format!("task {id}: missing 'category'")))?;
    let category: TaskCategory = serde_json::from_value(category_value.clone()).map_err(|_| {
        HarnessError::Schema(format!(
            "task {id}: invalid category {category_value}; must be one of the known categories"
        ))
    })?;

    let title = raw
        .title
        .filter(|t| !t.is_empty())
        .ok_or_else(|| HarnessError::Schema(format!("task {id}: missing 'title'")))?;
    let description = raw
        .description
        .filter(|d| !d.is_empty())
        .ok_or_else(|| HarnessError::Schema(format!("task {id}: missing 'description'")))?;

    let criteria_value = raw
        .acceptance_criteria
        .ok_or_else(|| HarnessError::Schema(format!("task {id}: missing 'acceptance_criteria'")))?;
    let acceptance_criteria = string_list(criteria_value, &id, "acceptance_criteria")?;
    if acceptance_criteria.is_empty() {
        return Err(HarnessError::Schema(format!(
            "task {id}: 'acceptance_criteria' must have at least one entry"
        )));
    }

    // `passes` must be a strict JSON boolean, not a truthy stand-in.
    let passes = match raw.passes {
        None => false,
        Some(serde_json::Value::Bool(b)) => b,
        Some(other) => {
            return Err(HarnessError::Schema(format!(
                "task {id}: 'passes' must be a boolean, got {other}"
            )))
        }
    };

    let files_expected = match raw.files_expected {
        None => Vec::new(),
        Some(v) => string_list(v, &id, "files_expected")?,
    };
    let steps = match raw.steps {
        None => Vec::new(),
        Some(v) => string_list(v, &id, "steps")?,
    };

    Ok(HandoffTask {
        id,
        category,
        title,
        description,
        acceptance_criteria,
        passes,
        files_expected,
        steps,
    })
}
