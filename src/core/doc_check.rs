//! Documentation drift detection with a persistent decision store.
//!
//! Two checks run before a run may finish: every declared CLI flag must
//! appear literally in each tracked documentation file, and every public
//! source file in the project root must appear in the agent guide's
//! repository map. Decisions about drift items persist per project in
//! `.harness/doc_decisions.json`; `internal` decisions are permanent,
//! `deferred` ones re-surface after seven days.

use crate::core::error::{HarnessError, Result};
use crate::core::state::atomic_write;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Deferred decisions expire this long after they were recorded.
pub const DEFER_PERIOD_DAYS: i64 = 7;

/// What kind of surface drifted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftKind {
    CliFlag,
    PublicFile,
}

/// One undocumented surface change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocDriftItem {
    pub kind: DriftKind,
    /// The flag (`--turbo`) or file name (`reconcile.rs`).
    pub item: String,
    /// The doc file that should mention it.
    pub location: String,
}

/// A persisted triage decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Internal,
    Deferred,
    Documented,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocDecision {
    pub item_id: String,
    pub decision: Decision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Store at `<repo>/.harness/doc_decisions.json`, keyed by item string.
#[derive(Debug)]
pub struct DecisionStore {
    path: PathBuf,
    decisions: BTreeMap<String, DocDecision>,
}

impl DecisionStore {
    /// Opens (or initializes) the store for a project directory.
    pub fn open(project_dir: &Path) -> Result<Self> {
        let path = project_dir.join(".harness").join("doc_decisions.json");
        let decisions = if path.exists() {
            let bytes = std::fs::read(&path)?;
            serde_json::from_slice(&bytes)
                .map_err(|e| HarnessError::Other(format!("doc decision store unreadable: {e}")))?
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, decisions })
    }

    #[must_use]
    pub fn get(&self, item_id: &str) -> Option<&DocDecision> {
        self.decisions.get(item_id)
    }

    /// Records a decision and persists the store.
    pub fn decide(
        &mut self,
        item_id: &str,
        decision: Decision,
        description: Option<String>,
    ) -> Result<()> {
        let created_at = Utc::now();
        let expires_at = match decision {
            Decision::Deferred => Some(created_at + Duration::days(DEFER_PERIOD_DAYS)),
            Decision::Internal | Decision::Documented => None,
        };
        self.decisions.insert(
            item_id.to_string(),
            DocDecision {
                item_id: item_id.to_string(),
                decision,
                description,
                created_at,
                expires_at,
            },
        );
        self.save()
    }

    fn save(&self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.decisions)
            .map_err(|e| HarnessError::Other(format!("serialize doc decisions: {e}")))?;
        atomic_write(&self.path, &bytes)
    }

    /// Whether a drift item is settled at `now`. `internal` and
    /// `documented` are permanent; `deferred` holds until its expiry
    /// passes, after which the item re-surfaces.
    #[must_use]
    pub fn is_settled(&self, item_id: &str, now: DateTime<Utc>) -> bool {
        match self.decisions.get(item_id) {
            None => false,
            Some(d) => match d.decision {
                Decision::Internal | Decision::Documented => true,
                Decision::Deferred => d.expires_at.is_some_and(|expiry| now <= expiry),
            },
        }
    }

    /// Filters drift down to the items that still need attention.
    #[must_use]
    pub fn pending(&self, drift: &[DocDriftItem], now: DateTime<Utc>) -> Vec<DocDriftItem> {
        drift
            .iter()
            .filter(|d| !self.is_settled(&d.item, now))
            .cloned()
            .collect()
    }
}

/// Drift detector over a project directory.
#[derive(Debug)]
pub struct DocChecker {
    project_dir: PathBuf,
    doc_files: Vec<PathBuf>,
    agent_guide: PathBuf,
}

impl DocChecker {
    pub fn new(project_dir: &Path) -> Self {
        Self {
            project_dir: project_dir.to_path_buf(),
            doc_files: vec![
                project_dir.join("README.md"),
                project_dir.join("AGENT_GUIDE.md"),
            ],
            agent_guide: project_dir.join("AGENT_GUIDE.md"),
        }
    }

    /// Flags declared in code but absent from any tracked doc file.
    pub fn detect_cli_flag_drift(&self, declared_flags: &[String]) -> Result<Vec<DocDriftItem>> {
        let mut drift = Vec::new();

        for doc in &self.doc_files {
            if !doc.exists() {
                continue;
            }
            let content = std::fs::read_to_string(doc)?;
            let location = doc
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            for flag in declared_flags {
                if matches!(flag.as_str(), "--help" | "-h" | "--version" | "-V") {
                    continue;
                }
                if !content.contains(flag.as_str())
                    && !drift
                        .iter()
                        .any(|d: &DocDriftItem| d.item == *flag && d.location == location)
                {
                    drift.push(DocDriftItem {
                        kind: DriftKind::CliFlag,
                        item: flag.clone(),
                        location: location.clone(),
                    });
                }
            }
        }

        Ok(drift)
    }

    /// Public source files in the project root missing from the agent
    /// guide's repository map. Names prefixed `_` or `test_` are private.
    pub fn detect_public_file_drift(&self) -> Result<Vec<DocDriftItem>> {
        if !self.agent_guide.exists() {
            return Ok(Vec::new());
        }
        let guide = std::fs::read_to_string(&self.agent_guide)?;

        let mut drift = Vec::new();
        for name in collect_public_files(&self.project_dir)? {
            if !guide.contains(&name) {
                drift.push(DocDriftItem {
                    kind: DriftKind::PublicFile,
                    item: name,
                    location: "AGENT_GUIDE.md".to_string(),
                });
            }
        }
        Ok(drift)
    }

    /// Runs both checks.
    pub fn detect_all(&self, declared_flags: &[String]) -> Result<Vec<DocDriftItem>> {
        let mut drift = self.detect_cli_flag_drift(declared_flags)?;
        drift.extend(self.detect_public_file_drift()?);
        Ok(drift)
    }
}

/// Source files directly in the project root, excluding `_`/`test_`
/// prefixes, dotfiles, and the docs themselves.
pub fn collect_public_files(project_dir: &Path) -> Result<Vec<String>> {
    const SOURCE_EXTENSIONS: [&str; 6] = ["rs", "py", "ts", "js", "go", "sh"];

    let mut files = Vec::new();
    if !project_dir.exists() {
        return Ok(files);
    }

    for entry in std::fs::read_dir(project_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('_') || name.starts_with("test_") || name.starts_with('.') {
            continue;
        }
        let is_source = Path::new(&name)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext));
        if is_source {
            files.push(name);
        }
    }

    files.sort();
    Ok(files)
}

/// Extracts long CLI flags declared in the project's root source files.
///
/// A flag is any quoted `"--name"` token; this is a literal scan, matching
/// how the docs are checked for literal occurrences.
pub fn extract_cli_flags(project_dir: &Path) -> Result<Vec<String>> {
    let mut flags = std::collections::BTreeSet::new();

    for name in collect_public_files(project_dir)? {
        let content = std::fs::read_to_string(project_dir.join(&name))?;
        let mut rest = content.as_str();
        while let Some(idx) = rest.find("\"--") {
            let tail = &rest[idx + 1..];
            let end = tail
                .char_indices()
                .find(|(i, c)| *i >= 2 && !c.is_ascii_alphanumeric() && *c != '-')
                .map_or(tail.len(), |(i, _)| i);
            let flag = &tail[..end];
            // Only well-formed flags with a body, terminated by the quote.
            if flag.len() > 2 && tail[end..].starts_with('"') {
                flags.insert(flag.to_string());
            }
            rest = &rest[idx + 3..];
        }
    }

    Ok(flags.into_iter().collect())
}

/// Detects drift in `project_dir` and filters it through the decision
/// store rooted at `store_dir` (the registered repo, so decisions outlive
/// individual runs).
///
/// Returns the unresolved items; strict callers turn a non-empty result
/// into [`HarnessError::DocDrift`].
pub fn check_drift_before_finish(
    project_dir: &Path,
    store_dir: &Path,
    declared_flags: &[String],
) -> Result<(Vec<DocDriftItem>, DecisionStore)> {
    let checker = DocChecker::new(project_dir);
    let store = DecisionStore::open(store_dir)?;
    let drift = checker.detect_all(declared_flags)?;
    let pending = store.pending(&drift, Utc::now());
    Ok((pending, store))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_docs(dir: &Path, readme: &str, guide: &str) {
        std::fs::write(dir.join("README.md"), readme).expect("readme");
        std::fs::write(dir.join("AGENT_GUIDE.md"), guide).expect("guide");
    }

    #[test]
    fn undocumented_flag_is_drift_in_each_doc() {
        let tmp = tempdir().expect("tempdir");
        write_docs(tmp.path(), "Use `--verbose` here.", "Also `--verbose`.");

        let checker = DocChecker::new(tmp.path());
        let flags = vec!["--verbose".to_string(), "--turbo".to_string()];
        let drift = checker.detect_cli_flag_drift(&flags).expect("detect");

        let turbo: Vec<_> = drift.iter().filter(|d| d.item == "--turbo").collect();
        assert_eq!(turbo.len(), 2);
        assert!(drift.iter().all(|d| d.item != "--verbose"));
    }

    #[test]
    fn help_and_version_are_exempt() {
        let tmp = tempdir().expect("tempdir");
        write_docs(tmp.path(), "no flags at all", "none here either");

        let checker = DocChecker::new(tmp.path());
        let flags = vec!["--help".to_string(), "-V".to_string()];
        let drift = checker.detect_cli_flag_drift(&flags).expect("detect");
        assert!(drift.is_empty());
    }

    #[test]
    fn public_file_must_appear_in_agent_guide() {
        let tmp = tempdir().expect("tempdir");
        write_docs(tmp.path(), "", "Repository map: `engine.rs`");
        std::fs::write(tmp.path().join("engine.rs"), "").expect("write");
        std::fs::write(tmp.path().join("helper.rs"), "").expect("write");
        std::fs::write(tmp.path().join("_private.rs"), "").expect("write");
        std::fs::write(tmp.path().join("test_engine.rs"), "").expect("write");

        let checker = DocChecker::new(tmp.path());
        let drift = checker.detect_public_file_drift().expect("detect");
        assert_eq!(drift.len(), 1);
        assert_eq!(drift[0].item, "helper.rs");
        assert_eq!(drift[0].kind, DriftKind::PublicFile);
    }

    #[test]
    fn internal_decisions_never_resurface() {
        let tmp = tempdir().expect("tempdir");
        let mut store = DecisionStore::open(tmp.path()).expect("open");
        store
            .decide("--turbo", Decision::Internal, None)
            .expect("decide");

        let far_future = Utc::now() + Duration::days(10_000);
        assert!(store.is_settled("--turbo", far_future));

        // Survives a reload.
        let store = DecisionStore::open(tmp.path()).expect("reopen");
        assert!(store.is_settled("--turbo", far_future));
        assert!(store.get("--turbo").unwrap().expires_at.is_none());
    }

    #[test]
    fn deferred_decisions_resurface_strictly_after_expiry() {
        let tmp = tempdir().expect("tempdir");
        let mut store = DecisionStore::open(tmp.path()).expect("open");
        store
            .decide("--turbo", Decision::Deferred, None)
            .expect("decide");

        let expiry = store.get("--turbo").unwrap().expires_at.expect("expiry");
        assert!(store.is_settled("--turbo", expiry));
        assert!(!store.is_settled("--turbo", expiry + Duration::milliseconds(1)));
    }

    #[test]
    fn pending_filters_settled_items() {
        let tmp = tempdir().expect("tempdir");
        write_docs(tmp.path(), "", "");

        let (pending, mut store) =
            check_drift_before_finish(tmp.path(), tmp.path(), &["--turbo".to_string()])
                .expect("check");
        assert!(pending.iter().any(|d| d.item == "--turbo"));

        store
            .decide("--turbo", Decision::Internal, None)
            .expect("decide");
        let (pending, _) =
            check_drift_before_finish(tmp.path(), tmp.path(), &["--turbo".to_string()])
                .expect("check");
        assert!(pending.is_empty());
    }

    #[test]
    fn documented_decision_records_description() {
        let tmp = tempdir().expect("tempdir");
        let mut store = DecisionStore::open(tmp.path()).expect("open");
        store
            .decide(
                "engine.rs",
                Decision::Documented,
                Some("core engine module".to_string()),
            )
            .expect("decide");

        let store = DecisionStore::open(tmp.path()).expect("reopen");
        let decision = store.get("engine.rs").expect("decision");
        assert_eq!(decision.decision, Decision::Documented);
        assert_eq!(decision.description.as_deref(), Some("core engine module"));
    }

    #[test]
    fn extracts_quoted_long_flags_from_source() {
        let tmp = tempdir().expect("tempdir");
        std::fs::write(
            tmp.path().join("cli.rs"),
            "let turbo = arg(\"--turbo\");\nlet dry = arg(\"--dry-run\");\nlet not_a_flag = \"-- \";\n",
        )
        .expect("write");
        std::fs::write(tmp.path().join("test_cli.rs"), "arg(\"--hidden\")").expect("write");

        let flags = extract_cli_flags(tmp.path()).expect("extract");
        assert_eq!(flags, vec!["--dry-run".to_string(), "--turbo".to_string()]);
    }

    #[test]
    fn missing_docs_mean_no_flag_drift() {
        let tmp = tempdir().expect("tempdir");
        let checker = DocChecker::new(tmp.path());
        let drift = checker
            .detect_cli_flag_drift(&["--turbo".to_string()])
            .expect("detect");
        assert!(drift.is_empty());
    }
}
