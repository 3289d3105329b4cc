//! Thin wrapper over git invocations returning structured results.
//!
//! All commands are passed as argv vectors; there is no shell involved and
//! no interpolation. The driver never reads or writes the registry.

use crate::core::error::{HarnessError, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Result of `git status` for a working tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitStatus {
    pub branch: String,
    pub clean: bool,
    pub files_changed: usize,
    pub ahead: usize,
    pub behind: usize,
}

/// One entry from `git worktree list --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    pub branch: Option<String>,
    pub head: Option<String>,
    pub is_bare: bool,
}

/// Outcome of a push, classified from captured stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Ok,
    Rejected(String),
    AuthError(String),
}

/// Driver bound to one repository path.
#[derive(Debug, Clone)]
pub struct GitDriver {
    repo_path: PathBuf,
}

impl GitDriver {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
        }
    }

    #[must_use]
    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Runs git with the given argv in `cwd` (defaults to the repo path).
    fn run(&self, args: &[&str], cwd: Option<&Path>) -> Result<String> {
        let output = Command::new("git")
            .current_dir(cwd.unwrap_or(&self.repo_path))
            .args(args)
            .output()?;

        if !output.status.success() {
            return Err(HarnessError::Git {
                command: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Returns true when the bound path is inside a git repository.
    #[must_use]
    pub fn is_repo(&self) -> bool {
        self.run(&["rev-parse", "--git-dir"], None).is_ok()
    }

    pub fn status(&self) -> Result<GitStatus> {
        self.status_of(&self.repo_path)
    }

    /// `git status` for an arbitrary working tree (e.g. a run's worktree).
    pub fn status_of(&self, path: &Path) -> Result<GitStatus> {
        let branch = self.run(&["rev-parse", "--abbrev-ref", "HEAD"], Some(path))?;
        let porcelain = self.run(&["status", "--porcelain"], Some(path))?;
        let files_changed = porcelain.lines().filter(|l| !l.trim().is_empty()).count();

        // Ahead/behind requires an upstream; branches without one count as 0/0.
        let (ahead, behind) = match self.run(
            &["rev-list", "--left-right", "--count", "@{upstream}...HEAD"],
            Some(path),
        ) {
            Ok(counts) => {
                let mut parts = counts.split_whitespace();
                let behind = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
                let ahead = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
                (ahead, behind)
            }
            Err(_) => (0, 0),
        };

        Ok(GitStatus {
            branch,
            clean: files_changed == 0,
            files_changed,
            ahead,
            behind,
        })
    }

    pub fn worktree_list(&self) -> Result<Vec<WorktreeEntry>> {
        let output = self.run(&["worktree", "list", "--porcelain"], None)?;
        Ok(parse_worktree_porcelain(&output))
    }

    /// `git worktree add -b <branch> <path> <base_ref>`.
    pub fn worktree_add(&self, path: &Path, branch: &str, base_ref: &str) -> Result<()> {
        let path_str = path
            .to_str()
            .ok_or_else(|| HarnessError::Other("Worktree path is not valid UTF-8".to_string()))?;
        self.run(&["worktree", "add", "-b", branch, path_str, base_ref], None)?;
        Ok(())
    }

    pub fn worktree_remove(&self, path: &Path, force: bool) -> Result<()> {
        let path_str = path
            .to_str()
            .ok_or_else(|| HarnessError::Other("Worktree path is not valid UTF-8".to_string()))?;
        if force {
            self.run(&["worktree", "remove", "--force", path_str], None)?;
        } else {
            self.run(&["worktree", "remove", path_str], None)?;
        }
        Ok(())
    }

    pub fn branch_create(&self, name: &str, base_ref: &str) -> Result<()> {
        self.run(&["branch", name, base_ref], None)?;
        Ok(())
    }

    pub fn branch_delete(&self, name: &str, force: bool) -> Result<()> {
        let flag = if force { "-D" } else { "-d" };
        self.run(&["branch", flag, name], None)?;
        Ok(())
    }

    pub fn branch_exists(&self, name: &str) -> bool {
        self.run(
            &["show-ref", "--verify", "--quiet", &format!("refs/heads/{name}")],
            None,
        )
        .is_ok()
    }

    pub fn rev_parse(&self, reference: &str) -> Result<String> {
        self.run(&["rev-parse", reference], None)
    }

    /// Pushes a branch, classifying rejection and auth failures from stderr.
    pub fn push(&self, remote: &str, branch: &str) -> Result<PushOutcome> {
        match self.run(&["push", "-u", remote, branch], None) {
            Ok(_) => Ok(PushOutcome::Ok),
            Err(HarnessError::Git { stderr, .. }) => {
                let lower = stderr.to_lowercase();
                if lower.contains("non-fast-forward") || lower.contains("[rejected]") {
                    Ok(PushOutcome::Rejected(stderr))
                } else if lower.contains("authentication failed")
                    || lower.contains("permission denied")
                    || lower.contains("could not read username")
                    || lower.contains("403")
                {
                    Ok(PushOutcome::AuthError(stderr))
                } else {
                    Err(HarnessError::Git {
                        command: format!("push -u {remote} {branch}"),
                        stderr,
                    })
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Stages everything and commits in the given working tree.
    pub fn commit_all(&self, path: &Path, message: &str) -> Result<String> {
        self.run(&["add", "-A"], Some(path))?;
        self.run(&["commit", "-m", message], Some(path))?;
        self.run(&["rev-parse", "HEAD"], Some(path))
    }

    /// Makes sure the repo-local exclude file covers harness-managed paths
    /// so they never count as dirt in the project tree.
    pub fn ensure_excludes(&self, patterns: &[&str]) -> Result<()> {
        let common_dir = self.run(&["rev-parse", "--git-common-dir"], None)?;
        let common_dir = if Path::new(&common_dir).is_absolute() {
            PathBuf::from(common_dir)
        } else {
            self.repo_path.join(common_dir)
        };

        let exclude_path = common_dir.join("info").join("exclude");
        if let Some(parent) = exclude_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let existing = std::fs::read_to_string(&exclude_path).unwrap_or_default();

        let mut additions = String::new();
        for pattern in patterns {
            if !existing.lines().any(|l| l.trim() == *pattern) {
                additions.push_str(pattern);
                additions.push('\n');
            }
        }
        if !additions.is_empty() {
            let mut content = existing;
            if !content.is_empty() && !content.ends_with('\n') {
                content.push('\n');
            }
            content.push_str(&additions);
            std::fs::write(&exclude_path, content)?;
        }
        Ok(())
    }

    /// Last `n` commit subjects for a ref.
    pub fn log(&self, reference: &str, n: usize) -> Result<Vec<String>> {
        let count = format!("-{n}");
        let output = self.run(&["log", &count, "--format=%h %s", reference], None)?;
        Ok(output.lines().map(str::to_string).collect())
    }

    pub fn remote_url(&self, remote: &str) -> Result<String> {
        self.run(&["remote", "get-url", remote], None)
    }
}

fn parse_worktree_porcelain(output: &str) -> Vec<WorktreeEntry> {
    let mut entries = Vec::new();
    let mut path: Option<PathBuf> = None;
    let mut branch: Option<String> = None;
    let mut head: Option<String> = None;
    let mut is_bare = false;

    let mut flush = |path: &mut Option<PathBuf>,
                     branch: &mut Option<String>,
                     head: &mut Option<String>,
                     is_bare: &mut bool| {
        if let Some(p) = path.take() {
            entries.push(WorktreeEntry {
                path: p,
                branch: branch.take(),
                head: head.take(),
                is_bare: std::mem::take(is_bare),
            });
        }
    };

    for line in output.lines() {
        if line.is_empty() {
            flush(&mut path, &mut branch, &mut head, &mut is_bare);
        } else if let Some(rest) = line.strip_prefix("worktree ") {
            flush(&mut path, &mut branch, &mut head, &mut is_bare);
            path = Some(PathBuf::from(rest));
        } else if let Some(rest) = line.strip_prefix("branch ") {
            branch = Some(rest.trim_start_matches("refs/heads/").to_string());
        } else if let Some(rest) = line.strip_prefix("HEAD ") {
            head = Some(rest.to_string());
        } else if line == "bare" {
            is_bare = true;
        }
    }
    flush(&mut path, &mut branch, &mut head, &mut is_bare);

    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_util::init_git_repo;
    use tempfile::tempdir;

    #[test]
    fn status_reports_clean_then_dirty() {
        let tmp = tempdir().expect("tempdir");
        let repo = tmp.path().join("repo");
        init_git_repo(&repo);

        let git = GitDriver::new(&repo);
        let status = git.status().expect("status");
        assert!(status.clean);
        assert_eq!(status.branch, "main");
        assert_eq!(status.files_changed, 0);

        std::fs::write(repo.join("dirty.txt"), "x\n").expect("write");
        let status = git.status().expect("status");
        assert!(!status.clean);
        assert_eq!(status.files_changed, 1);
    }

    #[test]
    fn worktree_add_list_remove() {
        let tmp = tempdir().expect("tempdir");
        let repo = tmp.path().join("repo");
        init_git_repo(&repo);

        let git = GitDriver::new(&repo);
        let wt = repo.join("runs").join("feat-x");
        git.worktree_add(&wt, "run/feat-x", "HEAD").expect("add");
        assert!(wt.exists());
        assert!(git.branch_exists("run/feat-x"));

        let listed = git.worktree_list().expect("list");
        assert_eq!(listed.len(), 2);
        let entry = listed
            .iter()
            .find(|e| e.branch.as_deref() == Some("run/feat-x"))
            .expect("worktree entry");
        assert!(entry.path.ends_with("runs/feat-x"));

        git.worktree_remove(&wt, true).expect("remove");
        assert!(!wt.exists());
        git.branch_delete("run/feat-x", true).expect("delete branch");
        assert!(!git.branch_exists("run/feat-x"));
    }

    #[test]
    fn branch_create_collision_is_git_error() {
        let tmp = tempdir().expect("tempdir");
        let repo = tmp.path().join("repo");
        init_git_repo(&repo);

        let git = GitDriver::new(&repo);
        git.branch_create("run/dup", "HEAD").expect("create");
        let err = git.branch_create("run/dup", "HEAD").unwrap_err();
        assert_eq!(err.tag(), "GitError");
    }

    #[test]
    fn parse_porcelain_handles_bare_and_detached() {
        let output = "worktree /repo\nHEAD abc123\nbranch refs/heads/main\n\n\
                      worktree /repo/runs/x\nHEAD def456\nbranch refs/heads/run/x\n\n\
                      worktree /bare\nbare\n";
        let entries = parse_worktree_porcelain(output);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].branch.as_deref(), Some("main"));
        assert_eq!(entries[1].branch.as_deref(), Some("run/x"));
        assert!(entries[2].is_bare);
        assert!(entries[2].branch.is_none());
    }

    #[test]
    fn ensure_excludes_is_idempotent() {
        let tmp = tempdir().expect("tempdir");
        let repo = tmp.path().join("repo");
        init_git_repo(&repo);

        let git = GitDriver::new(&repo);
        git.ensure_excludes(&["/runs/", "/.harness/"]).expect("excludes");
        git.ensure_excludes(&["/runs/", "/.harness/"]).expect("excludes");

        let exclude = std::fs::read_to_string(repo.join(".git/info/exclude")).expect("read");
        assert_eq!(exclude.matches("/runs/").count(), 1);

        // Excluded paths do not dirty the tree.
        std::fs::create_dir_all(repo.join("runs").join("x")).expect("mkdir");
        std::fs::write(repo.join("runs/x/file.txt"), "y\n").expect("write");
        assert!(git.status().expect("status").clean);
    }

    #[test]
    fn commit_all_advances_head() {
        let tmp = tempdir().expect("tempdir");
        let repo = tmp.path().join("repo");
        init_git_repo(&repo);

        let git = GitDriver::new(&repo);
        let before = git.rev_parse("HEAD").expect("head");
        std::fs::write(repo.join("new.txt"), "n\n").expect("write");
        let after = git.commit_all(&repo, "add file").expect("commit");
        assert_ne!(before, after);
        assert!(git.status().expect("status").clean);
    }

    #[test]
    fn log_returns_subjects() {
        let tmp = tempdir().expect("tempdir");
        let repo = tmp.path().join("repo");
        init_git_repo(&repo);

        let git = GitDriver::new(&repo);
        let lines = git.log("HEAD", 5).expect("log");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("init"));
    }
}
