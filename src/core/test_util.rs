//! Shared helpers for unit tests.

use std::path::Path;
use std::process::Command;

/// Initializes a git repo on branch `main` with one commit.
pub(crate) fn init_git_repo(repo_dir: &Path) {
    std::fs::create_dir_all(repo_dir).expect("create repo dir");

    for args in [
        vec!["init", "-b", "main"],
        vec!["config", "user.name", "Harness"],
        vec!["config", "user.email", "harness@example.com"],
    ] {
        let out = Command::new("git")
            .args(&args)
            .current_dir(repo_dir)
            .output()
            .expect("git");
        assert!(
            out.status.success(),
            "git {args:?}: {}",
            String::from_utf8_lossy(&out.stderr)
        );
    }

    std::fs::write(repo_dir.join("README.md"), "test\n").expect("write file");

    for args in [vec!["add", "."], vec!["commit", "-m", "init"]] {
        let out = Command::new("git")
            .args(&args)
            .current_dir(repo_dir)
            .output()
            .expect("git");
        assert!(
            out.status.success(),
            "git {args:?}: {}",
            String::from_utf8_lossy(&out.stderr)
        );
    }
}
