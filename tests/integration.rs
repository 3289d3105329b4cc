//! End-to-end tests driving the c-harness binary.

use std::path::{Path, PathBuf};
use std::process::Command;

fn init_git_repo(repo_dir: &Path) {
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

fn add_bare_origin(repo_dir: &Path, bare_dir: &Path) {
    let out = Command::new("git")
        .args(["init", "--bare", bare_dir.to_str().unwrap()])
        .output()
        .expect("git init --bare");
    assert!(out.status.success());

    let out = Command::new("git")
        .args(["remote", "add", "origin", bare_dir.to_str().unwrap()])
        .current_dir(repo_dir)
        .output()
        .expect("git remote add");
    assert!(out.status.success());
}

fn run_harness(home: &Path, args: &[&str]) -> (i32, String, String) {
    let output = Command::new(env!("CARGO_BIN_EXE_c-harness"))
        .env("HOME", home)
        .args(args)
        .output()
        .expect("run c-harness");

    (
        output.status.code().unwrap_or(-1),
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
    )
}

fn commander_home(home: &Path) -> PathBuf {
    home.join(".cloud-harness")
}

fn read_state(home: &Path) -> serde_json::Value {
    let bytes = std::fs::read(commander_home(home).join("state.json")).expect("read state.json");
    serde_json::from_slice(&bytes).expect("parse state.json")
}

fn read_event_kinds(home: &Path) -> Vec<String> {
    let path = commander_home(home).join("events.log");
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    content
        .lines()
        .filter_map(|l| serde_json::from_str::<serde_json::Value>(l).ok())
        .filter_map(|v| v["kind"].as_str().map(str::to_string))
        .collect()
}

fn mark_all_tasks_passing(worktree: &Path) {
    let handoff_path = worktree.join("handoff.json");
    let mut handoff: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&handoff_path).expect("read handoff"))
            .expect("parse handoff");
    for task in handoff["tasks"].as_array_mut().expect("tasks") {
        task["passes"] = serde_json::json!(true);
    }
    std::fs::write(
        &handoff_path,
        serde_json::to_vec_pretty(&handoff).expect("serialize"),
    )
    .expect("write handoff");

    for args in [vec!["add", "-A"], vec!["commit", "-m", "tasks pass"]] {
        let out = Command::new("git")
            .args(&args)
            .current_dir(worktree)
            .output()
            .expect("git");
        assert!(out.status.success());
    }
}

#[test]
fn fresh_start_creates_worktree_branch_and_registry_entry() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let repo = tmp.path().join("r");
    init_git_repo(&repo);

    let repo_str = repo.to_string_lossy().to_string();
    let (code, out, err) = run_harness(
        tmp.path(),
        &["start", "feat-x", "--repo-path", &repo_str],
    );
    assert_eq!(code, 0, "stdout: {out}\nstderr: {err}");

    let worktree = repo.join("runs").join("feat-x");
    assert!(worktree.exists());
    assert!(worktree.join(".harness-worktree").exists());
    assert!(worktree.join("handoff.json").exists());

    let branch_out = Command::new("git")
        .args(["rev-parse", "--abbrev-ref", "HEAD"])
        .current_dir(&worktree)
        .output()
        .expect("git");
    assert_eq!(
        String::from_utf8_lossy(&branch_out.stdout).trim(),
        "run/feat-x"
    );

    let state = read_state(tmp.path());
    let run = &state["runs"][0];
    assert_eq!(run["runName"], "feat-x");
    assert_eq!(run["state"], "created");
    assert_eq!(run["branchName"], "run/feat-x");
}

#[test]
fn dirty_repo_refuses_finish_with_exit_4() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let repo = tmp.path().join("r");
    init_git_repo(&repo);
    let repo_str = repo.to_string_lossy().to_string();

    let (code, _, err) = run_harness(tmp.path(), &["start", "feat-x", "--repo-path", &repo_str]);
    assert_eq!(code, 0, "{err}");
    mark_all_tasks_passing(&repo.join("runs").join("feat-x"));

    let state_before = read_state(tmp.path());
    std::fs::write(repo.join("uncommitted.txt"), "wip\n").expect("write");

    let (code, _, err) = run_harness(
        tmp.path(),
        &["finish", "feat-x", "--repo-path", &repo_str],
    );
    assert_eq!(code, 4, "{err}");
    assert!(err.to_lowercase().contains("dirty"), "{err}");

    // Registry unchanged, verify failure on the audit trail.
    assert_eq!(read_state(tmp.path()), state_before);
    assert!(read_event_kinds(tmp.path())
        .iter()
        .any(|k| k == "COMMAND_VERIFY_FAIL"));
}

#[test]
fn crash_during_save_is_recovered_on_next_command() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let repo = tmp.path().join("r");
    init_git_repo(&repo);
    let repo_str = repo.to_string_lossy().to_string();

    let (code, _, err) = run_harness(tmp.path(), &["start", "feat-x", "--repo-path", &repo_str]);
    assert_eq!(code, 0, "{err}");

    // Simulate a writer killed between write-temp and rename.
    let tmp_file = commander_home(tmp.path()).join("state.json.tmp");
    std::fs::write(&tmp_file, b"{\"runs\": [\"partial").expect("write tmp");

    let (code, out, err) = run_harness(tmp.path(), &["status"]);
    assert_eq!(code, 0, "{err}");
    assert!(!tmp_file.exists());
    assert!(out.contains("feat-x"), "{out}");
}

#[test]
fn second_mutator_is_denied_with_exit_3_and_holder_pid() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let repo = tmp.path().join("r");
    init_git_repo(&repo);
    let repo_str = repo.to_string_lossy().to_string();

    // A live controller: this test process holds a fresh lock+heartbeat.
    let locks = commander_home(tmp.path()).join("locks");
    std::fs::create_dir_all(&locks).expect("mkdir");
    let pid = std::process::id();
    let session = "11111111-2222-3333-4444-555555555555";
    let now = chrono::Utc::now().to_rfc3339();
    std::fs::write(
        locks.join("commander.lock"),
        serde_json::json!({"pid": pid, "startTime": now, "sessionId": session}).to_string(),
    )
    .expect("write lock");
    std::fs::write(
        locks.join("commander.heartbeat"),
        serde_json::json!({"sessionId": session, "lastBeatAt": now}).to_string(),
    )
    .expect("write heartbeat");

    let (code, _, err) = run_harness(
        tmp.path(),
        &["start", "feat-x", "--repo-path", &repo_str],
    );
    assert_eq!(code, 3, "{err}");
    assert!(err.contains(&pid.to_string()), "{err}");

    // Observer reads still work, as does inbox capture.
    let (code, _, err) = run_harness(tmp.path(), &["status"]);
    assert_eq!(code, 0, "{err}");
    let (code, _, err) = run_harness(tmp.path(), &["inbox", "idea while locked"]);
    assert_eq!(code, 0, "{err}");
}

#[test]
fn stale_lock_with_dead_pid_is_taken_over() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let repo = tmp.path().join("r");
    init_git_repo(&repo);
    let repo_str = repo.to_string_lossy().to_string();

    let locks = commander_home(tmp.path()).join("locks");
    std::fs::create_dir_all(&locks).expect("mkdir");
    let now = chrono::Utc::now().to_rfc3339();
    // A PID far outside the valid range cannot be alive.
    std::fs::write(
        locks.join("commander.lock"),
        serde_json::json!({
            "pid": 2_147_483_600i64,
            "startTime": now,
            "sessionId": "99999999-9999-9999-9999-999999999999",
        })
        .to_string(),
    )
    .expect("write lock");

    // Read-only status takes no lease and succeeds immediately.
    let (code, _, err) = run_harness(tmp.path(), &["status"]);
    assert_eq!(code, 0, "{err}");

    let (code, _, err) = run_harness(
        tmp.path(),
        &["start", "new-run", "--repo-path", &repo_str],
    );
    assert_eq!(code, 0, "{err}");

    let events = std::fs::read_to_string(commander_home(tmp.path()).join("events.log"))
        .expect("read events");
    assert!(events.contains("LOCK_STALE_TAKEOVER"), "{events}");
    assert!(events.contains("PID_DEAD"), "{events}");
}

#[test]
fn doc_strict_blocks_until_a_decision_is_persisted() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let repo = tmp.path().join("r");
    init_git_repo(&repo);
    add_bare_origin(&repo, &tmp.path().join("origin.git"));
    let repo_str = repo.to_string_lossy().to_string();

    let (code, _, err) = run_harness(tmp.path(), &["start", "feat-x", "--repo-path", &repo_str]);
    assert_eq!(code, 0, "{err}");

    // Declare a flag no documentation mentions.
    let worktree = repo.join("runs").join("feat-x");
    std::fs::write(worktree.join("tool.rs"), "let t = arg(\"--turbo\");\n").expect("write");
    mark_all_tasks_passing(&worktree);

    let (code, _, err) = run_harness(
        tmp.path(),
        &["finish", "feat-x", "--repo-path", &repo_str, "--doc-strict"],
    );
    assert_eq!(code, 6, "{err}");
    assert!(err.contains("--turbo"), "{err}");

    // Persist an internal decision in the project's decision store.
    let decisions_dir = repo.join(".harness");
    std::fs::create_dir_all(&decisions_dir).expect("mkdir");
    std::fs::write(
        decisions_dir.join("doc_decisions.json"),
        serde_json::json!({
            "--turbo": {
                "itemId": "--turbo",
                "decision": "internal",
                "createdAt": chrono::Utc::now().to_rfc3339(),
            }
        })
        .to_string(),
    )
    .expect("write decisions");

    let (code, out, err) = run_harness(
        tmp.path(),
        &["finish", "feat-x", "--repo-path", &repo_str, "--doc-strict"],
    );
    assert_eq!(code, 0, "stdout: {out}\nstderr: {err}");

    let state = read_state(tmp.path());
    assert_eq!(state["runs"][0]["state"], "finished");
}

#[test]
fn finish_then_clean_removes_worktree_and_registry_entry() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let repo = tmp.path().join("r");
    init_git_repo(&repo);
    add_bare_origin(&repo, &tmp.path().join("origin.git"));
    let repo_str = repo.to_string_lossy().to_string();

    let (code, _, err) = run_harness(tmp.path(), &["start", "feat-x", "--repo-path", &repo_str]);
    assert_eq!(code, 0, "{err}");
    let worktree = repo.join("runs").join("feat-x");
    mark_all_tasks_passing(&worktree);

    let (code, out, err) = run_harness(
        tmp.path(),
        &["finish", "feat-x", "--repo-path", &repo_str],
    );
    assert_eq!(code, 0, "stdout: {out}\nstderr: {err}");

    let (code, _, err) = run_harness(tmp.path(), &["clean", "feat-x", "--delete-branch"]);
    assert_eq!(code, 0, "{err}");
    assert!(!worktree.exists());

    let state = read_state(tmp.path());
    assert_eq!(state["runs"].as_array().map(Vec::len), Some(0));

    let branch_out = Command::new("git")
        .args(["show-ref", "--verify", "--quiet", "refs/heads/run/feat-x"])
        .current_dir(&repo)
        .output()
        .expect("git");
    assert!(!branch_out.status.success());
}

#[test]
fn legacy_handoff_round_trips_to_modern_form() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let repo = tmp.path().join("r");
    init_git_repo(&repo);
    let repo_str = repo.to_string_lossy().to_string();

    let legacy = tmp.path().join("legacy.json");
    std::fs::write(
        &legacy,
        r#"[{"category": "functional", "title": "One task", "description": "Do it",
            "acceptance_criteria": ["done"], "passes": false}]"#,
    )
    .expect("write legacy");

    let (code, _, err) = run_harness(
        tmp.path(),
        &[
            "start",
            "feat-x",
            "--repo-path",
            &repo_str,
            "--handoff-path",
            legacy.to_str().unwrap(),
        ],
    );
    assert_eq!(code, 0, "{err}");

    let copied: serde_json::Value = serde_json::from_slice(
        &std::fs::read(repo.join("runs/feat-x/handoff.json")).expect("read"),
    )
    .expect("parse");
    assert_eq!(copied["meta"]["source"], "legacy");
    assert_eq!(copied["tasks"][0]["id"], "TASK-001");
}

#[test]
fn next_recommends_cleaning_finished_runs_first() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let repo = tmp.path().join("r");
    init_git_repo(&repo);
    add_bare_origin(&repo, &tmp.path().join("origin.git"));
    let repo_str = repo.to_string_lossy().to_string();

    let (code, _, err) = run_harness(tmp.path(), &["start", "feat-x", "--repo-path", &repo_str]);
    assert_eq!(code, 0, "{err}");
    mark_all_tasks_passing(&repo.join("runs").join("feat-x"));
    let (code, _, err) = run_harness(tmp.path(), &["finish", "feat-x", "--repo-path", &repo_str]);
    assert_eq!(code, 0, "{err}");

    let (code, out, err) = run_harness(tmp.path(), &["next"]);
    assert_eq!(code, 0, "{err}");
    assert!(out.contains("clean feat-x"), "{out}");
}

#[test]
fn invalid_handoff_fails_start_with_exit_2() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let repo = tmp.path().join("r");
    init_git_repo(&repo);
    let repo_str = repo.to_string_lossy().to_string();

    let bad = tmp.path().join("bad.json");
    std::fs::write(&bad, r#"{"meta": {}, "tasks": []}"#).expect("write");

    let (code, _, err) = run_harness(
        tmp.path(),
        &[
            "start",
            "feat-x",
            "--repo-path",
            &repo_str,
            "--handoff-path",
            bad.to_str().unwrap(),
        ],
    );
    assert_eq!(code, 2, "{err}");
    assert!(!repo.join("runs/feat-x").exists());
}

#[test]
fn unsafe_clean_target_is_refused_with_exit_5() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let repo = tmp.path().join("r");
    init_git_repo(&repo);
    let repo_str = repo.to_string_lossy().to_string();

    let (code, _, err) = run_harness(tmp.path(), &["start", "feat-x", "--repo-path", &repo_str]);
    assert_eq!(code, 0, "{err}");

    // Strip the marker; the destructive path gate must refuse.
    let worktree = repo.join("runs").join("feat-x");
    std::fs::remove_file(worktree.join(".harness-worktree")).expect("remove marker");

    let (code, _, err) = run_harness(tmp.path(), &["clean", "feat-x", "--force"]);
    assert_eq!(code, 5, "{err}");
    assert!(worktree.exists());
}

#[test]
fn inbox_capture_list_promote_dismiss_cycle() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let repo = tmp.path().join("r");
    init_git_repo(&repo);
    let repo_str = repo.to_string_lossy().to_string();

    // A project (and focus) must exist for promotion.
    let (code, _, err) = run_harness(tmp.path(), &["start", "feat-x", "--repo-path", &repo_str]);
    assert_eq!(code, 0, "{err}");

    let (code, _, err) = run_harness(tmp.path(), &["inbox", "ship the limiter"]);
    assert_eq!(code, 0, "{err}");
    let (code, _, err) = run_harness(tmp.path(), &["inbox", "tune the cache"]);
    assert_eq!(code, 0, "{err}");

    let (code, out, err) = run_harness(tmp.path(), &["-f", "json", "inbox", "--list"]);
    assert_eq!(code, 0, "{err}");
    let listed: serde_json::Value = serde_json::from_str(&out).expect("parse");
    let pending = listed["data"]["pendingCaptures"].as_array().expect("pending");
    assert_eq!(pending.len(), 2);
    let first_id = pending[0]["id"].as_str().expect("id")[..8].to_string();
    let second_id = pending[1]["id"].as_str().expect("id")[..8].to_string();

    let (code, _, err) = run_harness(tmp.path(), &["inbox", "--promote", &first_id]);
    assert_eq!(code, 0, "{err}");
    let (code, _, err) = run_harness(tmp.path(), &["inbox", "--dismiss", &second_id]);
    assert_eq!(code, 0, "{err}");

    let state = read_state(tmp.path());
    assert_eq!(state["tasks"].as_array().map(Vec::len), Some(1));
    assert_eq!(state["tasks"][0]["title"], "ship the limiter");
    assert_eq!(state["inbox"].as_array().map(Vec::len), Some(2));
}

#[test]
fn doctor_repairs_a_corrupt_registry() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let home = commander_home(tmp.path());
    std::fs::create_dir_all(&home).expect("mkdir");
    std::fs::write(home.join("state.json"), b"{ this is not json").expect("write");

    // Without repair the registry error surfaces.
    let (code, _, err) = run_harness(tmp.path(), &["doctor"]);
    assert_ne!(code, 0);
    assert!(err.contains("doctor found problems") || err.contains("corrupt"), "{err}");

    let (code, out, err) = run_harness(tmp.path(), &["doctor", "--repair-state"]);
    assert_eq!(code, 0, "{err}");
    assert!(out.contains("Repaired"), "{out}");

    // The backup exists and the registry loads clean.
    let backups: Vec<_> = std::fs::read_dir(&home)
        .expect("read dir")
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("state.json.corrupt-"))
        .collect();
    assert_eq!(backups.len(), 1);

    let (code, _, err) = run_harness(tmp.path(), &["status"]);
    assert_eq!(code, 0, "{err}");
}

#[test]
fn bootstrap_apply_creates_home_layout() {
    let tmp = tempfile::tempdir().expect("tempdir");

    let (code, out, err) = run_harness(tmp.path(), &["bootstrap"]);
    assert_eq!(code, 0, "{err}");
    assert!(out.contains("missing"), "{out}");

    let (code, _, err) = run_harness(tmp.path(), &["bootstrap", "--apply"]);
    assert_eq!(code, 0, "{err}");
    let home = commander_home(tmp.path());
    assert!(home.join("locks").is_dir());
    assert!(home.join("state.json").exists());

    let (code, out, err) = run_harness(tmp.path(), &["bootstrap"]);
    assert_eq!(code, 0, "{err}");
    assert!(out.contains("looks good"), "{out}");
}

#[test]
fn missing_worktree_parks_run_and_status_warns() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let repo = tmp.path().join("r");
    init_git_repo(&repo);
    let repo_str = repo.to_string_lossy().to_string();

    let (code, _, err) = run_harness(tmp.path(), &["start", "feat-x", "--repo-path", &repo_str]);
    assert_eq!(code, 0, "{err}");

    // Someone removes the worktree behind the commander's back.
    let out = Command::new("git")
        .args(["worktree", "remove", "--force", "runs/feat-x"])
        .current_dir(&repo)
        .output()
        .expect("git");
    assert!(out.status.success());

    let (code, out, err) = run_harness(tmp.path(), &["status"]);
    assert_eq!(code, 0, "{err}");
    assert!(out.contains("parked"), "{out}");
    assert!(out.to_lowercase().contains("warning"), "{out}");
}
