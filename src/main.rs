//! Harness Commander CLI entrypoint.

use clap::Parser;
use cloud_harness::adapters::claude_code::{ClaudeCodeAdapter, ClaudeCodeConfig};
use cloud_harness::adapters::runtime::AgentAdapter;
use cloud_harness::cli::commands::{
    BootstrapArgs, CleanArgs, Cli, Commands, DoctorArgs, FinishArgs, FocusCommands, InboxArgs,
    RunArgs, RunModeArg, SessionArgs, StartArgs,
};
use cloud_harness::cli::output::{create_table, output, output_error, OutputFormat};
use cloud_harness::core::doc_check::{check_drift_before_finish, extract_cli_flags, Decision};
use cloud_harness::core::error::{HarnessError, Result};
use cloud_harness::core::events::{EventKind, EventLog};
use cloud_harness::core::handoff::Handoff;
use cloud_harness::core::lifecycle::{
    CleanOptions, FinishOptions, LifecycleEngine, RunMode, StartOptions,
};
use cloud_harness::core::lock::{Acquired, HeartbeatTask, LockManager};
use cloud_harness::core::reconcile::{ReconciledView, Reconciler};
use cloud_harness::core::rules::compute_next_action;
use cloud_harness::core::state::{commander_home, InboxItem, State, StateStore};
use cloud_harness::event_fields;
use std::io::{BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

fn main() {
    init_tracing();

    let cli = Cli::parse();
    let format = cli.format;
    let home = commander_home();

    let exit_code = match dispatch(cli, &home, format) {
        Ok(()) => 0,
        Err(e) => output_error(&e, format),
    };
    process::exit(exit_code);
}

/// Dev diagnostics to stderr via `RUST_LOG`; the audit trail is the event log.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

fn dispatch(cli: Cli, home: &Path, format: OutputFormat) -> Result<()> {
    match cli.command {
        Commands::Start(args) => handle_start(home, &args, format),
        Commands::Run(args) => handle_run(home, &args, format),
        Commands::Finish(args) => handle_finish(home, &args, format),
        Commands::Clean(args) => handle_clean(home, &args, format),
        Commands::List => handle_list(home, format),
        Commands::Status => handle_status(home, format),
        Commands::Next => handle_next(home, format),
        Commands::Session(args) => handle_session(home, &args),
        Commands::Focus(cmd) => handle_focus(home, cmd, format),
        Commands::Inbox(args) => handle_inbox(home, &args, format),
        Commands::Doctor(args) => handle_doctor(home, &args, format),
        Commands::Bootstrap(args) => handle_bootstrap(home, &args, format),
        Commands::Schema => {
            let template = Handoff::template("Project Name");
            println!(
                "{}",
                serde_json::to_string_pretty(&template)
                    .map_err(|e| HarnessError::Other(e.to_string()))?
            );
            Ok(())
        }
    }
}

fn event_log(home: &Path) -> EventLog {
    EventLog::new(home.join("events.log")).with_session(Uuid::new_v4())
}

/// Runs `f` while holding the controller lease.
///
/// Short-lived mutating commands acquire for the duration of the operation
/// and release on exit; denials surface as exit code 3 with the holder PID.
fn with_lease<T>(
    home: &Path,
    force: bool,
    f: impl FnOnce(&mut EventLog) -> Result<T>,
) -> Result<T> {
    let mut events = event_log(home);
    let mut manager = LockManager::new(home);

    let outcome = match manager.acquire(force) {
        Ok(outcome) => outcome,
        Err(e) => {
            if let HarnessError::LockHeld { pid } = &e {
                events.emit(EventKind::LockDenied, event_fields! {"controllerPid" => *pid});
            }
            return Err(e);
        }
    };

    let session_id = manager.session_id().expect("acquired lease has a session");
    events.set_session(session_id);
    match outcome {
        Acquired::Fresh => events.emit_empty(EventKind::LockAcquired),
        Acquired::StaleTakeover(reason) => {
            events.emit(
                EventKind::LockStaleTakeover,
                event_fields! {"reason" => reason.as_str()},
            );
            events.emit_empty(EventKind::LockAcquired);
        }
        Acquired::ForceTakeover => {
            events.emit(
                EventKind::LockStaleTakeover,
                event_fields! {"reason" => "FORCED"},
            );
            events.emit_empty(EventKind::LockAcquired);
        }
    }

    let result = f(&mut events);

    manager.release();
    events.emit_empty(EventKind::LockReleased);
    result
}

fn engine_for(home: &Path, events: &EventLog) -> LifecycleEngine {
    LifecycleEngine::new(StateStore::new(home), events.clone())
}

/// Loads the registry and reconciles it against git reality.
fn load_view(home: &Path, events: &EventLog) -> Result<ReconciledView> {
    let store = StateStore::new(home);
    let state = store.load()?;
    events.emit_empty(EventKind::ReconcileStart);
    let mut reconciler = Reconciler::new();
    let view = reconciler.view(state)?;
    events.emit(
        EventKind::ReconcileResult,
        event_fields! {"driftCount" => view.drift.len()},
    );
    Ok(view)
}

fn handle_start(home: &Path, args: &StartArgs, format: OutputFormat) -> Result<()> {
    let run = with_lease(home, args.force_lock, |events| {
        let engine = engine_for(home, events);
        engine.start(&StartOptions {
            run_name: args.run_name.clone(),
            repo_path: args.repo_path.clone(),
            handoff_path: args.handoff_path.clone(),
            mode: match args.mode {
                RunModeArg::Greenfield => RunMode::Greenfield,
                RunModeArg::Brownfield => RunMode::Brownfield,
            },
        })
    })?;

    match format {
        OutputFormat::Json => output(&run, format),
        OutputFormat::Table => {
            println!("Run '{}' started.", run.run_name);
            println!("  worktree: {}", run.worktree_path.display());
            println!("  branch:   {}", run.branch_name);
            println!("Next: c-harness run {}", run.run_name);
        }
    }
    Ok(())
}

fn handle_run(home: &Path, args: &RunArgs, format: OutputFormat) -> Result<()> {
    let report = with_lease(home, args.force_lock, |events| {
        let engine = engine_for(home, events);

        // The agent runtime is constructed only here, so every other
        // command stays free of it.
        let mut config = ClaudeCodeConfig::new(args.agent_binary.clone());
        if let Some(model) = &args.model {
            config = config.with_model(model.clone());
        }
        let mut adapter = ClaudeCodeAdapter::new(config);
        adapter
            .health_check()
            .map_err(|e| HarnessError::Other(format!("agent runtime unavailable: {e}")))?;

        engine.run_agent(&args.run_name, &mut adapter)
    })?;

    match format {
        OutputFormat::Json => output(
            &serde_json::json!({
                "runName": args.run_name,
                "exitCode": report.exit_code,
                "durationMs": report.duration.as_millis() as u64,
            }),
            format,
        ),
        OutputFormat::Table => {
            if report.is_success() {
                println!("Agent finished run '{}' (exit 0).", args.run_name);
            } else {
                println!(
                    "Agent exited {} on run '{}'; run stays active.",
                    report.exit_code, args.run_name
                );
            }
        }
    }
    Ok(())
}

fn handle_finish(home: &Path, args: &FinishArgs, format: OutputFormat) -> Result<()> {
    let outcome = with_lease(home, args.force_lock, |events| {
        let engine = engine_for(home, events);

        // Interactive triage happens before the engine's strict gate, so a
        // decision made here immediately unblocks the finish.
        if std::io::stdin().is_terminal() {
            triage_doc_drift(home, &args.run_name)?;
        }

        engine.finish(&FinishOptions {
            run_name: args.run_name.clone(),
            handoff_path: args.handoff_path.clone(),
            doc_strict: args.doc_strict,
            force: args.force,
        })
    })?;

    match format {
        OutputFormat::Json => output(
            &serde_json::json!({
                "runName": args.run_name,
                "branch": outcome.branch,
                "prHint": outcome.pr_hint,
            }),
            format,
        ),
        OutputFormat::Table => {
            println!("Run '{}' finished; pushed {}.", args.run_name, outcome.branch);
            if let Some(hint) = &outcome.pr_hint {
                println!("Open a PR: {hint}");
            }
        }
    }
    Ok(())
}

/// Walks unresolved drift items with the user: update docs, mark internal,
/// defer, or continue without persisting.
fn triage_doc_drift(home: &Path, run_name: &str) -> Result<()> {
    let store = StateStore::new(home);
    let state = store.load()?;
    let Some(run) = state.run_by_name(run_name) else {
        return Ok(()); // the engine reports the missing run properly
    };
    let Some(project) = state.project(run.project_id) else {
        return Ok(());
    };
    if !run.worktree_path.exists() {
        return Ok(());
    }

    let flags = extract_cli_flags(&run.worktree_path)?;
    let (pending, mut decisions) =
        check_drift_before_finish(&run.worktree_path, &project.repo_path, &flags)?;

    let stdin = std::io::stdin();
    for item in pending {
        println!("Undocumented change: {} (expected in {})", item.item, item.location);
        print!("  [u]pdate docs / [i]nternal / [d]efer / [c]ontinue: ");
        std::io::stdout().flush()?;

        let mut answer = String::new();
        stdin.lock().read_line(&mut answer)?;
        match answer.trim().to_lowercase().as_str() {
            "u" => {
                print!("  Description for the docs: ");
                std::io::stdout().flush()?;
                let mut description = String::new();
                stdin.lock().read_line(&mut description)?;
                decisions.decide(
                    &item.item,
                    Decision::Documented,
                    Some(description.trim().to_string()),
                )?;
                println!("  Recorded. Add '{}' to {} before merging.", item.item, item.location);
            }
            "i" => decisions.decide(&item.item, Decision::Internal, None)?,
            "d" => decisions.decide(&item.item, Decision::Deferred, None)?,
            _ => {}
        }
    }
    Ok(())
}

fn handle_clean(home: &Path, args: &CleanArgs, format: OutputFormat) -> Result<()> {
    with_lease(home, args.force_lock, |events| {
        let engine = engine_for(home, events);
        engine.clean(&CleanOptions {
            run_name: args.run_name.clone(),
            delete_branch: args.delete_branch,
            force: args.force,
        })
    })?;

    match format {
        OutputFormat::Json => output(&serde_json::json!({"cleaned": args.run_name}), format),
        OutputFormat::Table => println!("Run '{}' cleaned.", args.run_name),
    }
    Ok(())
}

fn run_rows(view: &ReconciledView) -> Vec<serde_json::Value> {
    view.state
        .runs
        .iter()
        .map(|run| {
            let health = view.run_health(run.id);
            let progress = health
                .and_then(|h| h.handoff_counts)
                .map(|(p, t)| format!("{p}/{t}"));
            serde_json::json!({
                "runName": run.run_name,
                "state": run.state.to_string(),
                "branch": run.branch_name,
                "worktree": run.worktree_path.display().to_string(),
                "tasks": progress,
            })
        })
        .collect()
}

fn handle_list(home: &Path, format: OutputFormat) -> Result<()> {
    let events = event_log(home);
    let view = load_view(home, &events)?;
    let rows = run_rows(&view);

    match format {
        OutputFormat::Json => output(&rows, format),
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("No runs. Start one with: c-harness start <run-name> --repo-path <p>");
                return Ok(());
            }
            let mut table = create_table(&["RUN", "STATE", "BRANCH", "TASKS"]);
            for row in &rows {
                table.add_row(vec![
                    row["runName"].as_str().unwrap_or_default().to_string(),
                    row["state"].as_str().unwrap_or_default().to_string(),
                    row["branch"].as_str().unwrap_or_default().to_string(),
                    row["tasks"].as_str().unwrap_or("-").to_string(),
                ]);
            }
            println!("{table}");
        }
    }
    Ok(())
}

fn handle_status(home: &Path, format: OutputFormat) -> Result<()> {
    let events = event_log(home);
    let store = StateStore::new(home);
    let view = load_view(home, &events)?;
    let pending_captures = store.pending_inbox_captures()?.len();

    if format == OutputFormat::Json {
        output(
            &serde_json::json!({
                "focusProject": view.state.focus_project().map(|p| p.name.clone()),
                "projects": view.state.projects.len(),
                "runs": run_rows(&view),
                "drift": view.drift.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "inbox": view.state.inbox.len() + pending_captures,
            }),
            format,
        );
        return Ok(());
    }

    match view.state.focus_project() {
        Some(project) => {
            println!(
                "Focus: {} ({})",
                project.name,
                project.repo_path.display()
            );
            let git = cloud_harness::core::git::GitDriver::new(&project.repo_path);
            if let Ok(log) = git.log("HEAD", 1) {
                if let Some(head) = log.first() {
                    println!("Head:  {head}");
                }
            }
        }
        None => println!("Focus: none (c-harness focus set <id|name>)"),
    }

    if view.state.projects.is_empty() {
        println!("No projects registered.");
    } else {
        let mut table = create_table(&["PROJECT", "REPO", "STATUS"]);
        for project in &view.state.projects {
            table.add_row(vec![
                project.name.clone(),
                project.repo_path.display().to_string(),
                format!("{:?}", project.status).to_lowercase(),
            ]);
        }
        println!("{table}");
    }

    if !view.state.runs.is_empty() {
        let mut table = create_table(&["RUN", "STATE", "BRANCH", "TASKS"]);
        for row in run_rows(&view) {
            table.add_row(vec![
                row["runName"].as_str().unwrap_or_default().to_string(),
                row["state"].as_str().unwrap_or_default().to_string(),
                row["branch"].as_str().unwrap_or_default().to_string(),
                row["tasks"].as_str().unwrap_or("-").to_string(),
            ]);
        }
        println!("{table}");
    }

    for drift in &view.drift {
        println!("warning: {drift}");
    }

    let untriaged = view
        .state
        .inbox
        .iter()
        .filter(|i| i.triage_status.is_none())
        .count()
        + pending_captures;
    if untriaged > 0 {
        println!("Inbox: {untriaged} item(s) awaiting triage.");
    }
    Ok(())
}

fn handle_next(home: &Path, format: OutputFormat) -> Result<()> {
    let events = event_log(home);
    let view = load_view(home, &events)?;
    let next = compute_next_action(&view);

    match format {
        OutputFormat::Json => output(
            &serde_json::json!({"action": next.action, "why": next.why, "done": next.done}),
            format,
        ),
        OutputFormat::Table => {
            println!("Next:  {}", next.action);
            println!("Why:   {}", next.why);
            println!("Done:  {}", next.done);
        }
    }
    Ok(())
}

/// Set by the SIGINT handler; the session loop treats it as a quit.
static SESSION_CANCELLED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_: i32) {
    SESSION_CANCELLED.store(true, Ordering::SeqCst);
}

fn handle_session(home: &Path, args: &SessionArgs) -> Result<()> {
    let mut events = event_log(home);
    let mut manager = LockManager::new(home);

    let mut force = args.force_lock;
    let outcome = loop {
        match manager.acquire(force) {
            Ok(outcome) => break outcome,
            Err(HarnessError::LockHeld { pid })
                if manager.holder_heartbeat_stale() && std::io::stdin().is_terminal() =>
            {
                // Alive PID, silent heartbeat: confirm before taking over.
                print!("Controller PID {pid} has a stale heartbeat. Take over? [y/N]: ");
                std::io::stdout().flush()?;
                let mut answer = String::new();
                std::io::stdin().lock().read_line(&mut answer)?;
                if answer.trim().eq_ignore_ascii_case("y") {
                    force = true;
                    continue;
                }
                events.emit(EventKind::LockDenied, event_fields! {"controllerPid" => pid});
                return Err(HarnessError::LockHeld { pid });
            }
            Err(e) => {
                if let HarnessError::LockHeld { pid } = &e {
                    events.emit(EventKind::LockDenied, event_fields! {"controllerPid" => *pid});
                    println!("Observer mode: controller PID {pid} holds the lease.");
                    println!("Read-only commands and 'inbox \"<text>\"' capture still work.");
                }
                return Err(e);
            }
        }
    };

    let session_id = manager.session_id().expect("acquired lease has a session");
    events.set_session(session_id);
    if let Acquired::StaleTakeover(reason) = outcome {
        events.emit(
            EventKind::LockStaleTakeover,
            event_fields! {"reason" => reason.as_str()},
        );
    }
    events.emit_empty(EventKind::LockAcquired);
    events.emit(
        EventKind::SessionStarted,
        event_fields! {"mode" => "controller"},
    );

    // Only the long-lived session runs the heartbeat task.
    let heartbeat = HeartbeatTask::spawn(home.to_path_buf(), session_id);

    // Ctrl+C ends the session cleanly instead of killing the process.
    unsafe {
        let _ = nix::sys::signal::signal(
            nix::sys::signal::Signal::SIGINT,
            nix::sys::signal::SigHandler::Handler(on_sigint),
        );
    }

    println!("Controller session active (session {session_id}).");
    println!("Commands: status, next, quit");

    let stdin = std::io::stdin();
    let mut reconciler = Reconciler::new();
    loop {
        print!("commander> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        // EOF, Ctrl+C, and quit all end the session cleanly.
        let read = match stdin.lock().read_line(&mut line) {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => 0,
            Err(e) => return Err(e.into()),
        };
        if read == 0 || SESSION_CANCELLED.load(Ordering::SeqCst) {
            break;
        }
        match line.trim() {
            "" => {}
            "quit" | "exit" => break,
            "status" => {
                let state = StateStore::new(home).load()?;
                let view = reconciler.view(state)?;
                for row in run_rows(&view) {
                    println!(
                        "{}  {}  {}",
                        row["runName"].as_str().unwrap_or_default(),
                        row["state"].as_str().unwrap_or_default(),
                        row["tasks"].as_str().unwrap_or("-"),
                    );
                }
                for drift in &view.drift {
                    println!("warning: {drift}");
                }
            }
            "next" => {
                let state = StateStore::new(home).load()?;
                let view = reconciler.view(state)?;
                let next = compute_next_action(&view);
                println!("{} ({})", next.action, next.why);
            }
            other => println!("unknown command '{other}' (status, next, quit)"),
        }
    }

    // Stop the heartbeat before releasing so the files cannot be revived
    // after the release.
    heartbeat.stop();
    manager.release();
    events.emit_empty(EventKind::LockReleased);
    events.emit_empty(EventKind::SessionEnded);
    println!("Session ended.");
    Ok(())
}

fn handle_focus(home: &Path, cmd: FocusCommands, format: OutputFormat) -> Result<()> {
    match cmd {
        FocusCommands::Show => {
            let state = StateStore::new(home).load()?;
            match state.focus_project() {
                Some(project) => match format {
                    OutputFormat::Json => output(project, format),
                    OutputFormat::Table => {
                        println!("{} ({})", project.name, project.repo_path.display());
                    }
                },
                None => println!("No focus project set."),
            }
            Ok(())
        }
        FocusCommands::Set(args) => {
            let project = with_lease(home, args.force_lock, |events| {
                engine_for(home, events).focus_set(&args.project)
            })?;
            match format {
                OutputFormat::Json => output(&project, format),
                OutputFormat::Table => println!("Focus set to '{}'.", project.name),
            }
            Ok(())
        }
    }
}

fn handle_inbox(home: &Path, args: &InboxArgs, format: OutputFormat) -> Result<()> {
    let store = StateStore::new(home);

    if let Some(text) = &args.text {
        // Observer-safe capture: append-only, no lease.
        let item = InboxItem::new(text.clone());
        store.capture_inbox_item(&item)?;
        match format {
            OutputFormat::Json => output(&item, format),
            OutputFormat::Table => println!("Captured {}.", item.id),
        }
        return Ok(());
    }

    if let Some(id) = &args.promote {
        let task = with_lease(home, args.force_lock, |events| {
            engine_for(home, events).inbox_promote(id)
        })?;
        match format {
            OutputFormat::Json => output(&task, format),
            OutputFormat::Table => println!("Promoted to task '{}'.", task.title),
        }
        return Ok(());
    }

    if let Some(id) = &args.dismiss {
        let item = with_lease(home, args.force_lock, |events| {
            engine_for(home, events).inbox_dismiss(id)
        })?;
        match format {
            OutputFormat::Json => output(&item, format),
            OutputFormat::Table => println!("Dismissed {}.", item.id),
        }
        return Ok(());
    }

    // Default and --list: show registry items plus undrained captures.
    let state = store.load()?;
    let pending = store.pending_inbox_captures()?;
    match format {
        OutputFormat::Json => output(
            &serde_json::json!({"inbox": state.inbox, "pendingCaptures": pending}),
            format,
        ),
        OutputFormat::Table => {
            if state.inbox.is_empty() && pending.is_empty() {
                println!("Inbox is empty.");
                return Ok(());
            }
            let mut table = create_table(&["ID", "TEXT", "TRIAGE"]);
            for item in state.inbox.iter().chain(pending.iter()) {
                let triage = item
                    .triage_status
                    .map_or("-".to_string(), |t| format!("{t:?}").to_lowercase());
                let short_id = item.id.to_string()[..8].to_string();
                table.add_row(vec![short_id, item.text.clone(), triage]);
            }
            println!("{table}");
        }
    }
    Ok(())
}

fn handle_doctor(home: &Path, args: &DoctorArgs, format: OutputFormat) -> Result<()> {
    let store = StateStore::new(home);

    if args.repair_state {
        let (state, backup) = with_lease(home, args.force_lock, |events| {
            let result = store.repair()?;
            events.emit(
                EventKind::StateUpdated,
                event_fields! {"repaired" => result.1.is_some()},
            );
            Ok(result)
        })?;
        match backup {
            Some(path) => println!(
                "Repaired: corrupt registry backed up to {} ({} runs now).",
                path.display(),
                state.runs.len()
            ),
            None => println!("Registry is healthy; nothing to repair."),
        }
        return Ok(());
    }

    let mut checks: Vec<(String, bool, String)> = Vec::new();
    checks.push((
        "home directory".to_string(),
        home.exists(),
        home.display().to_string(),
    ));

    let state_check = match store.load() {
        Ok(state) => (true, format!("{} run(s) registered", state.runs.len())),
        Err(e) => (false, e.to_string()),
    };
    checks.push(("registry".to_string(), state_check.0, state_check.1));
    checks.push((
        "no leftover temp file".to_string(),
        !store.tmp_path().exists(),
        store.tmp_path().display().to_string(),
    ));

    let manager = LockManager::new(home);
    let lock_detail = match (manager.read_lock(), manager.read_heartbeat()) {
        (None, None) => (true, "no controller active".to_string()),
        (Some(lock), Some(hb)) if lock.session_id == hb.session_id => {
            (true, format!("controller PID {}", lock.pid))
        }
        (Some(lock), _) => (
            false,
            format!("lock (PID {}) and heartbeat disagree", lock.pid),
        ),
        (None, Some(_)) => (false, "orphan heartbeat without a lock".to_string()),
    };
    checks.push(("lease files".to_string(), lock_detail.0, lock_detail.1));

    let healthy = checks.iter().all(|(_, ok, _)| *ok);
    match format {
        OutputFormat::Json => output(
            &serde_json::json!({
                "healthy": healthy,
                "checks": checks
                    .iter()
                    .map(|(name, ok, detail)| serde_json::json!({
                        "name": name, "ok": ok, "detail": detail
                    }))
                    .collect::<Vec<_>>(),
            }),
            format,
        ),
        OutputFormat::Table => {
            for (name, ok, detail) in &checks {
                println!("{} {name}: {detail}", if *ok { "ok " } else { "FAIL" });
            }
        }
    }

    if healthy {
        Ok(())
    } else {
        Err(HarnessError::Other(
            "doctor found problems (see checks above)".to_string(),
        ))
    }
}

fn handle_bootstrap(home: &Path, args: &BootstrapArgs, format: OutputFormat) -> Result<()> {
    let expected: [PathBuf; 3] = [
        home.to_path_buf(),
        home.join("locks"),
        home.join("state.json"),
    ];

    let mut missing: Vec<&Path> = expected
        .iter()
        .map(PathBuf::as_path)
        .filter(|p| !p.exists())
        .collect();

    if args.apply && !missing.is_empty() {
        std::fs::create_dir_all(home.join("locks"))?;
        let store = StateStore::new(home);
        if !store.state_path().exists() {
            store.save(&State::default())?;
        }
        missing.clear();
    }

    match format {
        OutputFormat::Json => output(
            &serde_json::json!({
                "home": home.display().to_string(),
                "missing": missing.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
                "applied": args.apply,
            }),
            format,
        ),
        OutputFormat::Table => {
            if missing.is_empty() {
                println!("Installation looks good ({}).", home.display());
            } else {
                for path in &missing {
                    println!("missing: {}", path.display());
                }
                println!("Run 'c-harness bootstrap --apply' to create them.");
            }
        }
    }
    Ok(())
}
