//! Claude Code adapter - spawns the `claude` CLI in a run's worktree.

use super::runtime::{AdapterConfig, AdapterError, AgentAdapter, AgentInput, ExecutionReport};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;

/// Claude Code adapter configuration.
#[derive(Debug, Clone)]
pub struct ClaudeCodeConfig {
    pub base: AdapterConfig,
    pub model: Option<String>,
}

impl ClaudeCodeConfig {
    pub fn new(binary_path: PathBuf) -> Self {
        Self {
            base: AdapterConfig::new("claude-code", binary_path).with_arg("-p"),
            model: None,
        }
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

impl Default for ClaudeCodeConfig {
    fn default() -> Self {
        Self::new(PathBuf::from("claude"))
    }
}

/// Spawn-and-wait adapter for the Claude Code CLI.
pub struct ClaudeCodeAdapter {
    config: ClaudeCodeConfig,
}

impl ClaudeCodeAdapter {
    #[must_use]
    pub fn new(mut config: ClaudeCodeConfig) -> Self {
        if let Some(model) = config.model.clone() {
            let has_model_flag = config
                .base
                .args
                .iter()
                .any(|a| a == "--model" || a.starts_with("--model="));
            if !has_model_flag {
                config.base.args.extend(["--model".to_string(), model]);
            }
        }
        Self { config }
    }

    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(ClaudeCodeConfig::default())
    }
}

impl AgentAdapter for ClaudeCodeAdapter {
    fn name(&self) -> &str {
        &self.config.base.name
    }

    fn health_check(&self) -> Result<(), AdapterError> {
        let result = Command::new(&self.config.base.binary_path)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match result {
            Ok(status) if status.success() => Ok(()),
            Ok(_) => Err(AdapterError::new(
                "health_check_failed",
                format!(
                    "Binary {} is not responding correctly",
                    self.config.base.binary_path.display()
                ),
            )),
            Err(e) => Err(AdapterError::new(
                "binary_not_found",
                format!(
                    "Cannot execute {}: {e}",
                    self.config.base.binary_path.display()
                ),
            )),
        }
    }

    fn execute(
        &mut self,
        worktree: &Path,
        input: &AgentInput,
    ) -> Result<ExecutionReport, AdapterError> {
        if !worktree.exists() {
            return Err(AdapterError::new(
                "worktree_not_found",
                format!("Worktree does not exist: {}", worktree.display()),
            ));
        }

        let start = Instant::now();

        let mut cmd = Command::new(&self.config.base.binary_path);
        cmd.current_dir(worktree)
            .args(&self.config.base.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &self.config.base.env {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| AdapterError::new("spawn_failed", format!("Failed to spawn agent: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.prompt.as_bytes()).map_err(|e| {
                AdapterError::new("stdin_write_failed", format!("Failed to write prompt: {e}"))
            })?;
        }

        // Drain both pipes on threads so a chatty agent cannot deadlock us.
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_handle = std::thread::spawn(move || read_pipe(stdout));
        let stderr_handle = std::thread::spawn(move || read_pipe(stderr));

        let status = child
            .wait()
            .map_err(|e| AdapterError::new("wait_failed", format!("Failed to wait on agent: {e}")))?;

        let stdout = stdout_handle.join().unwrap_or_default();
        let stderr = stderr_handle.join().unwrap_or_default();

        Ok(ExecutionReport {
            exit_code: status.code().unwrap_or(-1),
            duration: start.elapsed(),
            stdout,
            stderr,
        })
    }
}

fn read_pipe<R: Read>(pipe: Option<R>) -> String {
    let mut out = String::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_string(&mut out);
    }
    out
}

/// Renders the prompt handed to the agent for a run.
#[must_use]
pub fn render_prompt(run_name: &str, handoff_path: &Path) -> String {
    format!(
        "You are working inside an isolated git worktree for run '{run_name}'.\n\
         The task plan is in {handoff}.\n\
         Work through the tasks in order. For each task, implement it, verify\n\
         every acceptance criterion, and only then set its \"passes\" field to\n\
         true in the task plan. Never change any other field.\n",
        handoff = handoff_path.display()
    )
}
