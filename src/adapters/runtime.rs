//! Agent adapter interface.
//!
//! The lifecycle engine does not manage the agent beyond spawn-and-wait:
//! it prepares a worktree, hands the adapter a prompt, and records the
//! exit code.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Input handed to the agent for one run.
#[derive(Debug, Clone)]
pub struct AgentInput {
    /// Rendered prompt for the agent.
    pub prompt: String,
    /// Where the handoff lives inside the worktree.
    pub handoff_path: PathBuf,
}

/// What came back from one agent invocation.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub exit_code: i32,
    pub duration: Duration,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// An error from the adapter itself (not the agent's own failure).
#[derive(Debug, thiserror::Error)]
#[error("[{code}] {message}")]
pub struct AdapterError {
    pub code: String,
    pub message: String,
}

impl AdapterError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Configuration for an agent adapter.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub name: String,
    pub binary_path: PathBuf,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

impl AdapterConfig {
    pub fn new(name: impl Into<String>, binary_path: PathBuf) -> Self {
        Self {
            name: name.into(),
            binary_path,
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Trait for agent runtimes.
pub trait AgentAdapter {
    /// Adapter name for logs and the registry's `last_command`.
    fn name(&self) -> &str;

    /// Checks the runtime binary responds before spawning work.
    fn health_check(&self) -> Result<(), AdapterError>;

    /// Spawns the agent in `worktree` and waits for it to exit.
    fn execute(&mut self, worktree: &Path, input: &AgentInput)
        -> Result<ExecutionReport, AdapterError>;
}

/// Mock adapter for tests: returns a scripted report.
#[derive(Debug)]
pub struct MockAdapter {
    config: AdapterConfig,
    exit_code: i32,
    pub executed_in: Option<PathBuf>,
}

impl MockAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: AdapterConfig::new("mock", PathBuf::from("/bin/true")),
            exit_code: 0,
            executed_in: None,
        }
    }

    #[must_use]
    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = exit_code;
        self
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentAdapter for MockAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn health_check(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    fn execute(
        &mut self,
        worktree: &Path,
        _input: &AgentInput,
    ) -> Result<ExecutionReport, AdapterError> {
        if !worktree.exists() {
            return Err(AdapterError::new(
                "worktree_not_found",
                format!("Worktree does not exist: {}", worktree.display()),
            ));
        }
        self.executed_in = Some(worktree.to_path_buf());
        Ok(ExecutionReport {
            exit_code: self.exit_code,
            duration: Duration::from_millis(1),
            stdout: "mock output".to_string(),
            stderr: String::new(),
        })
    }
}
