//! Command executor abstraction.
//!
//! The [`Executor`] trait decouples the agent loop from where commands run.
//! [`LocalExecutor`] runs them with `sh -c` on this machine; tests use
//! scripted executors that never spawn processes.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::io::config::ExecutorConfig;
use crate::io::process::run_with_timeout;

/// One command to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub command: String,
    /// Overrides the executor's configured working directory.
    pub cwd: Option<PathBuf>,
    /// Overrides the executor's default timeout.
    pub timeout: Option<Duration>,
}

impl ExecRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            cwd: None,
            timeout: None,
        }
    }
}

/// Result of a command that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub output: String,
    pub returncode: i32,
}

#[derive(Debug, Error)]
pub enum ExecError {
    /// The command exceeded its timeout and was killed.
    #[error("command timed out after {}s", timeout.as_secs())]
    Timeout { timeout: Duration, output: String },

    /// The command could not be run at all.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Abstraction over command execution backends.
pub trait Executor {
    fn execute(&self, request: &ExecRequest) -> Result<ExecOutput, ExecError>;
}

/// Runs commands in a local shell.
#[derive(Debug, Clone, Default)]
pub struct LocalExecutor {
    config: ExecutorConfig,
}

impl LocalExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }
}

impl Executor for LocalExecutor {
    #[instrument(skip_all, fields(timeout_secs = tracing::field::Empty))]
    fn execute(&self, request: &ExecRequest) -> Result<ExecOutput, ExecError> {
        let timeout = request
            .timeout
            .unwrap_or(Duration::from_secs(self.config.timeout_secs));
        tracing::Span::current().record("timeout_secs", timeout.as_secs());
        info!(command = %request.command, "executing");

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&request.command);
        if let Some(cwd) = request.cwd.as_ref().or(self.config.cwd.as_ref()) {
            cmd.current_dir(cwd);
        }
        cmd.envs(&self.config.env);

        let captured = run_with_timeout(cmd, None, timeout, self.config.output_limit_bytes)?;
        let output = captured.combined_text();
        if captured.timed_out {
            warn!(timeout_secs = timeout.as_secs(), "command timed out");
            return Err(ExecError::Timeout { timeout, output });
        }

        debug!(returncode = captured.code(), bytes = output.len(), "command finished");
        Ok(ExecOutput {
            output,
            returncode: captured.code(),
        })
    }
}
