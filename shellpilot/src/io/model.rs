//! Language model abstraction.
//!
//! The loop depends only on [`Model`]. [`CommandModel`] delegates to an
//! external program (any LLM CLI that reads a conversation on stdin).

use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{info, instrument, warn};

use crate::core::types::{Content, Message};
use crate::io::config::ModelConfig;
use crate::io::cost::CostTracker;
use crate::io::process::run_with_timeout;

/// A model reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelResponse {
    pub content: Content,
}

impl ModelResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Content::Text(content.into()),
        }
    }
}

/// Abstraction over language model backends.
///
/// `cost` and `n_calls` never decrease.
pub trait Model {
    fn query(&mut self, messages: &[Message]) -> Result<ModelResponse>;
    fn cost(&self) -> f64;
    fn n_calls(&self) -> u64;
}

/// Model backed by an external command.
///
/// The history is written to stdin as a JSON array of `{role, content}`; stdout
/// is the response.
pub struct CommandModel {
    config: ModelConfig,
    tracker: Arc<CostTracker>,
    cost: f64,
    n_calls: u64,
}

impl CommandModel {
    pub fn new(config: ModelConfig, tracker: Arc<CostTracker>) -> Result<Self> {
        if config.command.first().is_none_or(|p| p.trim().is_empty()) {
            return Err(anyhow!(
                "model.command must name a program (e.g. [\"llm\", \"-m\", \"gpt-4o\"])"
            ));
        }
        config.validate()?;
        Ok(Self {
            config,
            tracker,
            cost: 0.0,
            n_calls: 0,
        })
    }
}

impl Model for CommandModel {
    #[instrument(skip_all, fields(n_calls = self.n_calls, messages = messages.len()))]
    fn query(&mut self, messages: &[Message]) -> Result<ModelResponse> {
        let payload = serde_json::to_vec(messages).context("serialize messages")?;
        let mut cmd = Command::new(&self.config.command[0]);
        cmd.args(&self.config.command[1..]);

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let output = run_with_timeout(cmd, Some(&payload), timeout, self.config.output_limit_bytes)
            .with_context(|| format!("run model command {}", self.config.command[0]))?;
        if output.timed_out {
            return Err(anyhow!("model command timed out after {:?}", timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "model command failed");
            return Err(anyhow!(
                "model command failed with status {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        let content = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        self.n_calls += 1;
        self.cost += self.config.cost_per_call;
        self.tracker.add(self.config.cost_per_call)?;
        info!(n_calls = self.n_calls, cost = self.cost, "model responded");
        Ok(ModelResponse::text(content))
    }

    fn cost(&self) -> f64 {
        self.cost
    }

    fn n_calls(&self) -> u64 {
        self.n_calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Role;

    #[test]
    fn command_model_requires_a_program() {
        let err = CommandModel::new(ModelConfig::default(), Arc::new(CostTracker::default()))
            .err()
            .expect("missing command");
        assert!(err.to_string().contains("model.command"));
    }

    #[cfg(unix)]
    #[test]
    fn command_model_pipes_history_through_program() {
        let tracker = Arc::new(CostTracker::default());
        let config = ModelConfig {
            // Drain the history, answer with a fixed fenced block.
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                "cat > /dev/null; printf 'ok\\n```bash\\necho hi\\n```\\n'".to_string(),
            ],
            cost_per_call: 0.25,
            ..ModelConfig::default()
        };
        let mut model = CommandModel::new(config, Arc::clone(&tracker)).expect("model");
        let response = model
            .query(&[Message::new(Role::User, "task")])
            .expect("query");
        assert_eq!(response.content.text(), "ok\n```bash\necho hi\n```");
        assert_eq!(model.n_calls(), 1);
        assert_eq!(model.cost(), 0.25);
        assert_eq!(tracker.n_calls(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn command_model_surfaces_failures_without_counting() {
        let config = ModelConfig {
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                "echo boom >&2; exit 1".to_string(),
            ],
            ..ModelConfig::default()
        };
        let mut model = CommandModel::new(config, Arc::new(CostTracker::default())).expect("model");
        let err = model.query(&[]).unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert_eq!(model.n_calls(), 0);
    }
}
