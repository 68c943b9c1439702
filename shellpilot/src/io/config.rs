//! Agent configuration stored as TOML.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::action::Whitelist;
use crate::core::limits::RunLimits;
use crate::core::mode::Mode;

/// Full configuration file.
///
/// Missing tables and fields fall back to defaults so a partial file is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub agent: AgentConfig,
    pub executor: ExecutorConfig,
    pub model: ModelConfig,
    pub limits: GlobalLimitsConfig,
}

/// Templates and limits for the control loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub system_template: String,
    /// Receives `task` plus every field of this table.
    pub instance_template: String,
    /// Receives `action` and `output` (partial output, possibly empty).
    pub timeout_template: String,
    /// Receives `actions`, the list of blocks that were found.
    pub format_error_template: String,
    /// Receives `output` and `returncode`.
    pub action_observation_template: String,
    /// Maximum model queries per run; 0 disables.
    pub step_limit: u64,
    /// Maximum model cost per run; 0 disables.
    pub cost_limit: f64,
    /// Upper bound for inline `# timeout: N` directives, in seconds.
    pub max_timeout: u64,
    pub mode: Mode,
    /// Regular expressions for actions that skip confirmation.
    pub whitelist_actions: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_template: "You are a helpful assistant that can do anything.".to_string(),
            instance_template: concat!(
                "Your task: {{task}}. Please reply with a single shell command in triple backticks. ",
                "To finish, the first line of the output of the shell command must be ",
                "'COMPLETE_TASK_AND_SUBMIT_FINAL_OUTPUT'. ",
                "If a command needs more time, add '# timeout: <seconds>' on the first line ",
                "(max {{max_timeout}} seconds)."
            )
            .to_string(),
            timeout_template: concat!(
                "The last command <command>{{action}}</command> timed out and has been killed.\n",
                "The output of the command was:\n<output>\n{{output}}\n</output>\n",
                "Please try another command and make sure to avoid those requiring interactive input."
            )
            .to_string(),
            format_error_template: concat!(
                "Please always provide EXACTLY ONE action in triple backticks, ",
                "found {{actions|length}} actions."
            )
            .to_string(),
            action_observation_template: concat!(
                "<returncode>{{returncode}}</returncode>\n",
                "<output>\n{{output}}</output>"
            )
            .to_string(),
            step_limit: 0,
            cost_limit: 3.0,
            max_timeout: 300,
            mode: Mode::Confirm,
            whitelist_actions: Vec::new(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.cost_limit < 0.0 || !self.cost_limit.is_finite() {
            return Err(anyhow!("agent.cost_limit must be a finite value >= 0"));
        }
        if self.max_timeout == 0 {
            return Err(anyhow!("agent.max_timeout must be > 0"));
        }
        self.whitelist()?;
        Ok(())
    }

    pub fn limits(&self) -> RunLimits {
        RunLimits {
            step_limit: self.step_limit,
            cost_limit: self.cost_limit,
        }
    }

    pub fn whitelist(&self) -> Result<Whitelist> {
        Whitelist::new(&self.whitelist_actions).context("compile agent.whitelist_actions")
    }
}

/// Settings for the local shell executor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Working directory; the process cwd when unset.
    pub cwd: Option<PathBuf>,
    /// Extra environment variables for every command.
    pub env: BTreeMap<String, String>,
    /// Default per-command timeout in seconds.
    pub timeout_secs: u64,
    /// Truncate command output beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            cwd: None,
            env: BTreeMap::new(),
            timeout_secs: 30,
            output_limit_bytes: 100_000,
        }
    }
}

impl ExecutorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(anyhow!("executor.timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("executor.output_limit_bytes must be > 0"));
        }
        Ok(())
    }
}

/// Settings for the external model command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// Program and arguments; receives the history as JSON on stdin.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    /// Cost charged per successful query.
    pub cost_per_call: f64,
    pub output_limit_bytes: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 10 * 60,
            cost_per_call: 0.0,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(anyhow!("model.timeout_secs must be > 0"));
        }
        if self.cost_per_call < 0.0 || !self.cost_per_call.is_finite() {
            return Err(anyhow!("model.cost_per_call must be a finite value >= 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("model.output_limit_bytes must be > 0"));
        }
        Ok(())
    }
}

/// Process-wide caps shared by every agent in this process. 0 disables.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GlobalLimitsConfig {
    pub global_cost_limit: f64,
    pub global_call_limit: u64,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        self.agent.validate()?;
        self.executor.validate()?;
        self.model.validate()?;
        if self.limits.global_cost_limit < 0.0 || !self.limits.global_cost_limit.is_finite() {
            return Err(anyhow!("limits.global_cost_limit must be a finite value >= 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `Config::default()`.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        let cfg = Config::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate().with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &Config) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
