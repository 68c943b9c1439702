//! Trajectory export: the full history plus run statistics, as JSON.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::debug;

use crate::core::mode::Mode;
use crate::core::types::Message;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ModelStats {
    pub instance_cost: f64,
    pub api_calls: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TrajectoryInfo {
    /// `None` when the run never produced a status (e.g. aborted before starting).
    pub exit_status: Option<String>,
    pub submission: Option<String>,
    pub model_stats: ModelStats,
    pub mode: Mode,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Trajectory<'a> {
    pub info: TrajectoryInfo,
    pub messages: &'a [Message],
}

/// Write `trajectory` as pretty JSON with a trailing newline, creating parent dirs.
pub fn save_trajectory(path: &Path, trajectory: &Trajectory<'_>) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create trajectory dir {}", parent.display()))?;
    }
    let mut buf = serde_json::to_string_pretty(trajectory).context("serialize trajectory")?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write trajectory {}", path.display()))?;
    debug!(path = %path.display(), messages = trajectory.messages.len(), "trajectory saved");
    Ok(())
}
