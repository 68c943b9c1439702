//! Test-only collaborators: a scripted model, executor and human.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Result, anyhow};
use parking_lot::Mutex;
use tracing::debug;

use crate::core::mode::Mode;
use crate::core::types::{InputRequest, Message};
use crate::io::config::AgentConfig;
use crate::io::cost::CostTracker;
use crate::io::executor::{ExecError, ExecOutput, ExecRequest, Executor};
use crate::io::model::{Model, ModelResponse};
use crate::rendezvous::Rendezvous;

/// Returns queued responses in order.
///
/// Running out of responses is an error.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    responses: VecDeque<String>,
    cost_per_call: f64,
    tracker: Option<Arc<CostTracker>>,
    cost: f64,
    n_calls: u64,
    seen: Vec<usize>,
}

impl ScriptedModel {
    pub fn new<S: Into<String>>(responses: impl IntoIterator<Item = S>) -> Self {
        Self {
            responses: responses.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_cost_per_call(mut self, cost: f64) -> Self {
        self.cost_per_call = cost;
        self
    }

    pub fn with_tracker(mut self, tracker: Arc<CostTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Seed the cumulative cost, as if earlier calls had been made.
    pub fn with_initial_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn remaining(&self) -> usize {
        self.responses.len()
    }

    /// History length observed by each query.
    pub fn seen_history_lengths(&self) -> &[usize] {
        &self.seen
    }
}

impl Model for ScriptedModel {
    fn query(&mut self, messages: &[Message]) -> Result<ModelResponse> {
        self.n_calls += 1;
        self.cost += self.cost_per_call;
        self.seen.push(messages.len());
        if let Some(tracker) = &self.tracker {
            tracker.add(self.cost_per_call)?;
        }
        let content = self
            .responses
            .pop_front()
            .ok_or_else(|| anyhow!("scripted model exhausted after {} calls", self.n_calls - 1))?;
        debug!(n_calls = self.n_calls, "scripted response");
        Ok(ModelResponse::text(content))
    }

    fn cost(&self) -> f64 {
        self.cost
    }

    fn n_calls(&self) -> u64 {
        self.n_calls
    }
}

/// One scripted executor result.
#[derive(Debug, Clone)]
pub enum ScriptedExec {
    Output { output: String, returncode: i32 },
    Timeout { output: String },
}

impl ScriptedExec {
    pub fn ok(output: impl Into<String>) -> Self {
        ScriptedExec::Output {
            output: output.into(),
            returncode: 0,
        }
    }

    /// Output whose first line is the completion sentinel.
    pub fn submit(result: &str) -> Self {
        Self::ok(format!("COMPLETE_TASK_AND_SUBMIT_FINAL_OUTPUT\n{result}"))
    }
}

/// Executor that replays results and records every request it receives.
///
/// Running out of results fails the command.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<ScriptedExec>>,
    requests: Mutex<Vec<ExecRequest>>,
}

impl ScriptedExecutor {
    pub fn new(script: impl IntoIterator<Item = ScriptedExec>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ExecRequest> {
        self.requests.lock().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .map(|request| request.command.clone())
            .collect()
    }
}

impl Executor for ScriptedExecutor {
    fn execute(&self, request: &ExecRequest) -> Result<ExecOutput, ExecError> {
        self.requests.lock().push(request.clone());
        match self.script.lock().pop_front() {
            Some(ScriptedExec::Output { output, returncode }) => {
                Ok(ExecOutput { output, returncode })
            }
            Some(ScriptedExec::Timeout { output }) => Err(ExecError::Timeout {
                timeout: request.timeout.unwrap_or(Duration::from_secs(30)),
                output,
            }),
            None => Err(ExecError::Failed(anyhow!(
                "scripted executor has no result for {:?}",
                request.command
            ))),
        }
    }
}

/// What the scripted human does with the next request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HumanInput {
    Line(String),
    Interrupt,
    Close,
}

impl HumanInput {
    pub fn line(text: impl Into<String>) -> Self {
        HumanInput::Line(text.into())
    }

    /// Empty line: confirms at a confirmation prompt.
    pub fn enter() -> Self {
        HumanInput::Line(String::new())
    }
}

/// A thread that answers rendezvous requests from a fixed script.
///
/// When the script runs out, the rendezvous is closed so the agent cannot
/// hang waiting for input that will never come.
pub struct ScriptedHuman {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<Vec<InputRequest>>,
}

impl ScriptedHuman {
    pub fn spawn(
        rendezvous: Arc<Rendezvous>,
        script: impl IntoIterator<Item = HumanInput>,
    ) -> Self {
        let mut script: VecDeque<HumanInput> = script.into_iter().collect();
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut seen = Vec::new();
                while !stop.load(Ordering::SeqCst) {
                    let Some(request) = rendezvous.pending() else {
                        thread::sleep(Duration::from_millis(1));
                        continue;
                    };
                    seen.push(request);
                    match script.pop_front() {
                        Some(HumanInput::Line(text)) => {
                            rendezvous.complete(text);
                        }
                        Some(HumanInput::Interrupt) => rendezvous.interrupt(),
                        Some(HumanInput::Close) | None => {
                            rendezvous.close();
                            break;
                        }
                    }
                }
                seen
            })
        };
        Self { stop, handle }
    }

    /// Stop answering and return every request that was seen, in order.
    pub fn finish(self) -> Vec<InputRequest> {
        self.stop.store(true, Ordering::SeqCst);
        self.handle.join().unwrap_or_default()
    }
}

/// Agent config for a given mode with default templates.
pub fn agent_config(mode: Mode) -> AgentConfig {
    AgentConfig {
        mode,
        cost_limit: 0.0,
        ..AgentConfig::default()
    }
}

/// Temporary working directory for tests that run real commands.
pub fn workdir() -> tempfile::TempDir {
    tempfile::tempdir().unwrap_or_else(|err| panic!("create tempdir: {err}"))
}
