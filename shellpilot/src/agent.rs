//! The agent control loop.
//!
//! [`Agent::run`] seeds the history and calls [`Agent::step`] until a
//! terminal outcome. Each step checks limits, obtains a response (from the
//! model, or from the human in human mode), parses exactly one command,
//! optionally asks for confirmation, executes it, and either detects the
//! completion sentinel or appends the observation.
//!
//! Recoverable conditions (format errors, timeouts, rejections, interrupts)
//! become `user` messages. Every exit from `run` goes through one return
//! point that appends the final message and reports `(status, result)`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::action::{Whitelist, parse_action};
use crate::core::limits::RunLimits;
use crate::core::mode::{Decision, Mode, ModeController};
use crate::core::submission::detect_submission;
use crate::core::types::{
    Action, Content, ExitStatus, InputKind, InputRequest, Message, RecoverableKind, Role,
    StepOutcome,
};
use crate::events::{AgentEvent, EventSink};
use crate::io::config::AgentConfig;
use crate::io::executor::{ExecError, ExecRequest, Executor};
use crate::io::model::Model;
use crate::io::prompt::{TemplateRenderer, TemplateVars};
use crate::io::trajectory::{ModelStats, Trajectory, TrajectoryInfo};
use crate::rendezvous::Rendezvous;

const DEFAULT_INTERRUPT_COMMENT: &str = "Temporary interruption caught.";

/// How a step obtained its response.
enum Response {
    Text(String),
    Interrupted,
}

enum Confirmation {
    Approved,
    Rejected(String),
    Interrupted,
}

pub struct Agent<M, E> {
    config: AgentConfig,
    model: M,
    executor: E,
    messages: Vec<Message>,
    modes: ModeController,
    whitelist: Whitelist,
    limits: RunLimits,
    templates: TemplateRenderer,
    rendezvous: Arc<Rendezvous>,
    sink: Option<Arc<dyn EventSink>>,
    task: String,
}

impl<M: Model, E: Executor> Agent<M, E> {
    pub fn new(config: AgentConfig, model: M, executor: E) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            whitelist: config.whitelist()?,
            limits: config.limits(),
            modes: ModeController::new(config.mode),
            config,
            model,
            executor,
            messages: Vec::new(),
            templates: TemplateRenderer::new(),
            rendezvous: Arc::new(Rendezvous::new()),
            sink: None,
            task: String::new(),
        })
    }

    /// Use a rendezvous shared with a UI thread.
    pub fn with_rendezvous(mut self, rendezvous: Arc<Rendezvous>) -> Self {
        self.rendezvous = rendezvous;
        self
    }

    /// Report appended messages and the final status to `sink`.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn mode(&self) -> Mode {
        self.modes.mode()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn rendezvous(&self) -> Arc<Rendezvous> {
        Arc::clone(&self.rendezvous)
    }

    /// Snapshot for export. `status` is `None` if `run` never returned.
    pub fn trajectory(&self, status: Option<&ExitStatus>) -> Trajectory<'_> {
        let submission = match status {
            Some(ExitStatus::Submitted(submission)) => Some(submission.as_str().to_string()),
            _ => None,
        };
        Trajectory {
            info: TrajectoryInfo {
                exit_status: status.map(|status| status.name().to_string()),
                submission,
                model_stats: ModelStats {
                    instance_cost: self.model.cost(),
                    api_calls: self.model.n_calls(),
                },
                mode: self.modes.mode(),
            },
            messages: &self.messages,
        }
    }

    /// Run until submission, a limit, or an error. Always returns a status.
    #[instrument(skip_all, fields(mode = %self.modes.mode()))]
    pub fn run(&mut self, task: &str) -> (ExitStatus, String) {
        self.task = task.to_string();
        self.messages.clear();
        if let Err(err) = self.seed() {
            let detail = format!("{err:#}");
            return self.finish(ExitStatus::Error(detail.clone()), detail);
        }

        loop {
            match self.step() {
                Ok(StepOutcome::Continue) => {}
                Ok(StepOutcome::Recoverable(kind, message)) => {
                    debug!(?kind, "recoverable condition");
                    self.add_message(Role::User, message);
                }
                Ok(StepOutcome::Terminal(status, message)) => return self.finish(status, message),
                Err(err) => {
                    warn!(err = %format!("{err:#}"), "step failed");
                    let detail = format!("{err:#}");
                    return self.finish(ExitStatus::Error(detail.clone()), detail);
                }
            }
        }
    }

    /// One model turn plus its observation.
    ///
    /// Errors are failures outside the loop's protocol; `run` turns them
    /// into a terminal `Error`.
    pub fn step(&mut self) -> Result<StepOutcome> {
        if self.limits.exceeded(self.model.n_calls(), self.model.cost()) {
            info!(n_calls = self.model.n_calls(), cost = self.model.cost(), "limits exceeded");
            return Ok(StepOutcome::Terminal(ExitStatus::LimitsExceeded, String::new()));
        }

        let response = match self.next_response()? {
            Response::Text(text) => text,
            Response::Interrupted => return self.interrupted(),
        };

        let action = match parse_action(&response, self.config.max_timeout) {
            Ok(action) => action,
            Err(err) => {
                debug!(blocks = err.blocks.len(), "format error");
                let vars = self.template_vars()?.with("actions", err.blocks);
                let message = self.render(
                    "format_error",
                    &self.config.format_error_template,
                    &vars,
                )?;
                return Ok(StepOutcome::Recoverable(RecoverableKind::FormatError, message));
            }
        };

        if self.needs_confirmation(&action) {
            match self.confirm(&action)? {
                Confirmation::Approved => {}
                Confirmation::Rejected(message) => {
                    return Ok(StepOutcome::Recoverable(RecoverableKind::UserRejected, message));
                }
                Confirmation::Interrupted => return self.interrupted(),
            }
        }

        self.execute(&action)
    }

    fn seed(&mut self) -> Result<()> {
        let vars = self.template_vars()?;
        let system = self.render("system", &self.config.system_template, &vars)?;
        self.add_message(Role::System, system);
        let instance = self.render("instance", &self.config.instance_template, &vars)?;
        self.add_message(Role::User, instance);
        Ok(())
    }

    fn next_response(&mut self) -> Result<Response> {
        if !self.modes.queries_model() {
            loop {
                match self.ask(InputRequest::new(InputKind::Command)) {
                    Decision::Text(command) if command.is_empty() => {}
                    Decision::Text(command) => {
                        let content = format!("```bash\n{command}\n```");
                        self.add_message(Role::Assistant, content.clone());
                        return Ok(Response::Text(content));
                    }
                    Decision::Interrupted => return Ok(Response::Interrupted),
                    // Switched away from human mode: the model answers this step.
                    Decision::Switched { .. } => break,
                    Decision::Closed => return Err(anyhow!("user input closed")),
                }
            }
        }

        // Only an interrupt raised during this query discards its response.
        if self.rendezvous.take_interrupt() {
            debug!("dropping interrupt raised while no query was running");
        }
        let response = self.model.query(&self.messages)?;
        if self.rendezvous.take_interrupt() {
            info!("interrupted during model query, discarding response");
            return Ok(Response::Interrupted);
        }
        let text = response.content.text();
        self.add_message(Role::Assistant, response.content);
        Ok(Response::Text(text))
    }

    fn needs_confirmation(&self, action: &Action) -> bool {
        self.modes.mode() == Mode::Confirm && !self.whitelist.matches(&action.text)
    }

    fn confirm(&mut self, action: &Action) -> Result<Confirmation> {
        let request = InputRequest::new(InputKind::Confirm {
            action: action.text.clone(),
        });
        match self.ask(request) {
            Decision::Text(text) if text.is_empty() => Ok(Confirmation::Approved),
            Decision::Text(text) => Ok(Confirmation::Rejected(format!(
                "Command not executed. The user rejected your command with the following message: {text}"
            ))),
            Decision::Switched { to: Mode::Human, .. } => Ok(Confirmation::Rejected(
                "Command not executed. Switching to human mode".to_string(),
            )),
            Decision::Switched { .. } => Ok(Confirmation::Approved),
            Decision::Interrupted => Ok(Confirmation::Interrupted),
            Decision::Closed => Err(anyhow!("user input closed")),
        }
    }

    fn execute(&mut self, action: &Action) -> Result<StepOutcome> {
        let request = ExecRequest {
            command: action.text.clone(),
            cwd: None,
            timeout: action.timeout_override.map(Duration::from_secs),
        };
        let output = match self.executor.execute(&request) {
            Ok(output) => output,
            Err(ExecError::Timeout { output, timeout }) => {
                info!(timeout_secs = timeout.as_secs(), "execution timed out");
                let vars = self
                    .template_vars()?
                    .with("action", action.text.clone())
                    .with("output", output);
                let message = self.render("timeout", &self.config.timeout_template, &vars)?;
                return Ok(StepOutcome::Recoverable(RecoverableKind::ExecutionTimeout, message));
            }
            Err(err) => return Err(err.into()),
        };

        if let Some(submission) = detect_submission(&output.output) {
            info!(empty = submission.is_empty(), "task submitted");
            let result = submission.as_str().to_string();
            return Ok(StepOutcome::Terminal(ExitStatus::Submitted(submission), result));
        }

        let vars = self
            .template_vars()?
            .with("output", output.output)
            .with("returncode", output.returncode);
        let observation = self.render(
            "action_observation",
            &self.config.action_observation_template,
            &vars,
        )?;
        self.add_message(Role::User, observation);
        Ok(StepOutcome::Continue)
    }

    /// Ask the human for a comment after an interrupt.
    fn interrupted(&mut self) -> Result<StepOutcome> {
        let comment = match self.ask(InputRequest::new(InputKind::Interrupted)) {
            Decision::Text(text) if !text.is_empty() => text,
            Decision::Closed => return Err(anyhow!("user input closed")),
            _ => DEFAULT_INTERRUPT_COMMENT.to_string(),
        };
        Ok(StepOutcome::Recoverable(
            RecoverableKind::UserInterrupted,
            format!("Interrupted by user: {comment}"),
        ))
    }

    fn ask(&mut self, request: InputRequest) -> Decision {
        let rendezvous = Arc::clone(&self.rendezvous);
        self.modes.decide(request, |request| rendezvous.request(request))
    }

    fn template_vars(&self) -> Result<TemplateVars> {
        Ok(TemplateVars::from_config(&self.config)?
            .with("task", self.task.clone())
            .with("mode", self.modes.mode().as_str())
            .with("n_calls", self.model.n_calls())
            .with("cost", self.model.cost()))
    }

    fn render(&self, name: &str, source: &str, vars: &TemplateVars) -> Result<String> {
        self.templates.render(name, source, vars)
    }

    fn add_message(&mut self, role: Role, content: impl Into<Content>) {
        let message = Message::new(role, content);
        if let Some(sink) = &self.sink {
            sink.emit(AgentEvent::MessageAdded {
                message: message.clone(),
                n_calls: self.model.n_calls(),
                cost: self.model.cost(),
            });
        }
        self.messages.push(message);
    }

    fn finish(&mut self, status: ExitStatus, result: String) -> (ExitStatus, String) {
        info!(
            exit_status = %status,
            n_calls = self.model.n_calls(),
            cost = self.model.cost(),
            "run finished"
        );
        self.add_message(Role::User, result.clone());
        if let Some(sink) = &self.sink {
            sink.emit(AgentEvent::Finished {
                exit_status: status.name().to_string(),
                result: result.clone(),
            });
        }
        (status, result)
    }
}
