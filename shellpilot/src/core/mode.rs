//! Interaction modes and the decision points where they change.
//!
//! The controller never talks to a terminal. Callers pass an `ask` closure
//! that delivers one [`InputRequest`] to the human and returns their
//! [`Reply`]; meta-commands are consumed here and never reach the loop.

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::types::{InputRequest, Reply};

/// Who decides what runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Commands come from the human; the model is not queried.
    Human,
    /// Model commands outside the whitelist need confirmation.
    #[default]
    Confirm,
    /// Model commands run immediately.
    Yolo,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Human => "human",
            Mode::Confirm => "confirm",
            Mode::Yolo => "yolo",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "human" => Ok(Mode::Human),
            "confirm" => Ok(Mode::Confirm),
            "yolo" => Ok(Mode::Yolo),
            other => Err(anyhow!(
                "unknown mode '{other}' (expected human, confirm or yolo)"
            )),
        }
    }
}

/// Input that steers the session instead of answering the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaCommand {
    Switch(Mode),
    Help,
}

impl MetaCommand {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim() {
            "/u" => Some(MetaCommand::Switch(Mode::Human)),
            "/c" => Some(MetaCommand::Switch(Mode::Confirm)),
            "/y" => Some(MetaCommand::Switch(Mode::Yolo)),
            "/h" => Some(MetaCommand::Help),
            _ => None,
        }
    }
}

/// A switch to the mode that is already active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlreadyInMode(pub Mode);

impl fmt::Display for AlreadyInMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Already in {} mode.", self.0)
    }
}

impl std::error::Error for AlreadyInMode {}

/// Outcome of a decision point once meta-commands are consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Free text (trimmed, possibly empty).
    Text(String),
    /// The mode changed; the prompt is considered answered.
    Switched { from: Mode, to: Mode },
    Interrupted,
    Closed,
}

/// Tracks the active [`Mode`].
#[derive(Debug, Clone)]
pub struct ModeController {
    mode: Mode,
}

impl ModeController {
    pub fn new(mode: Mode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Change mode, returning the previous one.
    pub fn switch(&mut self, to: Mode) -> Result<Mode, AlreadyInMode> {
        if self.mode == to {
            return Err(AlreadyInMode(to));
        }
        let from = std::mem::replace(&mut self.mode, to);
        info!(%from, %to, "mode switched");
        Ok(from)
    }

    pub fn queries_model(&self) -> bool {
        self.mode != Mode::Human
    }

    pub fn help_text(&self) -> String {
        format!(
            "Current mode: {}\n/u to switch to human mode\n/c to switch to confirm mode\n/y to switch to yolo mode\n/h to show this help",
            self.mode
        )
    }

    /// Run one decision point.
    ///
    /// Help and switches to the active mode re-prompt with a notice; any other
    /// switch answers the prompt.
    pub fn decide<F>(&mut self, request: InputRequest, mut ask: F) -> Decision
    where
        F: FnMut(InputRequest) -> Reply,
    {
        let mut request = request;
        loop {
            let text = match ask(request.clone()) {
                Reply::Text(text) => text,
                Reply::Interrupted => return Decision::Interrupted,
                Reply::Closed => return Decision::Closed,
            };
            match MetaCommand::parse(&text) {
                Some(MetaCommand::Help) => {
                    request = request.with_notice(self.help_text());
                }
                Some(MetaCommand::Switch(to)) => match self.switch(to) {
                    Ok(from) => return Decision::Switched { from, to },
                    Err(already) => {
                        request = request.with_notice(already.to_string());
                    }
                },
                None => return Decision::Text(text.trim().to_string()),
            }
        }
    }
}
