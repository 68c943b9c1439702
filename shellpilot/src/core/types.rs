//! Shared types for the agent control loop.
//!
//! These types define the contract between the loop, its collaborators, the
//! interactive UI, and trajectory export. They carry no I/O.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Author of a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A structured content part, as some model backends return them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Message payload: plain text or a list of blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Content {
    /// Flatten to text. Blocks without text are skipped.
    pub fn text(&self) -> String {
        match self {
            Content::Text(text) => text.clone(),
            Content::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| block.text.as_deref())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Content::Text(text)
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Content::Text(text.to_string())
    }
}

/// One entry of the message history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Content,
}

impl Message {
    pub fn new(role: Role, content: impl Into<Content>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn text(&self) -> String {
        self.content.text()
    }
}

/// A single shell command extracted from a model response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub text: String,
    /// Seconds requested by an inline `# timeout: N` directive, already capped.
    pub timeout_override: Option<u64>,
}

/// Text submitted after the completion sentinel.
///
/// `Empty` marks a sentinel with nothing after it, which is still a
/// submission and must not be confused with a run that produced no output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Text(String),
    Empty,
}

impl Submission {
    pub fn as_str(&self) -> &str {
        match self {
            Submission::Text(text) => text,
            Submission::Empty => "",
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Submission::Empty)
    }
}

/// Terminal classification returned by `Agent::run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    Submitted(Submission),
    LimitsExceeded,
    Error(String),
}

impl ExitStatus {
    /// Stable name used in trajectories and logs.
    pub fn name(&self) -> &'static str {
        match self {
            ExitStatus::Submitted(_) => "Submitted",
            ExitStatus::LimitsExceeded => "LimitsExceeded",
            ExitStatus::Error(_) => "Error",
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Conditions appended to history without ending the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverableKind {
    FormatError,
    ExecutionTimeout,
    UserRejected,
    UserInterrupted,
}

/// Result of a single `step()`, matched by the run loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The observation was appended; query again.
    Continue,
    /// Append the message as a `user` entry and query again.
    Recoverable(RecoverableKind, String),
    /// Stop with this status; the message becomes the result text.
    Terminal(ExitStatus, String),
}

/// What the execution thread is waiting on a human for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputKind {
    /// Human mode: the next command to run.
    Command,
    /// Confirm mode: approve (empty reply) or reject (reason) this action.
    Confirm { action: String },
    /// After an interrupt: an optional comment for the model.
    Interrupted,
}

/// A prompt published to the UI thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRequest {
    pub kind: InputKind,
    /// Shown above the prompt (help text, "already in mode" notices).
    pub notice: Option<String>,
}

impl InputRequest {
    pub fn new(kind: InputKind) -> Self {
        Self { kind, notice: None }
    }

    pub fn with_notice(mut self, notice: impl Into<String>) -> Self {
        self.notice = Some(notice.into());
        self
    }

    /// Prompt line for this request.
    pub fn prompt(&self) -> &'static str {
        match self.kind {
            InputKind::Command => "> ",
            InputKind::Confirm { .. } => {
                "Execute? Enter to confirm, /h for help, or type a rejection reason\n> "
            }
            InputKind::Interrupted => {
                "Interrupted. /h for help, or continue with a comment for the model\n> "
            }
        }
    }
}

/// Answer delivered by the UI thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    /// The user interrupted while the prompt was open.
    Interrupted,
    /// The UI can no longer supply input.
    Closed,
}
