//! Line-based console UI.
//!
//! Runs on the main thread while the agent runs on its own. Agent events and
//! stdin lines arrive on one channel, so the UI reacts to whichever comes
//! first. A line answers the pending request if there is one; otherwise it
//! interrupts the agent, which notices after its current model query.

use std::io::{BufRead, Write};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::types::{InputKind, InputRequest, Message, Role};
use crate::events::{AgentEvent, EventSink};
use crate::rendezvous::Rendezvous;

#[derive(Debug, Clone, PartialEq)]
pub enum UiInput {
    Agent(AgentEvent),
    Line(String),
    Eof,
    /// The agent thread ended, normally or by unwinding.
    AgentExited,
}

/// Forwards agent events into the UI channel.
pub struct ConsoleSink(Sender<UiInput>);

impl ConsoleSink {
    pub fn new(tx: Sender<UiInput>) -> Self {
        Self(tx)
    }
}

impl EventSink for ConsoleSink {
    fn emit(&self, event: AgentEvent) {
        let _ = self.0.send(UiInput::Agent(event));
    }
}

/// Sends [`UiInput::AgentExited`] when dropped.
///
/// Move it into the agent thread so the UI stops even if that thread panics
/// while the line reader still holds a sender.
pub struct ExitNotice(Sender<UiInput>);

impl ExitNotice {
    pub fn new(tx: Sender<UiInput>) -> Self {
        Self(tx)
    }
}

impl Drop for ExitNotice {
    fn drop(&mut self) {
        let _ = self.0.send(UiInput::AgentExited);
    }
}

/// Read lines from `input` into the UI channel until EOF.
///
/// The thread is detached in practice: a blocking read cannot be cancelled,
/// and it ends with the process.
pub fn spawn_line_reader<R>(input: R, tx: Sender<UiInput>) -> JoinHandle<()>
where
    R: BufRead + Send + 'static,
{
    thread::spawn(move || {
        for line in input.lines() {
            let Ok(line) = line else { break };
            if tx.send(UiInput::Line(line)).is_err() {
                return;
            }
        }
        let _ = tx.send(UiInput::Eof);
    })
}

/// How the run ended, as reported by the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finished {
    pub exit_status: String,
    pub result: String,
}

pub struct ConsoleUi<W> {
    rendezvous: Arc<Rendezvous>,
    out: W,
}

impl<W: Write> ConsoleUi<W> {
    pub fn new(rendezvous: Arc<Rendezvous>, out: W) -> Self {
        Self { rendezvous, out }
    }

    /// Process inputs until the agent finishes.
    ///
    /// Returns `None` if the agent thread exited without reporting a result.
    pub fn run(&mut self, rx: &Receiver<UiInput>) -> Result<Option<Finished>> {
        while let Ok(input) = rx.recv() {
            match input {
                UiInput::Agent(AgentEvent::MessageAdded {
                    message,
                    n_calls,
                    cost,
                }) => self.print_message(&message, n_calls, cost)?,
                UiInput::Agent(AgentEvent::InputRequested(request)) => {
                    self.print_request(&request)?;
                }
                UiInput::Agent(AgentEvent::Finished {
                    exit_status,
                    result,
                }) => {
                    writeln!(self.out, "\n=== {exit_status} ===")?;
                    if !result.is_empty() {
                        writeln!(self.out, "{result}")?;
                    }
                    self.out.flush().context("flush console")?;
                    return Ok(Some(Finished {
                        exit_status,
                        result,
                    }));
                }
                UiInput::Line(line) => {
                    if !self.rendezvous.complete(line) {
                        debug!("input while agent is busy, interrupting");
                        writeln!(self.out, "(interrupt requested)")?;
                        self.rendezvous.interrupt();
                    }
                }
                UiInput::Eof => {
                    debug!("stdin closed");
                    self.rendezvous.close();
                }
                UiInput::AgentExited => {
                    debug!("agent thread exited before finishing");
                    return Ok(None);
                }
            }
        }
        Ok(None)
    }

    fn print_message(&mut self, message: &Message, n_calls: u64, cost: f64) -> Result<()> {
        let header = match message.role {
            Role::Assistant => format!("assistant (step {n_calls}, ${cost:.2})"),
            role => role.as_str().to_string(),
        };
        writeln!(self.out, "\n--- {header} ---\n{}", message.text())?;
        self.out.flush().context("flush console")
    }

    fn print_request(&mut self, request: &InputRequest) -> Result<()> {
        if let Some(notice) = &request.notice {
            writeln!(self.out, "{notice}")?;
        }
        if let InputKind::Confirm { action } = &request.kind {
            writeln!(self.out, "\n$ {action}")?;
        }
        write!(self.out, "{}", request.prompt())?;
        self.out.flush().context("flush console")
    }
}
