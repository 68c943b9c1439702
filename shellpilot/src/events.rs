//! Notifications from the execution thread to a UI.
//!
//! The UI never reads agent state directly; it keeps its own copy built from
//! these events.

use std::sync::mpsc;

use crate::core::types::{InputRequest, Message};

#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    MessageAdded {
        message: Message,
        n_calls: u64,
        cost: f64,
    },
    /// A decision point is waiting on [`crate::rendezvous::Rendezvous::complete`].
    InputRequested(InputRequest),
    Finished {
        exit_status: String,
        result: String,
    },
}

/// Receiver side of agent notifications. Must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: AgentEvent);
}

impl EventSink for mpsc::Sender<AgentEvent> {
    fn emit(&self, event: AgentEvent) {
        // A UI that went away is not the agent's problem.
        let _ = self.send(event);
    }
}
