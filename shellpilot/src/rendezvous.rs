//! Single-slot handoff between the execution thread and the UI thread.
//!
//! The execution thread publishes one [`InputRequest`] and blocks; the UI
//! thread answers it with [`Rendezvous::complete`]. The slot is guarded by one
//! mutex and one condition variable. There is no timeout: if the UI never
//! answers, the execution thread waits forever.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::core::types::{InputKind, InputRequest, Reply};
use crate::events::{AgentEvent, EventSink};

#[derive(Debug, Default)]
struct Slot {
    pending: Option<InputRequest>,
    reply: Option<Reply>,
    closed: bool,
}

pub struct Rendezvous {
    slot: Mutex<Slot>,
    signal: Condvar,
    /// Held for the whole of `request` so at most one request is outstanding.
    gate: Mutex<()>,
    interrupted: AtomicBool,
    sink: Option<Arc<dyn EventSink>>,
}

impl Default for Rendezvous {
    fn default() -> Self {
        Self::new()
    }
}

impl Rendezvous {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::default()),
            signal: Condvar::new(),
            gate: Mutex::new(()),
            interrupted: AtomicBool::new(false),
            sink: None,
        }
    }

    /// Publish requests to `sink` as [`AgentEvent::InputRequested`].
    pub fn with_sink(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink: Some(sink),
            ..Self::new()
        }
    }

    /// Execution thread: publish `request` and block until the UI answers.
    pub fn request(&self, request: InputRequest) -> Reply {
        let _gate = self.gate.lock();
        {
            let mut slot = self.slot.lock();
            if slot.closed {
                return Reply::Closed;
            }
            slot.reply = None;
            slot.pending = Some(request.clone());
        }
        debug!(kind = ?request.kind, "waiting for user input");
        if let Some(sink) = &self.sink {
            sink.emit(AgentEvent::InputRequested(request));
        }

        let mut slot = self.slot.lock();
        loop {
            if let Some(reply) = slot.reply.take() {
                trace!(?reply, "user input received");
                return reply;
            }
            self.signal.wait(&mut slot);
        }
    }

    /// Execution thread: ask whether `action` may run.
    ///
    /// An empty text reply confirms; non-empty text is a rejection reason.
    pub fn request_confirmation(&self, action: &str) -> Reply {
        self.request(InputRequest::new(InputKind::Confirm {
            action: action.to_string(),
        }))
    }

    /// UI thread: answer the pending request.
    ///
    /// Returns `false` and changes nothing when no request is pending.
    pub fn complete(&self, text: impl Into<String>) -> bool {
        self.resolve(Reply::Text(text.into()))
    }

    /// UI thread: interrupt the agent.
    ///
    /// A pending request is answered with [`Reply::Interrupted`]; otherwise the
    /// interrupt is latched until [`Rendezvous::take_interrupt`] observes it.
    /// The agent clears the latch before each model query, so only an
    /// interrupt raised during that query discards its response.
    pub fn interrupt(&self) {
        if !self.resolve(Reply::Interrupted) {
            self.interrupted.store(true, Ordering::SeqCst);
        }
    }

    /// Execution thread: consume a latched interrupt.
    pub fn take_interrupt(&self) -> bool {
        self.interrupted.swap(false, Ordering::SeqCst)
    }

    /// UI thread: no more input will come. Pending and future requests get
    /// [`Reply::Closed`].
    pub fn close(&self) {
        let mut slot = self.slot.lock();
        slot.closed = true;
        if slot.pending.take().is_some() {
            slot.reply = Some(Reply::Closed);
            self.signal.notify_all();
        }
    }

    /// The request currently waiting for an answer, if any.
    pub fn pending(&self) -> Option<InputRequest> {
        self.slot.lock().pending.clone()
    }

    fn resolve(&self, reply: Reply) -> bool {
        let mut slot = self.slot.lock();
        if slot.pending.take().is_none() {
            return false;
        }
        slot.reply = Some(reply);
        self.signal.notify_all();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn wait_for_pending(rendezvous: &Rendezvous) -> InputRequest {
        for _ in 0..500 {
            if let Some(request) = rendezvous.pending() {
                return request;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("request never became pending");
    }

    #[test]
    fn complete_without_pending_is_a_noop() {
        let rendezvous = Rendezvous::new();
        assert!(!rendezvous.complete("stray"));
        assert_eq!(rendezvous.pending(), None);
    }

    #[test]
    fn request_returns_the_completed_text() {
        let rendezvous = Arc::new(Rendezvous::new());
        let waiter = {
            let rendezvous = Arc::clone(&rendezvous);
            thread::spawn(move || rendezvous.request_confirmation("rm -rf build"))
        };

        let pending = wait_for_pending(&rendezvous);
        assert_eq!(
            pending.kind,
            InputKind::Confirm {
                action: "rm -rf build".to_string()
            }
        );
        assert!(rendezvous.complete("not that"));
        assert!(!rendezvous.complete("duplicate"));

        assert_eq!(
            waiter.join().expect("join"),
            Reply::Text("not that".to_string())
        );
        assert_eq!(rendezvous.pending(), None);
    }

    #[test]
    fn stray_complete_does_not_answer_a_later_request() {
        let rendezvous = Arc::new(Rendezvous::new());
        assert!(!rendezvous.complete("early"));

        let waiter = {
            let rendezvous = Arc::clone(&rendezvous);
            thread::spawn(move || rendezvous.request_confirmation("ls"))
        };
        wait_for_pending(&rendezvous);
        assert!(rendezvous.complete(""));
        assert_eq!(waiter.join().expect("join"), Reply::Text(String::new()));
    }

    #[test]
    fn sink_is_notified_and_each_round_resolves_once() {
        let (tx, rx) = mpsc::channel();
        let rendezvous = Arc::new(Rendezvous::with_sink(Arc::new(tx)));
        let ui = {
            let rendezvous = Arc::clone(&rendezvous);
            thread::spawn(move || {
                let mut answered = 0;
                while let Ok(event) = rx.recv() {
                    if let AgentEvent::InputRequested(_) = event {
                        answered += 1;
                        assert!(rendezvous.complete(format!("answer {answered}")));
                        if answered == 3 {
                            break;
                        }
                    }
                }
                answered
            })
        };

        for round in 1..=3 {
            let reply = rendezvous.request(InputRequest::new(InputKind::Command));
            assert_eq!(reply, Reply::Text(format!("answer {round}")));
        }
        assert_eq!(ui.join().expect("join"), 3);
    }

    #[test]
    fn interrupt_answers_pending_request() {
        let rendezvous = Arc::new(Rendezvous::new());
        let waiter = {
            let rendezvous = Arc::clone(&rendezvous);
            thread::spawn(move || rendezvous.request(InputRequest::new(InputKind::Command)))
        };
        wait_for_pending(&rendezvous);
        rendezvous.interrupt();
        assert_eq!(waiter.join().expect("join"), Reply::Interrupted);
        assert!(!rendezvous.take_interrupt());
    }

    #[test]
    fn interrupt_without_pending_is_latched_once() {
        let rendezvous = Rendezvous::new();
        rendezvous.interrupt();
        assert!(rendezvous.take_interrupt());
        assert!(!rendezvous.take_interrupt());
    }

    #[test]
    fn close_releases_pending_and_future_requests() {
        let rendezvous = Arc::new(Rendezvous::new());
        let waiter = {
            let rendezvous = Arc::clone(&rendezvous);
            thread::spawn(move || rendezvous.request(InputRequest::new(InputKind::Command)))
        };
        wait_for_pending(&rendezvous);
        rendezvous.close();
        assert_eq!(waiter.join().expect("join"), Reply::Closed);
        assert_eq!(rendezvous.request_confirmation("ls"), Reply::Closed);
    }
}
