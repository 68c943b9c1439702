//! Interactive shell agent.
//!
//! A language model proposes one shell command per turn; the agent runs it
//! and feeds the output back until the model submits a result or a limit is
//! hit. A human can watch, confirm, reject, interrupt, or take over.
//!
//! - **[`core`]**: Pure logic (action parsing, submission detection, limits,
//!   modes). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting collaborators (config, processes, model,
//!   executor, trajectory export). Behind traits where tests need fakes.
//!
//! [`agent`] drives the loop on the execution thread. [`rendezvous`] and
//! [`events`] connect it to the [`ui`] thread.

pub mod agent;
pub mod core;
pub mod events;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod rendezvous;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod ui;
