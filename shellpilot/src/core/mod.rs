//! Deterministic, pure logic for the agent loop.
//!
//! Core modules are free of I/O. They parse model output, detect completion,
//! check limits and track modes, and are tested in isolation.

pub mod action;
pub mod limits;
pub mod mode;
pub mod submission;
pub mod types;
