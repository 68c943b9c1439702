//! Side-effecting collaborators of the agent loop.

pub mod config;
pub mod cost;
pub mod executor;
pub mod model;
pub mod process;
pub mod prompt;
pub mod trajectory;
