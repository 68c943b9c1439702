//! Stable exit codes for `shellpilot` commands.

use crate::core::types::ExitStatus;

/// The task was submitted, or a non-run command succeeded.
pub const SUBMITTED: i32 = 0;
/// The run ended in `Error`, or config/arguments were invalid.
pub const ERROR: i32 = 1;
/// The run hit its step or cost limit.
pub const LIMITS_EXCEEDED: i32 = 2;

pub fn for_status(status: &ExitStatus) -> i32 {
    match status {
        ExitStatus::Submitted(_) => SUBMITTED,
        ExitStatus::LimitsExceeded => LIMITS_EXCEEDED,
        ExitStatus::Error(_) => ERROR,
    }
}
