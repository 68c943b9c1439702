//! Completion sentinel detection.

use crate::core::types::Submission;

/// First output line that ends the task.
pub const SUBMIT_SENTINEL: &str = "COMPLETE_TASK_AND_SUBMIT_FINAL_OUTPUT";

/// Return the submission if the first non-blank line of `output` is the sentinel.
///
/// Lines after the sentinel are the submission text, joined with `\n`.
pub fn detect_submission(output: &str) -> Option<Submission> {
    let mut lines = output.trim_start().lines();
    let first = lines.next()?;
    if first.trim() != SUBMIT_SENTINEL {
        return None;
    }
    let text = lines.collect::<Vec<_>>().join("\n");
    if text.is_empty() {
        Some(Submission::Empty)
    } else {
        Some(Submission::Text(text))
    }
}
