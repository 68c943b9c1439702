//! Per-run step and cost limits.

/// Limits checked before each model query. Zero disables a limit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunLimits {
    pub step_limit: u64,
    pub cost_limit: f64,
}

impl RunLimits {
    /// True when the next query must not be issued.
    pub fn exceeded(&self, n_calls: u64, cost: f64) -> bool {
        (self.step_limit > 0 && n_calls >= self.step_limit)
            || (self.cost_limit > 0.0 && cost >= self.cost_limit)
    }
}
