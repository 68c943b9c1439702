//! Process-wide model usage tracker.
//!
//! Shared by reference between every model in the process so that several
//! agents running at once respect one aggregate cap.

use parking_lot::Mutex;
use thiserror::Error;
use tracing::warn;

use crate::io::config::GlobalLimitsConfig;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LimitError {
    #[error("global cost/call limit exceeded: ${cost:.4} / {calls} calls")]
    GlobalLimitExceeded { cost: f64, calls: u64 },
}

#[derive(Debug, Default)]
struct Totals {
    cost: f64,
    calls: u64,
}

/// Aggregate cost and call counter with optional caps. Zero disables a cap.
#[derive(Debug, Default)]
pub struct CostTracker {
    totals: Mutex<Totals>,
    cost_limit: f64,
    call_limit: u64,
}

impl CostTracker {
    pub fn new(cost_limit: f64, call_limit: u64) -> Self {
        Self {
            totals: Mutex::new(Totals::default()),
            cost_limit,
            call_limit,
        }
    }

    pub fn from_config(config: &GlobalLimitsConfig) -> Self {
        Self::new(config.global_cost_limit, config.global_call_limit)
    }

    /// Record one call. Fails once the totals pass a cap; the call is still counted.
    pub fn add(&self, cost: f64) -> Result<(), LimitError> {
        let mut totals = self.totals.lock();
        totals.cost += cost;
        totals.calls += 1;
        let over_cost = self.cost_limit > 0.0 && totals.cost > self.cost_limit;
        let over_calls = self.call_limit > 0 && totals.calls > self.call_limit;
        if over_cost || over_calls {
            warn!(cost = totals.cost, calls = totals.calls, "global limit exceeded");
            return Err(LimitError::GlobalLimitExceeded {
                cost: totals.cost,
                calls: totals.calls,
            });
        }
        Ok(())
    }

    pub fn cost(&self) -> f64 {
        self.totals.lock().cost
    }

    pub fn n_calls(&self) -> u64 {
        self.totals.lock().calls
    }
}
