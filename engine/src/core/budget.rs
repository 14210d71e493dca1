//! Iteration and wall-clock budgets for the agent loop.

use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};

/// Which budget ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetStop {
    Iterations { max: u32 },
    Duration { max: Duration },
}

/// Task-level limits checked once per iteration.
#[derive(Debug, Clone)]
pub struct Budget {
    started: Instant,
    max_iterations: u32,
    max_duration: Duration,
}

impl Budget {
    pub fn new(max_iterations: u32, max_duration: Duration) -> Self {
        Self {
            started: Instant::now(),
            max_iterations,
            max_duration,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.started + self.max_duration
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Return the exhausted budget, if any, for the given iteration count.
    pub fn exhausted(&self, iterations: u32) -> Option<BudgetStop> {
        if iterations >= self.max_iterations {
            return Some(BudgetStop::Iterations {
                max: self.max_iterations,
            });
        }
        if self.elapsed() >= self.max_duration {
            return Some(BudgetStop::Duration {
                max: self.max_duration,
            });
        }
        None
    }

    /// Clamp a per-call timeout so it never outlives the task deadline.
    pub fn clamp(&self, timeout: Duration) -> Result<Duration> {
        Ok(remaining_budget(self.deadline())?.min(timeout))
    }
}

/// Return the remaining time budget until the provided deadline.
pub fn remaining_budget(deadline: Instant) -> Result<Duration> {
    let remaining = deadline
        .checked_duration_since(Instant::now())
        .unwrap_or(Duration::from_secs(0));
    if remaining.is_zero() {
        return Err(anyhow!("task time budget exhausted"));
    }
    Ok(remaining)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iteration_limit_is_inclusive() {
        let budget = Budget::new(3, Duration::from_secs(60));
        assert_eq!(budget.exhausted(2), None);
        assert_eq!(budget.exhausted(3), Some(BudgetStop::Iterations { max: 3 }));
    }

    #[test]
    fn zero_duration_is_exhausted_immediately() {
        let budget = Budget::new(10, Duration::ZERO);
        assert_eq!(
            budget.exhausted(0),
            Some(BudgetStop::Duration {
                max: Duration::ZERO
            })
        );
        assert!(budget.clamp(Duration::from_secs(5)).is_err());
    }

    #[test]
    fn clamp_never_exceeds_requested_timeout() {
        let budget = Budget::new(10, Duration::from_secs(3600));
        let clamped = budget.clamp(Duration::from_secs(5)).expect("clamp");
        assert_eq!(clamped, Duration::from_secs(5));
    }
}
