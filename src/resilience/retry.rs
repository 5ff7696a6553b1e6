use super::RetryPolicy;
use std::time::Duration;

/// Counts consecutive source failures against a RetryPolicy
#[derive(Debug, Clone)]
pub struct RetryTracker {
    policy: RetryPolicy,
    consecutive: u32,
    total: u64,
}

impl RetryTracker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            consecutive: 0,
            total: 0,
        }
    }

    /// Record a failure. Returns the delay before the next attempt, or None
    /// when the policy is exhausted.
    pub fn on_failure(&mut self) -> Option<Duration> {
        self.consecutive = self.consecutive.saturating_add(1);
        self.total += 1;
        self.policy.delay_for(self.consecutive)
    }

    pub fn on_success(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn total_failures(&self) -> u64 {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_resets_the_run() {
        let mut tracker = RetryTracker::new(RetryPolicy::Immediate { max_attempts: 2 });

        assert!(tracker.on_failure().is_some());
        assert!(tracker.on_failure().is_some());
        tracker.on_success();
        assert!(tracker.on_failure().is_some());
        assert!(tracker.on_failure().is_some());
        assert!(tracker.on_failure().is_none());

        assert_eq!(tracker.consecutive(), 3);
        assert_eq!(tracker.total_failures(), 5);
    }
}
