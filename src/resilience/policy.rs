use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What to do when a block fails spectral processing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Drop the block, count it, and keep acquiring
    #[default]
    SkipBlock,

    /// Stop the pipeline in the Faulted state
    Fault,
}

/// How to retry a source that timed out or failed a read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Fault on the first failure
    Never,

    /// Retry straight away
    Immediate { max_attempts: u32 },

    /// Exponential backoff: base, 2*base, 4*base, ... capped at max_ms
    Exponential {
        base_ms: u64,
        max_ms: u64,
        max_attempts: u32,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::Exponential {
            base_ms: 10,
            max_ms: 1_000,
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::Never => 0,
            Self::Immediate { max_attempts } => *max_attempts,
            Self::Exponential { max_attempts, .. } => *max_attempts,
        }
    }

    /// Delay before retry number `attempt` (1-based), or None once exhausted
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts() {
            return None;
        }
        match self {
            Self::Never => None,
            Self::Immediate { .. } => Some(Duration::ZERO),
            Self::Exponential { base_ms, max_ms, .. } => {
                let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
                Some(Duration::from_millis(base_ms.saturating_mul(factor).min(*max_ms)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_doubles_and_caps() {
        let policy = RetryPolicy::Exponential {
            base_ms: 10,
            max_ms: 50,
            max_attempts: 4,
        };
        assert_eq!(policy.delay_for(1), Some(Duration::from_millis(10)));
        assert_eq!(policy.delay_for(2), Some(Duration::from_millis(20)));
        assert_eq!(policy.delay_for(3), Some(Duration::from_millis(40)));
        assert_eq!(policy.delay_for(4), Some(Duration::from_millis(50)));
        assert_eq!(policy.delay_for(5), None);
    }

    #[test]
    fn test_never_gives_up_at_once() {
        assert_eq!(RetryPolicy::Never.delay_for(1), None);
        assert_eq!(
            RetryPolicy::Immediate { max_attempts: 2 }.delay_for(2),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_policies_from_json() {
        let retry: RetryPolicy =
            serde_json::from_str(r#"{"type": "immediate", "max_attempts": 3}"#).unwrap();
        assert_eq!(retry, RetryPolicy::Immediate { max_attempts: 3 });

        let policy: ErrorPolicy = serde_json::from_str(r#""fault""#).unwrap();
        assert_eq!(policy, ErrorPolicy::Fault);
    }
}
