//! Fixed-delay bounded retry policy.
//!
//! Stateless: the decision is a pure function of the attempt number and the
//! policy configuration. The delay is deliberately fixed rather than
//! exponential, and deliberately error-agnostic -- every activity failure is
//! treated as transient until the attempt budget runs out.

use std::time::Duration;

use docflow_types::config::RetrySettings;

// ---------------------------------------------------------------------------
// RetryDecision
// ---------------------------------------------------------------------------

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Suspend the job for `after`, then re-attempt the stage.
    Retry { after: Duration },
    /// The attempt budget is exhausted; the job fails with the last error.
    GiveUp,
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Bounded retry with a fixed delay between attempts.
///
/// `max_attempts` counts the first try: the default of 3 means one try plus
/// two retries. A distinct policy instance can be applied per stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    initial_delay: Duration,
    max_attempts: u32,
}

impl RetryPolicy {
    /// Create a policy. `max_attempts` is clamped to at least 1.
    pub fn new(initial_delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial_delay,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Build a policy from configuration settings.
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(
            Duration::from_millis(settings.initial_delay_ms),
            settings.max_attempts,
        )
    }

    /// Total attempts allowed, including the first try.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decide what happens after attempt number `attempt` (1-based) failed.
    pub fn next_action(&self, attempt: u32) -> RetryDecision {
        if attempt < self.max_attempts {
            RetryDecision::Retry {
                after: self.initial_delay,
            }
        } else {
            RetryDecision::GiveUp
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retries_below_max() {
        let policy = RetryPolicy::new(Duration::from_millis(50), 3);
        assert_eq!(
            policy.next_action(1),
            RetryDecision::Retry {
                after: Duration::from_millis(50)
            }
        );
        assert_eq!(
            policy.next_action(2),
            RetryDecision::Retry {
                after: Duration::from_millis(50)
            }
        );
    }

    #[test]
    fn test_gives_up_at_max() {
        let policy = RetryPolicy::new(Duration::from_millis(50), 3);
        assert_eq!(policy.next_action(3), RetryDecision::GiveUp);
        assert_eq!(policy.next_action(4), RetryDecision::GiveUp);
    }

    #[test]
    fn test_delay_is_fixed_across_attempts() {
        let policy = RetryPolicy::new(Duration::from_secs(5), 10);
        for attempt in 1..10 {
            assert_eq!(
                policy.next_action(attempt),
                RetryDecision::Retry {
                    after: Duration::from_secs(5)
                }
            );
        }
    }

    #[test]
    fn test_single_attempt_never_retries() {
        let policy = RetryPolicy::new(Duration::from_secs(1), 1);
        assert_eq!(policy.next_action(1), RetryDecision::GiveUp);
    }

    #[test]
    fn test_zero_max_attempts_clamped_to_one() {
        let policy = RetryPolicy::new(Duration::from_secs(1), 0);
        assert_eq!(policy.max_attempts(), 1);
    }

    #[test]
    fn test_default_matches_settings_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(
            policy.next_action(1),
            RetryDecision::Retry {
                after: Duration::from_secs(5)
            }
        );
    }
}
