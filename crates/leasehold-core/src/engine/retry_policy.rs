//! Retry budget and backoff per phase and classification.

use std::time::Duration;

use super::{
    classifier::{Classification, ErrorClass, RecoverAction},
    state_machine::Phase,
};

/// Decision returned by [`RetryPolicy::should_retry`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryDecision {
    pub retry: bool,
    pub backoff_seconds: f64,
}

impl RetryDecision {
    /// Backoff as a sleepable duration.
    #[must_use]
    pub fn backoff(&self) -> Duration {
        Duration::from_secs_f64(self.backoff_seconds.max(0.0))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RetryPolicy;

impl RetryPolicy {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Total attempts allowed for `phase` given `classification`.
    #[must_use]
    pub const fn max_attempts(&self, phase: Phase, classification: &Classification) -> u32 {
        if !classification.retryable {
            return 1;
        }
        match classification.error_class {
            ErrorClass::ExecutionContextDestroyed | ErrorClass::IxbrowserBusy => 4,
            ErrorClass::PageClosedExternal => 3,
            _ if matches!(phase, Phase::Publish) => 4,
            _ => 3,
        }
    }

    /// Seconds to wait before retry `attempt` (1-based).
    #[must_use]
    pub fn backoff_seconds(&self, action: RecoverAction, attempt: u32) -> f64 {
        let idx = f64::from(attempt.max(1));
        match action {
            RecoverAction::SleepRetry => (0.8 * 2f64.powf(idx - 1.0)).min(8.0),
            RecoverAction::PageRecreate => (0.4 * idx).min(4.0),
            RecoverAction::SessionReconnect => (0.8 * idx).min(6.0),
            RecoverAction::Abort => 0.0,
        }
    }

    /// Retry iff `attempt < max_attempts`.
    #[must_use]
    pub fn should_retry(
        &self,
        phase: Phase,
        classification: &Classification,
        attempt: u32,
    ) -> RetryDecision {
        if attempt >= self.max_attempts(phase, classification) {
            return RetryDecision {
                retry: false,
                backoff_seconds: 0.0,
            };
        }
        RetryDecision {
            retry: true,
            backoff_seconds: self.backoff_seconds(classification.recover_action, attempt),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::engine::classifier::ErrorClassifier;

    fn classification(text: &str) -> Classification {
        ErrorClassifier::new().classify_text(text)
    }

    #[test]
    fn test_execution_context_destroyed_retries_in_main_phases() {
        let policy = RetryPolicy::new();
        let c = classification("Execution context was destroyed");
        for phase in [Phase::Submit, Phase::Progress, Phase::Publish] {
            let max = policy.max_attempts(phase, &c);
            assert_eq!(max, 4);
            for attempt in 1..max {
                assert!(policy.should_retry(phase, &c, attempt).retry, "{phase} {attempt}");
            }
            let last = policy.should_retry(phase, &c, max);
            assert!(!last.retry);
            assert!(last.backoff_seconds.abs() < f64::EPSILON);
        }
    }

    #[test]
    fn test_max_attempts_table() {
        let policy = RetryPolicy::new();
        assert_eq!(
            policy.max_attempts(Phase::Submit, &classification("Target closed")),
            3
        );
        assert_eq!(
            policy.max_attempts(Phase::Submit, &classification("server busy")),
            4
        );
        assert_eq!(
            policy.max_attempts(Phase::Publish, &classification("net::ERR_ABORTED")),
            4
        );
        assert_eq!(
            policy.max_attempts(Phase::Submit, &classification("net::ERR_ABORTED")),
            3
        );
        assert_eq!(
            policy.max_attempts(Phase::Publish, &classification("401")),
            1
        );
    }

    #[test]
    fn test_backoff_values() {
        let policy = RetryPolicy::new();
        let close = |a: f64, b: f64| (a - b).abs() < 1e-9;
        assert!(close(policy.backoff_seconds(RecoverAction::SleepRetry, 1), 0.8));
        assert!(close(policy.backoff_seconds(RecoverAction::SleepRetry, 3), 3.2));
        assert!(close(policy.backoff_seconds(RecoverAction::SleepRetry, 10), 8.0));
        assert!(close(policy.backoff_seconds(RecoverAction::PageRecreate, 2), 0.8));
        assert!(close(policy.backoff_seconds(RecoverAction::PageRecreate, 20), 4.0));
        assert!(close(policy.backoff_seconds(RecoverAction::SessionReconnect, 2), 1.6));
        assert!(close(policy.backoff_seconds(RecoverAction::SessionReconnect, 0), 0.8));
        assert!(close(policy.backoff_seconds(RecoverAction::Abort, 3), 0.0));
    }

    proptest! {
        #[test]
        fn prop_backoff_is_bounded(attempt in 0u32..64) {
            let policy = RetryPolicy::new();
            prop_assert!(policy.backoff_seconds(RecoverAction::SleepRetry, attempt) <= 8.0);
            prop_assert!(policy.backoff_seconds(RecoverAction::PageRecreate, attempt) <= 4.0);
            prop_assert!(policy.backoff_seconds(RecoverAction::SessionReconnect, attempt) <= 6.0);
        }

        #[test]
        fn prop_non_retryable_never_retries(attempt in 0u32..8) {
            let policy = RetryPolicy::new();
            let c = classification("Unauthorized");
            prop_assert!(!policy.should_retry(Phase::Progress, &c, attempt.max(1)).retry);
        }
    }
}
