//! Retry policy engine: backoff computation and retry decisions.
//!
//! Stateless, like the rest of the planning helpers: all logic lives in
//! associated functions that take the policy as a parameter. Retries replay
//! the same step input, so idempotency is the step implementation's concern.

use std::time::Duration;

use tessera_types::unit::{BackoffStrategy, RetryPolicy, StepDefinition, Unit};

/// Compute the wait before retry number `attempt` (1-indexed over retries;
/// attempt 1 is the first retry after the initial try).
///
/// - fixed: `initial_delay`
/// - linear: `initial_delay * attempt`
/// - exponential: `initial_delay * 2^(attempt - 1)`
///
/// Every strategy is capped at `max_delay`. An `attempt` of 0 is treated as 1.
pub fn compute_delay(
    attempt: u32,
    strategy: BackoffStrategy,
    initial_delay_ms: u64,
    max_delay_ms: u64,
) -> u64 {
    let attempt = attempt.max(1);
    let raw = match strategy {
        BackoffStrategy::Fixed => initial_delay_ms,
        BackoffStrategy::Linear => initial_delay_ms.saturating_mul(u64::from(attempt)),
        BackoffStrategy::Exponential => {
            let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
            initial_delay_ms.saturating_mul(factor)
        }
    };
    raw.min(max_delay_ms)
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then make retry number `attempt`.
    Retry { attempt: u32, delay: Duration },
    /// Budget exhausted.
    GiveUp,
}

/// Stateless retry handler for step failures.
pub struct RetryHandler;

impl RetryHandler {
    /// Determine whether another attempt is allowed.
    ///
    /// `attempts_made` counts every try so far, including the first.
    pub fn should_retry(policy: &RetryPolicy, attempts_made: u32) -> bool {
        attempts_made < policy.max_attempts.max(1)
    }

    /// Decide the next move after `attempts_made` failed tries.
    pub fn decide(policy: &RetryPolicy, attempts_made: u32) -> RetryDecision {
        if !Self::should_retry(policy, attempts_made) {
            return RetryDecision::GiveUp;
        }
        // The n-th try that failed is followed by retry number n.
        let attempt = attempts_made;
        let delay = compute_delay(
            attempt,
            policy.strategy,
            policy.initial_delay_ms,
            policy.max_delay_ms,
        );
        RetryDecision::Retry {
            attempt,
            delay: Duration::from_millis(delay),
        }
    }

    /// Resolve the effective policy: step, then unit, then engine default.
    pub fn resolve_policy<'a>(
        step: &'a StepDefinition,
        unit: &'a Unit,
        default: &'a RetryPolicy,
    ) -> &'a RetryPolicy {
        step.retry
            .as_ref()
            .or(unit.retry.as_ref())
            .unwrap_or(default)
    }

    /// Idempotency key for one attempt. Stable across resumes of the same run.
    pub fn idempotency_key(
        execution_id: &uuid::Uuid,
        unit_id: &str,
        step_index: usize,
        attempt: u32,
    ) -> String {
        format!("{execution_id}-{unit_id}-{step_index}-{attempt}")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_types::unit::StepAction;

    fn policy(max_attempts: u32, strategy: BackoffStrategy) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            strategy,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }

    // -------------------------------------------------------------------
    // compute_delay
    // -------------------------------------------------------------------

    #[test]
    fn test_exponential_delays() {
        assert_eq!(compute_delay(1, BackoffStrategy::Exponential, 1000, 30000), 1000);
        assert_eq!(compute_delay(2, BackoffStrategy::Exponential, 1000, 30000), 2000);
        assert_eq!(compute_delay(3, BackoffStrategy::Exponential, 1000, 30000), 4000);
    }

    #[test]
    fn test_exponential_capped() {
        assert_eq!(compute_delay(10, BackoffStrategy::Exponential, 1000, 30000), 30000);
        assert_eq!(compute_delay(200, BackoffStrategy::Exponential, 1000, 30000), 30000);
    }

    #[test]
    fn test_linear_and_fixed() {
        assert_eq!(compute_delay(3, BackoffStrategy::Linear, 500, 30000), 1500);
        assert_eq!(compute_delay(100, BackoffStrategy::Linear, 500, 30000), 30000);
        assert_eq!(compute_delay(7, BackoffStrategy::Fixed, 750, 30000), 750);
        assert_eq!(compute_delay(1, BackoffStrategy::Fixed, 50_000, 30000), 30000);
    }

    #[test]
    fn test_attempt_zero_treated_as_first_retry() {
        assert_eq!(compute_delay(0, BackoffStrategy::Exponential, 1000, 30000), 1000);
        assert_eq!(compute_delay(0, BackoffStrategy::Linear, 1000, 30000), 1000);
    }

    // -------------------------------------------------------------------
    // Decisions
    // -------------------------------------------------------------------

    #[test]
    fn test_default_policy_never_retries() {
        let p = RetryPolicy::default();
        assert!(!RetryHandler::should_retry(&p, 1));
        assert_eq!(RetryHandler::decide(&p, 1), RetryDecision::GiveUp);
    }

    #[test]
    fn test_decide_within_budget() {
        let p = policy(3, BackoffStrategy::Exponential);
        assert_eq!(
            RetryHandler::decide(&p, 1),
            RetryDecision::Retry {
                attempt: 1,
                delay: Duration::from_millis(1000)
            }
        );
        assert_eq!(
            RetryHandler::decide(&p, 2),
            RetryDecision::Retry {
                attempt: 2,
                delay: Duration::from_millis(2000)
            }
        );
        assert_eq!(RetryHandler::decide(&p, 3), RetryDecision::GiveUp);
    }

    #[test]
    fn test_zero_max_attempts_still_allows_one_try() {
        let p = policy(0, BackoffStrategy::Fixed);
        assert!(!RetryHandler::should_retry(&p, 1));
    }

    #[test]
    fn test_resolve_policy_precedence() {
        let default = RetryPolicy::default();
        let unit_policy = policy(2, BackoffStrategy::Linear);
        let step_policy = policy(5, BackoffStrategy::Fixed);

        let mut step = StepDefinition {
            id: "s".to_string(),
            description: None,
            action: StepAction::Test {
                target: "all".to_string(),
                filter: None,
            },
            timeout_secs: None,
            retry: None,
        };
        let mut unit = Unit {
            id: "u".to_string(),
            unit_type: "task".to_string(),
            dependencies: vec![],
            inputs: vec![],
            outputs: vec![],
            priority: 0,
            complexity: 1,
            steps: vec![],
            retry: None,
            postconditions: vec![],
        };

        assert_eq!(RetryHandler::resolve_policy(&step, &unit, &default), &default);
        unit.retry = Some(unit_policy.clone());
        assert_eq!(RetryHandler::resolve_policy(&step, &unit, &default), &unit_policy);
        step.retry = Some(step_policy.clone());
        assert_eq!(RetryHandler::resolve_policy(&step, &unit, &default), &step_policy);
    }

    #[test]
    fn test_idempotency_key_format() {
        let id = uuid::Uuid::nil();
        let key = RetryHandler::idempotency_key(&id, "api", 2, 1);
        assert_eq!(key, format!("{id}-api-2-1"));
    }
}
