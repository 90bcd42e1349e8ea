//! Bounded retry combinator shared by the export strategies.

use gs_common::AttemptOutcome;
use std::time::Duration;

/// Why a single attempt did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    pub outcome: AttemptOutcome,
    pub detail: String,
}

impl AttemptFailure {
    pub fn timeout(detail: impl Into<String>) -> Self {
        Self {
            outcome: AttemptOutcome::Timeout,
            detail: detail.into(),
        }
    }

    pub fn rejected(detail: impl Into<String>) -> Self {
        Self {
            outcome: AttemptOutcome::Rejected,
            detail: detail.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.outcome.is_retryable()
    }
}

/// Result of a retried action: the value if any attempt succeeded, and
/// every failure seen on the way, in order.
#[derive(Debug)]
pub struct Retried<T> {
    pub value: Option<T>,
    pub failures: Vec<AttemptFailure>,
}

impl<T> Retried<T> {
    pub fn attempts(&self) -> usize {
        self.failures.len() + usize::from(self.value.is_some())
    }
}

/// Run `action` up to `max_attempts` times, pausing `backoff` between
/// attempts. Only retryable failures are repeated.
///
/// `action` receives the 1-based attempt number. `pause` performs the wait,
/// so callers can route it through their driver.
pub fn retry<T, F, P>(max_attempts: u32, backoff: Duration, mut pause: P, mut action: F) -> Retried<T>
where
    F: FnMut(u32) -> Result<T, AttemptFailure>,
    P: FnMut(Duration),
{
    let mut failures = Vec::new();
    let max_attempts = max_attempts.max(1);

    for attempt in 1..=max_attempts {
        match action(attempt) {
            Ok(value) => {
                return Retried {
                    value: Some(value),
                    failures,
                }
            }
            Err(failure) => {
                let retryable = failure.is_retryable();
                failures.push(failure);
                if !retryable || attempt == max_attempts {
                    break;
                }
                if !backoff.is_zero() {
                    pause(backoff);
                }
            }
        }
    }

    Retried {
        value: None,
        failures,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_success_first_try() {
        let result = retry(3, Duration::ZERO, |_| {}, |_| Ok::<_, AttemptFailure>(7));
        assert_eq!(result.value, Some(7));
        assert!(result.failures.is_empty());
        assert_eq!(result.attempts(), 1);
    }

    #[test]
    fn test_timeouts_are_retried_until_success() {
        let pauses = Cell::new(0);
        let result = retry(
            3,
            Duration::from_millis(10),
            |_| pauses.set(pauses.get() + 1),
            |attempt| {
                if attempt < 3 {
                    Err(AttemptFailure::timeout("slow"))
                } else {
                    Ok(attempt)
                }
            },
        );
        assert_eq!(result.value, Some(3));
        assert_eq!(result.failures.len(), 2);
        assert_eq!(pauses.get(), 2);
    }

    #[test]
    fn test_rejection_is_final() {
        let calls = Cell::new(0);
        let result: Retried<()> = retry(
            5,
            Duration::ZERO,
            |_| {},
            |_| {
                calls.set(calls.get() + 1);
                Err(AttemptFailure::rejected("html"))
            },
        );
        assert!(result.value.is_none());
        assert_eq!(calls.get(), 1);
        assert_eq!(result.failures[0].outcome, AttemptOutcome::Rejected);
    }

    #[test]
    fn test_attempts_are_bounded() {
        let pauses = Cell::new(0);
        let result: Retried<()> = retry(
            3,
            Duration::from_millis(1),
            |_| pauses.set(pauses.get() + 1),
            |_| Err(AttemptFailure::timeout("never")),
        );
        assert_eq!(result.failures.len(), 3);
        // No pause after the last attempt.
        assert_eq!(pauses.get(), 2);
    }

    #[test]
    fn test_zero_attempts_still_tries_once() {
        let result = retry(0, Duration::ZERO, |_| {}, |_| Ok::<_, AttemptFailure>(()));
        assert_eq!(result.attempts(), 1);
    }
}
