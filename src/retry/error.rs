//! The error reported when a retry schedule gives up.

use std::time::Duration;

/// A typed failure that survived every retry.
///
/// # Examples
///
/// ```rust
/// use reservoir::{Effect, RetryPolicy};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let flaky = Effect::<(), &str>::fail("unreachable");
/// let policy = RetryPolicy::constant(Duration::from_millis(1)).with_max_retries(2);
///
/// let cause = flaky.retry(policy).run(&()).await.unwrap_err();
/// let exhausted = cause.failure().unwrap();
/// assert_eq!(exhausted.final_error, "unreachable");
/// assert_eq!(exhausted.attempts, 3);
/// # });
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryExhausted<E> {
    /// The failure of the last attempt.
    pub final_error: E,
    /// Attempts made, counting the first.
    pub attempts: u32,
    /// Time from the first attempt to giving up.
    pub total_duration: Duration,
}

impl<E> RetryExhausted<E> {
    /// Bundle the last failure with the schedule's counters.
    pub fn new(final_error: E, attempts: u32, total_duration: Duration) -> Self {
        RetryExhausted {
            final_error,
            attempts,
            total_duration,
        }
    }

    /// Drop the counters.
    pub fn into_error(self) -> E {
        self.final_error
    }
}

impl<E: std::fmt::Display> std::fmt::Display for RetryExhausted<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "gave up after {} attempts in {:?}: {}",
            self.attempts, self.total_duration, self.final_error
        )
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryExhausted<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.final_error)
    }
}

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn test_display_names_attempts_and_error() {
        let err = RetryExhausted::new("refused", 4, Duration::from_millis(30));
        let text = err.to_string();
        assert!(text.contains("4 attempts"));
        assert!(text.ends_with("refused"));
        assert_eq!(err.into_error(), "refused");
    }

    #[test]
    fn test_source_is_final_error() {
        use std::error::Error;
        let err = RetryExhausted::new(std::io::Error::other("io"), 1, Duration::ZERO);
        assert_eq!(err.source().map(|s| s.to_string()), Some("io".to_string()));
    }
}
