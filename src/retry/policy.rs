//! Backoff policies and the per-run schedule that walks them.

use std::time::{Duration, Instant};

/// How long to wait between attempts, and when to give up.
///
/// A policy is plain data. It is consulted through a [`RetrySchedule`], which
/// holds the state of one retry sequence (attempts made, previous delay, start
/// time) so a single schedule spans every attempt of a retried resource.
///
/// # Examples
///
/// ```rust
/// use reservoir::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential(Duration::from_millis(10)).with_max_retries(3);
///
/// assert_eq!(policy.delay_for_attempt(0), Some(Duration::from_millis(10)));
/// assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(40)));
/// assert_eq!(policy.delay_for_attempt(3), None);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RetryPolicy {
    backoff: Backoff,
    max_retries: Option<u32>,
    max_delay: Option<Duration>,
    max_elapsed: Option<Duration>,
    jitter: Jitter,
}

/// The shape of the delay curve.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Backoff {
    /// Retry immediately.
    Immediate,
    /// The same delay every time.
    Constant(Duration),
    /// `base * (attempt + 1)`.
    Linear(Duration),
    /// `base * 2^attempt`.
    Exponential(Duration),
    /// `base * fib(attempt + 1)`.
    Fibonacci(Duration),
}

/// Randomisation applied on top of the backoff curve.
///
/// Without the `jitter` feature every variant behaves like [`Jitter::None`].
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Jitter {
    /// Use the curve as is.
    #[default]
    None,
    /// Spread each delay by up to the given fraction in either direction.
    Proportional(f64),
    /// Pick uniformly between zero and the computed delay.
    Full,
    /// Pick between the base delay and three times the previous delay.
    Decorrelated,
}

impl RetryPolicy {
    fn with_backoff(backoff: Backoff) -> Self {
        RetryPolicy {
            backoff,
            max_retries: None,
            max_delay: None,
            max_elapsed: None,
            jitter: Jitter::None,
        }
    }

    /// Retry without waiting.
    pub fn immediate() -> Self {
        Self::with_backoff(Backoff::Immediate)
    }

    /// Wait `delay` before each retry.
    pub fn constant(delay: Duration) -> Self {
        Self::with_backoff(Backoff::Constant(delay))
    }

    /// Grow the delay linearly from `base`.
    ///
    /// ```rust
    /// use reservoir::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::linear(Duration::from_millis(100)).with_max_retries(5);
    /// assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(300)));
    /// ```
    pub fn linear(base: Duration) -> Self {
        Self::with_backoff(Backoff::Linear(base))
    }

    /// Double the delay after every attempt, starting at `base`.
    pub fn exponential(base: Duration) -> Self {
        Self::with_backoff(Backoff::Exponential(base))
    }

    /// Follow the Fibonacci sequence, scaled by `base`.
    pub fn fibonacci(base: Duration) -> Self {
        Self::with_backoff(Backoff::Fibonacci(base))
    }

    /// Stop after `n` retries (so at most `n + 1` attempts).
    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = Some(n);
        self
    }

    /// Cap any single delay at `max`.
    pub fn with_max_delay(mut self, max: Duration) -> Self {
        self.max_delay = Some(max);
        self
    }

    /// Stop retrying once this much time has passed since the first attempt.
    pub fn with_max_elapsed(mut self, max: Duration) -> Self {
        self.max_elapsed = Some(max);
        self
    }

    /// Spread delays by `factor` (clamped to `0.0..=1.0`) in either direction.
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter = Jitter::Proportional(factor.clamp(0.0, 1.0));
        self
    }

    /// Use full jitter.
    pub fn with_full_jitter(mut self) -> Self {
        self.jitter = Jitter::Full;
        self
    }

    /// Use decorrelated jitter.
    pub fn with_decorrelated_jitter(mut self) -> Self {
        self.jitter = Jitter::Decorrelated;
        self
    }

    /// The backoff curve.
    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// The retry limit, if any.
    pub fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }

    /// The per-delay cap, if any.
    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay
    }

    /// The total time budget, if any.
    pub fn max_elapsed(&self) -> Option<Duration> {
        self.max_elapsed
    }

    /// The jitter mode.
    pub fn jitter(&self) -> &Jitter {
        &self.jitter
    }

    /// The delay before retry number `attempt` (0-indexed), before jitter.
    ///
    /// `None` means the policy gives up.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if self.max_retries.is_some_and(|max| attempt >= max) {
            return None;
        }
        let raw = match &self.backoff {
            Backoff::Immediate => Duration::ZERO,
            Backoff::Constant(delay) => *delay,
            Backoff::Linear(base) => base.saturating_mul(attempt.saturating_add(1)),
            Backoff::Exponential(base) => base.saturating_mul(2u32.saturating_pow(attempt)),
            Backoff::Fibonacci(base) => base.saturating_mul(fibonacci(attempt.saturating_add(1))),
        };
        Some(self.cap(raw))
    }

    /// Reject a policy that could retry forever.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.max_retries.is_none() && self.max_elapsed.is_none() {
            Err("retry policy needs max_retries or max_elapsed")
        } else {
            Ok(())
        }
    }

    /// Start a fresh schedule for one retry sequence.
    pub fn schedule(&self) -> RetrySchedule {
        RetrySchedule {
            policy: self.clone(),
            retries: 0,
            previous: None,
            started: Instant::now(),
        }
    }

    fn cap(&self, delay: Duration) -> Duration {
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

/// The running state of one retry sequence.
#[derive(Debug, Clone)]
pub struct RetrySchedule {
    policy: RetryPolicy,
    retries: u32,
    previous: Option<Duration>,
    started: Instant,
}

impl RetrySchedule {
    /// Record a failed attempt and return how long to wait before the next one.
    ///
    /// Returns `None` when the policy is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let base = self.policy.delay_for_attempt(self.retries)?;
        let delay = self.policy.cap(self.policy.jitter.apply(base, self.previous));
        if let Some(budget) = self.policy.max_elapsed {
            if self.started.elapsed().saturating_add(delay) > budget {
                return None;
            }
        }
        self.retries += 1;
        self.previous = Some(delay);
        Some(delay)
    }

    /// Attempts made so far, counting the first.
    pub fn attempts(&self) -> u32 {
        self.retries + 1
    }

    /// Time since the schedule started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Jitter {
    /// Apply this jitter to `delay`.
    pub fn apply(
        &self,
        delay: Duration,
        #[cfg_attr(not(feature = "jitter"), allow(unused_variables))] previous: Option<Duration>,
    ) -> Duration {
        match self {
            Jitter::None => delay,
            #[cfg(feature = "jitter")]
            Jitter::Proportional(factor) => {
                use rand::Rng;
                let millis = delay.as_millis() as f64;
                let spread = millis * factor;
                let low = (millis - spread).max(0.0);
                let high = millis + spread;
                if high <= low {
                    delay
                } else {
                    Duration::from_millis(rand::rng().random_range(low..=high) as u64)
                }
            }
            #[cfg(feature = "jitter")]
            Jitter::Full => {
                use rand::Rng;
                let millis = delay.as_millis() as u64;
                Duration::from_millis(rand::rng().random_range(0..=millis))
            }
            #[cfg(feature = "jitter")]
            Jitter::Decorrelated => {
                use rand::Rng;
                let low = delay.as_millis() as u64;
                let high = previous.unwrap_or(delay).as_millis().saturating_mul(3) as u64;
                if high <= low {
                    delay
                } else {
                    Duration::from_millis(rand::rng().random_range(low..=high))
                }
            }
            #[cfg(not(feature = "jitter"))]
            _ => delay,
        }
    }
}

fn fibonacci(n: u32) -> u32 {
    let (mut a, mut b) = (0u32, 1u32);
    for _ in 0..n {
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    a
}

#[cfg(test)]
mod policy_tests {
    use super::*;

    #[test]
    fn test_curves() {
        let ms = Duration::from_millis;
        let linear = RetryPolicy::linear(ms(100)).with_max_retries(5);
        assert_eq!(linear.delay_for_attempt(0), Some(ms(100)));
        assert_eq!(linear.delay_for_attempt(3), Some(ms(400)));

        let exponential = RetryPolicy::exponential(ms(100)).with_max_retries(5);
        assert_eq!(exponential.delay_for_attempt(3), Some(ms(800)));

        let fib = RetryPolicy::fibonacci(ms(100)).with_max_retries(6);
        let delays: Vec<_> = (0..6).filter_map(|n| fib.delay_for_attempt(n)).collect();
        assert_eq!(delays, vec![ms(100), ms(100), ms(200), ms(300), ms(500), ms(800)]);

        assert_eq!(
            RetryPolicy::immediate().with_max_retries(1).delay_for_attempt(0),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_max_delay_caps_growth() {
        let policy = RetryPolicy::exponential(Duration::from_millis(100))
            .with_max_retries(10)
            .with_max_delay(Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(400)));
        assert_eq!(policy.delay_for_attempt(6), Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_schedule_counts_attempts_and_stops() {
        let policy = RetryPolicy::constant(Duration::from_millis(1)).with_max_retries(2);
        let mut schedule = policy.schedule();
        assert_eq!(schedule.attempts(), 1);
        assert!(schedule.next_delay().is_some());
        assert!(schedule.next_delay().is_some());
        assert_eq!(schedule.next_delay(), None);
        assert_eq!(schedule.attempts(), 3);
    }

    #[test]
    fn test_schedule_respects_elapsed_budget() {
        let policy = RetryPolicy::constant(Duration::from_secs(10))
            .with_max_elapsed(Duration::from_secs(1));
        assert_eq!(policy.schedule().next_delay(), None);
    }

    #[test]
    fn test_validate_requires_a_bound() {
        assert!(RetryPolicy::constant(Duration::from_millis(1)).validate().is_err());
        assert!(RetryPolicy::immediate().with_max_retries(1).validate().is_ok());
        assert!(RetryPolicy::immediate()
            .with_max_elapsed(Duration::from_secs(1))
            .validate()
            .is_ok());
    }

    #[test]
    fn test_fibonacci_sequence() {
        let seq: Vec<u32> = (0..8).map(fibonacci).collect();
        assert_eq!(seq, vec![0, 1, 1, 2, 3, 5, 8, 13]);
    }

    #[test]
    fn test_jitter_factor_is_clamped() {
        let policy = RetryPolicy::immediate().with_jitter(4.0);
        assert_eq!(policy.jitter(), &Jitter::Proportional(1.0));
    }

    #[cfg(feature = "jitter")]
    #[test]
    fn test_proportional_jitter_stays_in_range() {
        let jitter = Jitter::Proportional(0.5);
        for _ in 0..100 {
            let delay = jitter.apply(Duration::from_millis(100), None);
            assert!(delay >= Duration::from_millis(50) && delay <= Duration::from_millis(150));
        }
    }
}
