use super::*;
use crate::exit::Defect;
use crate::Effect;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn flaky(failures: u32, attempts: &Arc<AtomicU32>) -> Effect<&'static str, &'static str> {
    let attempts = Arc::clone(attempts);
    Effect::from_async(move |_: &()| {
        let attempts = Arc::clone(&attempts);
        async move {
            if attempts.fetch_add(1, Ordering::SeqCst) < failures {
                Err("transient failure")
            } else {
                Ok("success")
            }
        }
    })
}

#[tokio::test]
async fn test_retry_succeeds_on_third_attempt() {
    let attempts = Arc::new(AtomicU32::new(0));
    let effect = flaky(2, &attempts).retry(RetryPolicy::constant(Duration::from_millis(1)).with_max_retries(5));

    assert_eq!(effect.run(&()).await, Ok("success"));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retry_exhausted_returns_final_error() {
    let effect = Effect::<(), _>::fail("always fails")
        .retry(RetryPolicy::constant(Duration::from_millis(1)).with_max_retries(3));

    let exhausted = effect.run(&()).await.unwrap_err().into_failure().unwrap();
    assert_eq!(exhausted.attempts, 4);
    assert_eq!(exhausted.final_error, "always fails");
}

#[tokio::test]
async fn test_retry_if_skips_non_retryable_errors() {
    #[derive(Debug, PartialEq, Clone)]
    enum TestError {
        Transient,
        Permanent,
    }

    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    let effect = Effect::<(), TestError>::from_fn(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(TestError::Permanent)
    })
    .retry_if(RetryPolicy::immediate().with_max_retries(5), |error| {
        *error == TestError::Transient
    });

    let exhausted = effect.run(&()).await.unwrap_err().into_failure().unwrap();
    assert_eq!(exhausted.final_error, TestError::Permanent);
    assert_eq!(exhausted.attempts, 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_defects_are_not_retried() {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    let effect = Effect::<(), &str>::from_exit_fn(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        crate::exit::Exit::die(Defect::new("broken"))
    })
    .retry(RetryPolicy::immediate().with_max_retries(5));

    let cause = effect.run(&()).await.unwrap_err();
    assert!(cause.is_die());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_waits_between_attempts() {
    let attempts = Arc::new(AtomicU32::new(0));
    let effect = flaky(3, &attempts).retry(RetryPolicy::exponential(Duration::from_secs(1)).with_max_retries(5));

    let started = tokio::time::Instant::now();
    assert_eq!(effect.run(&()).await, Ok("success"));
    // 1s + 2s + 4s of backoff under the paused clock.
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(7) && waited < Duration::from_secs(8), "{waited:?}");
}

#[tokio::test(start_paused = true)]
async fn test_retry_stops_when_interrupted_while_waiting() {
    let attempts = Arc::new(AtomicU32::new(0));
    let effect = flaky(10, &attempts).retry(RetryPolicy::constant(Duration::from_secs(60)).with_max_retries(10));

    let fiber = effect.fork(&());
    tokio::time::sleep(Duration::from_secs(1)).await;
    let exit = fiber.interrupt().await;

    assert!(exit.is_interrupted());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}
