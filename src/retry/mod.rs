//! Retry policies for effects, scoped resources, and layers.
//!
//! A [`RetryPolicy`] is pure data: a backoff curve, limits, and an optional
//! jitter mode. Retrying operators start one [`RetrySchedule`] per run and feed
//! every failed attempt through it, so limits apply to the whole sequence.
//!
//! ```rust
//! use reservoir::{Effect, RetryPolicy};
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let calls = Arc::new(AtomicU32::new(0));
//! let counter = calls.clone();
//! let connect = Effect::<u32, &str>::from_fn(move |_| {
//!     let n = counter.fetch_add(1, Ordering::SeqCst);
//!     if n < 2 { Err("refused") } else { Ok(n) }
//! });
//!
//! let policy = RetryPolicy::exponential(Duration::from_millis(1)).with_max_retries(5);
//! assert_eq!(connect.retry(policy).run(&()).await.unwrap(), 2);
//! # });
//! ```
//!
//! Jitter needs the `jitter` feature; without it every [`Jitter`] mode leaves
//! delays untouched.

mod error;
mod policy;

pub use error::RetryExhausted;
pub use policy::{Backoff, Jitter, RetryPolicy, RetrySchedule};

#[cfg(test)]
mod tests;
