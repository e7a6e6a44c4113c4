//! Helpers for testing code built on effects, scoped resources and layers.
//!
//! # Assertion macros
//!
//! The macros take an [`Exit`](crate::Exit) and hand back what is inside it,
//! so tests can keep going:
//!
//! ```rust
//! use reservoir::{assert_fails_with, assert_success, Effect};
//!
//! # tokio_test::block_on(async {
//! let value = assert_success!(Effect::<u32, String>::pure(7).run_exit(&()).await);
//! assert_eq!(value, 7);
//!
//! let failed = Effect::<u32, String>::fail("nope".into()).run_exit(&()).await;
//! assert_fails_with!(failed, "nope".to_string());
//! # });
//! ```
//!
//! # Test environments and event logs
//!
//! ```rust
//! use reservoir::testing::{EventLog, TestEnv};
//! use reservoir::{Effect, Managed};
//!
//! #[derive(Clone)]
//! struct Config {
//!     debug: bool,
//! }
//!
//! let env = TestEnv::new().with(|| Config { debug: true }).build();
//! assert!(env.get::<Config>().unwrap().debug);
//!
//! # tokio_test::block_on(async {
//! let log = EventLog::new();
//! let program = log
//!     .resource::<String, ()>("db")
//!     .with(|_| Effect::pure(()));
//! program.run(&()).await.unwrap();
//! assert_eq!(log.entries(), vec!["acquire db", "release db"]);
//! # });
//! ```

use std::convert::Infallible;
use std::sync::{Arc, Mutex, PoisonError};

use crate::effect::Effect;
use crate::layer::Environment;
use crate::managed::Managed;

/// Builder for an [`Environment`] holding test doubles.
///
/// Services are created lazily by the closures passed to
/// [`with`](TestEnv::with); a later service of the same type replaces an
/// earlier one.
#[derive(Debug, Default)]
pub struct TestEnv {
    env: Environment,
}

impl TestEnv {
    /// An empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the service built by `f`.
    pub fn with<S, F>(mut self, f: F) -> Self
    where
        S: Send + Sync + 'static,
        F: FnOnce() -> S,
    {
        self.env.insert(f());
        self
    }

    /// The finished environment.
    pub fn build(self) -> Environment {
        self.env
    }
}

/// A shared, ordered record of events, for checking when things ran.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    /// An empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `entry` now.
    pub fn record(&self, entry: impl Into<String>) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.into());
    }

    /// An effect that appends `entry` each time it runs.
    pub fn event<E, Env>(&self, entry: impl Into<String>) -> Effect<(), E, Env>
    where
        E: Send + 'static,
        Env: Clone + Send + Sync + 'static,
    {
        let (log, entry) = (self.clone(), entry.into());
        Effect::from_fn(move |_| {
            log.record(entry.clone());
            Ok(())
        })
    }

    /// A finalizer that appends `entry`.
    pub fn finalizer<Env>(&self, entry: impl Into<String>) -> Effect<(), Infallible, Env>
    where
        Env: Clone + Send + Sync + 'static,
    {
        self.event(entry)
    }

    /// A resource named `name` that logs `acquire name` and `release name`.
    pub fn resource<E, Env>(&self, name: &'static str) -> Managed<&'static str, E, Env>
    where
        E: Send + 'static,
        Env: Clone + Send + Sync + 'static,
    {
        let log = self.clone();
        Managed::make(
            self.event(format!("acquire {name}")).map(move |_| name),
            move |_| log.finalizer(format!("release {name}")),
        )
    }

    /// Everything recorded so far, oldest first.
    pub fn entries(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Assert that an [`Exit`](crate::Exit) succeeded and return its value.
#[macro_export]
macro_rules! assert_success {
    ($exit:expr) => {
        match $exit {
            $crate::Exit::Success(value) => value,
            $crate::Exit::Failure(cause) => {
                panic!("Expected Success, got Failure: {:?}", cause);
            }
        }
    };
}

/// Assert that an [`Exit`](crate::Exit) did not succeed and return its
/// [`Cause`](crate::Cause).
#[macro_export]
macro_rules! assert_failure {
    ($exit:expr) => {
        match $exit {
            $crate::Exit::Failure(cause) => cause,
            $crate::Exit::Success(value) => {
                panic!("Expected Failure, got Success: {:?}", value);
            }
        }
    };
}

/// Assert that an [`Exit`](crate::Exit) failed with exactly the typed error
/// `expected`.
#[macro_export]
macro_rules! assert_fails_with {
    ($exit:expr, $expected:expr) => {
        match $crate::assert_failure!($exit).into_failure() {
            Ok(error) => assert_eq!(error, $expected),
            Err(cause) => panic!(
                "Expected Failure with {:?}, got {:?}",
                $expected, cause
            ),
        }
    };
}

/// Assert that an [`Exit`](crate::Exit) died and return its defect messages.
#[macro_export]
macro_rules! assert_dies {
    ($exit:expr) => {{
        let cause = $crate::assert_failure!($exit);
        if !cause.is_die() {
            panic!("Expected a defect, got {:?}", cause);
        }
        cause
            .defects()
            .into_iter()
            .map(|defect| defect.message().to_string())
            .collect::<Vec<String>>()
    }};
}

/// Assert that an [`Exit`](crate::Exit) ended by interruption alone.
#[macro_export]
macro_rules! assert_interrupted {
    ($exit:expr) => {{
        let cause = $crate::assert_failure!($exit);
        if !cause.is_interrupted_only() {
            panic!("Expected interruption, got {:?}", cause);
        }
    }};
}
