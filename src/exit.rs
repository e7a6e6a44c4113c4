//! Exit values and failure causes.
//!
//! Every effect in this crate finishes with an [`Exit`]: either a success value or
//! a [`Cause`] describing why it did not succeed. Causes distinguish three kinds of
//! non-success, and keep all of them when several happen at once:
//!
//! - **Typed failure** ([`Cause::Fail`]) - an expected error value, recoverable with
//!   combinators such as [`Effect::or_else`](crate::Effect::or_else) or
//!   [`Effect::retry`](crate::Effect::retry).
//! - **Defect** ([`Cause::Die`]) - an unexpected fault such as a panic inside an
//!   effect. Defects skip typed-failure handlers.
//! - **Interruption** ([`Cause::Interrupt`]) - the fiber running the effect was
//!   asked to stop.
//!
//! Causes compose sequentially ([`Cause::Then`], e.g. a body failure followed by a
//! finalizer defect) and in parallel ([`Cause::Both`], two branches failing
//! independently).
//!
//! # Example
//!
//! ```
//! use reservoir::{Cause, Defect, Exit, ExitStatus};
//!
//! let exit: Exit<i32, &str> = Exit::fail("boom");
//! assert_eq!(exit.status(), ExitStatus::Failed);
//!
//! let cause = Cause::fail("boom").then(Cause::die(Defect::new("finalizer panicked")));
//! assert_eq!(cause.failures(), vec![&"boom"]);
//! assert_eq!(cause.defects().len(), 1);
//! assert_eq!(cause.status(), ExitStatus::Died);
//! ```

use std::any::Any;
use std::convert::Infallible;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// An unexpected fault, distinct from a typed failure.
///
/// A defect carries a human readable message and, when it was raised from an
/// error value, the error itself so callers can downcast it.
#[derive(Debug, Clone)]
pub struct Defect {
    message: String,
    source: Option<Arc<dyn StdError + Send + Sync>>,
}

impl Defect {
    /// Create a defect from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Defect {
            message: message.into(),
            source: None,
        }
    }

    /// Create a defect that wraps an error value.
    ///
    /// ```
    /// use reservoir::Defect;
    ///
    /// let defect = Defect::from_error(std::io::Error::other("disk gone"));
    /// assert_eq!(defect.message(), "disk gone");
    /// assert!(defect.downcast_ref::<std::io::Error>().is_some());
    /// ```
    pub fn from_error<Er>(error: Er) -> Self
    where
        Er: StdError + Send + Sync + 'static,
    {
        Defect {
            message: error.to_string(),
            source: Some(Arc::new(error)),
        }
    }

    /// Convert a caught panic payload into a defect.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = match payload.downcast::<String>() {
            Ok(message) => *message,
            Err(payload) => match payload.downcast::<&'static str>() {
                Ok(message) => (*message).to_string(),
                Err(_) => "panic with a non-string payload".to_string(),
            },
        };
        Defect::new(format!("panicked: {}", message))
    }

    /// The defect message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The wrapped error, if this defect was raised from one.
    pub fn error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    /// Downcast the wrapped error to a concrete type.
    pub fn downcast_ref<Er: StdError + 'static>(&self) -> Option<&Er> {
        self.source.as_deref()?.downcast_ref::<Er>()
    }
}

impl PartialEq for Defect {
    fn eq(&self, other: &Self) -> bool {
        self.message == other.message
    }
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl StdError for Defect {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match &self.source {
            Some(source) => Some(source.as_ref()),
            None => None,
        }
    }
}

/// The full reason an effect did not succeed.
#[derive(Debug, Clone, PartialEq)]
pub enum Cause<E> {
    /// A typed, recoverable failure.
    Fail(E),
    /// An unexpected fault.
    Die(Defect),
    /// The effect was interrupted.
    Interrupt,
    /// Two causes that happened one after the other.
    Then(Box<Cause<E>>, Box<Cause<E>>),
    /// Two causes that happened concurrently.
    Both(Box<Cause<E>>, Box<Cause<E>>),
}

impl<E> Cause<E> {
    /// A typed failure.
    pub fn fail(error: E) -> Self {
        Cause::Fail(error)
    }

    /// A defect.
    pub fn die(defect: Defect) -> Self {
        Cause::Die(defect)
    }

    /// Sequential composition: `self` happened, then `next`.
    pub fn then(self, next: Cause<E>) -> Self {
        Cause::Then(Box::new(self), Box::new(next))
    }

    /// Parallel composition.
    pub fn both(self, other: Cause<E>) -> Self {
        Cause::Both(Box::new(self), Box::new(other))
    }

    /// All typed failures, left to right.
    pub fn failures(&self) -> Vec<&E> {
        let mut out = Vec::new();
        self.visit(&mut |cause| {
            if let Cause::Fail(e) = cause {
                out.push(e);
            }
        });
        out
    }

    /// All defects, left to right.
    pub fn defects(&self) -> Vec<&Defect> {
        let mut out = Vec::new();
        self.visit(&mut |cause| {
            if let Cause::Die(d) = cause {
                out.push(d);
            }
        });
        out
    }

    /// The first typed failure, if any.
    pub fn failure(&self) -> Option<&E> {
        self.failures().into_iter().next()
    }

    /// True if any part of this cause is an interruption.
    pub fn is_interrupted(&self) -> bool {
        let mut found = false;
        self.visit(&mut |cause| found |= matches!(cause, Cause::Interrupt));
        found
    }

    /// True if every part of this cause is an interruption.
    pub fn is_interrupted_only(&self) -> bool {
        match self {
            Cause::Interrupt => true,
            Cause::Fail(_) | Cause::Die(_) => false,
            Cause::Then(l, r) | Cause::Both(l, r) => {
                l.is_interrupted_only() && r.is_interrupted_only()
            }
        }
    }

    /// True if any part of this cause is a defect.
    pub fn is_die(&self) -> bool {
        !self.defects().is_empty()
    }

    /// The erased shape of this cause, as seen by finalizers.
    pub fn status(&self) -> ExitStatus {
        if self.is_die() {
            ExitStatus::Died
        } else if self.failure().is_some() {
            ExitStatus::Failed
        } else {
            ExitStatus::Interrupted
        }
    }

    /// Transform the typed failures in this cause.
    pub fn map<E2, F>(self, f: F) -> Cause<E2>
    where
        F: Fn(E) -> E2,
    {
        self.map_ref(&f)
    }

    fn map_ref<E2>(self, f: &dyn Fn(E) -> E2) -> Cause<E2> {
        match self {
            Cause::Fail(e) => Cause::Fail(f(e)),
            Cause::Die(d) => Cause::Die(d),
            Cause::Interrupt => Cause::Interrupt,
            Cause::Then(l, r) => Cause::Then(Box::new(l.map_ref(f)), Box::new(r.map_ref(f))),
            Cause::Both(l, r) => Cause::Both(Box::new(l.map_ref(f)), Box::new(r.map_ref(f))),
        }
    }

    /// Split a purely typed cause from one carrying defects or interruption.
    ///
    /// Returns `Ok` with the first typed failure only when the cause contains no
    /// defect and no interruption; those must propagate past typed handlers.
    pub fn into_failure(self) -> Result<E, Cause<E>> {
        if self.is_die() || self.is_interrupted() {
            return Err(self);
        }
        match self.take_first_failure() {
            (Some(e), _) => Ok(e),
            (None, Some(rest)) => Err(rest),
            (None, None) => Err(Cause::Interrupt),
        }
    }

    /// Drop the typed failures, keeping defects and interruptions.
    ///
    /// Returns `None` if nothing is left.
    pub fn strip_failures<E2>(self) -> Option<Cause<E2>> {
        match self {
            Cause::Fail(_) => None,
            Cause::Die(d) => Some(Cause::Die(d)),
            Cause::Interrupt => Some(Cause::Interrupt),
            Cause::Then(l, r) => match (l.strip_failures(), r.strip_failures()) {
                (Some(l), Some(r)) => Some(l.then(r)),
                (l, r) => l.or(r),
            },
            Cause::Both(l, r) => match (l.strip_failures(), r.strip_failures()) {
                (Some(l), Some(r)) => Some(l.both(r)),
                (l, r) => l.or(r),
            },
        }
    }

    fn take_first_failure(self) -> (Option<E>, Option<Cause<E>>) {
        match self {
            Cause::Fail(e) => (Some(e), None),
            Cause::Then(l, r) | Cause::Both(l, r) => match l.take_first_failure() {
                (Some(e), _) => (Some(e), None),
                (None, _) => r.take_first_failure(),
            },
            other => (None, Some(other)),
        }
    }

    fn visit<'a>(&'a self, f: &mut dyn FnMut(&'a Cause<E>)) {
        f(self);
        if let Cause::Then(l, r) | Cause::Both(l, r) = self {
            l.visit(f);
            r.visit(f);
        }
    }
}

impl Cause<Infallible> {
    /// Widen a cause that cannot carry typed failures into any error type.
    pub fn widen<E>(self) -> Cause<E> {
        self.map(|never| match never {})
    }
}

impl<E: fmt::Debug> fmt::Display for Cause<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cause::Fail(e) => write!(f, "failed: {:?}", e),
            Cause::Die(d) => write!(f, "died: {}", d),
            Cause::Interrupt => write!(f, "interrupted"),
            Cause::Then(l, r) => write!(f, "{}; then {}", l, r),
            Cause::Both(l, r) => write!(f, "({}) and ({})", l, r),
        }
    }
}

impl<E: fmt::Debug> StdError for Cause<E> {}

/// The erased shape of an exit, handed to finalizers.
///
/// Finalizers outlive the types of the effects that registered them, so they
/// see only how the scope ended, not its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ExitStatus {
    /// The scope completed successfully.
    Succeeded,
    /// The scope failed with a typed error.
    Failed,
    /// The scope failed with a defect.
    Died,
    /// The scope was interrupted.
    Interrupted,
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ExitStatus::Succeeded => "succeeded",
            ExitStatus::Failed => "failed",
            ExitStatus::Died => "died",
            ExitStatus::Interrupted => "interrupted",
        };
        f.write_str(text)
    }
}

/// The outcome of running an effect.
#[derive(Debug, Clone, PartialEq)]
pub enum Exit<T, E> {
    /// The effect produced a value.
    Success(T),
    /// The effect did not produce a value.
    Failure(Cause<E>),
}

impl<T, E> Exit<T, E> {
    /// A successful exit.
    pub fn succeed(value: T) -> Self {
        Exit::Success(value)
    }

    /// A typed failure.
    pub fn fail(error: E) -> Self {
        Exit::Failure(Cause::Fail(error))
    }

    /// A defect.
    pub fn die(defect: Defect) -> Self {
        Exit::Failure(Cause::Die(defect))
    }

    /// An interruption.
    pub fn interrupt() -> Self {
        Exit::Failure(Cause::Interrupt)
    }

    /// Build an exit from a `Result`.
    pub fn from_result(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Exit::Success(value),
            Err(error) => Exit::fail(error),
        }
    }

    /// True on success.
    pub fn is_success(&self) -> bool {
        matches!(self, Exit::Success(_))
    }

    /// True on any kind of failure.
    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }

    /// True if the exit contains an interruption.
    pub fn is_interrupted(&self) -> bool {
        match self {
            Exit::Success(_) => false,
            Exit::Failure(cause) => cause.is_interrupted(),
        }
    }

    /// The success value, if any.
    pub fn value(&self) -> Option<&T> {
        match self {
            Exit::Success(value) => Some(value),
            Exit::Failure(_) => None,
        }
    }

    /// The cause, if this exit is a failure.
    pub fn cause(&self) -> Option<&Cause<E>> {
        match self {
            Exit::Success(_) => None,
            Exit::Failure(cause) => Some(cause),
        }
    }

    /// The erased shape of this exit.
    pub fn status(&self) -> ExitStatus {
        match self {
            Exit::Success(_) => ExitStatus::Succeeded,
            Exit::Failure(cause) => cause.status(),
        }
    }

    /// Transform the success value.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Exit<U, E> {
        match self {
            Exit::Success(value) => Exit::Success(f(value)),
            Exit::Failure(cause) => Exit::Failure(cause),
        }
    }

    /// Transform the typed failures.
    pub fn map_err<E2, F: Fn(E) -> E2>(self, f: F) -> Exit<T, E2> {
        match self {
            Exit::Success(value) => Exit::Success(value),
            Exit::Failure(cause) => Exit::Failure(cause.map(f)),
        }
    }

    /// Convert into a `Result` carrying the whole cause.
    pub fn into_result(self) -> Result<T, Cause<E>> {
        match self {
            Exit::Success(value) => Ok(value),
            Exit::Failure(cause) => Err(cause),
        }
    }

    /// Combine this exit with the exit of a finalizer that ran after it.
    ///
    /// A finalizer failure never hides the primary cause: both are kept.
    pub(crate) fn and_finalizer(self, finalizer: Exit<(), Infallible>) -> Self {
        match (self, finalizer) {
            (exit, Exit::Success(())) => exit,
            (Exit::Success(_), Exit::Failure(fin)) => Exit::Failure(fin.widen()),
            (Exit::Failure(cause), Exit::Failure(fin)) => Exit::Failure(cause.then(fin.widen())),
        }
    }
}

impl Exit<(), Infallible> {
    pub(crate) fn unit() -> Self {
        Exit::Success(())
    }

    /// Sequentially combine two finalizer exits, keeping every defect.
    pub(crate) fn then_finalizer(self, next: Exit<(), Infallible>) -> Self {
        match (self, next) {
            (Exit::Success(()), next) => next,
            (first, Exit::Success(())) => first,
            (Exit::Failure(a), Exit::Failure(b)) => Exit::Failure(a.then(b)),
        }
    }

    /// Combine two finalizer exits that ran concurrently.
    pub(crate) fn both_finalizer(self, other: Exit<(), Infallible>) -> Self {
        match (self, other) {
            (Exit::Success(()), other) => other,
            (first, Exit::Success(())) => first,
            (Exit::Failure(a), Exit::Failure(b)) => Exit::Failure(a.both(b)),
        }
    }
}

impl<T, E> From<Result<T, E>> for Exit<T, E> {
    fn from(result: Result<T, E>) -> Self {
        Exit::from_result(result)
    }
}
