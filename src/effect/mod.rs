//! The effect core: reusable async computations with typed failures,
//! defects, and cooperative interruption.
//!
//! An [`Effect<T, E, Env>`] describes a computation that reads an environment
//! `Env`, may succeed with `T`, may fail with a typed `E`, may die with a
//! [`Defect`], and may be interrupted. Effects are values: they do nothing until
//! run, and they can be cloned and run any number of times.
//!
//! # Running
//!
//! ```rust
//! use reservoir::Effect;
//!
//! # tokio_test::block_on(async {
//! let effect = Effect::<i32, String>::pure(20).map(|x| x + 1).map(|x| x * 2);
//! assert_eq!(effect.run(&()).await, Ok(42));
//! // Effects are reusable.
//! assert_eq!(effect.run(&()).await, Ok(42));
//! # });
//! ```
//!
//! # Failures, defects and interruption
//!
//! [`Effect::run`] returns the whole [`Cause`] on failure. A panic inside an
//! effect never unwinds into the caller; it becomes [`Cause::Die`]:
//!
//! ```rust
//! use reservoir::{Cause, Effect};
//!
//! # tokio_test::block_on(async {
//! let effect = Effect::<i32, String>::from_fn(|_| panic!("bug"));
//! let cause = effect.run(&()).await.unwrap_err();
//! assert!(cause.is_die());
//! # });
//! ```
//!
//! A forked effect runs on its own tokio task as a [`Fiber`]. Interrupting the
//! fiber flips its signal; the effect stops at its next interruptible point and
//! the interrupting call returns only after the effect has wound down.
//!
//! # Environment
//!
//! `Env` must be `Clone + Send + Sync + 'static`. It is cloned into each run,
//! so environments that hold `Arc`-wrapped services are the norm.

mod combinators;
mod constructors;
mod fiber;
pub(crate) mod interrupt;
mod parallel;
mod retry;


use std::convert::Infallible;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures::FutureExt;

use crate::exit::{Cause, Defect, Exit};

pub use fiber::Fiber;
pub(crate) use interrupt::FiberContext;
pub(crate) use parallel::par_exits;

/// A boxed future that is `Send`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

type RunFn<T, E, Env> = dyn Fn(Env, FiberContext) -> BoxFuture<'static, Exit<T, E>> + Send + Sync;

/// A reusable description of an async computation.
///
/// See the [module documentation](self) for an overview.
pub struct Effect<T, E = Infallible, Env = ()> {
    run_fn: Arc<RunFn<T, E, Env>>,
}

impl<T, E, Env> Clone for Effect<T, E, Env> {
    fn clone(&self) -> Self {
        Effect {
            run_fn: Arc::clone(&self.run_fn),
        }
    }
}

impl<T, E, Env> std::fmt::Debug for Effect<T, E, Env> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("output", &std::any::type_name::<T>())
            .field("error", &std::any::type_name::<E>())
            .finish()
    }
}

impl<T, E, Env> Effect<T, E, Env>
where
    T: Send + 'static,
    E: Send + 'static,
    Env: Clone + Send + Sync + 'static,
{
    pub(crate) fn from_run<F>(f: F) -> Self
    where
        F: Fn(Env, FiberContext) -> BoxFuture<'static, Exit<T, E>> + Send + Sync + 'static,
    {
        Effect {
            run_fn: Arc::new(f),
        }
    }

    pub(crate) fn run_in(&self, env: Env, ctx: FiberContext) -> BoxFuture<'static, Exit<T, E>> {
        match catch_panic(|| (self.run_fn)(env, ctx)) {
            Ok(fut) => fut,
            Err(defect) => Box::pin(async move { Exit::die(defect) }),
        }
    }

    /// Run the effect and return its full [`Exit`].
    ///
    /// The returned future owns everything it needs; `env` is cloned.
    pub fn run_exit(&self, env: &Env) -> impl Future<Output = Exit<T, E>> + Send + 'static {
        catch_panic_async(self.run_in(env.clone(), FiberContext::root()))
    }

    /// Run the effect, returning the success value or the full [`Cause`].
    pub fn run(&self, env: &Env) -> impl Future<Output = Result<T, Cause<E>>> + Send + 'static {
        let exit = self.run_exit(env);
        async move { exit.await.into_result() }
    }

    /// Start the effect on a new tokio task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn fork(&self, env: &Env) -> Fiber<T, E> {
        let ctx = FiberContext::root();
        let fut = catch_panic_async(self.run_in(env.clone(), ctx.clone()));
        Fiber::spawn(fut, ctx)
    }
}

/// Run a closure, converting a panic into a [`Defect`].
pub(crate) fn catch_panic<R>(f: impl FnOnce() -> R) -> Result<R, Defect> {
    std::panic::catch_unwind(AssertUnwindSafe(f)).map_err(Defect::from_panic)
}

/// Await an exit-producing future, converting a panic into a [`Defect`].
pub(crate) async fn catch_panic_async<T, E, F>(fut: F) -> Exit<T, E>
where
    F: Future<Output = Exit<T, E>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(exit) => exit,
        Err(payload) => Exit::die(Defect::from_panic(payload)),
    }
}
