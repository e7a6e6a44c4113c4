//! Combinators for transforming and sequencing effects.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{self, Either};
use futures::FutureExt;
use tracing::Instrument;

use crate::effect::{catch_panic, Effect, FiberContext};
use crate::exit::{Cause, Exit};

impl<T, E, Env> Effect<T, E, Env>
where
    T: Send + 'static,
    E: Send + 'static,
    Env: Clone + Send + Sync + 'static,
{
    /// Transform the success value.
    pub fn map<U, F>(&self, f: F) -> Effect<U, E, Env>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let this = self.clone();
        let f = Arc::new(f);
        Effect::from_run(move |env, ctx| {
            let f = Arc::clone(&f);
            let run = this.run_in(env, ctx);
            async move {
                match run.await {
                    Exit::Success(value) => match catch_panic(|| f(value)) {
                        Ok(mapped) => Exit::Success(mapped),
                        Err(defect) => Exit::die(defect),
                    },
                    Exit::Failure(cause) => Exit::Failure(cause),
                }
            }
            .boxed()
        })
    }

    /// Transform the typed failure. Defects and interruptions pass through.
    pub fn map_err<E2, F>(&self, f: F) -> Effect<T, E2, Env>
    where
        E2: Send + 'static,
        F: Fn(E) -> E2 + Send + Sync + 'static,
    {
        let this = self.clone();
        let f = Arc::new(f);
        Effect::from_run(move |env, ctx| {
            let f = Arc::clone(&f);
            let run = this.run_in(env, ctx);
            async move {
                let exit = run.await;
                match catch_panic(|| exit.map_err(&*f)) {
                    Ok(exit) => exit,
                    Err(defect) => Exit::die(defect),
                }
            }
            .boxed()
        })
    }

    /// Run `f` on the success value and continue with the effect it returns.
    ///
    /// A pending interruption is honoured between the two steps.
    pub fn and_then<U, F>(&self, f: F) -> Effect<U, E, Env>
    where
        U: Send + 'static,
        F: Fn(T) -> Effect<U, E, Env> + Send + Sync + 'static,
    {
        let this = self.clone();
        let f = Arc::new(f);
        Effect::from_run(move |env: Env, ctx: FiberContext| {
            let f = Arc::clone(&f);
            let this = this.clone();
            async move {
                let value = match this.run_in(env.clone(), ctx.clone()).await {
                    Exit::Success(value) => value,
                    Exit::Failure(cause) => return Exit::Failure(cause),
                };
                if ctx.should_interrupt() {
                    return Exit::interrupt();
                }
                match catch_panic(|| f(value)) {
                    Ok(next) => next.run_in(env, ctx).await,
                    Err(defect) => Exit::die(defect),
                }
            }
            .boxed()
        })
    }

    /// Recover from a typed failure.
    ///
    /// Defects and interruptions are not recoverable: they skip `f` and any
    /// typed failures alongside them are dropped.
    ///
    /// ```rust
    /// use reservoir::Effect;
    ///
    /// # tokio_test::block_on(async {
    /// let primary = Effect::<i32, &str>::fail("offline");
    /// let recovered = primary.or_else(|_| Effect::<i32, String>::pure(0));
    /// assert_eq!(recovered.run(&()).await, Ok(0));
    /// # });
    /// ```
    pub fn or_else<E2, F>(&self, f: F) -> Effect<T, E2, Env>
    where
        E2: Send + 'static,
        F: Fn(E) -> Effect<T, E2, Env> + Send + Sync + 'static,
    {
        let this = self.clone();
        let f = Arc::new(f);
        Effect::from_run(move |env: Env, ctx: FiberContext| {
            let f = Arc::clone(&f);
            let this = this.clone();
            async move {
                let cause = match this.run_in(env.clone(), ctx.clone()).await {
                    Exit::Success(value) => return Exit::Success(value),
                    Exit::Failure(cause) => cause,
                };
                match cause.into_failure() {
                    Ok(error) => match catch_panic(|| f(error)) {
                        Ok(fallback) => fallback.run_in(env, ctx).await,
                        Err(defect) => Exit::die(defect),
                    },
                    Err(cause) => Exit::Failure(cause.strip_failures().unwrap_or(Cause::Interrupt)),
                }
            }
            .boxed()
        })
    }

    /// Run `self` then `other`, pairing their results.
    pub fn zip<U>(&self, other: Effect<U, E, Env>) -> Effect<(T, U), E, Env>
    where
        U: Send + 'static,
    {
        self.zip_with(other, |a, b| (a, b))
    }

    /// Run `self` then `other`, combining their results with `f`.
    pub fn zip_with<U, R, F>(&self, other: Effect<U, E, Env>, f: F) -> Effect<R, E, Env>
    where
        U: Send + 'static,
        R: Send + 'static,
        F: Fn(T, U) -> R + Send + Sync + 'static,
    {
        let this = self.clone();
        let f = Arc::new(f);
        Effect::from_run(move |env: Env, ctx: FiberContext| {
            let (this, other, f) = (this.clone(), other.clone(), Arc::clone(&f));
            async move {
                let left = match this.run_in(env.clone(), ctx.clone()).await {
                    Exit::Success(value) => value,
                    Exit::Failure(cause) => return Exit::Failure(cause),
                };
                if ctx.should_interrupt() {
                    return Exit::interrupt();
                }
                match other.run_in(env, ctx).await {
                    Exit::Success(right) => match catch_panic(|| f(left, right)) {
                        Ok(value) => Exit::Success(value),
                        Err(defect) => Exit::die(defect),
                    },
                    Exit::Failure(cause) => Exit::Failure(cause),
                }
            }
            .boxed()
        })
    }

    /// Never fail; succeed with the exit of `self` instead.
    pub fn exit(&self) -> Effect<Exit<T, E>, Infallible, Env> {
        let this = self.clone();
        Effect::from_run(move |env, ctx| {
            let run = this.run_in(env, ctx);
            async move { Exit::Success(run.await) }.boxed()
        })
    }

    /// Run `finalizer` after `self`, however `self` ends.
    pub fn ensuring(&self, finalizer: Effect<(), Infallible, Env>) -> Self {
        self.on_exit(move |_| finalizer.clone())
    }

    /// Run the effect returned by `f` after `self`, handing it the exit.
    ///
    /// The finalizer runs uninterruptibly. If it dies, the defect is kept
    /// after the primary cause instead of replacing it.
    pub fn on_exit<F>(&self, f: F) -> Self
    where
        F: Fn(&Exit<T, E>) -> Effect<(), Infallible, Env> + Send + Sync + 'static,
    {
        let this = self.clone();
        let f = Arc::new(f);
        Effect::from_run(move |env: Env, ctx: FiberContext| {
            let (this, f) = (this.clone(), Arc::clone(&f));
            async move {
                let exit = this.run_in(env.clone(), ctx.clone()).await;
                let finalized = match catch_panic(|| f(&exit)) {
                    Ok(finalizer) => finalizer.run_in(env, ctx.uninterruptible()).await,
                    Err(defect) => Exit::die(defect),
                };
                exit.and_finalizer(finalized)
            }
            .boxed()
        })
    }

    /// Run `self` with interruption disabled.
    ///
    /// Requests that arrive meanwhile take effect at the next interruptible
    /// check after the region ends.
    pub fn uninterruptible(&self) -> Self {
        let this = self.clone();
        Effect::from_run(move |env, ctx| this.run_in(env, ctx.uninterruptible()))
    }

    /// Run `self` with interruption enabled, even inside an uninterruptible
    /// region.
    pub fn interruptible(&self) -> Self {
        let this = self.clone();
        Effect::from_run(move |env, ctx| this.run_in(env, ctx.interruptible()))
    }

    /// Supply the environment, producing an effect that needs any other one.
    pub fn provide<Env2>(&self, env: Env) -> Effect<T, E, Env2>
    where
        Env2: Clone + Send + Sync + 'static,
    {
        let this = self.clone();
        Effect::from_run(move |_, ctx| this.run_in(env.clone(), ctx))
    }

    /// Derive this effect's environment from an outer one.
    pub fn provide_with<Env2, F>(&self, f: F) -> Effect<T, E, Env2>
    where
        Env2: Clone + Send + Sync + 'static,
        F: Fn(&Env2) -> Env + Send + Sync + 'static,
    {
        let this = self.clone();
        Effect::from_run(move |outer, ctx| match catch_panic(|| f(&outer)) {
            Ok(env) => this.run_in(env, ctx),
            Err(defect) => async move { Exit::die(defect) }.boxed(),
        })
    }

    /// Give up after `duration`, yielding `None`.
    ///
    /// On the deadline the effect is interrupted and awaited until it has
    /// wound down, so its finalizers have run before `None` is returned.
    pub fn timeout(&self, duration: Duration) -> Effect<Option<T>, E, Env> {
        let this = self.clone();
        Effect::from_run(move |env, ctx| {
            let child = ctx.child();
            let run = this.run_in(env, child.clone());
            async move {
                match future::select(run, Box::pin(tokio::time::sleep(duration))).await {
                    Either::Left((exit, _)) => exit.map(Some),
                    Either::Right(((), run)) => {
                        child.interrupt();
                        tracing::debug!(?duration, "effect timed out");
                        match run.await {
                            Exit::Failure(cause) if !cause.is_interrupted_only() => {
                                Exit::Failure(cause)
                            }
                            _ => Exit::Success(None),
                        }
                    }
                }
            }
            .boxed()
        })
    }

    /// Run the effect inside a tracing span.
    pub fn instrument(&self, span: tracing::Span) -> Self {
        let this = self.clone();
        Effect::from_run(move |env, ctx| this.run_in(env, ctx).instrument(span.clone()).boxed())
    }
}
