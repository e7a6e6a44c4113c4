//! Sequencing, parallel composition and finalizer hooks for [`Managed`].
//!
//! Sequenced resources are released in reverse acquisition order; parallel
//! ones are released concurrently.

use std::convert::Infallible;
use std::sync::Arc;

use futures::FutureExt;

use crate::effect::{catch_panic, par_exits, Effect, FiberContext};
use crate::exit::{Cause, Exit, ExitStatus};
use crate::managed::{close_scope, finalizer_from, run_finalizer, ExecutionOrder, Managed, ReleaseMap};

impl<A, E, Env> Managed<A, E, Env>
where
    A: Send + 'static,
    E: Send + 'static,
    Env: Clone + Send + Sync + 'static,
{
    /// Transform the resource.
    pub fn map<B, F>(&self, f: F) -> Managed<B, E, Env>
    where
        B: Send + 'static,
        F: Fn(A) -> B + Send + Sync + 'static,
    {
        let this = self.clone();
        let f = Arc::new(f);
        Managed::from_run(move |env, ctx, scope| {
            let f = Arc::clone(&f);
            let run = this.run_in(env, ctx, scope);
            async move {
                match run.await {
                    Exit::Success(resource) => match catch_panic(|| f(resource)) {
                        Ok(mapped) => Exit::Success(mapped),
                        Err(defect) => Exit::die(defect),
                    },
                    Exit::Failure(cause) => Exit::Failure(cause),
                }
            }
            .boxed()
        })
    }

    /// Transform the typed acquisition failure.
    pub fn map_err<E2, F>(&self, f: F) -> Managed<A, E2, Env>
    where
        E2: Send + 'static,
        F: Fn(E) -> E2 + Send + Sync + 'static,
    {
        let this = self.clone();
        let f = Arc::new(f);
        Managed::from_run(move |env, ctx, scope| {
            let f = Arc::clone(&f);
            let run = this.run_in(env, ctx, scope);
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

    /// Acquire `self`, then the resource `f` builds from it.
    ///
    /// Release happens in reverse: the second resource first. If the second
    /// acquisition fails, the first is still released.
    pub fn and_then<B, F>(&self, f: F) -> Managed<B, E, Env>
    where
        B: Send + 'static,
        F: Fn(A) -> Managed<B, E, Env> + Send + Sync + 'static,
    {
        let this = self.clone();
        let f = Arc::new(f);
        Managed::from_run(move |env: Env, ctx: FiberContext, scope: ReleaseMap| {
            let (this, f) = (this.clone(), Arc::clone(&f));
            async move {
                let resource = match this.run_in(env.clone(), ctx.clone(), scope.clone()).await {
                    Exit::Success(resource) => resource,
                    Exit::Failure(cause) => return Exit::Failure(cause),
                };
                if ctx.should_interrupt() {
                    return Exit::interrupt();
                }
                match catch_panic(|| f(resource)) {
                    Ok(next) => next.run_in(env, ctx, scope).await,
                    Err(defect) => Exit::die(defect),
                }
            }
            .boxed()
        })
    }

    /// Acquire `self` then `other`, pairing them.
    pub fn zip<B>(&self, other: Managed<B, E, Env>) -> Managed<(A, B), E, Env>
    where
        B: Send + 'static,
    {
        self.zip_with(other, |a, b| (a, b))
    }

    /// Acquire `self` then `other`, combining them with `f`.
    pub fn zip_with<B, C, F>(&self, other: Managed<B, E, Env>, f: F) -> Managed<C, E, Env>
    where
        B: Send + 'static,
        C: Send + 'static,
        F: Fn(A, B) -> C + Send + Sync + 'static,
    {
        let this = self.clone();
        let f = Arc::new(f);
        Managed::from_run(move |env: Env, ctx: FiberContext, scope: ReleaseMap| {
            let (this, other, f) = (this.clone(), other.clone(), Arc::clone(&f));
            async move {
                let left = match this.run_in(env.clone(), ctx.clone(), scope.clone()).await {
                    Exit::Success(resource) => resource,
                    Exit::Failure(cause) => return Exit::Failure(cause),
                };
                if ctx.should_interrupt() {
                    return Exit::interrupt();
                }
                match other.run_in(env, ctx, scope).await {
                    Exit::Success(right) => match catch_panic(|| f(left, right)) {
                        Ok(combined) => Exit::Success(combined),
                        Err(defect) => Exit::die(defect),
                    },
                    Exit::Failure(cause) => Exit::Failure(cause),
                }
            }
            .boxed()
        })
    }

    /// Acquire `self` and `other` concurrently.
    ///
    /// If one side fails the other is interrupted. Both sides keep their own
    /// scope; at release the two scopes are closed concurrently. The reported
    /// cause is the real failure, never the interruption it induced in the
    /// sibling.
    pub fn zip_par<B>(&self, other: Managed<B, E, Env>) -> Managed<(A, B), E, Env>
    where
        B: Send + 'static,
    {
        self.zip_par_with(other, |a, b| (a, b))
    }

    /// Concurrent [`zip_with`](Self::zip_with).
    pub fn zip_par_with<B, C, F>(&self, other: Managed<B, E, Env>, f: F) -> Managed<C, E, Env>
    where
        B: Send + 'static,
        C: Send + 'static,
        F: Fn(A, B) -> C + Send + Sync + 'static,
    {
        let this = self.clone();
        let f = Arc::new(f);
        Managed::from_run(move |env: Env, ctx: FiberContext, scope: ReleaseMap| {
            let (this, other, f) = (this.clone(), other.clone(), Arc::clone(&f));
            async move {
                let left_scope = ReleaseMap::new();
                let right_scope = ReleaseMap::new();
                let (left_close, right_close) = (left_scope.clone(), right_scope.clone());
                scope
                    .add(Box::new(move |status: ExitStatus| {
                        async move {
                            let (left, right) = futures::future::join(
                                left_close.release_all(status, ExecutionOrder::Sequential),
                                right_close.release_all(status, ExecutionOrder::Sequential),
                            )
                            .await;
                            left.both_finalizer(right)
                        }
                        .boxed()
                    }))
                    .await;

                let right_env = env.clone();
                let exit = par_exits(
                    &ctx,
                    move |c| this.run_in(env, c, left_scope),
                    move |c| other.run_in(right_env, c, right_scope),
                )
                .await;
                match exit {
                    Exit::Success((a, b)) => match catch_panic(|| f(a, b)) {
                        Ok(combined) => Exit::Success(combined),
                        Err(defect) => Exit::die(defect),
                    },
                    Exit::Failure(cause) => Exit::Failure(cause),
                }
            }
            .boxed()
        })
    }

    /// Run `finalizer` when the scope closes, after this resource's own
    /// release.
    pub fn ensuring(&self, finalizer: Effect<(), Infallible, Env>) -> Self {
        self.on_exit(move |_| finalizer.clone())
    }

    /// Run the effect `f` builds from the scope's exit status when the scope
    /// closes, after this resource's own release.
    ///
    /// The action runs even if this resource fails to acquire or its own
    /// release dies.
    pub fn on_exit<F>(&self, f: F) -> Self
    where
        F: Fn(ExitStatus) -> Effect<(), Infallible, Env> + Send + Sync + 'static,
    {
        let this = self.clone();
        let f = Arc::new(f);
        Managed::from_run(move |env: Env, ctx: FiberContext, scope: ReleaseMap| {
            let (this, f) = (this.clone(), Arc::clone(&f));
            async move {
                let inner = ReleaseMap::new();
                let inner_close = inner.clone();
                let cleanup = finalizer_from(env.clone(), &ctx, move |status| f(status));
                scope
                    .add(Box::new(move |status: ExitStatus| {
                        async move {
                            let released = inner_close
                                .release_all(status, ExecutionOrder::Sequential)
                                .await;
                            released.then_finalizer(run_finalizer(cleanup, status).await)
                        }
                        .boxed()
                    }))
                    .await;
                this.run_in(env, ctx, inner).await
            }
            .boxed()
        })
    }

    /// Fall back to another resource after a typed acquisition failure.
    ///
    /// Whatever the failed attempt had reserved is released before the
    /// fallback starts. Defects and interruptions are not recovered.
    pub fn or_else<E2, F>(&self, f: F) -> Managed<A, E2, Env>
    where
        E2: Send + 'static,
        F: Fn(E) -> Managed<A, E2, Env> + Send + Sync + 'static,
    {
        let this = self.clone();
        let f = Arc::new(f);
        Managed::from_run(move |env: Env, ctx: FiberContext, scope: ReleaseMap| {
            let (this, f) = (this.clone(), Arc::clone(&f));
            async move {
                let attempt = ReleaseMap::new();
                let cause = match this.run_in(env.clone(), ctx.clone(), attempt.clone()).await {
                    Exit::Success(resource) => {
                        scope.add(close_scope(attempt)).await;
                        return Exit::Success(resource);
                    }
                    Exit::Failure(cause) => cause,
                };
                let released = attempt
                    .release_all(cause.status(), ExecutionOrder::Sequential)
                    .await;
                match (cause.into_failure(), released) {
                    (Ok(error), Exit::Success(())) => match catch_panic(|| f(error)) {
                        Ok(fallback) => fallback.run_in(env, ctx, scope).await,
                        Err(defect) => Exit::die(defect),
                    },
                    (Ok(_), Exit::Failure(release_cause)) => Exit::Failure(release_cause.widen()),
                    (Err(cause), released) => {
                        Exit::Failure(cause.strip_failures().unwrap_or(Cause::Interrupt))
                            .and_finalizer(released)
                    }
                }
            }
            .boxed()
        })
    }
}

