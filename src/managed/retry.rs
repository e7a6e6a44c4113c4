//! Retrying and timing out resource acquisition.

use std::time::Duration;

use futures::future::{self, Either};
use futures::FutureExt;

use crate::effect::FiberContext;
use crate::exit::{Cause, Exit, ExitStatus};
use crate::managed::{close_scope, ExecutionOrder, Managed, ReleaseMap};
use crate::retry::{RetryExhausted, RetryPolicy};

impl<A, E, Env> Managed<A, E, Env>
where
    A: Send + 'static,
    E: Send + 'static,
    Env: Clone + Send + Sync + 'static,
{
    /// Re-run the whole reserve-then-acquire cycle after typed failures.
    ///
    /// Each attempt gets its own scope, released before the next attempt
    /// starts. One schedule spans all attempts. Defects and interruptions
    /// are never retried, nor is an attempt whose release died.
    pub fn retry(&self, policy: RetryPolicy) -> Managed<A, RetryExhausted<E>, Env> {
        let this = self.clone();
        Managed::from_run(move |env: Env, ctx: FiberContext, scope: ReleaseMap| {
            let (this, policy) = (this.clone(), policy.clone());
            async move {
                let mut schedule = policy.schedule();
                loop {
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
                    let error = match (cause.into_failure(), released) {
                        (Ok(error), Exit::Success(())) => error,
                        (Ok(_), Exit::Failure(release_cause)) => {
                            return Exit::Failure(release_cause.widen())
                        }
                        (Err(cause), released) => {
                            return Exit::Failure(cause.strip_failures().unwrap_or(Cause::Interrupt))
                                .and_finalizer(released)
                        }
                    };
                    let Some(delay) = schedule.next_delay() else {
                        return Exit::fail(RetryExhausted::new(
                            error,
                            schedule.attempts(),
                            schedule.elapsed(),
                        ));
                    };
                    tracing::debug!(attempt = schedule.attempts(), ?delay, "retrying resource acquisition");
                    let slept: Exit<(), RetryExhausted<E>> = ctx
                        .guard(async move {
                            tokio::time::sleep(delay).await;
                            Exit::Success(())
                        })
                        .await;
                    if slept.is_failure() {
                        return Exit::interrupt();
                    }
                }
            }
            .boxed()
        })
    }

    /// Give up acquiring after `duration`, yielding `None`.
    ///
    /// On the deadline the acquisition is interrupted and whatever it had
    /// reserved is released before `None` is produced.
    pub fn timeout(&self, duration: Duration) -> Managed<Option<A>, E, Env> {
        let this = self.clone();
        Managed::from_run(move |env, ctx, scope| {
            let this = this.clone();
            async move {
                let inner = ReleaseMap::new();
                scope.add(close_scope(inner.clone())).await;
                let child = ctx.child();
                let run = this.run_in(env, child.clone(), inner.clone());
                match future::select(run, Box::pin(tokio::time::sleep(duration))).await {
                    Either::Left((exit, _)) => exit.map(Some),
                    Either::Right(((), run)) => {
                        child.interrupt();
                        tracing::debug!(?duration, "resource acquisition timed out");
                        let exit = run.await;
                        let released = inner
                            .release_all(ExitStatus::Interrupted, ExecutionOrder::Sequential)
                            .await;
                        match exit {
                            Exit::Failure(cause) if !cause.is_interrupted_only() => {
                                Exit::Failure(cause).and_finalizer(released)
                            }
                            _ => match released {
                                Exit::Success(()) => Exit::Success(None),
                                Exit::Failure(cause) => Exit::Failure(cause.widen()),
                            },
                        }
                    }
                }
            }
            .boxed()
        })
    }
}
