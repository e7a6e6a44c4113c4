//! Retrying effects under a [`RetryPolicy`].

use std::sync::Arc;

use futures::FutureExt;

use crate::effect::{Effect, FiberContext};
use crate::exit::{Cause, Exit};
use crate::retry::{RetryExhausted, RetryPolicy};

impl<T, E, Env> Effect<T, E, Env>
where
    T: Send + 'static,
    E: Send + 'static,
    Env: Clone + Send + Sync + 'static,
{
    /// Re-run the effect after typed failures, following `policy`.
    ///
    /// Defects and interruptions are never retried. When the policy gives up,
    /// the last failure is wrapped in [`RetryExhausted`].
    pub fn retry(&self, policy: RetryPolicy) -> Effect<T, RetryExhausted<E>, Env> {
        self.retry_if(policy, |_| true)
    }

    /// Like [`retry`](Self::retry), but only for failures `should_retry` accepts.
    pub fn retry_if<P>(&self, policy: RetryPolicy, should_retry: P) -> Effect<T, RetryExhausted<E>, Env>
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        let this = self.clone();
        let should_retry = Arc::new(should_retry);
        Effect::from_run(move |env: Env, ctx: FiberContext| {
            let (this, policy, should_retry) = (this.clone(), policy.clone(), Arc::clone(&should_retry));
            async move {
                let mut schedule = policy.schedule();
                loop {
                    let cause = match this.run_in(env.clone(), ctx.clone()).await {
                        Exit::Success(value) => return Exit::Success(value),
                        Exit::Failure(cause) => cause,
                    };
                    let error = match cause.into_failure() {
                        Ok(error) => error,
                        Err(cause) => {
                            return Exit::Failure(cause.strip_failures().unwrap_or(Cause::Interrupt))
                        }
                    };
                    let delay = if should_retry(&error) {
                        schedule.next_delay()
                    } else {
                        None
                    };
                    let Some(delay) = delay else {
                        return Exit::fail(RetryExhausted::new(
                            error,
                            schedule.attempts(),
                            schedule.elapsed(),
                        ));
                    };
                    tracing::debug!(attempt = schedule.attempts(), ?delay, "retrying effect");
                    let slept: Exit<(), E> = ctx
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
}
