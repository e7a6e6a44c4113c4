//! Running two effects at once.
//!
//! Both branches run inside the current task and each gets its own interrupt
//! signal linked below the caller's. The first branch to fail interrupts its
//! sibling; the result keeps the genuine failure rather than the interruption
//! it caused.

use futures::FutureExt;

use crate::effect::{BoxFuture, Effect, FiberContext};
use crate::exit::{Cause, Exit};

/// Run two branches concurrently and pair their results.
pub(crate) async fn par_exits<A, B, E, L, R>(ctx: &FiberContext, left: L, right: R) -> Exit<(A, B), E>
where
    L: FnOnce(FiberContext) -> BoxFuture<'static, Exit<A, E>>,
    R: FnOnce(FiberContext) -> BoxFuture<'static, Exit<B, E>>,
{
    let left_ctx = ctx.child();
    let right_ctx = ctx.child();
    let (interrupt_right, interrupt_left) = (right_ctx.clone(), left_ctx.clone());

    let left_run = left(left_ctx);
    let right_run = right(right_ctx);

    let left = async move {
        let exit = left_run.await;
        if exit.is_failure() {
            interrupt_right.interrupt();
        }
        exit
    };
    let right = async move {
        let exit = right_run.await;
        if exit.is_failure() {
            interrupt_left.interrupt();
        }
        exit
    };

    let (left, right) = futures::future::join(left, right).await;
    combine(left, right)
}

fn combine<A, B, E>(left: Exit<A, E>, right: Exit<B, E>) -> Exit<(A, B), E> {
    match (left, right) {
        (Exit::Success(a), Exit::Success(b)) => Exit::Success((a, b)),
        (Exit::Failure(cause), Exit::Success(_)) | (Exit::Success(_), Exit::Failure(cause)) => {
            Exit::Failure(cause)
        }
        (Exit::Failure(l), Exit::Failure(r)) => {
            match (l.is_interrupted_only(), r.is_interrupted_only()) {
                (true, true) => Exit::Failure(Cause::Interrupt),
                (true, false) => Exit::Failure(r),
                (false, true) => Exit::Failure(l),
                (false, false) => Exit::Failure(l.both(r)),
            }
        }
    }
}

impl<T, E, Env> Effect<T, E, Env>
where
    T: Send + 'static,
    E: Send + 'static,
    Env: Clone + Send + Sync + 'static,
{
    /// Run `self` and `other` concurrently and pair their results.
    ///
    /// If either fails the other is interrupted. Two independent failures are
    /// reported together as [`Cause::Both`].
    ///
    /// ```rust
    /// use reservoir::Effect;
    /// use std::time::Duration;
    ///
    /// # tokio_test::block_on(async {
    /// let slow = Effect::<(), String>::sleep(Duration::from_millis(5)).map(|_| 1);
    /// let fast = Effect::<i32, String>::pure(2);
    /// assert_eq!(slow.zip_par(fast).run(&()).await, Ok((1, 2)));
    /// # });
    /// ```
    pub fn zip_par<U>(&self, other: Effect<U, E, Env>) -> Effect<(T, U), E, Env>
    where
        U: Send + 'static,
    {
        let this = self.clone();
        Effect::from_run(move |env: Env, ctx: FiberContext| {
            let (this, other) = (this.clone(), other.clone());
            async move {
                let right_env = env.clone();
                par_exits(
                    &ctx,
                    move |c| this.run_in(env, c),
                    move |c| other.run_in(right_env, c),
                )
                .await
            }
            .boxed()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit::Defect;

    #[test]
    fn induced_interruption_never_masks_the_real_failure() {
        let l: Exit<(), &str> = Exit::fail("boom");
        let r: Exit<(), &str> = Exit::interrupt();
        assert_eq!(combine(l, r), Exit::fail("boom"));
    }

    #[test]
    fn independent_failures_are_reported_together() {
        let l: Exit<(), &str> = Exit::fail("a");
        let r: Exit<(), &str> = Exit::die(Defect::new("b"));
        let cause = combine(l, r).cause().cloned().unwrap();
        assert!(matches!(cause, Cause::Both(_, _)));
    }
}
