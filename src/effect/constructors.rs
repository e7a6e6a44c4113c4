//! Ways to create effects.

use std::future::Future;
use std::time::Duration;

use futures::FutureExt;

use crate::effect::{catch_panic, catch_panic_async, Effect};
use crate::exit::{Defect, Exit};

impl<T, E, Env> Effect<T, E, Env>
where
    T: Send + 'static,
    E: Send + 'static,
    Env: Clone + Send + Sync + 'static,
{
    /// An effect that always succeeds with `value`.
    pub fn pure(value: T) -> Self
    where
        T: Clone + Sync,
    {
        Effect::from_run(move |_, _| {
            let value = value.clone();
            async move { Exit::Success(value) }.boxed()
        })
    }

    /// An effect that always fails with `error`.
    pub fn fail(error: E) -> Self
    where
        E: Clone + Sync,
    {
        Effect::from_run(move |_, _| {
            let error = error.clone();
            async move { Exit::fail(error) }.boxed()
        })
    }

    /// An effect that always dies with `defect`.
    pub fn die(defect: Defect) -> Self {
        Effect::from_run(move |_, _| {
            let defect = defect.clone();
            async move { Exit::die(defect) }.boxed()
        })
    }

    /// An effect that dies with a message.
    pub fn die_message(message: impl Into<String>) -> Self {
        Effect::die(Defect::new(message))
    }

    /// An effect that is interrupted as soon as it runs.
    pub fn interrupt() -> Self {
        Effect::from_run(|_, _| async { Exit::interrupt() }.boxed())
    }

    /// An effect replaying a fixed result.
    pub fn from_result(result: Result<T, E>) -> Self
    where
        T: Clone + Sync,
        E: Clone + Sync,
    {
        Effect::from_exit(Exit::from_result(result))
    }

    /// An effect replaying a fixed exit.
    pub fn from_exit(exit: Exit<T, E>) -> Self
    where
        T: Clone + Sync,
        E: Clone + Sync,
    {
        Effect::from_run(move |_, _| {
            let exit = exit.clone();
            async move { exit }.boxed()
        })
    }

    /// A synchronous computation over the environment.
    ///
    /// Panics inside `f` become defects.
    ///
    /// ```rust
    /// use reservoir::Effect;
    ///
    /// # tokio_test::block_on(async {
    /// let parse = Effect::<i32, String, String>::from_fn(|s: &String| {
    ///     s.parse::<i32>().map_err(|e| e.to_string())
    /// });
    /// assert_eq!(parse.run(&"7".to_string()).await, Ok(7));
    /// # });
    /// ```
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&Env) -> Result<T, E> + Send + Sync + 'static,
    {
        Effect::from_exit_fn(move |env| Exit::from_result(f(env)))
    }

    /// A synchronous computation that produces a full exit.
    pub fn from_exit_fn<F>(f: F) -> Self
    where
        F: Fn(&Env) -> Exit<T, E> + Send + Sync + 'static,
    {
        let f = std::sync::Arc::new(f);
        Effect::from_run(move |env, ctx| {
            let f = std::sync::Arc::clone(&f);
            async move {
                if ctx.should_interrupt() {
                    return Exit::interrupt();
                }
                match catch_panic(|| f(&env)) {
                    Ok(exit) => exit,
                    Err(defect) => Exit::die(defect),
                }
            }
            .boxed()
        })
    }

    /// An async computation over the environment.
    ///
    /// The future is abandoned if the fiber is interrupted while it runs in an
    /// interruptible region.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(&Env) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let f = std::sync::Arc::new(f);
        Effect::from_run(move |env, ctx| {
            let f = std::sync::Arc::clone(&f);
            async move {
                let fut = match catch_panic(|| f(&env)) {
                    Ok(fut) => fut,
                    Err(defect) => return Exit::die(defect),
                };
                ctx.guard(catch_panic_async(fut.map(Exit::from_result)))
                    .await
            }
            .boxed()
        })
    }

    /// Read a value out of the environment.
    pub fn asks<F>(f: F) -> Self
    where
        F: Fn(&Env) -> T + Send + Sync + 'static,
    {
        Effect::from_exit_fn(move |env| Exit::Success(f(env)))
    }

    /// Build the effect lazily, each time it runs.
    pub fn suspend<F>(f: F) -> Self
    where
        F: Fn() -> Effect<T, E, Env> + Send + Sync + 'static,
    {
        Effect::from_run(move |env, ctx| match catch_panic(&f) {
            Ok(effect) => effect.run_in(env, ctx),
            Err(defect) => async move { Exit::die(defect) }.boxed(),
        })
    }

    /// An effect that never completes unless interrupted.
    pub fn never() -> Self {
        Effect::from_run(|_, ctx| {
            async move { ctx.guard(futures::future::pending()).await }.boxed()
        })
    }
}

impl<E, Env> Effect<(), E, Env>
where
    E: Send + 'static,
    Env: Clone + Send + Sync + 'static,
{
    /// An effect that succeeds with `()`.
    pub fn unit() -> Self {
        Effect::from_run(|_, _| async { Exit::Success(()) }.boxed())
    }

    /// Sleep for `duration`. Interruptible.
    pub fn sleep(duration: Duration) -> Self {
        Effect::from_run(move |_, ctx| {
            async move {
                ctx.guard(async move {
                    tokio::time::sleep(duration).await;
                    Exit::Success(())
                })
                .await
            }
            .boxed()
        })
    }
}
