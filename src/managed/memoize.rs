//! Sharing one acquisition between every use of a resource.

use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::OnceCell;

use crate::effect::FiberContext;
use crate::exit::Exit;
use crate::managed::{Managed, ReleaseMap};

impl<A, E, Env> Managed<A, E, Env>
where
    A: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    Env: Clone + Send + Sync + 'static,
{
    /// Share one acquisition across many uses.
    ///
    /// Using the outer `Managed` yields a handle. The first use of the handle
    /// acquires the resource; every later use, concurrent or not, sees the
    /// same outcome, success or failure. The resource is released once, when
    /// the outer scope closes. If the handle is never used, nothing is
    /// acquired.
    ///
    /// ```rust
    /// use reservoir::{Effect, Managed};
    /// use std::sync::atomic::{AtomicU32, Ordering};
    /// use std::sync::Arc;
    ///
    /// # tokio_test::block_on(async {
    /// let opened = Arc::new(AtomicU32::new(0));
    /// let counter = opened.clone();
    /// let pool = Managed::make(
    ///     Effect::<u32, String>::from_fn(move |_| Ok(counter.fetch_add(1, Ordering::SeqCst))),
    ///     |_| Effect::unit(),
    /// );
    ///
    /// let program = pool.memoize().with(|handle| {
    ///     handle.use_now().zip(handle.use_now())
    /// });
    /// assert_eq!(program.run(&()).await, Ok((0, 0)));
    /// assert_eq!(opened.load(Ordering::SeqCst), 1);
    /// # });
    /// ```
    pub fn memoize(&self) -> Managed<Managed<A, E, Env>, E, Env> {
        let this = self.clone();
        Managed::from_run(move |env: Env, _: FiberContext, outer_scope: ReleaseMap| {
            let this = this.clone();
            let cell: Arc<OnceCell<Exit<A, E>>> = Arc::new(OnceCell::new());
            let handle = Managed::from_run(move |_, ctx, _| {
                let (this, cell, env, outer_scope) = (
                    this.clone(),
                    Arc::clone(&cell),
                    env.clone(),
                    outer_scope.clone(),
                );
                async move {
                    cell.get_or_init(|| {
                        tracing::trace!(
                            resource = std::any::type_name::<A>(),
                            "acquiring memoized resource"
                        );
                        this.run_in(env, ctx, outer_scope)
                    })
                    .await
                    .clone()
                }
                .boxed()
            });
            async move { Exit::Success(handle) }.boxed()
        })
    }
}
