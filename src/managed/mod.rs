//! Scoped resources with guaranteed release.
//!
//! A [`Managed<A, E, Env>`] describes how to obtain a resource of type `A` and
//! how to give it back. Nothing happens until the description is *used*:
//!
//! ```rust
//! use reservoir::{Effect, Managed};
//! use std::sync::{Arc, Mutex};
//!
//! # tokio_test::block_on(async {
//! let log = Arc::new(Mutex::new(Vec::new()));
//! let (open_log, close_log) = (log.clone(), log.clone());
//!
//! let connection = Managed::make(
//!     Effect::<&str, String>::from_fn(move |_| {
//!         open_log.lock().unwrap().push("open");
//!         Ok("conn")
//!     }),
//!     move |_conn| {
//!         let close_log = close_log.clone();
//!         Effect::from_fn(move |_| {
//!             close_log.lock().unwrap().push("close");
//!             Ok(())
//!         })
//!     },
//! );
//!
//! let result = connection
//!     .with(|conn| Effect::pure(conn.len()))
//!     .run(&())
//!     .await;
//!
//! assert_eq!(result, Ok(4));
//! assert_eq!(*log.lock().unwrap(), vec!["open", "close"]);
//! # });
//! ```
//!
//! # Guarantees
//!
//! - Acquisition through [`Managed::make`] runs uninterruptibly, and the release
//!   action is registered in the same step, so a successfully acquired resource
//!   always has its release run exactly once.
//! - Resources acquired in sequence are released in reverse order, even when
//!   a later acquisition fails.
//! - Release actions run uninterruptibly. A release that dies does not stop
//!   the others; its defect is reported after the primary cause.
//!
//! Each use of a `Managed` runs a full acquire/release cycle. Use
//! [`Managed::memoize`] to share one acquisition.
//!
//! # Scopes
//!
//! Every use opens a [`ReleaseMap`], the finalizer registry of that scope.
//! Composite operators open child maps and register a single finalizer that
//! closes the child in the parent, which is how parallel composition, retries
//! and early release keep their own release order.

mod combinators;
mod memoize;
mod release_map;
mod retry;
mod scope;


use std::convert::Infallible;
use std::sync::Arc;

use futures::FutureExt;

use crate::effect::{catch_panic, BoxFuture, Effect, FiberContext};
use crate::exit::{Exit, ExitStatus};

pub use release_map::{ExecutionOrder, Finalizer, ReleaseKey, ReleaseMap};
pub use scope::{EarlyRelease, ManagedScope, PreallocationScope, ScopeCloser, Switcher};

pub(crate) use release_map::run_finalizer;

type RunFn<A, E, Env> =
    dyn Fn(Env, FiberContext, ReleaseMap) -> BoxFuture<'static, Exit<A, E>> + Send + Sync;

/// A resource together with the knowledge of how to release it.
///
/// See the [module documentation](self).
pub struct Managed<A, E = Infallible, Env = ()> {
    run_fn: Arc<RunFn<A, E, Env>>,
}

impl<A, E, Env> Clone for Managed<A, E, Env> {
    fn clone(&self) -> Self {
        Managed {
            run_fn: Arc::clone(&self.run_fn),
        }
    }
}

impl<A, E, Env> std::fmt::Debug for Managed<A, E, Env> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Managed")
            .field("resource", &std::any::type_name::<A>())
            .field("error", &std::any::type_name::<E>())
            .finish()
    }
}

/// A release obligation paired with the acquisition it guards.
///
/// Used with [`Managed::reserve`]. Once the reservation exists, `release` is
/// guaranteed to run exactly once, whether or not `acquire` succeeds.
pub struct Reservation<A, E = Infallible, Env = ()> {
    acquire: Effect<A, E, Env>,
    release: Arc<dyn Fn(ExitStatus) -> Effect<(), Infallible, Env> + Send + Sync>,
}

impl<A, E, Env> Clone for Reservation<A, E, Env> {
    fn clone(&self) -> Self {
        Reservation {
            acquire: self.acquire.clone(),
            release: Arc::clone(&self.release),
        }
    }
}

impl<A, E, Env> std::fmt::Debug for Reservation<A, E, Env> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("acquire", &self.acquire)
            .field("release", &"<function>")
            .finish()
    }
}

impl<A, E, Env> Reservation<A, E, Env> {
    /// Pair an acquisition with its release.
    pub fn new<R>(acquire: Effect<A, E, Env>, release: R) -> Self
    where
        R: Fn(ExitStatus) -> Effect<(), Infallible, Env> + Send + Sync + 'static,
    {
        Reservation {
            acquire,
            release: Arc::new(release),
        }
    }
}

/// Build a finalizer that runs the effect `f` produces, uninterruptibly.
pub(crate) fn finalizer_from<Env, F>(env: Env, ctx: &FiberContext, f: F) -> Finalizer
where
    Env: Clone + Send + Sync + 'static,
    F: FnOnce(ExitStatus) -> Effect<(), Infallible, Env> + Send + 'static,
{
    let ctx = ctx.uninterruptible();
    Box::new(move |status: ExitStatus| match catch_panic(|| f(status)) {
        Ok(effect) => effect.run_in(env, ctx),
        Err(defect) => async move { Exit::die(defect) }.boxed(),
    })
}

/// A finalizer that closes a child scope.
pub(crate) fn close_scope(child: ReleaseMap) -> Finalizer {
    Box::new(move |status: ExitStatus| {
        async move { child.release_all(status, ExecutionOrder::Sequential).await }.boxed()
    })
}

impl<A, E, Env> Managed<A, E, Env>
where
    A: Send + 'static,
    E: Send + 'static,
    Env: Clone + Send + Sync + 'static,
{
    pub(crate) fn from_run<F>(f: F) -> Self
    where
        F: Fn(Env, FiberContext, ReleaseMap) -> BoxFuture<'static, Exit<A, E>>
            + Send
            + Sync
            + 'static,
    {
        Managed {
            run_fn: Arc::new(f),
        }
    }

    /// Reserve and acquire the resource into `scope`.
    pub(crate) fn run_in(
        &self,
        env: Env,
        ctx: FiberContext,
        scope: ReleaseMap,
    ) -> BoxFuture<'static, Exit<A, E>> {
        match catch_panic(|| (self.run_fn)(env, ctx, scope)) {
            Ok(fut) => fut,
            Err(defect) => async move { Exit::die(defect) }.boxed(),
        }
    }

    /// Acquire with `acquire` and release with `release`.
    ///
    /// `acquire` runs uninterruptibly; on success `release` is registered
    /// before anything else can happen.
    pub fn make<R>(acquire: Effect<A, E, Env>, release: R) -> Self
    where
        A: Clone,
        R: Fn(A) -> Effect<(), Infallible, Env> + Send + Sync + 'static,
    {
        Managed::make_exit(acquire, move |resource, _| release(resource))
    }

    /// Like [`make`](Self::make), but `release` also sees how the scope ended.
    pub fn make_exit<R>(acquire: Effect<A, E, Env>, release: R) -> Self
    where
        A: Clone,
        R: Fn(A, ExitStatus) -> Effect<(), Infallible, Env> + Send + Sync + 'static,
    {
        let release = Arc::new(release);
        Managed::from_run(move |env: Env, ctx: FiberContext, scope: ReleaseMap| {
            let (acquire, release) = (acquire.clone(), Arc::clone(&release));
            async move {
                let resource = match acquire.run_in(env.clone(), ctx.uninterruptible()).await {
                    Exit::Success(resource) => resource,
                    Exit::Failure(cause) => return Exit::Failure(cause),
                };
                let kept = resource.clone();
                scope
                    .add(finalizer_from(env, &ctx, move |status| release(kept, status)))
                    .await;
                tracing::trace!(resource = std::any::type_name::<A>(), "acquired");
                Exit::Success(resource)
            }
            .boxed()
        })
    }

    /// Build from an effect producing a [`Reservation`].
    ///
    /// The reservation effect runs uninterruptibly and its release is
    /// registered before the embedded acquisition starts. The acquisition runs
    /// with whatever interruptibility the caller has, so it may be interrupted;
    /// the release still runs.
    pub fn reserve(reservation: Effect<Reservation<A, E, Env>, E, Env>) -> Self {
        Managed::from_run(move |env: Env, ctx: FiberContext, scope: ReleaseMap| {
            let reservation = reservation.clone();
            async move {
                let Reservation { acquire, release } =
                    match reservation.run_in(env.clone(), ctx.uninterruptible()).await {
                        Exit::Success(reservation) => reservation,
                        Exit::Failure(cause) => return Exit::Failure(cause),
                    };
                scope
                    .add(finalizer_from(env.clone(), &ctx, move |status| release(status)))
                    .await;
                acquire.run_in(env, ctx).await
            }
            .boxed()
        })
    }

    /// A resource with no release action.
    pub fn from_effect(effect: Effect<A, E, Env>) -> Self {
        Managed::from_run(move |env, ctx, _| effect.run_in(env, ctx))
    }

    /// A ready resource with no release action.
    pub fn succeed(resource: A) -> Self
    where
        A: Clone + Sync,
    {
        Managed::from_effect(Effect::pure(resource))
    }

    /// A resource that always fails to acquire.
    pub fn fail(error: E) -> Self
    where
        E: Clone + Sync,
    {
        Managed::from_effect(Effect::fail(error))
    }

    /// Acquire, run `f` with the resource, then release.
    ///
    /// The release runs however `f` ends. If both fail, the cause of `f` comes
    /// first and the release failure follows it.
    pub fn with<B, F>(&self, f: F) -> Effect<B, E, Env>
    where
        B: Send + 'static,
        F: Fn(A) -> Effect<B, E, Env> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.use_scoped(move |resource, env, ctx| match catch_panic(|| f(resource)) {
            Ok(body) => body.run_in(env, ctx),
            Err(defect) => async move { Exit::die(defect) }.boxed(),
        })
    }

    /// Acquire and release immediately, yielding the resource.
    ///
    /// Only useful when the resource stays valid after release, such as a
    /// value computed while it was held.
    pub fn use_now(&self) -> Effect<A, E, Env> {
        self.use_scoped(|resource, _, _| async move { Exit::Success(resource) }.boxed())
    }

    /// Acquire, then never release until interrupted.
    pub fn use_forever(&self) -> Effect<A, E, Env> {
        self.use_scoped(|_, env, ctx| Effect::<A, E, Env>::never().run_in(env, ctx))
    }

    fn use_scoped<B, F>(&self, body: F) -> Effect<B, E, Env>
    where
        B: Send + 'static,
        F: Fn(A, Env, FiberContext) -> BoxFuture<'static, Exit<B, E>> + Send + Sync + 'static,
    {
        let this = self.clone();
        let body = Arc::new(body);
        Effect::from_run(move |env: Env, ctx: FiberContext| {
            let (this, body) = (this.clone(), Arc::clone(&body));
            async move {
                let scope = ReleaseMap::new();
                let exit = match this.run_in(env.clone(), ctx.clone(), scope.clone()).await {
                    Exit::Success(_) if ctx.should_interrupt() => Exit::interrupt(),
                    Exit::Success(resource) => body(resource, env, ctx).await,
                    Exit::Failure(cause) => Exit::Failure(cause),
                };
                let released = scope
                    .release_all(exit.status(), ExecutionOrder::Sequential)
                    .await;
                exit.and_finalizer(released)
            }
            .boxed()
        })
    }

    /// Run the resource acquisition inside a tracing span.
    pub fn instrument(&self, span: tracing::Span) -> Self {
        use tracing::Instrument;
        let this = self.clone();
        Managed::from_run(move |env, ctx, scope| {
            this.run_in(env, ctx, scope).instrument(span.clone()).boxed()
        })
    }
}

impl<E, Env> Managed<(), E, Env>
where
    E: Send + 'static,
    Env: Clone + Send + Sync + 'static,
{
    /// A resource whose only job is to run `finalizer` on release.
    pub fn finalizer(finalizer: Effect<(), Infallible, Env>) -> Self {
        Managed::finalizer_exit(move |_| finalizer.clone())
    }

    /// Like [`finalizer`](Self::finalizer), seeing how the scope ended.
    pub fn finalizer_exit<F>(f: F) -> Self
    where
        F: Fn(ExitStatus) -> Effect<(), Infallible, Env> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Managed::from_run(move |env, ctx, scope| {
            let f = Arc::clone(&f);
            async move {
                scope
                    .add(finalizer_from(env, &ctx, move |status| f(status)))
                    .await;
                Exit::Success(())
            }
            .boxed()
        })
    }
}

impl<E, Env> Managed<ReleaseMap, E, Env>
where
    E: Send + 'static,
    Env: Clone + Send + Sync + 'static,
{
    /// The release map of the scope this is used in.
    ///
    /// Finalizers added to it run when that scope closes, in the same LIFO
    /// order as every other resource of the scope.
    pub fn release_map() -> Self {
        Managed::from_run(|_, _, scope| async move { Exit::Success(scope) }.boxed())
    }
}
