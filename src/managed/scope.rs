//! Scopes for allocating resources ahead of use, swapping them, and releasing
//! them early.

use std::convert::Infallible;
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;

use crate::effect::Effect;
use crate::exit::{Defect, Exit, ExitStatus};
use crate::managed::{close_scope, run_finalizer, Finalizer, Managed, ReleaseKey, ReleaseMap};

fn closed_scope<T, E>(what: &str) -> Exit<T, E> {
    Exit::die(Defect::new(format!("{what} used after its scope closed")))
}

fn noop() -> Finalizer {
    Box::new(|_: ExitStatus| async { Exit::Success(()) }.boxed())
}

// ============================================================================
// ManagedScope
// ============================================================================

/// A scope into which resources can be allocated eagerly.
///
/// Each allocation gets its own [`ScopeCloser`] and is released exactly once:
/// by the closer, or when the scope itself closes, whichever comes first.
#[derive(Debug, Clone)]
pub struct ManagedScope {
    release_map: ReleaseMap,
}

/// Releases one allocation made through a [`ManagedScope`].
#[derive(Debug, Clone)]
pub struct ScopeCloser {
    release_map: ReleaseMap,
    key: ReleaseKey,
}

impl<E, Env> Managed<ManagedScope, E, Env>
where
    E: Send + 'static,
    Env: Clone + Send + Sync + 'static,
{
    /// A scope whose allocations are released, at the latest, when this
    /// resource is.
    pub fn scope() -> Self {
        Managed::from_run(|_, _, parent| {
            async move {
                let release_map = ReleaseMap::new();
                parent.add(close_scope(release_map.clone())).await;
                Exit::Success(ManagedScope { release_map })
            }
            .boxed()
        })
    }
}

impl ManagedScope {
    /// Reserve and acquire `managed` now, returning the resource and its
    /// closer.
    ///
    /// If the acquisition fails, whatever it reserved is released before the
    /// failure is returned.
    pub fn allocate<A, E, Env>(&self, managed: &Managed<A, E, Env>) -> Effect<(ScopeCloser, A), E, Env>
    where
        A: Send + 'static,
        E: Send + 'static,
        Env: Clone + Send + Sync + 'static,
    {
        let (release_map, managed) = (self.release_map.clone(), managed.clone());
        Effect::from_run(move |env, ctx| {
            let (release_map, managed) = (release_map.clone(), managed.clone());
            async move {
                let allocation = ReleaseMap::new();
                let Some(key) = release_map.add(close_scope(allocation.clone())).await else {
                    return closed_scope("managed scope");
                };
                match managed.run_in(env, ctx, allocation).await {
                    Exit::Success(resource) => Exit::Success((ScopeCloser { release_map, key }, resource)),
                    Exit::Failure(cause) => {
                        let released = release_map.release(key, cause.status()).await;
                        Exit::Failure(cause).and_finalizer(released)
                    }
                }
            }
            .boxed()
        })
    }
}

impl ScopeCloser {
    /// Release the allocation now, handing its finalizers `status`.
    ///
    /// Closing more than once has no further effect.
    pub fn close<Env>(&self, status: ExitStatus) -> Effect<(), Infallible, Env>
    where
        Env: Clone + Send + Sync + 'static,
    {
        let (release_map, key) = (self.release_map.clone(), self.key);
        Effect::from_run(move |_, _| {
            let release_map = release_map.clone();
            async move { release_map.release(key, status).await }.boxed()
        })
    }
}

// ============================================================================
// Preallocation
// ============================================================================

/// A scope whose allocations are handed out as ready-made resources.
#[derive(Debug, Clone)]
pub struct PreallocationScope {
    release_map: ReleaseMap,
}

impl<E, Env> Managed<PreallocationScope, E, Env>
where
    E: Send + 'static,
    Env: Clone + Send + Sync + 'static,
{
    /// A scope for [`PreallocationScope::preallocate`].
    pub fn preallocation_scope() -> Self {
        Managed::from_run(|_, _, parent| {
            async move {
                let release_map = ReleaseMap::new();
                parent.add(close_scope(release_map.clone())).await;
                Exit::Success(PreallocationScope { release_map })
            }
            .boxed()
        })
    }
}

/// Hand over a finalizer held elsewhere to the scope that uses the resource.
fn transfer<A, E, Env>(resource: A, take: Arc<dyn Fn() -> Option<Finalizer> + Send + Sync>) -> Managed<A, E, Env>
where
    A: Clone + Send + Sync + 'static,
    E: Send + 'static,
    Env: Clone + Send + Sync + 'static,
{
    Managed::from_run(move |_, _, target| {
        let (resource, take) = (resource.clone(), Arc::clone(&take));
        async move {
            if let Some(finalizer) = take() {
                target.add(finalizer).await;
            }
            Exit::Success(resource)
        }
        .boxed()
    })
}

impl PreallocationScope {
    /// Acquire `managed` now and return it as a resource that is already
    /// available.
    ///
    /// The release obligation moves to whichever scope first uses the
    /// returned `Managed`. If it is never used, the allocation is released
    /// when this scope closes.
    pub fn preallocate<A, E, Env>(&self, managed: &Managed<A, E, Env>) -> Effect<Managed<A, E, Env>, E, Env>
    where
        A: Clone + Send + Sync + 'static,
        E: Send + 'static,
        Env: Clone + Send + Sync + 'static,
    {
        let (release_map, managed) = (self.release_map.clone(), managed.clone());
        Effect::from_run(move |env, ctx| {
            let (release_map, managed) = (release_map.clone(), managed.clone());
            async move {
                let allocation = ReleaseMap::new();
                let Some(key) = release_map.add(close_scope(allocation.clone())).await else {
                    return closed_scope("preallocation scope");
                };
                match managed.run_in(env, ctx, allocation).await {
                    Exit::Success(resource) => {
                        let owner = release_map.clone();
                        Exit::Success(transfer(resource, Arc::new(move || owner.remove(key))))
                    }
                    Exit::Failure(cause) => {
                        let released = release_map.release(key, cause.status()).await;
                        Exit::Failure(cause).and_finalizer(released)
                    }
                }
            }
            .boxed()
        })
    }
}

impl<A, E, Env> Managed<A, E, Env>
where
    A: Clone + Send + Sync + 'static,
    E: Send + 'static,
    Env: Clone + Send + Sync + 'static,
{
    /// Acquire now and return a resource that is already available.
    ///
    /// The release obligation moves to the first scope that uses the returned
    /// `Managed`. Nothing releases the resource if the result is dropped
    /// unused; use [`PreallocationScope`] when that matters.
    pub fn preallocate(&self) -> Effect<Managed<A, E, Env>, E, Env> {
        let this = self.clone();
        Effect::from_run(move |env, ctx| {
            let this = this.clone();
            async move {
                let allocation = ReleaseMap::new();
                match this.run_in(env, ctx, allocation.clone()).await {
                    Exit::Success(resource) => {
                        let slot = Arc::new(Mutex::new(Some(close_scope(allocation))));
                        let take = move || slot.lock().unwrap_or_else(PoisonError::into_inner).take();
                        Exit::Success(transfer(resource, Arc::new(take)))
                    }
                    Exit::Failure(cause) => {
                        let released = allocation
                            .release_all(cause.status(), crate::managed::ExecutionOrder::Sequential)
                            .await;
                        Exit::Failure(cause).and_finalizer(released)
                    }
                }
            }
            .boxed()
        })
    }
}

// ============================================================================
// Switcher
// ============================================================================

/// Holds at most one resource at a time, releasing the current one before
/// acquiring the next.
#[derive(Debug, Clone)]
pub struct Switcher {
    release_map: ReleaseMap,
    key: ReleaseKey,
    turn: Arc<tokio::sync::Mutex<()>>,
}

impl<E, Env> Managed<Switcher, E, Env>
where
    E: Send + 'static,
    Env: Clone + Send + Sync + 'static,
{
    /// A [`Switcher`] whose current resource is released, at the latest,
    /// when this resource is.
    pub fn switchable() -> Self {
        Managed::from_run(|_, _, parent| {
            async move {
                match parent.add(noop()).await {
                    Some(key) => Exit::Success(Switcher {
                        release_map: parent,
                        key,
                        turn: Arc::new(tokio::sync::Mutex::new(())),
                    }),
                    None => closed_scope("switchable"),
                }
            }
            .boxed()
        })
    }
}

impl Switcher {
    /// Release the current resource, if any, then acquire `managed`.
    ///
    /// Concurrent switches are serialized.
    pub fn switch<A, E, Env>(&self, managed: &Managed<A, E, Env>) -> Effect<A, E, Env>
    where
        A: Send + 'static,
        E: Send + 'static,
        Env: Clone + Send + Sync + 'static,
    {
        let (switcher, managed) = (self.clone(), managed.clone());
        Effect::from_run(move |env, ctx| {
            let (switcher, managed) = (switcher.clone(), managed.clone());
            async move {
                let _turn = switcher.turn.lock().await;
                let previous = switcher.release_map.replace(switcher.key, noop()).await;
                let released = match previous {
                    Some(finalizer) => run_finalizer(finalizer, ExitStatus::Succeeded).await,
                    None => Exit::Success(()),
                };
                let current = ReleaseMap::new();
                switcher
                    .release_map
                    .replace(switcher.key, close_scope(current.clone()))
                    .await;
                managed.run_in(env, ctx, current).await.and_finalizer(released)
            }
            .boxed()
        })
    }
}

// ============================================================================
// Early release
// ============================================================================

/// Releases a resource before its scope closes.
#[derive(Debug, Clone)]
pub struct EarlyRelease {
    release_map: ReleaseMap,
    key: ReleaseKey,
    status: ExitStatus,
}

impl EarlyRelease {
    /// Release now. Runs uninterruptibly and at most once; later calls, and
    /// the scope's own close, do nothing further.
    pub fn release<Env>(&self) -> Effect<(), Infallible, Env>
    where
        Env: Clone + Send + Sync + 'static,
    {
        let (release_map, key, status) = (self.release_map.clone(), self.key, self.status);
        Effect::from_run(move |_, _| {
            let release_map = release_map.clone();
            async move { release_map.release(key, status).await }.boxed()
        })
        .uninterruptible()
    }
}

impl<A, E, Env> Managed<A, E, Env>
where
    A: Send + 'static,
    E: Send + 'static,
    Env: Clone + Send + Sync + 'static,
{
    /// Pair the resource with a handle that releases it early.
    ///
    /// Early release hands the finalizers [`ExitStatus::Interrupted`].
    pub fn with_early_release(&self) -> Managed<(EarlyRelease, A), E, Env> {
        self.with_early_release_exit(ExitStatus::Interrupted)
    }

    /// Like [`with_early_release`](Self::with_early_release), with the status
    /// the finalizers see on early release.
    pub fn with_early_release_exit(&self, status: ExitStatus) -> Managed<(EarlyRelease, A), E, Env> {
        let this = self.clone();
        Managed::from_run(move |env, ctx, parent| {
            let this = this.clone();
            async move {
                let own = ReleaseMap::new();
                let Some(key) = parent.add(close_scope(own.clone())).await else {
                    return closed_scope("early release");
                };
                this.run_in(env, ctx, own).await.map(|resource| {
                    let handle = EarlyRelease {
                        release_map: parent,
                        key,
                        status,
                    };
                    (handle, resource)
                })
            }
            .boxed()
        })
    }
}
