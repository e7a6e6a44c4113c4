//! The finalizer registry of one scope.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;

use crate::effect::{catch_panic, catch_panic_async, BoxFuture};
use crate::exit::{Exit, ExitStatus};

/// A release action, run at most once with the exit status of its scope.
pub type Finalizer = Box<dyn FnOnce(ExitStatus) -> BoxFuture<'static, Exit<(), Infallible>> + Send>;

/// Identifies a finalizer inside its [`ReleaseMap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReleaseKey(u64);

/// How [`ReleaseMap::release_all`] runs the remaining finalizers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOrder {
    /// One at a time, newest first.
    Sequential,
    /// All at once.
    Parallel,
}

enum State {
    Running {
        next_key: u64,
        finalizers: BTreeMap<u64, Finalizer>,
    },
    Exited {
        status: ExitStatus,
    },
}

/// An ordered registry of finalizers.
///
/// Keys grow monotonically, so closing the map releases in exact reverse
/// registration order. Once closed, any finalizer added later runs
/// immediately with the status the map was closed with.
///
/// ```rust
/// use reservoir::managed::{ExecutionOrder, ReleaseMap};
/// use reservoir::{Exit, ExitStatus};
/// use futures::FutureExt;
/// use std::sync::{Arc, Mutex};
///
/// # tokio_test::block_on(async {
/// let log = Arc::new(Mutex::new(Vec::new()));
/// let map = ReleaseMap::new();
/// for name in ["first", "second"] {
///     let log = log.clone();
///     map.add(Box::new(move |_: ExitStatus| async move {
///         log.lock().unwrap().push(name);
///         Exit::<(), std::convert::Infallible>::Success(())
///     }.boxed())).await;
/// }
/// map.release_all(ExitStatus::Succeeded, ExecutionOrder::Sequential).await;
/// assert_eq!(*log.lock().unwrap(), vec!["second", "first"]);
/// # });
/// ```
#[derive(Clone)]
pub struct ReleaseMap {
    state: Arc<Mutex<State>>,
}

impl Default for ReleaseMap {
    fn default() -> Self {
        ReleaseMap::new()
    }
}

impl std::fmt::Debug for ReleaseMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        match &*state {
            State::Running { finalizers, .. } => f
                .debug_struct("ReleaseMap")
                .field("pending", &finalizers.len())
                .finish(),
            State::Exited { status } => f
                .debug_struct("ReleaseMap")
                .field("exited", status)
                .finish(),
        }
    }
}

impl ReleaseMap {
    /// An empty, open map.
    pub fn new() -> Self {
        ReleaseMap {
            state: Arc::new(Mutex::new(State::Running {
                next_key: 0,
                finalizers: BTreeMap::new(),
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a finalizer.
    ///
    /// Returns its key, or `None` if the map was already closed, in which case
    /// the finalizer has been run before this returns.
    pub async fn add(&self, finalizer: Finalizer) -> Option<ReleaseKey> {
        let rejected = {
            let mut state = self.lock();
            match &mut *state {
                State::Running {
                    next_key,
                    finalizers,
                } => {
                    let key = *next_key;
                    *next_key += 1;
                    finalizers.insert(key, finalizer);
                    return Some(ReleaseKey(key));
                }
                State::Exited { status } => (finalizer, *status),
            }
        };
        let (finalizer, status) = rejected;
        tracing::trace!(%status, "finalizer added to a closed scope, running now");
        run_finalizer(finalizer, status).await;
        None
    }

    /// Run the finalizer under `key` now, if it is still registered.
    pub async fn release(&self, key: ReleaseKey, status: ExitStatus) -> Exit<(), Infallible> {
        match self.remove(key) {
            Some(finalizer) => run_finalizer(finalizer, status).await,
            None => Exit::Success(()),
        }
    }

    /// Take the finalizer under `key` out of the map without running it.
    pub fn remove(&self, key: ReleaseKey) -> Option<Finalizer> {
        match &mut *self.lock() {
            State::Running { finalizers, .. } => finalizers.remove(&key.0),
            State::Exited { .. } => None,
        }
    }

    /// Swap the finalizer under `key`, returning the previous one.
    ///
    /// On a closed map the new finalizer runs immediately.
    pub async fn replace(&self, key: ReleaseKey, finalizer: Finalizer) -> Option<Finalizer> {
        let rejected = {
            let mut state = self.lock();
            match &mut *state {
                State::Running { finalizers, .. } => return finalizers.insert(key.0, finalizer),
                State::Exited { status } => (finalizer, *status),
            }
        };
        let (finalizer, status) = rejected;
        run_finalizer(finalizer, status).await;
        None
    }

    /// Number of finalizers still pending.
    pub fn len(&self) -> usize {
        match &*self.lock() {
            State::Running { finalizers, .. } => finalizers.len(),
            State::Exited { .. } => 0,
        }
    }

    /// True if no finalizer is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once the map has been closed.
    pub fn is_closed(&self) -> bool {
        matches!(&*self.lock(), State::Exited { .. })
    }

    /// Close the map and run every remaining finalizer.
    ///
    /// No finalizer is skipped because an earlier one died; all defects are
    /// collected into the returned exit. Closing twice is a no-op.
    pub async fn release_all(&self, status: ExitStatus, order: ExecutionOrder) -> Exit<(), Infallible> {
        let finalizers = {
            let mut state = self.lock();
            match &mut *state {
                State::Running { finalizers, .. } => {
                    let pending = std::mem::take(finalizers);
                    *state = State::Exited { status };
                    pending
                }
                State::Exited { .. } => return Exit::Success(()),
            }
        };
        if !finalizers.is_empty() {
            tracing::trace!(count = finalizers.len(), %status, "releasing scope");
        }
        match order {
            ExecutionOrder::Sequential => {
                let mut combined = Exit::unit();
                for (_, finalizer) in finalizers.into_iter().rev() {
                    combined = combined.then_finalizer(run_finalizer(finalizer, status).await);
                }
                combined
            }
            ExecutionOrder::Parallel => {
                let runs = finalizers
                    .into_values()
                    .rev()
                    .map(|finalizer| run_finalizer(finalizer, status));
                futures::future::join_all(runs)
                    .await
                    .into_iter()
                    .fold(Exit::unit(), Exit::both_finalizer)
            }
        }
    }
}

/// Run one finalizer, turning panics into defects and logging failures.
pub(crate) fn run_finalizer(
    finalizer: Finalizer,
    status: ExitStatus,
) -> BoxFuture<'static, Exit<(), Infallible>> {
    async move {
        let exit = match catch_panic(|| finalizer(status)) {
            Ok(fut) => catch_panic_async(fut).await,
            Err(defect) => Exit::die(defect),
        };
        if let Exit::Failure(cause) = &exit {
            tracing::warn!(%cause, "finalizer failed");
        }
        exit
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit::Defect;

    type Log = Arc<Mutex<Vec<String>>>;

    fn logging(log: &Log, name: &'static str) -> Finalizer {
        let log = Arc::clone(log);
        Box::new(move |status: ExitStatus| {
            async move {
                log.lock().unwrap().push(format!("{name}:{status}"));
                Exit::<(), Infallible>::Success(())
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn release_all_runs_lifo_and_only_once() {
        let log: Log = Default::default();
        let map = ReleaseMap::new();
        map.add(logging(&log, "a")).await;
        map.add(logging(&log, "b")).await;
        map.add(logging(&log, "c")).await;
        assert_eq!(map.len(), 3);

        map.release_all(ExitStatus::Failed, ExecutionOrder::Sequential).await;
        map.release_all(ExitStatus::Succeeded, ExecutionOrder::Sequential).await;
        assert_eq!(*log.lock().unwrap(), vec!["c:failed", "b:failed", "a:failed"]);
        assert!(map.is_closed());
    }

    #[tokio::test]
    async fn adding_to_closed_map_runs_immediately() {
        let log: Log = Default::default();
        let map = ReleaseMap::new();
        map.release_all(ExitStatus::Interrupted, ExecutionOrder::Sequential).await;
        assert_eq!(map.add(logging(&log, "late")).await, None);
        assert_eq!(*log.lock().unwrap(), vec!["late:interrupted"]);
    }

    #[tokio::test]
    async fn release_by_key_is_exactly_once() {
        let log: Log = Default::default();
        let map = ReleaseMap::new();
        let key = map.add(logging(&log, "early")).await.unwrap();
        map.release(key, ExitStatus::Succeeded).await;
        map.release(key, ExitStatus::Succeeded).await;
        map.release_all(ExitStatus::Succeeded, ExecutionOrder::Sequential).await;
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dying_finalizer_does_not_skip_siblings() {
        let log: Log = Default::default();
        let map = ReleaseMap::new();
        map.add(logging(&log, "first")).await;
        map.add(Box::new(|_: ExitStatus| {
            async { Exit::<(), Infallible>::die(Defect::new("release failed")) }.boxed()
        }))
        .await;
        map.add(Box::new(|_: ExitStatus| -> BoxFuture<'static, Exit<(), Infallible>> {
            panic!("finalizer panicked")
        }))
        .await;

        let exit = map.release_all(ExitStatus::Succeeded, ExecutionOrder::Sequential).await;
        let cause = exit.cause().cloned().unwrap();
        assert_eq!(cause.defects().len(), 2);
        assert_eq!(*log.lock().unwrap(), vec!["first:succeeded"]);
    }

    #[tokio::test]
    async fn parallel_release_runs_everything() {
        let log: Log = Default::default();
        let map = ReleaseMap::new();
        map.add(logging(&log, "x")).await;
        map.add(logging(&log, "y")).await;
        let exit = map.release_all(ExitStatus::Succeeded, ExecutionOrder::Parallel).await;
        assert!(exit.is_success());
        let mut seen = log.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["x:succeeded", "y:succeeded"]);
    }

    #[tokio::test]
    async fn replace_returns_previous_finalizer() {
        let log: Log = Default::default();
        let map = ReleaseMap::new();
        let key = map.add(logging(&log, "old")).await.unwrap();
        let old = map.replace(key, logging(&log, "new")).await;
        assert!(old.is_some());
        map.release_all(ExitStatus::Succeeded, ExecutionOrder::Sequential).await;
        assert_eq!(*log.lock().unwrap(), vec!["new:succeeded"]);
    }
}
