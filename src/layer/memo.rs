//! Per-build memoization of layers by identity.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use tokio::sync::OnceCell;
use tracing::Instrument;

use crate::effect::FiberContext;
use crate::exit::{Defect, Exit};
use crate::layer::{Environment, Layer, LayerId};
use crate::managed::{Managed, ReleaseMap};

/// One memoized build, with its error type erased.
#[derive(Clone)]
struct Entry {
    cell: Arc<dyn Any + Send + Sync>,
    built: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl Entry {
    fn new<E>() -> Self
    where
        E: Send + Sync + 'static,
    {
        let cell = Arc::new(OnceCell::<Exit<Environment, E>>::new());
        let probe = Arc::clone(&cell);
        Entry {
            cell,
            built: Arc::new(move || matches!(probe.get(), Some(Exit::Success(_)))),
        }
    }

    fn is_built(&self) -> bool {
        (self.built)()
    }
}

/// The layers built so far in one graph build, by identity.
///
/// Every layer is built into the release map of its memo scope, so a layer
/// reached from several places is released once, when that scope is. The
/// outermost scope lives as long as the whole graph; [`scoped`](Self::scoped)
/// opens child scopes for builds that may be abandoned.
#[derive(Clone)]
pub(crate) struct MemoMap {
    release_map: ReleaseMap,
    entries: Arc<Mutex<HashMap<LayerId, Entry>>>,
    parent: Option<Arc<MemoMap>>,
}

impl MemoMap {
    pub(crate) fn new(release_map: ReleaseMap) -> Self {
        MemoMap {
            release_map,
            entries: Arc::new(Mutex::new(HashMap::new())),
            parent: None,
        }
    }

    fn child(&self, release_map: ReleaseMap) -> Self {
        MemoMap {
            release_map,
            entries: Arc::new(Mutex::new(HashMap::new())),
            parent: Some(Arc::new(self.clone())),
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<LayerId, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A successful build of `id` in this scope or an enclosing one.
    fn built(&self, id: LayerId) -> Option<Entry> {
        let own = self.entries().get(&id).cloned();
        match own {
            Some(entry) if entry.is_built() => Some(entry),
            _ => self.parent.as_ref().and_then(|parent| parent.built(id)),
        }
    }

    fn cell<E>(&self, id: LayerId) -> Option<Arc<OnceCell<Exit<Environment, E>>>>
    where
        E: Send + Sync + 'static,
    {
        let existing = self.entries().get(&id).cloned();
        let entry = match existing.or_else(|| self.parent.as_ref().and_then(|parent| parent.built(id))) {
            Some(entry) => entry,
            None => self.entries().entry(id).or_insert_with(Entry::new::<E>).clone(),
        };
        entry.cell.downcast().ok()
    }

    /// Hand the successful builds of this scope to the enclosing one, so
    /// later references there share them.
    fn publish(&self) {
        let Some(parent) = &self.parent else {
            return;
        };
        let built: Vec<(LayerId, Entry)> = self
            .entries()
            .iter()
            .filter(|(_, entry)| entry.is_built())
            .map(|(id, entry)| (*id, entry.clone()))
            .collect();
        let mut shared = parent.entries();
        for (id, entry) in built {
            shared.entry(id).or_insert(entry);
        }
    }

    /// Build `layer` in a memo scope of its own, on the release map the
    /// returned resource is run with.
    ///
    /// Layers already built by an enclosing scope are reused. Everything else
    /// is built for this run only: if the run fails, releasing its scope
    /// releases exactly those builds. A successful run publishes its builds
    /// to this scope.
    pub(crate) fn scoped<E>(&self, layer: &Layer<E>) -> Managed<Environment, E, Environment>
    where
        E: Clone + Send + Sync + 'static,
    {
        let (memo, layer) = (self.clone(), layer.clone());
        Managed::from_run(move |env: Environment, ctx: FiberContext, scope: ReleaseMap| {
            let child = memo.child(scope.clone());
            let build = child.get_or_build(&layer);
            async move {
                let exit = build.run_in(env, ctx, scope).await;
                if exit.is_success() {
                    child.publish();
                }
                exit
            }
            .boxed()
        })
    }

    /// The build of `layer`, shared with every other reference to it.
    ///
    /// The first use builds; concurrent and later uses wait for and reuse
    /// that outcome.
    pub(crate) fn get_or_build<E>(&self, layer: &Layer<E>) -> Managed<Environment, E, Environment>
    where
        E: Clone + Send + Sync + 'static,
    {
        let (memo, layer) = (self.clone(), layer.clone());
        Managed::from_run(move |env, ctx, _| {
            let (memo, layer) = (memo.clone(), layer.clone());
            async move {
                let Some(cell) = memo.cell::<E>(layer.id()) else {
                    return Exit::die(Defect::new(format!(
                        "layer `{}` is used with two different error types",
                        layer.name()
                    )));
                };
                if cell.initialized() {
                    tracing::trace!(layer = layer.name(), "reusing shared layer");
                }
                cell.get_or_init(|| {
                    let span = tracing::debug_span!("layer", name = layer.name(), id = layer.id().0);
                    let build = layer.builder(&memo);
                    let release_map = memo.release_map.clone();
                    async move {
                        tracing::debug!("building layer");
                        let exit = build.run_in(env, ctx, release_map).await;
                        match &exit {
                            Exit::Success(provided) => {
                                tracing::debug!(provided = provided.len(), "layer built")
                            }
                            Exit::Failure(cause) => {
                                tracing::debug!(status = %cause.status(), "layer failed")
                            }
                        }
                        exit
                    }
                    .instrument(span)
                })
                .await
                .clone()
            }
            .boxed()
        })
    }
}
