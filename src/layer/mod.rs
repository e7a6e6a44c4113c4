//! Dependency layers: recipes that build environments of services.
//!
//! A [`Layer<E>`] reads the capabilities it requires from an input
//! [`Environment`] and produces an `Environment` with the capabilities it
//! provides, as a scoped resource. Layers compose horizontally with
//! [`Layer::and`] (build both, concurrently) and vertically with
//! [`Layer::to`] (feed one into the next).
//!
//! ```rust
//! use reservoir::layer::{Environment, Layer};
//! use reservoir::Effect;
//!
//! #[derive(Clone)]
//! struct Config { url: &'static str }
//! #[derive(Clone)]
//! struct Database { url: &'static str }
//!
//! # tokio_test::block_on(async {
//! let config = Layer::<String>::succeed(Config { url: "postgres://local" });
//! let database = Layer::from_fn(|config: Config| Database { url: config.url });
//! let app = config.to(&database).unwrap();
//!
//! let program = Effect::<Database, String, Environment>::service()
//!     .map(|db| db.url)
//!     .provide_layer(&app);
//! assert_eq!(program.run(&Environment::empty()).await, Ok("postgres://local"));
//! # });
//! ```
//!
//! # Sharing
//!
//! Every layer value has an identity, kept by clones. Within one build, each
//! identity is built at most once and its output is shared by every consumer,
//! however many times it appears in the graph. Two layers built by separate
//! constructor calls never share, even if they are structurally the same; use
//! [`Layer::fresh`] to opt a layer out of sharing explicitly.
//!
//! # Wiring errors
//!
//! Composition checks the graph when it is built up, not when it runs:
//! feeding a layer that lacks a required capability, or merging two distinct
//! providers of the same capability, returns a [`LayerError`].

mod environment;
mod error;
mod memo;


use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;

use crate::effect::Effect;
use crate::exit::{Defect, Exit};
use crate::managed::Managed;
use crate::retry::{RetryExhausted, RetryPolicy};

pub use environment::{Environment, Tag};
pub use error::LayerError;

pub(crate) use memo::MemoMap;

static NEXT_LAYER_ID: AtomicU64 = AtomicU64::new(1);

/// The identity of a layer value.
///
/// Clones of a layer share its identity; every constructor and combinator
/// makes a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(u64);

impl LayerId {
    /// Capabilities passed through from the input environment.
    const INPUT: LayerId = LayerId(0);

    fn next() -> Self {
        LayerId(NEXT_LAYER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Provided {
    tag: Tag,
    origin: LayerId,
}

type BuildFn<E> = dyn Fn(&MemoMap) -> Managed<Environment, E, Environment> + Send + Sync;

struct LayerInner<E> {
    id: LayerId,
    name: String,
    requires: Vec<Tag>,
    provides: Vec<Provided>,
    build: Arc<BuildFn<E>>,
}

/// A shareable recipe for an [`Environment`].
///
/// See the [module documentation](self).
pub struct Layer<E = Infallible> {
    inner: Arc<LayerInner<E>>,
}

impl<E> Clone for Layer<E> {
    fn clone(&self) -> Self {
        Layer {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> std::fmt::Debug for Layer<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let requires: Vec<_> = self.inner.requires.iter().map(Tag::name).collect();
        let provides: Vec<_> = self.inner.provides.iter().map(|p| p.tag.name()).collect();
        f.debug_struct("Layer")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("requires", &requires)
            .field("provides", &provides)
            .finish()
    }
}

fn missing(tag: Tag, layer: &str) -> Defect {
    Defect::from_error(LayerError::MissingCapability {
        tag,
        layer: layer.to_string(),
    })
}

fn union_tags(left: &[Tag], right: &[Tag]) -> Vec<Tag> {
    let mut tags = left.to_vec();
    for tag in right {
        if !tags.contains(tag) {
            tags.push(*tag);
        }
    }
    tags
}

/// Build `first`, then build `second` from its output.
fn feed<E>(
    first: Managed<Environment, E, Environment>,
    second: Managed<Environment, E, Environment>,
    passthrough: bool,
) -> Managed<Environment, E, Environment>
where
    E: Send + 'static,
{
    Managed::from_run(move |env, ctx, scope| {
        let (first, second) = (first.clone(), second.clone());
        async move {
            let provided = match first.run_in(env, ctx.clone(), scope.clone()).await {
                Exit::Success(provided) => provided,
                Exit::Failure(cause) => return Exit::Failure(cause),
            };
            if ctx.should_interrupt() {
                return Exit::interrupt();
            }
            let built = second.run_in(provided.clone(), ctx, scope).await;
            if passthrough {
                built.map(|output| provided.union(&output))
            } else {
                built
            }
        }
        .boxed()
    })
}

impl<E> Layer<E>
where
    E: Clone + Send + Sync + 'static,
{
    fn node<F>(id: LayerId, name: String, requires: Vec<Tag>, provides: Vec<Provided>, build: F) -> Self
    where
        F: Fn(&MemoMap) -> Managed<Environment, E, Environment> + Send + Sync + 'static,
    {
        Layer {
            inner: Arc::new(LayerInner {
                id,
                name,
                requires,
                provides,
                build: Arc::new(build),
            }),
        }
    }

    fn single<T: 'static>(requires: Vec<Tag>, managed: Managed<Environment, E, Environment>) -> Self {
        let id = LayerId::next();
        let provides = vec![Provided {
            tag: Tag::of::<T>(),
            origin: id,
        }];
        Layer::node(id, std::any::type_name::<T>().to_string(), requires, provides, move |_| {
            managed.clone()
        })
    }

    pub(crate) fn builder(&self, memo: &MemoMap) -> Managed<Environment, E, Environment> {
        (self.inner.build)(memo)
    }

    // ------------------------------------------------------------------------
    // Constructors
    // ------------------------------------------------------------------------

    /// A layer providing `service` as is.
    pub fn succeed<T>(service: T) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        Layer::from_managed(Managed::succeed(service))
    }

    /// A layer providing the result of `effect`.
    ///
    /// The effect may read services with [`Effect::service`], but those are
    /// not declared as requirements; prefer [`Layer::from_fn`] where the
    /// dependency is a single service.
    pub fn from_effect<T>(effect: Effect<T, E, Environment>) -> Self
    where
        T: Send + Sync + 'static,
    {
        Layer::from_managed(Managed::from_effect(effect))
    }

    /// A layer providing a scoped resource, released when the layer is.
    pub fn from_managed<T>(managed: Managed<T, E, Environment>) -> Self
    where
        T: Send + Sync + 'static,
    {
        Layer::single::<T>(
            Vec::new(),
            managed.map(|service| Environment::empty().with(service)),
        )
    }

    /// A layer building `B` from the `A` it requires.
    pub fn from_fn<A, B, F>(f: F) -> Self
    where
        A: Clone + Send + Sync + 'static,
        B: Send + Sync + 'static,
        F: Fn(A) -> B + Send + Sync + 'static,
    {
        let built = Effect::<A, E, Environment>::service().map(move |a| Environment::empty().with(f(a)));
        Layer::single::<B>(vec![Tag::of::<A>()], Managed::from_effect(built))
    }

    /// A layer building a scoped `B` from the `A` it requires.
    pub fn from_fn_managed<A, B, F>(f: F) -> Self
    where
        A: Clone + Send + Sync + 'static,
        B: Send + Sync + 'static,
        F: Fn(A) -> Managed<B, E, Environment> + Send + Sync + 'static,
    {
        let built = Managed::from_effect(Effect::<A, E, Environment>::service())
            .and_then(move |a| f(a).map(|b| Environment::empty().with(b)));
        Layer::single::<B>(vec![Tag::of::<A>()], built)
    }

    /// A layer producing several capabilities at once.
    ///
    /// `requires` and `provides` declare the layer's wiring; the built
    /// environment is checked against `provides` and the build dies if a
    /// declared capability is missing from it.
    pub fn from_managed_env<R, P>(requires: R, provides: P, managed: Managed<Environment, E, Environment>) -> Self
    where
        R: IntoIterator<Item = Tag>,
        P: IntoIterator<Item = Tag>,
    {
        let id = LayerId::next();
        let declared: Vec<Tag> = provides.into_iter().collect();
        let expected = declared.clone();
        let checked = managed.and_then(move |built| match expected.iter().find(|tag| !built.contains_tag(tag)) {
            Some(tag) => Managed::from_effect(Effect::die(missing(*tag, "from_managed_env"))),
            None => Managed::succeed(built),
        });
        let names: Vec<_> = declared.iter().map(Tag::name).collect();
        let provides = declared.iter().map(|&tag| Provided { tag, origin: id }).collect();
        Layer::node(id, names.join(" + "), requires.into_iter().collect(), provides, move |_| {
            checked.clone()
        })
    }

    /// A layer passing the `T` of its input through unchanged.
    pub fn identity<T>() -> Self
    where
        T: Send + Sync + 'static,
    {
        let tag = Tag::of::<T>();
        let name = format!("identity<{}>", tag.name());
        let passed = Effect::from_exit_fn(move |env: &Environment| match env.get_erased(&tag) {
            Some(service) => {
                let mut output = Environment::empty();
                output.insert_erased(tag, service);
                Exit::Success(output)
            }
            None => Exit::die(missing(tag, "identity")),
        });
        let provides = vec![Provided {
            tag,
            origin: LayerId::INPUT,
        }];
        let managed = Managed::from_effect(passed);
        Layer::node(LayerId::next(), name, vec![tag], provides, move |_| managed.clone())
    }

    // ------------------------------------------------------------------------
    // Composition
    // ------------------------------------------------------------------------

    fn merge_provides(&self, that: &Layer<E>) -> Result<Vec<Provided>, LayerError> {
        let mut merged = self.inner.provides.clone();
        for provided in &that.inner.provides {
            match merged.iter().find(|p| p.tag == provided.tag) {
                Some(existing) if existing.origin == provided.origin => {}
                Some(_) => {
                    return Err(LayerError::DuplicateCapability {
                        tag: provided.tag,
                        left: self.name().to_string(),
                        right: that.name().to_string(),
                    })
                }
                None => merged.push(*provided),
            }
        }
        Ok(merged)
    }

    fn check_feeds(&self, that: &Layer<E>) -> Result<(), LayerError> {
        let unmet = that
            .inner
            .requires
            .iter()
            .find(|tag| !self.inner.provides.iter().any(|p| p.tag == **tag));
        match unmet {
            Some(tag) => Err(LayerError::MissingCapability {
                tag: *tag,
                layer: that.name().to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Build `self` and `that` concurrently from the same input and merge
    /// their outputs.
    ///
    /// Fails if both provide the same capability, unless it comes from the
    /// same shared layer.
    pub fn and(&self, that: &Layer<E>) -> Result<Layer<E>, LayerError> {
        let provides = self.merge_provides(that)?;
        let requires = union_tags(&self.inner.requires, &that.inner.requires);
        let (left, right) = (self.clone(), that.clone());
        let name = format!("({} + {})", self.name(), that.name());
        Ok(Layer::node(LayerId::next(), name, requires, provides, move |memo| {
            memo.get_or_build(&left)
                .zip_par_with(memo.get_or_build(&right), |l, r| l.union(&r))
        }))
    }

    /// Build `self`, then build `that` from its output, yielding only what
    /// `that` provides.
    ///
    /// Fails if `that` requires something `self` does not provide.
    pub fn to(&self, that: &Layer<E>) -> Result<Layer<E>, LayerError> {
        self.check_feeds(that)?;
        let (first, second) = (self.clone(), that.clone());
        let name = format!("({} >>> {})", self.name(), that.name());
        Ok(Layer::node(
            LayerId::next(),
            name,
            self.inner.requires.clone(),
            that.inner.provides.clone(),
            move |memo| feed(memo.get_or_build(&first), memo.get_or_build(&second), false),
        ))
    }

    /// Like [`to`](Self::to), but the output keeps what `self` provides too.
    pub fn and_to(&self, that: &Layer<E>) -> Result<Layer<E>, LayerError> {
        self.check_feeds(that)?;
        let provides = self.merge_provides(that)?;
        let (first, second) = (self.clone(), that.clone());
        let name = format!("({} >+> {})", self.name(), that.name());
        Ok(Layer::node(
            LayerId::next(),
            name,
            self.inner.requires.clone(),
            provides,
            move |memo| feed(memo.get_or_build(&first), memo.get_or_build(&second), true),
        ))
    }

    /// The same recipe under a new identity, so it is built separately from
    /// `self`.
    pub fn fresh(&self) -> Self {
        let id = LayerId::next();
        let provides = self.provides().map(|tag| Provided { tag, origin: id }).collect();
        let build = Arc::clone(&self.inner.build);
        Layer::node(
            id,
            format!("fresh({})", self.name()),
            self.inner.requires.clone(),
            provides,
            move |memo| build(memo),
        )
    }

    /// Transform the build failure.
    pub fn map_err<E2, F>(&self, f: F) -> Layer<E2>
    where
        E2: Clone + Send + Sync + 'static,
        F: Fn(E) -> E2 + Send + Sync + 'static,
    {
        let this = self.clone();
        let f = Arc::new(f);
        Layer::node(
            LayerId::next(),
            self.name().to_string(),
            self.inner.requires.clone(),
            self.inner.provides.clone(),
            move |memo| {
                let f = Arc::clone(&f);
                memo.get_or_build(&this).map_err(move |error| f(error))
            },
        )
    }

    /// Build `fallback` if `self` fails with a typed error.
    ///
    /// Whatever the failed build had acquired, including layers it shares
    /// with nothing built before it, is released before `fallback` starts.
    /// The result provides the capabilities both layers provide.
    pub fn or_else<E2>(&self, fallback: &Layer<E2>) -> Layer<E2>
    where
        E2: Clone + Send + Sync + 'static,
    {
        let id = LayerId::next();
        let provides = self
            .provides()
            .filter(|tag| fallback.provides().any(|other| other == *tag))
            .map(|tag| Provided { tag, origin: id })
            .collect();
        let requires = union_tags(&self.inner.requires, &fallback.inner.requires);
        let (this, fallback) = (self.clone(), fallback.clone());
        let name = format!("({} | {})", this.name(), fallback.name());
        Layer::node(id, name, requires, provides, move |memo| {
            let (memo_fallback, fallback) = (memo.clone(), fallback.clone());
            memo.scoped(&this)
                .or_else(move |_| memo_fallback.get_or_build(&fallback))
        })
    }

    /// Rebuild after typed failures, following `policy`.
    ///
    /// Each attempt builds the graph below this layer again, releasing what
    /// the failed attempt had acquired first. Layers the enclosing graph has
    /// already built are reused rather than rebuilt.
    pub fn retry(&self, policy: RetryPolicy) -> Layer<RetryExhausted<E>> {
        let id = LayerId::next();
        let provides = self.provides().map(|tag| Provided { tag, origin: id }).collect();
        let this = self.clone();
        Layer::node(
            id,
            format!("retry({})", self.name()),
            self.inner.requires.clone(),
            provides,
            move |memo| memo.scoped(&this).retry(policy.clone()),
        )
    }

    /// Rename the layer. The identity is kept, so sharing is unaffected.
    pub fn named(&self, name: impl Into<String>) -> Self {
        Layer {
            inner: Arc::new(LayerInner {
                id: self.inner.id,
                name: name.into(),
                requires: self.inner.requires.clone(),
                provides: self.inner.provides.clone(),
                build: Arc::clone(&self.inner.build),
            }),
        }
    }

    // ------------------------------------------------------------------------
    // Building
    // ------------------------------------------------------------------------

    /// The scoped build of the whole graph below this layer.
    ///
    /// Every layer in the graph is built at most once, and all of them are
    /// released when the returned resource is, dependents first.
    pub fn build(&self) -> Managed<Environment, E, Environment> {
        let layer = self.clone();
        Managed::from_run(move |env, ctx, scope| {
            let memo = MemoMap::new(scope.clone());
            memo.get_or_build(&layer).run_in(env, ctx, scope)
        })
    }

    /// A resource holding a layer that is built at most once, on first use.
    ///
    /// Every build of the returned layer, in any graph, reuses that one
    /// outcome. The build is released when the outer resource is.
    pub fn memoize(&self) -> Managed<Layer<E>, E, Environment> {
        let name = self.name().to_string();
        let tags: Vec<Tag> = self.provides().collect();
        self.build().memoize().map(move |handle| {
            let id = LayerId::next();
            let provides = tags.iter().map(|&tag| Provided { tag, origin: id }).collect();
            Layer::node(id, name.clone(), Vec::new(), provides, move |_| handle.clone())
        })
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    /// The identity shared by clones of this layer.
    pub fn id(&self) -> LayerId {
        self.inner.id
    }

    /// The layer's name, used in wiring errors and tracing spans.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Capabilities this layer reads from its input.
    pub fn requires(&self) -> &[Tag] {
        &self.inner.requires
    }

    /// Capabilities this layer provides.
    pub fn provides(&self) -> impl Iterator<Item = Tag> + '_ {
        self.inner.provides.iter().map(|p| p.tag)
    }
}

impl<T, E> Effect<T, E, Environment>
where
    T: Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Build `layer`, run this effect with its services added to the input
    /// environment, then release the layer.
    pub fn provide_layer(&self, layer: &Layer<E>) -> Effect<T, E, Environment> {
        let this = self.clone();
        layer.build().with(move |services| {
            this.provide_with(move |input: &Environment| input.union(&services))
        })
    }
}
