//! Capability maps keyed by type.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::effect::Effect;
use crate::exit::{Defect, Exit};
use crate::layer::LayerError;

/// The identity of a capability: a type, remembered with its name.
#[derive(Clone, Copy)]
pub struct Tag {
    id: TypeId,
    name: &'static str,
}

impl Tag {
    /// The tag of `T`.
    pub fn of<T: 'static>() -> Self {
        Tag {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// The type name this tag was created from.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Tag {}

impl Hash for Tag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({})", self.name)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

type Capability = Arc<dyn Any + Send + Sync>;

/// A set of capabilities, at most one per type.
///
/// Layers read their requirements from an `Environment` and produce one with
/// what they provide.
///
/// ```rust
/// use reservoir::layer::Environment;
///
/// #[derive(Clone, Debug, PartialEq)]
/// struct Port(u16);
///
/// let env = Environment::empty().with(Port(8080)).with("localhost");
/// assert_eq!(env.get::<Port>(), Some(Port(8080)));
/// assert_eq!(env.get::<&str>(), Some("localhost"));
/// assert_eq!(env.len(), 2);
/// ```
#[derive(Clone, Default)]
pub struct Environment {
    entries: HashMap<Tag, Capability>,
    order: Vec<Tag>,
}

impl Environment {
    /// An environment with no capabilities.
    pub fn empty() -> Self {
        Environment::default()
    }

    /// Add `value`, replacing any capability of the same type.
    pub fn with<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.insert(value);
        self
    }

    /// Add `value`, replacing any capability of the same type.
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) {
        self.insert_erased(Tag::of::<T>(), Arc::new(value));
    }

    pub(crate) fn insert_erased(&mut self, tag: Tag, value: Capability) {
        if self.entries.insert(tag, value).is_none() {
            self.order.push(tag);
        }
    }

    pub(crate) fn get_erased(&self, tag: &Tag) -> Option<Capability> {
        self.entries.get(tag).cloned()
    }

    /// A clone of the capability of type `T`.
    pub fn get<T: Clone + 'static>(&self) -> Option<T> {
        self.get_ref::<T>().cloned()
    }

    /// The capability of type `T`, borrowed.
    pub fn get_ref<T: 'static>(&self) -> Option<&T> {
        self.entries
            .get(&Tag::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// True if a capability of type `T` is present.
    pub fn contains<T: 'static>(&self) -> bool {
        self.contains_tag(&Tag::of::<T>())
    }

    /// True if a capability with this tag is present.
    pub fn contains_tag(&self, tag: &Tag) -> bool {
        self.entries.contains_key(tag)
    }

    /// Number of distinct capabilities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if there are no capabilities.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tags in insertion order.
    pub fn tags(&self) -> impl Iterator<Item = &Tag> + '_ {
        self.order.iter()
    }

    /// Every capability of `self` and `other`. Where both hold the same
    /// type, `other` wins.
    pub fn union(&self, other: &Environment) -> Environment {
        let mut merged = self.clone();
        for tag in &other.order {
            if let Some(value) = other.entries.get(tag) {
                merged.insert_erased(*tag, Arc::clone(value));
            }
        }
        merged
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.order.iter().map(Tag::name)).finish()
    }
}

impl<S, E> Effect<S, E, Environment>
where
    S: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    /// Look up the capability of type `S`.
    ///
    /// Dies with [`LayerError::MissingCapability`] if it is absent; layer
    /// composition checks make that a bug rather than a runtime condition.
    pub fn service() -> Self {
        Effect::from_exit_fn(|env: &Environment| match env.get::<S>() {
            Some(service) => Exit::Success(service),
            None => Exit::die(Defect::from_error(LayerError::MissingCapability {
                tag: Tag::of::<S>(),
                layer: "environment".to_string(),
            })),
        })
    }

    /// Look up the capability of type `S` and run `f` with it.
    pub fn service_with<T, F>(f: F) -> Effect<T, E, Environment>
    where
        T: Send + 'static,
        F: Fn(S) -> Effect<T, E, Environment> + Send + Sync + 'static,
    {
        Effect::<S, E, Environment>::service().and_then(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Database(&'static str);

    #[test]
    fn tags_compare_by_type() {
        assert_eq!(Tag::of::<Database>(), Tag::of::<Database>());
        assert_ne!(Tag::of::<Database>(), Tag::of::<u32>());
        assert!(Tag::of::<Database>().name().ends_with("Database"));
    }

    #[test]
    fn insert_replaces_without_growing() {
        let mut env = Environment::empty().with(Database("a"));
        env.insert(Database("b"));
        assert_eq!(env.len(), 1);
        assert_eq!(env.get::<Database>(), Some(Database("b")));
    }

    #[test]
    fn union_counts_distinct_tags() {
        let left = Environment::empty().with(Database("db")).with(1u32);
        let right = Environment::empty().with(2u32).with("name");
        let merged = left.union(&right);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.get::<u32>(), Some(2));
        let names: Vec<_> = merged.tags().map(Tag::name).collect();
        assert_eq!(names, vec![Tag::of::<Database>().name(), "u32", "&str"]);
    }

    #[tokio::test]
    async fn service_dies_when_missing() {
        let lookup = Effect::<Database, String, Environment>::service();
        let cause = lookup.run(&Environment::empty()).await.unwrap_err();
        let defect = &cause.defects()[0];
        assert!(matches!(
            defect.downcast_ref::<LayerError>(),
            Some(LayerError::MissingCapability { .. })
        ));

        let env = Environment::empty().with(Database("main"));
        assert_eq!(lookup.run(&env).await, Ok(Database("main")));
    }
}
