use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use crate::effect::Effect;
use crate::exit::{Defect, ExitStatus};
use crate::layer::{Environment, Layer, Tag};
use crate::managed::Managed;
use crate::mock::arena::Arena;
use crate::mock::{Assertion, Method, Mock, MethodId, Proxy, Repetitions, Returns};

/// One expected call with its types erased.
pub(crate) trait ErasedCall: Send + Sync {
    fn signature(&self) -> TypeId;
    fn accepts(&self, input: &dyn Any) -> bool;
    fn respond(&self, input: &dyn Any) -> Option<Box<dyn Any + Send>>;
    fn assertion(&self) -> &str;
}

struct TypedCall<I, O, E> {
    assertion: Assertion<I>,
    returns: Returns<I, O, E>,
}

impl<I, O, E> ErasedCall for TypedCall<I, O, E>
where
    I: Send + Sync + 'static,
    O: Send + 'static,
    E: Send + 'static,
{
    fn signature(&self) -> TypeId {
        signature::<I, O, E>()
    }

    fn accepts(&self, input: &dyn Any) -> bool {
        input
            .downcast_ref::<I>()
            .is_some_and(|input| self.assertion.test(input))
    }

    fn respond(&self, input: &dyn Any) -> Option<Box<dyn Any + Send>> {
        let input = input.downcast_ref::<I>()?;
        Some(Box::new(self.returns.produce(input)))
    }

    fn assertion(&self) -> &str {
        self.assertion.description()
    }
}

/// Identifies the input and answer types of a method.
pub(crate) fn signature<I: 'static, O: 'static, E: 'static>() -> TypeId {
    TypeId::of::<fn(I) -> Result<O, E>>()
}

#[derive(Clone)]
pub(crate) enum Node {
    Call {
        method: MethodId,
        call: Arc<dyn ErasedCall>,
    },
    And(Vec<Node>),
    Or(Vec<Node>),
    Chain(Vec<Node>),
    Repeated(Box<Node>, Repetitions),
}

#[derive(Clone)]
struct Service {
    mock: TypeId,
    tag: Tag,
    install: Arc<dyn Fn(&mut Environment, Proxy) + Send + Sync>,
}

impl Service {
    fn of<M: Mock>() -> Self {
        Service {
            mock: TypeId::of::<M>(),
            tag: Tag::of::<M::Service>(),
            install: Arc::new(|env: &mut Environment, proxy: Proxy| env.insert(M::build(proxy))),
        }
    }
}

/// A script of calls a mocked service must receive.
///
/// Build leaves with [`Expectation::call`] (or [`Method::expect`]) and combine
/// them:
///
/// - [`and`](Expectation::and): all of them, in any order;
/// - [`or`](Expectation::or): at least one of them;
/// - [`and_then`](Expectation::and_then): in this order;
/// - [`repeated`](Expectation::repeated) and friends: several times.
///
/// Each leaf is consumed by one call. Among alternatives, earlier ones take
/// precedence: a call goes to the first open branch that accepts it.
///
/// [`to_layer`](Expectation::to_layer) turns the script into a layer
/// providing the mocked services; when that layer is released after a
/// successful run, it dies if the script is not complete.
#[derive(Clone)]
pub struct Expectation {
    pub(crate) node: Node,
    services: Vec<Service>,
}

impl Expectation {
    /// Expect one call to `method` whose input satisfies `assertion`,
    /// answered by `returns`.
    pub fn call<M, I, O, E>(method: Method<M, I, O, E>, assertion: Assertion<I>, returns: Returns<I, O, E>) -> Self
    where
        M: Mock,
        I: fmt::Debug + Send + Sync + 'static,
        O: Send + 'static,
        E: Send + 'static,
    {
        Expectation {
            node: Node::Call {
                method: method.id(),
                call: Arc::new(TypedCall { assertion, returns }),
            },
            services: vec![Service::of::<M>()],
        }
    }

    /// Provide the service of `M` while expecting no calls to it.
    pub fn empty<M: Mock>() -> Self {
        Expectation {
            node: Node::And(Vec::new()),
            services: vec![Service::of::<M>()],
        }
    }

    fn services_with(&self, other: &Expectation) -> Vec<Service> {
        let mut services = self.services.clone();
        for service in &other.services {
            if !services.iter().any(|s| s.mock == service.mock) {
                services.push(service.clone());
            }
        }
        services
    }

    /// Both scripts, in any order.
    pub fn and(self, other: Expectation) -> Self {
        let services = self.services_with(&other);
        let mut children = Vec::new();
        for node in [self.node, other.node] {
            match node {
                Node::And(nested) => children.extend(nested),
                node => children.push(node),
            }
        }
        Expectation {
            node: Node::And(children),
            services,
        }
    }

    /// Either script.
    pub fn or(self, other: Expectation) -> Self {
        let services = self.services_with(&other);
        let mut children = Vec::new();
        for node in [self.node, other.node] {
            match node {
                Node::Or(nested) => children.extend(nested),
                node => children.push(node),
            }
        }
        Expectation {
            node: Node::Or(children),
            services,
        }
    }

    /// This script, then `next`.
    pub fn and_then(self, next: Expectation) -> Self {
        let services = self.services_with(&next);
        let mut children = Vec::new();
        for node in [self.node, next.node] {
            match node {
                Node::Chain(nested) => children.extend(nested),
                node => children.push(node),
            }
        }
        Expectation {
            node: Node::Chain(children),
            services,
        }
    }

    /// Run the whole script a number of times allowed by `repetitions`.
    ///
    /// A repetition that has started must finish before the next one can
    /// start or the expectation can count as met.
    pub fn repeated(self, repetitions: Repetitions) -> Self {
        Expectation {
            node: Node::Repeated(Box::new(self.node), repetitions),
            services: self.services,
        }
    }

    /// Exactly `n` times.
    pub fn times(self, n: usize) -> Self {
        self.repeated(Repetitions::exactly(n))
    }

    /// At least `min` times.
    pub fn at_least(self, min: usize) -> Self {
        self.repeated(Repetitions::at_least(min))
    }

    /// At most `max` times.
    pub fn at_most(self, max: usize) -> Self {
        self.repeated(Repetitions::at_most(max))
    }

    /// Between `min` and `max` times.
    ///
    /// # Panics
    ///
    /// If `max < min`.
    pub fn between(self, min: usize, max: usize) -> Self {
        self.repeated(Repetitions::between(min, max))
    }

    /// Tags of the services this script mocks.
    pub fn services(&self) -> impl Iterator<Item = Tag> + '_ {
        self.services.iter().map(|service| service.tag)
    }

    /// A layer providing every mocked service, all backed by one shared copy
    /// of this script.
    ///
    /// Each build starts from a fresh script. When the build is released
    /// after success, it dies with [`MockError::Unsatisfied`](crate::mock::MockError::Unsatisfied)
    /// if any branch is unmet. Releases after failure or interruption skip the
    /// check, so the original cause is not buried.
    pub fn to_layer<E>(&self) -> Layer<E>
    where
        E: Clone + Send + Sync + 'static,
    {
        let (node, services) = (self.node.clone(), self.services.clone());
        let acquire = Effect::<(Proxy, Environment), E, Environment>::from_fn(move |_| {
            let proxy = Proxy::new(Arena::compile(&node));
            let mut env = Environment::empty();
            for service in &services {
                (service.install)(&mut env, proxy.clone());
            }
            Ok((proxy, env))
        });
        let managed = Managed::make_exit(acquire, |(proxy, _), status| {
            if status != ExitStatus::Succeeded {
                return Effect::unit();
            }
            match proxy.verify() {
                Ok(()) => Effect::unit(),
                Err(error) => Effect::die(Defect::from_error(error)),
            }
        })
        .map(|(_, env)| env);

        let tags: Vec<Tag> = self.services().collect();
        let names: Vec<_> = tags.iter().map(Tag::name).collect();
        Layer::from_managed_env(Vec::new(), tags, managed).named(format!("mock({})", names.join(", ")))
    }
}

impl fmt::Debug for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arena = Arena::compile(&self.node);
        f.debug_struct("Expectation")
            .field("script", &arena.describe(arena.root()))
            .field("services", &self.services().map(|tag| tag.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arena = Arena::compile(&self.node);
        f.write_str(&arena.describe(arena.root()))
    }
}
