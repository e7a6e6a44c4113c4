use std::any::TypeId;
use std::convert::Infallible;
use std::fmt;
use std::marker::PhantomData;

use crate::mock::{Assertion, Expectation, Proxy, Returns};

/// A service that can be replaced by a mock.
///
/// Implement it on a marker type. [`build`](Mock::build) turns the
/// dispatching [`Proxy`] into the service the code under test uses,
/// typically a struct whose methods call [`Proxy::invoke`].
pub trait Mock: 'static {
    /// The service this mock stands in for.
    type Service: Send + Sync + 'static;

    /// Name used in error messages.
    const NAME: &'static str;

    /// Wrap the proxy into the service.
    fn build(proxy: Proxy) -> Self::Service;
}

/// A method of mock `M` taking `I` and returning `Result<O, E>`.
///
/// Declare one constant per method:
///
/// ```rust
/// use reservoir::mock::{Method, Mock, Proxy};
///
/// struct ClockMock;
///
/// impl ClockMock {
///     const NOW: Method<ClockMock, (), u64> = Method::new("now");
/// }
///
/// impl Mock for ClockMock {
///     type Service = Proxy;
///     const NAME: &'static str = "Clock";
///     fn build(proxy: Proxy) -> Proxy {
///         proxy
///     }
/// }
///
/// assert_eq!(ClockMock::NOW.to_string(), "Clock::now");
/// ```
pub struct Method<M, I, O, E = Infallible> {
    name: &'static str,
    _signature: PhantomData<fn(M, I) -> Result<O, E>>,
}

impl<M, I, O, E> Method<M, I, O, E> {
    /// A method named `name`.
    pub const fn new(name: &'static str) -> Self {
        Method {
            name,
            _signature: PhantomData,
        }
    }

    /// The method name.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<M, I, O, E> Clone for Method<M, I, O, E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M, I, O, E> Copy for Method<M, I, O, E> {}

impl<M: Mock, I, O, E> Method<M, I, O, E> {
    pub(crate) fn id(&self) -> MethodId {
        MethodId {
            mock: TypeId::of::<M>(),
            service: M::NAME,
            method: self.name,
        }
    }
}

impl<M, I, O, E> Method<M, I, O, E>
where
    M: Mock,
    I: fmt::Debug + Send + Sync + 'static,
    O: Send + 'static,
    E: Send + 'static,
{
    /// Expect one call whose input satisfies `assertion`, answered by
    /// `returns`.
    pub fn expect(self, assertion: Assertion<I>, returns: Returns<I, O, E>) -> Expectation {
        Expectation::call(self, assertion, returns)
    }

    /// Expect one call with any input, answered by `returns`.
    pub fn returns(self, returns: Returns<I, O, E>) -> Expectation {
        Expectation::call(self, Assertion::anything(), returns)
    }
}

impl<M: Mock, I, O, E> fmt::Display for Method<M, I, O, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", M::NAME, self.name)
    }
}

impl<M: Mock, I, O, E> fmt::Debug for Method<M, I, O, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Method({}::{})", M::NAME, self.name)
    }
}

/// A method, with its types erased.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct MethodId {
    mock: TypeId,
    service: &'static str,
    method: &'static str,
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.service, self.method)
    }
}

impl fmt::Debug for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
