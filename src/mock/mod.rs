//! Scripted mocks that compile to layers.
//!
//! A mocked service is declared once: a marker type implementing [`Mock`],
//! one [`Method`] constant per method, and a service type whose methods
//! forward to a [`Proxy`]. Tests then describe the calls they expect as an
//! [`Expectation`] and provide it to the code under test with
//! [`Expectation::to_layer`].
//!
//! ```rust
//! use std::convert::Infallible;
//!
//! use reservoir::layer::Environment;
//! use reservoir::mock::{Assertion, Method, Mock, Proxy, Returns};
//! use reservoir::Effect;
//!
//! #[derive(Clone)]
//! struct Greeter {
//!     proxy: Proxy,
//! }
//!
//! impl Greeter {
//!     fn greet(&self, name: &str) -> Effect<String, Infallible, Environment> {
//!         self.proxy.invoke(&GreeterMock::GREET, name.to_owned())
//!     }
//! }
//!
//! struct GreeterMock;
//!
//! impl GreeterMock {
//!     const GREET: Method<GreeterMock, String, String> = Method::new("greet");
//! }
//!
//! impl Mock for GreeterMock {
//!     type Service = Greeter;
//!     const NAME: &'static str = "Greeter";
//!     fn build(proxy: Proxy) -> Greeter {
//!         Greeter { proxy }
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let script = GreeterMock::GREET.expect(
//!     Assertion::equal_to("ada".to_owned()),
//!     Returns::from_fn(|name: &String| format!("hello {name}")),
//! );
//!
//! let program = Effect::<Greeter, Infallible, Environment>::service()
//!     .and_then(|greeter| greeter.greet("ada"))
//!     .provide_layer(&script.to_layer());
//! assert_eq!(program.run(&Environment::empty()).await, Ok("hello ada".to_owned()));
//! # });
//! ```
//!
//! A call no open expectation accepts dies with [`MockError::UnexpectedCall`],
//! listing why each candidate turned it down. A script still unmet when a
//! successful scope closes dies with [`MockError::Unsatisfied`].

mod arena;
mod assertion;
mod error;
mod expectation;
mod method;
mod proxy;
mod repetitions;
mod returns;

#[cfg(test)]
mod tests;

pub use assertion::Assertion;
pub use error::{MockError, Rejection};
pub use expectation::Expectation;
pub use method::{Method, Mock};
pub use proxy::Proxy;
pub use repetitions::Repetitions;
pub use returns::Returns;

pub(crate) use method::MethodId;
