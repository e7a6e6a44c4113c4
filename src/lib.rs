//! # Reservoir
//!
//! Scoped resources, shareable dependency layers and verifiable mocks for
//! async Rust.
//!
//! - [`Managed`] describes a resource together with its release. Releases
//!   run exactly once, in reverse acquisition order, whether the scope ends
//!   in success, failure, a defect or interruption.
//! - [`Layer`] is a recipe for building an [`Environment`] of services.
//!   Layers compose horizontally and vertically, and a layer appearing
//!   several times in one graph is built once and shared.
//! - [`Expectation`](mock::Expectation) scripts the calls a mocked service
//!   must receive and compiles to a `Layer`, so the code under test is wired
//!   exactly as in production.
//!
//! All three run on [`Effect`], a lazy, cloneable, interruptible description
//! of an async computation that ends in an [`Exit`].
//!
//! ## Quick Example
//!
//! ```rust
//! use reservoir::layer::{Environment, Layer};
//! use reservoir::{Effect, Managed};
//! use std::sync::{Arc, Mutex};
//!
//! #[derive(Clone)]
//! struct Pool {
//!     size: usize,
//! }
//!
//! # tokio_test::block_on(async {
//! let events = Arc::new(Mutex::new(Vec::new()));
//! let closed = events.clone();
//!
//! let pool = Layer::<String>::from_managed(Managed::make(
//!     Effect::from_fn(|_| Ok(Pool { size: 4 })),
//!     move |_| {
//!         let closed = closed.clone();
//!         Effect::from_fn(move |_| {
//!             closed.lock().unwrap().push("pool closed");
//!             Ok(())
//!         })
//!     },
//! ));
//!
//! let program = Effect::<Pool, String, Environment>::service()
//!     .map(|pool| pool.size)
//!     .provide_layer(&pool);
//!
//! assert_eq!(program.run(&Environment::empty()).await, Ok(4));
//! assert_eq!(*events.lock().unwrap(), vec!["pool closed"]);
//! # });
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod effect;
pub mod exit;
pub mod layer;
pub mod managed;
pub mod mock;
pub mod retry;
pub mod testing;

// Re-exports
pub use effect::{BoxFuture, Effect, Fiber};
pub use exit::{Cause, Defect, Exit, ExitStatus};
pub use layer::{Environment, Layer, LayerError, LayerId, Tag};
pub use managed::{Managed, Reservation};
pub use mock::{Expectation, MockError};
pub use retry::{RetryExhausted, RetryPolicy};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::effect::{Effect, Fiber};
    pub use crate::exit::{Cause, Defect, Exit, ExitStatus};
    pub use crate::layer::{Environment, Layer, LayerError, Tag};
    pub use crate::managed::{Managed, Reservation};
    pub use crate::mock::{Assertion, Expectation, Method, Mock, MockError, Proxy, Repetitions, Returns};
    pub use crate::retry::{RetryExhausted, RetryPolicy};
}
