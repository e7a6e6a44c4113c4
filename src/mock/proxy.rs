use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::effect::Effect;
use crate::exit::{Defect, Exit};
use crate::mock::arena::Arena;
use crate::mock::expectation::signature;
use crate::mock::{Method, Mock, MockError};

/// Routes calls on mocked services to the expectation script.
///
/// Every service built from one [`Expectation`](crate::mock::Expectation)
/// layer shares the same proxy, so ordering constraints hold across
/// services.
#[derive(Clone)]
pub struct Proxy {
    state: Arc<Mutex<Arena>>,
}

impl Proxy {
    pub(crate) fn new(arena: Arena) -> Self {
        Proxy {
            state: Arc::new(Mutex::new(arena)),
        }
    }

    /// Match a call against the script and produce its answer.
    ///
    /// The outer `Err` is a script violation, the inner result is what the
    /// expectation told the method to return.
    pub fn try_invoke<M, I, O, E>(&self, method: &Method<M, I, O, E>, input: I) -> Result<Result<O, E>, MockError>
    where
        M: Mock,
        I: fmt::Debug + Send + Sync + 'static,
        O: Send + 'static,
        E: Send + 'static,
    {
        let id = method.id();
        let matched = {
            let mut arena = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            arena.dispatch(id, signature::<I, O, E>(), &input, || format!("{input:?}"))?
        };
        // Answers may be arbitrary user code; run them without the lock held.
        let answer = matched
            .respond(&input)
            .ok_or_else(|| MockError::TypeMismatch { method: id.to_string() })?;
        answer
            .downcast::<Result<O, E>>()
            .map(|answer| *answer)
            .map_err(|_| MockError::TypeMismatch { method: id.to_string() })
    }

    /// The effect of calling `method` with `input`.
    ///
    /// A call the script does not allow dies with the [`MockError`] as its
    /// defect. Matching happens each time the effect runs.
    pub fn invoke<M, I, O, E, Env>(&self, method: &Method<M, I, O, E>, input: I) -> Effect<O, E, Env>
    where
        M: Mock,
        I: Clone + fmt::Debug + Send + Sync + 'static,
        O: Send + 'static,
        E: Send + 'static,
        Env: Clone + Send + Sync + 'static,
    {
        let proxy = self.clone();
        let method = *method;
        Effect::from_exit_fn(move |_| match proxy.try_invoke(&method, input.clone()) {
            Ok(Ok(value)) => Exit::succeed(value),
            Ok(Err(error)) => Exit::fail(error),
            Err(violation) => Exit::die(Defect::from_error(violation)),
        })
    }

    /// Ok if every branch of the script is met.
    pub fn verify(&self) -> Result<(), MockError> {
        let arena = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if arena.is_satisfied() {
            Ok(())
        } else {
            Err(MockError::Unsatisfied { unmet: arena.unmet() })
        }
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arena = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Proxy")
            .field("script", &arena.describe(arena.root()))
            .field("satisfied", &arena.is_satisfied())
            .finish()
    }
}
