use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;

/// How a mocked call answers.
pub struct Returns<I, O, E = Infallible> {
    produce: Arc<dyn Fn(&I) -> Result<O, E> + Send + Sync>,
}

impl<I, O, E> Clone for Returns<I, O, E> {
    fn clone(&self) -> Self {
        Returns {
            produce: Arc::clone(&self.produce),
        }
    }
}

impl<I, O, E> fmt::Debug for Returns<I, O, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Returns(<function>)")
    }
}

impl<I, O, E> Returns<I, O, E>
where
    I: 'static,
    O: 'static,
    E: 'static,
{
    /// Always succeed with `value`.
    pub fn value(value: O) -> Self
    where
        O: Clone + Send + Sync,
    {
        Returns::from_result(move |_| Ok(value.clone()))
    }

    /// Always fail with `error`.
    pub fn failure(error: E) -> Self
    where
        E: Clone + Send + Sync,
    {
        Returns::from_result(move |_| Err(error.clone()))
    }

    /// Succeed with a value computed from the input.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&I) -> O + Send + Sync + 'static,
    {
        Returns::from_result(move |input| Ok(f(input)))
    }

    /// Answer with a result computed from the input.
    pub fn from_result<F>(f: F) -> Self
    where
        F: Fn(&I) -> Result<O, E> + Send + Sync + 'static,
    {
        Returns {
            produce: Arc::new(f),
        }
    }

    pub(crate) fn produce(&self, input: &I) -> Result<O, E> {
        (self.produce)(input)
    }
}

impl<I: 'static, E: 'static> Returns<I, (), E> {
    /// Succeed with `()`.
    pub fn unit() -> Self {
        Returns::from_result(|_| Ok(()))
    }
}
