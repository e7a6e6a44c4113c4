use std::fmt;
use std::sync::Arc;

/// A named predicate over the input of a call.
///
/// The name shows up in mismatch reports, so assertions compose their
/// descriptions as well as their tests.
///
/// ```rust
/// use reservoir::mock::Assertion;
///
/// let small_even = Assertion::satisfies("even", |n: &u32| n % 2 == 0)
///     .and(Assertion::not_equal_to(0));
/// assert!(small_even.test(&4));
/// assert!(!small_even.test(&0));
/// assert_eq!(small_even.description(), "(even and not equal to 0)");
/// ```
pub struct Assertion<I> {
    description: String,
    test: Arc<dyn Fn(&I) -> bool + Send + Sync>,
}

impl<I> Clone for Assertion<I> {
    fn clone(&self) -> Self {
        Assertion {
            description: self.description.clone(),
            test: Arc::clone(&self.test),
        }
    }
}

impl<I: 'static> Assertion<I> {
    /// Accepts any input.
    pub fn anything() -> Self {
        Assertion::satisfies("anything", |_| true)
    }

    /// Accepts inputs equal to `expected`.
    pub fn equal_to(expected: I) -> Self
    where
        I: PartialEq + fmt::Debug + Send + Sync,
    {
        let description = format!("equal to {expected:?}");
        Assertion::satisfies(description, move |input| *input == expected)
    }

    /// Accepts inputs different from `unexpected`.
    pub fn not_equal_to(unexpected: I) -> Self
    where
        I: PartialEq + fmt::Debug + Send + Sync,
    {
        let description = format!("not equal to {unexpected:?}");
        Assertion::satisfies(description, move |input| *input != unexpected)
    }

    /// Accepts inputs for which `test` holds.
    pub fn satisfies<F>(description: impl Into<String>, test: F) -> Self
    where
        F: Fn(&I) -> bool + Send + Sync + 'static,
    {
        Assertion {
            description: description.into(),
            test: Arc::new(test),
        }
    }

    /// Both assertions hold.
    pub fn and(self, other: Assertion<I>) -> Self {
        let description = format!("({} and {})", self.description, other.description);
        Assertion::satisfies(description, move |input| self.test(input) && other.test(input))
    }

    /// Either assertion holds.
    pub fn or(self, other: Assertion<I>) -> Self {
        let description = format!("({} or {})", self.description, other.description);
        Assertion::satisfies(description, move |input| self.test(input) || other.test(input))
    }

    /// The assertion does not hold.
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        let description = format!("not {}", self.description);
        Assertion::satisfies(description, move |input| !self.test(input))
    }
}

impl<I> Assertion<I> {
    /// Run the predicate.
    pub fn test(&self, input: &I) -> bool {
        (self.test)(input)
    }

    /// What the assertion accepts.
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl<I> fmt::Debug for Assertion<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Assertion({})", self.description)
    }
}

impl<I> fmt::Display for Assertion<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}
