use std::fmt;

use crate::mock::MockError;

/// How many times a repeated expectation may run: `min`, `min + step`,
/// `min + 2 * step` and so on, up to `max` if there is one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Repetitions {
    min: usize,
    max: Option<usize>,
    step: usize,
}

impl Repetitions {
    /// A validated range.
    ///
    /// Fails if `step` is zero or `max` is below `min`.
    pub fn new(min: usize, max: Option<usize>, step: usize) -> Result<Self, MockError> {
        if step == 0 || max.is_some_and(|max| max < min) {
            return Err(MockError::InvalidRepetitions { min, max, step });
        }
        Ok(Repetitions { min, max, step })
    }

    fn checked(min: usize, max: Option<usize>) -> Self {
        match Repetitions::new(min, max, 1) {
            Ok(repetitions) => repetitions,
            Err(error) => panic!("{error}"),
        }
    }

    /// Exactly `n` times.
    pub fn exactly(n: usize) -> Self {
        Repetitions::checked(n, Some(n))
    }

    /// Between `min` and `max` times, inclusive.
    ///
    /// # Panics
    ///
    /// If `max < min`.
    pub fn between(min: usize, max: usize) -> Self {
        Repetitions::checked(min, Some(max))
    }

    /// At least `min` times.
    pub fn at_least(min: usize) -> Self {
        Repetitions::checked(min, None)
    }

    /// At most `max` times.
    pub fn at_most(max: usize) -> Self {
        Repetitions::checked(0, Some(max))
    }

    /// Fewest repetitions.
    pub fn min(&self) -> usize {
        self.min
    }

    /// Most repetitions, if bounded.
    pub fn max(&self) -> Option<usize> {
        self.max
    }

    /// Distance between allowed counts.
    pub fn step(&self) -> usize {
        self.step
    }

    /// True if `count` completed repetitions is an allowed outcome.
    pub fn contains(&self, count: usize) -> bool {
        count >= self.min
            && (count - self.min) % self.step == 0
            && self.max.is_none_or(|max| count <= max)
    }

    /// The largest allowed count, if bounded.
    pub fn last(&self) -> Option<usize> {
        self.max
            .map(|max| self.min + (max - self.min) / self.step * self.step)
    }

    /// True if another repetition may start after `completed`.
    pub(crate) fn allows_more(&self, completed: usize) -> bool {
        self.last().is_none_or(|last| completed < last)
    }
}

impl fmt::Display for Repetitions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) if max == self.min => write!(f, "exactly {max} times")?,
            Some(max) => write!(f, "between {} and {max} times", self.min)?,
            None => write!(f, "at least {} times", self.min)?,
        }
        if self.step > 1 {
            write!(f, " in steps of {}", self.step)?;
        }
        Ok(())
    }
}
