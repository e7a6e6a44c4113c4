use std::fmt;

/// Why one expected call did not accept an invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The expectation is for another method.
    InvalidMethod {
        /// The method the expectation is for.
        expected: String,
        /// The method that was called.
        actual: String,
    },
    /// The method matched, the arguments did not.
    InvalidArguments {
        /// The method.
        method: String,
        /// The assertion the arguments failed.
        assertion: String,
    },
    /// The method matched, but was declared with other types.
    InvalidSignature {
        /// The method.
        method: String,
    },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::InvalidMethod { expected, actual } => {
                write!(f, "expected a call to {expected}, got {actual}")
            }
            Rejection::InvalidArguments { method, assertion } => {
                write!(f, "{method} called with arguments that are not {assertion}")
            }
            Rejection::InvalidSignature { method } => {
                write!(f, "{method} called with types it was not declared with")
            }
        }
    }
}

/// Errors raised by mocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockError {
    /// No open expectation accepts the call.
    UnexpectedCall {
        /// The method that was called.
        method: String,
        /// The arguments, debug-formatted.
        input: String,
        /// Why each candidate expectation turned it down.
        rejected: Vec<Rejection>,
    },
    /// The scope closed with expectations still unmet.
    Unsatisfied {
        /// Descriptions of the unmet branches.
        unmet: Vec<String>,
    },
    /// A repetition range that can never be satisfied.
    InvalidRepetitions {
        /// Fewest repetitions.
        min: usize,
        /// Most repetitions, if bounded.
        max: Option<usize>,
        /// Distance between allowed counts.
        step: usize,
    },
    /// A method was declared twice with different types.
    TypeMismatch {
        /// The method.
        method: String,
    },
}

impl fmt::Display for MockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MockError::UnexpectedCall {
                method,
                input,
                rejected,
            } => {
                write!(f, "unexpected call {method}({input})")?;
                for rejection in rejected {
                    write!(f, "\n  - {rejection}")?;
                }
                Ok(())
            }
            MockError::Unsatisfied { unmet } => {
                write!(f, "unsatisfied expectations:")?;
                for branch in unmet {
                    write!(f, "\n  - {branch}")?;
                }
                Ok(())
            }
            MockError::InvalidRepetitions { min, max, step } => match max {
                Some(max) => write!(f, "invalid repetitions {min}..={max} by {step}"),
                None => write!(f, "invalid repetitions {min}.. by {step}"),
            },
            MockError::TypeMismatch { method } => {
                write!(f, "{method} is declared with conflicting types")
            }
        }
    }
}

impl std::error::Error for MockError {}
