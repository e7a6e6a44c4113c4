use std::fmt;

use crate::layer::Tag;

/// A layer graph that cannot be wired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerError {
    /// A layer needs a capability nothing upstream provides.
    MissingCapability {
        /// The capability that is missing.
        tag: Tag,
        /// The layer that needs it.
        layer: String,
    },
    /// Two distinct layers provide the same capability.
    DuplicateCapability {
        /// The capability provided twice.
        tag: Tag,
        /// The first provider.
        left: String,
        /// The second provider.
        right: String,
    },
}

impl fmt::Display for LayerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerError::MissingCapability { tag, layer } => {
                write!(f, "layer `{layer}` requires `{tag}`, which is not provided")
            }
            LayerError::DuplicateCapability { tag, left, right } => {
                write!(f, "`{tag}` is provided by both `{left}` and `{right}`")
            }
        }
    }
}

impl std::error::Error for LayerError {}
