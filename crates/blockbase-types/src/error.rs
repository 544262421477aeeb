//! Validation errors for caller-supplied data.

use thiserror::Error;

/// Input that cannot be stored. Raised before any transaction begins and
/// never worth retrying.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    /// Every block needs a root; a block without ancestry points to itself.
    #[error("block root_id must not be empty")]
    EmptyRootId,

    /// A field value has no JSON representation.
    #[error("field '{key}' cannot be serialized: {reason}")]
    UnserializableField {
        /// Dotted path to the offending value (`outer.inner[2]`).
        key: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// A patch batch whose id list and patch list disagree.
    #[error("patch batch has {ids} block ids but {patches} patches")]
    BatchLengthMismatch { ids: usize, patches: usize },

    /// Subtree depth outside the supported range.
    #[error("subtree depth {0} is not supported (expected 1 or 2)")]
    InvalidDepth(u8),
}

impl ValidationError {
    pub fn unserializable(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnserializableField {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for validation.
pub type ValidationResult<T> = std::result::Result<T, ValidationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ValidationError::unserializable("progress.ratio", "NaN");
        let msg = err.to_string();
        assert!(msg.contains("progress.ratio"));
        assert!(msg.contains("NaN"));

        let err = ValidationError::BatchLengthMismatch { ids: 3, patches: 2 };
        assert!(err.to_string().contains("3 block ids"));
    }
}
