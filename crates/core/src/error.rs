use thiserror::Error;

/// Errors raised while constructing or validating an [`Action`](crate::Action).
///
/// These are programming/configuration errors: they are reported before any
/// I/O happens and are never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A field required by the action type is absent or empty.
    #[error("missing required field `{field}` for {action_type} action")]
    MissingField {
        action_type: &'static str,
        field: &'static str,
    },

    /// A field is present but its value is unusable.
    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// The config object could not be decoded for the given action type.
    #[error("invalid {action_type} config: {reason}")]
    InvalidConfig {
        action_type: &'static str,
        reason: String,
    },
}

impl ValidationError {
    pub(crate) fn missing(action_type: &'static str, field: &'static str) -> Self {
        Self::MissingField { action_type, field }
    }

    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}
