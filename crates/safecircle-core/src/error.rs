use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

/// Failure kinds returned by every core operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Malformed input: empty destination, unknown incident type, blank chat text.
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown incident or user id.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation not legal in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// An injected collaborator failed.
    #[error("backend error: {0}")]
    Backend(String),
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        CoreError::NotFound(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        CoreError::InvalidState(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        CoreError::Backend(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::NotFound(_))
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self, CoreError::InvalidState(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, CoreError::Validation(_))
    }
}
