use thiserror::Error;

/// Convenience alias for Results carrying [`OrchestratorError`].
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Error taxonomy for the orchestration core.
///
/// Every fallible public operation on the engine, bus, and memory layers
/// returns one of these variants so callers can branch on error kind
/// instead of parsing messages.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("illegal state transition: {0}")]
    ConflictState(String),

    #[error("circuit '{name}' is open")]
    CircuitOpen { name: String },

    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("timeout: {message}")]
    Timeout { message: String },

    #[error("delivery failed: {0}")]
    DeliveryFailure(String),

    #[error("configuration error: {0}")]
    ConfigurationError(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl OrchestratorError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::ConflictState(msg.into())
    }

    pub fn capacity(msg: impl Into<String>) -> Self {
        Self::CapacityExceeded(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout {
            message: msg.into(),
        }
    }

    /// Errors the caller may retry unchanged, as opposed to errors that
    /// require fixing the request before resubmitting.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CircuitOpen { .. } | Self::Timeout { .. } | Self::DeliveryFailure(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(OrchestratorError::CircuitOpen { name: "x".into() }.is_retryable());
        assert!(OrchestratorError::timeout("slow").is_retryable());
        assert!(!OrchestratorError::invalid("bad field").is_retryable());
    }

    #[test]
    fn display_messages_are_stable() {
        let e = OrchestratorError::not_found("task abc");
        assert_eq!(e.to_string(), "not found: task abc");
    }
}
