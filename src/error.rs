// consentry/src/error.rs

use thiserror::Error;

/// Outcome of a failing policy hook.
///
/// `Security` is a flavor of validation failure: both abort the operation
/// before its body runs. `Processing` is raised after the body ran and only
/// annotates the result.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HookError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Security(String),
    #[error("{0}")]
    Processing(String),
}

impl HookError {
    pub fn validation(msg: impl Into<String>) -> Self { Self::Validation(msg.into()) }
    pub fn security(msg: impl Into<String>) -> Self { Self::Security(msg.into()) }
    pub fn processing(msg: impl Into<String>) -> Self { Self::Processing(msg.into()) }

    /// True for `Validation` and its `Security` subtype.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Security(_))
    }

    pub fn is_security(&self) -> bool { matches!(self, Self::Security(_)) }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Security(_) => "security",
            Self::Processing(_) => "processing",
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("model request failed: {0}")]
    Request(String),
    #[error("assistant responded with an empty message")]
    Empty,
    /// The transport has nothing more to say; the conversation ends.
    #[error("transport has no further responses")]
    Exhausted,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContractError {
    #[error("response does not match the contract: {}", .0.join("; "))]
    InvalidResponse(Vec<String>),
    #[error("operation type '{0}' is not active")]
    InactiveType(String),
    #[error("invalid {tag} operation: {message}")]
    InvalidOperation { tag: String, message: String },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no response model available: the active capability set is empty")]
    EmptyCapabilitySet,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error("interrupted")]
    Interrupted,
    #[error("a model call is already in flight")]
    ModelBusy,
    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Errors the conversation loop offers to retry or amend.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Contract(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_is_a_validation_failure() {
        let err = HookError::security("dangerous");
        assert!(err.is_validation());
        assert!(err.is_security());
        assert_eq!(err.to_string(), "dangerous");
    }

    #[test]
    fn processing_is_not_validation() {
        let err = HookError::processing("late");
        assert!(!err.is_validation());
        assert_eq!(err.kind(), "processing");
    }

    #[test]
    fn only_transport_and_contract_errors_are_recoverable() {
        assert!(EngineError::from(TransportError::Empty).is_recoverable());
        assert!(EngineError::from(ContractError::InactiveType("x".into())).is_recoverable());
        assert!(!EngineError::EmptyCapabilitySet.is_recoverable());
        assert!(!EngineError::Interrupted.is_recoverable());
    }
}
