use thiserror::Error;

/// Errors produced by transaction lock operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// A lock key needs at least one participant.
    #[error("lock requires at least one participant")]
    EmptyParticipants,

    /// A participant identifier was empty.
    #[error("participant identifiers must not be empty")]
    EmptyParticipantId,
}

/// Convenience alias for lock operations.
pub type LockResult<T> = std::result::Result<T, LockError>;
