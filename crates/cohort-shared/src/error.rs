use thiserror::Error;

/// Errors surfaced synchronously by every chat operation.
///
/// None of these are retried by the core; the caller decides.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// The named entity does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// A capability check failed.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The operation would violate a store-level invariant.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Malformed structured payload, or a sub-operation on the wrong message type.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("User is already a member of this group")]
    AlreadyMember,

    #[error("The announcement group cannot be joined or left")]
    AnnouncementNotJoinable,

    #[error("Group admins cannot be removed")]
    CannotRemoveAdmin,

    #[error("Message is not a poll")]
    NotAPoll,

    #[error("Message is not an event")]
    NotAnEvent,

    /// Persistent store failure.
    #[error("Store error: {0}")]
    Store(String),
}

impl ChatError {
    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden(reason.into())
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidPayload(reason.into())
    }
}

pub type ChatResult<T> = std::result::Result<T, ChatError>;
