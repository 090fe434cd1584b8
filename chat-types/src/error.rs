//! Error types for the chat data model.

use thiserror::Error;

use crate::UserId;

/// Model-level validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// A conversation needs two distinct participants.
    #[error("conversation needs two distinct participants, got {user_id} twice")]
    SelfConversation {
        /// The duplicated participant.
        user_id: UserId,
    },

    /// Message has neither text nor attachment.
    #[error("message must have content or an attachment")]
    EmptyMessage,

    /// Attachment failed size or type checks.
    #[error("invalid attachment: {0}")]
    InvalidAttachment(String),
}
