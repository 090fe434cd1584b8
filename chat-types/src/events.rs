//! Realtime events delivered by the change feed.
//!
//! Delivery is at-least-once with no ordering guarantee; consumers must be
//! idempotent and order by server timestamps.

use serde::{Deserialize, Serialize};

use crate::{Conversation, ConversationId, Message, UserId};

/// An event pushed by the realtime transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealtimeEvent {
    /// A message row was inserted.
    MessageInserted(Message),
    /// A message row changed (read flag flipped or content censored).
    MessageUpdated(Message),
    /// A conversation involving the subscribed user was created.
    ConversationInserted(Conversation),
    /// The other party started or stopped typing.
    Typing {
        /// Conversation being typed in.
        conversation_id: ConversationId,
        /// Who is typing.
        user_id: UserId,
        /// Current typing state.
        is_typing: bool,
    },
}

impl RealtimeEvent {
    /// Conversation the event concerns.
    pub fn conversation_id(&self) -> ConversationId {
        match self {
            Self::MessageInserted(m) | Self::MessageUpdated(m) => m.conversation_id,
            Self::ConversationInserted(c) => c.id,
            Self::Typing {
                conversation_id, ..
            } => *conversation_id,
        }
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MessageInserted(_) => "message_inserted",
            Self::MessageUpdated(_) => "message_updated",
            Self::ConversationInserted(_) => "conversation_inserted",
            Self::Typing { .. } => "typing",
        }
    }
}
