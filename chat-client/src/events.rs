//! Notification bus.
//!
//! The orchestrator publishes what changed; badges, lists and open views
//! subscribe instead of polling. Each subscriber gets its own
//! [`broadcast::Receiver`]; a slow subscriber lags and skips notifications
//! rather than blocking the engine.

use chat_types::{Conversation, ConversationId, Message, MessageId, UserId};
use tokio::sync::broadcast;
use tracing::trace;

/// Something the UI may want to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatNotification {
    /// A batch of messages was marked read.
    MessagesRead {
        /// Conversation of the batch.
        conversation_id: ConversationId,
        /// Messages flipped to read.
        message_ids: Vec<MessageId>,
        /// Unread count after the batch.
        unread_count: u32,
    },
    /// A conversation's summary or messages changed locally.
    ConversationUpdated {
        /// Changed conversation.
        conversation_id: ConversationId,
    },
    /// A message arrived over realtime.
    MessageReceived {
        /// The inserted row.
        message: Message,
    },
    /// Local messages of a conversation are outdated.
    ConversationStale {
        /// Outdated conversation.
        conversation_id: ConversationId,
    },
    /// Someone started or stopped typing.
    TypingChanged {
        /// Conversation being typed in.
        conversation_id: ConversationId,
        /// Who is typing.
        user_id: UserId,
        /// Current state.
        is_typing: bool,
    },
    /// A conversation involving the user was created.
    NewConversation {
        /// The new conversation.
        conversation: Conversation,
    },
    /// A load gave up after its retries.
    LoadFailed {
        /// Cache key of the resource.
        resource: String,
        /// Final error message.
        error: String,
    },
}

/// Publish/subscribe bus for [`ChatNotification`]s.
#[derive(Debug, Clone)]
pub struct NotificationBus {
    sender: broadcast::Sender<ChatNotification>,
}

impl NotificationBus {
    /// Create a bus buffering `capacity` notifications per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to every notification published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatNotification> {
        self.sender.subscribe()
    }

    /// Publish a notification. Returns how many subscribers received it.
    pub fn publish(&self, notification: ChatNotification) -> usize {
        match self.sender.send(notification) {
            Ok(count) => count,
            Err(broadcast::error::SendError(dropped)) => {
                trace!("No subscribers for {:?}", dropped);
                0
            }
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(256)
    }
}
