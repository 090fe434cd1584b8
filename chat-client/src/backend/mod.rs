//! Collaborator abstractions for the sync engine.
//!
//! The engine never talks to a concrete service. It is generic over:
//! - [`ChatBackend`]: the persistence/query service (conversations,
//!   messages, read flags, profiles)
//! - [`RealtimeTransport`]: push channels delivering row inserts/updates
//!   and typing broadcasts
//! - [`FileStorage`]: attachment uploads
//! - [`ModerationValidator`]: content moderation of outgoing text
//!
//! In-memory mocks live alongside for tests.
//!
//! # Example
//!
//! ```ignore
//! let backend = MockBackend::new();
//! let conversation = backend.seed_conversation(me, other);
//! let messages = backend.list_messages(&conversation.id).await?;
//! ```

mod mock;
mod mock_realtime;

pub use mock::{KeywordModeration, MockBackend, MockFileStorage};
pub use mock_realtime::MockRealtime;

use std::collections::HashMap;

use async_trait::async_trait;
use chat_core::ChannelName;
use chat_types::{
    AttachmentUpload, Conversation, ConversationId, Message, MessageId, NewMessage, OrderId,
    Profile, RealtimeEvent, UserId,
};
use tokio::sync::mpsc;

use crate::error::{BackendError, RealtimeError, StorageError};

/// Persistence/query service.
#[async_trait]
pub trait ChatBackend: Send + Sync + 'static {
    /// Conversations the user participates in (any order).
    async fn list_conversations(&self, user_id: &UserId)
        -> Result<Vec<Conversation>, BackendError>;

    /// Unread message counts per conversation for the user.
    async fn unread_counts(
        &self,
        user_id: &UserId,
    ) -> Result<HashMap<ConversationId, u32>, BackendError>;

    /// Messages of one conversation (any order).
    async fn list_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, BackendError>;

    /// Persist a message. The server assigns id, `created_at` and `read = false`.
    async fn insert_message(&self, message: NewMessage) -> Result<Message, BackendError>;

    /// Flip messages to read in one request.
    async fn mark_read(&self, ids: &[MessageId]) -> Result<(), BackendError>;

    /// Flip messages back to unread in one request.
    async fn mark_unread(&self, ids: &[MessageId]) -> Result<(), BackendError>;

    /// Public profile of a user.
    async fn get_profile(&self, user_id: &UserId) -> Result<Profile, BackendError>;

    /// Return the conversation between two users (scoped to an order, if
    /// given), creating it on first exchange.
    async fn find_or_create_conversation(
        &self,
        a: &UserId,
        b: &UserId,
        order_id: Option<OrderId>,
    ) -> Result<Conversation, BackendError>;
}

/// Which rows a realtime channel delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RealtimeFilter {
    /// Message inserts/updates and typing in one conversation.
    Conversation(ConversationId),
    /// New conversations and message inserts involving one user.
    Participant(UserId),
}

impl RealtimeFilter {
    /// Check whether an event passes this filter.
    ///
    /// `Participant` cannot see conversation membership from the event alone,
    /// so it passes inserts and leaves membership to the server.
    pub fn matches(&self, event: &RealtimeEvent) -> bool {
        match self {
            Self::Conversation(id) => event.conversation_id() == *id,
            Self::Participant(user) => match event {
                RealtimeEvent::ConversationInserted(c) => c.includes(user),
                RealtimeEvent::MessageInserted(_) => true,
                _ => false,
            },
        }
    }
}

/// Handle to a live subscription.
#[async_trait]
pub trait Subscription: Send + Sync {
    /// Stop delivery and release the channel.
    async fn unsubscribe(&self) -> Result<(), RealtimeError>;
}

/// A subscription and its event stream.
pub struct RealtimeStream {
    /// Handle used to unsubscribe.
    pub handle: Box<dyn Subscription>,
    /// Delivered events; closes when the subscription ends.
    pub events: mpsc::Receiver<RealtimeEvent>,
}

impl std::fmt::Debug for RealtimeStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeStream").finish_non_exhaustive()
    }
}

/// Push channel provider.
///
/// Delivery is at-least-once and unordered across channels.
#[async_trait]
pub trait RealtimeTransport: Send + Sync + 'static {
    /// Open a channel.
    async fn subscribe(
        &self,
        channel: &ChannelName,
        filter: RealtimeFilter,
    ) -> Result<RealtimeStream, RealtimeError>;

    /// Send an ephemeral event (typing) to the other subscribers of a channel.
    async fn broadcast(
        &self,
        channel: &ChannelName,
        event: RealtimeEvent,
    ) -> Result<(), RealtimeError>;
}

/// Attachment storage.
#[async_trait]
pub trait FileStorage: Send + Sync + 'static {
    /// Store a file and return its public URL.
    async fn upload(&self, upload: AttachmentUpload) -> Result<String, StorageError>;
}

/// Result of moderating a piece of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModerationVerdict {
    /// Whether the text may be sent.
    pub is_valid: bool,
    /// Text to send (possibly censored) when valid; the reason otherwise.
    pub message: String,
    /// Warning to show the sender, if any.
    pub warning_message: Option<String>,
    /// Whether a moderator should review the conversation.
    pub should_notify_moderator: bool,
}

impl ModerationVerdict {
    /// Accept `text` unchanged.
    pub fn accept(text: impl Into<String>) -> Self {
        Self {
            is_valid: true,
            message: text.into(),
            warning_message: None,
            should_notify_moderator: false,
        }
    }

    /// Refuse with a reason.
    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            message: reason.into(),
            warning_message: None,
            should_notify_moderator: false,
        }
    }
}

/// Content moderation of outgoing text.
#[async_trait]
pub trait ModerationValidator: Send + Sync + 'static {
    /// Judge a message body.
    async fn validate(&self, text: &str) -> ModerationVerdict;
}

/// Moderation that accepts everything unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughModeration;

#[async_trait]
impl ModerationValidator for PassthroughModeration {
    async fn validate(&self, text: &str) -> ModerationVerdict {
        ModerationVerdict::accept(text)
    }
}

/// Storage used when none is configured; every upload fails as unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFileStorage;

#[async_trait]
impl FileStorage for NoFileStorage {
    async fn upload(&self, _upload: AttachmentUpload) -> Result<String, StorageError> {
        Err(StorageError::Unavailable("no file storage configured".into()))
    }
}
