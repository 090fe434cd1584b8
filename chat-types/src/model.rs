//! Records exchanged with the persistence service.
//!
//! These mirror the rows of the remote store. The server assigns ids and
//! `created_at`; the client never invents either for a persisted row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ChatError, ConversationId, MessageId, OrderId, UserId};

/// Public profile of a marketplace user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// User id.
    pub id: UserId,
    /// Unique handle.
    pub username: String,
    /// Display name, if set.
    pub full_name: Option<String>,
    /// Avatar image URL, if set.
    pub avatar_url: Option<String>,
    /// Last time the user was seen online.
    pub last_seen: Option<DateTime<Utc>>,
}

impl Profile {
    /// Name to show in a conversation header.
    pub fn display_name(&self) -> &str {
        self.full_name.as_deref().unwrap_or(&self.username)
    }
}

/// Lifecycle status of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    /// Open for new messages.
    #[default]
    Active,
    /// Hidden from the default list, still readable.
    Archived,
    /// One party blocked the other; no new messages.
    Blocked,
}

/// Denormalized reference to the latest message of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessage {
    /// Id of the latest message.
    pub id: MessageId,
    /// Sender of the latest message.
    pub sender_id: UserId,
    /// Short preview of the content.
    pub preview: String,
}

/// Maximum number of characters kept in a [`LastMessage`] preview.
pub const PREVIEW_CHARS: usize = 120;

impl LastMessage {
    /// Build a reference from a full message.
    pub fn from_message(message: &Message) -> Self {
        let preview = if message.content.is_empty() {
            message
                .attachment
                .as_ref()
                .map(|a| a.name.clone())
                .unwrap_or_default()
        } else {
            message.content.chars().take(PREVIEW_CHARS).collect()
        };
        Self {
            id: message.id,
            sender_id: message.sender_id,
            preview,
        }
    }
}

/// A two-party conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Conversation id.
    pub id: ConversationId,
    /// The two participants.
    pub participants: [UserId; 2],
    /// Latest message, if any was exchanged.
    pub last_message: Option<LastMessage>,
    /// Server timestamp of the latest message.
    pub last_message_time: Option<DateTime<Utc>>,
    /// Server timestamp of creation.
    pub created_at: DateTime<Utc>,
    /// Lifecycle status.
    #[serde(default)]
    pub status: ConversationStatus,
    /// Order this conversation is about, if any.
    #[serde(default)]
    pub order_id: Option<OrderId>,
}

impl Conversation {
    /// Create an empty conversation between two distinct users.
    pub fn new(
        id: ConversationId,
        a: UserId,
        b: UserId,
        created_at: DateTime<Utc>,
    ) -> Result<Self, ChatError> {
        let conversation = Self {
            id,
            participants: [a, b],
            last_message: None,
            last_message_time: None,
            created_at,
            status: ConversationStatus::Active,
            order_id: None,
        };
        conversation.validate()?;
        Ok(conversation)
    }

    /// Attach the conversation to an order.
    pub fn with_order(mut self, order_id: OrderId) -> Self {
        self.order_id = Some(order_id);
        self
    }

    /// Check the two-party invariant.
    pub fn validate(&self) -> Result<(), ChatError> {
        if self.participants[0] == self.participants[1] {
            return Err(ChatError::SelfConversation {
                user_id: self.participants[0],
            });
        }
        Ok(())
    }

    /// Whether `user` takes part in this conversation.
    pub fn includes(&self, user: &UserId) -> bool {
        self.participants.contains(user)
    }

    /// The participant that is not `me`.
    pub fn other_participant(&self, me: &UserId) -> Option<UserId> {
        match self.participants {
            [a, b] if a == *me => Some(b),
            [a, b] if b == *me => Some(a),
            _ => None,
        }
    }

    /// Record `message` as the latest one if it is newer than the current.
    ///
    /// Returns true if the reference changed.
    pub fn touch(&mut self, message: &Message) -> bool {
        let newer = match self.last_message_time {
            Some(t) => message.created_at >= t,
            None => true,
        };
        if newer {
            self.last_message = Some(LastMessage::from_message(message));
            self.last_message_time = Some(message.created_at);
        }
        newer
    }
}

/// Kind of content a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Plain text.
    #[default]
    Text,
    /// Image attachment (optionally with a caption).
    Image,
    /// Any other file attachment.
    File,
    /// Generated by the platform (order updates and the like).
    System,
}

/// A file attached to a message. Only the resulting URL matters here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Stable public URL returned by file storage.
    pub url: String,
    /// MIME type.
    #[serde(rename = "type")]
    pub content_type: String,
    /// Original file name.
    pub name: String,
}

impl Attachment {
    /// Whether the attachment is an image.
    pub fn is_image(&self) -> bool {
        self.content_type.starts_with("image/")
    }

    /// Message type implied by this attachment.
    pub fn message_type(&self) -> MessageType {
        if self.is_image() {
            MessageType::Image
        } else {
            MessageType::File
        }
    }
}

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message id.
    pub id: MessageId,
    /// Conversation the message belongs to.
    pub conversation_id: ConversationId,
    /// Order the message refers to, if any.
    #[serde(default)]
    pub order_id: Option<OrderId>,
    /// Author.
    pub sender_id: UserId,
    /// Text content, possibly censored by moderation.
    pub content: String,
    /// Optional attachment.
    #[serde(default)]
    pub attachment: Option<Attachment>,
    /// Whether the recipient has read the message.
    pub read: bool,
    /// Server-assigned creation time.
    pub created_at: DateTime<Utc>,
    /// Kind of content.
    #[serde(default)]
    pub message_type: MessageType,
}

impl Message {
    /// Unread and written by someone other than `user`.
    pub fn is_unread_for(&self, user: &UserId) -> bool {
        !self.read && self.sender_id != *user
    }

    /// Ordering key: server time first, id as a deterministic tie-breaker.
    pub fn order_key(&self) -> (DateTime<Utc>, MessageId) {
        (self.created_at, self.id)
    }
}

/// Insert payload for a new message; the server assigns id and time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    /// Target conversation.
    pub conversation_id: ConversationId,
    /// Order reference, copied from the conversation.
    pub order_id: Option<OrderId>,
    /// Author.
    pub sender_id: UserId,
    /// Text content as approved by moderation.
    pub content: String,
    /// Optional attachment.
    pub attachment: Option<Attachment>,
    /// Kind of content.
    pub message_type: MessageType,
}

impl NewMessage {
    /// Build an insert payload, inferring the message type.
    pub fn new(
        conversation_id: ConversationId,
        sender_id: UserId,
        content: String,
        attachment: Option<Attachment>,
    ) -> Self {
        let message_type = attachment
            .as_ref()
            .map(Attachment::message_type)
            .unwrap_or(MessageType::Text);
        Self {
            conversation_id,
            order_id: None,
            sender_id,
            content,
            attachment,
            message_type,
        }
    }

    /// Attach an order reference.
    pub fn with_order(mut self, order_id: Option<OrderId>) -> Self {
        self.order_id = order_id;
        self
    }
}

/// A raw file handed to storage before it becomes an [`Attachment`].
#[derive(Clone)]
pub struct AttachmentUpload {
    /// Original file name.
    pub file_name: String,
    /// MIME type as reported by the picker.
    pub content_type: String,
    /// File contents.
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for AttachmentUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachmentUpload")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("bytes", &format!("[{} bytes]", self.bytes.len()))
            .finish()
    }
}
