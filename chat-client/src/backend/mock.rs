//! In-memory backend, storage and moderation for testing.
//!
//! Mirrors the server's behaviour closely enough for the sync engine: the
//! server assigns ids and timestamps, read flags live on the rows, and
//! unread counts are derived from them. Calls are counted and failures can
//! be injected per operation.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chat_types::{
    AttachmentUpload, Conversation, ConversationId, Message, MessageId, MessageType, NewMessage,
    OrderId, Profile, UserId,
};
use chrono::{DateTime, Utc};

use super::{ChatBackend, FileStorage, ModerationValidator, ModerationVerdict};
use crate::error::{BackendError, StorageError};

/// Start of the mock server clock (2024-01-01T00:00:00Z).
const CLOCK_START: i64 = 1_704_067_200;

/// Mock persistence service for testing.
///
/// Clones share state, so a test can keep a handle after giving one to
/// the engine.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    inner: Arc<Mutex<MockBackendInner>>,
}

#[derive(Debug)]
struct MockBackendInner {
    conversations: Vec<Conversation>,
    messages: Vec<Message>,
    profiles: HashMap<UserId, Profile>,
    clock: DateTime<Utc>,
    calls: HashMap<&'static str, usize>,
    mark_read_requests: Vec<Vec<MessageId>>,
    mark_unread_requests: Vec<Vec<MessageId>>,
    fail_next: HashMap<&'static str, VecDeque<BackendError>>,
    latency: Duration,
}

impl Default for MockBackendInner {
    fn default() -> Self {
        Self {
            conversations: Vec::new(),
            messages: Vec::new(),
            profiles: HashMap::new(),
            clock: DateTime::from_timestamp(CLOCK_START, 0).unwrap_or_default(),
            calls: HashMap::new(),
            mark_read_requests: Vec::new(),
            mark_unread_requests: Vec::new(),
            fail_next: HashMap::new(),
            latency: Duration::ZERO,
        }
    }
}

impl MockBackendInner {
    /// Advance the server clock by one second and return the new time.
    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += chrono::Duration::seconds(1);
        self.clock
    }

    /// Count a call and pop an injected failure, if any.
    fn begin(&mut self, op: &'static str) -> Result<(), BackendError> {
        *self.calls.entry(op).or_insert(0) += 1;
        match self.fail_next.get_mut(op).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl MockBackend {
    /// Create an empty mock backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every response by `latency` (use with paused tokio time).
    pub fn set_latency(&self, latency: Duration) {
        self.inner.lock().unwrap().latency = latency;
    }

    /// Create a conversation between two users.
    pub fn seed_conversation(&self, a: UserId, b: UserId) -> Conversation {
        self.seed_conversation_for_order(a, b, None)
    }

    /// Create a conversation between two users about an order.
    pub fn seed_conversation_for_order(
        &self,
        a: UserId,
        b: UserId,
        order_id: Option<OrderId>,
    ) -> Conversation {
        let mut inner = self.inner.lock().unwrap();
        let created_at = inner.tick();
        let mut conversation = Conversation::new(ConversationId::new(), a, b, created_at)
            .expect("seeded conversation needs two distinct users");
        conversation.order_id = order_id;
        inner.conversations.push(conversation.clone());
        conversation
    }

    /// Store a message as if it had been inserted by `sender`.
    pub fn seed_message(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        content: &str,
    ) -> Message {
        let mut inner = self.inner.lock().unwrap();
        let created_at = inner.tick();
        let message = Message {
            id: MessageId::new(),
            conversation_id,
            order_id: None,
            sender_id,
            content: content.to_string(),
            attachment: None,
            read: false,
            created_at,
            message_type: MessageType::Text,
        };
        if let Some(c) = inner
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
        {
            c.touch(&message);
        }
        inner.messages.push(message.clone());
        message
    }

    /// Store a prepared message row as-is.
    pub fn add_message(&self, message: Message) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(c) = inner
            .conversations
            .iter_mut()
            .find(|c| c.id == message.conversation_id)
        {
            c.touch(&message);
        }
        inner.messages.push(message);
    }

    /// Store a profile.
    pub fn add_profile(&self, profile: Profile) {
        let mut inner = self.inner.lock().unwrap();
        inner.profiles.insert(profile.id, profile);
    }

    /// Stored rows of a conversation, in insertion order.
    pub fn stored_messages(&self, conversation_id: &ConversationId) -> Vec<Message> {
        let inner = self.inner.lock().unwrap();
        inner
            .messages
            .iter()
            .filter(|m| m.conversation_id == *conversation_id)
            .cloned()
            .collect()
    }

    /// One stored message.
    pub fn stored_message(&self, id: &MessageId) -> Option<Message> {
        let inner = self.inner.lock().unwrap();
        inner.messages.iter().find(|m| m.id == *id).cloned()
    }

    /// How many times an operation was called (e.g. `"list_messages"`).
    pub fn call_count(&self, op: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.calls.get(op).copied().unwrap_or(0)
    }

    /// Id lists of every `mark_read` request, in order.
    pub fn mark_read_requests(&self) -> Vec<Vec<MessageId>> {
        self.inner.lock().unwrap().mark_read_requests.clone()
    }

    /// Id lists of every `mark_unread` request, in order.
    pub fn mark_unread_requests(&self) -> Vec<Vec<MessageId>> {
        self.inner.lock().unwrap().mark_unread_requests.clone()
    }

    /// Cause the next call of `op` to fail with `error`.
    ///
    /// Repeated calls queue further failures.
    pub fn fail_next(&self, op: &'static str, error: BackendError) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next.entry(op).or_default().push_back(error);
    }

    /// Clear all state.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        *inner = MockBackendInner::default();
    }

    async fn simulate_latency(&self) {
        let latency = self.inner.lock().unwrap().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn set_read(&self, op: &'static str, ids: &[MessageId], read: bool) -> Result<(), BackendError> {
        let mut inner = self.inner.lock().unwrap();
        inner.begin(op)?;
        if read {
            inner.mark_read_requests.push(ids.to_vec());
        } else {
            inner.mark_unread_requests.push(ids.to_vec());
        }
        for message in inner.messages.iter_mut().filter(|m| ids.contains(&m.id)) {
            message.read = read;
        }
        Ok(())
    }
}

#[async_trait]
impl ChatBackend for MockBackend {
    async fn list_conversations(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<Conversation>, BackendError> {
        self.simulate_latency().await;
        let mut inner = self.inner.lock().unwrap();
        inner.begin("list_conversations")?;
        Ok(inner
            .conversations
            .iter()
            .filter(|c| c.includes(user_id))
            .cloned()
            .collect())
    }

    async fn unread_counts(
        &self,
        user_id: &UserId,
    ) -> Result<HashMap<ConversationId, u32>, BackendError> {
        self.simulate_latency().await;
        let mut inner = self.inner.lock().unwrap();
        inner.begin("unread_counts")?;
        let mut counts = HashMap::new();
        for conversation in inner.conversations.iter().filter(|c| c.includes(user_id)) {
            let unread = inner
                .messages
                .iter()
                .filter(|m| m.conversation_id == conversation.id && m.is_unread_for(user_id))
                .count() as u32;
            counts.insert(conversation.id, unread);
        }
        Ok(counts)
    }

    async fn list_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, BackendError> {
        self.simulate_latency().await;
        let mut inner = self.inner.lock().unwrap();
        inner.begin("list_messages")?;
        Ok(inner
            .messages
            .iter()
            .filter(|m| m.conversation_id == *conversation_id)
            .cloned()
            .collect())
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message, BackendError> {
        self.simulate_latency().await;
        let mut inner = self.inner.lock().unwrap();
        inner.begin("insert_message")?;
        if !inner
            .conversations
            .iter()
            .any(|c| c.id == message.conversation_id)
        {
            return Err(BackendError::NotFound(format!(
                "conversation {}",
                message.conversation_id
            )));
        }
        let created_at = inner.tick();
        let stored = Message {
            id: MessageId::new(),
            conversation_id: message.conversation_id,
            order_id: message.order_id,
            sender_id: message.sender_id,
            content: message.content,
            attachment: message.attachment,
            read: false,
            created_at,
            message_type: message.message_type,
        };
        if let Some(c) = inner
            .conversations
            .iter_mut()
            .find(|c| c.id == stored.conversation_id)
        {
            c.touch(&stored);
        }
        inner.messages.push(stored.clone());
        Ok(stored)
    }

    async fn mark_read(&self, ids: &[MessageId]) -> Result<(), BackendError> {
        self.simulate_latency().await;
        self.set_read("mark_read", ids, true)
    }

    async fn mark_unread(&self, ids: &[MessageId]) -> Result<(), BackendError> {
        self.simulate_latency().await;
        self.set_read("mark_unread", ids, false)
    }

    async fn get_profile(&self, user_id: &UserId) -> Result<Profile, BackendError> {
        self.simulate_latency().await;
        let mut inner = self.inner.lock().unwrap();
        inner.begin("get_profile")?;
        inner
            .profiles
            .get(user_id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("profile {}", user_id)))
    }

    async fn find_or_create_conversation(
        &self,
        a: &UserId,
        b: &UserId,
        order_id: Option<OrderId>,
    ) -> Result<Conversation, BackendError> {
        self.simulate_latency().await;
        let mut inner = self.inner.lock().unwrap();
        inner.begin("find_or_create_conversation")?;
        if let Some(existing) = inner
            .conversations
            .iter()
            .find(|c| c.includes(a) && c.includes(b) && c.order_id == order_id)
        {
            return Ok(existing.clone());
        }
        let created_at = inner.tick();
        let mut conversation = Conversation::new(ConversationId::new(), *a, *b, created_at)
            .map_err(|e| BackendError::Rejected(e.to_string()))?;
        conversation.order_id = order_id;
        inner.conversations.push(conversation.clone());
        Ok(conversation)
    }
}

/// Mock file storage for testing.
#[derive(Debug, Clone, Default)]
pub struct MockFileStorage {
    inner: Arc<Mutex<MockFileStorageInner>>,
}

#[derive(Debug, Default)]
struct MockFileStorageInner {
    uploads: Vec<AttachmentUpload>,
    fail_next: Option<StorageError>,
}

impl MockFileStorage {
    /// Create an empty mock storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Files uploaded so far.
    pub fn uploads(&self) -> Vec<AttachmentUpload> {
        self.inner.lock().unwrap().uploads.clone()
    }

    /// Cause the next upload to fail with `error`.
    pub fn fail_next(&self, error: StorageError) {
        self.inner.lock().unwrap().fail_next = Some(error);
    }
}

#[async_trait]
impl FileStorage for MockFileStorage {
    async fn upload(&self, upload: AttachmentUpload) -> Result<String, StorageError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.fail_next.take() {
            return Err(error);
        }
        let url = format!(
            "https://files.bazaar.test/attachments/{}/{}",
            inner.uploads.len() + 1,
            upload.file_name
        );
        inner.uploads.push(upload);
        Ok(url)
    }
}

/// Word-list moderation for testing.
///
/// Blocked words reject the message and flag it for a moderator; censored
/// words are replaced by asterisks.
#[derive(Debug, Clone, Default)]
pub struct KeywordModeration {
    blocked: Vec<String>,
    censored: Vec<String>,
    checked: Arc<Mutex<Vec<String>>>,
}

impl KeywordModeration {
    /// Create a validator with no rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject messages containing `word`.
    pub fn block(mut self, word: &str) -> Self {
        self.blocked.push(word.to_lowercase());
        self
    }

    /// Mask `word` in accepted messages.
    pub fn censor(mut self, word: &str) -> Self {
        self.censored.push(word.to_lowercase());
        self
    }

    /// Texts validated so far.
    pub fn checked(&self) -> Vec<String> {
        self.checked.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModerationValidator for KeywordModeration {
    async fn validate(&self, text: &str) -> ModerationVerdict {
        self.checked.lock().unwrap().push(text.to_string());
        let lowered = text.to_lowercase();
        if self.blocked.iter().any(|w| lowered.contains(w.as_str())) {
            return ModerationVerdict {
                should_notify_moderator: true,
                ..ModerationVerdict::reject("message contains prohibited content")
            };
        }
        let mut censored = text.to_string();
        let mut changed = false;
        for word in &self.censored {
            while let Some(at) = censored.to_lowercase().find(word.as_str()) {
                censored.replace_range(at..at + word.len(), &"*".repeat(word.len()));
                changed = true;
            }
        }
        ModerationVerdict {
            warning_message: changed.then(|| "some words were hidden".to_string()),
            ..ModerationVerdict::accept(censored)
        }
    }
}
