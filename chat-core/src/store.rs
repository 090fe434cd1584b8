//! Canonical in-memory chat state.
//!
//! The store holds the conversation list, the active conversation, the
//! per-conversation messages with their load state, typing flags and unread
//! counters of the current user.
//!
//! Ordering rules:
//! - Conversations: `last_message_time` descending, conversations without
//!   messages last, ties broken by `created_at` descending.
//! - Messages: `created_at` ascending (server time), ties broken by id.
//!   Arrival order is never trusted.
//!
//! Every fetch is tagged with the conversation's generation at scheduling
//! time. Closing a view bumps the generation so late results are dropped.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use chat_types::{ChatError, Conversation, ConversationId, Message, MessageId, UserId};

use crate::load_state::{LoadAction, LoadEvent, LoadState};

/// Local state of one conversation's messages.
#[derive(Debug, Default)]
struct ConversationEntry {
    load: LoadState,
    generation: u64,
    messages: Vec<Message>,
    typing: HashSet<UserId>,
}

/// Canonical chat state for one signed-in user.
#[derive(Debug)]
pub struct ConversationStore {
    current_user: UserId,
    conversations: HashMap<ConversationId, Conversation>,
    entries: HashMap<ConversationId, ConversationEntry>,
    unread: HashMap<ConversationId, u32>,
    active: Option<ConversationId>,
}

/// Order conversations for the inbox list.
pub fn conversation_order(a: &Conversation, b: &Conversation) -> Ordering {
    match (a.last_message_time, b.last_message_time) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| b.created_at.cmp(&a.created_at))
    .then_with(|| a.id.cmp(&b.id))
}

impl ConversationStore {
    /// Create an empty store for `current_user`.
    pub fn new(current_user: UserId) -> Self {
        Self {
            current_user,
            conversations: HashMap::new(),
            entries: HashMap::new(),
            unread: HashMap::new(),
            active: None,
        }
    }

    /// The signed-in user.
    pub fn current_user(&self) -> UserId {
        self.current_user
    }

    // ===========================================
    // Conversations
    // ===========================================

    /// Replace the conversation list with a fresh server snapshot.
    ///
    /// Rows violating the two-party invariant are rejected and returned.
    /// A locally known newer `last_message` survives an older snapshot.
    pub fn replace_conversations(&mut self, rows: Vec<Conversation>) -> Vec<ChatError> {
        let mut rejected = Vec::new();
        let mut next = HashMap::with_capacity(rows.len());
        for mut row in rows {
            if let Err(e) = row.validate() {
                rejected.push(e);
                continue;
            }
            if let Some(existing) = self.conversations.get(&row.id) {
                if existing.last_message_time > row.last_message_time {
                    row.last_message = existing.last_message.clone();
                    row.last_message_time = existing.last_message_time;
                }
            }
            next.insert(row.id, row);
        }
        self.conversations = next;
        rejected
    }

    /// Insert or replace a single conversation.
    pub fn upsert_conversation(&mut self, conversation: Conversation) -> Result<(), ChatError> {
        conversation.validate()?;
        self.conversations.insert(conversation.id, conversation);
        Ok(())
    }

    /// Look up a conversation.
    pub fn conversation(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations.get(id)
    }

    /// All conversations in inbox order.
    pub fn conversations(&self) -> Vec<Conversation> {
        let mut list: Vec<Conversation> = self.conversations.values().cloned().collect();
        list.sort_by(conversation_order);
        list
    }

    /// Update a conversation's last message from an inbound message.
    ///
    /// Returns true if the conversation is known and moved forward.
    pub fn touch_conversation(&mut self, message: &Message) -> bool {
        self.conversations
            .get_mut(&message.conversation_id)
            .is_some_and(|c| c.touch(message))
    }

    /// Number of known conversations.
    pub fn conversation_count(&self) -> usize {
        self.conversations.len()
    }

    /// Set the conversation the user is looking at.
    pub fn set_active(&mut self, id: Option<ConversationId>) {
        self.active = id;
    }

    /// The conversation the user is looking at.
    pub fn active(&self) -> Option<ConversationId> {
        self.active
    }

    // ===========================================
    // Load state
    // ===========================================

    /// Current load state of a conversation.
    pub fn load_state(&self, id: &ConversationId) -> LoadState {
        self.entries
            .get(id)
            .map(|entry| entry.load)
            .unwrap_or_default()
    }

    /// Current generation of a conversation.
    pub fn generation(&self, id: &ConversationId) -> u64 {
        self.entries.get(id).map(|e| e.generation).unwrap_or(0)
    }

    /// Feed a load event and return the actions to execute.
    ///
    /// `Closed` also drops messages and typing flags and bumps the generation.
    pub fn handle(&mut self, id: ConversationId, event: LoadEvent) -> Vec<LoadAction> {
        let entry = self.entries.entry(id).or_default();
        let (next, actions) = entry.load.on_event(event);
        entry.load = next;
        if actions.contains(&LoadAction::Discard) {
            entry.generation = entry.generation.wrapping_add(1);
            entry.messages.clear();
            entry.typing.clear();
        }
        actions
    }

    /// Conversations whose messages are known to be outdated.
    pub fn stale_conversations(&self) -> Vec<ConversationId> {
        let mut ids: Vec<ConversationId> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.load.is_stale())
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    // ===========================================
    // Messages
    // ===========================================

    /// Messages of a conversation in server order.
    pub fn messages(&self, id: &ConversationId) -> &[Message] {
        self.entries
            .get(id)
            .map(|entry| entry.messages.as_slice())
            .unwrap_or(&[])
    }

    /// Replace a conversation's messages with a fetched snapshot.
    ///
    /// Returns false (and drops the rows) if `generation` is outdated.
    pub fn replace_messages(
        &mut self,
        id: ConversationId,
        generation: u64,
        mut rows: Vec<Message>,
    ) -> bool {
        let entry = self.entries.entry(id).or_default();
        if entry.generation != generation {
            return false;
        }
        rows.retain(|m| m.conversation_id == id);
        rows.sort_by_key(Message::order_key);
        rows.dedup_by_key(|m| m.id);
        entry.messages = rows;
        if let (Some(last), Some(conversation)) =
            (entry.messages.last(), self.conversations.get_mut(&id))
        {
            conversation.touch(last);
        }
        true
    }

    /// Insert one message at its server-time position.
    ///
    /// A message already present (at-least-once delivery) is merged instead.
    /// Returns true if the message was new.
    pub fn append_message(&mut self, message: Message) -> bool {
        let id = message.conversation_id;
        if let Some(conversation) = self.conversations.get_mut(&id) {
            conversation.touch(&message);
        }
        let entry = self.entries.entry(id).or_default();
        if let Some(existing) = entry.messages.iter_mut().find(|m| m.id == message.id) {
            merge_message(existing, message);
            return false;
        }
        let key = message.order_key();
        let at = entry.messages.partition_point(|m| m.order_key() <= key);
        entry.messages.insert(at, message);
        true
    }

    /// Apply a server-side update (read flip or moderation censoring).
    ///
    /// Returns true if the message is held locally.
    pub fn apply_update(&mut self, message: Message) -> bool {
        let Some(entry) = self.entries.get_mut(&message.conversation_id) else {
            return false;
        };
        match entry.messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => {
                merge_message(existing, message);
                true
            }
            None => false,
        }
    }

    /// Flip messages to read. Returns the ids that actually changed.
    pub fn mark_read(&mut self, id: &ConversationId, ids: &[MessageId]) -> Vec<MessageId> {
        self.set_read(id, ids, true)
    }

    /// Flip messages back to unread (admin action). Returns changed ids.
    pub fn mark_unread(&mut self, id: &ConversationId, ids: &[MessageId]) -> Vec<MessageId> {
        self.set_read(id, ids, false)
    }

    fn set_read(&mut self, id: &ConversationId, ids: &[MessageId], read: bool) -> Vec<MessageId> {
        let Some(entry) = self.entries.get_mut(id) else {
            return Vec::new();
        };
        let wanted: HashSet<&MessageId> = ids.iter().collect();
        entry
            .messages
            .iter_mut()
            .filter(|m| wanted.contains(&m.id) && m.read != read)
            .map(|m| {
                m.read = read;
                m.id
            })
            .collect()
    }

    /// Ids of messages unread by the current user.
    pub fn unread_messages(&self, id: &ConversationId) -> Vec<MessageId> {
        self.messages(id)
            .iter()
            .filter(|m| m.is_unread_for(&self.current_user))
            .map(|m| m.id)
            .collect()
    }

    /// Visible messages that are unread and not sent by the current user,
    /// in server order.
    pub fn unread_candidates(&self, id: &ConversationId, visible: &[MessageId]) -> Vec<MessageId> {
        let visible: HashSet<&MessageId> = visible.iter().collect();
        self.messages(id)
            .iter()
            .filter(|m| visible.contains(&m.id) && m.is_unread_for(&self.current_user))
            .map(|m| m.id)
            .collect()
    }

    // ===========================================
    // Unread counters
    // ===========================================

    /// Replace all unread counters with a server snapshot.
    pub fn set_unread_counts(&mut self, counts: HashMap<ConversationId, u32>) {
        self.unread = counts;
    }

    /// Overwrite one counter.
    pub fn set_unread_count(&mut self, id: ConversationId, count: u32) {
        self.unread.insert(id, count);
    }

    /// Unread count of one conversation.
    pub fn unread_count(&self, id: &ConversationId) -> u32 {
        self.unread.get(id).copied().unwrap_or(0)
    }

    /// Sum over all conversations.
    pub fn total_unread(&self) -> u32 {
        self.unread.values().copied().fold(0, u32::saturating_add)
    }

    /// Increment one counter. Returns the new value.
    pub fn increment_unread(&mut self, id: ConversationId) -> u32 {
        let count = self.unread.entry(id).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Decrement one counter by `n`, never below zero. Returns the new value.
    pub fn decrement_unread(&mut self, id: ConversationId, n: u32) -> u32 {
        let count = self.unread.entry(id).or_insert(0);
        *count = count.saturating_sub(n);
        *count
    }

    // ===========================================
    // Typing
    // ===========================================

    /// Record a typing flag. Returns true if it changed.
    pub fn set_typing(&mut self, id: ConversationId, user: UserId, is_typing: bool) -> bool {
        let entry = self.entries.entry(id).or_default();
        if is_typing {
            entry.typing.insert(user)
        } else {
            entry.typing.remove(&user)
        }
    }

    /// Users currently typing in a conversation.
    pub fn typing_users(&self, id: &ConversationId) -> Vec<UserId> {
        let mut users: Vec<UserId> = self
            .entries
            .get(id)
            .map(|entry| entry.typing.iter().copied().collect())
            .unwrap_or_default();
        users.sort();
        users
    }

    /// Forget everything (session teardown).
    pub fn clear(&mut self) {
        self.conversations.clear();
        self.entries.clear();
        self.unread.clear();
        self.active = None;
    }
}

/// Merge a newer copy of a message into the held one.
///
/// Content and attachment follow the server; `read` only moves forward.
fn merge_message(existing: &mut Message, incoming: Message) {
    let read = existing.read || incoming.read;
    *existing = incoming;
    existing.read = read;
}
