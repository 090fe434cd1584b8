//! Deterministic realtime channel names.
//!
//! One channel exists per (purpose, resource-id). Deriving the name from
//! that pair means re-subscribing always hits the same registry slot and
//! never leaks a duplicate subscription.

use std::fmt;

use chat_types::{ConversationId, UserId};

/// What a realtime channel is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelPurpose {
    /// Message inserts/updates and typing in one conversation.
    Messages,
    /// New conversations involving one user.
    Conversations,
}

impl ChannelPurpose {
    /// Prefix used in the channel name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Messages => "messages",
            Self::Conversations => "conversations",
        }
    }
}

/// Name of a realtime channel: `<purpose>:<resource-id>`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelName(String);

impl ChannelName {
    /// Derive the name for a purpose and resource.
    pub fn new(purpose: ChannelPurpose, resource: impl fmt::Display) -> Self {
        Self(format!("{}:{}", purpose.as_str(), resource))
    }

    /// Channel carrying one conversation's message events.
    pub fn for_conversation(id: &ConversationId) -> Self {
        Self::new(ChannelPurpose::Messages, id)
    }

    /// Channel carrying new-conversation events for a user.
    pub fn for_user(id: &UserId) -> Self {
        Self::new(ChannelPurpose::Conversations, id)
    }

    /// Which purpose the name encodes, if recognised.
    pub fn purpose(&self) -> Option<ChannelPurpose> {
        let (prefix, _) = self.0.split_once(':')?;
        match prefix {
            "messages" => Some(ChannelPurpose::Messages),
            "conversations" => Some(ChannelPurpose::Conversations),
            _ => None,
        }
    }

    /// The raw name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelName({})", self.0)
    }
}
