//! # chat-types
//!
//! Data model for the Bazaar two-party chat sync engine.
//!
//! This crate provides the records shared by all chat crates:
//! - [`UserId`], [`ConversationId`], [`MessageId`], [`OrderId`] - identity types
//! - [`Profile`], [`Conversation`], [`Message`], [`Attachment`] - persisted rows
//! - [`RealtimeEvent`] - change-feed events
//! - [`ChatError`] - model validation errors

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod events;
mod ids;
mod model;

pub use error::ChatError;
pub use events::RealtimeEvent;
pub use ids::{ConversationId, MessageId, OrderId, UserId};
pub use model::{
    Attachment, AttachmentUpload, Conversation, ConversationStatus, LastMessage, Message,
    MessageType, NewMessage, Profile, PREVIEW_CHARS,
};
