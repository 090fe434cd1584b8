//! # chat-core
//!
//! Pure logic for Bazaar chat sync (no I/O, instant tests).
//!
//! This crate implements the state machines and bookkeeping of the sync
//! engine without any network access, timers or async, enabling fast unit
//! tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. Time is passed in, never read. The actual I/O
//! (fetching, realtime subscriptions, timers) is performed by `chat-client`,
//! which interprets the actions produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod channel;
pub mod load_state;
pub mod read_batch;
pub mod retry;
pub mod store;
pub mod validation;

pub use cache::{CacheEntry, CacheKey, CacheOptions, Priority, ResourceCache};
pub use channel::{ChannelName, ChannelPurpose};
pub use load_state::{LoadAction, LoadEvent, LoadState};
pub use read_batch::ReadBatch;
pub use retry::{RetryAction, RetryEvent, RetryPolicy, RetryState};
pub use store::{conversation_order, ConversationStore};
pub use validation::{validate_outgoing, AttachmentRules};
