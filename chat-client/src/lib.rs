//! # chat-client
//!
//! Client-side sync engine for Bazaar two-party chat.
//!
//! This is the library the marketplace UI uses to read and write chat data.
//!
//! ## Features
//!
//! - **Cache first**: TTL resource cache, bounded by priority then expiry, with in-flight invalidation
//! - **Request coalescing**: identical in-flight reads share one call
//! - **Bounded concurrency**: prioritized slots for conversation, message and profile loads
//! - **Realtime**: one deduplicated channel per conversation plus a user channel
//! - **Batched read receipts**: visibility passes settle into a single `mark_read`
//! - **Pure state machines**: load and retry logic lives in chat-core
//!
//! ## Example
//!
//! ```ignore
//! use chat_client::{ChatSync, ChatSyncConfig};
//!
//! let sync = ChatSync::builder(me, backend, realtime)
//!     .config(ChatSyncConfig::from_file(path)?)
//!     .build();
//!
//! let inbox = sync.load_conversations(me).await?;
//! sync.activate(me).await?;
//!
//! let messages = sync.open_conversation(inbox[0].id).await?;
//! sync.send_message(inbox[0].id, me, "Is this still available?", None).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod backend;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod reconciler;
mod refresh;
pub mod registry;
pub mod retry;
pub mod sync;

pub use backend::{
    ChatBackend, FileStorage, KeywordModeration, MockBackend, MockFileStorage, MockRealtime,
    ModerationValidator, ModerationVerdict, NoFileStorage, PassthroughModeration, RealtimeFilter,
    RealtimeStream, RealtimeTransport, Subscription,
};
pub use config::{ChatSyncConfig, ConfigError};
pub use context::{ConversationSnapshot, Resource, SyncContext};
pub use coordinator::{RequestCoordinator, DEFAULT_MAX_CONCURRENT};
pub use error::{BackendError, ClientError, ErrorKind, RealtimeError, StorageError};
pub use events::{ChatNotification, NotificationBus};
pub use reconciler::ReadStateReconciler;
pub use registry::{ChannelHandle, ChannelRegistry};
pub use retry::RetryController;
pub use sync::{ChatSync, ChatSyncBuilder};

/// Lock a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
