//! Sync scenarios, organized by concern:
//!
//! - `inbox` - conversation list loading, ordering, counters, coalescing
//! - `messaging` - sending, moderation, attachments
//! - `read_state` - batched read receipts
//! - `realtime` - invalidation, typing, channel lifecycle
//! - `resilience` - retries, concurrency limits, late results

pub mod inbox;
pub mod messaging;
pub mod read_state;
pub mod realtime;
pub mod resilience;
