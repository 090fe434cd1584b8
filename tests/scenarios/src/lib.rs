//! # chat-scenarios
//!
//! End-to-end scenarios for the Bazaar chat sync engine.
//!
//! Two engines (buyer and seller) run against one shared mock backend, each
//! with its own realtime transport, so the tests exercise the full path from
//! a send on one side to the notification on the other:
//! - Inbox loading, ordering and unread counters
//! - Sending, moderation and attachment validation
//! - Batched read receipts
//! - Realtime invalidation and channel lifecycle
//! - Retries, request coalescing and late results

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod assertions;
pub mod harness;

pub mod scenarios;
