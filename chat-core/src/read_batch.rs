//! Read-state batching for Bazaar chat.
//!
//! This module collects message ids that should be marked read for one
//! conversation. It is pure bookkeeping; the settle timer lives in
//! chat-client.
//!
//! Messages flow through the batch in this order:
//! 1. `observe()` - record the latest visible set and add new candidates
//! 2. `settle()` - after the settle window, take the candidates that are
//!    still visible
//!
//! 3. `committed()` - the backend acknowledged (or failed) the settled ids
//!
//! A candidate that scrolled out of view before the window elapsed is
//! dropped; it comes back through `observe()` the next time it is visible.
//! Settled ids stay out of `observe()` until `committed()` so a pass made
//! while the commit is in flight cannot queue them twice.

use std::collections::HashSet;

use chat_types::MessageId;

/// Pending mark-read batch for one conversation.
#[derive(Debug, Default, Clone)]
pub struct ReadBatch {
    /// Ids visible in the latest pass.
    visible: HashSet<MessageId>,
    /// Candidates collected since the last settle, in first-seen order.
    pending: Vec<MessageId>,
    /// Settled ids whose commit has not finished.
    committing: HashSet<MessageId>,
}

impl ReadBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a visibility pass.
    ///
    /// `visible` replaces the previous visible set; `candidates` (visible,
    /// unread, not own) are added to the pending batch. Returns true if the
    /// batch has anything pending.
    pub fn observe<I>(&mut self, visible: I, candidates: &[MessageId]) -> bool
    where
        I: IntoIterator<Item = MessageId>,
    {
        self.visible = visible.into_iter().collect();
        for id in candidates {
            if !self.pending.contains(id) && !self.committing.contains(id) {
                self.pending.push(*id);
            }
        }
        !self.pending.is_empty()
    }

    /// Take every pending id that is still visible and reset the batch.
    ///
    /// The returned ids count as committing until [`committed`](Self::committed).
    pub fn settle(&mut self) -> Vec<MessageId> {
        let visible = &self.visible;
        let settled: Vec<MessageId> = self
            .pending
            .drain(..)
            .filter(|id| visible.contains(id))
            .collect();
        self.committing.extend(settled.iter().copied());
        settled
    }

    /// Release ids whose commit finished.
    pub fn committed(&mut self, ids: &[MessageId]) {
        for id in ids {
            self.committing.remove(id);
        }
    }

    /// Check if a commit from this batch is still in flight.
    pub fn is_committing(&self) -> bool {
        !self.committing.is_empty()
    }

    /// Ids waiting for the settle window.
    pub fn pending(&self) -> &[MessageId] {
        &self.pending
    }

    /// Ids visible in the latest pass, unordered.
    pub fn visible_ids(&self) -> Vec<MessageId> {
        self.visible.iter().copied().collect()
    }

    /// Check if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop pending ids and the visible set.
    pub fn clear(&mut self) {
        self.visible.clear();
        self.pending.clear();
    }
}
