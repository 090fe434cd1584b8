//! Read-state reconciler.
//!
//! Visibility passes from an open conversation view are coalesced per
//! conversation: every pass cancels the pending settle timer and starts a
//! new one. When the window elapses without another pass, the candidates
//! still visible are flipped locally, the unread counter drops once by the
//! number of messages that changed, and a single backend `mark_read`
//! commits the batch.
//!
//! Read-state is optimistic. A failed commit is logged and the local flip is
//! kept; the server flag wins on the next full fetch. Ids being committed
//! are not collected again until the backend call returns.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chat_core::{ConversationStore, ReadBatch};
use chat_types::{ConversationId, MessageId};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

use crate::backend::ChatBackend;
use crate::events::{ChatNotification, NotificationBus};
use crate::lock;

/// Pending batch and its settle timer.
#[derive(Default)]
struct PendingBatch {
    batch: ReadBatch,
    timer: Option<JoinHandle<()>>,
}

struct ReconcilerInner<B> {
    backend: Arc<B>,
    store: Arc<Mutex<ConversationStore>>,
    bus: NotificationBus,
    settle_window: Duration,
    batches: Mutex<HashMap<ConversationId, PendingBatch>>,
}

/// Debounced mark-read batching.
pub struct ReadStateReconciler<B> {
    inner: Arc<ReconcilerInner<B>>,
}

impl<B> Clone for ReadStateReconciler<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: ChatBackend> ReadStateReconciler<B> {
    /// Create a reconciler committing through `backend` into `store`.
    pub fn new(
        backend: Arc<B>,
        store: Arc<Mutex<ConversationStore>>,
        bus: NotificationBus,
        settle_window: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ReconcilerInner {
                backend,
                store,
                bus,
                settle_window,
                batches: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Record which messages of `conversation` are on screen.
    ///
    /// Visible, unread messages from the other party join the pending batch
    /// and the settle timer restarts. Returns the pending batch size.
    pub fn observe_visible(&self, conversation: ConversationId, visible: &[MessageId]) -> usize {
        let candidates = lock(&self.inner.store).unread_candidates(&conversation, visible);

        let mut batches = lock(&self.inner.batches);
        let pending = batches.entry(conversation).or_default();
        let has_pending = pending.batch.observe(visible.iter().copied(), &candidates);
        if let Some(timer) = pending.timer.take() {
            trace!("Rescheduling read batch for {}", conversation);
            timer.abort();
        }
        if !has_pending {
            return 0;
        }
        pending.timer = Some(self.spawn_settle_timer(conversation));
        pending.batch.pending().len()
    }

    /// Re-run the last visibility pass after new messages were loaded.
    pub fn offer(&self, conversation: ConversationId) -> usize {
        let visible = lock(&self.inner.batches)
            .get(&conversation)
            .map(|p| p.batch.visible_ids());
        match visible {
            Some(visible) if !visible.is_empty() => self.observe_visible(conversation, &visible),
            _ => 0,
        }
    }

    /// Ids waiting for the settle window.
    pub fn pending(&self, conversation: &ConversationId) -> Vec<MessageId> {
        lock(&self.inner.batches)
            .get(conversation)
            .map(|p| p.batch.pending().to_vec())
            .unwrap_or_default()
    }

    /// Drop the pending batch and timer of one conversation.
    pub fn cancel(&self, conversation: &ConversationId) {
        if let Some(pending) = lock(&self.inner.batches).remove(conversation) {
            if let Some(timer) = pending.timer {
                timer.abort();
            }
            debug!(
                "Dropped {} pending reads for {}",
                pending.batch.pending().len(),
                conversation
            );
        }
    }

    /// Drop every pending batch and timer.
    pub fn cancel_all(&self) {
        let drained: Vec<PendingBatch> = lock(&self.inner.batches).drain().map(|(_, p)| p).collect();
        for pending in drained {
            if let Some(timer) = pending.timer {
                timer.abort();
            }
        }
    }

    fn spawn_settle_timer(&self, conversation: ConversationId) -> JoinHandle<()> {
        let this = self.clone();
        let window = self.inner.settle_window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let ids = {
                let mut batches = lock(&this.inner.batches);
                match batches.get_mut(&conversation) {
                    Some(pending) => {
                        pending.timer = None;
                        pending.batch.settle()
                    }
                    None => return,
                }
            };
            if ids.is_empty() {
                trace!("Nothing still visible to mark read in {}", conversation);
                return;
            }
            this.apply_locally(conversation, &ids);
            // Detached so a later visibility pass cannot abort a commit.
            tokio::spawn(async move { this.commit(conversation, ids).await });
        })
    }

    fn apply_locally(&self, conversation: ConversationId, ids: &[MessageId]) {
        let (flipped, unread_count) = {
            let mut store = lock(&self.inner.store);
            let flipped = store.mark_read(&conversation, ids);
            let unread_count = store.decrement_unread(conversation, flipped.len() as u32);
            (flipped, unread_count)
        };
        if flipped.is_empty() {
            return;
        }
        self.inner.bus.publish(ChatNotification::MessagesRead {
            conversation_id: conversation,
            message_ids: flipped,
            unread_count,
        });
    }

    async fn commit(&self, conversation: ConversationId, ids: Vec<MessageId>) {
        debug!("Marking {} messages read in {}", ids.len(), conversation);
        if let Err(e) = self.inner.backend.mark_read(&ids).await {
            error!(
                "Failed to mark {} messages read in {}: {}",
                ids.len(),
                conversation,
                e
            );
        }
        if let Some(pending) = lock(&self.inner.batches).get_mut(&conversation) {
            pending.batch.committed(&ids);
        }
    }
}
