//! Read-state scenarios: visibility passes settle into one `mark_read`.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chat_client::{ChatNotification, ChatSyncConfig};
    use chat_types::{Message, MessageId};

    use crate::assertions::check_single_read_batch;
    use crate::harness::{drain, ScenarioHarness};

    const WINDOW: Duration = Duration::from_millis(1000);

    fn ids(messages: &[Message]) -> Vec<MessageId> {
        messages.iter().map(|m| m.id).collect()
    }

    /// Scrolling through four unread messages in quick passes produces a
    /// single backend call and a single counter update.
    #[tokio::test(start_paused = true)]
    async fn quick_visibility_passes_commit_once() {
        let h = ScenarioHarness::setup();
        let unread: Vec<Message> = (0..4)
            .map(|i| h.seed(&h.seller, &format!("photo {}", i)))
            .collect();
        h.buyer.sync.fetch_conversations(h.buyer.user_id).await.unwrap();
        h.buyer.sync.open_conversation(h.conversation.id).await.unwrap();
        assert_eq!(h.buyer.sync.unread_count(&h.conversation.id), 4);
        let mut notifications = h.buyer.sync.subscribe();

        let ids = ids(&unread);
        for end in 1..=4 {
            h.buyer.sync.mark_read(h.conversation.id, &ids[..end]);
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        assert!(h.backend.mark_read_requests().is_empty());

        tokio::time::sleep(WINDOW * 2).await;

        check_single_read_batch(&h.backend.mark_read_requests(), &ids).assert();
        assert_eq!(h.buyer.sync.unread_count(&h.conversation.id), 0);
        assert!(h
            .buyer
            .sync
            .messages(&h.conversation.id)
            .iter()
            .all(|m| m.read));
        let reads: Vec<_> = drain(&mut notifications)
            .into_iter()
            .filter(|n| matches!(n, ChatNotification::MessagesRead { .. }))
            .collect();
        assert_eq!(reads.len(), 1);
    }

    /// Re-reporting the same screen while the commit is on the wire does
    /// not send it twice or decrement twice.
    #[tokio::test(start_paused = true)]
    async fn repeated_pass_during_slow_commit_counts_once() {
        let h = ScenarioHarness::setup();
        let unread: Vec<Message> = (0..5)
            .map(|i| h.seed(&h.seller, &format!("offer {}", i)))
            .collect();
        h.buyer.sync.fetch_conversations(h.buyer.user_id).await.unwrap();
        h.buyer.sync.open_conversation(h.conversation.id).await.unwrap();
        h.backend.set_latency(Duration::from_millis(500));
        let on_screen = ids(&unread[..2]);

        h.buyer.sync.mark_read(h.conversation.id, &on_screen);
        tokio::time::sleep(Duration::from_millis(1100)).await;
        h.buyer.sync.mark_read(h.conversation.id, &on_screen);
        tokio::time::sleep(WINDOW * 2).await;

        check_single_read_batch(&h.backend.mark_read_requests(), &on_screen).assert();
        assert_eq!(h.buyer.sync.unread_count(&h.conversation.id), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn own_messages_are_never_marked_read() {
        let h = ScenarioHarness::setup();
        let mine = h.seed(&h.buyer, "is it still for sale?");
        let theirs = h.seed(&h.seller, "yes");
        h.buyer.sync.open_conversation(h.conversation.id).await.unwrap();

        let pending = h.buyer.sync.mark_read(h.conversation.id, &[mine.id, theirs.id]);
        assert_eq!(pending, 1);
        tokio::time::sleep(WINDOW * 2).await;

        assert_eq!(h.backend.mark_read_requests(), vec![vec![theirs.id]]);
        assert!(!h.backend.stored_message(&mine.id).unwrap().read);
    }

    #[tokio::test(start_paused = true)]
    async fn messages_scrolled_away_stay_unread() {
        let h = ScenarioHarness::setup();
        let first = h.seed(&h.seller, "first");
        let second = h.seed(&h.seller, "second");
        h.buyer.sync.fetch_conversations(h.buyer.user_id).await.unwrap();
        h.buyer.sync.open_conversation(h.conversation.id).await.unwrap();

        h.buyer.sync.mark_read(h.conversation.id, &[first.id, second.id]);
        h.buyer.sync.mark_read(h.conversation.id, &[second.id]);
        tokio::time::sleep(WINDOW * 2).await;

        assert_eq!(h.backend.mark_read_requests(), vec![vec![second.id]]);
        assert_eq!(h.buyer.sync.unread_count(&h.conversation.id), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn closing_the_thread_drops_the_pending_batch() {
        let h = ScenarioHarness::setup();
        let message = h.seed(&h.seller, "hello?");
        h.buyer.sync.open_conversation(h.conversation.id).await.unwrap();

        h.buyer.sync.mark_read(h.conversation.id, &[message.id]);
        assert_eq!(h.buyer.sync.pending_reads(&h.conversation.id), vec![message.id]);
        h.buyer.sync.close_conversation(h.conversation.id).await;
        tokio::time::sleep(WINDOW * 2).await;

        assert!(h.backend.mark_read_requests().is_empty());
        assert!(h.buyer.sync.pending_reads(&h.conversation.id).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn settle_window_is_configurable() {
        let mut config = ChatSyncConfig::default();
        config.read_state.settle_window_ms = 250;
        let h = ScenarioHarness::with_config(config);
        let message = h.seed(&h.seller, "quick one");
        h.buyer.sync.open_conversation(h.conversation.id).await.unwrap();

        h.buyer.sync.mark_read(h.conversation.id, &[message.id]);
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(h.backend.mark_read_requests(), vec![vec![message.id]]);
    }

    /// The counter follows the server after a failed commit once the inbox
    /// is reloaded.
    #[tokio::test(start_paused = true)]
    async fn failed_commit_is_corrected_by_next_inbox_load() {
        let h = ScenarioHarness::setup();
        let message = h.seed(&h.seller, "hello");
        h.buyer.sync.fetch_conversations(h.buyer.user_id).await.unwrap();
        h.buyer.sync.open_conversation(h.conversation.id).await.unwrap();
        h.backend.fail_next(
            "mark_read",
            chat_client::BackendError::Network("connection reset".into()),
        );

        h.buyer.sync.mark_read(h.conversation.id, &[message.id]);
        tokio::time::sleep(WINDOW * 2).await;
        assert_eq!(h.buyer.sync.unread_count(&h.conversation.id), 0);

        h.buyer
            .sync
            .context()
            .invalidate(&chat_core::CacheKey::conversations(&h.buyer.user_id));
        h.buyer.sync.fetch_conversations(h.buyer.user_id).await.unwrap();
        assert_eq!(h.buyer.sync.unread_count(&h.conversation.id), 1);
    }
}
