//! Inbox scenarios: initial load, ordering, counters, request coalescing.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chat_client::ErrorKind;
    use chat_core::LoadState;
    use chat_types::UserId;

    use crate::assertions::{check_inbox_order, check_thread_order};
    use crate::harness::ScenarioHarness;

    /// Initial load brings counters, and nothing is marked read before the
    /// thread is actually on screen.
    #[tokio::test(start_paused = true)]
    async fn initial_load_counts_unread_without_marking_read() {
        let h = ScenarioHarness::setup();
        h.seed(&h.seller, "hi, is the bike still available?");
        h.seed(&h.seller, "I can pick it up today");
        h.seed(&h.buyer, "yes it is");

        let inbox = h.buyer.sync.load_conversations(h.buyer.user_id).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(h.buyer.sync.unread_count(&h.conversation.id), 2);
        assert_eq!(h.buyer.sync.total_unread(), 2);

        let thread = h.buyer.sync.open_conversation(h.conversation.id).await.unwrap();
        assert_eq!(thread.len(), 3);
        check_thread_order(&thread).assert();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(h.backend.mark_read_requests().is_empty());
        assert_eq!(h.buyer.sync.unread_count(&h.conversation.id), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn inbox_orders_by_latest_message() {
        let h = ScenarioHarness::setup();
        let me = h.buyer.user_id;
        let quiet = h.backend.seed_conversation(me, UserId::new());
        let older = h.backend.seed_conversation(me, UserId::new());
        h.backend.seed_message(older.id, me, "older thread");
        h.seed(&h.seller, "newest thread");

        let inbox = h.buyer.sync.fetch_conversations(me).await.unwrap();

        check_inbox_order(&inbox).assert();
        let ids: Vec<_> = inbox.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![h.conversation.id, older.id, quiet.id]);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_inbox_loads_share_one_request() {
        let h = ScenarioHarness::setup();
        h.backend.set_latency(Duration::from_millis(100));
        let me = h.buyer.user_id;

        let (a, b) = tokio::join!(
            h.buyer.sync.fetch_conversations(me),
            h.buyer.sync.fetch_conversations(me)
        );

        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(h.backend.call_count("list_conversations"), 1);
        assert_eq!(h.backend.call_count("unread_counts"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_thread_loads_share_one_request() {
        let h = ScenarioHarness::setup();
        h.seed(&h.seller, "hello");
        h.backend.set_latency(Duration::from_millis(100));
        let id = h.conversation.id;

        let (a, b, c) = tokio::join!(
            h.buyer.sync.fetch_messages(id),
            h.buyer.sync.fetch_messages(id),
            h.buyer.sync.fetch_messages(id)
        );

        assert_eq!(a.unwrap().len(), 1);
        assert_eq!(b.unwrap().len(), 1);
        assert_eq!(c.unwrap().len(), 1);
        assert_eq!(h.backend.call_count("list_messages"), 1);
        assert_eq!(h.buyer.sync.load_state(&id), LoadState::Loaded);
    }

    #[tokio::test(start_paused = true)]
    async fn cached_inbox_expires_after_ttl() {
        let h = ScenarioHarness::setup();
        let me = h.buyer.user_id;

        h.buyer.sync.fetch_conversations(me).await.unwrap();
        h.buyer.sync.fetch_conversations(me).await.unwrap();
        assert_eq!(h.backend.call_count("list_conversations"), 1);

        tokio::time::advance(Duration::from_secs(301)).await;
        h.buyer.sync.fetch_conversations(me).await.unwrap();
        assert_eq!(h.backend.call_count("list_conversations"), 2);
    }

    #[tokio::test]
    async fn inbox_of_another_user_is_refused() {
        let h = ScenarioHarness::setup();

        let err = h
            .buyer
            .sync
            .fetch_conversations(h.seller.user_id)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(h.backend.call_count("list_conversations"), 0);
    }

    #[tokio::test]
    async fn profiles_load_once_per_session() {
        let h = ScenarioHarness::setup();
        h.backend.add_profile(chat_types::Profile {
            id: h.seller.user_id,
            username: "bikeshop".into(),
            full_name: None,
            avatar_url: Some("https://cdn.bazaar.test/a/bikeshop.png".into()),
            last_seen: None,
        });

        for _ in 0..3 {
            let profile = h.buyer.sync.fetch_profile(h.seller.user_id).await.unwrap();
            assert_eq!(profile.display_name(), "bikeshop");
        }
        assert_eq!(h.backend.call_count("get_profile"), 1);

        let missing = h.buyer.sync.fetch_profile(UserId::new()).await.unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::Unknown);
    }
}
