//! Realtime scenarios: invalidation, typing, channel lifecycle.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chat_client::ChatNotification;
    use chat_core::{CacheKey, ChannelName, LoadState};
    use chat_types::{OrderId, RealtimeEvent};

    use crate::harness::{drain, ScenarioHarness};

    /// An insert for a thread that is loaded but not on screen marks it
    /// stale and notifies, without fetching.
    #[tokio::test(start_paused = true)]
    async fn insert_for_closed_thread_only_marks_stale() {
        let h = ScenarioHarness::setup();
        h.seed(&h.seller, "earlier");
        let buyer = &h.buyer.sync;
        buyer.activate(h.buyer.user_id).await.unwrap();
        buyer.fetch_messages(h.conversation.id).await.unwrap();
        let fetches = h.backend.call_count("list_messages");
        let mut notifications = buyer.subscribe();

        let sent = h.send(&h.seller, "price drop!", None).await.unwrap();
        h.settle().await;

        assert_eq!(buyer.load_state(&h.conversation.id), LoadState::Stale);
        assert_eq!(h.backend.call_count("list_messages"), fetches);
        assert!(buyer
            .context()
            .cached(&CacheKey::messages(&h.conversation.id))
            .is_none());

        let received = drain(&mut notifications);
        assert!(received.iter().any(|n| matches!(
            n,
            ChatNotification::MessageReceived { message } if message.id == sent.id
        )));
        assert!(received.contains(&ChatNotification::ConversationStale {
            conversation_id: h.conversation.id
        }));

        // The next read catches up.
        let thread = buyer.fetch_messages(h.conversation.id).await.unwrap();
        assert_eq!(thread.last().unwrap().id, sent.id);
        assert_eq!(buyer.load_state(&h.conversation.id), LoadState::Loaded);
    }

    #[tokio::test(start_paused = true)]
    async fn insert_for_open_thread_refreshes_it() {
        let h = ScenarioHarness::setup();
        h.buyer.sync.open_conversation(h.conversation.id).await.unwrap();

        let sent = h.send(&h.seller, "sending the tracking number", None).await.unwrap();
        h.settle().await;

        let thread = h.buyer.sync.messages(&h.conversation.id);
        assert_eq!(thread.len(), 1);
        assert_eq!(thread[0].id, sent.id);
        assert_eq!(h.buyer.sync.load_state(&h.conversation.id), LoadState::Loaded);
    }

    #[tokio::test(start_paused = true)]
    async fn censored_update_replaces_local_copy() {
        let h = ScenarioHarness::setup();
        let original = h.seed(&h.seller, "call me on 555-0100");
        h.buyer.sync.open_conversation(h.conversation.id).await.unwrap();

        let mut censored = original.clone();
        censored.content = "call me on [removed]".into();
        h.backend.reset();
        h.backend.add_message(censored.clone());
        h.deliver(RealtimeEvent::MessageUpdated(censored));
        h.settle().await;

        assert_eq!(
            h.buyer.sync.messages(&h.conversation.id)[0].content,
            "call me on [removed]"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn typing_reaches_the_other_party_only() {
        let h = ScenarioHarness::setup();
        h.buyer.sync.open_conversation(h.conversation.id).await.unwrap();
        h.seller.sync.open_conversation(h.conversation.id).await.unwrap();

        h.seller
            .sync
            .set_typing(h.conversation.id, h.seller.user_id, true)
            .await;
        let (_, event) = h.seller.realtime.broadcasts().pop().unwrap();
        h.deliver(event);
        h.settle().await;

        assert_eq!(
            h.buyer.sync.typing_users(&h.conversation.id),
            vec![h.seller.user_id]
        );
        // The seller's own echo is ignored; only the local flag is set.
        assert_eq!(
            h.seller.sync.typing_users(&h.conversation.id),
            vec![h.seller.user_id]
        );
        assert!(h.backend.stored_messages(&h.conversation.id).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn new_conversation_is_announced_and_subscribed() {
        let h = ScenarioHarness::setup();
        h.seller.sync.activate(h.seller.user_id).await.unwrap();
        let mut notifications = h.seller.sync.subscribe();

        let about_order = h
            .buyer
            .sync
            .start_conversation(h.seller.user_id, Some(OrderId::new()))
            .await
            .unwrap();
        h.deliver(RealtimeEvent::ConversationInserted(about_order.clone()));
        h.settle().await;

        assert!(drain(&mut notifications).contains(&ChatNotification::NewConversation {
            conversation: about_order.clone()
        }));
        assert!(h
            .seller
            .realtime
            .is_open(&ChannelName::for_conversation(&about_order.id)));
        assert_eq!(h.seller.sync.conversations().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn activation_opens_one_channel_per_conversation() {
        let h = ScenarioHarness::setup();
        h.backend.seed_conversation(h.buyer.user_id, chat_types::UserId::new());

        let open = h.buyer.sync.activate(h.buyer.user_id).await.unwrap();
        assert_eq!(open, 3);

        // Re-activation and re-opening do not subscribe twice.
        h.buyer.sync.activate(h.buyer.user_id).await.unwrap();
        h.buyer.sync.open_conversation(h.conversation.id).await.unwrap();
        assert_eq!(h.buyer.realtime.subscribe_calls().len(), 3);
        assert_eq!(h.buyer.realtime.open_channels().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe_all_closes_every_channel() {
        let h = ScenarioHarness::setup();
        h.buyer.sync.activate(h.buyer.user_id).await.unwrap();
        h.buyer.sync.open_conversation(h.conversation.id).await.unwrap();

        let closed = h.buyer.sync.unsubscribe_all().await;

        assert_eq!(closed, 2);
        assert!(h.buyer.realtime.open_channels().is_empty());
        assert!(h.buyer.sync.context().registry().is_empty());

        h.send(&h.seller, "anyone there?", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.buyer.sync.load_state(&h.conversation.id), LoadState::Loaded);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_subscription_does_not_block_loading() {
        let h = ScenarioHarness::setup();
        h.seed(&h.seller, "hi");
        h.buyer.realtime.fail_next_subscribe("socket closed");

        let thread = h.buyer.sync.open_conversation(h.conversation.id).await.unwrap();

        assert_eq!(thread.len(), 1);
        assert!(h.buyer.sync.context().registry().is_empty());
    }
}
