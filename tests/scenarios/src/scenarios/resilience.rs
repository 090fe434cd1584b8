//! Resilience scenarios: bounded retries, concurrency limits, late results.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chat_client::{BackendError, ChatNotification, ChatSyncConfig, ClientError, ErrorKind};
    use chat_core::{LoadState, RetryState};
    use tokio::time::Instant;

    use crate::harness::{drain, ScenarioHarness};

    fn outage() -> BackendError {
        BackendError::Network("503 service unavailable".into())
    }

    /// Three attempts, spaced by the base delay and then twice the base
    /// delay, then a terminal error the UI can offer a retry for.
    #[tokio::test(start_paused = true)]
    async fn inbox_load_gives_up_after_three_attempts() {
        let h = ScenarioHarness::setup();
        for _ in 0..3 {
            h.backend.fail_next("list_conversations", outage());
        }
        let mut notifications = h.buyer.sync.subscribe();
        let started = Instant::now();

        let err = h
            .buyer
            .sync
            .load_conversations(h.buyer.user_id)
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(err.kind(), ErrorKind::Network);
        assert_eq!(h.backend.call_count("list_conversations"), 3);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(4), "elapsed {:?}", elapsed);
        assert_eq!(
            h.buyer.sync.conversations_retry_state(),
            RetryState::Exhausted { attempts: 3 }
        );
        assert!(drain(&mut notifications)
            .iter()
            .any(|n| matches!(n, ChatNotification::LoadFailed { .. })));

        // Manual retry starts a fresh cycle.
        let inbox = h
            .buyer
            .sync
            .retry_load_conversations(h.buyer.user_id)
            .await
            .unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(h.buyer.sync.conversations_retry_state(), RetryState::Idle);
    }

    /// A view that stops waiting for its inbox must not wedge later loads.
    #[tokio::test(start_paused = true)]
    async fn abandoned_inbox_load_can_be_retried() {
        let h = ScenarioHarness::setup();
        h.backend.set_latency(Duration::from_secs(5));

        let abandoned = tokio::time::timeout(
            Duration::from_millis(100),
            h.buyer.sync.load_conversations(h.buyer.user_id),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(h.buyer.sync.conversations_retry_state(), RetryState::Idle);

        h.backend.set_latency(Duration::ZERO);
        let inbox = h
            .buyer
            .sync
            .retry_load_conversations(h.buyer.user_id)
            .await
            .unwrap();
        assert_eq!(inbox.len(), 1);
        assert!(h
            .buyer
            .sync
            .load_conversations(h.buyer.user_id)
            .await
            .is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_thread_failure_recovers_automatically() {
        let h = ScenarioHarness::setup();
        h.seed(&h.seller, "hello");
        h.backend.fail_next("list_messages", BackendError::Timeout);

        let thread = h.buyer.sync.load_messages(h.conversation.id).await.unwrap();

        assert_eq!(thread.len(), 1);
        assert_eq!(h.backend.call_count("list_messages"), 2);
        assert_eq!(h.buyer.sync.load_state(&h.conversation.id), LoadState::Loaded);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_retry_while_waiting_supersedes_the_timer() {
        let h = ScenarioHarness::setup();
        h.backend.fail_next("list_messages", outage());
        let sync = h.buyer.sync.clone();
        let id = h.conversation.id;
        let automatic = tokio::spawn(async move { sync.load_messages(id).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(matches!(
            h.buyer.sync.messages_retry_state(&id),
            RetryState::Waiting { attempt: 1, .. }
        ));

        let manual = h.buyer.sync.retry_load_messages(id).await;
        assert!(manual.is_ok());
        assert!(matches!(
            automatic.await.unwrap(),
            Err(ClientError::Cancelled)
        ));
        assert_eq!(h.backend.call_count("list_messages"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_limit_serializes_requests() {
        let mut config = ChatSyncConfig::default();
        config.requests.max_concurrent = 1;
        let h = ScenarioHarness::with_config(config);
        h.backend.add_profile(chat_types::Profile {
            id: h.seller.user_id,
            username: "bikeshop".into(),
            full_name: None,
            avatar_url: None,
            last_seen: None,
        });
        h.backend.set_latency(Duration::from_millis(100));
        let started = Instant::now();

        let (inbox, profile) = tokio::join!(
            h.buyer.sync.fetch_conversations(h.buyer.user_id),
            h.buyer.sync.fetch_profile(h.seller.user_id)
        );

        inbox.unwrap();
        profile.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    /// Results arriving after the thread was closed are discarded.
    #[tokio::test(start_paused = true)]
    async fn late_result_after_close_is_dropped() {
        let h = ScenarioHarness::setup();
        h.seed(&h.seller, "hello");
        h.backend.set_latency(Duration::from_millis(500));
        let sync = h.buyer.sync.clone();
        let id = h.conversation.id;
        let opening = tokio::spawn(async move { sync.open_conversation(id).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        h.buyer.sync.close_conversation(id).await;
        let _ = opening.await.unwrap();

        assert!(h.buyer.sync.messages(&id).is_empty());
        assert_eq!(h.buyer.sync.load_state(&id), LoadState::Unloaded);
        assert_eq!(h.buyer.sync.active_conversation(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_keeps_stale_data() {
        let h = ScenarioHarness::setup();
        h.seed(&h.seller, "first");
        h.buyer.sync.open_conversation(h.conversation.id).await.unwrap();
        h.backend.fail_next("list_messages", outage());

        h.send(&h.seller, "second", None).await.unwrap();
        h.settle().await;

        assert_eq!(h.buyer.sync.load_state(&h.conversation.id), LoadState::Stale);
        assert_eq!(h.buyer.sync.messages(&h.conversation.id).len(), 1);

        // The refresh task sweeps it up.
        assert_eq!(h.buyer.sync.refresh_stale().await, 1);
        assert_eq!(h.buyer.sync.messages(&h.conversation.id).len(), 2);
    }
}
