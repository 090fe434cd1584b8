//! Messaging scenarios: send round-trip, moderation, attachments.

#[cfg(test)]
mod tests {
    use chat_client::{ChatNotification, ErrorKind, StorageError};
    use chat_types::{AttachmentUpload, MessageType};

    use crate::assertions::check_thread_order;
    use crate::harness::{drain, ScenarioHarness};

    fn photo() -> AttachmentUpload {
        AttachmentUpload {
            file_name: "frame.jpg".into(),
            content_type: "image/jpeg".into(),
            bytes: vec![0xFF, 0xD8, 0xFF, 0xE0],
        }
    }

    /// A send is stored exactly once, unread, and becomes the last message
    /// on both sides.
    #[tokio::test(start_paused = true)]
    async fn send_round_trip_updates_both_inboxes() {
        let h = ScenarioHarness::setup();
        h.buyer.sync.fetch_conversations(h.buyer.user_id).await.unwrap();
        h.seller.sync.activate(h.seller.user_id).await.unwrap();
        let mut seller_notifications = h.seller.sync.subscribe();

        let sent = h.send(&h.buyer, "Would you take 120?", None).await.unwrap();
        h.settle().await;

        let stored = h.backend.stored_messages(&h.conversation.id);
        assert_eq!(stored.len(), 1);
        assert!(!stored[0].read);
        assert_eq!(stored[0].content, "Would you take 120?");
        assert_eq!(h.backend.call_count("insert_message"), 1);

        let buyer_inbox = h.buyer.sync.conversations();
        assert_eq!(buyer_inbox[0].last_message.as_ref().unwrap().id, sent.id);
        let seller_inbox = h.seller.sync.conversations();
        assert_eq!(seller_inbox[0].last_message.as_ref().unwrap().id, sent.id);

        assert!(drain(&mut seller_notifications).iter().any(|n| matches!(
            n,
            ChatNotification::MessageReceived { message } if message.id == sent.id
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn echoed_inserts_do_not_duplicate_the_thread() {
        let h = ScenarioHarness::setup();
        h.buyer.sync.activate(h.buyer.user_id).await.unwrap();
        h.buyer.sync.open_conversation(h.conversation.id).await.unwrap();

        for text in ["one", "two", "three"] {
            h.send(&h.buyer, text, None).await.unwrap();
        }
        h.settle().await;

        let thread = h.buyer.sync.messages(&h.conversation.id);
        assert_eq!(thread.len(), 3);
        check_thread_order(&thread).assert();
    }

    #[tokio::test]
    async fn empty_message_never_reaches_the_network() {
        let h = ScenarioHarness::setup();

        for text in ["", "   ", "\n\t"] {
            let err = h.send(&h.buyer, text, None).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }

        assert_eq!(h.backend.call_count("insert_message"), 0);
        assert!(h.moderation.checked().is_empty());
    }

    #[tokio::test]
    async fn blocked_content_is_rejected_with_moderation_kind() {
        let h = ScenarioHarness::setup();

        let err = h
            .send(&h.seller, "pay me via Western Union first", None)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Moderation);
        assert!(!err.is_retryable());
        assert!(h.backend.stored_messages(&h.conversation.id).is_empty());
    }

    #[tokio::test]
    async fn censored_content_is_sent_as_returned() {
        let h = ScenarioHarness::setup();

        let sent = h.send(&h.seller, "don't be an idiot", None).await.unwrap();

        assert_eq!(sent.content, "don't be an *****");
        assert_eq!(
            h.backend.stored_messages(&h.conversation.id)[0].content,
            "don't be an *****"
        );
    }

    #[tokio::test]
    async fn attachment_only_message_skips_moderation() {
        let h = ScenarioHarness::setup();

        let attachment = h.buyer.sync.upload_attachment(photo()).await.unwrap();
        assert!(attachment.is_image());
        let sent = h.send(&h.buyer, "", Some(attachment.clone())).await.unwrap();

        assert_eq!(sent.message_type, MessageType::Image);
        assert_eq!(sent.attachment, Some(attachment));
        assert!(h.moderation.checked().is_empty());
        assert_eq!(h.storage.uploads().len(), 1);
    }

    #[tokio::test]
    async fn invalid_uploads_are_refused_before_storage() {
        let h = ScenarioHarness::setup();

        let mut empty = photo();
        empty.bytes.clear();
        let err = h.buyer.sync.upload_attachment(empty).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let mut archive = photo();
        archive.content_type = "application/x-msdownload".into();
        let err = h.buyer.sync.upload_attachment(archive).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        assert!(h.storage.uploads().is_empty());
    }

    #[tokio::test]
    async fn storage_outage_is_retryable() {
        let h = ScenarioHarness::setup();
        h.storage
            .fail_next(StorageError::Unavailable("bucket offline".into()));

        let err = h.buyer.sync.upload_attachment(photo()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(err.is_retryable());
    }
}
