//! Scenario harness: a buyer and a seller sharing one backend.

use std::time::Duration;

use chat_client::{
    ChatNotification, ChatSync, ChatSyncConfig, ClientError, KeywordModeration, MockBackend, MockFileStorage,
    MockRealtime,
};
use chat_types::{Attachment, Conversation, Message, RealtimeEvent, UserId};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

/// Engine type used throughout the scenarios.
pub type Engine = ChatSync<MockBackend, MockRealtime>;

/// One signed-in user.
pub struct Party {
    /// The user.
    pub user_id: UserId,
    /// Their sync engine.
    pub sync: Engine,
    /// Their realtime transport.
    pub realtime: MockRealtime,
}

impl Party {
    fn new(
        user_id: UserId,
        backend: &MockBackend,
        config: ChatSyncConfig,
        moderation: KeywordModeration,
        storage: MockFileStorage,
    ) -> Self {
        let realtime = MockRealtime::new();
        let sync = ChatSync::builder(user_id, backend.clone(), realtime.clone())
            .config(config)
            .moderation(moderation)
            .file_storage(storage)
            .build();
        Self {
            user_id,
            sync,
            realtime,
        }
    }
}

/// Buyer and seller with one conversation between them.
pub struct ScenarioHarness {
    /// Shared persistence.
    pub backend: MockBackend,
    /// Shared file storage.
    pub storage: MockFileStorage,
    /// Shared moderation (records every checked text).
    pub moderation: KeywordModeration,
    /// The buyer.
    pub buyer: Party,
    /// The seller.
    pub seller: Party,
    /// The conversation between them.
    pub conversation: Conversation,
}

impl ScenarioHarness {
    /// Harness with default configuration.
    pub fn setup() -> Self {
        Self::with_config(ChatSyncConfig::default())
    }

    /// Harness with `config` for both engines.
    pub fn with_config(config: ChatSyncConfig) -> Self {
        init_tracing();

        let backend = MockBackend::new();
        let storage = MockFileStorage::new();
        let moderation = KeywordModeration::new()
            .block("western union")
            .censor("idiot");
        let (buyer_id, seller_id) = (UserId::new(), UserId::new());
        let conversation = backend.seed_conversation(buyer_id, seller_id);

        let buyer = Party::new(
            buyer_id,
            &backend,
            config.clone(),
            moderation.clone(),
            storage.clone(),
        );
        let seller = Party::new(seller_id, &backend, config, moderation.clone(), storage.clone());

        Self {
            backend,
            storage,
            moderation,
            buyer,
            seller,
            conversation,
        }
    }

    /// Send through `from`'s engine and push the insert to both parties,
    /// the way the change feed echoes a row to every subscriber.
    pub async fn send(
        &self,
        from: &Party,
        text: &str,
        attachment: Option<Attachment>,
    ) -> Result<Message, ClientError> {
        let message = from
            .sync
            .send_message(self.conversation.id, from.user_id, text, attachment)
            .await?;
        self.deliver(RealtimeEvent::MessageInserted(message.clone()));
        Ok(message)
    }

    /// Seed a message on the server without telling anyone.
    pub fn seed(&self, from: &Party, text: &str) -> Message {
        self.backend
            .seed_message(self.conversation.id, from.user_id, text)
    }

    /// Emit an event on every matching channel of both parties.
    /// Returns how many channels received it.
    pub fn deliver(&self, event: RealtimeEvent) -> usize {
        self.buyer.realtime.emit_matching(event.clone()) + self.seller.realtime.emit_matching(event)
    }

    /// Let background tasks (pumps, refreshes, commits) run.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Everything published so far on a notification receiver.
pub fn drain(notifications: &mut broadcast::Receiver<ChatNotification>) -> Vec<ChatNotification> {
    let mut received = Vec::new();
    while let Ok(notification) = notifications.try_recv() {
        received.push(notification);
    }
    received
}

/// Install a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init()
        .ok();
}
