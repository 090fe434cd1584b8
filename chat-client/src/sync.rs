//! Sync orchestrator.
//!
//! [`ChatSync`] is the surface the UI talks to. It combines the session
//! context (cache, coordinator, channel registry), the canonical store, the
//! read-state reconciler and per-resource retry controllers, and turns
//! realtime events into invalidations, store transitions and notifications.
//!
//! Reads go cache first, then through the coordinator. Realtime events
//! never fetch for a conversation that is not open; they mark it stale and
//! the next read or the refresh task catches up.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chat_core::{
    validate_outgoing, CacheKey, ChannelName, ConversationStore, LoadAction, LoadEvent, LoadState,
    Priority, RetryState,
};
use chat_types::{
    Attachment, AttachmentUpload, Conversation, ConversationId, ConversationStatus, Message,
    MessageId, NewMessage, OrderId, Profile, RealtimeEvent, UserId,
};
use dashmap::DashMap;
use futures_util::future::join_all;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::backend::{
    ChatBackend, FileStorage, ModerationValidator, NoFileStorage, PassthroughModeration,
    RealtimeFilter, RealtimeTransport,
};
use crate::config::ChatSyncConfig;
use crate::context::{ConversationSnapshot, Resource, SyncContext};
use crate::error::ClientError;
use crate::events::{ChatNotification, NotificationBus};
use crate::lock;
use crate::reconciler::ReadStateReconciler;
use crate::refresh::spawn_refresh_task;
use crate::registry::ChannelHandle;
use crate::retry::RetryController;

pub(crate) struct SyncInner<B, R> {
    user_id: UserId,
    config: ChatSyncConfig,
    context: Arc<SyncContext>,
    backend: Arc<B>,
    realtime: Arc<R>,
    storage: Arc<dyn FileStorage>,
    moderation: Arc<dyn ModerationValidator>,
    store: Arc<Mutex<ConversationStore>>,
    bus: NotificationBus,
    reconciler: ReadStateReconciler<B>,
    retries: DashMap<CacheKey, Arc<RetryController>>,
    observed: Mutex<HashSet<ConversationId>>,
    activated: AtomicBool,
}

/// Client-side sync engine for one signed-in user.
///
/// Cheap to clone; clones share all state.
pub struct ChatSync<B, R> {
    inner: Arc<SyncInner<B, R>>,
}

impl<B, R> Clone for ChatSync<B, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Non-owning handle used by background tasks.
pub(crate) struct WeakChatSync<B, R> {
    inner: Weak<SyncInner<B, R>>,
}

impl<B, R> WeakChatSync<B, R> {
    pub(crate) fn upgrade(&self) -> Option<ChatSync<B, R>> {
        self.inner.upgrade().map(|inner| ChatSync { inner })
    }
}

/// Builder for [`ChatSync`].
pub struct ChatSyncBuilder<B, R> {
    user_id: UserId,
    backend: B,
    realtime: R,
    config: ChatSyncConfig,
    context: Option<Arc<SyncContext>>,
    storage: Arc<dyn FileStorage>,
    moderation: Arc<dyn ModerationValidator>,
}

impl<B: ChatBackend, R: RealtimeTransport> ChatSyncBuilder<B, R> {
    /// Use `config` instead of the defaults.
    pub fn config(mut self, config: ChatSyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Use an existing session context.
    pub fn context(mut self, context: Arc<SyncContext>) -> Self {
        self.context = Some(context);
        self
    }

    /// Attachment storage (uploads fail as unavailable without one).
    pub fn file_storage(mut self, storage: impl FileStorage) -> Self {
        self.storage = Arc::new(storage);
        self
    }

    /// Content moderation (everything passes without one).
    pub fn moderation(mut self, moderation: impl ModerationValidator) -> Self {
        self.moderation = Arc::new(moderation);
        self
    }

    /// Build the engine.
    pub fn build(self) -> ChatSync<B, R> {
        let context = self
            .context
            .unwrap_or_else(|| SyncContext::shared(&self.config));
        let backend = Arc::new(self.backend);
        let store = Arc::new(Mutex::new(ConversationStore::new(self.user_id)));
        let bus = NotificationBus::new(self.config.events.capacity);
        let reconciler = ReadStateReconciler::new(
            Arc::clone(&backend),
            Arc::clone(&store),
            bus.clone(),
            self.config.settle_window(),
        );
        ChatSync {
            inner: Arc::new(SyncInner {
                user_id: self.user_id,
                config: self.config,
                context,
                backend,
                realtime: Arc::new(self.realtime),
                storage: self.storage,
                moderation: self.moderation,
                store,
                bus,
                reconciler,
                retries: DashMap::new(),
                observed: Mutex::new(HashSet::new()),
                activated: AtomicBool::new(false),
            }),
        }
    }
}

impl<B: ChatBackend, R: RealtimeTransport> ChatSync<B, R> {
    /// Start building an engine for `user_id`.
    pub fn builder(user_id: UserId, backend: B, realtime: R) -> ChatSyncBuilder<B, R> {
        ChatSyncBuilder {
            user_id,
            backend,
            realtime,
            config: ChatSyncConfig::default(),
            context: None,
            storage: Arc::new(NoFileStorage),
            moderation: Arc::new(PassthroughModeration),
        }
    }

    // ===========================================
    // Accessors
    // ===========================================

    /// The signed-in user.
    pub fn user_id(&self) -> UserId {
        self.inner.user_id
    }

    /// Configuration in use.
    pub fn config(&self) -> &ChatSyncConfig {
        &self.inner.config
    }

    /// The session context.
    pub fn context(&self) -> &Arc<SyncContext> {
        &self.inner.context
    }

    /// The backend.
    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    /// Subscribe to notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatNotification> {
        self.inner.bus.subscribe()
    }

    /// Conversations held locally, in inbox order.
    pub fn conversations(&self) -> Vec<Conversation> {
        self.store().conversations()
    }

    /// Messages of a conversation held locally, oldest first.
    pub fn messages(&self, conversation: &ConversationId) -> Vec<Message> {
        self.store().messages(conversation).to_vec()
    }

    /// Load state of a conversation's messages.
    pub fn load_state(&self, conversation: &ConversationId) -> LoadState {
        self.store().load_state(conversation)
    }

    /// Unread counter of a conversation.
    pub fn unread_count(&self, conversation: &ConversationId) -> u32 {
        self.store().unread_count(conversation)
    }

    /// Unread counters summed over all conversations.
    pub fn total_unread(&self) -> u32 {
        self.store().total_unread()
    }

    /// Users typing in a conversation.
    pub fn typing_users(&self, conversation: &ConversationId) -> Vec<UserId> {
        self.store().typing_users(conversation)
    }

    /// The conversation currently open, if any.
    pub fn active_conversation(&self) -> Option<ConversationId> {
        self.store().active()
    }

    /// Message ids waiting to be marked read.
    pub fn pending_reads(&self, conversation: &ConversationId) -> Vec<MessageId> {
        self.inner.reconciler.pending(conversation)
    }

    /// Retry state of the conversation list load.
    pub fn conversations_retry_state(&self) -> RetryState {
        self.retry_state(&CacheKey::conversations(&self.inner.user_id))
    }

    /// Retry state of a conversation's message load.
    pub fn messages_retry_state(&self, conversation: &ConversationId) -> RetryState {
        self.retry_state(&CacheKey::messages(conversation))
    }

    // ===========================================
    // Conversations
    // ===========================================

    /// Conversations of `user_id` in inbox order (latest message first,
    /// conversations without messages last).
    pub async fn fetch_conversations(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Conversation>, ClientError> {
        self.check_user(&user_id)?;
        let key = CacheKey::conversations(&user_id);

        if let Some(Resource::Conversations(snapshot)) = self.inner.context.cached(&key) {
            trace!("Serving {} from cache", key);
            let mut store = self.store();
            if store.conversation_count() == 0 {
                apply_snapshot(&mut store, &snapshot);
            }
            return Ok(store.conversations());
        }

        let epoch = self.inner.context.epoch(&key);
        let backend = Arc::clone(&self.inner.backend);
        let context = Arc::clone(&self.inner.context);
        let task_key = key.clone();
        let resource = self
            .inner
            .context
            .coordinator()
            .schedule(key.clone(), Priority::High, move || async move {
                let (conversations, unread) = tokio::try_join!(
                    backend.list_conversations(&user_id),
                    backend.unread_counts(&user_id)
                )?;
                let resource = Resource::Conversations(Arc::new(ConversationSnapshot {
                    conversations,
                    unread,
                }));
                context.store_if_current(task_key, epoch, resource.clone(), Priority::High);
                Ok::<Resource, ClientError>(resource)
            })
            .await?;

        match resource {
            Resource::Conversations(snapshot) => {
                let mut store = self.store();
                apply_snapshot(&mut store, &snapshot);
                Ok(store.conversations())
            }
            other => Err(unexpected(&key, &other)),
        }
    }

    /// Initial conversation list load with automatic retries.
    ///
    /// Publishes [`ChatNotification::LoadFailed`] when it gives up.
    pub async fn load_conversations(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Conversation>, ClientError> {
        let key = CacheKey::conversations(&user_id);
        let controller = self.retry_controller(&key);
        let result = controller.run(move || self.fetch_conversations(user_id)).await;
        self.report_load(&key, &result);
        result
    }

    /// Manual retry of the conversation list load.
    pub async fn retry_load_conversations(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Conversation>, ClientError> {
        let key = CacheKey::conversations(&user_id);
        let controller = self.retry_controller(&key);
        let result = controller
            .retry_now(move || self.fetch_conversations(user_id))
            .await;
        self.report_load(&key, &result);
        result
    }

    /// Find or create the conversation with `other`, optionally about an order.
    pub async fn start_conversation(
        &self,
        other: UserId,
        order_id: Option<OrderId>,
    ) -> Result<Conversation, ClientError> {
        let me = self.inner.user_id;
        let conversation = self
            .inner
            .backend
            .find_or_create_conversation(&me, &other, order_id)
            .await?;
        let is_new = {
            let mut store = self.store();
            let is_new = store.conversation(&conversation.id).is_none();
            store.upsert_conversation(conversation.clone())?;
            is_new
        };
        self.inner
            .context
            .invalidate(&CacheKey::conversations(&me));

        if is_new {
            info!("Started conversation {} with {}", conversation.id, other);
            self.inner.bus.publish(ChatNotification::NewConversation {
                conversation: conversation.clone(),
            });
            if self.is_activated() {
                // Failure is logged; the conversation still works without push.
                let _ = self.subscribe_to_conversation(conversation.id).await;
            }
        }
        Ok(conversation)
    }

    // ===========================================
    // Messages
    // ===========================================

    /// Messages of a conversation, oldest first.
    ///
    /// Unread messages from the other party are handed to the read-state
    /// reconciler; nothing is marked read here.
    pub async fn fetch_messages(
        &self,
        conversation: ConversationId,
    ) -> Result<Vec<Message>, ClientError> {
        match self.run_fetch(conversation, LoadEvent::FetchRequested).await? {
            Some(messages) => Ok(messages),
            None => Ok(self.messages(&conversation)),
        }
    }

    /// Initial message load with automatic retries.
    pub async fn load_messages(
        &self,
        conversation: ConversationId,
    ) -> Result<Vec<Message>, ClientError> {
        let key = CacheKey::messages(&conversation);
        let controller = self.retry_controller(&key);
        let result = controller.run(move || self.fetch_messages(conversation)).await;
        self.report_load(&key, &result);
        result
    }

    /// Manual retry of a message load.
    pub async fn retry_load_messages(
        &self,
        conversation: ConversationId,
    ) -> Result<Vec<Message>, ClientError> {
        let key = CacheKey::messages(&conversation);
        let controller = self.retry_controller(&key);
        let result = controller
            .retry_now(move || self.fetch_messages(conversation))
            .await;
        self.report_load(&key, &result);
        result
    }

    /// Send a message.
    ///
    /// Empty text without an attachment is rejected before any network call.
    /// Text is moderated first and sent exactly as the validator returns it.
    /// The server row is appended to the store and becomes the
    /// conversation's last message.
    pub async fn send_message(
        &self,
        conversation: ConversationId,
        sender: UserId,
        content: impl Into<String>,
        attachment: Option<Attachment>,
    ) -> Result<Message, ClientError> {
        let content = content.into();
        validate_outgoing(&content, attachment.as_ref())?;

        let content = if content.trim().is_empty() {
            content
        } else {
            let verdict = self.inner.moderation.validate(&content).await;
            if verdict.should_notify_moderator {
                info!("Message in {} flagged for moderator review", conversation);
            }
            if !verdict.is_valid {
                debug!("Message in {} rejected: {}", conversation, verdict.message);
                return Err(ClientError::Moderation {
                    message: verdict.message,
                });
            }
            if let Some(warning) = &verdict.warning_message {
                debug!("Message in {} moderated: {}", conversation, warning);
            }
            verdict.message
        };

        let order_id = self
            .store()
            .conversation(&conversation)
            .and_then(|c| c.order_id);
        let outgoing = NewMessage::new(conversation, sender, content, attachment).with_order(order_id);
        let message = self.inner.backend.insert_message(outgoing).await?;
        debug!("Sent message {} in {}", message.id, conversation);

        self.store().append_message(message.clone());
        let cached = message.clone();
        self.inner
            .context
            .update(&CacheKey::messages(&conversation), move |resource| {
                if let Resource::Messages(rows) = resource {
                    insert_sorted(Arc::make_mut(rows), cached);
                }
            });
        self.inner
            .bus
            .publish(ChatNotification::ConversationUpdated {
                conversation_id: conversation,
            });
        Ok(message)
    }

    /// Upload a file and return the attachment to send with a message.
    pub async fn upload_attachment(
        &self,
        upload: AttachmentUpload,
    ) -> Result<Attachment, ClientError> {
        self.inner.config.attachment_rules().check(&upload)?;
        let name = upload.file_name.clone();
        let content_type = upload.content_type.clone();
        let url = self.inner.storage.upload(upload).await?;
        debug!("Uploaded attachment {} to {}", name, url);
        Ok(Attachment {
            url,
            content_type,
            name,
        })
    }

    /// Public profile of a user (cached).
    pub async fn fetch_profile(&self, user_id: UserId) -> Result<Profile, ClientError> {
        let key = CacheKey::profile(&user_id);
        if let Some(Resource::Profile(profile)) = self.inner.context.cached(&key) {
            return Ok((*profile).clone());
        }

        let epoch = self.inner.context.epoch(&key);
        let backend = Arc::clone(&self.inner.backend);
        let context = Arc::clone(&self.inner.context);
        let task_key = key.clone();
        let resource = self
            .inner
            .context
            .coordinator()
            .schedule(key.clone(), Priority::Low, move || async move {
                let profile = backend.get_profile(&user_id).await?;
                let resource = Resource::Profile(Arc::new(profile));
                context.store_if_current(task_key, epoch, resource.clone(), Priority::Low);
                Ok::<Resource, ClientError>(resource)
            })
            .await?;

        match resource {
            Resource::Profile(profile) => Ok((*profile).clone()),
            other => Err(unexpected(&key, &other)),
        }
    }

    // ===========================================
    // Read state and typing
    // ===========================================

    /// Report the messages currently on screen.
    ///
    /// Returns the size of the pending batch.
    pub fn mark_read(&self, conversation: ConversationId, visible: &[MessageId]) -> usize {
        self.inner.reconciler.observe_visible(conversation, visible)
    }

    /// Flip messages back to unread (admin action, off by default).
    pub async fn mark_unread(
        &self,
        conversation: ConversationId,
        ids: &[MessageId],
    ) -> Result<usize, ClientError> {
        if !self.inner.config.moderation.allow_mark_unread {
            return Err(ClientError::Disabled("mark_unread"));
        }
        self.inner.backend.mark_unread(ids).await?;
        let changed = {
            let mut store = self.store();
            let changed = store.mark_unread(&conversation, ids);
            for _ in &changed {
                store.increment_unread(conversation);
            }
            changed.len()
        };
        self.inner
            .context
            .invalidate(&CacheKey::messages(&conversation));
        self.inner
            .bus
            .publish(ChatNotification::ConversationUpdated {
                conversation_id: conversation,
            });
        Ok(changed)
    }

    /// Set or clear a typing flag. Returns true if it changed.
    ///
    /// The signed-in user's own typing is also broadcast to the other party
    /// when the conversation's channel is open. Nothing is persisted.
    pub async fn set_typing(
        &self,
        conversation: ConversationId,
        user_id: UserId,
        is_typing: bool,
    ) -> bool {
        let changed = self.store().set_typing(conversation, user_id, is_typing);
        if changed {
            self.inner.bus.publish(ChatNotification::TypingChanged {
                conversation_id: conversation,
                user_id,
                is_typing,
            });
        }

        let channel = ChannelName::for_conversation(&conversation);
        if user_id == self.inner.user_id && self.inner.context.registry().contains(&channel) {
            let event = RealtimeEvent::Typing {
                conversation_id: conversation,
                user_id,
                is_typing,
            };
            if let Err(e) = self.inner.realtime.broadcast(&channel, event).await {
                debug!("Typing broadcast on {} failed: {}", channel, e);
            }
        }
        changed
    }

    // ===========================================
    // Realtime
    // ===========================================

    /// Open realtime delivery for `user_id`: one user-level channel plus one
    /// channel per active conversation. Returns how many channels are open.
    pub async fn activate(&self, user_id: UserId) -> Result<usize, ClientError> {
        self.check_user(&user_id)?;
        self.inner.activated.store(true, Ordering::SeqCst);
        let conversations = self.fetch_conversations(user_id).await?;

        let user_channel = ChannelName::for_user(&user_id);
        if !self.inner.context.registry().contains(&user_channel) {
            // Failure is logged; conversation channels still work.
            let _ = self
                .open_channel(user_channel, RealtimeFilter::Participant(user_id))
                .await;
        }
        for conversation in conversations
            .iter()
            .filter(|c| c.status == ConversationStatus::Active)
        {
            let _ = self.subscribe_to_conversation(conversation.id).await;
        }

        let open = self.inner.context.registry().len();
        info!("Realtime active for {} ({} channels)", user_id, open);
        Ok(open)
    }

    /// Subscribe to one conversation's channel unless already subscribed.
    ///
    /// On failure the channel stays unregistered; the error is logged and
    /// returned.
    pub async fn subscribe_to_conversation(
        &self,
        conversation: ConversationId,
    ) -> Result<(), ClientError> {
        let channel = ChannelName::for_conversation(&conversation);
        if self.inner.context.registry().contains(&channel) {
            trace!("Already subscribed to {}", channel);
            return Ok(());
        }
        self.open_channel(channel, RealtimeFilter::Conversation(conversation))
            .await
    }

    /// Tear down realtime: cancel pending read batches and unsubscribe every
    /// channel. Returns how many channels were closed.
    ///
    /// Cached threads are dropped as well, since nothing invalidates them
    /// once push delivery stops.
    pub async fn unsubscribe_all(&self) -> usize {
        self.inner.activated.store(false, Ordering::SeqCst);
        self.inner.reconciler.cancel_all();
        lock(&self.inner.observed).clear();
        let closed = self.inner.context.registry().remove_all().await;
        let dropped = self
            .inner
            .context
            .invalidate_prefix(CacheKey::MESSAGES_PREFIX);
        info!(
            "Closed {} realtime channels, dropped {} cached threads",
            closed, dropped
        );
        closed
    }

    /// Open a conversation view: subscribe, load messages and keep them
    /// fresh while open.
    pub async fn open_conversation(
        &self,
        conversation: ConversationId,
    ) -> Result<Vec<Message>, ClientError> {
        lock(&self.inner.observed).insert(conversation);
        self.store().set_active(Some(conversation));
        // Failure is logged; messages still load without push.
        let _ = self.subscribe_to_conversation(conversation).await;
        self.fetch_messages(conversation).await
    }

    /// Close a conversation view: cancel its read batch, unregister its
    /// channel and drop its local messages. Late fetch results are ignored.
    pub async fn close_conversation(&self, conversation: ConversationId) {
        lock(&self.inner.observed).remove(&conversation);
        self.inner.reconciler.cancel(&conversation);
        {
            let mut store = self.store();
            if store.active() == Some(conversation) {
                store.set_active(None);
            }
            store.handle(conversation, LoadEvent::Closed);
        }
        self.inner
            .context
            .registry()
            .remove(&ChannelName::for_conversation(&conversation))
            .await;
        debug!("Closed conversation {}", conversation);
    }

    /// Apply one realtime event.
    ///
    /// Row changes invalidate the affected cache keys, mark the local copy
    /// stale and publish a notification. Only open conversations refetch
    /// right away. Events are idempotent; redelivery is harmless.
    pub async fn handle_realtime_event(&self, event: RealtimeEvent) {
        trace!("Realtime {} for {}", event.kind(), event.conversation_id());
        match event {
            RealtimeEvent::MessageInserted(message) => {
                let conversation = message.conversation_id;
                self.invalidate_messages(conversation);
                self.inner
                    .context
                    .invalidate(&CacheKey::conversations(&self.inner.user_id));
                let actions = {
                    let mut store = self.store();
                    store.touch_conversation(&message);
                    store.handle(conversation, LoadEvent::RealtimeInsert)
                };
                self.inner
                    .bus
                    .publish(ChatNotification::MessageReceived { message });
                self.after_invalidation(conversation, &actions);
            }
            RealtimeEvent::MessageUpdated(message) => {
                let conversation = message.conversation_id;
                self.invalidate_messages(conversation);
                let actions = {
                    let mut store = self.store();
                    store.apply_update(message);
                    store.handle(conversation, LoadEvent::Invalidated)
                };
                self.inner
                    .bus
                    .publish(ChatNotification::ConversationUpdated {
                        conversation_id: conversation,
                    });
                self.after_invalidation(conversation, &actions);
            }
            RealtimeEvent::ConversationInserted(conversation) => {
                if !conversation.includes(&self.inner.user_id) {
                    return;
                }
                self.inner
                    .context
                    .invalidate(&CacheKey::conversations(&self.inner.user_id));
                let (known, upserted) = {
                    let mut store = self.store();
                    let known = store.conversation(&conversation.id).is_some();
                    (known, store.upsert_conversation(conversation.clone()))
                };
                if let Err(e) = upserted {
                    warn!("Ignoring invalid conversation {}: {}", conversation.id, e);
                    return;
                }
                if known {
                    return;
                }
                let id = conversation.id;
                let active = conversation.status == ConversationStatus::Active;
                self.inner
                    .bus
                    .publish(ChatNotification::NewConversation { conversation });
                if active && self.is_activated() {
                    let _ = self.subscribe_to_conversation(id).await;
                }
            }
            RealtimeEvent::Typing {
                conversation_id,
                user_id,
                is_typing,
            } => {
                if user_id == self.inner.user_id {
                    return;
                }
                if self.store().set_typing(conversation_id, user_id, is_typing) {
                    self.inner.bus.publish(ChatNotification::TypingChanged {
                        conversation_id,
                        user_id,
                        is_typing,
                    });
                }
            }
        }
    }

    // ===========================================
    // Refresh
    // ===========================================

    /// Refetch every stale conversation. Returns how many were refreshed.
    pub async fn refresh_stale(&self) -> usize {
        let stale = self.store().stale_conversations();
        if stale.is_empty() {
            return 0;
        }
        debug!("Refreshing {} stale conversations", stale.len());
        let results = join_all(
            stale
                .iter()
                .map(|conversation| self.run_fetch(*conversation, LoadEvent::RefreshTimer)),
        )
        .await;

        let mut refreshed = 0;
        for (conversation, result) in stale.iter().zip(results) {
            match result {
                Ok(Some(_)) => refreshed += 1,
                Ok(None) => {}
                Err(e) => warn!("Refresh of {} failed: {}", conversation, e),
            }
        }
        refreshed
    }

    /// Start the periodic stale refresh task (see `[refresh]` config).
    pub fn spawn_refresh_task(&self) -> JoinHandle<()> {
        spawn_refresh_task(self.downgrade(), self.inner.config.refresh.clone())
    }

    // ===========================================
    // Internals
    // ===========================================

    pub(crate) fn downgrade(&self) -> WeakChatSync<B, R> {
        WeakChatSync {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn store(&self) -> MutexGuard<'_, ConversationStore> {
        lock(&self.inner.store)
    }

    fn check_user(&self, user_id: &UserId) -> Result<(), ClientError> {
        if *user_id != self.inner.user_id {
            return Err(ClientError::WrongUser {
                expected: self.inner.user_id,
                actual: *user_id,
            });
        }
        Ok(())
    }

    fn is_activated(&self) -> bool {
        self.inner.activated.load(Ordering::SeqCst)
    }

    fn is_observed(&self, conversation: &ConversationId) -> bool {
        lock(&self.inner.observed).contains(conversation)
    }

    fn retry_controller(&self, key: &CacheKey) -> Arc<RetryController> {
        self.inner
            .retries
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(RetryController::new(
                    key.as_str(),
                    self.inner.config.retry_policy(),
                ))
            })
            .clone()
    }

    fn retry_state(&self, key: &CacheKey) -> RetryState {
        self.inner
            .retries
            .get(key)
            .map(|controller| controller.state())
            .unwrap_or_default()
    }

    fn report_load<T>(&self, key: &CacheKey, result: &Result<T, ClientError>) {
        match result {
            Err(ClientError::Cancelled | ClientError::LoadInProgress) | Ok(_) => {}
            Err(e) => {
                self.inner.bus.publish(ChatNotification::LoadFailed {
                    resource: key.to_string(),
                    error: e.to_string(),
                });
            }
        }
    }

    fn invalidate_messages(&self, conversation: ConversationId) {
        self.inner
            .context
            .invalidate(&CacheKey::messages(&conversation));
    }

    fn after_invalidation(&self, conversation: ConversationId, actions: &[LoadAction]) {
        if !actions.contains(&LoadAction::EmitStale) {
            return;
        }
        self.inner
            .bus
            .publish(ChatNotification::ConversationStale {
                conversation_id: conversation,
            });
        if self.is_observed(&conversation) {
            self.spawn_refresh(conversation);
        } else {
            trace!("Deferring refresh of {} until it is read", conversation);
        }
    }

    fn spawn_refresh(&self, conversation: ConversationId) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.run_fetch(conversation, LoadEvent::RefreshTimer).await {
                warn!("Refresh of {} failed: {}", conversation, e);
            }
        });
    }

    async fn open_channel(
        &self,
        channel: ChannelName,
        filter: RealtimeFilter,
    ) -> Result<(), ClientError> {
        let stream = match self.inner.realtime.subscribe(&channel, filter).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Realtime subscription {} failed: {}", channel, e);
                return Err(e.into());
            }
        };
        let pump = self.spawn_pump(channel.clone(), stream.events);
        self.inner
            .context
            .registry()
            .register(channel, ChannelHandle::new(stream.handle).with_pump(pump))
            .await;
        Ok(())
    }

    fn spawn_pump(
        &self,
        channel: ChannelName,
        mut events: mpsc::Receiver<RealtimeEvent>,
    ) -> JoinHandle<()> {
        let weak = self.downgrade();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(sync) = weak.upgrade() else {
                    break;
                };
                sync.handle_realtime_event(event).await;
            }
            debug!("Realtime channel {} ended", channel);
        })
    }

    /// Drive one message load through the store's state machine.
    ///
    /// Returns `None` if the event did not call for a load.
    async fn run_fetch(
        &self,
        conversation: ConversationId,
        event: LoadEvent,
    ) -> Result<Option<Vec<Message>>, ClientError> {
        let (actions, generation) = {
            let mut store = self.store();
            let actions = store.handle(conversation, event);
            (actions, store.generation(&conversation))
        };
        if actions.contains(&LoadAction::ServeLocal) {
            return Ok(Some(self.messages(&conversation)));
        }
        let start = actions.contains(&LoadAction::StartFetch);
        if !start && !actions.contains(&LoadAction::JoinFetch) {
            return Ok(None);
        }

        let key = CacheKey::messages(&conversation);
        let cached = if start {
            self.inner.context.cached(&key)
        } else {
            None
        };
        let result = match cached {
            Some(resource) => {
                trace!("Serving {} from cache", key);
                Ok(resource)
            }
            None => self.schedule_messages(conversation, key.clone()).await,
        };

        match result {
            Ok(Resource::Messages(rows)) => Ok(Some(self.apply_messages(conversation, generation, rows))),
            Ok(other) => Err(unexpected(&key, &other)),
            Err(e) => {
                let mut store = self.store();
                if store.generation(&conversation) == generation {
                    store.handle(conversation, LoadEvent::FetchFailed);
                }
                warn!("Loading {} failed: {}", key, e);
                Err(e)
            }
        }
    }

    async fn schedule_messages(
        &self,
        conversation: ConversationId,
        key: CacheKey,
    ) -> Result<Resource, ClientError> {
        let epoch = self.inner.context.epoch(&key);
        let backend = Arc::clone(&self.inner.backend);
        let context = Arc::clone(&self.inner.context);
        let task_key = key.clone();
        self.inner
            .context
            .coordinator()
            .schedule(key, Priority::Medium, move || async move {
                let mut rows = backend.list_messages(&conversation).await?;
                rows.sort_by_key(Message::order_key);
                let resource = Resource::Messages(Arc::new(rows));
                context.store_if_current(task_key, epoch, resource.clone(), Priority::Medium);
                Ok::<Resource, ClientError>(resource)
            })
            .await
    }

    fn apply_messages(
        &self,
        conversation: ConversationId,
        generation: u64,
        rows: Arc<Vec<Message>>,
    ) -> Vec<Message> {
        let (actions, applied, messages) = {
            let mut store = self.store();
            if store.generation(&conversation) != generation {
                debug!("Dropping late messages for closed {}", conversation);
                let mut rows = rows.to_vec();
                rows.sort_by_key(Message::order_key);
                return rows;
            }
            let actions = store.handle(conversation, LoadEvent::FetchSucceeded);
            let applied = actions.contains(&LoadAction::ApplyResult)
                && store.replace_messages(conversation, generation, rows.to_vec());
            (actions, applied, store.messages(&conversation).to_vec())
        };

        if applied {
            self.inner.reconciler.offer(conversation);
        }
        self.after_invalidation(conversation, &actions);
        messages
    }
}

fn apply_snapshot(store: &mut ConversationStore, snapshot: &ConversationSnapshot) {
    for rejected in store.replace_conversations(snapshot.conversations.clone()) {
        warn!("Ignoring invalid conversation: {}", rejected);
    }
    store.set_unread_counts(snapshot.unread.clone());
}

fn insert_sorted(rows: &mut Vec<Message>, message: Message) {
    if rows.iter().any(|m| m.id == message.id) {
        return;
    }
    let key = message.order_key();
    let at = rows.partition_point(|m| m.order_key() <= key);
    rows.insert(at, message);
}

fn unexpected(key: &CacheKey, resource: &Resource) -> ClientError {
    ClientError::Internal(format!("unexpected resource under {}: {:?}", key, resource))
}
