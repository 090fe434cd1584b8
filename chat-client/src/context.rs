//! Session context shared by the sync engine's components.
//!
//! Holds the resource cache, the request coordinator and the channel
//! registry. A context is created per signed-in session and injected into
//! the orchestrator; dropping it (after [`ChatSync::unsubscribe_all`])
//! releases everything.
//!
//! [`ChatSync::unsubscribe_all`]: crate::ChatSync::unsubscribe_all

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chat_core::{CacheKey, CacheOptions, Priority, ResourceCache};
use chat_types::{Conversation, ConversationId, Message, Profile};
use tracing::trace;

use crate::config::ChatSyncConfig;
use crate::coordinator::RequestCoordinator;
use crate::lock;
use crate::registry::ChannelRegistry;

/// Conversation list plus unread counters, as fetched together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationSnapshot {
    /// Conversations of the user, unsorted.
    pub conversations: Vec<Conversation>,
    /// Unread count per conversation.
    pub unread: HashMap<ConversationId, u32>,
}

/// A cached or fetched resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    /// `conversations:<user>`.
    Conversations(Arc<ConversationSnapshot>),
    /// `messages:<conversation>`.
    Messages(Arc<Vec<Message>>),
    /// `profile:<user>`.
    Profile(Arc<Profile>),
}

#[derive(Debug)]
struct CacheState {
    cache: ResourceCache<Resource>,
    /// Bumped on every invalidation; a fetch started under an older epoch
    /// must not repopulate the key.
    epochs: HashMap<CacheKey, u64>,
}

/// Cache, coordinator and registry of one session.
#[derive(Debug)]
pub struct SyncContext {
    cache: Mutex<CacheState>,
    ttl: Duration,
    coordinator: RequestCoordinator<Resource>,
    registry: ChannelRegistry,
}

/// Cache clock. Follows tokio's clock so paused-time tests control expiry.
fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}

impl SyncContext {
    /// Create a context sized by `config`.
    pub fn new(config: &ChatSyncConfig) -> Self {
        let cache = match config.cache.capacity {
            0 => ResourceCache::new(),
            capacity => ResourceCache::with_capacity(capacity),
        };
        Self {
            cache: Mutex::new(CacheState {
                cache,
                epochs: HashMap::new(),
            }),
            ttl: config.cache_ttl(),
            coordinator: RequestCoordinator::new(config.requests.max_concurrent),
            registry: ChannelRegistry::new(),
        }
    }

    /// Create a shared context.
    pub fn shared(config: &ChatSyncConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }

    /// The request coordinator.
    pub fn coordinator(&self) -> &RequestCoordinator<Resource> {
        &self.coordinator
    }

    /// The channel registry.
    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    // ===========================================
    // Cache
    // ===========================================

    /// Read a live entry.
    pub fn cached(&self, key: &CacheKey) -> Option<Resource> {
        lock(&self.cache).cache.get(key, now()).cloned()
    }

    /// Store a value with the context TTL.
    pub fn store(&self, key: CacheKey, value: Resource, priority: Priority) {
        let options = CacheOptions::ttl(self.ttl).with_priority(priority);
        lock(&self.cache).cache.set(key, value, options, now());
    }

    /// Current invalidation epoch of `key`.
    pub fn epoch(&self, key: &CacheKey) -> u64 {
        lock(&self.cache).epochs.get(key).copied().unwrap_or(0)
    }

    /// Store a fetch result unless `key` was invalidated since `epoch`.
    pub fn store_if_current(
        &self,
        key: CacheKey,
        epoch: u64,
        value: Resource,
        priority: Priority,
    ) -> bool {
        let options = CacheOptions::ttl(self.ttl).with_priority(priority);
        let mut state = lock(&self.cache);
        if state.epochs.get(&key).copied().unwrap_or(0) != epoch {
            trace!("Not caching {}: invalidated while in flight", key);
            return false;
        }
        state.cache.set(key, value, options, now());
        true
    }

    /// Modify a live entry in place.
    pub fn update<F>(&self, key: &CacheKey, f: F) -> bool
    where
        F: FnOnce(&mut Resource),
    {
        lock(&self.cache).cache.update(key, now(), f)
    }

    /// Force the next read of `key` to miss.
    pub fn invalidate(&self, key: &CacheKey) {
        let mut state = lock(&self.cache);
        *state.epochs.entry(key.clone()).or_insert(0) += 1;
        if state.cache.invalidate(key) {
            trace!("Invalidated {}", key);
        }
    }

    /// Force the next read of every key starting with `prefix` to miss.
    /// Returns how many entries were dropped.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut state = lock(&self.cache);
        let CacheState { cache, epochs } = &mut *state;
        let removed = cache.invalidate_prefix(prefix);
        for key in &removed {
            epochs.entry(key.clone()).or_insert(0);
        }
        for (_, epoch) in epochs
            .iter_mut()
            .filter(|(key, _)| key.as_str().starts_with(prefix))
        {
            *epoch += 1;
        }
        trace!("Invalidated {} entries under {}", removed.len(), prefix);
        removed.len()
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        lock(&self.cache).cache.purge_expired(now())
    }

    /// Number of cached entries.
    pub fn cache_len(&self) -> usize {
        lock(&self.cache).cache.len()
    }

    /// Empty the cache.
    pub fn clear_cache(&self) {
        let mut state = lock(&self.cache);
        state.cache.clear();
        for epoch in state.epochs.values_mut() {
            *epoch += 1;
        }
    }
}
