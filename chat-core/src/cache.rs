//! Resource cache for Bazaar chat.
//!
//! A TTL-keyed store with advisory priority hints:
//! - `get()` misses on absent or expired entries (expired entries are purged)
//! - `set()` stores a value with an expiry and a priority hint
//! - `invalidate()` forces the next read of a key to miss
//!
//! The cache never fails. Time is passed in by the caller so the cache stays
//! pure and tests do not need a clock.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use chat_types::{ConversationId, UserId};

/// Priority hint attached to cache entries and scheduled requests.
///
/// For the cache this is advisory only: it decides which entry goes first
/// when a capacity bound is configured and exceeded.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Background prefetch.
    Low,
    /// Regular reads.
    #[default]
    Medium,
    /// Data the user is looking at right now.
    High,
}

/// String key uniquely identifying a fetchable resource.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Prefix shared by every conversation's message key.
    pub const MESSAGES_PREFIX: &'static str = "messages:";

    /// Wrap an arbitrary key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Conversation list of a user.
    pub fn conversations(user_id: &UserId) -> Self {
        Self(format!("conversations:{}", user_id))
    }

    /// Messages of a conversation.
    pub fn messages(conversation_id: &ConversationId) -> Self {
        Self(format!("{}{}", Self::MESSAGES_PREFIX, conversation_id))
    }

    /// Profile of a user.
    pub fn profile(user_id: &UserId) -> Self {
        Self(format!("profile:{}", user_id))
    }

    /// The raw key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self.0)
    }
}

/// Options for [`ResourceCache::set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    /// How long the entry stays fresh.
    pub ttl: Duration,
    /// Eviction hint.
    pub priority: Priority,
}

impl CacheOptions {
    /// Fresh for `ttl` with medium priority.
    pub fn ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            priority: Priority::Medium,
        }
    }

    /// Override the priority hint.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// A cached value with its expiry and priority hint.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The cached value.
    pub value: V,
    /// Instant after which the entry is a miss. `None` never expires.
    pub expires_at: Option<Instant>,
    /// Eviction hint.
    pub priority: Priority,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// TTL cache with explicit invalidation.
#[derive(Debug)]
pub struct ResourceCache<V> {
    entries: HashMap<CacheKey, CacheEntry<V>>,
    /// Optional bound on the number of entries.
    capacity: Option<usize>,
}

impl<V> Default for ResourceCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> ResourceCache<V> {
    /// Create an unbounded cache.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            capacity: None,
        }
    }

    /// Create a cache holding at most `capacity` entries.
    ///
    /// When full, `set()` evicts the lowest-priority entry, soonest expiry
    /// first among equals.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: Some(capacity.max(1)),
        }
    }

    /// Look up a fresh value. Expired entries are removed and miss.
    pub fn get(&mut self, key: &CacheKey, now: Instant) -> Option<&V> {
        if self
            .entries
            .get(key)
            .is_some_and(|entry| entry.is_expired(now))
        {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|entry| &entry.value)
    }

    /// Check for a fresh value without touching it.
    pub fn contains(&self, key: &CacheKey, now: Instant) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Store a value, replacing any previous one.
    ///
    /// A TTL too large to represent as an instant keeps the entry until it
    /// is invalidated.
    pub fn set(&mut self, key: CacheKey, value: V, options: CacheOptions, now: Instant) {
        let entry = CacheEntry {
            value,
            expires_at: now.checked_add(options.ttl),
            priority: options.priority,
        };
        self.entries.insert(key.clone(), entry);
        self.enforce_capacity(&key, now);
    }

    /// Replace a fresh value in place, keeping expiry and priority.
    ///
    /// Returns false (and does nothing) if the key is absent or expired.
    pub fn update<F>(&mut self, key: &CacheKey, now: Instant, f: F) -> bool
    where
        F: FnOnce(&mut V),
    {
        match self.entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                f(&mut entry.value);
                true
            }
            _ => false,
        }
    }

    /// Force the next read of `key` to miss.
    ///
    /// Returns true if an entry was removed.
    pub fn invalidate(&mut self, key: &CacheKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Invalidate every key starting with `prefix`.
    ///
    /// Returns the removed keys.
    pub fn invalidate_prefix(&mut self, prefix: &str) -> Vec<CacheKey> {
        let mut removed = Vec::new();
        self.entries.retain(|key, _| {
            let matches = key.as_str().starts_with(prefix);
            if matches {
                removed.push(key.clone());
            }
            !matches
        });
        removed
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before - self.entries.len()
    }

    /// Remove everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of stored entries (fresh or not yet purged).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Priority hint of a stored entry.
    pub fn priority_of(&self, key: &CacheKey) -> Option<Priority> {
        self.entries.get(key).map(|entry| entry.priority)
    }

    fn enforce_capacity(&mut self, keep: &CacheKey, now: Instant) {
        let Some(capacity) = self.capacity else {
            return;
        };
        if self.entries.len() <= capacity {
            return;
        }
        self.purge_expired(now);
        while self.entries.len() > capacity {
            let victim = self
                .entries
                .iter()
                .filter(|(key, _)| *key != keep)
                .min_by_key(|(_, entry)| {
                    (entry.priority, entry.expires_at.is_none(), entry.expires_at)
                })
                .map(|(key, _)| key.clone());
            match victim {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}
