//! Realtime channel registry.
//!
//! Maps deterministic channel names to live subscriptions so a channel is
//! never subscribed twice and teardown can release everything. Registering
//! under a name that is already taken replaces the old subscription.
//! Unsubscribe failures are logged, never propagated.

use chat_core::ChannelName;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backend::Subscription;

/// A live subscription plus the task pumping its events.
pub struct ChannelHandle {
    subscription: Box<dyn Subscription>,
    pump: Option<JoinHandle<()>>,
}

impl ChannelHandle {
    /// Wrap a subscription.
    pub fn new(subscription: Box<dyn Subscription>) -> Self {
        Self {
            subscription,
            pump: None,
        }
    }

    /// Attach the task consuming this channel's events; aborted on close.
    pub fn with_pump(mut self, pump: JoinHandle<()>) -> Self {
        self.pump = Some(pump);
        self
    }

    async fn close(self, name: &ChannelName) {
        if let Some(pump) = self.pump {
            pump.abort();
        }
        match self.subscription.unsubscribe().await {
            Ok(()) => debug!("Unsubscribed from {}", name),
            Err(e) => warn!("Failed to unsubscribe from {}: {}", name, e),
        }
    }
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("pump", &self.pump.is_some())
            .finish_non_exhaustive()
    }
}

/// Name → live subscription.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: DashMap<ChannelName, ChannelHandle>,
}

impl ChannelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a handle, unsubscribing any handle previously under `name`.
    pub async fn register(&self, name: ChannelName, handle: ChannelHandle) {
        let previous = self.channels.insert(name.clone(), handle);
        match previous {
            Some(old) => {
                debug!("Replacing subscription {}", name);
                old.close(&name).await;
            }
            None => debug!("Registered subscription {}", name),
        }
    }

    /// Unsubscribe and forget one channel. Returns false if it was unknown.
    pub async fn remove(&self, name: &ChannelName) -> bool {
        // Bind first so the map guard is released before awaiting.
        let removed = self.channels.remove(name);
        match removed {
            Some((name, handle)) => {
                handle.close(&name).await;
                true
            }
            None => false,
        }
    }

    /// Unsubscribe everything. Returns how many channels were closed.
    pub async fn remove_all(&self) -> usize {
        let names = self.names();
        let mut closed = 0;
        for name in names {
            if self.remove(&name).await {
                closed += 1;
            }
        }
        closed
    }

    /// Check whether a channel is registered.
    pub fn contains(&self, name: &ChannelName) -> bool {
        self.channels.contains_key(name)
    }

    /// Registered channel names, sorted.
    pub fn names(&self) -> Vec<ChannelName> {
        let mut names: Vec<ChannelName> =
            self.channels.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of registered channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Check if no channel is registered.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
