//! Mock realtime transport for testing.
//!
//! Tests push events into open channels with [`MockRealtime::emit`] and
//! inspect subscribe/unsubscribe traffic afterwards.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chat_core::ChannelName;
use chat_types::RealtimeEvent;
use tokio::sync::mpsc;

use super::{RealtimeFilter, RealtimeStream, RealtimeTransport, Subscription};
use crate::error::RealtimeError;

/// Buffered events per mock channel.
const CHANNEL_BUFFER: usize = 64;

/// Mock realtime transport.
///
/// Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockRealtime {
    inner: Arc<Mutex<MockRealtimeInner>>,
}

#[derive(Debug, Default)]
struct MockRealtimeInner {
    open: HashMap<ChannelName, OpenChannel>,
    subscribe_calls: Vec<ChannelName>,
    unsubscribed: Vec<ChannelName>,
    broadcasts: Vec<(ChannelName, RealtimeEvent)>,
    fail_next_subscribe: Option<String>,
    fail_unsubscribe: bool,
    next_token: u64,
}

#[derive(Debug)]
struct OpenChannel {
    token: u64,
    filter: RealtimeFilter,
    sender: mpsc::Sender<RealtimeEvent>,
}

impl MockRealtime {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event on a named channel. Returns false if it is not open.
    pub fn emit(&self, channel: &ChannelName, event: RealtimeEvent) -> bool {
        let inner = self.inner.lock().unwrap();
        match inner.open.get(channel) {
            Some(open) => open.sender.try_send(event).is_ok(),
            None => false,
        }
    }

    /// Deliver an event on every open channel whose filter matches.
    /// Returns the number of channels it went to.
    pub fn emit_matching(&self, event: RealtimeEvent) -> usize {
        let inner = self.inner.lock().unwrap();
        inner
            .open
            .values()
            .filter(|open| open.filter.matches(&event))
            .filter(|open| open.sender.try_send(event.clone()).is_ok())
            .count()
    }

    /// Names of currently open channels, sorted.
    pub fn open_channels(&self) -> Vec<ChannelName> {
        let inner = self.inner.lock().unwrap();
        let mut names: Vec<ChannelName> = inner.open.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check whether a channel is open.
    pub fn is_open(&self, channel: &ChannelName) -> bool {
        self.inner.lock().unwrap().open.contains_key(channel)
    }

    /// Every subscribe call, in order.
    pub fn subscribe_calls(&self) -> Vec<ChannelName> {
        self.inner.lock().unwrap().subscribe_calls.clone()
    }

    /// Every successful unsubscribe, in order.
    pub fn unsubscribed(&self) -> Vec<ChannelName> {
        self.inner.lock().unwrap().unsubscribed.clone()
    }

    /// Every broadcast sent through the transport.
    pub fn broadcasts(&self) -> Vec<(ChannelName, RealtimeEvent)> {
        self.inner.lock().unwrap().broadcasts.clone()
    }

    /// Cause the next subscribe to fail.
    pub fn fail_next_subscribe(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_subscribe = Some(error.to_string());
    }

    /// Make every unsubscribe fail (the channel still closes).
    pub fn fail_unsubscribe(&self, fail: bool) {
        self.inner.lock().unwrap().fail_unsubscribe = fail;
    }
}

#[async_trait]
impl RealtimeTransport for MockRealtime {
    async fn subscribe(
        &self,
        channel: &ChannelName,
        filter: RealtimeFilter,
    ) -> Result<RealtimeStream, RealtimeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.subscribe_calls.push(channel.clone());
        if let Some(error) = inner.fail_next_subscribe.take() {
            return Err(RealtimeError::SubscribeFailed(error));
        }

        inner.next_token += 1;
        let token = inner.next_token;
        let (sender, events) = mpsc::channel(CHANNEL_BUFFER);
        inner.open.insert(
            channel.clone(),
            OpenChannel {
                token,
                filter,
                sender,
            },
        );

        Ok(RealtimeStream {
            handle: Box::new(MockSubscription {
                channel: channel.clone(),
                token,
                inner: Arc::clone(&self.inner),
            }),
            events,
        })
    }

    async fn broadcast(
        &self,
        channel: &ChannelName,
        event: RealtimeEvent,
    ) -> Result<(), RealtimeError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.open.contains_key(channel) {
            return Err(RealtimeError::BroadcastFailed(format!(
                "{} is not open",
                channel
            )));
        }
        inner.broadcasts.push((channel.clone(), event));
        Ok(())
    }
}

/// Subscription handle returned by [`MockRealtime`].
struct MockSubscription {
    channel: ChannelName,
    token: u64,
    inner: Arc<Mutex<MockRealtimeInner>>,
}

#[async_trait]
impl Subscription for MockSubscription {
    async fn unsubscribe(&self) -> Result<(), RealtimeError> {
        let mut inner = self.inner.lock().unwrap();
        // A newer subscription under the same name stays open.
        if inner
            .open
            .get(&self.channel)
            .is_some_and(|open| open.token == self.token)
        {
            inner.open.remove(&self.channel);
        }
        if inner.fail_unsubscribe {
            return Err(RealtimeError::UnsubscribeFailed(self.channel.to_string()));
        }
        inner.unsubscribed.push(self.channel.clone());
        Ok(())
    }
}
