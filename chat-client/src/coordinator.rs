//! Request coordinator.
//!
//! Guarantees at most one in-flight backend request per cache key:
//! concurrent callers for the same key await one shared future and the
//! request factory runs once. Distinct keys compete for a bounded number of
//! concurrency slots; waiting requests are admitted by priority, then FIFO.
//!
//! Requests run on spawned tasks. A caller that stops awaiting does not
//! cancel the backend work; other awaiters still get the result.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use chat_core::{CacheKey, Priority};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::ClientError;
use crate::lock;

type SharedRequest<V> = Shared<BoxFuture<'static, Result<V, ClientError>>>;

/// Default number of concurrently running requests.
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

/// An in-flight request. Destroyed when it settles.
struct PendingRequest<V> {
    id: u64,
    priority: Priority,
    started_at: Instant,
    future: SharedRequest<V>,
}

struct CoordinatorInner<V> {
    pending: DashMap<CacheKey, PendingRequest<V>>,
    slots: SlotPool,
    next_id: AtomicU64,
}

/// De-duplicating, priority-aware request scheduler.
///
/// Cheap to clone; clones share the pending table and slots.
pub struct RequestCoordinator<V> {
    inner: Arc<CoordinatorInner<V>>,
}

impl<V> Clone for RequestCoordinator<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> std::fmt::Debug for RequestCoordinator<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCoordinator")
            .field("pending", &self.inner.pending.len())
            .field("max_concurrent", &self.inner.slots.max)
            .finish()
    }
}

impl<V> RequestCoordinator<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a coordinator running at most `max_concurrent` requests at once.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                pending: DashMap::new(),
                slots: SlotPool::new(max_concurrent),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Run `factory` for `key`, or join the request already in flight.
    ///
    /// The factory is invoked once a slot is free. Its result (or error) is
    /// delivered to every caller that joined; nothing is retried here.
    pub async fn schedule<F, Fut>(
        &self,
        key: CacheKey,
        priority: Priority,
        factory: F,
    ) -> Result<V, ClientError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, ClientError>> + Send + 'static,
    {
        let request = match self.inner.pending.entry(key.clone()) {
            Entry::Occupied(entry) => {
                debug!("Joining in-flight request for {}", key);
                entry.get().future.clone()
            }
            Entry::Vacant(entry) => {
                let id = self.inner.next_id.fetch_add(1, AtomicOrdering::Relaxed);
                let inner = Arc::clone(&self.inner);
                let task_key = key.clone();
                debug!("Scheduling request for {} ({:?})", key, priority);

                let task = tokio::spawn(async move {
                    let settled = Settled {
                        inner: Arc::clone(&inner),
                        key: task_key,
                        id,
                    };
                    let slot = inner.slots.acquire(priority).await;
                    trace!("Running request for {}", settled.key);
                    let result = factory().await;
                    drop(slot);
                    result
                });
                let future = async move {
                    task.await.unwrap_or_else(|e| {
                        Err(ClientError::Internal(format!("request task failed: {}", e)))
                    })
                }
                .boxed()
                .shared();

                // The entry lock is held until the insert, so the task cannot
                // remove the key before it exists.
                entry.insert(PendingRequest {
                    id,
                    priority,
                    started_at: Instant::now(),
                    future: future.clone(),
                });
                future
            }
        };
        request.await
    }

    /// Check whether a request for `key` is in flight.
    pub fn in_flight(&self, key: &CacheKey) -> bool {
        self.inner.pending.contains_key(key)
    }

    /// Priority and start time of the request in flight for `key`.
    pub fn pending_info(&self, key: &CacheKey) -> Option<(Priority, Instant)> {
        self.inner
            .pending
            .get(key)
            .map(|p| (p.priority, p.started_at))
    }

    /// Number of requests in flight (running or waiting for a slot).
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Number of requests currently holding a slot.
    pub fn running_count(&self) -> usize {
        self.inner.slots.active()
    }
}

/// Frees the pending entry of a request when its task ends, including by
/// panic, so the next caller for the key starts a fresh request.
struct Settled<V> {
    inner: Arc<CoordinatorInner<V>>,
    key: CacheKey,
    id: u64,
}

impl<V> Drop for Settled<V> {
    fn drop(&mut self) {
        let id = self.id;
        self.inner.pending.remove_if(&self.key, |_, p| p.id == id);
    }
}

// ===========================================
// Concurrency slots
// ===========================================

/// A request waiting for a slot.
struct Waiter {
    priority: Priority,
    seq: u64,
    wake: oneshot::Sender<()>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Waiter {}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiter {
    // Max-heap: higher priority first, then the earlier arrival.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct SlotState {
    active: usize,
    waiting: BinaryHeap<Waiter>,
    next_seq: u64,
}

/// Counting pool with priority-ordered waiters.
struct SlotPool {
    max: usize,
    state: Arc<Mutex<SlotState>>,
}

/// A held slot; released on drop.
struct SlotGuard {
    state: Arc<Mutex<SlotState>>,
}

impl SlotPool {
    fn new(max: usize) -> Self {
        Self {
            max: max.max(1),
            state: Arc::new(Mutex::new(SlotState::default())),
        }
    }

    fn active(&self) -> usize {
        lock(&self.state).active
    }

    async fn acquire(&self, priority: Priority) -> SlotGuard {
        let wait = {
            let mut state = lock(&self.state);
            if state.active < self.max {
                state.active += 1;
                None
            } else {
                let (wake, woken) = oneshot::channel();
                let seq = state.next_seq;
                state.next_seq += 1;
                state.waiting.push(Waiter {
                    priority,
                    seq,
                    wake,
                });
                Some(woken)
            }
        };
        if let Some(woken) = wait {
            // The releasing guard hands its slot over before waking us.
            let _ = woken.await;
        }
        SlotGuard {
            state: Arc::clone(&self.state),
        }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        while let Some(waiter) = state.waiting.pop() {
            if waiter.wake.send(()).is_ok() {
                return;
            }
        }
        state.active = state.active.saturating_sub(1);
    }
}
