//! Retry controller for initial loads.
//!
//! Drives the pure [`RetryState`] machine from chat-core: runs attempts,
//! sleeps between them and surfaces the terminal error once the policy is
//! exhausted. A manual retry while an automatic retry is pending cancels
//! the timer and starts a fresh cycle; the superseded run resolves with
//! [`ClientError::Cancelled`]. Dropping a load future mid-cycle returns the
//! controller to idle.

use std::future::Future;
use std::sync::Mutex;

use chat_core::{RetryAction, RetryEvent, RetryPolicy, RetryState};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::lock;

#[derive(Debug, Default)]
struct ControllerInner {
    state: RetryState,
    cycle: u64,
    cancel_timer: Option<oneshot::Sender<()>>,
}

/// Retries one resource's load with bounded exponential backoff.
#[derive(Debug)]
pub struct RetryController {
    resource: String,
    policy: RetryPolicy,
    inner: Mutex<ControllerInner>,
}

impl RetryController {
    /// Create a controller for `resource` (used in logs).
    pub fn new(resource: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            resource: resource.into(),
            policy,
            inner: Mutex::new(ControllerInner::default()),
        }
    }

    /// Current state, for loading and "retry" affordances.
    pub fn state(&self) -> RetryState {
        lock(&self.inner).state
    }

    /// The policy in use.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run `op` until it succeeds, fails permanently or attempts run out.
    ///
    /// # Errors
    ///
    /// - the operation's own error if it is not retryable
    /// - [`ClientError::RetriesExhausted`] after the last attempt
    /// - [`ClientError::LoadInProgress`] if an attempt is already running
    /// - [`ClientError::Cancelled`] if superseded by [`retry_now`](Self::retry_now)
    pub async fn run<T, F, Fut>(&self, op: F) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let cycle = self.start(RetryEvent::Started)?;
        self.drive(cycle, op).await
    }

    /// Manual retry: cancel any pending automatic retry and start over.
    pub async fn retry_now<T, F, Fut>(&self, op: F) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        info!("Manual retry for {}", self.resource);
        let cycle = self.start(RetryEvent::ManualRetry)?;
        self.drive(cycle, op).await
    }

    /// Give up on a pending automatic retry.
    pub fn cancel(&self) {
        let mut inner = lock(&self.inner);
        let (state, actions) = inner.state.on_event(RetryEvent::Cancelled, &self.policy);
        inner.state = state;
        if actions.contains(&RetryAction::CancelTimer) {
            inner.cycle += 1;
            if let Some(cancel) = inner.cancel_timer.take() {
                let _ = cancel.send(());
            }
        }
    }

    /// Begin a cycle. Returns its id.
    fn start(&self, event: RetryEvent) -> Result<u64, ClientError> {
        let mut inner = lock(&self.inner);
        let (state, actions) = inner.state.on_event(event, &self.policy);
        inner.state = state;
        if actions.contains(&RetryAction::AlreadyRunning) {
            debug!("Load of {} already running", self.resource);
            return Err(ClientError::LoadInProgress);
        }
        if actions.contains(&RetryAction::CancelTimer) {
            if let Some(cancel) = inner.cancel_timer.take() {
                let _ = cancel.send(());
            }
        }
        inner.cycle += 1;
        Ok(inner.cycle)
    }

    async fn drive<T, F, Fut>(&self, cycle: u64, mut op: F) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let _driver = CycleDriver {
            controller: self,
            cycle,
        };
        let mut attempt = 1;
        loop {
            let error = match op().await {
                Ok(value) => {
                    let mut inner = lock(&self.inner);
                    if inner.cycle == cycle {
                        inner.state = inner
                            .state
                            .on_event(RetryEvent::AttemptSucceeded, &self.policy)
                            .0;
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            let (actions, mut woken) = {
                let mut inner = lock(&self.inner);
                if inner.cycle != cycle {
                    return Err(ClientError::Cancelled);
                }
                let (state, actions) = inner.state.on_event(
                    RetryEvent::AttemptFailed {
                        retryable: error.is_retryable(),
                    },
                    &self.policy,
                );
                inner.state = state;
                let woken = if actions
                    .iter()
                    .any(|a| matches!(a, RetryAction::StartTimer { .. }))
                {
                    let (cancel, woken) = oneshot::channel();
                    inner.cancel_timer = Some(cancel);
                    Some(woken)
                } else {
                    None
                };
                (actions, woken)
            };

            for action in actions {
                match action {
                    RetryAction::Fail => return Err(error),
                    RetryAction::GiveUp { attempts } => {
                        warn!(
                            "Giving up on {} after {} attempts: {}",
                            self.resource, attempts, error
                        );
                        return Err(ClientError::RetriesExhausted {
                            attempts,
                            last: Box::new(error),
                        });
                    }
                    RetryAction::StartTimer { delay } => {
                        debug!(
                            "Attempt {} for {} failed ({}), retrying in {:?}",
                            attempt, self.resource, error, delay
                        );
                        if let Some(woken) = woken.take() {
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                _ = woken => return Err(ClientError::Cancelled),
                            }
                        }
                    }
                    _ => {}
                }
            }

            let mut inner = lock(&self.inner);
            if inner.cycle != cycle {
                return Err(ClientError::Cancelled);
            }
            inner.cancel_timer = None;
            let (state, actions) = inner.state.on_event(RetryEvent::TimerFired, &self.policy);
            inner.state = state;
            match actions.first() {
                Some(RetryAction::RunAttempt { attempt: next }) => attempt = *next,
                _ => return Err(error),
            }
        }
    }
}

/// Held by the future driving a cycle. Dropping it while the cycle is still
/// current (the caller stopped awaiting) abandons the cycle.
struct CycleDriver<'a> {
    controller: &'a RetryController,
    cycle: u64,
}

impl Drop for CycleDriver<'_> {
    fn drop(&mut self) {
        let controller = self.controller;
        let mut inner = lock(&controller.inner);
        if inner.cycle != self.cycle {
            return;
        }
        let (state, actions) = inner
            .state
            .on_event(RetryEvent::Abandoned, &controller.policy);
        if state != inner.state {
            debug!("Load of {} abandoned in {:?}", controller.resource, inner.state);
        }
        inner.state = state;
        if actions.contains(&RetryAction::CancelTimer) {
            inner.cancel_timer = None;
        }
    }
}
