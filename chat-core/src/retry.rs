//! Retry policy and state machine for initial loads.
//!
//! Failed loads are retried with exponential backoff:
//! `delay_after(n) = base * 2^(n-1)` after failed attempt `n`, for at most
//! `max_attempts` attempts in total. After that the load is `Exhausted` and
//! only a manual retry starts a new cycle.
//!
//! With the default three attempts the waits are `base` and `2 * base`. The
//! `4 * base` delay would follow the third failure, which gives up instead.
//!
//! Like the load state machine, this is pure: chat-client runs the attempts
//! and timers the returned actions ask for.

use std::time::Duration;

/// Default number of attempts before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay after the first failed attempt.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Total number of attempts per cycle.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    /// Create a policy. `max_attempts` is at least 1.
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Delay to wait after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Whether another attempt is allowed after `attempt` failed.
    pub fn allows_another(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Every delay a cycle that always fails will wait, in order.
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.max_attempts).map(|a| self.delay_after(a)).collect()
    }
}

/// Where a retry cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryState {
    /// No cycle running.
    #[default]
    Idle,
    /// Attempt `attempt` is in flight.
    Running {
        /// 1-based attempt number.
        attempt: u32,
    },
    /// Waiting for the automatic retry timer.
    Waiting {
        /// The attempt that failed.
        attempt: u32,
        /// Time until the next attempt.
        delay: Duration,
    },
    /// All attempts failed; waiting for a manual retry.
    Exhausted {
        /// Attempts made in the failed cycle.
        attempts: u32,
    },
}

/// Events in a retry cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryEvent {
    /// A load was requested.
    Started,
    /// The running attempt succeeded.
    AttemptSucceeded,
    /// The running attempt failed.
    AttemptFailed {
        /// Whether the error is worth retrying (transient).
        retryable: bool,
    },
    /// The automatic retry timer fired.
    TimerFired,
    /// The user pressed retry.
    ManualRetry,
    /// The owner gave up on the load.
    Cancelled,
    /// Whoever was driving the cycle stopped (the load future was dropped).
    Abandoned,
}

/// Actions for chat-client to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    /// Run the operation.
    RunAttempt {
        /// 1-based attempt number.
        attempt: u32,
    },
    /// Start the automatic retry timer.
    StartTimer {
        /// How long to wait.
        delay: Duration,
    },
    /// Cancel the pending automatic retry timer.
    CancelTimer,
    /// Surface a non-retryable error as is.
    Fail,
    /// Surface the terminal error with a manual retry affordance.
    GiveUp {
        /// Attempts made.
        attempts: u32,
    },
    /// A load is already in flight; do not start another.
    AlreadyRunning,
}

impl RetryState {
    /// Process an event and return the new state plus actions to execute.
    pub fn on_event(self, event: RetryEvent, policy: &RetryPolicy) -> (Self, Vec<RetryAction>) {
        use RetryEvent as E;
        match (self, event) {
            (Self::Idle | Self::Exhausted { .. }, E::Started | E::ManualRetry) => (
                Self::Running { attempt: 1 },
                vec![RetryAction::RunAttempt { attempt: 1 }],
            ),

            // From Running
            (Self::Running { .. }, E::AttemptSucceeded) => (Self::Idle, vec![]),
            (Self::Running { .. }, E::AttemptFailed { retryable: false }) => {
                (Self::Idle, vec![RetryAction::Fail])
            }
            (Self::Running { attempt }, E::AttemptFailed { retryable: true }) => {
                if policy.allows_another(attempt) {
                    let delay = policy.delay_after(attempt);
                    (
                        Self::Waiting { attempt, delay },
                        vec![RetryAction::StartTimer { delay }],
                    )
                } else {
                    (
                        Self::Exhausted { attempts: attempt },
                        vec![RetryAction::GiveUp { attempts: attempt }],
                    )
                }
            }
            (Self::Running { .. }, E::Started | E::ManualRetry) => {
                (self, vec![RetryAction::AlreadyRunning])
            }

            // From Waiting
            (Self::Waiting { attempt, .. }, E::TimerFired) => {
                let next = attempt.saturating_add(1);
                (
                    Self::Running { attempt: next },
                    vec![RetryAction::RunAttempt { attempt: next }],
                )
            }
            (Self::Waiting { .. }, E::ManualRetry | E::Started) => (
                Self::Running { attempt: 1 },
                vec![
                    RetryAction::CancelTimer,
                    RetryAction::RunAttempt { attempt: 1 },
                ],
            ),
            (Self::Waiting { .. }, E::Cancelled | E::Abandoned) => {
                (Self::Idle, vec![RetryAction::CancelTimer])
            }
            (Self::Running { .. }, E::Abandoned) => (Self::Idle, vec![]),

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if the cycle gave up.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}
