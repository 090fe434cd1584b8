//! Per-conversation load state machine.
//!
//! This module provides a pure, side-effect-free state machine tracking how
//! fresh the locally held messages of one conversation are. It takes events
//! as input and produces a new state plus a list of actions to execute.
//!
//! ```text
//! Unloaded ──fetch──► Loading ──ok──► Loaded ──invalidate/insert──► Stale
//!     ▲                  │                                            │
//!     └──────fail────────┘◄───────────fetch / refresh timer───────────┘
//! ```
//!
//! The actual I/O (fetching, caching) is performed by chat-client.

/// Load state of one conversation's messages - NO I/O, just transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    /// Nothing loaded yet (or the view was closed).
    #[default]
    Unloaded,
    /// A fetch is in flight.
    Loading {
        /// True if the conversation had been loaded before.
        refresh: bool,
        /// An invalidation arrived while the fetch was in flight.
        invalidated: bool,
    },
    /// Messages are present and believed current.
    Loaded,
    /// Messages are present but known to be outdated.
    Stale,
}

impl LoadState {
    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects.
    pub fn on_event(self, event: LoadEvent) -> (Self, Vec<LoadAction>) {
        use LoadEvent as E;
        match (self, event) {
            // From Unloaded
            (Self::Unloaded, E::FetchRequested) => (
                Self::Loading {
                    refresh: false,
                    invalidated: false,
                },
                vec![LoadAction::StartFetch],
            ),

            // From Loading
            (Self::Loading { .. }, E::FetchRequested) => (self, vec![LoadAction::JoinFetch]),
            (
                Self::Loading {
                    invalidated: false, ..
                },
                E::FetchSucceeded,
            ) => (Self::Loaded, vec![LoadAction::ApplyResult]),
            (
                Self::Loading {
                    invalidated: true, ..
                },
                E::FetchSucceeded,
            ) => (
                Self::Stale,
                vec![LoadAction::ApplyResult, LoadAction::EmitStale],
            ),
            (Self::Loading { refresh: false, .. }, E::FetchFailed) => {
                (Self::Unloaded, vec![LoadAction::ReportFailure])
            }
            (Self::Loading { refresh: true, .. }, E::FetchFailed) => {
                (Self::Stale, vec![LoadAction::ReportFailure])
            }
            (Self::Loading { refresh, .. }, E::Invalidated | E::RealtimeInsert) => (
                Self::Loading {
                    refresh,
                    invalidated: true,
                },
                vec![],
            ),

            // From Loaded
            (Self::Loaded, E::FetchRequested) => (self, vec![LoadAction::ServeLocal]),
            (Self::Loaded, E::Invalidated | E::RealtimeInsert) => {
                (Self::Stale, vec![LoadAction::EmitStale])
            }

            // From Stale
            (Self::Stale, E::FetchRequested | E::RefreshTimer) => (
                Self::Loading {
                    refresh: true,
                    invalidated: false,
                },
                vec![LoadAction::StartFetch],
            ),

            // Closing the view forgets everything; late results are dropped
            (_, E::Closed) => (Self::Unloaded, vec![LoadAction::Discard]),

            // A result nobody is waiting for any more
            (Self::Unloaded | Self::Loaded | Self::Stale, E::FetchSucceeded) => {
                (self, vec![LoadAction::DropResult])
            }

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if messages are present (fresh or stale).
    pub fn has_data(&self) -> bool {
        matches!(
            self,
            Self::Loaded | Self::Stale | Self::Loading { refresh: true, .. }
        )
    }

    /// Check if a fetch is in flight.
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading { .. })
    }

    /// Check if the data is known to be outdated.
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale)
    }
}

/// Events in a conversation's load lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadEvent {
    /// Someone read the conversation's messages.
    FetchRequested,
    /// The fetch returned rows.
    FetchSucceeded,
    /// The fetch failed.
    FetchFailed,
    /// The cache key was invalidated.
    Invalidated,
    /// A realtime insert arrived for this conversation.
    RealtimeInsert,
    /// The periodic refresh timer fired.
    RefreshTimer,
    /// The conversation view was closed.
    Closed,
}

/// Actions to be executed by chat-client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadAction {
    /// Schedule a fetch through the coordinator.
    StartFetch,
    /// A fetch is already in flight; await it.
    JoinFetch,
    /// Serve the locally held messages.
    ServeLocal,
    /// Write the fetched rows into the store.
    ApplyResult,
    /// Discard the fetched rows.
    DropResult,
    /// Tell subscribers the conversation is stale.
    EmitStale,
    /// Surface the load failure.
    ReportFailure,
    /// Forget local state and cancel per-conversation timers.
    Discard,
}
