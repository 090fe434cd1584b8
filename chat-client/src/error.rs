//! Error types for chat-client.
//!
//! Every orchestrator operation rejects with a [`ClientError`]; its
//! [`ErrorKind`] is the typed reason the UI branches on.

use chat_types::{ChatError, UserId};
use thiserror::Error;

/// Errors returned by the persistence/query service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Transport-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// Request timed out.
    #[error("request timed out")]
    Timeout,

    /// Row not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The server refused the request.
    #[error("rejected by server: {0}")]
    Rejected(String),
}

/// Errors returned by file storage.
///
/// Upload validation failures are kept apart from storage outages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The file was refused (size, type).
    #[error("upload rejected: {0}")]
    Rejected(String),

    /// Storage could not be reached.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Errors returned by the realtime transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RealtimeError {
    /// Subscribing failed.
    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),

    /// Unsubscribing failed.
    #[error("unsubscribe failed: {0}")]
    UnsubscribeFailed(String),

    /// Sending a broadcast failed.
    #[error("broadcast failed: {0}")]
    BroadcastFailed(String),
}

/// Typed rejection reason surfaced to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Transient; retried by the retry controller.
    Network,
    /// Bad input; dismissible inline error, never retried.
    Validation,
    /// Refused by content moderation; never retried.
    Moderation,
    /// Anything else.
    Unknown,
}

/// Client errors.
///
/// `Clone` so a de-duplicated request can hand the same failure to every
/// awaiter.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Persistence service error.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// File storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Input failed validation.
    #[error("validation failed: {0}")]
    Validation(#[from] ChatError),

    /// Content moderation refused the message.
    #[error("message rejected by moderation: {message}")]
    Moderation {
        /// Reason given by the validator.
        message: String,
    },

    /// Realtime subscription failed.
    #[error("realtime error: {0}")]
    Realtime(#[from] RealtimeError),

    /// Operation targeted a user other than the session owner.
    #[error("session belongs to {expected}, not {actual}")]
    WrongUser {
        /// Session owner.
        expected: UserId,
        /// Requested user.
        actual: UserId,
    },

    /// The operation is switched off by configuration.
    #[error("operation disabled: {0}")]
    Disabled(&'static str),

    /// Automatic retries ran out.
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// The last failure.
        last: Box<ClientError>,
    },

    /// Superseded by a manual retry.
    #[error("superseded by a manual retry")]
    Cancelled,

    /// A load for the same resource is already running.
    #[error("a load is already in progress")]
    LoadInProgress,

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// Typed reason for the UI.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Backend(BackendError::Network(_) | BackendError::Timeout) => ErrorKind::Network,
            Self::Storage(StorageError::Unavailable(_)) => ErrorKind::Network,
            Self::Realtime(_) => ErrorKind::Network,
            Self::Storage(StorageError::Rejected(_)) => ErrorKind::Validation,
            Self::Validation(_) | Self::WrongUser { .. } | Self::Disabled(_) => {
                ErrorKind::Validation
            }
            Self::Moderation { .. } => ErrorKind::Moderation,
            Self::RetriesExhausted { last, .. } => last.kind(),
            Self::Backend(BackendError::NotFound(_) | BackendError::Rejected(_))
            | Self::Cancelled
            | Self::LoadInProgress
            | Self::Internal(_) => ErrorKind::Unknown,
        }
    }

    /// Whether the retry controller should try again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Cancelled | Self::LoadInProgress | Self::RetriesExhausted { .. } => false,
            other => matches!(other.kind(), ErrorKind::Network | ErrorKind::Unknown),
        }
    }

    /// Whether this is the terminal error of an exhausted retry cycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RetriesExhausted { .. })
    }
}
