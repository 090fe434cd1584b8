//! Configuration loading for the chat sync engine.
//!
//! Configuration is loaded from a TOML file (default: `chat-sync.toml`).
//! Every section and field is optional.

use std::path::PathBuf;
use std::time::Duration;

use chat_core::{AttachmentRules, RetryPolicy};
use serde::Deserialize;

/// Root configuration for the sync engine.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChatSyncConfig {
    /// Resource cache configuration.
    pub cache: CacheConfig,
    /// Request coordinator configuration.
    pub requests: RequestConfig,
    /// Read-state reconciler configuration.
    pub read_state: ReadStateConfig,
    /// Retry controller configuration.
    pub retry: RetryConfig,
    /// Stale refresh task configuration.
    pub refresh: RefreshConfig,
    /// Attachment upload limits.
    pub attachments: AttachmentConfig,
    /// Moderation and admin switches.
    pub moderation: ModerationConfig,
    /// Notification bus configuration.
    pub events: EventsConfig,
}

/// Resource cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Time-to-live for cached resources in seconds (default: 300).
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
    /// Maximum number of cached resources; 0 disables the bound (default: 256).
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

/// Request coordinator configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestConfig {
    /// Maximum concurrently running backend requests (default: 4).
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

/// Read-state reconciler configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadStateConfig {
    /// Settle window in milliseconds before a batch is committed (default: 1000).
    #[serde(default = "default_settle_window_ms")]
    pub settle_window_ms: u64,
}

/// Retry controller configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Delay after the first failed attempt in milliseconds (default: 1000).
    /// Doubles after every further failure.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Attempts before giving up (default: 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

/// Stale refresh task configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    /// Interval between stale sweeps in seconds (default: 30).
    #[serde(default = "default_refresh_interval")]
    pub interval_secs: u64,
    /// Enable the refresh task (default: true).
    #[serde(default = "default_refresh_enabled")]
    pub enabled: bool,
}

/// Attachment upload limits.
#[derive(Debug, Clone, Deserialize)]
pub struct AttachmentConfig {
    /// Largest accepted file in bytes (default: 10MB).
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: usize,
    /// Accepted MIME types; `type/*` matches a family.
    #[serde(default = "default_allowed_types")]
    pub allowed_types: Vec<String>,
}

/// Moderation and admin switches.
#[derive(Debug, Clone, Deserialize)]
pub struct ModerationConfig {
    /// Allow flipping messages back to unread (default: false).
    #[serde(default)]
    pub allow_mark_unread: bool,
}

/// Notification bus configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    /// Buffered notifications per subscriber (default: 256).
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,
}

// Default value functions
fn default_cache_ttl() -> u64 {
    300
}

fn default_cache_capacity() -> usize {
    256
}

fn default_max_concurrent() -> usize {
    4
}

fn default_settle_window_ms() -> u64 {
    1000
}

fn default_base_delay_ms() -> u64 {
    chat_core::retry::DEFAULT_BASE_DELAY.as_millis() as u64
}

fn default_max_attempts() -> u32 {
    chat_core::retry::DEFAULT_MAX_ATTEMPTS
}

fn default_refresh_interval() -> u64 {
    30
}

fn default_refresh_enabled() -> bool {
    true
}

fn default_max_size_bytes() -> usize {
    chat_core::validation::DEFAULT_MAX_ATTACHMENT_BYTES
}

fn default_allowed_types() -> Vec<String> {
    AttachmentRules::default().allowed_types
}

fn default_event_capacity() -> usize {
    256
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl(),
            capacity: default_cache_capacity(),
        }
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl Default for ReadStateConfig {
    fn default() -> Self {
        Self {
            settle_window_ms: default_settle_window_ms(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_refresh_interval(),
            enabled: default_refresh_enabled(),
        }
    }
}

impl Default for AttachmentConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: default_max_size_bytes(),
            allowed_types: default_allowed_types(),
        }
    }
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            allow_mark_unread: false,
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
        }
    }
}

impl ChatSyncConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Cache time-to-live.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    /// Settle window of the read-state reconciler.
    pub fn settle_window(&self) -> Duration {
        Duration::from_millis(self.read_state.settle_window_ms)
    }

    /// Interval of the stale refresh task.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh.interval_secs.max(1))
    }

    /// Retry policy for initial loads.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.retry.base_delay_ms),
            self.retry.max_attempts,
        )
    }

    /// Attachment upload rules.
    pub fn attachment_rules(&self) -> AttachmentRules {
        AttachmentRules {
            max_size_bytes: self.attachments.max_size_bytes,
            allowed_types: self.attachments.allowed_types.clone(),
        }
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
