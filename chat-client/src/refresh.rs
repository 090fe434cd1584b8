//! Background refresh task for stale conversations.
//!
//! Runs periodically to drop expired cache entries and refetch
//! conversations whose local messages were invalidated by realtime events.

use std::time::Duration;

use tokio::time::interval;

use crate::backend::{ChatBackend, RealtimeTransport};
use crate::config::RefreshConfig;
use crate::sync::WeakChatSync;

/// Spawn the background refresh task.
///
/// The task holds only a weak reference and stops once the engine is
/// dropped. Returns a handle that can be used to abort it.
pub(crate) fn spawn_refresh_task<B, R>(
    sync: WeakChatSync<B, R>,
    config: RefreshConfig,
) -> tokio::task::JoinHandle<()>
where
    B: ChatBackend,
    R: RealtimeTransport,
{
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("Refresh task disabled");
            return;
        }

        let interval_secs = config.interval_secs.max(1);
        tracing::info!("Refresh task started (interval: {}s)", interval_secs);

        let mut timer = interval(Duration::from_secs(interval_secs));

        loop {
            timer.tick().await;

            let Some(sync) = sync.upgrade() else {
                tracing::debug!("Refresh task stopped: engine dropped");
                return;
            };

            let purged = sync.context().purge_expired();
            if purged > 0 {
                tracing::debug!("Refresh: purged {} expired cache entries", purged);
            }

            let refreshed = sync.refresh_stale().await;
            if refreshed > 0 {
                tracing::info!("Refresh: reloaded {} stale conversations", refreshed);
            } else {
                tracing::debug!("Refresh: nothing stale");
            }
        }
    })
}
