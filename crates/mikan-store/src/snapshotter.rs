use std::sync::Arc;
use std::time::Duration;

use mikan_core::SessionId;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::storage::SessionStorage;
use crate::store::SharedStore;

/// Periodically writes the store's snapshot into the session slot.
///
/// Dropping or stopping the timer aborts the task; no write is started
/// after that point.
pub struct SnapshotTimer {
    handle: JoinHandle<()>,
}

impl SnapshotTimer {
    pub fn spawn(
        session_id: SessionId,
        store: SharedStore,
        storage: Arc<dyn SessionStorage>,
        interval: Duration,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                flush_snapshot(&session_id, &store, storage.as_ref()).await;
            }
        });

        Self { handle }
    }

    pub fn stop(self) {
        self.handle.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for SnapshotTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Copies the cache under the read lock, serializes outside of it and
/// writes the bytes. Failures are logged and reported as `false`.
pub async fn flush_snapshot(
    session_id: &SessionId,
    store: &SharedStore,
    storage: &dyn SessionStorage,
) -> bool {
    let snapshot = store.read().await.snapshot();

    let bytes = match snapshot.to_bytes() {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(session_id = %session_id, error = %e, "Failed to serialize snapshot");
            return false;
        }
    };

    match storage.write_snapshot(session_id, &bytes).await {
        Ok(()) => {
            tracing::debug!(
                session_id = %session_id,
                bytes = bytes.len(),
                chats = snapshot.chats.len(),
                "Snapshot written"
            );
            true
        }
        Err(e) => {
            tracing::warn!(session_id = %session_id, error = %e, "Failed to write snapshot");
            false
        }
    }
}
