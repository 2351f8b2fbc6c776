use std::sync::Arc;
use std::time::Duration;

use mikan_core::SessionId;
use mikan_store::{PictureSlot, SharedStore};
use mikan_transport::Transport;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillPolicy {
    /// Upper bound on concurrent lookups started for one page.
    pub max_fetches: usize,
    /// How long a query waits for lookups before answering without them.
    pub wait: Duration,
}

/// Starts picture lookups for the page items whose picture is unknown and
/// patches the items that resolve within `policy.wait`. Lookups that take
/// longer still land in the store for the next query. Returns the number
/// of items patched in place.
pub(crate) async fn fill_pictures<T: PictureSlot>(
    session_id: &SessionId,
    transport: Arc<dyn Transport>,
    store: &SharedStore,
    items: &mut [T],
    policy: &BackfillPolicy,
) -> usize {
    let targets: Vec<String> = items
        .iter()
        .filter(|item| !item.picture_known())
        .take(policy.max_fetches)
        .map(|item| item.jid().to_string())
        .collect();

    if targets.is_empty() {
        return 0;
    }

    tracing::debug!(session_id = %session_id, count = targets.len(), "Backfilling profile pictures");

    let (tx, mut rx) = mpsc::channel(targets.len());
    for jid in targets {
        let transport = transport.clone();
        let store = store.clone();
        let tx = tx.clone();
        let session_id = session_id.clone();

        tokio::spawn(async move {
            match transport.profile_picture_url(&jid).await {
                Ok(url) => {
                    store.write().await.set_profile_picture(&jid, url.clone());
                    let _ = tx.send((jid, url)).await;
                }
                Err(e) => {
                    tracing::debug!(session_id = %session_id, jid = %jid, error = %e, "Profile picture lookup failed");
                }
            }
        });
    }
    drop(tx);

    let deadline = tokio::time::sleep(policy.wait);
    tokio::pin!(deadline);

    let mut patched = 0;
    loop {
        tokio::select! {
            resolved = rx.recv() => match resolved {
                Some((jid, url)) => {
                    for item in items.iter_mut().filter(|item| item.jid() == jid) {
                        item.set_picture(url.clone());
                        patched += 1;
                    }
                }
                None => break,
            },
            _ = &mut deadline => {
                tracing::debug!(session_id = %session_id, patched, "Backfill wait elapsed");
                break;
            }
        }
    }

    patched
}
