use std::collections::HashMap;
use std::sync::Arc;

use mikan_core::SessionId;
use mikan_store::SessionStorage;
use mikan_transport::TransportConnector;
use tokio::sync::{RwLock, broadcast};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::SessionSettings;
use crate::error::{Result, SessionError};
use crate::events::SessionEvent;
use crate::session::Session;
use crate::state::SessionStatus;

const EVENT_BUFFER: usize = 256;

#[derive(Debug, Default)]
pub struct RestoreReport {
    pub restored: Vec<SessionId>,
    pub failed: Vec<(SessionId, String)>,
}

/// Every live session of the process, keyed by id.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    connector: Arc<dyn TransportConnector>,
    storage: Arc<dyn SessionStorage>,
    settings: SessionSettings,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionRegistry {
    pub fn new(
        connector: Arc<dyn TransportConnector>,
        storage: Arc<dyn SessionStorage>,
        settings: SessionSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            sessions: RwLock::new(HashMap::new()),
            connector,
            storage,
            settings,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn build(&self, id: SessionId) -> Arc<Session> {
        Session::new(
            id,
            self.connector.clone(),
            self.storage.clone(),
            self.settings.clone(),
            self.events.clone(),
        )
    }

    async fn get_or_insert(&self, id: &SessionId) -> Arc<Session> {
        self.sessions
            .write()
            .await
            .entry(id.clone())
            .or_insert_with(|| self.build(id.clone()))
            .clone()
    }

    /// Connects a session for every stored slot. A failing session stays
    /// registered in `error` and does not affect the others.
    pub async fn restore_all(&self) -> Result<RestoreReport> {
        let ids = self.storage.list_sessions().await?;
        info!(count = ids.len(), "Restoring sessions");

        let mut tasks = JoinSet::new();
        for id in ids {
            let session = self.get_or_insert(&id).await;
            tasks.spawn(async move {
                let result = session.connect().await;
                (id, result)
            });
        }

        let mut report = RestoreReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, Ok(()))) => report.restored.push(id),
                Ok((id, Err(e))) => {
                    warn!(session_id = %id, error = %e, "Failed to restore session");
                    report.failed.push((id, e.to_string()));
                }
                Err(e) => warn!(error = %e, "Restore task aborted"),
            }
        }

        report.restored.sort();
        report.failed.sort_by(|a, b| a.0.cmp(&b.0));
        info!(
            restored = report.restored.len(),
            failed = report.failed.len(),
            "Sessions restored"
        );
        Ok(report)
    }

    /// Connects `id`, registering it first if needed. A connected session
    /// is a conflict; any other existing session is driven to connect again.
    pub async fn create(&self, id: &str) -> Result<Arc<Session>> {
        let id = SessionId::parse(id)?;

        let existing = self.sessions.read().await.get(&id).cloned();
        if let Some(session) = existing {
            if session.status().await == SessionStatus::Connected {
                return Err(SessionError::Conflict(id.to_string()));
            }
            info!(session_id = %id, "Reconnecting existing session");
            session.connect().await?;
            return Ok(session);
        }

        info!(session_id = %id, "Creating session");
        let session = self.get_or_insert(&id).await;
        session.connect().await?;
        Ok(session)
    }

    /// Logs the session out and forgets it.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let id = SessionId::parse(id)?;
        let session = self
            .sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(format!("Session {}", id)))?;

        let result = session.logout().await;
        self.sessions.write().await.remove(&id);
        info!(session_id = %id, "Session deleted");
        result
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        let id = SessionId::parse(id).ok()?;
        self.sessions.read().await.get(&id).cloned()
    }

    /// Sorted by id.
    pub async fn get_all(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        sessions.sort_by(|a, b| a.id().cmp(b.id()));
        sessions
    }

    /// Stops timers, writes a final snapshot and closes every transport.
    /// Credentials are kept for the next start.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.write().await.drain().map(|(_, s)| s).collect();
        info!(count = sessions.len(), "Shutting down sessions");

        let mut tasks = JoinSet::new();
        for session in sessions {
            tasks.spawn(async move { session.shutdown().await });
        }
        while tasks.join_next().await.is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeConnector, settle};
    use mikan_store::FsSessionStorage;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    async fn registry() -> (TempDir, Arc<FakeConnector>, Arc<dyn SessionStorage>, SessionRegistry) {
        let temp = tempdir().unwrap();
        let storage: Arc<dyn SessionStorage> =
            Arc::new(FsSessionStorage::new(temp.path()).await.unwrap());
        let connector = FakeConnector::new();
        let registry = SessionRegistry::new(connector.clone(), storage.clone(), SessionSettings::default());
        (temp, connector, storage, registry)
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_then_conflict_then_reconnect() {
        let (_temp, connector, storage, registry) = registry().await;

        let session = registry.create("s1").await.unwrap();
        assert_eq!(session.status().await, SessionStatus::Connecting);
        assert_eq!(storage.list_sessions().await.unwrap().len(), 1);

        // Not connected yet: create drives connect again on the same instance.
        let again = registry.create("s1").await.unwrap();
        assert!(Arc::ptr_eq(&session, &again));
        assert_eq!(connector.connects(), 2);

        connector.open("s1").await;
        settle().await;
        let err = registry.create("s1").await.unwrap_err();
        assert!(matches!(err, SessionError::Conflict(_)));
        assert_eq!(connector.connects(), 2);
    }

    #[tokio::test]
    async fn test_create_validates_id() {
        let (_temp, connector, _storage, registry) = registry().await;
        for bad in ["", "has space", "../etc"] {
            let err = registry.create(bad).await.unwrap_err();
            assert!(matches!(err, SessionError::Validation(_)), "{:?}", bad);
        }
        assert_eq!(connector.connects(), 0);
        assert!(registry.get_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_connect_keeps_entry_in_error() {
        let (_temp, connector, _storage, registry) = registry().await;
        connector.fail_connects(true);

        assert!(registry.create("s1").await.is_err());
        let session = registry.get("s1").await.unwrap();
        assert_eq!(session.status().await, SessionStatus::Error);

        connector.fail_connects(false);
        registry.create("s1").await.unwrap();
        assert_eq!(session.status().await, SessionStatus::Connecting);
    }

    #[tokio::test]
    async fn test_restore_all_isolates_failures() {
        let (_temp, connector, storage, registry) = registry().await;
        for id in ["a", "b", "c"] {
            storage.write_credentials(&SessionId::parse(id).unwrap(), "creds").await.unwrap();
        }
        connector.fail_connects(true);

        let report = registry.restore_all().await.unwrap();
        assert!(report.restored.is_empty());
        assert_eq!(report.failed.len(), 3);
        assert_eq!(registry.get_all().await.len(), 3);

        connector.fail_connects(false);
        let report = registry.restore_all().await.unwrap();
        assert_eq!(
            report.restored,
            vec![
                SessionId::parse("a").unwrap(),
                SessionId::parse("b").unwrap(),
                SessionId::parse("c").unwrap()
            ]
        );
        assert_eq!(registry.get_all().await.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete() {
        let (_temp, connector, storage, registry) = registry().await;
        registry.create("s1").await.unwrap();
        connector.open("s1").await;
        settle().await;

        registry.delete("s1").await.unwrap();
        assert!(registry.get("s1").await.is_none());
        assert!(storage.list_sessions().await.unwrap().is_empty());
        assert_eq!(
            connector.transport().logouts.load(std::sync::atomic::Ordering::SeqCst),
            1
        );

        let err = registry.delete("s1").await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));

        // Recreating after delete starts a fresh pairing.
        registry.create("s1").await.unwrap();
        assert_eq!(connector.last_credentials(), Some(None));
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_are_broadcast() {
        let (_temp, connector, _storage, registry) = registry().await;
        let mut events = registry.subscribe();

        registry.create("s1").await.unwrap();
        connector.open("s1").await;
        settle().await;

        let mut statuses = Vec::new();
        while let Ok(event) = events.try_recv() {
            assert_eq!(event.session_id().as_str(), "s1");
            if let SessionEvent::StatusChanged { status, .. } = event {
                statuses.push(status);
            }
        }
        assert_eq!(statuses, vec![SessionStatus::Connecting, SessionStatus::Connected]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_keeps_credentials_and_stops_reconnects() {
        let (_temp, connector, storage, registry) = registry().await;
        storage.write_credentials(&SessionId::parse("s1").unwrap(), "creds").await.unwrap();
        registry.restore_all().await.unwrap();
        connector.open("s1").await;
        settle().await;

        registry.shutdown().await;
        assert!(registry.get_all().await.is_empty());
        assert_eq!(storage.list_sessions().await.unwrap().len(), 1);
        assert!(storage.read_snapshot(&SessionId::parse("s1").unwrap()).await.unwrap().is_some());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(connector.connects(), 1);
    }
}
