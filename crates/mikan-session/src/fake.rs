//! In-process stand-ins for the bridge, driven directly by tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mikan_core::{
    AccountIdentity, ConnectionState, ConnectionUpdate, DisconnectReason, GroupMetadata,
    HistoryCursor, OutgoingMessage, RegistrationStatus, SentMessage, SessionId, TransportEvent,
};
use mikan_transport::{Result, Transport, TransportConnector, TransportError};
use tokio::sync::mpsc;

#[derive(Default)]
pub(crate) struct FakeTransport {
    pictures: Mutex<HashMap<String, Option<String>>>,
    picture_delay: Mutex<Duration>,
    fail_pictures: AtomicBool,
    lookups: AtomicUsize,
    groups: Mutex<HashMap<String, GroupMetadata>>,
    registered: Mutex<Vec<String>>,
    identity: Mutex<Option<AccountIdentity>>,
    pub(crate) sent: Mutex<Vec<(String, OutgoingMessage)>>,
    pub(crate) history_requests: Mutex<Vec<(String, usize, Option<HistoryCursor>)>>,
    pub(crate) logouts: AtomicUsize,
    pub(crate) closes: AtomicUsize,
}

impl FakeTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn set_picture(&self, jid: &str, url: Option<&str>) {
        self.pictures
            .lock()
            .unwrap()
            .insert(jid.to_string(), url.map(str::to_string));
    }

    pub(crate) fn set_picture_delay(&self, delay: Duration) {
        *self.picture_delay.lock().unwrap() = delay;
    }

    pub(crate) fn fail_pictures(&self, fail: bool) {
        self.fail_pictures.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn picture_lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub(crate) fn add_group(&self, metadata: GroupMetadata) {
        self.groups.lock().unwrap().insert(metadata.id.clone(), metadata);
    }

    pub(crate) fn register_number(&self, jid: &str) {
        self.registered.lock().unwrap().push(jid.to_string());
    }

    pub(crate) fn set_identity(&self, jid: &str, name: &str) {
        *self.identity.lock().unwrap() = Some(AccountIdentity {
            jid: jid.to_string(),
            name: Some(name.to_string()),
        });
    }
}

fn rejected(command: &'static str, reason: &str) -> TransportError {
    TransportError::Rejected {
        command,
        reason: reason.to_string(),
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send_message(&self, to: &str, message: OutgoingMessage) -> Result<SentMessage> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((to.to_string(), message));
        Ok(SentMessage {
            message_id: format!("FAKE{}", sent.len()),
            timestamp: 1_700_000_000,
        })
    }

    async fn profile_picture_url(&self, jid: &str) -> Result<Option<String>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);

        let delay = *self.picture_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.fail_pictures.load(Ordering::SeqCst) {
            return Err(rejected("FetchProfilePicture", "item-not-found"));
        }
        Ok(self.pictures.lock().unwrap().get(jid).cloned().flatten())
    }

    async fn group_metadata(&self, jid: &str) -> Result<GroupMetadata> {
        self.groups
            .lock()
            .unwrap()
            .get(jid)
            .cloned()
            .ok_or_else(|| rejected("FetchGroupMetadata", "not a participant"))
    }

    async fn registration(&self, jid: &str) -> Result<RegistrationStatus> {
        let exists = self.registered.lock().unwrap().iter().any(|r| r == jid);
        Ok(RegistrationStatus {
            jid: jid.to_string(),
            exists,
        })
    }

    async fn fetch_message_history(
        &self,
        chat_jid: &str,
        limit: usize,
        cursor: Option<HistoryCursor>,
    ) -> Result<()> {
        self.history_requests
            .lock()
            .unwrap()
            .push((chat_jid.to_string(), limit, cursor));
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn identity(&self) -> Option<AccountIdentity> {
        self.identity.lock().unwrap().clone()
    }
}

/// Hands out the same [`FakeTransport`] on every connect and keeps the
/// event sender of the latest one.
#[derive(Default)]
pub(crate) struct FakeConnector {
    transport: Arc<FakeTransport>,
    connects: AtomicUsize,
    fail: AtomicBool,
    credentials: Mutex<Vec<Option<String>>>,
    events: Mutex<HashMap<String, mpsc::Sender<TransportEvent>>>,
}

impl FakeConnector {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn transport(&self) -> Arc<FakeTransport> {
        self.transport.clone()
    }

    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_connects(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn last_credentials(&self) -> Option<Option<String>> {
        self.credentials.lock().unwrap().last().cloned()
    }

    pub(crate) async fn emit(&self, session_id: &str, event: TransportEvent) {
        let sender = self
            .events
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .expect("session never connected");
        sender.send(event).await.expect("event loop gone");
    }

    pub(crate) async fn open(&self, session_id: &str) {
        self.emit(
            session_id,
            TransportEvent::ConnectionUpdate(ConnectionUpdate {
                connection: Some(ConnectionState::Open),
                ..Default::default()
            }),
        )
        .await;
    }

    pub(crate) async fn close(&self, session_id: &str, code: u16) {
        self.emit(
            session_id,
            TransportEvent::ConnectionUpdate(ConnectionUpdate {
                connection: Some(ConnectionState::Close),
                disconnect: Some(DisconnectReason::from(code)),
                ..Default::default()
            }),
        )
        .await;
    }
}

#[async_trait]
impl TransportConnector for FakeConnector {
    async fn connect(
        &self,
        session_id: &SessionId,
        credentials: Option<String>,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Arc<dyn Transport>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.credentials.lock().unwrap().push(credentials);

        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::SpawnFailed("bun: not found".into()));
        }

        self.events.lock().unwrap().insert(session_id.to_string(), events);
        Ok(self.transport.clone())
    }
}

/// Lets spawned tasks drain. Under paused time the clock only advances
/// once every other task is idle.
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}
