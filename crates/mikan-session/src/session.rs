use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use mikan_core::{
    ConnectionUpdate, GroupMetadata, HistoryCursor, MessageData, OutgoingMessage,
    RegistrationStatus, SentMessage, SessionId, TransportEvent, jid,
};
use mikan_store::{
    ChatFilter, ChatSummary, ContactSummary, ConversationStore, MessagePage, Page, SessionStorage,
    SharedStore, SnapshotTimer, flush_snapshot,
};
use mikan_transport::{Transport, TransportConnector};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backfill;
use crate::config::SessionSettings;
use crate::error::{Result, SessionError};
use crate::events::SessionEvent;
use crate::qr;
use crate::state::{Identity, PairingChallenge, SessionState, SessionStatus, Transition};

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub status: SessionStatus,
    pub identity: Option<Identity>,
    pub has_challenge: bool,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatInfo {
    pub chat: Option<ChatSummary>,
    pub contact: Option<ContactSummary>,
    /// Live metadata, groups only.
    pub group: Option<GroupMetadata>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopControl {
    Continue,
    Stop,
}

/// One messaging connection and its conversation cache.
pub struct Session {
    id: SessionId,
    state: RwLock<SessionState>,
    store: SharedStore,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    connector: Arc<dyn TransportConnector>,
    storage: Arc<dyn SessionStorage>,
    settings: SessionSettings,
    events: broadcast::Sender<SessionEvent>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
    snapshots: Mutex<Option<SnapshotTimer>>,
    connect_lock: Mutex<()>,
    restored: AtomicBool,
    retired: AtomicBool,
    this: Weak<Session>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Session");
        out.field("id", &self.id);
        match self.state.try_read() {
            Ok(state) => out.field("status", &state.status()),
            Err(_) => out.field("status", &"<locked>"),
        };
        out.finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(
        id: SessionId,
        connector: Arc<dyn TransportConnector>,
        storage: Arc<dyn SessionStorage>,
        settings: SessionSettings,
        events: broadcast::Sender<SessionEvent>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            id,
            state: RwLock::new(SessionState::default()),
            store: ConversationStore::shared(),
            transport: RwLock::new(None),
            connector,
            storage,
            settings,
            events,
            event_loop: Mutex::new(None),
            snapshots: Mutex::new(None),
            connect_lock: Mutex::new(()),
            restored: AtomicBool::new(false),
            retired: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn store(&self) -> SharedStore {
        self.store.clone()
    }

    pub async fn status(&self) -> SessionStatus {
        self.state.read().await.status()
    }

    pub async fn challenge(&self) -> Option<PairingChallenge> {
        self.state.read().await.challenge().cloned()
    }

    pub async fn info(&self) -> SessionInfo {
        let state = self.state.read().await;
        SessionInfo {
            id: self.id.clone(),
            status: state.status(),
            identity: state.identity().cloned(),
            has_challenge: state.challenge().is_some(),
            last_error: state.last_error().map(str::to_string),
        }
    }

    fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn update_state<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let (result, before, after) = {
            let mut state = self.state.write().await;
            let before = state.status();
            let result = f(&mut state);
            (result, before, state.status())
        };

        if before != after {
            info!(session_id = %self.id, from = %before, to = %after, "Session status changed");
            self.emit(SessionEvent::StatusChanged {
                session_id: self.id.clone(),
                status: after,
            });
        }
        result
    }

    async fn fail(&self, error: &SessionError) {
        warn!(session_id = %self.id, error = %error, "Connect failed");
        self.update_state(|state| state.fail(error.to_string())).await;
        self.emit(SessionEvent::Error {
            session_id: self.id.clone(),
            error: error.to_string(),
        });
    }

    /// Starts a handshake. Returns once the transport accepted the session;
    /// pairing and opening are reported later through status changes.
    pub async fn connect(&self) -> Result<()> {
        let _guard = self.connect_lock.lock().await;

        if self.is_retired() {
            return Err(SessionError::NotFound(format!("Session {}", self.id)));
        }
        if self.status().await == SessionStatus::Connected {
            return Ok(());
        }

        self.update_state(SessionState::begin_connect).await;

        if let Err(e) = self.storage.ensure(&self.id).await {
            let e = SessionError::from(e);
            self.fail(&e).await;
            return Err(e);
        }

        self.restore_snapshot_once().await;
        self.start_snapshots().await;

        let credentials = match self.storage.read_credentials(&self.id).await {
            Ok(credentials) => credentials,
            Err(e) => {
                let e = SessionError::from(e);
                self.fail(&e).await;
                return Err(e);
            }
        };
        if credentials.is_none() {
            info!(session_id = %self.id, "No stored credentials, pairing required");
        }

        let (tx, rx) = mpsc::channel(self.settings.channel_capacity);
        let transport = match self.connector.connect(&self.id, credentials, tx).await {
            Ok(transport) => transport,
            Err(e) => {
                let e = SessionError::from(e);
                self.fail(&e).await;
                return Err(e);
            }
        };

        *self.transport.write().await = Some(transport.clone());

        let handle = tokio::spawn(run_event_loop(self.this.clone(), transport, rx));
        if let Some(previous) = self.event_loop.lock().await.replace(handle) {
            previous.abort();
        }

        info!(session_id = %self.id, "Session handshake started");
        Ok(())
    }

    async fn restore_snapshot_once(&self) {
        if self.restored.swap(true, Ordering::SeqCst) {
            return;
        }

        match self.storage.read_snapshot(&self.id).await {
            Ok(Some(bytes)) => {
                let mut store = self.store.write().await;
                match store.restore(&bytes) {
                    Ok(()) => info!(
                        session_id = %self.id,
                        chats = store.chat_count(),
                        contacts = store.contact_count(),
                        "Snapshot restored"
                    ),
                    Err(e) => {
                        warn!(session_id = %self.id, error = %e, "Failed to restore snapshot, starting empty")
                    }
                }
            }
            Ok(None) => debug!(session_id = %self.id, "No snapshot to restore"),
            Err(e) => warn!(session_id = %self.id, error = %e, "Failed to read snapshot, starting empty"),
        }
    }

    async fn start_snapshots(&self) {
        let mut timer = self.snapshots.lock().await;
        if timer.as_ref().is_some_and(SnapshotTimer::is_running) {
            return;
        }

        *timer = Some(SnapshotTimer::spawn(
            self.id.clone(),
            self.store.clone(),
            self.storage.clone(),
            self.settings.snapshot_interval,
        ));
    }

    async fn stop_snapshots(&self) {
        if let Some(timer) = self.snapshots.lock().await.take() {
            timer.stop();
        }
    }

    async fn handle_event(&self, transport: &Arc<dyn Transport>, event: TransportEvent) -> LoopControl {
        match event {
            TransportEvent::ConnectionUpdate(update) => {
                return self.on_connection_update(transport, update).await;
            }

            TransportEvent::CredentialsUpdate { credentials } => {
                if let Err(e) = self.storage.write_credentials(&self.id, &credentials).await {
                    warn!(session_id = %self.id, error = %e, "Failed to persist credentials");
                }
            }

            TransportEvent::ChatsUpsert { chats } => {
                let count = chats.len();
                self.store.write().await.upsert_chats(chats);
                debug!(session_id = %self.id, count, "Chats upserted");
                self.emit(SessionEvent::ChatsSynced {
                    session_id: self.id.clone(),
                    count,
                });
            }

            TransportEvent::ContactsUpsert { contacts } => {
                let count = contacts.len();
                self.store.write().await.upsert_contacts(contacts);
                debug!(session_id = %self.id, count, "Contacts upserted");
                self.emit(SessionEvent::ContactsSynced {
                    session_id: self.id.clone(),
                    count,
                });
            }

            TransportEvent::MessagesUpsert { kind, messages } => {
                let count = messages.len();
                let added: usize = {
                    let mut store = self.store.write().await;
                    group_by_chat(messages)
                        .into_iter()
                        .map(|(chat_id, batch)| store.append_messages(&chat_id, batch))
                        .sum()
                };
                debug!(session_id = %self.id, ?kind, count, added, "Messages upserted");
                self.emit(SessionEvent::MessagesSynced {
                    session_id: self.id.clone(),
                    kind,
                    count,
                });
            }

            TransportEvent::Error { error } => {
                warn!(session_id = %self.id, error = %error, "Transport reported an error");
                self.emit(SessionEvent::Error {
                    session_id: self.id.clone(),
                    error,
                });
            }

            TransportEvent::CommandResult { .. } => {}
        }

        LoopControl::Continue
    }

    async fn on_connection_update(
        &self,
        transport: &Arc<dyn Transport>,
        update: ConnectionUpdate,
    ) -> LoopControl {
        match self.update_state(|state| state.apply(&update)).await {
            Transition::Unchanged => LoopControl::Continue,

            Transition::Challenge(raw) => {
                match qr::render_challenge(&raw) {
                    Some(challenge) => {
                        self.update_state(|state| state.set_challenge(challenge)).await;
                        info!(session_id = %self.id, "Pairing challenge ready");
                        self.emit(SessionEvent::PairingChallenge {
                            session_id: self.id.clone(),
                            qr: raw,
                        });
                    }
                    None => warn!(session_id = %self.id, "Failed to render pairing challenge"),
                }
                LoopControl::Continue
            }

            Transition::Opened => {
                if let Some(me) = transport.identity().await {
                    self.update_state(|state| state.set_identity(Identity::from(me))).await;
                }
                let identity = self.state.read().await.identity().cloned();
                info!(
                    session_id = %self.id,
                    phone = identity.as_ref().and_then(|i| i.phone_number.as_deref()).unwrap_or("-"),
                    "Session connected"
                );
                self.emit(SessionEvent::Connected {
                    session_id: self.id.clone(),
                    phone_number: identity.as_ref().and_then(|i| i.phone_number.clone()),
                    name: identity.and_then(|i| i.name),
                });
                LoopControl::Continue
            }

            Transition::Reconnect(reason) => {
                self.release_transport(transport).await;
                let will_reconnect = !self.is_retired();
                info!(
                    session_id = %self.id,
                    reason = reason.map(|r| r.to_string()).unwrap_or_else(|| "unknown".to_string()),
                    delay_secs = self.settings.reconnect_delay.as_secs(),
                    "Connection closed, reconnecting"
                );
                self.emit(SessionEvent::Disconnected {
                    session_id: self.id.clone(),
                    reason: reason.map(|r| r.to_string()),
                    will_reconnect,
                });
                if will_reconnect {
                    self.schedule_reconnect();
                }
                LoopControl::Stop
            }

            Transition::LoggedOut => {
                warn!(session_id = %self.id, "Session logged out upstream, discarding credentials");
                self.stop_snapshots().await;
                self.release_transport(transport).await;
                if let Err(e) = self.storage.delete(&self.id).await {
                    warn!(session_id = %self.id, error = %e, "Failed to remove session slot");
                }
                self.store.write().await.clear();
                self.emit(SessionEvent::LoggedOut {
                    session_id: self.id.clone(),
                });
                LoopControl::Stop
            }
        }
    }

    /// Drops the current transport if it is still `transport`.
    async fn release_transport(&self, transport: &Arc<dyn Transport>) {
        let mut current = self.transport.write().await;
        if current.as_ref().is_some_and(|t| Arc::ptr_eq(t, transport)) {
            *current = None;
        }
    }

    fn schedule_reconnect(&self) {
        let this = self.this.clone();
        let delay = self.settings.reconnect_delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let Some(session) = this.upgrade() else {
                return;
            };
            if session.is_retired() {
                debug!(session_id = %session.id, "Session deleted, skipping reconnect");
                return;
            }
            if session.status().await != SessionStatus::Disconnected {
                debug!(session_id = %session.id, "Session already reconnected");
                return;
            }

            if let Err(e) = session.connect().await {
                warn!(session_id = %session.id, error = %e, "Reconnect failed");
            }
        });
    }

    /// The transport, provided the session is connected.
    async fn live_transport(&self) -> Result<Arc<dyn Transport>> {
        let connected = self.status().await == SessionStatus::Connected;
        let transport = if connected { self.transport.read().await.clone() } else { None };
        transport.ok_or_else(|| SessionError::NotConnected(self.id.to_string()))
    }

    pub async fn send(&self, to: &str, message: OutgoingMessage) -> Result<SentMessage> {
        let target = jid::to_jid(to)
            .ok_or_else(|| SessionError::Validation(format!("invalid recipient: {:?}", to)))?;
        if let Some(field) = message.missing_field() {
            return Err(SessionError::Validation(format!("{} is required", field)));
        }

        let transport = self.live_transport().await?;
        let sent = transport.send_message(&target, message).await?;
        debug!(session_id = %self.id, to = %target, message_id = %sent.message_id, "Message sent");
        Ok(sent)
    }

    /// Reads, like sends, require an open connection. The cache itself
    /// stays reachable through [`Session::store`].
    pub async fn overview(&self, limit: usize, offset: usize, filter: ChatFilter) -> Result<Page<ChatSummary>> {
        let transport = self.live_transport().await?;
        let mut page = self.store.read().await.overview(limit, offset, filter);
        backfill::fill_pictures(&self.id, transport, &self.store, &mut page.items, &self.settings.backfill).await;
        Ok(page)
    }

    pub async fn contacts(&self, limit: usize, offset: usize, search: &str) -> Result<Page<ContactSummary>> {
        let transport = self.live_transport().await?;
        let mut page = self.store.read().await.contacts(limit, offset, search);
        backfill::fill_pictures(&self.id, transport, &self.store, &mut page.items, &self.settings.backfill).await;
        Ok(page)
    }

    /// A short page also asks the transport for older history; it lands
    /// in the store for later queries.
    pub async fn messages(&self, chat_id: &str, limit: usize, cursor: Option<&str>) -> Result<MessagePage> {
        let transport = self.live_transport().await?;
        let (page, oldest) = {
            let store = self.store.read().await;
            let page = store.messages(chat_id, limit, cursor);
            let oldest = store.oldest_message(chat_id).map(|m| HistoryCursor {
                message_id: m.id.clone(),
                from_me: m.from_me,
                timestamp: m.timestamp,
            });
            (page, oldest)
        };

        if limit > 0 && page.messages.len() < limit {
            let session_id = self.id.clone();
            let chat_id = chat_id.to_string();
            tokio::spawn(async move {
                if let Err(e) = transport.fetch_message_history(&chat_id, limit, oldest).await {
                    debug!(session_id = %session_id, chat_id = %chat_id, error = %e, "History fetch failed");
                }
            });
        }

        Ok(page)
    }

    pub async fn chat_info(&self, chat_id: &str) -> Result<ChatInfo> {
        let transport = self.live_transport().await?;
        let (chat, contact) = {
            let store = self.store.read().await;
            (store.chat(chat_id), store.contact(chat_id).as_ref().map(ContactSummary::from))
        };

        if chat.is_none() && contact.is_none() {
            return Err(SessionError::NotFound(format!("Chat {}", chat_id)));
        }

        let mut group = None;
        if jid::is_group(chat_id) {
            match transport.group_metadata(chat_id).await {
                Ok(metadata) => group = Some(metadata),
                Err(e) => debug!(session_id = %self.id, chat_id, error = %e, "Group metadata unavailable"),
            }
        }

        Ok(ChatInfo { chat, contact, group })
    }

    pub async fn check_number(&self, number: &str) -> Result<RegistrationStatus> {
        let target = jid::to_jid(number)
            .filter(|j| !jid::is_group(j))
            .ok_or_else(|| SessionError::Validation(format!("invalid phone number: {:?}", number)))?;

        let transport = self.live_transport().await?;
        Ok(transport.registration(&target).await?)
    }

    /// Full logout for deletion: no reconnect will follow, the snapshot
    /// timer is stopped, credentials are revoked and the slot is removed.
    pub async fn logout(&self) -> Result<()> {
        self.retired.store(true, Ordering::SeqCst);
        let _guard = self.connect_lock.lock().await;

        self.stop_snapshots().await;
        if let Some(handle) = self.event_loop.lock().await.take() {
            handle.abort();
        }

        if let Some(transport) = self.transport.write().await.take() {
            if let Err(e) = transport.logout().await {
                warn!(session_id = %self.id, error = %e, "Upstream logout failed");
            }
            if let Err(e) = transport.close().await {
                debug!(session_id = %self.id, error = %e, "Transport close failed");
            }
        }

        let removed = self.storage.delete(&self.id).await;
        self.store.write().await.clear();
        self.update_state(|state| state.enter(SessionStatus::Disconnected)).await;
        self.emit(SessionEvent::LoggedOut {
            session_id: self.id.clone(),
        });

        info!(session_id = %self.id, "Session logged out");
        removed?;
        Ok(())
    }

    /// Process exit: final snapshot and transport close. Credentials stay.
    pub async fn shutdown(&self) {
        self.retired.store(true, Ordering::SeqCst);
        let _guard = self.connect_lock.lock().await;

        self.stop_snapshots().await;
        if let Some(handle) = self.event_loop.lock().await.take() {
            handle.abort();
        }

        if self.restored.load(Ordering::SeqCst) {
            flush_snapshot(&self.id, &self.store, self.storage.as_ref()).await;
        }

        if let Some(transport) = self.transport.write().await.take() {
            if let Err(e) = transport.close().await {
                debug!(session_id = %self.id, error = %e, "Transport close failed");
            }
        }

        self.update_state(|state| state.enter(SessionStatus::Disconnected)).await;
    }
}

/// Drains one connection's events, one at a time, until it closes.
async fn run_event_loop(
    session: Weak<Session>,
    transport: Arc<dyn Transport>,
    mut events: mpsc::Receiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(session) = session.upgrade() else {
            break;
        };
        if session.handle_event(&transport, event).await == LoopControl::Stop {
            break;
        }
    }
}

/// Splits a batch per chat, keeping arrival order inside each chat.
fn group_by_chat(messages: Vec<MessageData>) -> Vec<(String, Vec<MessageData>)> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<MessageData>)> = Vec::new();

    for message in messages {
        match index.get(&message.chat_jid) {
            Some(&i) => groups[i].1.push(message),
            None => {
                index.insert(message.chat_jid.clone(), groups.len());
                groups.push((message.chat_jid.clone(), vec![message]));
            }
        }
    }

    groups
}
