use mikan_core::{SessionId, UpsertKind};
use serde::Serialize;

use crate::state::SessionStatus;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    StatusChanged { session_id: SessionId, status: SessionStatus },
    PairingChallenge { session_id: SessionId, qr: String },
    Connected { session_id: SessionId, phone_number: Option<String>, name: Option<String> },
    Disconnected { session_id: SessionId, reason: Option<String>, will_reconnect: bool },
    LoggedOut { session_id: SessionId },
    ChatsSynced { session_id: SessionId, count: usize },
    ContactsSynced { session_id: SessionId, count: usize },
    MessagesSynced { session_id: SessionId, kind: UpsertKind, count: usize },
    Error { session_id: SessionId, error: String },
}

impl SessionEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            SessionEvent::StatusChanged { session_id, .. }
            | SessionEvent::PairingChallenge { session_id, .. }
            | SessionEvent::Connected { session_id, .. }
            | SessionEvent::Disconnected { session_id, .. }
            | SessionEvent::LoggedOut { session_id }
            | SessionEvent::ChatsSynced { session_id, .. }
            | SessionEvent::ContactsSynced { session_id, .. }
            | SessionEvent::MessagesSynced { session_id, .. }
            | SessionEvent::Error { session_id, .. } => session_id,
        }
    }
}
