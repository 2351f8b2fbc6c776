use serde::{Deserialize, Serialize};

use crate::content::{MessageContent, OutgoingMessage};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum TransportCommand {
    StartSession { credentials: Option<String> },
    StopSession,
    Logout,
    SendMessage { to: String, message: OutgoingMessage },
    FetchProfilePicture { jid: String },
    FetchGroupMetadata { jid: String },
    FetchRegistration { jid: String },
    FetchMessageHistory { chat_jid: String, limit: usize, cursor: Option<HistoryCursor> },
    Shutdown,
}

impl TransportCommand {
    pub fn name(&self) -> &'static str {
        match self {
            TransportCommand::StartSession { .. } => "StartSession",
            TransportCommand::StopSession => "StopSession",
            TransportCommand::Logout => "Logout",
            TransportCommand::SendMessage { .. } => "SendMessage",
            TransportCommand::FetchProfilePicture { .. } => "FetchProfilePicture",
            TransportCommand::FetchGroupMetadata { .. } => "FetchGroupMetadata",
            TransportCommand::FetchRegistration { .. } => "FetchRegistration",
            TransportCommand::FetchMessageHistory { .. } => "FetchMessageHistory",
            TransportCommand::Shutdown => "Shutdown",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum TransportEvent {
    ConnectionUpdate(ConnectionUpdate),

    CredentialsUpdate { credentials: String },

    ChatsUpsert { chats: Vec<ChatData> },
    ContactsUpsert { contacts: Vec<ContactData> },
    MessagesUpsert { kind: UpsertKind, messages: Vec<MessageData> },

    Error { error: String },

    CommandResult { command_id: String, success: bool, data: Option<serde_json::Value>, error: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Open,
    Close,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionUpdate {
    #[serde(default)]
    pub connection: Option<ConnectionState>,
    #[serde(default)]
    pub qr: Option<String>,
    #[serde(default)]
    pub disconnect: Option<DisconnectReason>,
    /// Account the connection authenticated as; only sent with `Open`.
    #[serde(default)]
    pub me: Option<AccountIdentity>,
}

/// Close reason as reported by the upstream protocol library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum DisconnectReason {
    LoggedOut,
    Forbidden,
    TimedOut,
    MultideviceMismatch,
    ConnectionClosed,
    ConnectionReplaced,
    BadSession,
    Unavailable,
    RestartRequired,
    Other(u16),
}

impl DisconnectReason {
    /// Credentials were revoked; the session cannot come back without pairing again.
    pub fn is_logged_out(self) -> bool {
        matches!(self, DisconnectReason::LoggedOut)
    }

    pub fn code(self) -> u16 {
        self.into()
    }
}

impl From<u16> for DisconnectReason {
    fn from(code: u16) -> Self {
        match code {
            401 => DisconnectReason::LoggedOut,
            403 => DisconnectReason::Forbidden,
            408 => DisconnectReason::TimedOut,
            411 => DisconnectReason::MultideviceMismatch,
            428 => DisconnectReason::ConnectionClosed,
            440 => DisconnectReason::ConnectionReplaced,
            500 => DisconnectReason::BadSession,
            503 => DisconnectReason::Unavailable,
            515 => DisconnectReason::RestartRequired,
            other => DisconnectReason::Other(other),
        }
    }
}

impl From<DisconnectReason> for u16 {
    fn from(reason: DisconnectReason) -> Self {
        match reason {
            DisconnectReason::LoggedOut => 401,
            DisconnectReason::Forbidden => 403,
            DisconnectReason::TimedOut => 408,
            DisconnectReason::MultideviceMismatch => 411,
            DisconnectReason::ConnectionClosed => 428,
            DisconnectReason::ConnectionReplaced => 440,
            DisconnectReason::BadSession => 500,
            DisconnectReason::Unavailable => 503,
            DisconnectReason::RestartRequired => 515,
            DisconnectReason::Other(code) => code,
        }
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::Other(code) => write!(f, "closed ({})", code),
            reason => write!(f, "{:?} ({})", reason, reason.code()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountIdentity {
    pub jid: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertKind {
    /// Live messages delivered while connected.
    Notify,
    /// Initial sync or on-demand history.
    History,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatData {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub unread_count: Option<u32>,
    #[serde(default)]
    pub conversation_timestamp: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContactData {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub notify: Option<String>,
    #[serde(default)]
    pub verified_name: Option<String>,
    #[serde(default)]
    pub img_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageData {
    pub id: String,
    pub chat_jid: String,
    #[serde(default)]
    pub sender_jid: Option<String>,
    #[serde(default)]
    pub push_name: Option<String>,
    pub from_me: bool,
    pub timestamp: i64,
    pub content: MessageContent,
}

/// Position in a chat from which older history is requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryCursor {
    pub message_id: String,
    pub from_me: bool,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessage {
    pub message_id: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMetadata {
    pub id: String,
    pub subject: Option<String>,
    pub owner: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub creation: Option<i64>,
    #[serde(default)]
    pub participants: Vec<ParticipantData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantData {
    pub id: String,
    pub admin: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationStatus {
    pub jid: String,
    pub exists: bool,
}
