use std::sync::Arc;

use async_trait::async_trait;
use mikan_core::{
    AccountIdentity, GroupMetadata, HistoryCursor, OutgoingMessage, RegistrationStatus,
    SentMessage, SessionId, TransportEvent,
};
use tokio::sync::mpsc;

use crate::error::Result;

/// A live connection for one session. Inbound traffic arrives on the
/// channel handed to [`TransportConnector::connect`]; this side carries
/// outbound commands.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_message(&self, to: &str, message: OutgoingMessage) -> Result<SentMessage>;

    /// `None` when the account has no picture or hides it.
    async fn profile_picture_url(&self, jid: &str) -> Result<Option<String>>;

    async fn group_metadata(&self, jid: &str) -> Result<GroupMetadata>;

    async fn registration(&self, jid: &str) -> Result<RegistrationStatus>;

    /// Asks for messages older than `cursor`. Results are delivered later
    /// as a history `MessagesUpsert`.
    async fn fetch_message_history(
        &self,
        chat_jid: &str,
        limit: usize,
        cursor: Option<HistoryCursor>,
    ) -> Result<()>;

    /// Revokes the credentials upstream.
    async fn logout(&self) -> Result<()>;

    /// Tears down the connection without touching credentials.
    async fn close(&self) -> Result<()>;

    /// Account this connection authenticated as, once open.
    async fn identity(&self) -> Option<AccountIdentity>;
}

#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Starts the handshake for `session_id`. `credentials` is whatever the
    /// transport last emitted through `CredentialsUpdate`; `None` starts a
    /// fresh pairing.
    async fn connect(
        &self,
        session_id: &SessionId,
        credentials: Option<String>,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Arc<dyn Transport>>;
}
