use std::sync::Arc;

use async_trait::async_trait;
use mikan_core::{
    AccountIdentity, GroupMetadata, HistoryCursor, OutgoingMessage, RegistrationStatus,
    SentMessage, SessionId, TransportCommand, TransportEvent,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::bridge::{Bridge, IdentitySlot};
use crate::error::{Result, TransportError};
use crate::transport::{Transport, TransportConnector};

/// Opens sessions on a shared [`Bridge`], starting the process on demand.
pub struct BridgeConnector {
    bridge: Arc<Bridge>,
}

impl BridgeConnector {
    pub fn new(bridge: Arc<Bridge>) -> Self {
        Self { bridge }
    }

    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }
}

#[async_trait]
impl TransportConnector for BridgeConnector {
    async fn connect(
        &self,
        session_id: &SessionId,
        credentials: Option<String>,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Arc<dyn Transport>> {
        self.bridge.start().await?;

        let (generation, identity) = self.bridge.register(session_id, events).await;

        if let Err(e) = self
            .bridge
            .request(Some(session_id), TransportCommand::StartSession { credentials })
            .await
        {
            self.bridge.unregister(session_id, generation).await;
            return Err(e);
        }

        tracing::debug!(session_id = %session_id, generation, "Bridge session started");

        Ok(Arc::new(BridgeSession {
            session_id: session_id.clone(),
            generation,
            identity,
            bridge: self.bridge.clone(),
        }))
    }
}

struct BridgeSession {
    session_id: SessionId,
    generation: u64,
    identity: IdentitySlot,
    bridge: Arc<Bridge>,
}

impl BridgeSession {
    async fn call(&self, command: TransportCommand) -> Result<Option<Value>> {
        self.bridge.request(Some(&self.session_id), command).await
    }
}

fn decode<T: DeserializeOwned>(command: &'static str, data: Option<Value>) -> Result<T> {
    let value = data.ok_or(TransportError::UnexpectedReply(command))?;
    Ok(serde_json::from_value(value)?)
}

#[async_trait]
impl Transport for BridgeSession {
    async fn send_message(&self, to: &str, message: OutgoingMessage) -> Result<SentMessage> {
        let data = self
            .call(TransportCommand::SendMessage {
                to: to.to_string(),
                message,
            })
            .await?;
        decode("SendMessage", data)
    }

    async fn profile_picture_url(&self, jid: &str) -> Result<Option<String>> {
        let data = self
            .call(TransportCommand::FetchProfilePicture { jid: jid.to_string() })
            .await?;
        Ok(serde_json::from_value(data.unwrap_or(Value::Null))?)
    }

    async fn group_metadata(&self, jid: &str) -> Result<GroupMetadata> {
        let data = self
            .call(TransportCommand::FetchGroupMetadata { jid: jid.to_string() })
            .await?;
        decode("FetchGroupMetadata", data)
    }

    async fn registration(&self, jid: &str) -> Result<RegistrationStatus> {
        let data = self
            .call(TransportCommand::FetchRegistration { jid: jid.to_string() })
            .await?;
        decode("FetchRegistration", data)
    }

    async fn fetch_message_history(
        &self,
        chat_jid: &str,
        limit: usize,
        cursor: Option<HistoryCursor>,
    ) -> Result<()> {
        self.call(TransportCommand::FetchMessageHistory {
            chat_jid: chat_jid.to_string(),
            limit,
            cursor,
        })
        .await?;
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        self.call(TransportCommand::Logout).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let sent = self
            .bridge
            .send(Some(&self.session_id), TransportCommand::StopSession)
            .await;
        self.bridge.unregister(&self.session_id, self.generation).await;

        match sent {
            Err(TransportError::ProcessNotRunning) => Ok(()),
            other => other,
        }
    }

    async fn identity(&self) -> Option<AccountIdentity> {
        self.identity.read().await.clone()
    }
}
