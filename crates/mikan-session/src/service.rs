use std::sync::Arc;

use mikan_core::{OutgoingMessage, RegistrationStatus, SentMessage};
use mikan_store::{ChatFilter, ChatSummary, ContactSummary, MessagePage, Page};
use serde::Serialize;

use crate::error::{ErrorKind, Result, SessionError};
use crate::registry::SessionRegistry;
use crate::session::{ChatInfo, Session, SessionInfo};
use crate::state::PairingChallenge;

/// Uniform result shape handed to front ends.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
}

impl<T> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            error: None,
        }
    }

    pub fn fail(error: &SessionError) -> Self {
        Self {
            success: false,
            message: error.to_string(),
            data: None,
            error: Some(error.kind()),
        }
    }

    fn from_result(result: Result<T>, message: impl FnOnce(&T) -> String) -> Self {
        match result {
            Ok(data) => Self::ok(message(&data), data),
            Err(e) => {
                tracing::debug!(error = %e, kind = ?e.kind(), "Request failed");
                Self::fail(&e)
            }
        }
    }
}

pub struct SessionService {
    registry: Arc<SessionRegistry>,
}

impl SessionService {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    async fn session(&self, id: &str) -> Result<Arc<Session>> {
        self.registry
            .get(id)
            .await
            .ok_or_else(|| SessionError::NotFound(format!("Session {}", id)))
    }

    pub async fn create_or_reconnect(&self, id: &str) -> ApiResponse<SessionInfo> {
        let result = match self.registry.create(id).await {
            Ok(session) => Ok(session.info().await),
            Err(e) => Err(e),
        };
        ApiResponse::from_result(result, |info| {
            format!("Session {} is {}", info.id, info.status)
        })
    }

    pub async fn get_status(&self, id: &str) -> ApiResponse<SessionInfo> {
        let result = match self.session(id).await {
            Ok(session) => Ok(session.info().await),
            Err(e) => Err(e),
        };
        ApiResponse::from_result(result, |info| info.status.to_string())
    }

    pub async fn list_sessions(&self) -> ApiResponse<Vec<SessionInfo>> {
        let mut infos = Vec::new();
        for session in self.registry.get_all().await {
            infos.push(session.info().await);
        }
        ApiResponse::ok(format!("{} session(s)", infos.len()), infos)
    }

    pub async fn get_pairing_challenge(&self, id: &str) -> ApiResponse<PairingChallenge> {
        let result: Result<_> = async {
            let session = self.session(id).await?;
            session
                .challenge()
                .await
                .ok_or_else(|| SessionError::NotFound(format!("Pairing challenge for {}", id)))
        }
        .await;
        ApiResponse::from_result(result, |_| "Scan the code to pair".to_string())
    }

    pub async fn delete_session(&self, id: &str) -> ApiResponse<()> {
        let result = self.registry.delete(id).await;
        ApiResponse::from_result(result, |_| format!("Session {} deleted", id))
    }

    pub async fn send(&self, id: &str, to: &str, message: OutgoingMessage) -> ApiResponse<SentMessage> {
        let result: Result<_> = async { self.session(id).await?.send(to, message).await }.await;
        ApiResponse::from_result(result, |sent| format!("Message {} sent", sent.message_id))
    }

    pub async fn overview(
        &self,
        id: &str,
        limit: usize,
        offset: usize,
        filter: &str,
    ) -> ApiResponse<Page<ChatSummary>> {
        let result: Result<_> = async {
            let filter: ChatFilter = filter
                .parse()
                .map_err(|_| SessionError::Validation(format!("unknown chat filter: {:?}", filter)))?;
            let session = self.session(id).await?;
            session.overview(limit, offset, filter).await
        }
        .await;
        ApiResponse::from_result(result, |page| format!("{} of {} chat(s)", page.items.len(), page.total))
    }

    pub async fn contacts(
        &self,
        id: &str,
        limit: usize,
        offset: usize,
        search: &str,
    ) -> ApiResponse<Page<ContactSummary>> {
        let result: Result<_> = async { self.session(id).await?.contacts(limit, offset, search).await }.await;
        ApiResponse::from_result(result, |page| {
            format!("{} of {} contact(s)", page.items.len(), page.total)
        })
    }

    pub async fn messages(
        &self,
        id: &str,
        chat_id: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> ApiResponse<MessagePage> {
        let result: Result<_> = async { self.session(id).await?.messages(chat_id, limit, cursor).await }.await;
        ApiResponse::from_result(result, |page| format!("{} message(s)", page.messages.len()))
    }

    pub async fn chat_info(&self, id: &str, chat_id: &str) -> ApiResponse<ChatInfo> {
        let result: Result<_> = async { self.session(id).await?.chat_info(chat_id).await }.await;
        ApiResponse::from_result(result, |_| format!("Chat {}", chat_id))
    }

    pub async fn check_number(&self, id: &str, number: &str) -> ApiResponse<RegistrationStatus> {
        let result: Result<_> = async { self.session(id).await?.check_number(number).await }.await;
        ApiResponse::from_result(result, |status| {
            if status.exists {
                format!("{} is registered", status.jid)
            } else {
                format!("{} is not registered", status.jid)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionSettings;
    use crate::fake::{FakeConnector, settle};
    use mikan_core::{ChatData, ConnectionUpdate, TransportEvent};
    use mikan_store::{FsSessionStorage, SessionStorage};
    use tempfile::{TempDir, tempdir};

    async fn service() -> (TempDir, Arc<FakeConnector>, SessionService) {
        let temp = tempdir().unwrap();
        let storage: Arc<dyn SessionStorage> =
            Arc::new(FsSessionStorage::new(temp.path()).await.unwrap());
        let connector = FakeConnector::new();
        let registry = SessionRegistry::new(connector.clone(), storage, SessionSettings::default());
        (temp, connector, SessionService::new(Arc::new(registry)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_then_pair() {
        let (_temp, connector, service) = service().await;

        let created = service.create_or_reconnect("s1").await;
        assert!(created.success, "{}", created.message);
        assert_eq!(created.data.unwrap().status.as_str(), "connecting");

        let none = service.get_pairing_challenge("s1").await;
        assert!(!none.success);
        assert_eq!(none.error, Some(ErrorKind::NotFound));

        connector
            .emit(
                "s1",
                TransportEvent::ConnectionUpdate(ConnectionUpdate {
                    qr: Some("2@pairing-ref".into()),
                    ..Default::default()
                }),
            )
            .await;
        settle().await;

        let challenge = service.get_pairing_challenge("s1").await.data.unwrap();
        assert_eq!(challenge.raw, "2@pairing-ref");
        assert!(challenge.data_url.starts_with("data:image/svg+xml;base64,"));
        assert_eq!(service.get_status("s1").await.data.unwrap().status.as_str(), "qr_ready");

        connector.open("s1").await;
        settle().await;
        let again = service.create_or_reconnect("s1").await;
        assert_eq!(again.error, Some(ErrorKind::Conflict));
    }

    #[tokio::test]
    async fn test_unknown_session_and_bad_input() {
        let (_temp, _connector, service) = service().await;

        assert_eq!(service.get_status("nobody").await.error, Some(ErrorKind::NotFound));
        assert_eq!(service.delete_session("nobody").await.error, Some(ErrorKind::NotFound));
        assert_eq!(
            service.create_or_reconnect("no/slashes").await.error,
            Some(ErrorKind::Validation)
        );

        service.create_or_reconnect("s1").await;
        let bad_filter = service.overview("s1", 10, 0, "archived").await;
        assert_eq!(bad_filter.error, Some(ErrorKind::Validation));
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let (_temp, _connector, service) = service().await;
        service.create_or_reconnect("s1").await;

        let response = service
            .send("s1", "+62 811-1234", OutgoingMessage::Text { text: "hi".into() })
            .await;
        assert!(!response.success);
        assert_eq!(response.error, Some(ErrorKind::NotConnected));
        assert!(response.data.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overview_serializes_uniformly() {
        let (_temp, connector, service) = service().await;
        service.create_or_reconnect("s1").await;
        connector.open("s1").await;
        connector
            .emit(
                "s1",
                TransportEvent::ChatsUpsert {
                    chats: vec![ChatData {
                        id: "62811@s.whatsapp.net".into(),
                        name: Some("Rin".into()),
                        conversation_timestamp: Some(10),
                        ..Default::default()
                    }],
                },
            )
            .await;
        settle().await;

        let response = service.overview("s1", 10, 0, "personal").await;
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["total"], 1);
        assert_eq!(json["data"]["items"][0]["name"], "Rin");
        assert!(json.get("error").is_none());

        let failed = serde_json::to_value(service.get_status("ghost").await).unwrap();
        assert_eq!(failed["success"], false);
        assert_eq!(failed["error"], "not_found");
        assert!(failed.get("data").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reads_rejected_until_connected() {
        let (_temp, connector, service) = service().await;
        service.create_or_reconnect("s1").await;

        assert_eq!(service.overview("s1", 10, 0, "all").await.error, Some(ErrorKind::NotConnected));
        assert_eq!(service.contacts("s1", 10, 0, "").await.error, Some(ErrorKind::NotConnected));
        assert_eq!(
            service.messages("s1", "62811@s.whatsapp.net", 10, None).await.error,
            Some(ErrorKind::NotConnected)
        );
        assert_eq!(
            service.chat_info("s1", "62811@s.whatsapp.net").await.error,
            Some(ErrorKind::NotConnected)
        );

        connector.open("s1").await;
        settle().await;
        let overview = service.overview("s1", 10, 0, "all").await;
        assert!(overview.success, "{}", overview.message);
        assert_eq!(overview.data.unwrap().total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_sessions_sorted() {
        let (_temp, _connector, service) = service().await;
        for id in ["b", "a", "c"] {
            service.create_or_reconnect(id).await;
        }

        let ids: Vec<String> = service
            .list_sessions()
            .await
            .data
            .unwrap()
            .into_iter()
            .map(|info| info.id.to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
