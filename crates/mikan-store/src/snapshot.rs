use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::models::{Chat, Contact, Message};

pub const SNAPSHOT_VERSION: u32 = 1;

/// Persisted form of a [`ConversationStore`](crate::ConversationStore).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub saved_at: i64,
    pub chats: Vec<Chat>,
    pub contacts: Vec<Contact>,
    pub messages: Vec<ChatHistory>,
}

/// One chat's messages in stored order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatHistory {
    pub chat_id: String,
    pub messages: Vec<Message>,
}

impl Snapshot {
    pub fn new(chats: Vec<Chat>, contacts: Vec<Contact>, messages: Vec<ChatHistory>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: chrono::Utc::now().timestamp(),
            chats,
            contacts,
            messages,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let snapshot: Snapshot = serde_json::from_slice(bytes)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StoreError::UnsupportedSnapshot(snapshot.version));
        }
        Ok(snapshot)
    }
}
