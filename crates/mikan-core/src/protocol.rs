use serde::{Deserialize, Serialize};

use crate::events::{TransportCommand, TransportEvent};

/// One line on the bridge pipe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcMessage {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(flatten)]
    pub content: IpcMessageContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IpcMessageContent {
    Command(TransportCommand),
    Event(TransportEvent),
}

impl IpcMessage {
    pub fn new_command(session_id: Option<&str>, command: TransportCommand) -> Self {
        Self {
            id: generate_id(),
            session_id: session_id.map(str::to_string),
            content: IpcMessageContent::Command(command),
        }
    }

    pub fn new_event(session_id: Option<&str>, event: TransportEvent) -> Self {
        Self {
            id: generate_id(),
            session_id: session_id.map(str::to_string),
            content: IpcMessageContent::Event(event),
        }
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_default() + "\n"
    }

    pub fn from_line(line: &str) -> Option<Self> {
        serde_json::from_str(line.trim()).ok()
    }
}

fn generate_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    static SEQ: AtomicU64 = AtomicU64::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("{:x}-{:x}", nanos, SEQ.fetch_add(1, Ordering::Relaxed))
}
