use serde::{Deserialize, Serialize};

/// Longest preview text kept for a chat's last message, in characters.
pub const PREVIEW_MAX_CHARS: usize = 100;

/// Content of a stored message. One case per content kind; each carries
/// only the fields that kind needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text {
        text: String,
    },
    Image {
        #[serde(default)]
        caption: Option<String>,
        #[serde(default)]
        mimetype: Option<String>,
        #[serde(default)]
        url: Option<String>,
    },
    Video {
        #[serde(default)]
        caption: Option<String>,
        #[serde(default)]
        mimetype: Option<String>,
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        seconds: Option<u32>,
    },
    Audio {
        #[serde(default)]
        mimetype: Option<String>,
        #[serde(default)]
        seconds: Option<u32>,
        #[serde(default)]
        ptt: bool,
    },
    Document {
        #[serde(default)]
        file_name: Option<String>,
        #[serde(default)]
        mimetype: Option<String>,
        #[serde(default)]
        caption: Option<String>,
    },
    Sticker {
        #[serde(default)]
        animated: bool,
    },
    Location {
        latitude: f64,
        longitude: f64,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        address: Option<String>,
    },
    Contact {
        #[serde(default)]
        display_name: Option<String>,
        vcard: String,
    },
    Contacts {
        #[serde(default)]
        display_name: Option<String>,
        contacts: Vec<ContactCard>,
    },
    Reaction {
        target_id: String,
        /// Empty when the reaction was removed.
        emoji: String,
    },
    Protocol {
        action: String,
        #[serde(default)]
        target_id: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactCard {
    #[serde(default)]
    pub display_name: Option<String>,
    pub vcard: String,
}

impl MessageContent {
    pub fn kind(&self) -> &'static str {
        match self {
            MessageContent::Text { .. } => "text",
            MessageContent::Image { .. } => "image",
            MessageContent::Video { .. } => "video",
            MessageContent::Audio { .. } => "audio",
            MessageContent::Document { .. } => "document",
            MessageContent::Sticker { .. } => "sticker",
            MessageContent::Location { .. } => "location",
            MessageContent::Contact { .. } => "contact",
            MessageContent::Contacts { .. } => "contacts",
            MessageContent::Reaction { .. } => "reaction",
            MessageContent::Protocol { .. } => "protocol",
            MessageContent::Unknown => "unknown",
        }
    }

    /// Protocol messages (revokes, key shares, ...) are bookkeeping and
    /// never become a chat's last message.
    pub fn updates_preview(&self) -> bool {
        !matches!(self, MessageContent::Protocol { .. })
    }

    /// Short human readable text, truncated to [`PREVIEW_MAX_CHARS`].
    pub fn preview_text(&self) -> Option<String> {
        let text = match self {
            MessageContent::Text { text } => Some(text.as_str()),
            MessageContent::Image { caption, .. } | MessageContent::Video { caption, .. } => {
                caption.as_deref()
            }
            MessageContent::Document {
                file_name, caption, ..
            } => caption.as_deref().or(file_name.as_deref()),
            MessageContent::Location { name, address, .. } => name.as_deref().or(address.as_deref()),
            MessageContent::Contact { display_name, .. }
            | MessageContent::Contacts { display_name, .. } => display_name.as_deref(),
            MessageContent::Reaction { emoji, .. } if !emoji.is_empty() => Some(emoji.as_str()),
            _ => None,
        }?;

        Some(truncate_chars(text, PREVIEW_MAX_CHARS))
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

/// Outbound message payload accepted by `send`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutgoingMessage {
    Text {
        text: String,
    },
    Image {
        url: String,
        #[serde(default)]
        caption: Option<String>,
        #[serde(default)]
        mimetype: Option<String>,
    },
    Video {
        url: String,
        #[serde(default)]
        caption: Option<String>,
        #[serde(default)]
        mimetype: Option<String>,
    },
    Audio {
        url: String,
        #[serde(default)]
        ptt: bool,
        #[serde(default)]
        mimetype: Option<String>,
    },
    Document {
        url: String,
        file_name: String,
        #[serde(default)]
        mimetype: Option<String>,
        #[serde(default)]
        caption: Option<String>,
    },
    Sticker {
        url: String,
    },
    Location {
        latitude: f64,
        longitude: f64,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        address: Option<String>,
    },
    Contact {
        display_name: String,
        vcard: String,
    },
    Reaction {
        target_id: String,
        emoji: String,
    },
}

impl OutgoingMessage {
    /// Returns the name of the first required field that is blank.
    pub fn missing_field(&self) -> Option<&'static str> {
        match self {
            OutgoingMessage::Text { text } if text.trim().is_empty() => Some("text"),
            OutgoingMessage::Image { url, .. }
            | OutgoingMessage::Video { url, .. }
            | OutgoingMessage::Audio { url, .. }
            | OutgoingMessage::Sticker { url } if url.trim().is_empty() => Some("url"),
            OutgoingMessage::Document { url, .. } if url.trim().is_empty() => Some("url"),
            OutgoingMessage::Document { file_name, .. } if file_name.trim().is_empty() => {
                Some("file_name")
            }
            OutgoingMessage::Contact { vcard, .. } if vcard.trim().is_empty() => Some("vcard"),
            OutgoingMessage::Reaction { target_id, .. } if target_id.is_empty() => Some("target_id"),
            _ => None,
        }
    }
}
