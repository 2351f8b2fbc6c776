use std::str::FromStr;

use mikan_core::{ChatData, ContactData, MessageContent, MessageData, jid};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub name: Option<String>,
    pub is_group: bool,
    pub last_message: Option<LastMessagePreview>,
    pub unread_count: u32,
    pub picture_url: Option<String>,
    /// Set once a picture lookup has answered, even if it found none.
    #[serde(default)]
    pub picture_known: bool,
    pub last_activity: i64,
}

impl Chat {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: None,
            is_group: jid::is_group(id),
            last_message: None,
            unread_count: 0,
            picture_url: None,
            picture_known: false,
            last_activity: 0,
        }
    }

    pub(crate) fn merge(&mut self, data: ChatData) {
        if let Some(name) = data.name {
            self.name = Some(name);
        }
        if let Some(unread) = data.unread_count {
            self.unread_count = unread;
        }
        if let Some(ts) = data.conversation_timestamp {
            self.last_activity = self.last_activity.max(ts);
        }
    }

    /// Returns true when the preview moved forward.
    pub(crate) fn observe(&mut self, message: &Message) -> bool {
        if !message.content.updates_preview() {
            return false;
        }

        let newer = self
            .last_message
            .as_ref()
            .is_none_or(|current| message.timestamp >= current.timestamp);

        if newer {
            self.last_message = Some(LastMessagePreview::from(message));
            self.last_activity = self.last_activity.max(message.timestamp);
        }
        newer
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessagePreview {
    pub message_id: String,
    pub kind: String,
    pub text: Option<String>,
    pub sender: Option<String>,
    pub from_me: bool,
    pub timestamp: i64,
}

impl From<&Message> for LastMessagePreview {
    fn from(message: &Message) -> Self {
        Self {
            message_id: message.id.clone(),
            kind: message.content.kind().to_string(),
            text: message.content.preview_text(),
            sender: message.sender.clone(),
            from_me: message.from_me,
            timestamp: message.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub name: Option<String>,
    pub notify: Option<String>,
    pub verified_name: Option<String>,
    pub picture_url: Option<String>,
    #[serde(default)]
    pub picture_known: bool,
}

impl Contact {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: None,
            notify: None,
            verified_name: None,
            picture_url: None,
            picture_known: false,
        }
    }

    pub(crate) fn merge(&mut self, data: ContactData) {
        if let Some(name) = data.name {
            self.name = Some(name);
        }
        if let Some(notify) = data.notify {
            self.notify = Some(notify);
        }
        if let Some(verified) = data.verified_name {
            self.verified_name = Some(verified);
        }
        if let Some(url) = data.img_url {
            self.picture_url = Some(url);
            self.picture_known = true;
        }
    }

    /// Prioridade: name > notify > verified_name
    pub fn display_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .or(self.notify.as_deref())
            .or(self.verified_name.as_deref())
    }

    pub(crate) fn matches(&self, needle_lower: &str) -> bool {
        [self.name.as_deref(), self.notify.as_deref()]
            .into_iter()
            .flatten()
            .any(|field| field.to_lowercase().contains(needle_lower))
    }

    pub(crate) fn sort_key(&self) -> (String, String) {
        let label = self
            .display_name()
            .map(str::to_lowercase)
            .unwrap_or_else(|| "\u{10FFFF}".to_string());
        (label, self.id.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub sender: Option<String>,
    pub push_name: Option<String>,
    pub from_me: bool,
    pub timestamp: i64,
    pub content: MessageContent,
}

impl From<MessageData> for Message {
    fn from(data: MessageData) -> Self {
        Self {
            id: data.id,
            chat_id: data.chat_jid,
            sender: data.sender_jid,
            push_name: data.push_name,
            from_me: data.from_me,
            timestamp: data.timestamp,
            content: data.content,
        }
    }
}

impl Message {
    /// Applies a re-delivered copy of this message. Sender fields the
    /// update leaves out keep their stored values.
    pub fn merge(&mut self, update: Message) {
        if update.sender.is_some() {
            self.sender = update.sender;
        }
        if update.push_name.is_some() {
            self.push_name = update.push_name;
        }
        self.from_me = update.from_me;
        self.timestamp = update.timestamp;
        self.content = update.content;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatFilter {
    #[default]
    All,
    Personal,
    Group,
}

impl FromStr for ChatFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "all" => Ok(ChatFilter::All),
            "personal" => Ok(ChatFilter::Personal),
            "group" => Ok(ChatFilter::Group),
            other => Err(format!("unknown chat type filter: {}", other)),
        }
    }
}

/// A chat as returned by `overview`, with its display name resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub id: String,
    pub name: String,
    pub is_group: bool,
    pub last_message: Option<LastMessagePreview>,
    pub unread_count: u32,
    pub picture_url: Option<String>,
    #[serde(skip)]
    pub picture_known: bool,
    pub last_activity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactSummary {
    pub id: String,
    pub name: Option<String>,
    pub notify: Option<String>,
    pub phone_number: Option<String>,
    pub picture_url: Option<String>,
    #[serde(skip)]
    pub picture_known: bool,
}

impl From<&Contact> for ContactSummary {
    fn from(contact: &Contact) -> Self {
        Self {
            id: contact.id.clone(),
            name: contact.name.clone(),
            notify: contact.notify.clone(),
            phone_number: jid::phone_number(&contact.id),
            picture_url: contact.picture_url.clone(),
            picture_known: contact.picture_known,
        }
    }
}

/// Records that carry a lazily fetched profile picture.
pub trait PictureSlot {
    fn jid(&self) -> &str;
    fn picture_known(&self) -> bool;
    fn set_picture(&mut self, url: Option<String>);
}

impl PictureSlot for ChatSummary {
    fn jid(&self) -> &str {
        &self.id
    }

    fn picture_known(&self) -> bool {
        self.picture_known
    }

    fn set_picture(&mut self, url: Option<String>) {
        self.picture_url = url;
        self.picture_known = true;
    }
}

impl PictureSlot for ContactSummary {
    fn jid(&self) -> &str {
        &self.id
    }

    fn picture_known(&self) -> bool {
        self.picture_known
    }

    fn set_picture(&mut self, url: Option<String>) {
        self.picture_url = url;
        self.picture_known = true;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePage {
    /// Newest first.
    pub messages: Vec<Message>,
    pub next_cursor: Option<String>,
    /// True iff the page is full; a full last page still reports true.
    pub has_more: bool,
}
