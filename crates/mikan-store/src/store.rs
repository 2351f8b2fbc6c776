use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use mikan_core::{ChatData, ContactData, MessageData, jid};
use tokio::sync::RwLock;

use crate::error::Result;
use crate::models::{
    Chat, ChatFilter, ChatSummary, Contact, ContactSummary, Message, MessagePage, Page,
};
use crate::snapshot::{ChatHistory, Snapshot};

pub type SharedStore = Arc<RwLock<ConversationStore>>;

type ActivityKey = (Reverse<i64>, String);

/// In-memory cache of one session's chats, contacts and messages.
///
/// Every index is maintained on write so that reads cost the page size
/// plus a lookup, never a scan of the whole cache.
#[derive(Debug, Default)]
pub struct ConversationStore {
    chats: HashMap<String, Chat>,
    all_by_activity: BTreeSet<ActivityKey>,
    groups_by_activity: BTreeSet<ActivityKey>,
    personal_by_activity: BTreeSet<ActivityKey>,
    contacts: HashMap<String, Contact>,
    contacts_by_name: BTreeSet<(String, String)>,
    messages: HashMap<String, ChatLog>,
}

#[derive(Debug, Default)]
struct ChatLog {
    messages: Vec<Message>,
    positions: HashMap<String, usize>,
}

impl ChatLog {
    /// Rebuilds a log in the order given; a repeated id replaces the
    /// earlier copy in place.
    fn from_messages(messages: Vec<Message>) -> Self {
        let mut log = Self::default();
        for message in messages {
            match log.positions.get(&message.id) {
                Some(&idx) => log.messages[idx] = message,
                None => {
                    log.positions.insert(message.id.clone(), log.messages.len());
                    log.messages.push(message);
                }
            }
        }
        log
    }

    fn get(&self, id: &str) -> Option<&Message> {
        self.positions.get(id).map(|&idx| &self.messages[idx])
    }

    /// Returns true when the message was not present before. A known
    /// message is merged and moves only if its timestamp changed.
    fn upsert(&mut self, message: Message) -> bool {
        let Some(&idx) = self.positions.get(&message.id) else {
            self.insert(message);
            return true;
        };

        let before = self.messages[idx].timestamp;
        self.messages[idx].merge(message);
        if self.messages[idx].timestamp != before {
            let moved = self.remove_at(idx);
            self.insert(moved);
        }
        false
    }

    /// New messages go to the tail unless they are older than it, as
    /// history backfill is; those are slotted in by timestamp.
    fn insert(&mut self, message: Message) {
        let at = match self.messages.last() {
            Some(tail) if message.timestamp < tail.timestamp => self
                .messages
                .partition_point(|m| m.timestamp <= message.timestamp),
            _ => self.messages.len(),
        };

        self.messages.insert(at, message);
        self.reindex_from(at);
    }

    fn remove_at(&mut self, idx: usize) -> Message {
        let message = self.messages.remove(idx);
        self.positions.remove(&message.id);
        self.reindex_from(idx);
        message
    }

    fn reindex_from(&mut self, start: usize) {
        for (idx, message) in self.messages.iter().enumerate().skip(start) {
            self.positions.insert(message.id.clone(), idx);
        }
    }
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedStore {
        Arc::new(RwLock::new(Self::new()))
    }

    pub fn chat_count(&self) -> usize {
        self.chats.len()
    }

    pub fn contact_count(&self) -> usize {
        self.contacts.len()
    }

    pub fn message_count(&self, chat_id: &str) -> usize {
        self.messages.get(chat_id).map_or(0, |log| log.messages.len())
    }

    pub fn is_empty(&self) -> bool {
        self.chats.is_empty() && self.contacts.is_empty() && self.messages.is_empty()
    }

    pub fn upsert_chats(&mut self, batch: Vec<ChatData>) {
        for data in batch {
            let id = data.id.clone();
            self.update_chat(&id, |chat| chat.merge(data));
        }
    }

    pub fn upsert_contacts(&mut self, batch: Vec<ContactData>) {
        for data in batch {
            let contact = self
                .contacts
                .entry(data.id.clone())
                .or_insert_with(|| Contact::new(&data.id));

            let old_key = contact.sort_key();
            contact.merge(data);
            let new_key = contact.sort_key();

            self.contacts_by_name.remove(&old_key);
            self.contacts_by_name.insert(new_key);
        }
    }

    /// Appends in the order given. A message already cached for this chat
    /// is merged into the stored copy: fields the update leaves out are
    /// kept. Messages stay ordered by timestamp, so one older than the
    /// newest cached message is slotted in behind it.
    ///
    /// Returns how many messages were new.
    pub fn append_messages(&mut self, chat_id: &str, batch: Vec<MessageData>) -> usize {
        let mut inserted = 0;

        for data in batch {
            let mut message = Message::from(data);
            message.chat_id = chat_id.to_string();
            let id = message.id.clone();

            let log = self.messages.entry(chat_id.to_string()).or_default();
            if log.upsert(message) {
                inserted += 1;
            }
            let stored = log.get(&id).cloned();

            self.update_chat(chat_id, |chat| {
                if let Some(stored) = &stored {
                    chat.observe(stored);
                }
            });
        }

        inserted
    }

    /// Returns false when neither a chat nor a contact holds `id`.
    pub fn set_profile_picture(&mut self, id: &str, url: Option<String>) -> bool {
        let mut found = false;

        if let Some(chat) = self.chats.get_mut(id) {
            chat.picture_url = url.clone();
            chat.picture_known = true;
            found = true;
        }

        if let Some(contact) = self.contacts.get_mut(id) {
            contact.picture_url = url;
            contact.picture_known = true;
            found = true;
        }

        found
    }

    /// Chats by descending activity. Cost is the page size plus `offset`,
    /// since the ordered index is walked from its head.
    pub fn overview(&self, limit: usize, offset: usize, filter: ChatFilter) -> Page<ChatSummary> {
        let index = match filter {
            ChatFilter::All => &self.all_by_activity,
            ChatFilter::Group => &self.groups_by_activity,
            ChatFilter::Personal => &self.personal_by_activity,
        };

        let total = index.len();
        let items = index
            .iter()
            .skip(offset)
            .take(limit)
            .filter_map(|(_, id)| self.chats.get(id))
            .map(|chat| self.summarize(chat))
            .collect();

        Page {
            items,
            total,
            offset,
            limit,
            has_more: offset.saturating_add(limit) < total,
        }
    }

    /// Case-insensitive substring search over name and notify name. The
    /// term is used as given, surrounding whitespace included.
    pub fn contacts(&self, limit: usize, offset: usize, search: &str) -> Page<ContactSummary> {
        let needle = search.to_lowercase();

        let matching = self
            .contacts_by_name
            .iter()
            .filter_map(|(_, id)| self.contacts.get(id))
            .filter(|contact| needle.is_empty() || contact.matches(&needle));

        let (items, total) = if needle.is_empty() {
            let items: Vec<ContactSummary> =
                matching.skip(offset).take(limit).map(ContactSummary::from).collect();
            (items, self.contacts.len())
        } else {
            let all: Vec<&Contact> = matching.collect();
            let total = all.len();
            let items: Vec<ContactSummary> = all
                .into_iter()
                .skip(offset)
                .take(limit)
                .map(ContactSummary::from)
                .collect();
            (items, total)
        };

        Page {
            items,
            total,
            offset,
            limit,
            has_more: offset.saturating_add(limit) < total,
        }
    }

    /// Up to `limit` messages older than `cursor`, newest first.
    ///
    /// A cursor that is not a message of this chat yields an empty page.
    pub fn messages(&self, chat_id: &str, limit: usize, cursor: Option<&str>) -> MessagePage {
        let empty = MessagePage {
            messages: Vec::new(),
            next_cursor: None,
            has_more: false,
        };

        let Some(log) = self.messages.get(chat_id) else {
            return empty;
        };
        if limit == 0 {
            return empty;
        }

        let end = match cursor {
            Some(cursor) => match log.positions.get(cursor) {
                Some(&idx) => idx,
                None => return empty,
            },
            None => log.messages.len(),
        };
        let start = end.saturating_sub(limit);

        let messages: Vec<Message> = log.messages[start..end].iter().rev().cloned().collect();
        let next_cursor = messages.last().map(|m| m.id.clone());
        let has_more = messages.len() == limit;

        MessagePage {
            messages,
            next_cursor,
            has_more,
        }
    }

    pub fn chat(&self, id: &str) -> Option<ChatSummary> {
        self.chats.get(id).map(|chat| self.summarize(chat))
    }

    pub fn contact(&self, id: &str) -> Option<Contact> {
        self.contacts.get(id).cloned()
    }

    pub fn oldest_message(&self, chat_id: &str) -> Option<&Message> {
        self.messages.get(chat_id).and_then(|log| log.messages.first())
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Point-in-time copy of the whole cache.
    pub fn snapshot(&self) -> Snapshot {
        let mut chats: Vec<Chat> = self.chats.values().cloned().collect();
        chats.sort_by(|a, b| a.id.cmp(&b.id));

        let mut contacts: Vec<Contact> = self.contacts.values().cloned().collect();
        contacts.sort_by(|a, b| a.id.cmp(&b.id));

        let mut messages: Vec<ChatHistory> = self
            .messages
            .iter()
            .map(|(chat_id, log)| ChatHistory {
                chat_id: chat_id.clone(),
                messages: log.messages.clone(),
            })
            .collect();
        messages.sort_by(|a, b| a.chat_id.cmp(&b.chat_id));

        Snapshot::new(chats, contacts, messages)
    }

    /// Replaces the cache wholesale with the decoded snapshot.
    pub fn restore(&mut self, bytes: &[u8]) -> Result<()> {
        let snapshot = Snapshot::from_bytes(bytes)?;
        *self = Self::from_snapshot(snapshot);
        Ok(())
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut store = Self::default();

        for chat in snapshot.chats {
            store.index_chat(&chat);
            store.chats.insert(chat.id.clone(), chat);
        }

        for contact in snapshot.contacts {
            store.contacts_by_name.insert(contact.sort_key());
            store.contacts.insert(contact.id.clone(), contact);
        }

        for history in snapshot.messages {
            store
                .messages
                .insert(history.chat_id, ChatLog::from_messages(history.messages));
        }

        store
    }

    fn summarize(&self, chat: &Chat) -> ChatSummary {
        let name = chat
            .name
            .clone()
            .or_else(|| {
                self.contacts
                    .get(&chat.id)
                    .and_then(|c| c.display_name().map(str::to_string))
            })
            .unwrap_or_else(|| jid::display_label(&chat.id));

        ChatSummary {
            id: chat.id.clone(),
            name,
            is_group: chat.is_group,
            last_message: chat.last_message.clone(),
            unread_count: chat.unread_count,
            picture_url: chat.picture_url.clone(),
            picture_known: chat.picture_known,
            last_activity: chat.last_activity,
        }
    }

    /// Applies `f` to the chat (created on first sight) and keeps the
    /// activity indexes in step with its new `last_activity`.
    fn update_chat(&mut self, id: &str, f: impl FnOnce(&mut Chat)) {
        let chat = self
            .chats
            .entry(id.to_string())
            .or_insert_with(|| Chat::new(id));

        let before = chat.last_activity;
        let is_new = !self.all_by_activity.contains(&(Reverse(before), id.to_string()));
        f(chat);
        let after = chat.last_activity;

        if !is_new && before == after {
            return;
        }

        let is_group = chat.is_group;
        self.unindex(id, before, is_group);
        self.insert_index(id, after, is_group);
    }

    fn index_chat(&mut self, chat: &Chat) {
        self.insert_index(&chat.id, chat.last_activity, chat.is_group);
    }

    fn insert_index(&mut self, id: &str, activity: i64, is_group: bool) {
        let key = (Reverse(activity), id.to_string());
        self.all_by_activity.insert(key.clone());
        if is_group {
            self.groups_by_activity.insert(key);
        } else {
            self.personal_by_activity.insert(key);
        }
    }

    fn unindex(&mut self, id: &str, activity: i64, is_group: bool) {
        let key = (Reverse(activity), id.to_string());
        self.all_by_activity.remove(&key);
        if is_group {
            self.groups_by_activity.remove(&key);
        } else {
            self.personal_by_activity.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mikan_core::MessageContent;

    fn text(id: &str, chat: &str, ts: i64, body: &str) -> MessageData {
        MessageData {
            id: id.to_string(),
            chat_jid: chat.to_string(),
            sender_jid: Some(chat.to_string()),
            push_name: None,
            from_me: false,
            timestamp: ts,
            content: MessageContent::Text {
                text: body.to_string(),
            },
        }
    }

    fn chat(id: &str, ts: i64) -> ChatData {
        ChatData {
            id: id.to_string(),
            name: None,
            unread_count: None,
            conversation_timestamp: Some(ts),
        }
    }

    fn contact(id: &str, name: Option<&str>, notify: Option<&str>) -> ContactData {
        ContactData {
            id: id.to_string(),
            name: name.map(str::to_string),
            notify: notify.map(str::to_string),
            ..Default::default()
        }
    }

    fn store_with_chats(n: usize) -> ConversationStore {
        let mut store = ConversationStore::new();
        store.upsert_chats(
            (0..n)
                .map(|i| chat(&format!("{}@s.whatsapp.net", 6200 + i), i as i64 * 10))
                .collect(),
        );
        store
    }

    #[test]
    fn test_append_same_message_is_idempotent() {
        let mut store = ConversationStore::new();
        let chat_id = "62811@x";

        store.append_messages(chat_id, vec![text("m1", chat_id, 100, "hi")]);
        store.append_messages(chat_id, vec![text("m1", chat_id, 100, "edited")]);

        assert_eq!(store.message_count(chat_id), 1);
        let page = store.messages(chat_id, 10, None);
        assert_eq!(page.messages.len(), 1);
        assert_eq!(
            page.messages[0].content,
            MessageContent::Text {
                text: "edited".into()
            }
        );
        let preview = store.chat(chat_id).unwrap().last_message.unwrap();
        assert_eq!(preview.text.as_deref(), Some("edited"));
    }

    #[test]
    fn test_redelivered_message_keeps_absent_sender_fields() {
        let mut store = ConversationStore::new();
        let chat_id = "62811@s.whatsapp.net";

        let mut first = text("m1", chat_id, 100, "hi");
        first.push_name = Some("Rin".into());
        store.append_messages(chat_id, vec![first]);

        let mut edit = text("m1", chat_id, 100, "hi (edited)");
        edit.sender_jid = None;
        assert_eq!(store.append_messages(chat_id, vec![edit]), 0);

        let page = store.messages(chat_id, 10, None);
        assert_eq!(page.messages[0].push_name.as_deref(), Some("Rin"));
        assert_eq!(page.messages[0].sender.as_deref(), Some(chat_id));
        assert_eq!(
            page.messages[0].content,
            MessageContent::Text {
                text: "hi (edited)".into()
            }
        );
        let preview = store.chat(chat_id).unwrap().last_message.unwrap();
        assert_eq!(preview.sender.as_deref(), Some(chat_id));
    }

    #[test]
    fn test_retimed_message_moves_and_survives_round_trip() {
        let mut store = ConversationStore::new();
        let chat_id = "62811@s.whatsapp.net";
        store.append_messages(
            chat_id,
            vec![
                text("m1", chat_id, 10, "one"),
                text("m2", chat_id, 20, "two"),
                text("m3", chat_id, 30, "three"),
            ],
        );
        store.append_messages(chat_id, vec![text("m3", chat_id, 5, "three")]);

        let ids = |store: &ConversationStore| -> Vec<String> {
            store
                .messages(chat_id, 10, None)
                .messages
                .into_iter()
                .map(|m| m.id)
                .collect()
        };
        assert_eq!(ids(&store), ["m2", "m1", "m3"]);
        assert_eq!(store.oldest_message(chat_id).unwrap().id, "m3");

        let restored = ConversationStore::from_snapshot(store.snapshot());
        assert_eq!(ids(&restored), ids(&store));
        assert_eq!(
            restored.messages(chat_id, 1, Some("m1")),
            store.messages(chat_id, 1, Some("m1"))
        );
    }

    #[test]
    fn test_overview_deep_offset() {
        let n = 50;
        let store = store_with_chats(n);

        let page = store.overview(5, 45, ChatFilter::All);
        assert_eq!(page.items.len(), 5);
        assert!(!page.has_more);
        let full = store.overview(n, 0, ChatFilter::All);
        assert_eq!(page.items, full.items[45..]);
    }

    #[test]
    fn test_overview_pagination() {
        let n = 7;
        let store = store_with_chats(n);

        for (limit, offset) in [(3, 0), (3, 3), (3, 6), (5, 5), (2, 7), (4, 10), (0, 0)] {
            let page = store.overview(limit, offset, ChatFilter::All);
            let expected = limit.min(n.saturating_sub(offset));
            assert_eq!(page.items.len(), expected, "limit={} offset={}", limit, offset);
            assert_eq!(page.total, n);
            assert_eq!(page.has_more, offset + limit < n);

            let activities: Vec<i64> = page.items.iter().map(|c| c.last_activity).collect();
            let mut sorted = activities.clone();
            sorted.sort_by(|a, b| b.cmp(a));
            assert_eq!(activities, sorted);
        }
    }

    #[test]
    fn test_overview_group_filter() {
        let mut store = ConversationStore::new();
        store.upsert_chats(vec![
            chat("1@g.us", 50),
            chat("2@g.us", 40),
            chat("3@g.us", 30),
            chat("62811@s.whatsapp.net", 60),
            chat("62812@s.whatsapp.net", 20),
        ]);

        let page = store.overview(2, 0, ChatFilter::Group);
        assert_eq!(page.items.len(), 2);
        assert!(page.items.iter().all(|c| c.is_group));
        assert_eq!(page.total, 3);
        assert!(page.has_more);

        let personal = store.overview(10, 0, ChatFilter::Personal);
        assert_eq!(personal.total, 2);
        assert_eq!(personal.items[0].id, "62811@s.whatsapp.net");
        assert!(!personal.has_more);
    }

    #[test]
    fn test_overview_on_empty_store() {
        let store = ConversationStore::new();
        let page = store.overview(20, 0, ChatFilter::All);
        assert!(page.items.is_empty());
        assert_eq!(page.total, 0);
        assert!(!page.has_more);
    }

    #[test]
    fn test_preview_is_monotonic() {
        let mut store = ConversationStore::new();
        let chat_id = "62811@s.whatsapp.net";

        store.append_messages(
            chat_id,
            vec![
                text("m3", chat_id, 300, "newest"),
                text("m1", chat_id, 100, "oldest"),
                text("m2", chat_id, 200, "middle"),
            ],
        );

        let summary = store.chat(chat_id).unwrap();
        assert_eq!(summary.last_activity, 300);
        assert_eq!(summary.last_message.unwrap().message_id, "m3");

        store.upsert_chats(vec![chat(chat_id, 150)]);
        assert_eq!(store.chat(chat_id).unwrap().last_activity, 300);
    }

    #[test]
    fn test_messages_reorder_chats() {
        let mut store = store_with_chats(3);
        let oldest = "6200@s.whatsapp.net";

        store.append_messages(oldest, vec![text("m1", oldest, 1_000, "ping")]);

        let page = store.overview(1, 0, ChatFilter::All);
        assert_eq!(page.items[0].id, oldest);
        assert_eq!(store.overview(10, 0, ChatFilter::All).total, 3);
    }

    #[test]
    fn test_message_pagination_with_cursor() {
        let mut store = ConversationStore::new();
        let chat_id = "62811@s.whatsapp.net";
        store.append_messages(
            chat_id,
            (1..=5)
                .map(|i| text(&format!("m{}", i), chat_id, i * 10, "x"))
                .collect(),
        );

        let first = store.messages(chat_id, 2, None);
        let ids: Vec<&str> = first.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m5", "m4"]);
        assert!(first.has_more);
        assert_eq!(first.next_cursor.as_deref(), Some("m4"));

        let second = store.messages(chat_id, 2, first.next_cursor.as_deref());
        let ids: Vec<&str> = second.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m3", "m2"]);

        let third = store.messages(chat_id, 2, second.next_cursor.as_deref());
        let ids: Vec<&str> = third.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m1"]);
        assert!(!third.has_more);
    }

    #[test]
    fn test_message_has_more_is_approximate() {
        let mut store = ConversationStore::new();
        let chat_id = "62811@s.whatsapp.net";
        store.append_messages(
            chat_id,
            vec![text("m1", chat_id, 10, "a"), text("m2", chat_id, 20, "b")],
        );

        // The page ends exactly at the oldest message and still reports more.
        let page = store.messages(chat_id, 2, None);
        assert_eq!(page.messages.len(), 2);
        assert!(page.has_more);

        let next = store.messages(chat_id, 2, page.next_cursor.as_deref());
        assert!(next.messages.is_empty());
        assert!(!next.has_more);
    }

    #[test]
    fn test_history_backfill_lands_behind_newer_messages() {
        let mut store = ConversationStore::new();
        let chat_id = "62811@s.whatsapp.net";
        store.append_messages(
            chat_id,
            vec![text("m3", chat_id, 30, "c"), text("m4", chat_id, 40, "d")],
        );
        store.append_messages(
            chat_id,
            vec![text("m1", chat_id, 10, "a"), text("m2", chat_id, 20, "b")],
        );

        let page = store.messages(chat_id, 3, None);
        let ids: Vec<&str> = page.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m4", "m3", "m2"]);

        let rest = store.messages(chat_id, 3, page.next_cursor.as_deref());
        let ids: Vec<&str> = rest.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m1"]);
        assert_eq!(store.oldest_message(chat_id).unwrap().id, "m1");
    }

    #[test]
    fn test_messages_unknown_chat_or_cursor() {
        let mut store = ConversationStore::new();
        assert!(store.messages("nobody@s.whatsapp.net", 10, None).messages.is_empty());

        let chat_id = "62811@s.whatsapp.net";
        store.append_messages(chat_id, vec![text("m1", chat_id, 10, "a")]);
        let page = store.messages(chat_id, 10, Some("missing"));
        assert!(page.messages.is_empty());
        assert!(!page.has_more);
    }

    #[test]
    fn test_contacts_search_and_paging() {
        let mut store = ConversationStore::new();
        store.upsert_contacts(vec![
            contact("1@s.whatsapp.net", Some("Budi Santoso"), None),
            contact("2@s.whatsapp.net", None, Some("budiman")),
            contact("3@s.whatsapp.net", Some("Citra"), Some("cici")),
            contact("4@s.whatsapp.net", Some("Andi"), None),
        ]);

        let all = store.contacts(10, 0, "");
        assert_eq!(all.total, 4);
        let names: Vec<Option<&str>> = all.items.iter().map(|c| c.name.as_deref()).collect();
        assert_eq!(names, [Some("Andi"), Some("Budi Santoso"), None, Some("Citra")]);

        let budi = store.contacts(10, 0, "BUDI");
        assert_eq!(budi.total, 2);

        let paged = store.contacts(1, 0, "budi");
        assert_eq!(paged.items.len(), 1);
        assert!(paged.has_more);

        let by_notify = store.contacts(10, 0, "cici");
        assert_eq!(by_notify.items[0].id, "3@s.whatsapp.net");
        // The term is matched as given, whitespace included.
        assert_eq!(store.contacts(10, 0, " budi").total, 0);
        assert_eq!(store.contacts(10, 0, "i s").total, 1);
    }

    #[test]
    fn test_contact_partial_update() {
        let mut store = ConversationStore::new();
        store.upsert_contacts(vec![contact("1@s.whatsapp.net", Some("Budi"), Some("bd"))]);
        store.upsert_contacts(vec![contact("1@s.whatsapp.net", None, Some("budi123"))]);

        let stored = store.contact("1@s.whatsapp.net").unwrap();
        assert_eq!(stored.name.as_deref(), Some("Budi"));
        assert_eq!(stored.notify.as_deref(), Some("budi123"));
        assert_eq!(store.contact_count(), 1);
    }

    #[test]
    fn test_chat_partial_update_keeps_fields() {
        let mut store = ConversationStore::new();
        store.upsert_chats(vec![ChatData {
            id: "1@g.us".into(),
            name: Some("Family".into()),
            unread_count: Some(3),
            conversation_timestamp: Some(10),
        }]);
        store.upsert_chats(vec![ChatData {
            id: "1@g.us".into(),
            unread_count: Some(0),
            ..Default::default()
        }]);

        let summary = store.chat("1@g.us").unwrap();
        assert_eq!(summary.name, "Family");
        assert_eq!(summary.unread_count, 0);
        assert_eq!(summary.last_activity, 10);
        assert_eq!(store.chat_count(), 1);
    }

    #[test]
    fn test_chat_name_falls_back_to_contact() {
        let mut store = ConversationStore::new();
        store.upsert_chats(vec![chat("62811@s.whatsapp.net", 1), chat("62812@s.whatsapp.net", 2)]);
        store.upsert_contacts(vec![contact("62811@s.whatsapp.net", None, Some("Ani"))]);

        assert_eq!(store.chat("62811@s.whatsapp.net").unwrap().name, "Ani");
        assert_eq!(store.chat("62812@s.whatsapp.net").unwrap().name, "+62812");
    }

    #[test]
    fn test_set_profile_picture() {
        let mut store = ConversationStore::new();
        store.upsert_chats(vec![chat("62811@s.whatsapp.net", 1)]);
        store.upsert_contacts(vec![contact("62811@s.whatsapp.net", Some("Ani"), None)]);

        assert!(store.set_profile_picture("62811@s.whatsapp.net", Some("https://pp/1".into())));
        assert_eq!(
            store.chat("62811@s.whatsapp.net").unwrap().picture_url.as_deref(),
            Some("https://pp/1")
        );
        assert_eq!(
            store.contact("62811@s.whatsapp.net").unwrap().picture_url.as_deref(),
            Some("https://pp/1")
        );

        assert!(!store.set_profile_picture("unknown@s.whatsapp.net", Some("x".into())));
        assert!(store.chat("unknown@s.whatsapp.net").is_none());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut store = store_with_chats(4);
        store.upsert_chats(vec![chat("9@g.us", 25)]);
        store.upsert_contacts(vec![
            contact("6200@s.whatsapp.net", Some("Zed"), None),
            contact("6201@s.whatsapp.net", None, Some("amy")),
        ]);
        let chat_id = "6201@s.whatsapp.net";
        store.append_messages(
            chat_id,
            vec![text("a", chat_id, 5, "one"), text("b", chat_id, 6, "two")],
        );
        store.set_profile_picture("9@g.us", None);

        let bytes = store.snapshot().to_bytes().unwrap();
        let mut restored = ConversationStore::new();
        restored.restore(&bytes).unwrap();

        for filter in [ChatFilter::All, ChatFilter::Group, ChatFilter::Personal] {
            assert_eq!(restored.overview(10, 0, filter), store.overview(10, 0, filter));
        }
        assert_eq!(restored.contacts(10, 0, ""), store.contacts(10, 0, ""));
        assert_eq!(restored.contacts(10, 0, "am"), store.contacts(10, 0, "am"));
        assert_eq!(restored.messages(chat_id, 10, None), store.messages(chat_id, 10, None));
        assert_eq!(restored.messages(chat_id, 1, Some("b")), store.messages(chat_id, 1, Some("b")));
    }

    #[test]
    fn test_restore_garbage_leaves_store_untouched() {
        let mut store = store_with_chats(2);
        assert!(store.restore(b"not json").is_err());
        assert_eq!(store.chat_count(), 2);
    }
}
