//! Utilities for parsing and normalizing WhatsApp JIDs

pub const USER_SERVER: &str = "s.whatsapp.net";
pub const GROUP_SERVER: &str = "g.us";

/// Group chats are keyed by `<id>@g.us`
pub fn is_group(jid: &str) -> bool {
    jid.ends_with("@g.us")
}

/// Canonical phone number of a user JID.
/// - "62811:12@s.whatsapp.net" (device suffix) -> "62811"
/// - "62811@s.whatsapp.net" -> "62811"
pub fn phone_number(jid: &str) -> Option<String> {
    let user = jid.split('@').next()?;
    let user = user.split(':').next()?;

    if !user.is_empty() && user.chars().all(|c| c.is_ascii_digit()) {
        Some(user.to_string())
    } else {
        None
    }
}

/// Strips the device suffix: "62811:12@s.whatsapp.net" -> "62811@s.whatsapp.net"
pub fn normalize_user(jid: &str) -> String {
    match jid.split_once('@') {
        Some((user, server)) => {
            let user = user.split(':').next().unwrap_or(user);
            format!("{}@{}", user, server)
        }
        None => jid.to_string(),
    }
}

/// Turn a send target into a JID.
/// - Anything containing '@' is taken as a JID already
/// - Otherwise digits are extracted ("+62 811-000" -> "62811000@s.whatsapp.net")
pub fn to_jid(target: &str) -> Option<String> {
    let target = target.trim();
    if target.contains('@') {
        return Some(target.to_string());
    }

    let digits: String = target.chars().filter(|c| c.is_ascii_digit()).collect();
    let only_phone_chars = target
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | ' ' | '(' | ')'));

    if digits.is_empty() || !only_phone_chars {
        return None;
    }

    Some(format!("{}@{}", digits, USER_SERVER))
}

/// Fallback display label when neither chat nor contact has a name
pub fn display_label(jid: &str) -> String {
    if let Some(phone) = phone_number(jid) {
        if !is_group(jid) {
            return format!("+{}", phone);
        }
    }

    jid.split('@').next().unwrap_or(jid).to_string()
}
