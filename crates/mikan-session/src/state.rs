use std::fmt;

use mikan_core::{AccountIdentity, ConnectionState, ConnectionUpdate, DisconnectReason, jid};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Disconnected,
    Connecting,
    QrReady,
    Connected,
    Error,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Disconnected => "disconnected",
            SessionStatus::Connecting => "connecting",
            SessionStatus::QrReady => "qr_ready",
            SessionStatus::Connected => "connected",
            SessionStatus::Error => "error",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pairing challenge in both raw and shareable form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairingChallenge {
    pub raw: String,
    /// `data:image/svg+xml;base64,...`
    pub data_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub jid: String,
    pub phone_number: Option<String>,
    pub name: Option<String>,
}

impl From<AccountIdentity> for Identity {
    fn from(me: AccountIdentity) -> Self {
        Self {
            phone_number: jid::phone_number(&me.jid),
            jid: jid::normalize_user(&me.jid),
            name: me.name,
        }
    }
}

/// What the session has to do after a connection update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    Challenge(String),
    Opened,
    Reconnect(Option<DisconnectReason>),
    LoggedOut,
}

#[derive(Debug, Clone, Default)]
pub struct SessionState {
    status: SessionStatus,
    challenge: Option<PairingChallenge>,
    identity: Option<Identity>,
    last_error: Option<String>,
    last_disconnect: Option<DisconnectReason>,
}

impl SessionState {
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn challenge(&self) -> Option<&PairingChallenge> {
        self.challenge.as_ref()
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn last_disconnect(&self) -> Option<DisconnectReason> {
        self.last_disconnect
    }

    /// Moves to `status`, dropping the fields that only live in the state
    /// being left. Returns true if the status changed.
    pub fn enter(&mut self, status: SessionStatus) -> bool {
        if status != SessionStatus::QrReady {
            self.challenge = None;
        }
        if status != SessionStatus::Connected {
            self.identity = None;
        }

        let changed = self.status != status;
        self.status = status;
        changed
    }

    pub fn begin_connect(&mut self) -> bool {
        self.last_error = None;
        self.enter(SessionStatus::Connecting)
    }

    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        self.last_error = Some(error.into());
        self.enter(SessionStatus::Error)
    }

    pub fn apply(&mut self, update: &ConnectionUpdate) -> Transition {
        if let Some(qr) = &update.qr {
            return Transition::Challenge(qr.clone());
        }

        match update.connection {
            Some(ConnectionState::Connecting) => {
                self.enter(SessionStatus::Connecting);
                Transition::Unchanged
            }
            Some(ConnectionState::Open) => {
                self.last_disconnect = None;
                self.enter(SessionStatus::Connected);
                Transition::Opened
            }
            Some(ConnectionState::Close) => {
                self.last_disconnect = update.disconnect;
                self.enter(SessionStatus::Disconnected);
                if update.disconnect.is_some_and(DisconnectReason::is_logged_out) {
                    Transition::LoggedOut
                } else {
                    Transition::Reconnect(update.disconnect)
                }
            }
            None => Transition::Unchanged,
        }
    }

    pub fn set_challenge(&mut self, challenge: PairingChallenge) -> bool {
        let changed = self.enter(SessionStatus::QrReady);
        self.challenge = Some(challenge);
        changed
    }

    /// Ignored unless connected; the first capture wins.
    pub fn set_identity(&mut self, identity: Identity) {
        if self.status == SessionStatus::Connected && self.identity.is_none() {
            self.identity = Some(identity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(code: u16) -> ConnectionUpdate {
        ConnectionUpdate {
            connection: Some(ConnectionState::Close),
            disconnect: Some(DisconnectReason::from(code)),
            ..Default::default()
        }
    }

    fn open() -> ConnectionUpdate {
        ConnectionUpdate {
            connection: Some(ConnectionState::Open),
            ..Default::default()
        }
    }

    fn challenge(raw: &str) -> PairingChallenge {
        PairingChallenge {
            raw: raw.into(),
            data_url: format!("data:{}", raw),
        }
    }

    #[test]
    fn test_pairing_flow() {
        let mut state = SessionState::default();
        assert_eq!(state.status(), SessionStatus::Disconnected);

        assert!(state.begin_connect());
        let qr = ConnectionUpdate {
            qr: Some("2@abc".into()),
            ..Default::default()
        };
        assert_eq!(state.apply(&qr), Transition::Challenge("2@abc".into()));

        state.set_challenge(challenge("2@abc"));
        assert_eq!(state.status(), SessionStatus::QrReady);
        assert!(state.challenge().is_some());

        // A rotated challenge replaces the old one without a status change.
        assert!(!state.set_challenge(challenge("2@def")));
        assert_eq!(state.challenge().unwrap().raw, "2@def");

        assert_eq!(state.apply(&open()), Transition::Opened);
        assert_eq!(state.status(), SessionStatus::Connected);
        assert!(state.challenge().is_none());
    }

    #[test]
    fn test_identity_only_while_connected() {
        let mut state = SessionState::default();
        let me = Identity::from(AccountIdentity {
            jid: "62811:4@s.whatsapp.net".into(),
            name: Some("Rin".into()),
        });

        state.set_identity(me.clone());
        assert!(state.identity().is_none());

        state.apply(&open());
        state.set_identity(me.clone());
        assert_eq!(state.identity().unwrap().phone_number.as_deref(), Some("62811"));
        assert_eq!(state.identity().unwrap().jid, "62811@s.whatsapp.net");

        state.apply(&close(428));
        assert!(state.identity().is_none());
    }

    #[test]
    fn test_close_reasons() {
        let mut state = SessionState::default();
        state.apply(&open());

        assert_eq!(
            state.apply(&close(515)),
            Transition::Reconnect(Some(DisconnectReason::RestartRequired))
        );
        assert_eq!(state.status(), SessionStatus::Disconnected);

        let bare_close = ConnectionUpdate {
            connection: Some(ConnectionState::Close),
            ..Default::default()
        };
        assert_eq!(state.apply(&bare_close), Transition::Reconnect(None));

        assert_eq!(state.apply(&close(401)), Transition::LoggedOut);
        assert_eq!(state.last_disconnect(), Some(DisconnectReason::LoggedOut));
    }

    #[test]
    fn test_challenge_cleared_when_leaving_qr_ready() {
        let mut state = SessionState::default();
        state.set_challenge(challenge("2@abc"));
        state.apply(&close(408));
        assert!(state.challenge().is_none());
    }

    #[test]
    fn test_fail_and_retry() {
        let mut state = SessionState::default();
        state.begin_connect();
        state.fail("bun not found");
        assert_eq!(state.status(), SessionStatus::Error);
        assert_eq!(state.last_error(), Some("bun not found"));

        state.begin_connect();
        assert_eq!(state.status(), SessionStatus::Connecting);
        assert!(state.last_error().is_none());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&SessionStatus::QrReady).unwrap(), "\"qr_ready\"");
        assert_eq!(SessionStatus::QrReady.to_string(), "qr_ready");
    }
}
