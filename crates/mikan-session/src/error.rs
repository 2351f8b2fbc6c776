use std::path::PathBuf;

use mikan_core::SessionIdError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session {0} is not connected")]
    NotConnected(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Session {0} is already connected")]
    Conflict(String),

    #[error("Transport error: {0}")]
    Transport(#[from] mikan_transport::TransportError),

    #[error("Storage error: {0}")]
    Storage(#[from] mikan_store::StoreError),
}

impl From<SessionIdError> for SessionError {
    fn from(e: SessionIdError) -> Self {
        SessionError::Validation(e.to_string())
    }
}

/// Machine-readable class of a [`SessionError`], as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotConnected,
    NotFound,
    Validation,
    Conflict,
    Transport,
    Storage,
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::NotConnected(_) => ErrorKind::NotConnected,
            SessionError::NotFound(_) => ErrorKind::NotFound,
            SessionError::Validation(_) => ErrorKind::Validation,
            SessionError::Conflict(_) => ErrorKind::Conflict,
            SessionError::Transport(_) => ErrorKind::Transport,
            SessionError::Storage(_) => ErrorKind::Storage,
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("Storage error: {0}")]
    Storage(#[from] mikan_store::StoreError),
}
