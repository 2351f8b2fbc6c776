use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bridge process not running")]
    ProcessNotRunning,

    #[error("Failed to spawn bridge: {0}")]
    SpawnFailed(String),

    #[error("Bun install failed: {0}")]
    BunInstallFailed(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("{command} rejected: {reason}")]
    Rejected { command: &'static str, reason: String },

    #[error("Unexpected reply to {0}")]
    UnexpectedReply(&'static str),
}

pub type Result<T> = std::result::Result<T, TransportError>;
