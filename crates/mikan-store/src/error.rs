use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unsupported snapshot version {0}")]
    UnsupportedSnapshot(u32),

    #[error("Session slot not found: {0}")]
    SlotNotFound(String),

    #[error("Could not resolve data directory")]
    NoDataDir,
}

pub type Result<T> = std::result::Result<T, StoreError>;
