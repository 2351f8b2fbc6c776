use async_trait::async_trait;
use mikan_core::SessionId;

use crate::error::Result;

mod fs;
mod sqlite;

pub use fs::FsSessionStorage;
pub use sqlite::SqliteSessionStorage;

/// Durable slot per session holding transport credentials and the
/// conversation snapshot. `delete` removes both together.
#[async_trait]
pub trait SessionStorage: Send + Sync {
    /// Sessions that currently own a slot.
    async fn list_sessions(&self) -> Result<Vec<SessionId>>;

    /// Creates the slot if it does not exist yet.
    async fn ensure(&self, session_id: &SessionId) -> Result<()>;

    async fn read_credentials(&self, session_id: &SessionId) -> Result<Option<String>>;

    /// Creates the slot when missing; pairing writes the first credentials.
    async fn write_credentials(&self, session_id: &SessionId, credentials: &str) -> Result<()>;

    async fn read_snapshot(&self, session_id: &SessionId) -> Result<Option<Vec<u8>>>;

    /// Never recreates a deleted slot; fails with `SlotNotFound` instead.
    async fn write_snapshot(&self, session_id: &SessionId, snapshot: &[u8]) -> Result<()>;

    async fn delete(&self, session_id: &SessionId) -> Result<()>;
}
