use std::path::PathBuf;

use async_trait::async_trait;
use directories::ProjectDirs;
use mikan_core::SessionId;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite, SqlitePool};

use crate::error::{Result, StoreError};
use crate::schema::SCHEMA;

use super::SessionStorage;

/// Slots as rows of a single `sessions` table.
pub struct SqliteSessionStorage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    credentials: Option<String>,
    snapshot: Option<Vec<u8>>,
}

impl SqliteSessionStorage {
    pub async fn new() -> Result<Self> {
        let db_path = Self::get_db_path()?;

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let storage = Self::new_with_path(&db_path.display().to_string()).await?;
        tracing::info!("Session database initialized at: {}", db_path.display());
        Ok(storage)
    }

    pub async fn new_with_path(path: &str) -> Result<Self> {
        let db_url = format!("sqlite:{}?mode=rwc", path);
        let pool = SqlitePool::connect(&db_url).await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// Private in-memory database, mostly for tests.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    fn get_db_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "mikan", "mikan").ok_or(StoreError::NoDataDir)?;
        Ok(dirs.data_dir().join("sessions.db"))
    }

    async fn row(&self, session_id: &SessionId) -> Result<Option<SessionRow>> {
        Ok(sqlx::query_as::<_, SessionRow>(
            "SELECT credentials, snapshot FROM sessions WHERE id = ?",
        )
        .bind(session_id.as_str())
        .fetch_optional(&self.pool)
        .await?)
    }
}

#[async_trait]
impl SessionStorage for SqliteSessionStorage {
    async fn list_sessions(&self) -> Result<Vec<SessionId>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT id FROM sessions ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(id,)| SessionId::parse(&id).ok())
            .collect())
    }

    async fn ensure(&self, session_id: &SessionId) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            "INSERT INTO sessions (id, created_at, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(session_id.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn read_credentials(&self, session_id: &SessionId) -> Result<Option<String>> {
        Ok(self.row(session_id).await?.and_then(|row| row.credentials))
    }

    async fn write_credentials(&self, session_id: &SessionId, credentials: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"INSERT INTO sessions (id, credentials, created_at, updated_at) VALUES (?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 credentials = excluded.credentials,
                 updated_at = excluded.updated_at"#,
        )
        .bind(session_id.as_str())
        .bind(credentials)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn read_snapshot(&self, session_id: &SessionId) -> Result<Option<Vec<u8>>> {
        Ok(self.row(session_id).await?.and_then(|row| row.snapshot))
    }

    async fn write_snapshot(&self, session_id: &SessionId, snapshot: &[u8]) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query("UPDATE sessions SET snapshot = ?, updated_at = ? WHERE id = ?")
            .bind(snapshot)
            .bind(now)
            .bind(session_id.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::SlotNotFound(session_id.to_string()));
        }
        Ok(())
    }

    async fn delete(&self, session_id: &SessionId) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(session_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> SessionId {
        SessionId::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_slot_lifecycle() {
        let storage = SqliteSessionStorage::in_memory().await.unwrap();
        let s1 = id("s1");

        storage.ensure(&s1).await.unwrap();
        storage.ensure(&s1).await.unwrap();
        assert_eq!(storage.list_sessions().await.unwrap(), vec![s1.clone()]);
        assert_eq!(storage.read_credentials(&s1).await.unwrap(), None);

        storage.write_credentials(&s1, "creds-v1").await.unwrap();
        storage.write_credentials(&s1, "creds-v2").await.unwrap();
        storage.write_snapshot(&s1, b"snap").await.unwrap();

        let row = storage.row(&s1).await.unwrap().unwrap();
        assert_eq!(row.credentials.as_deref(), Some("creds-v2"));
        assert_eq!(storage.read_snapshot(&s1).await.unwrap(), Some(b"snap".to_vec()));

        storage.delete(&s1).await.unwrap();
        assert!(storage.list_sessions().await.unwrap().is_empty());
        assert_eq!(storage.read_credentials(&s1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_snapshot_requires_slot() {
        let storage = SqliteSessionStorage::in_memory().await.unwrap();
        let err = storage.write_snapshot(&id("ghost"), b"x").await.unwrap_err();
        assert!(matches!(err, StoreError::SlotNotFound(_)));
    }

    #[tokio::test]
    async fn test_credentials_create_slot() {
        let storage = SqliteSessionStorage::in_memory().await.unwrap();
        storage.write_credentials(&id("paired"), "c").await.unwrap();
        assert_eq!(storage.list_sessions().await.unwrap(), vec![id("paired")]);
    }
}
