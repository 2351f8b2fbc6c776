use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use directories::ProjectDirs;
use mikan_core::SessionId;
use tokio::fs;

use crate::error::{Result, StoreError};

use super::SessionStorage;

const CREDENTIALS_FILE: &str = "creds.json";
const SNAPSHOT_FILE: &str = "store.json";
const TOMBSTONE_PREFIX: &str = ".deleted-";

/// One directory per session under `root`:
///
/// ```text
/// <root>/<session_id>/creds.json
/// <root>/<session_id>/store.json
/// ```
pub struct FsSessionStorage {
    root: PathBuf,
}

impl FsSessionStorage {
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        tracing::info!("Session storage at: {}", root.display());
        Ok(Self { root })
    }

    pub async fn open_default() -> Result<Self> {
        Self::new(Self::default_root()?).await
    }

    pub fn default_root() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "mikan", "mikan").ok_or(StoreError::NoDataDir)?;
        Ok(dirs.data_dir().join("sessions"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn slot(&self, session_id: &SessionId) -> PathBuf {
        self.root.join(session_id.as_str())
    }
}

#[async_trait]
impl SessionStorage for FsSessionStorage {
    async fn list_sessions(&self) -> Result<Vec<SessionId>> {
        let mut sessions = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            match SessionId::parse(name) {
                Ok(id) => sessions.push(id),
                Err(_) => tracing::debug!(dir = name, "Skipping non-session directory"),
            }
        }

        sessions.sort();
        Ok(sessions)
    }

    async fn ensure(&self, session_id: &SessionId) -> Result<()> {
        fs::create_dir_all(self.slot(session_id)).await?;
        Ok(())
    }

    async fn read_credentials(&self, session_id: &SessionId) -> Result<Option<String>> {
        match fs::read_to_string(self.slot(session_id).join(CREDENTIALS_FILE)).await {
            Ok(creds) => Ok(Some(creds)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_credentials(&self, session_id: &SessionId, credentials: &str) -> Result<()> {
        let slot = self.slot(session_id);
        fs::create_dir_all(&slot).await?;
        write_atomic(&slot, CREDENTIALS_FILE, credentials.as_bytes()).await
    }

    async fn read_snapshot(&self, session_id: &SessionId) -> Result<Option<Vec<u8>>> {
        match fs::read(self.slot(session_id).join(SNAPSHOT_FILE)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_snapshot(&self, session_id: &SessionId, snapshot: &[u8]) -> Result<()> {
        let slot = self.slot(session_id);
        if fs::metadata(&slot).await.is_err() {
            return Err(StoreError::SlotNotFound(session_id.to_string()));
        }
        write_atomic(&slot, SNAPSHOT_FILE, snapshot).await
    }

    async fn delete(&self, session_id: &SessionId) -> Result<()> {
        let slot = self.slot(session_id);
        let tombstone = self.root.join(format!(
            "{}{}-{}",
            TOMBSTONE_PREFIX,
            session_id,
            chrono::Utc::now().timestamp_millis()
        ));

        match fs::rename(&slot, &tombstone).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        fs::remove_dir_all(&tombstone).await?;
        tracing::info!(session_id = %session_id, "Session slot removed");
        Ok(())
    }
}

async fn write_atomic(dir: &Path, file: &str, bytes: &[u8]) -> Result<()> {
    let tmp = dir.join(format!("{}.tmp", file));
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, dir.join(file)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn id(raw: &str) -> SessionId {
        SessionId::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_credentials_and_snapshot_round_trip() {
        let temp = tempdir().unwrap();
        let storage = FsSessionStorage::new(temp.path()).await.unwrap();
        let s1 = id("s1");

        assert_eq!(storage.read_credentials(&s1).await.unwrap(), None);

        storage.write_credentials(&s1, r#"{"me":"62811"}"#).await.unwrap();
        storage.write_snapshot(&s1, b"{}").await.unwrap();

        assert_eq!(
            storage.read_credentials(&s1).await.unwrap().as_deref(),
            Some(r#"{"me":"62811"}"#)
        );
        assert_eq!(storage.read_snapshot(&s1).await.unwrap(), Some(b"{}".to_vec()));
        assert!(temp.path().join("s1").join("creds.json").exists());
    }

    #[tokio::test]
    async fn test_list_sessions_skips_foreign_entries() {
        let temp = tempdir().unwrap();
        let storage = FsSessionStorage::new(temp.path()).await.unwrap();

        storage.ensure(&id("beta")).await.unwrap();
        storage.ensure(&id("alpha")).await.unwrap();
        std::fs::create_dir(temp.path().join("not a session")).unwrap();
        std::fs::write(temp.path().join("README"), "x").unwrap();

        let sessions = storage.list_sessions().await.unwrap();
        assert_eq!(sessions, vec![id("alpha"), id("beta")]);
    }

    #[tokio::test]
    async fn test_delete_removes_everything() {
        let temp = tempdir().unwrap();
        let storage = FsSessionStorage::new(temp.path()).await.unwrap();
        let s1 = id("s1");

        storage.write_credentials(&s1, "creds").await.unwrap();
        storage.write_snapshot(&s1, b"snap").await.unwrap();
        storage.delete(&s1).await.unwrap();

        assert_eq!(storage.read_credentials(&s1).await.unwrap(), None);
        assert_eq!(storage.read_snapshot(&s1).await.unwrap(), None);
        assert!(storage.list_sessions().await.unwrap().is_empty());
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);

        // Deleting twice is fine.
        storage.delete(&s1).await.unwrap();
    }

    #[tokio::test]
    async fn test_snapshot_write_does_not_resurrect_slot() {
        let temp = tempdir().unwrap();
        let storage = FsSessionStorage::new(temp.path()).await.unwrap();
        let s1 = id("s1");

        let err = storage.write_snapshot(&s1, b"late").await.unwrap_err();
        assert!(matches!(err, StoreError::SlotNotFound(_)));
        assert!(!temp.path().join("s1").exists());
    }
}
