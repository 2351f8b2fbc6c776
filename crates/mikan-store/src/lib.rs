mod error;
mod models;
mod schema;
mod snapshot;
mod snapshotter;
mod storage;
mod store;

pub use error::{Result, StoreError};
pub use models::*;
pub use snapshot::{ChatHistory, SNAPSHOT_VERSION, Snapshot};
pub use snapshotter::{SnapshotTimer, flush_snapshot};
pub use storage::{FsSessionStorage, SessionStorage, SqliteSessionStorage};
pub use store::{ConversationStore, SharedStore};
