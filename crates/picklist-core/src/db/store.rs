//! Shared durable store handle used by the engine and the sync manager.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::{Database, LibSqlSyncRecordRepository, SyncRecordRepository};
use crate::error::Result;
use crate::models::{RequestId, SyncRecord, SyncStatus};

/// Thread-safe handle to the durable local store.
///
/// Cheap to clone; every clone talks to the same database.
#[derive(Clone)]
pub struct SyncStore {
    db: Arc<Mutex<Database>>,
}

impl SyncStore {
    /// Open (or create) the store at the given filesystem path.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::open(&db_path).await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }
}

impl SyncRecordRepository for SyncStore {
    async fn upsert(&self, record: &SyncRecord) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlSyncRecordRepository::new(db.connection())
            .upsert(record)
            .await
    }

    async fn get(&self, request_id: &RequestId) -> Result<Option<SyncRecord>> {
        let db = self.db.lock().await;
        LibSqlSyncRecordRepository::new(db.connection())
            .get(request_id)
            .await
    }

    async fn set_status(
        &self,
        request_id: &RequestId,
        status: SyncStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlSyncRecordRepository::new(db.connection())
            .set_status(request_id, status, error)
            .await
    }

    async fn delete(&self, request_id: &RequestId) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlSyncRecordRepository::new(db.connection())
            .delete(request_id)
            .await
    }

    async fn list_unsynced(&self) -> Result<Vec<SyncRecord>> {
        let db = self.db.lock().await;
        LibSqlSyncRecordRepository::new(db.connection())
            .list_unsynced()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ItemId, Priority, PullEntry, PullSession, SessionMeta};
    use tempfile::tempdir;

    fn sample_record() -> SyncRecord {
        let session = PullSession::start(
            RequestId::new(),
            SessionMeta {
                request_number: "MR-9".to_string(),
                tech_name: "Alex".to_string(),
                truck_number: None,
                priority: Priority::Normal,
            },
            vec![PullEntry::new(ItemId::new(), "PN-1", "Widget", 1)],
        );
        SyncRecord::pending(session)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn clones_share_the_same_database() {
        let store = SyncStore::open_in_memory().await.unwrap();
        let record = sample_record();
        store.upsert(&record).await.unwrap();

        let clone = store.clone();
        let loaded = clone.get(&record.session.request_id).await.unwrap();
        assert!(loaded.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn records_survive_reopen() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("store.db");
        let record = sample_record();

        {
            let store = SyncStore::open_path(&path).await.unwrap();
            store.upsert(&record).await.unwrap();
        }

        let store = SyncStore::open_path(&path).await.unwrap();
        let loaded = store.get(&record.session.request_id).await.unwrap();
        assert_eq!(loaded, Some(record));
    }
}
