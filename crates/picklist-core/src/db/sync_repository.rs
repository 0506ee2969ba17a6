//! Sync record repository implementation

use crate::error::{Error, Result};
use crate::models::{PullSession, RequestId, SyncRecord, SyncStatus};
use libsql::{params, Connection};

/// Trait for durable sync record storage (async)
#[allow(async_fn_in_trait)]
pub trait SyncRecordRepository {
    /// Insert or rewrite the record for its request (idempotent by key)
    async fn upsert(&self, record: &SyncRecord) -> Result<()>;

    /// Get the record for one request
    async fn get(&self, request_id: &RequestId) -> Result<Option<SyncRecord>>;

    /// Move a record through the sync lifecycle
    ///
    /// Stamps `last_attempt` for everything except a reset to `Pending`.
    async fn set_status(
        &self,
        request_id: &RequestId,
        status: SyncStatus,
        error: Option<&str>,
    ) -> Result<()>;

    /// Delete the record for one request
    async fn delete(&self, request_id: &RequestId) -> Result<()>;

    /// Records awaiting submission: `pending` or `failed`
    async fn list_unsynced(&self) -> Result<Vec<SyncRecord>>;
}

/// libSQL implementation of `SyncRecordRepository`
pub struct LibSqlSyncRecordRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlSyncRecordRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_record(row: &libsql::Row) -> Result<SyncRecord> {
        let session_json: String = row.get(1)?;
        let session: PullSession = serde_json::from_str(&session_json)?;
        let status_text: String = row.get(2)?;
        let sync_status = status_text
            .parse::<SyncStatus>()
            .map_err(Error::Database)?;

        Ok(SyncRecord {
            session,
            sync_status,
            last_attempt: row.get::<Option<i64>>(3)?,
            error: row.get::<Option<String>>(4)?,
        })
    }
}

impl SyncRecordRepository for LibSqlSyncRecordRepository<'_> {
    async fn upsert(&self, record: &SyncRecord) -> Result<()> {
        let session_json = serde_json::to_string(&record.session)?;
        let now = chrono::Utc::now().timestamp_millis();

        self.conn
            .execute(
                "INSERT INTO sync_records (request_id, session, sync_status, last_attempt, error, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(request_id) DO UPDATE SET
                     session = excluded.session,
                     sync_status = excluded.sync_status,
                     last_attempt = excluded.last_attempt,
                     error = excluded.error,
                     updated_at = excluded.updated_at",
                params![
                    record.session.request_id.as_str(),
                    session_json,
                    record.sync_status.as_str(),
                    record.last_attempt,
                    record.error.clone(),
                    now
                ],
            )
            .await?;

        Ok(())
    }

    async fn get(&self, request_id: &RequestId) -> Result<Option<SyncRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT request_id, session, sync_status, last_attempt, error
                 FROM sync_records WHERE request_id = ?",
                params![request_id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_record(&row)?)),
            None => Ok(None),
        }
    }

    async fn set_status(
        &self,
        request_id: &RequestId,
        status: SyncStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();

        if status == SyncStatus::Pending {
            self.conn
                .execute(
                    "UPDATE sync_records SET sync_status = ?, error = ?, updated_at = ?
                     WHERE request_id = ?",
                    params![
                        status.as_str(),
                        error.map(ToOwned::to_owned),
                        now,
                        request_id.as_str()
                    ],
                )
                .await?;
        } else {
            self.conn
                .execute(
                    "UPDATE sync_records SET sync_status = ?, last_attempt = ?, error = ?, updated_at = ?
                     WHERE request_id = ?",
                    params![
                        status.as_str(),
                        now,
                        error.map(ToOwned::to_owned),
                        now,
                        request_id.as_str()
                    ],
                )
                .await?;
        }

        Ok(())
    }

    async fn delete(&self, request_id: &RequestId) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM sync_records WHERE request_id = ?",
                params![request_id.as_str()],
            )
            .await?;
        Ok(())
    }

    async fn list_unsynced(&self) -> Result<Vec<SyncRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT request_id, session, sync_status, last_attempt, error
                 FROM sync_records
                 WHERE sync_status IN ('pending', 'failed')
                 ORDER BY updated_at ASC",
                (),
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::parse_record(&row)?);
        }
        Ok(records)
    }
}
