//! Load-audit bookkeeping: the externally observable record of whether a
//! file loaded, and the idempotency guard that reads it (spec §4.8, §6).

use chrono::{DateTime, Utc};

use crate::error::{classify_pool_error, classify_query_error, IngestError};

/// Status of one audit entry, mirroring the load lifecycle in spec §4.8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum LoadStatus {
    Started,
    Completed,
    Failed,
}

/// One row of the load-audit table (spec §6: "insert-and-update of
/// (batch_id, source_path, source_fingerprint, row_count, status,
/// started_at, completed_at)").
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub batch_id: uuid::Uuid,
    pub source_path: String,
    pub source_fingerprint: String,
    pub row_count: i64,
    pub status: LoadStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Record-body line number of the first failing batch, kept for resume
    /// (spec §4.8 step 5). `None` unless `status == Failed`.
    pub failed_offset: Option<u64>,
}

/// Read/write access to the audit table. Abstracted as a trait so
/// [`crate::coordinator::LoadCoordinator`] can be driven by a real
/// `deadpool_postgres::Pool`-backed implementation or an in-memory fake in
/// tests, without either depending on the other's concrete type.
#[async_trait::async_trait]
pub trait AuditStore: Send + Sync {
    /// Looks up the most recent `Completed` entry for a given content
    /// fingerprint, used by the idempotency guard (spec §4.8 step 2).
    async fn find_completed_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<AuditEntry>, IngestError>;

    async fn insert_started(&self, entry: &AuditEntry) -> Result<(), IngestError>;

    async fn mark_completed(
        &self,
        batch_id: uuid::Uuid,
        row_count: i64,
        completed_at: DateTime<Utc>,
    ) -> Result<(), IngestError>;

    async fn mark_failed(
        &self,
        batch_id: uuid::Uuid,
        failed_offset: u64,
    ) -> Result<(), IngestError>;
}

/// `deadpool_postgres`-backed [`AuditStore`]. The schema (table name and
/// columns) is declared by the caller's schema-init component (spec §6);
/// this crate only issues the statements against whatever table that
/// component created.
pub struct PostgresAuditStore {
    pool: deadpool_postgres::Pool,
    table_name: &'static str,
}

impl PostgresAuditStore {
    pub fn new(pool: deadpool_postgres::Pool) -> Self {
        Self {
            pool,
            table_name: "load_audit",
        }
    }
}

#[async_trait::async_trait]
impl AuditStore for PostgresAuditStore {
    async fn find_completed_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<AuditEntry>, IngestError> {
        let client = self.pool.get().await.map_err(classify_pool_error)?;
        let query = format!(
            "SELECT batch_id, source_path, source_fingerprint, row_count, status, started_at, completed_at \
             FROM {} WHERE source_fingerprint = $1 AND status = 'completed' \
             ORDER BY completed_at DESC LIMIT 1",
            self.table_name
        );
        let row = client
            .query_opt(query.as_str(), &[&fingerprint])
            .await
            .map_err(classify_query_error)?;
        Ok(row.map(|row| AuditEntry {
            batch_id: row.get(0),
            source_path: row.get(1),
            source_fingerprint: row.get(2),
            row_count: row.get(3),
            status: LoadStatus::Completed,
            started_at: row.get(5),
            completed_at: row.get(6),
            failed_offset: None,
        }))
    }

    async fn insert_started(&self, entry: &AuditEntry) -> Result<(), IngestError> {
        let client = self.pool.get().await.map_err(classify_pool_error)?;
        let query = format!(
            "INSERT INTO {} (batch_id, source_path, source_fingerprint, row_count, status, started_at) \
             VALUES ($1, $2, $3, $4, 'started', $5)",
            self.table_name
        );
        client
            .execute(
                query.as_str(),
                &[
                    &entry.batch_id,
                    &entry.source_path,
                    &entry.source_fingerprint,
                    &entry.row_count,
                    &entry.started_at,
                ],
            )
            .await
            .map_err(classify_query_error)?;
        Ok(())
    }

    async fn mark_completed(
        &self,
        batch_id: uuid::Uuid,
        row_count: i64,
        completed_at: DateTime<Utc>,
    ) -> Result<(), IngestError> {
        let client = self.pool.get().await.map_err(classify_pool_error)?;
        let query = format!(
            "UPDATE {} SET status = 'completed', row_count = $2, completed_at = $3 WHERE batch_id = $1",
            self.table_name
        );
        client
            .execute(query.as_str(), &[&batch_id, &row_count, &completed_at])
            .await
            .map_err(classify_query_error)?;
        Ok(())
    }

    async fn mark_failed(&self, batch_id: uuid::Uuid, failed_offset: u64) -> Result<(), IngestError> {
        let client = self.pool.get().await.map_err(classify_pool_error)?;
        let query = format!(
            "UPDATE {} SET status = 'failed', failed_offset = $2 WHERE batch_id = $1",
            self.table_name
        );
        client
            .execute(query.as_str(), &[&batch_id, &(failed_offset as i64)])
            .await
            .map_err(classify_query_error)?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::fake::InMemoryAuditStore;
    use super::*;

    fn entry(fingerprint: &str) -> AuditEntry {
        AuditEntry {
            batch_id: uuid::Uuid::new_v4(),
            source_path: "test.vcf".to_string(),
            source_fingerprint: fingerprint.to_string(),
            row_count: 0,
            status: LoadStatus::Started,
            started_at: Utc::now(),
            completed_at: None,
            failed_offset: None,
        }
    }

    #[tokio::test]
    async fn find_completed_returns_none_before_completion() {
        let store = InMemoryAuditStore::default();
        let e = entry("fp1");
        store.insert_started(&e).await.unwrap();
        assert!(store.find_completed_by_fingerprint("fp1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn find_completed_returns_entry_after_mark_completed() {
        let store = InMemoryAuditStore::default();
        let e = entry("fp1");
        store.insert_started(&e).await.unwrap();
        store.mark_completed(e.batch_id, 42, Utc::now()).await.unwrap();
        let found = store.find_completed_by_fingerprint("fp1").await.unwrap().unwrap();
        assert_eq!(found.row_count, 42);
        assert_eq!(found.status, LoadStatus::Completed);
    }

    #[tokio::test]
    async fn mark_failed_records_offset() {
        let store = InMemoryAuditStore::default();
        let e = entry("fp2");
        store.insert_started(&e).await.unwrap();
        store.mark_failed(e.batch_id, 12345).await.unwrap();
        assert!(store.find_completed_by_fingerprint("fp2").await.unwrap().is_none());
    }
}
