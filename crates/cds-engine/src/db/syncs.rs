//! Sync definitions and their bookkeeping fields

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use super::DbResult;

/// A valid sync whose destination is due for reconciliation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DueSync {
    pub sync_id: i64,
    pub dataset_id: i64,
    pub dataset_name: String,
    pub src_dtable_uuid: Uuid,
    pub src_table_id: String,
    pub src_view_id: String,
    pub dst_dtable_uuid: Uuid,
    /// Absent until the first import created the destination table
    pub dst_table_id: Option<String>,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub src_version: Option<i64>,
}

impl DueSync {
    pub fn is_import(&self) -> bool {
        self.dst_table_id.is_none()
    }
}

/// Persistence store operations the scheduler relies on
///
/// Every write is a single statement; nothing is held open across calls to
/// the row or query service.
#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Valid syncs not synced since `older_than` (all valid syncs when
    /// `force`), ordered by dataset then sync id
    async fn list_due_syncs(&self, older_than: DateTime<Utc>, force: bool)
        -> DbResult<Vec<DueSync>>;

    /// Organization owning the base, if the base is known
    async fn org_id_for_dtable(&self, dtable_uuid: Uuid) -> DbResult<Option<i64>>;

    async fn invalidate_syncs(&self, sync_ids: &[i64]) -> DbResult<u64>;

    /// Bind the destination table an import created, leaving the sync due
    async fn set_dst_table_id(&self, sync_id: i64, dst_table_id: &str) -> DbResult<()>;

    async fn mark_synced(
        &self,
        sync_id: i64,
        dst_table_id: &str,
        src_version: i64,
        synced_at: DateTime<Utc>,
    ) -> DbResult<()>;
}

/// PostgreSQL backed [`SyncStore`]
#[derive(Clone)]
pub struct PgSyncStore {
    pool: PgPool,
}

impl PgSyncStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SyncStore for PgSyncStore {
    async fn list_due_syncs(
        &self,
        older_than: DateTime<Utc>,
        force: bool,
    ) -> DbResult<Vec<DueSync>> {
        let syncs = sqlx::query_as::<_, DueSync>(
            r#"
            SELECT s.id AS sync_id, s.dataset_id, d.dataset_name,
                   s.src_dtable_uuid, s.src_table_id, s.src_view_id,
                   s.dst_dtable_uuid, s.dst_table_id, s.last_sync_time, s.src_version
            FROM dtable_common_dataset_sync s
            JOIN dtable_common_dataset d ON d.id = s.dataset_id
            JOIN dtables src ON src.uuid = s.src_dtable_uuid
            JOIN dtables dst ON dst.uuid = s.dst_dtable_uuid
            WHERE s.is_valid
              AND d.is_valid
              AND NOT src.deleted
              AND NOT dst.deleted
              AND ($2 OR s.last_sync_time IS NULL OR s.last_sync_time < $1)
            ORDER BY s.dataset_id, s.id
            "#,
        )
        .bind(older_than)
        .bind(force)
        .fetch_all(&self.pool)
        .await?;

        tracing::debug!(count = syncs.len(), force, "Loaded due syncs");
        Ok(syncs)
    }

    async fn org_id_for_dtable(&self, dtable_uuid: Uuid) -> DbResult<Option<i64>> {
        let org_id: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT w.org_id
            FROM dtables t
            JOIN workspaces w ON w.id = t.workspace_id
            WHERE t.uuid = $1
            "#,
        )
        .bind(dtable_uuid)
        .fetch_optional(&self.pool)
        .await?;

        Ok(org_id)
    }

    async fn invalidate_syncs(&self, sync_ids: &[i64]) -> DbResult<u64> {
        if sync_ids.is_empty() {
            return Ok(0);
        }

        let result =
            sqlx::query("UPDATE dtable_common_dataset_sync SET is_valid = FALSE WHERE id = ANY($1)")
                .bind(sync_ids)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }

    async fn set_dst_table_id(&self, sync_id: i64, dst_table_id: &str) -> DbResult<()> {
        sqlx::query("UPDATE dtable_common_dataset_sync SET dst_table_id = $2 WHERE id = $1")
            .bind(sync_id)
            .bind(dst_table_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn mark_synced(
        &self,
        sync_id: i64,
        dst_table_id: &str,
        src_version: i64,
        synced_at: DateTime<Utc>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE dtable_common_dataset_sync
            SET dst_table_id = $2, last_sync_time = $3, src_version = $4
            WHERE id = $1
            "#,
        )
        .bind(sync_id)
        .bind(dst_table_id)
        .bind(synced_at)
        .bind(src_version)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
