//! PostgreSQL sync store tests
//!
//! These use `#[sqlx::test]`, which creates a fresh database per test from
//! `DATABASE_URL` and applies the workspace migrations. Run them with
//! `cargo test -- --ignored` against a disposable server.

use chrono::{Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use cds_engine::db::{PgSyncStore, SyncStore};

const SRC: Uuid = Uuid::from_u128(0x5_0001);
const DST: Uuid = Uuid::from_u128(0xD_0001);
const DST2: Uuid = Uuid::from_u128(0xD_0002);

async fn seed(pool: &PgPool) -> sqlx::Result<(i64, i64, i64)> {
    let workspace: i64 = sqlx::query_scalar("INSERT INTO workspaces (org_id) VALUES (7) RETURNING id")
        .fetch_one(pool)
        .await?;

    for uuid in [SRC, DST, DST2] {
        sqlx::query("INSERT INTO dtables (uuid, workspace_id) VALUES ($1, $2)")
            .bind(uuid)
            .bind(workspace)
            .execute(pool)
            .await?;
    }

    let dataset: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO dtable_common_dataset (dataset_name, dtable_uuid, table_id, view_id)
        VALUES ('Orders', $1, '0000', '0000')
        RETURNING id
        "#,
    )
    .bind(SRC)
    .fetch_one(pool)
    .await?;

    let mut sync_ids = Vec::new();
    for dst in [DST, DST2] {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO dtable_common_dataset_sync
                (dataset_id, src_dtable_uuid, src_table_id, src_view_id, dst_dtable_uuid)
            VALUES ($1, $2, '0000', '0000', $3)
            RETURNING id
            "#,
        )
        .bind(dataset)
        .bind(SRC)
        .bind(dst)
        .fetch_one(pool)
        .await?;
        sync_ids.push(id);
    }

    Ok((dataset, sync_ids[0], sync_ids[1]))
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_never_synced_syncs_are_due(pool: PgPool) -> anyhow::Result<()> {
    let (dataset, first, second) = seed(&pool).await?;
    let store = PgSyncStore::new(pool);

    let due = store.list_due_syncs(Utc::now(), false).await?;

    assert_eq!(due.len(), 2);
    assert_eq!(due[0].sync_id, first);
    assert_eq!(due[1].sync_id, second);
    assert_eq!(due[0].dataset_id, dataset);
    assert_eq!(due[0].dataset_name, "Orders");
    assert!(due[0].is_import());
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_mark_synced_respects_window(pool: PgPool) -> anyhow::Result<()> {
    let (_, first, _) = seed(&pool).await?;
    let store = PgSyncStore::new(pool);

    store.mark_synced(first, "n001", 12, Utc::now()).await?;

    let due = store
        .list_due_syncs(Utc::now() - Duration::hours(23), false)
        .await?;
    assert_eq!(due.len(), 1);
    assert_ne!(due[0].sync_id, first);

    let forced = store
        .list_due_syncs(Utc::now() - Duration::hours(23), true)
        .await?;
    let synced = forced.iter().find(|s| s.sync_id == first).unwrap();
    assert_eq!(synced.dst_table_id.as_deref(), Some("n001"));
    assert_eq!(synced.src_version, Some(12));
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_created_table_keeps_sync_due(pool: PgPool) -> anyhow::Result<()> {
    let (_, first, _) = seed(&pool).await?;
    let store = PgSyncStore::new(pool);

    store.set_dst_table_id(first, "n001").await?;

    let due = store.list_due_syncs(Utc::now(), false).await?;
    assert_eq!(due.len(), 2);
    let resumed = due.iter().find(|s| s.sync_id == first).unwrap();
    assert_eq!(resumed.dst_table_id.as_deref(), Some("n001"));
    assert!(!resumed.is_import());
    assert!(resumed.last_sync_time.is_none());
    assert!(resumed.src_version.is_none());
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_invalidated_syncs_are_never_due(pool: PgPool) -> anyhow::Result<()> {
    let (_, first, second) = seed(&pool).await?;
    let store = PgSyncStore::new(pool);

    assert_eq!(store.invalidate_syncs(&[first]).await?, 1);
    assert_eq!(store.invalidate_syncs(&[]).await?, 0);

    let due = store.list_due_syncs(Utc::now(), true).await?;
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].sync_id, second);
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_deleted_destination_base_is_skipped(pool: PgPool) -> anyhow::Result<()> {
    seed(&pool).await?;
    sqlx::query("UPDATE dtables SET deleted = TRUE WHERE uuid = $1")
        .bind(DST2)
        .execute(&pool)
        .await?;
    let store = PgSyncStore::new(pool);

    let due = store.list_due_syncs(Utc::now(), true).await?;
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].dst_dtable_uuid, DST);
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_org_lookup(pool: PgPool) -> anyhow::Result<()> {
    seed(&pool).await?;
    let store = PgSyncStore::new(pool);

    assert_eq!(store.org_id_for_dtable(SRC).await?, Some(7));
    assert_eq!(store.org_id_for_dtable(Uuid::nil()).await?, None);
    Ok(())
}
