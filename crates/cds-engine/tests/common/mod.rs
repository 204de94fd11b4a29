//! In-memory fakes of the row service, query service and sync store
//!
//! [`FakeCloud`] holds bases in memory and implements both service traits, so
//! a scheduler built on it runs the real pipeline end to end. Every mutation
//! is recorded as a [`Call`] for assertions.
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;
use uuid::Uuid;

use cds_common::types::{Column, Metadata, Row, Table, View, ROW_ID_KEY};
use cds_engine::cds::{CdsScheduler, CdsStatsRecord, MpscStatsChannel, SyncExecutor};
use cds_engine::config::{SchedulerConfig, SyncLimits};
use cds_engine::db::{DbResult, DueSync, SyncStore};
use cds_engine::error::{QuotaKind, ServiceError, ServiceResult};
use cds_engine::services::{QueryResult, QueryService, RowService, RowUpdate, SqlFilterCompiler};
use tokio::sync::mpsc;

static FROM_TABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"FROM `((?:[^`]|``)+)`").unwrap());
static ID_LIST: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"IN \(([^)]*)\)").unwrap());
static LIMIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"LIMIT (\d+), (\d+)$").unwrap());

/// A row or column mutation seen by the fake row service
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    AddTable { table_name: String, columns: Vec<Column> },
    AppendColumns(Vec<Column>),
    UpdateColumns(Vec<Column>),
    AppendRows(Vec<Row>),
    UpdateRows(Vec<RowUpdate>),
    DeleteRows(Vec<String>),
}

#[derive(Debug, Clone, Default)]
struct FakeBase {
    metadata: Metadata,
    /// Rows by table id, in insertion order
    rows: HashMap<String, Vec<Row>>,
}

#[derive(Default)]
pub struct FakeCloud {
    bases: Mutex<HashMap<Uuid, FakeBase>>,
    calls: Mutex<Vec<(Uuid, Call)>>,
    metadata_reads: AtomicUsize,
    queries: Mutex<Vec<String>>,
    quota: Mutex<Option<QuotaKind>>,
    failing_appends: AtomicUsize,
    next_table: AtomicUsize,
}

impl FakeCloud {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_base(&self, uuid: Uuid, version: i64) {
        self.bases.lock().unwrap().insert(
            uuid,
            FakeBase {
                metadata: Metadata {
                    version,
                    tables: Vec::new(),
                },
                rows: HashMap::new(),
            },
        );
    }

    pub fn insert_table(&self, uuid: Uuid, table: Table, rows: Vec<Row>) {
        let mut bases = self.bases.lock().unwrap();
        let base = bases.get_mut(&uuid).unwrap();
        base.rows.insert(table.id.clone(), rows);
        base.metadata.tables.push(table);
    }

    /// Replace the rows of a table and bump the base version
    pub fn set_rows(&self, uuid: Uuid, table_id: &str, rows: Vec<Row>) {
        let mut bases = self.bases.lock().unwrap();
        let base = bases.get_mut(&uuid).unwrap();
        base.rows.insert(table_id.to_string(), rows);
        base.metadata.version += 1;
    }

    /// Replace the columns of a table and bump the base version
    pub fn set_columns(&self, uuid: Uuid, table_id: &str, columns: Vec<Column>) {
        let mut bases = self.bases.lock().unwrap();
        let base = bases.get_mut(&uuid).unwrap();
        let table = base
            .metadata
            .tables
            .iter_mut()
            .find(|t| t.id == table_id)
            .unwrap();
        table.columns = columns;
        base.metadata.version += 1;
    }

    pub fn set_view(&self, uuid: Uuid, table_id: &str, view: View) {
        let mut bases = self.bases.lock().unwrap();
        let base = bases.get_mut(&uuid).unwrap();
        let table = base
            .metadata
            .tables
            .iter_mut()
            .find(|t| t.id == table_id)
            .unwrap();
        table.views.retain(|v| v.id != view.id);
        table.views.push(view);
        base.metadata.version += 1;
    }

    pub fn remove_table(&self, uuid: Uuid, table_id: &str) {
        let mut bases = self.bases.lock().unwrap();
        let base = bases.get_mut(&uuid).unwrap();
        base.metadata.tables.retain(|t| t.id != table_id);
        base.rows.remove(table_id);
    }

    pub fn version(&self, uuid: Uuid) -> i64 {
        self.bases.lock().unwrap()[&uuid].metadata.version
    }

    pub fn table(&self, uuid: Uuid, table_id: &str) -> Option<Table> {
        self.bases.lock().unwrap()[&uuid]
            .metadata
            .table_by_id(table_id)
            .ok()
            .cloned()
    }

    pub fn table_by_name(&self, uuid: Uuid, name: &str) -> Option<Table> {
        self.bases.lock().unwrap()[&uuid]
            .metadata
            .table_by_name(name)
            .cloned()
    }

    pub fn rows(&self, uuid: Uuid, table_id: &str) -> Vec<Row> {
        self.bases.lock().unwrap()[&uuid]
            .rows
            .get(table_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn row_ids(&self, uuid: Uuid, table_id: &str) -> Vec<String> {
        self.rows(uuid, table_id)
            .iter()
            .filter_map(|row| row.get(ROW_ID_KEY).and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    }

    /// Mutations against `uuid`, oldest first
    pub fn calls(&self, uuid: Uuid) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(base, _)| *base == uuid)
            .map(|(_, call)| call.clone())
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
        self.queries.lock().unwrap().clear();
        self.metadata_reads.store(0, Ordering::SeqCst);
    }

    pub fn metadata_reads(&self) -> usize {
        self.metadata_reads.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    /// Make every following mutation fail with a quota error
    pub fn exceed_quota(&self, kind: QuotaKind) {
        *self.quota.lock().unwrap() = Some(kind);
    }

    /// Make the next `count` row appends fail with a 503
    pub fn fail_appends(&self, count: usize) {
        self.failing_appends.store(count, Ordering::SeqCst);
    }

    fn check_append_outage(&self) -> ServiceResult<()> {
        let failed = self
            .failing_appends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(ServiceError::Status {
                status: 503,
                body: "service unavailable".to_string(),
            });
        }
        Ok(())
    }

    fn check_quota(&self) -> ServiceResult<()> {
        match *self.quota.lock().unwrap() {
            Some(kind) => Err(ServiceError::BaseExceeds {
                kind,
                message: "limit reached".to_string(),
            }),
            None => Ok(()),
        }
    }

    fn record(&self, uuid: Uuid, call: Call) {
        self.calls.lock().unwrap().push((uuid, call));
    }

    fn with_table<T>(
        &self,
        uuid: Uuid,
        matches: impl Fn(&Table) -> bool,
        f: impl FnOnce(&mut Table, &mut Vec<Row>) -> T,
    ) -> ServiceResult<T> {
        let mut bases = self.bases.lock().unwrap();
        let base = bases.get_mut(&uuid).ok_or_else(|| not_found("base"))?;
        let table = base
            .metadata
            .tables
            .iter_mut()
            .find(|t| matches(t))
            .ok_or_else(|| not_found("table"))?;
        let rows = base.rows.entry(table.id.clone()).or_default();
        Ok(f(table, rows))
    }
}

fn not_found(what: &str) -> ServiceError {
    ServiceError::Status {
        status: 404,
        body: format!("{} not found", what),
    }
}

#[async_trait]
impl RowService for FakeCloud {
    async fn get_metadata(&self, dtable_uuid: Uuid) -> ServiceResult<Metadata> {
        self.metadata_reads.fetch_add(1, Ordering::SeqCst);
        self.bases
            .lock()
            .unwrap()
            .get(&dtable_uuid)
            .map(|base| base.metadata.clone())
            .ok_or_else(|| not_found("base"))
    }

    async fn add_table(
        &self,
        dtable_uuid: Uuid,
        table_name: &str,
        _lang: &str,
        columns: &[Column],
    ) -> ServiceResult<String> {
        self.check_quota()?;
        self.record(
            dtable_uuid,
            Call::AddTable {
                table_name: table_name.to_string(),
                columns: columns.to_vec(),
            },
        );

        let table_id = format!("n{:03}", self.next_table.fetch_add(1, Ordering::SeqCst));
        let mut bases = self.bases.lock().unwrap();
        let base = bases.get_mut(&dtable_uuid).ok_or_else(|| not_found("base"))?;
        base.metadata.tables.push(Table {
            id: table_id.clone(),
            name: table_name.to_string(),
            columns: columns.to_vec(),
            views: vec![View::unfiltered("0000", "Default View")],
        });
        base.rows.insert(table_id.clone(), Vec::new());
        Ok(table_id)
    }

    async fn batch_append_columns_by_table_id(
        &self,
        dtable_uuid: Uuid,
        table_id: &str,
        columns: &[Column],
    ) -> ServiceResult<()> {
        self.check_quota()?;
        self.record(dtable_uuid, Call::AppendColumns(columns.to_vec()));
        self.with_table(dtable_uuid, |t| t.id == table_id, |table, _| {
            table.columns.extend(columns.iter().cloned());
        })
    }

    async fn batch_update_columns_by_table_id(
        &self,
        dtable_uuid: Uuid,
        table_id: &str,
        columns: &[Column],
    ) -> ServiceResult<()> {
        self.check_quota()?;
        self.record(dtable_uuid, Call::UpdateColumns(columns.to_vec()));
        self.with_table(dtable_uuid, |t| t.id == table_id, |table, _| {
            for column in columns {
                if let Some(existing) = table.columns.iter_mut().find(|c| c.key == column.key) {
                    *existing = column.clone();
                }
            }
        })
    }

    async fn batch_append_rows(
        &self,
        dtable_uuid: Uuid,
        table_name: &str,
        rows: &[Row],
    ) -> ServiceResult<()> {
        self.check_quota()?;
        self.check_append_outage()?;
        self.record(dtable_uuid, Call::AppendRows(rows.to_vec()));
        self.with_table(dtable_uuid, |t| t.name == table_name, |_, stored| {
            stored.extend(rows.iter().cloned());
        })
    }

    async fn batch_update_rows(
        &self,
        dtable_uuid: Uuid,
        table_name: &str,
        updates: &[RowUpdate],
    ) -> ServiceResult<()> {
        self.check_quota()?;
        self.record(dtable_uuid, Call::UpdateRows(updates.to_vec()));
        self.with_table(dtable_uuid, |t| t.name == table_name, |_, stored| {
            for update in updates {
                let target = stored
                    .iter_mut()
                    .find(|row| row.get(ROW_ID_KEY).and_then(Value::as_str) == Some(update.row_id.as_str()));
                if let Some(target) = target {
                    for (key, value) in &update.row {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        })
    }

    async fn batch_delete_rows(
        &self,
        dtable_uuid: Uuid,
        table_name: &str,
        row_ids: &[String],
    ) -> ServiceResult<()> {
        self.record(dtable_uuid, Call::DeleteRows(row_ids.to_vec()));
        self.with_table(dtable_uuid, |t| t.name == table_name, |_, stored| {
            stored.retain(|row| {
                row.get(ROW_ID_KEY)
                    .and_then(Value::as_str)
                    .is_none_or(|id| !row_ids.iter().any(|r| r == id))
            });
        })
    }
}

/// Understands the statements the engine issues: a table in `FROM`, an
/// optional `_id` list and a trailing `LIMIT offset, count`. Other clauses
/// are ignored, so views in these tests should be unfiltered.
#[async_trait]
impl QueryService for FakeCloud {
    async fn query(
        &self,
        dtable_uuid: Uuid,
        sql: &str,
        _convert: bool,
        _server_only: bool,
    ) -> ServiceResult<QueryResult> {
        self.queries.lock().unwrap().push(sql.to_string());

        let table_name = FROM_TABLE
            .captures(sql)
            .map(|c| c[1].replace("``", "`"))
            .ok_or_else(|| not_found("table in statement"))?;
        let (offset, count) = LIMIT
            .captures(sql)
            .map(|c| (c[1].parse::<usize>().unwrap(), c[2].parse::<usize>().unwrap()))
            .unwrap_or((0, 100));
        let ids: Option<Vec<String>> = ID_LIST.captures(sql).map(|c| {
            c[1].split(", ")
                .map(|id| id.trim_matches('\'').replace("''", "'"))
                .collect()
        });

        let rows = self.with_table(dtable_uuid, |t| t.name == table_name, |_, rows| {
            rows.clone()
        })?;
        let rows = rows
            .into_iter()
            .filter(|row| match &ids {
                Some(ids) => row
                    .get(ROW_ID_KEY)
                    .and_then(Value::as_str)
                    .is_some_and(|id| ids.iter().any(|i| i == id)),
                None => true,
            })
            .skip(offset)
            .take(count)
            .collect();

        Ok(QueryResult {
            rows,
            metadata: Vec::new(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct StoredSync {
    pub sync: DueSync,
    pub is_valid: bool,
}

/// [`SyncStore`] over a vector
#[derive(Default)]
pub struct InMemorySyncStore {
    syncs: Mutex<Vec<StoredSync>>,
    orgs: Mutex<HashMap<Uuid, i64>>,
}

impl InMemorySyncStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, sync: DueSync) {
        self.syncs.lock().unwrap().push(StoredSync {
            sync,
            is_valid: true,
        });
    }

    pub fn set_org(&self, dtable_uuid: Uuid, org_id: i64) {
        self.orgs.lock().unwrap().insert(dtable_uuid, org_id);
    }

    pub fn get(&self, sync_id: i64) -> StoredSync {
        self.syncs
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.sync.sync_id == sync_id)
            .cloned()
            .unwrap()
    }

    /// Pretend the last sync happened long ago
    pub fn age(&self, sync_id: i64, synced_at: DateTime<Utc>) {
        let mut syncs = self.syncs.lock().unwrap();
        if let Some(stored) = syncs.iter_mut().find(|s| s.sync.sync_id == sync_id) {
            stored.sync.last_sync_time = Some(synced_at);
        }
    }
}

#[async_trait]
impl SyncStore for InMemorySyncStore {
    async fn list_due_syncs(&self, older_than: DateTime<Utc>, force: bool) -> DbResult<Vec<DueSync>> {
        let mut due: Vec<DueSync> = self
            .syncs
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.is_valid)
            .filter(|s| force || s.sync.last_sync_time.is_none_or(|t| t < older_than))
            .map(|s| s.sync.clone())
            .collect();
        due.sort_by_key(|s| (s.dataset_id, s.sync_id));
        Ok(due)
    }

    async fn org_id_for_dtable(&self, dtable_uuid: Uuid) -> DbResult<Option<i64>> {
        Ok(self.orgs.lock().unwrap().get(&dtable_uuid).copied())
    }

    async fn invalidate_syncs(&self, sync_ids: &[i64]) -> DbResult<u64> {
        let mut count = 0;
        for stored in self.syncs.lock().unwrap().iter_mut() {
            if sync_ids.contains(&stored.sync.sync_id) && stored.is_valid {
                stored.is_valid = false;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn set_dst_table_id(&self, sync_id: i64, dst_table_id: &str) -> DbResult<()> {
        let mut syncs = self.syncs.lock().unwrap();
        if let Some(stored) = syncs.iter_mut().find(|s| s.sync.sync_id == sync_id) {
            stored.sync.dst_table_id = Some(dst_table_id.to_string());
        }
        Ok(())
    }

    async fn mark_synced(
        &self,
        sync_id: i64,
        dst_table_id: &str,
        src_version: i64,
        synced_at: DateTime<Utc>,
    ) -> DbResult<()> {
        let mut syncs = self.syncs.lock().unwrap();
        if let Some(stored) = syncs.iter_mut().find(|s| s.sync.sync_id == sync_id) {
            stored.sync.dst_table_id = Some(dst_table_id.to_string());
            stored.sync.src_version = Some(src_version);
            stored.sync.last_sync_time = Some(synced_at);
        }
        Ok(())
    }
}

pub struct Harness {
    pub cloud: Arc<FakeCloud>,
    pub store: Arc<InMemorySyncStore>,
    pub scheduler: CdsScheduler,
    pub stats: mpsc::Receiver<CdsStatsRecord>,
}

impl Harness {
    pub fn new(limits: SyncLimits) -> Self {
        let cloud = FakeCloud::new();
        let store = InMemorySyncStore::new();
        let (stats, receiver) = MpscStatsChannel::new(256);

        let executor = SyncExecutor::new(cloud.clone(), cloud.clone(), Arc::new(stats), limits)
            .with_operator("test");
        let scheduler = CdsScheduler::new(
            store.clone(),
            cloud.clone(),
            cloud.clone(),
            Arc::new(SqlFilterCompiler::new()),
            executor,
            SchedulerConfig::default(),
            limits,
        );

        Self {
            cloud,
            store,
            scheduler,
            stats: receiver,
        }
    }

    pub fn drain_stats(&mut self) -> Vec<CdsStatsRecord> {
        let mut records = Vec::new();
        while let Ok(record) = self.stats.try_recv() {
            records.push(record);
        }
        records
    }
}

pub fn row(value: Value) -> Row {
    value.as_object().unwrap().clone()
}

pub fn due_sync(sync_id: i64, dataset_id: i64, src: Uuid, dst: Uuid) -> DueSync {
    DueSync {
        sync_id,
        dataset_id,
        dataset_name: "Orders".to_string(),
        src_dtable_uuid: src,
        src_table_id: "0000".to_string(),
        src_view_id: "0000".to_string(),
        dst_dtable_uuid: dst,
        dst_table_id: None,
        last_sync_time: None,
        src_version: None,
    }
}
