//! One reconciliation of a source view into a destination table
//!
//! Order of effects: schema changes, row deletions, row updates, row
//! appends. An import (no destination table yet) creates the table with the
//! translated columns and appends every source row.

use std::sync::Arc;

use chrono::Utc;
use futures::TryStreamExt;
use serde_json::Value;
use uuid::Uuid;

use cds_common::types::{Column, ColumnType, Metadata, Row, ROW_ID_KEY};

use super::coercer::coerce_cell;
use super::differ::{build_update_payload, diff_row_ids};
use super::schema_planner::plan_schema;
use super::source_reader::{row_pages, SourceSnapshot};
use super::stats::{CdsStatsRecord, ImportOrSync, StatsChannel};
use super::type_resolver::resolve_column;
use super::warnings::BoundedWarnings;
use crate::config::SyncLimits;
use crate::db::DueSync;
use crate::error::{MissingEntity, SyncError};
use crate::services::filter_sql::{quote_ident, quote_literal};
use crate::services::{QueryService, RowService, RowUpdate};

/// Everything one sync needs besides the services
#[derive(Debug, Clone, Copy)]
pub struct SyncRequest<'a> {
    pub sync: &'a DueSync,
    pub org_id: i64,
    pub source: &'a SourceSnapshot,
    /// Metadata of the destination base, read for this run
    pub destination: &'a Metadata,
}

/// Outcome of a successful sync
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub dst_table_id: String,
    pub imported: bool,
    pub appended_columns: usize,
    pub updated_columns: usize,
    pub appended_rows: usize,
    pub updated_rows: usize,
    pub deleted_rows: usize,
    pub warning_rows: usize,
}

/// A sync that stopped with an error
#[derive(Debug)]
pub struct SyncFailure {
    pub error: SyncError,
    /// Table an import created before the error; later runs must reuse it
    pub created_table_id: Option<String>,
}

/// A source column paired with its destination translation
struct ColumnPair {
    src: Column,
    dst: Column,
}

/// Destination table a run writes to
struct Target {
    table_id: String,
    table_name: String,
    row_ids: Vec<String>,
}

pub struct SyncExecutor {
    rows: Arc<dyn RowService>,
    query: Arc<dyn QueryService>,
    stats: Arc<dyn StatsChannel>,
    limits: SyncLimits,
    lang: String,
    operator: String,
}

impl SyncExecutor {
    pub fn new(
        rows: Arc<dyn RowService>,
        query: Arc<dyn QueryService>,
        stats: Arc<dyn StatsChannel>,
        limits: SyncLimits,
    ) -> Self {
        Self {
            rows,
            query,
            stats,
            limits,
            lang: "en".to_string(),
            operator: "cds-scheduler".to_string(),
        }
    }

    /// Language for tables created by imports
    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = lang.into();
        self
    }

    /// Recorded as the operator of every statistics record
    pub fn with_operator(mut self, operator: impl Into<String>) -> Self {
        self.operator = operator.into();
        self
    }

    /// Run one sync and publish its statistics record
    pub async fn run(&self, request: SyncRequest<'_>) -> Result<SyncReport, SyncFailure> {
        let sync = request.sync;
        let mut record = self.new_record(sync, request.org_id);

        let result = self.execute(request, &mut record).await;

        record.finished_at = Some(Utc::now());
        match &result {
            Ok(report) => {
                record.is_success = true;
                record.dst_table_id = Some(report.dst_table_id.clone());
            }
            Err(e) => record.error = Some(format!("{}: {}", e.error_type(), e)),
        }
        self.stats.publish(&record);

        result.map_err(|error| SyncFailure {
            error,
            created_table_id: record.dst_table_id.filter(|_| sync.is_import()),
        })
    }

    /// Publish the record of a sync that failed before it could run
    pub fn publish_failure(&self, sync: &DueSync, org_id: i64, error: &SyncError) {
        let mut record = self.new_record(sync, org_id);
        record.finished_at = Some(record.started_at);
        record.error = Some(format!("{}: {}", error.error_type(), error));
        self.stats.publish(&record);
    }

    fn new_record(&self, sync: &DueSync, org_id: i64) -> CdsStatsRecord {
        CdsStatsRecord {
            org_id,
            dataset_id: sync.dataset_id,
            sync_id: sync.sync_id,
            src_dtable_uuid: sync.src_dtable_uuid,
            src_table_id: sync.src_table_id.clone(),
            src_view_id: sync.src_view_id.clone(),
            dst_dtable_uuid: sync.dst_dtable_uuid,
            dst_table_id: sync.dst_table_id.clone(),
            operator: self.operator.clone(),
            import_or_sync: if sync.is_import() {
                ImportOrSync::Import
            } else {
                ImportOrSync::Sync
            },
            started_at: Utc::now(),
            finished_at: None,
            columns_count: 0,
            link_formula_columns_count: 0,
            to_be_appended_rows_count: 0,
            to_be_updated_rows_count: 0,
            to_be_deleted_rows_count: 0,
            appended_rows_count: 0,
            updated_rows_count: 0,
            deleted_rows_count: 0,
            is_success: false,
            error: None,
        }
    }

    async fn execute(
        &self,
        request: SyncRequest<'_>,
        record: &mut CdsStatsRecord,
    ) -> Result<SyncReport, SyncError> {
        let sync = request.sync;
        let source = request.source;
        let dst_uuid = sync.dst_dtable_uuid;

        let pairs: Vec<ColumnPair> = source
            .columns
            .iter()
            .filter_map(|src| {
                resolve_column(src).map(|dst| ColumnPair {
                    src: src.clone(),
                    dst,
                })
            })
            .collect();
        let dst_columns: Vec<Column> = pairs.iter().map(|pair| pair.dst.clone()).collect();

        record.columns_count = pairs.len();
        record.link_formula_columns_count = pairs
            .iter()
            .filter(|pair| pair.src.column_type == ColumnType::LinkFormula)
            .count();

        let mut report = SyncReport {
            imported: sync.is_import(),
            ..Default::default()
        };

        let target = match &sync.dst_table_id {
            None => {
                let table_name = unique_table_name(&sync.dataset_name, request.destination);
                let table_id = self
                    .rows
                    .add_table(dst_uuid, &table_name, &self.lang, &dst_columns)
                    .await?;
                record.dst_table_id = Some(table_id.clone());
                report.appended_columns = dst_columns.len();

                tracing::info!(
                    sync_id = sync.sync_id,
                    %dst_uuid,
                    table_id = %table_id,
                    table_name = %table_name,
                    "Created destination table"
                );

                Target {
                    table_id,
                    table_name,
                    row_ids: Vec::new(),
                }
            }
            Some(table_id) => {
                let table = request.destination.table_by_id(table_id).map_err(|_| {
                    SyncError::MissingEntity(MissingEntity::DestinationTable(table_id.clone()))
                })?;

                let plan = plan_schema(&dst_columns, &table.columns)?;
                if !plan.to_append.is_empty() {
                    self.rows
                        .batch_append_columns_by_table_id(dst_uuid, table_id, &plan.to_append)
                        .await?;
                }
                if !plan.to_update.is_empty() {
                    self.rows
                        .batch_update_columns_by_table_id(dst_uuid, table_id, &plan.to_update)
                        .await?;
                }
                report.appended_columns = plan.to_append.len();
                report.updated_columns = plan.to_update.len();

                Target {
                    table_id: table_id.clone(),
                    table_name: table.name.clone(),
                    row_ids: self.list_row_ids(dst_uuid, &table.name).await?,
                }
            }
        };
        report.dst_table_id = target.table_id.clone();

        let diff = diff_row_ids(&source.row_ids, &target.row_ids);
        record.to_be_appended_rows_count = diff.to_append.len();
        record.to_be_updated_rows_count = diff.to_update.len();
        record.to_be_deleted_rows_count = diff.to_delete.len();

        for chunk in diff.to_delete.chunks(self.limits.delete_rows_limit.max(1)) {
            self.rows
                .batch_delete_rows(dst_uuid, &target.table_name, chunk)
                .await?;
            report.deleted_rows += chunk.len();
            record.deleted_rows_count = report.deleted_rows;
        }

        let mut warnings = BoundedWarnings::new(self.limits.invalid_warning_rows);
        let batch_size = self.limits.insert_update_rows_limit.max(1);

        for chunk in diff.to_update.chunks(batch_size) {
            let current = self
                .fetch_rows(dst_uuid, &target.table_name, &dst_columns, chunk)
                .await?;

            let updates: Vec<RowUpdate> = chunk
                .iter()
                .filter_map(|row_id| {
                    let src_row = source.row(row_id)?;
                    let new_row = coerce_row(&pairs, row_id, src_row, &mut warnings);
                    let existing = current
                        .iter()
                        .find(|row| row.get(ROW_ID_KEY).and_then(Value::as_str) == Some(row_id));
                    let payload = match existing {
                        Some(existing) => build_update_payload(&dst_columns, &new_row, existing),
                        None => build_update_payload(&dst_columns, &new_row, &Row::new()),
                    };
                    (!payload.is_empty()).then(|| RowUpdate {
                        row_id: row_id.clone(),
                        row: payload,
                    })
                })
                .collect();

            if !updates.is_empty() {
                self.rows
                    .batch_update_rows(dst_uuid, &target.table_name, &updates)
                    .await?;
                report.updated_rows += updates.len();
                record.updated_rows_count = report.updated_rows;
            }
        }

        for chunk in diff.to_append.chunks(batch_size) {
            let rows: Vec<Row> = chunk
                .iter()
                .filter_map(|row_id| {
                    let src_row = source.row(row_id)?;
                    let mut row = coerce_row(&pairs, row_id, src_row, &mut warnings);
                    row.retain(|_, value| !value.is_null());
                    row.insert(ROW_ID_KEY.to_string(), Value::String(row_id.clone()));
                    Some(row)
                })
                .collect();

            self.rows
                .batch_append_rows(dst_uuid, &target.table_name, &rows)
                .await?;
            report.appended_rows += rows.len();
            record.appended_rows_count = report.appended_rows;
        }

        warnings.log_summary(dst_uuid, &sync.src_view_id);
        report.warning_rows = warnings.rows().len();

        tracing::info!(
            sync_id = sync.sync_id,
            dataset_id = sync.dataset_id,
            %dst_uuid,
            appended = report.appended_rows,
            updated = report.updated_rows,
            deleted = report.deleted_rows,
            "Sync finished"
        );

        Ok(report)
    }

    /// Every row id of a destination table
    async fn list_row_ids(&self, dtable_uuid: Uuid, table_name: &str) -> Result<Vec<String>, SyncError> {
        let sql = format!("SELECT {} FROM {}", quote_ident(ROW_ID_KEY), quote_ident(table_name));
        let pages = row_pages(
            self.query.as_ref(),
            dtable_uuid,
            sql,
            self.limits.page_size,
            usize::MAX,
        );
        futures::pin_mut!(pages);

        let mut row_ids = Vec::new();
        while let Some(page) = pages.try_next().await? {
            row_ids.extend(
                page.iter()
                    .filter_map(|row| row.get(ROW_ID_KEY).and_then(Value::as_str))
                    .map(str::to_string),
            );
        }
        Ok(row_ids)
    }

    /// Current destination cells of the given rows
    async fn fetch_rows(
        &self,
        dtable_uuid: Uuid,
        table_name: &str,
        columns: &[Column],
        row_ids: &[String],
    ) -> Result<Vec<Row>, SyncError> {
        let mut fields = vec![quote_ident(ROW_ID_KEY)];
        fields.extend(columns.iter().map(|column| quote_ident(&column.name)));
        let ids = row_ids
            .iter()
            .map(|id| quote_literal(id))
            .collect::<Vec<_>>()
            .join(", ");

        let sql = format!(
            "SELECT {} FROM {} WHERE {} IN ({}) LIMIT 0, {}",
            fields.join(", "),
            quote_ident(table_name),
            quote_ident(ROW_ID_KEY),
            ids,
            row_ids.len()
        );

        Ok(self.query.query(dtable_uuid, &sql, false, true).await?.rows)
    }
}

/// Coerce every synced cell of a source row, keyed by destination column key
fn coerce_row(
    pairs: &[ColumnPair],
    row_id: &str,
    src_row: &Row,
    warnings: &mut BoundedWarnings,
) -> Row {
    let mut row = Row::new();
    let mut invalid_cells = Vec::new();

    for pair in pairs {
        let value = src_row.get(&pair.src.key).unwrap_or(&Value::Null);
        let (coerced, invalid) = coerce_cell(&pair.src, &pair.dst, value);
        if let Some(invalid) = invalid {
            invalid_cells.push(invalid);
        }
        row.insert(pair.dst.key.clone(), coerced);
    }

    warnings.push(row_id, invalid_cells);
    row
}

/// `name`, or the first of `name (2)`, `name (3)`, ... the base does not use
pub fn unique_table_name(name: &str, metadata: &Metadata) -> String {
    if metadata.table_by_name(name).is_none() {
        return name.to_string();
    }

    let mut suffix = 2;
    loop {
        let candidate = format!("{} ({})", name, suffix);
        if metadata.table_by_name(&candidate).is_none() {
            return candidate;
        }
        suffix += 1;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use cds_common::types::Table;

    fn metadata(names: &[&str]) -> Metadata {
        Metadata {
            version: 1,
            tables: names
                .iter()
                .enumerate()
                .map(|(i, name)| Table {
                    id: format!("t{}", i),
                    name: name.to_string(),
                    columns: Vec::new(),
                    views: Vec::new(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_unique_table_name() {
        assert_eq!(unique_table_name("Orders", &metadata(&["Table1"])), "Orders");
        assert_eq!(
            unique_table_name("Orders", &metadata(&["Orders", "Orders (2)"])),
            "Orders (3)"
        );
    }

    #[test]
    fn test_coerce_row_collects_bounded_warnings() {
        let pairs = vec![
            ColumnPair {
                src: Column::new("a", "A", ColumnType::Text),
                dst: Column::new("a", "A", ColumnType::Text),
            },
            ColumnPair {
                src: Column::new("s", "Sign", ColumnType::DigitalSign),
                dst: Column::new("s", "Sign", ColumnType::DigitalSign),
            },
        ];
        let src_row: Row = serde_json::from_value(serde_json::json!({
            "_id": "r1", "a": "x", "s": {"sign_image_url": "u"}
        }))
        .unwrap();

        let mut warnings = BoundedWarnings::new(1);
        let row = coerce_row(&pairs, "r1", &src_row, &mut warnings);
        coerce_row(&pairs, "r2", &src_row, &mut warnings);

        assert_eq!(row.get("a"), Some(&Value::String("x".to_string())));
        assert_eq!(row.get("s"), Some(&Value::Null));
        assert_eq!(warnings.rows().len(), 1);
        assert_eq!(warnings.dropped(), 1);
    }
}
