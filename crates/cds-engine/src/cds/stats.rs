//! Statistics of finished syncs
//!
//! Every sync, successful or not, produces one [`CdsStatsRecord`]. Delivery is
//! fire-and-forget: a channel that cannot take a record drops it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportOrSync {
    Import,
    Sync,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CdsStatsRecord {
    pub org_id: i64,
    pub dataset_id: i64,
    pub sync_id: i64,
    pub src_dtable_uuid: Uuid,
    pub src_table_id: String,
    pub src_view_id: String,
    pub dst_dtable_uuid: Uuid,
    pub dst_table_id: Option<String>,
    pub operator: String,
    pub import_or_sync: ImportOrSync,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub columns_count: usize,
    pub link_formula_columns_count: usize,
    pub to_be_appended_rows_count: usize,
    pub to_be_updated_rows_count: usize,
    pub to_be_deleted_rows_count: usize,
    pub appended_rows_count: usize,
    pub updated_rows_count: usize,
    pub deleted_rows_count: usize,
    pub is_success: bool,
    pub error: Option<String>,
}

pub trait StatsChannel: Send + Sync {
    fn publish(&self, record: &CdsStatsRecord);
}

/// Writes each record as a JSON event on the `cds_stats` target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingStatsChannel;

impl StatsChannel for TracingStatsChannel {
    fn publish(&self, record: &CdsStatsRecord) {
        match serde_json::to_string(record) {
            Ok(json) => tracing::info!(target: "cds_stats", record = %json, "cds sync statistics"),
            Err(e) => tracing::debug!(error = %e, "Failed to serialize statistics record"),
        }
    }
}

/// Hands records to a bounded in-process queue
#[derive(Debug, Clone)]
pub struct MpscStatsChannel {
    sender: mpsc::Sender<CdsStatsRecord>,
}

impl MpscStatsChannel {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<CdsStatsRecord>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

impl StatsChannel for MpscStatsChannel {
    fn publish(&self, record: &CdsStatsRecord) {
        if let Err(e) = self.sender.try_send(record.clone()) {
            tracing::debug!(sync_id = record.sync_id, error = %e, "Dropped statistics record");
        }
    }
}
