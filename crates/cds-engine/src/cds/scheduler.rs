//! Sync cycles
//!
//! A cycle loads every due sync, groups the syncs by dataset and processes
//! the datasets on a bounded pool of concurrent jobs. Inside a dataset the
//! source view is read at most once and shared by all of its destinations.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use futures::{stream, StreamExt};
use tokio::sync::Mutex;

use cds_common::types::Metadata;

use super::executor::{SyncExecutor, SyncFailure, SyncRequest};
use super::source_reader::{SourceSnapshot, SourceViewReader};
use crate::config::{SchedulerConfig, SyncLimits, MAX_WORKERS};
use crate::db::{DbResult, DueSync, SyncStore};
use crate::error::{MissingEntity, SyncError};
use crate::services::{FilterCompiler, QueryService, RowService};

/// Organization id recorded when a base has no known workspace
const UNKNOWN_ORG_ID: i64 = -1;

/// Selection of syncs for one cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleOptions {
    /// Ignore the sync window and the source version
    pub force: bool,
    /// Restrict the cycle to one dataset
    pub dataset_id: Option<i64>,
}

/// Counts of what a cycle (or one dataset of it) did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub datasets: usize,
    pub synced: usize,
    /// Skipped because the source version did not change
    pub unchanged: usize,
    pub invalidated: usize,
    /// Left for the next cycle after a transient failure
    pub failed: usize,
}

impl CycleSummary {
    fn merge(mut self, other: CycleSummary) -> Self {
        self.datasets += other.datasets;
        self.synced += other.synced;
        self.unchanged += other.unchanged;
        self.invalidated += other.invalidated;
        self.failed += other.failed;
        self
    }
}

pub struct CdsScheduler {
    store: Arc<dyn SyncStore>,
    rows: Arc<dyn RowService>,
    query: Arc<dyn QueryService>,
    compiler: Arc<dyn FilterCompiler>,
    executor: SyncExecutor,
    config: SchedulerConfig,
    limits: SyncLimits,
    running: Mutex<()>,
}

impl CdsScheduler {
    pub fn new(
        store: Arc<dyn SyncStore>,
        rows: Arc<dyn RowService>,
        query: Arc<dyn QueryService>,
        compiler: Arc<dyn FilterCompiler>,
        executor: SyncExecutor,
        config: SchedulerConfig,
        limits: SyncLimits,
    ) -> Self {
        Self {
            store,
            rows,
            query,
            compiler,
            executor,
            config,
            limits,
            running: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Scheduled entry point: runs a regular cycle unless one is in progress
    pub async fn tick(&self) -> Option<CycleSummary> {
        let Ok(_guard) = self.running.try_lock() else {
            tracing::warn!("Previous sync cycle still running, skipping this tick");
            return None;
        };

        match self.run_cycle(CycleOptions::default()).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                tracing::error!(error = %e, "Sync cycle failed");
                None
            }
        }
    }

    /// Run one cycle to completion
    pub async fn run_cycle(&self, options: CycleOptions) -> DbResult<CycleSummary> {
        let older_than = Utc::now() - self.config.sync_window();
        let due = self.store.list_due_syncs(older_than, options.force).await?;

        let mut groups: BTreeMap<i64, Vec<DueSync>> = BTreeMap::new();
        for sync in due {
            if options.dataset_id.is_none_or(|id| id == sync.dataset_id) {
                groups.entry(sync.dataset_id).or_default().push(sync);
            }
        }

        tracing::info!(
            datasets = groups.len(),
            force = options.force,
            "Starting sync cycle"
        );

        let workers = self.config.workers.clamp(1, MAX_WORKERS);
        let summary = stream::iter(groups)
            .map(|(dataset_id, syncs)| self.run_dataset(dataset_id, syncs, options.force))
            .buffer_unordered(workers)
            .fold(CycleSummary::default(), |total, outcome| async move {
                total.merge(outcome)
            })
            .await;

        tracing::info!(
            datasets = summary.datasets,
            synced = summary.synced,
            unchanged = summary.unchanged,
            invalidated = summary.invalidated,
            failed = summary.failed,
            "Sync cycle finished"
        );

        Ok(summary)
    }

    async fn run_dataset(&self, dataset_id: i64, syncs: Vec<DueSync>, force: bool) -> CycleSummary {
        let mut summary = CycleSummary {
            datasets: 1,
            ..Default::default()
        };
        let Some(first) = syncs.first() else {
            return summary;
        };
        let src_uuid = first.src_dtable_uuid;

        let src_metadata = match self.rows.get_metadata(src_uuid).await {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::error!(dataset_id, %src_uuid, error = %e, "Failed to read source metadata");
                self.publish_failures(&syncs, UNKNOWN_ORG_ID, &SyncError::from(e));
                summary.failed = syncs.len();
                return summary;
            }
        };

        let located = src_metadata
            .table_by_id(&first.src_table_id)
            .map_err(|_| MissingEntity::SourceTable(first.src_table_id.clone()))
            .and_then(|table| {
                table
                    .view_by_id(&first.src_view_id)
                    .map(|view| (table, view))
                    .map_err(|_| MissingEntity::SourceView(first.src_view_id.clone()))
            });
        let (table, view) = match located {
            Ok(found) => found,
            Err(missing) => {
                tracing::warn!(dataset_id, %src_uuid, "{}, invalidating dataset syncs", missing);
                self.publish_failures(&syncs, UNKNOWN_ORG_ID, &SyncError::MissingEntity(missing));
                summary.invalidated = self.invalidate(&syncs).await;
                summary.failed = syncs.len() - summary.invalidated;
                return summary;
            }
        };

        let org_id = match self.store.org_id_for_dtable(src_uuid).await {
            Ok(org_id) => org_id.unwrap_or(UNKNOWN_ORG_ID),
            Err(e) => {
                tracing::error!(dataset_id, %src_uuid, error = %e, "Failed to look up organization");
                self.publish_failures(&syncs, UNKNOWN_ORG_ID, &SyncError::Transient(e.to_string()));
                summary.failed = syncs.len();
                return summary;
            }
        };

        let reader = SourceViewReader::new(self.query.as_ref(), self.compiler.as_ref(), self.limits);
        let mut snapshot: Option<Arc<SourceSnapshot>> = None;

        for (index, sync) in syncs.iter().enumerate() {
            let dst_metadata = match self.rows.get_metadata(sync.dst_dtable_uuid).await {
                Ok(metadata) => metadata,
                Err(e) => {
                    tracing::error!(
                        dataset_id,
                        sync_id = sync.sync_id,
                        dst_dtable_uuid = %sync.dst_dtable_uuid,
                        error = %e,
                        "Failed to read destination metadata"
                    );
                    self.executor.publish_failure(sync, org_id, &SyncError::from(e));
                    summary.failed += 1;
                    continue;
                }
            };

            if let Some(table_id) = &sync.dst_table_id {
                if dst_metadata.table_by_id(table_id).is_err() {
                    let missing = MissingEntity::DestinationTable(table_id.clone());
                    tracing::warn!(dataset_id, sync_id = sync.sync_id, "{}, invalidating sync", missing);
                    self.executor
                        .publish_failure(sync, org_id, &SyncError::MissingEntity(missing));
                    summary.invalidated += self.invalidate(std::slice::from_ref(sync)).await;
                    continue;
                }
            }

            if !force && sync.src_version == Some(src_metadata.version) {
                tracing::debug!(dataset_id, sync_id = sync.sync_id, "Source unchanged, skipping");
                summary.unchanged += 1;
                continue;
            }

            let source = match &snapshot {
                Some(source) => Arc::clone(source),
                None => match reader.read(src_uuid, table, view).await {
                    Ok(read) => {
                        let read = Arc::new(read);
                        snapshot = Some(Arc::clone(&read));
                        read
                    }
                    Err(e @ SyncError::BadFilter(_)) => {
                        tracing::warn!(dataset_id, error = %e, "Wrong filter in source view, invalidating dataset syncs");
                        self.publish_failures(&syncs[index..], org_id, &e);
                        let invalidated = self.invalidate(&syncs).await;
                        summary.invalidated += invalidated;
                        summary.failed += syncs.len().saturating_sub(invalidated);
                        return summary;
                    }
                    Err(e) => {
                        tracing::error!(dataset_id, error = %e, "Failed to read source view");
                        self.publish_failures(&syncs[index..], org_id, &e);
                        summary.failed += syncs.len() - index;
                        return summary;
                    }
                },
            };

            let outcome = self
                .sync_one(sync, org_id, &source, &dst_metadata, src_metadata.version)
                .await;
            match outcome {
                SyncOutcome::Synced => summary.synced += 1,
                SyncOutcome::Invalidated => summary.invalidated += 1,
                SyncOutcome::Failed => summary.failed += 1,
            }
        }

        summary
    }

    async fn sync_one(
        &self,
        sync: &DueSync,
        org_id: i64,
        source: &SourceSnapshot,
        destination: &Metadata,
        src_version: i64,
    ) -> SyncOutcome {
        let request = SyncRequest {
            sync,
            org_id,
            source,
            destination,
        };

        match self.executor.run(request).await {
            Ok(report) => {
                match self
                    .store
                    .mark_synced(sync.sync_id, &report.dst_table_id, src_version, Utc::now())
                    .await
                {
                    Ok(()) => SyncOutcome::Synced,
                    Err(e) => {
                        tracing::error!(sync_id = sync.sync_id, error = %e, "Failed to record sync");
                        SyncOutcome::Failed
                    }
                }
            }
            Err(SyncFailure {
                error,
                created_table_id,
            }) => {
                if let Some(table_id) = created_table_id {
                    self.keep_created_table(sync, &table_id).await;
                }
                self.handle_failure(sync, error).await
            }
        }
    }

    async fn handle_failure(&self, sync: &DueSync, e: SyncError) -> SyncOutcome {
        if !e.is_client_correctable() {
            tracing::error!(sync_id = sync.sync_id, error = %e, "Sync failed, retrying next cycle");
            return SyncOutcome::Failed;
        }

        tracing::warn!(
            sync_id = sync.sync_id,
            error_type = e.error_type(),
            error = %e,
            "Sync failed, invalidating"
        );
        if self.invalidate(std::slice::from_ref(sync)).await == 1 {
            SyncOutcome::Invalidated
        } else {
            SyncOutcome::Failed
        }
    }

    /// Bind an import's new table to the sync so the retry syncs into it
    async fn keep_created_table(&self, sync: &DueSync, table_id: &str) {
        match self.store.set_dst_table_id(sync.sync_id, table_id).await {
            Ok(()) => tracing::info!(
                sync_id = sync.sync_id,
                table_id,
                "Import stopped early, keeping its destination table"
            ),
            Err(e) => tracing::error!(
                sync_id = sync.sync_id,
                table_id,
                error = %e,
                "Failed to record destination table of interrupted import"
            ),
        }
    }

    fn publish_failures(&self, syncs: &[DueSync], org_id: i64, error: &SyncError) {
        for sync in syncs {
            self.executor.publish_failure(sync, org_id, error);
        }
    }

    /// Clear `is_valid` on the given syncs; returns how many were cleared
    async fn invalidate(&self, syncs: &[DueSync]) -> usize {
        let ids: Vec<i64> = syncs.iter().map(|sync| sync.sync_id).collect();
        match self.store.invalidate_syncs(&ids).await {
            Ok(count) => count as usize,
            Err(e) => {
                tracing::error!(sync_ids = ?ids, error = %e, "Failed to invalidate syncs");
                0
            }
        }
    }
}

enum SyncOutcome {
    Synced,
    Invalidated,
    Failed,
}
