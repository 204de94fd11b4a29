//! Bounded collector of row-level coercion warnings

use serde::Serialize;
use uuid::Uuid;

use super::coercer::InvalidCellInfo;

/// Invalid cells of one row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowWarning {
    pub row_id: String,
    pub invalid_cells: Vec<InvalidCellInfo>,
}

/// Keeps the first `capacity` row warnings and counts the rest
#[derive(Debug, Clone)]
pub struct BoundedWarnings {
    capacity: usize,
    rows: Vec<RowWarning>,
    dropped: usize,
}

impl BoundedWarnings {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            rows: Vec::new(),
            dropped: 0,
        }
    }

    /// Record the invalid cells of a row; rows without any are ignored
    pub fn push(&mut self, row_id: &str, invalid_cells: Vec<InvalidCellInfo>) {
        if invalid_cells.is_empty() {
            return;
        }
        if self.rows.len() < self.capacity {
            self.rows.push(RowWarning {
                row_id: row_id.to_string(),
                invalid_cells,
            });
        } else {
            self.dropped += 1;
        }
    }

    pub fn rows(&self) -> &[RowWarning] {
        &self.rows
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.dropped == 0
    }

    /// Emit every retained warning in a single log line
    pub fn log_summary(&self, dst_dtable_uuid: Uuid, src_view_id: &str) {
        if self.is_empty() {
            return;
        }

        let rows = serde_json::to_string(&self.rows).unwrap_or_default();
        tracing::warn!(
            %dst_dtable_uuid,
            src_view_id,
            retained = self.rows.len(),
            dropped = self.dropped,
            rows = %rows,
            "dst_dtable_uuid {} src_view_id {} some invalid cells warnings",
            dst_dtable_uuid,
            src_view_id
        );
    }
}
