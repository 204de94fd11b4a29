//! Paged reads of a source view through the query service

use std::collections::HashMap;

use futures::{stream, Stream, TryStreamExt};
use uuid::Uuid;

use cds_common::types::{row_id, Column, Row, Table, View, ROW_ID_KEY};

use crate::config::SyncLimits;
use crate::error::{ServiceResult, SyncError};
use crate::services::filter_sql::{quote_ident, FilterCompiler, FilterError};
use crate::services::QueryService;

/// Rows of a source view, read once and shared by every destination of a
/// dataset
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceSnapshot {
    pub table_name: String,
    /// Columns the view shows, in table order
    pub columns: Vec<Column>,
    /// Row ids in view order, without duplicates
    pub row_ids: Vec<String>,
    pub rows: HashMap<String, Row>,
}

impl SourceSnapshot {
    pub fn row(&self, row_id: &str) -> Option<&Row> {
        self.rows.get(row_id)
    }

    pub fn len(&self) -> usize {
        self.row_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row_ids.is_empty()
    }
}

/// Lazy sequence of query result pages
///
/// Each page requests at most `page_size` rows and never reads past `cap`.
/// The sequence ends after a short page or once `cap` rows were read.
pub fn row_pages<'a>(
    query: &'a dyn QueryService,
    dtable_uuid: Uuid,
    base_sql: String,
    page_size: usize,
    cap: usize,
) -> impl Stream<Item = ServiceResult<Vec<Row>>> + Send + 'a {
    stream::try_unfold(Some(0usize), move |offset| {
        let sql = offset.map(|offset| {
            let limit = page_size.min(cap.saturating_sub(offset));
            (offset, limit, format!("{} LIMIT {}, {}", base_sql, offset, limit))
        });

        async move {
            let Some((offset, limit, sql)) = sql else {
                return Ok(None);
            };
            if limit == 0 {
                return Ok(None);
            }

            let page = query.query(dtable_uuid, &sql, false, true).await?.rows;
            if page.is_empty() {
                return Ok(None);
            }

            let next = offset + page.len();
            let next_offset = (page.len() >= limit && next < cap).then_some(next);
            Ok(Some((page, next_offset)))
        }
    })
}

/// Reads the visible columns and rows of a view, in view order
pub struct SourceViewReader<'a> {
    query: &'a dyn QueryService,
    compiler: &'a dyn FilterCompiler,
    limits: SyncLimits,
}

impl<'a> SourceViewReader<'a> {
    pub fn new(
        query: &'a dyn QueryService,
        compiler: &'a dyn FilterCompiler,
        limits: SyncLimits,
    ) -> Self {
        Self {
            query,
            compiler,
            limits,
        }
    }

    /// The query without its `LIMIT` part
    pub fn view_sql(&self, table: &Table, view: &View) -> Result<String, SyncError> {
        let fragments = self
            .compiler
            .compile(&table.name, &table.columns, view)
            .map_err(|e| match e {
                FilterError::WrongFilter(msg) => SyncError::BadFilter(msg),
                FilterError::Internal(msg) => SyncError::Transient(msg),
            })?;

        let mut fields = vec![quote_ident(ROW_ID_KEY)];
        fields.extend(
            table
                .visible_columns(view)
                .iter()
                .map(|column| quote_ident(&column.name)),
        );

        let mut sql = format!(
            "SELECT {} FROM {}",
            fields.join(", "),
            quote_ident(&table.name)
        );
        for part in [fragments.where_clause, fragments.order_clause] {
            if !part.is_empty() {
                sql.push(' ');
                sql.push_str(&part);
            }
        }

        Ok(sql)
    }

    pub async fn read(
        &self,
        dtable_uuid: Uuid,
        table: &Table,
        view: &View,
    ) -> Result<SourceSnapshot, SyncError> {
        let sql = self.view_sql(table, view)?;

        let mut snapshot = SourceSnapshot {
            table_name: table.name.clone(),
            columns: table.visible_columns(view),
            ..Default::default()
        };

        let pages = row_pages(
            self.query,
            dtable_uuid,
            sql,
            self.limits.page_size,
            self.limits.src_rows_limit,
        );
        futures::pin_mut!(pages);

        while let Some(page) = pages.try_next().await? {
            for row in page {
                let Some(id) = row_id(&row).map(str::to_string) else {
                    continue;
                };
                if !snapshot.rows.contains_key(&id) {
                    snapshot.row_ids.push(id.clone());
                    snapshot.rows.insert(id, row);
                }
            }
        }

        tracing::debug!(
            %dtable_uuid,
            table = %table.name,
            view = %view.name,
            rows = snapshot.len(),
            "Read source view"
        );

        Ok(snapshot)
    }
}
