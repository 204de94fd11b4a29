//! Row service client
//!
//! The row service owns base metadata and every row or column mutation. The
//! engine only needs the handful of batch operations below.

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use cds_common::types::{Column, Metadata, Row};

use super::{endpoints, ServiceClient};
use crate::config::ServiceConfig;
use crate::error::ServiceResult;

/// Column descriptor as the row service accepts it on writes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub column_key: String,
    pub column_name: String,
    pub column_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_data: Option<Map<String, Value>>,
}

impl From<&Column> for ColumnSpec {
    fn from(column: &Column) -> Self {
        Self {
            column_key: column.key.clone(),
            column_name: column.name.clone(),
            column_type: column.column_type.to_string(),
            column_data: column.data.clone(),
        }
    }
}

/// Partial update of one row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowUpdate {
    pub row_id: String,
    pub row: Row,
}

#[async_trait]
pub trait RowService: Send + Sync {
    async fn get_metadata(&self, dtable_uuid: Uuid) -> ServiceResult<Metadata>;

    /// Create a table and return its id
    async fn add_table(
        &self,
        dtable_uuid: Uuid,
        table_name: &str,
        lang: &str,
        columns: &[Column],
    ) -> ServiceResult<String>;

    async fn batch_append_columns_by_table_id(
        &self,
        dtable_uuid: Uuid,
        table_id: &str,
        columns: &[Column],
    ) -> ServiceResult<()>;

    async fn batch_update_columns_by_table_id(
        &self,
        dtable_uuid: Uuid,
        table_id: &str,
        columns: &[Column],
    ) -> ServiceResult<()>;

    async fn batch_append_rows(
        &self,
        dtable_uuid: Uuid,
        table_name: &str,
        rows: &[Row],
    ) -> ServiceResult<()>;

    async fn batch_update_rows(
        &self,
        dtable_uuid: Uuid,
        table_name: &str,
        updates: &[RowUpdate],
    ) -> ServiceResult<()>;

    async fn batch_delete_rows(
        &self,
        dtable_uuid: Uuid,
        table_name: &str,
        row_ids: &[String],
    ) -> ServiceResult<()>;
}

#[derive(Deserialize)]
struct MetadataResponse {
    metadata: Metadata,
}

#[derive(Deserialize)]
struct AddTableResponse {
    #[serde(rename = "_id")]
    id: String,
}

/// [`RowService`] over HTTP
#[derive(Clone)]
pub struct HttpRowService {
    client: ServiceClient,
}

impl HttpRowService {
    pub fn new(config: &ServiceConfig) -> ServiceResult<Self> {
        Ok(Self {
            client: ServiceClient::new(config)?,
        })
    }

    fn column_specs(columns: &[Column]) -> Vec<ColumnSpec> {
        columns.iter().map(ColumnSpec::from).collect()
    }
}

#[async_trait]
impl RowService for HttpRowService {
    async fn get_metadata(&self, dtable_uuid: Uuid) -> ServiceResult<Metadata> {
        let url = endpoints::metadata_url(self.client.base_url(), dtable_uuid);
        let response: MetadataResponse = self
            .client
            .send_json(self.client.request(Method::GET, &url))
            .await?;

        Ok(response.metadata)
    }

    async fn add_table(
        &self,
        dtable_uuid: Uuid,
        table_name: &str,
        lang: &str,
        columns: &[Column],
    ) -> ServiceResult<String> {
        let url = endpoints::tables_url(self.client.base_url(), dtable_uuid);
        let body = json!({
            "table_name": table_name,
            "lang": lang,
            "columns": Self::column_specs(columns),
        });

        let response: AddTableResponse = self
            .client
            .send_json(self.client.request(Method::POST, &url).json(&body))
            .await?;

        tracing::debug!(%dtable_uuid, table_name, table_id = %response.id, "Created table");
        Ok(response.id)
    }

    async fn batch_append_columns_by_table_id(
        &self,
        dtable_uuid: Uuid,
        table_id: &str,
        columns: &[Column],
    ) -> ServiceResult<()> {
        let url = endpoints::batch_append_columns_url(self.client.base_url(), dtable_uuid);
        let body = json!({
            "table_id": table_id,
            "columns": Self::column_specs(columns),
        });

        self.client
            .send(self.client.request(Method::POST, &url).json(&body))
            .await
    }

    async fn batch_update_columns_by_table_id(
        &self,
        dtable_uuid: Uuid,
        table_id: &str,
        columns: &[Column],
    ) -> ServiceResult<()> {
        let url = endpoints::batch_update_columns_url(self.client.base_url(), dtable_uuid);
        let body = json!({
            "table_id": table_id,
            "columns": Self::column_specs(columns),
        });

        self.client
            .send(self.client.request(Method::PUT, &url).json(&body))
            .await
    }

    async fn batch_append_rows(
        &self,
        dtable_uuid: Uuid,
        table_name: &str,
        rows: &[Row],
    ) -> ServiceResult<()> {
        let url = endpoints::batch_append_rows_url(self.client.base_url(), dtable_uuid);
        let body = json!({
            "table_name": table_name,
            "rows": rows,
            "need_convert_back": false,
        });

        self.client
            .send(self.client.request(Method::POST, &url).json(&body))
            .await
    }

    async fn batch_update_rows(
        &self,
        dtable_uuid: Uuid,
        table_name: &str,
        updates: &[RowUpdate],
    ) -> ServiceResult<()> {
        let url = endpoints::batch_update_rows_url(self.client.base_url(), dtable_uuid);
        let body = json!({
            "table_name": table_name,
            "updates": updates,
            "need_convert_back": false,
        });

        self.client
            .send(self.client.request(Method::PUT, &url).json(&body))
            .await
    }

    async fn batch_delete_rows(
        &self,
        dtable_uuid: Uuid,
        table_name: &str,
        row_ids: &[String],
    ) -> ServiceResult<()> {
        let url = endpoints::batch_delete_rows_url(self.client.base_url(), dtable_uuid);
        let body = json!({
            "table_name": table_name,
            "row_ids": row_ids,
        });

        self.client
            .send(self.client.request(Method::DELETE, &url).json(&body))
            .await
    }
}
