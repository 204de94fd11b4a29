//! Query service client

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use cds_common::types::Row;

use super::{endpoints, ServiceClient};
use crate::config::ServiceConfig;
use crate::error::{ServiceError, ServiceResult};

/// Rows and column metadata of one query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    pub metadata: Vec<Value>,
}

/// SQL-like access to a base's rows
///
/// With `convert = false` cells come back raw and keyed by column key, which
/// is what the sync engine diffs against.
#[async_trait]
pub trait QueryService: Send + Sync {
    async fn query(
        &self,
        dtable_uuid: Uuid,
        sql: &str,
        convert: bool,
        server_only: bool,
    ) -> ServiceResult<QueryResult>;
}

#[derive(Deserialize)]
struct QueryResponse {
    success: bool,
    #[serde(default)]
    results: Vec<Row>,
    #[serde(default)]
    metadata: Vec<Value>,
    #[serde(default)]
    error_message: Option<String>,
}

/// [`QueryService`] over HTTP
#[derive(Clone)]
pub struct HttpQueryService {
    client: ServiceClient,
}

impl HttpQueryService {
    pub fn new(config: &ServiceConfig) -> ServiceResult<Self> {
        Ok(Self {
            client: ServiceClient::new(config)?,
        })
    }
}

#[async_trait]
impl QueryService for HttpQueryService {
    async fn query(
        &self,
        dtable_uuid: Uuid,
        sql: &str,
        convert: bool,
        server_only: bool,
    ) -> ServiceResult<QueryResult> {
        let url = endpoints::query_url(self.client.base_url(), dtable_uuid);
        let body = json!({
            "sql": sql,
            "convert_keys": convert,
            "server_only": server_only,
        });

        tracing::trace!(%dtable_uuid, sql, "Running query");

        let response: QueryResponse = self
            .client
            .send_json(self.client.request(Method::POST, &url).json(&body))
            .await?;

        if !response.success {
            return Err(ServiceError::Status {
                status: 200,
                body: response
                    .error_message
                    .unwrap_or_else(|| "query was not successful".to_string()),
            });
        }

        Ok(QueryResult {
            rows: response.results,
            metadata: response.metadata,
        })
    }
}
