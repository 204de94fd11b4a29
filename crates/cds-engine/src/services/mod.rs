//! Clients of the external row, query and filter services
//!
//! Each collaborator is a trait so the engine can be driven by in-memory
//! fakes in tests; the HTTP implementations talk to the real services.

pub mod endpoints;
pub mod filter_sql;
pub mod query_service;
pub mod row_service;

pub use filter_sql::{FilterCompiler, FilterError, SqlFilterCompiler, SqlFragments};
pub use query_service::{HttpQueryService, QueryResult, QueryService};
pub use row_service::{ColumnSpec, HttpRowService, RowService, RowUpdate};

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::ServiceConfig;
use crate::error::{QuotaKind, ServiceError, ServiceResult};

/// Shared HTTP plumbing of the service clients
#[derive(Clone)]
pub(crate) struct ServiceClient {
    client: Client,
    base_url: String,
    api_token: String,
}

/// Error body returned by the services on failure
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error_type: Option<String>,
    #[serde(alias = "error_message")]
    error_msg: Option<String>,
}

impl ServiceClient {
    pub(crate) fn new(config: &ServiceConfig) -> ServiceResult<Self> {
        let client = Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_token: config.api_token.clone(),
        })
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn request(&self, method: reqwest::Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .header(reqwest::header::AUTHORIZATION, format!("Token {}", self.api_token))
    }

    /// Send a request and decode its JSON body
    pub(crate) async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> ServiceResult<T> {
        let response = check_status(request.send().await?).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ServiceError::Decode(e.to_string()))
    }

    /// Send a request whose response body is not needed
    pub(crate) async fn send(&self, request: RequestBuilder) -> ServiceResult<()> {
        check_status(request.send().await?).await?;
        Ok(())
    }
}

async fn check_status(response: Response) -> ServiceResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(classify_failure(status.as_u16(), body))
}

/// Quota failures carry a distinguished `error_type`; everything else is a
/// plain status error
fn classify_failure(status: u16, body: String) -> ServiceError {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(&body) {
        if let Some(kind) = parsed.error_type.as_deref().and_then(QuotaKind::parse) {
            return ServiceError::BaseExceeds {
                kind,
                message: parsed.error_msg.unwrap_or_default(),
            };
        }
    }

    ServiceError::Status { status, body }
}
