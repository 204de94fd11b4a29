//! Engine error types
//!
//! [`ServiceError`] describes what went wrong talking to the row or query
//! service. [`SyncError`] is the classified outcome of one sync, which the
//! scheduler matches on to decide between invalidating the sync and retrying
//! it next cycle.

use thiserror::Error;

/// Result type alias for row and query service calls
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Quota a destination base ran into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaKind {
    BaseExceedsLimit,
    ExceedColumnsLimit,
    ExceedRowsLimit,
}

impl QuotaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            QuotaKind::BaseExceedsLimit => "base_exceeds_limit",
            QuotaKind::ExceedColumnsLimit => "exceed_columns_limit",
            QuotaKind::ExceedRowsLimit => "exceed_rows_limit",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "base_exceeds_limit" => Some(QuotaKind::BaseExceedsLimit),
            "exceed_columns_limit" => Some(QuotaKind::ExceedColumnsLimit),
            "exceed_rows_limit" => Some(QuotaKind::ExceedRowsLimit),
            _ => None,
        }
    }
}

impl std::fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row or query service failure
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Service responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("{kind}: {message}")]
    BaseExceeds { kind: QuotaKind, message: String },
}

/// Entity whose absence stops a sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissingEntity {
    SourceTable(String),
    SourceView(String),
    DestinationTable(String),
}

impl std::fmt::Display for MissingEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MissingEntity::SourceTable(id) => write!(f, "source table {} not found", id),
            MissingEntity::SourceView(id) => write!(f, "source view {} not found", id),
            MissingEntity::DestinationTable(id) => write!(f, "destination table {} not found", id),
        }
    }
}

/// Classified failure of one sync
#[derive(Error, Debug)]
pub enum SyncError {
    /// Schema planning failed, e.g. a column name already taken under another key
    #[error("Failed to generate synced columns: {0}")]
    Planning(String),

    #[error("Destination quota exceeded ({kind}): {message}")]
    Quota { kind: QuotaKind, message: String },

    #[error("Wrong filter in filters: {0}")]
    BadFilter(String),

    #[error("{0}")]
    MissingEntity(MissingEntity),

    /// Service outage, timeout or unexpected response; retried next cycle
    #[error("Transient failure: {0}")]
    Transient(String),
}

impl SyncError {
    /// Client-correctable errors permanently invalidate the sync
    pub fn is_client_correctable(&self) -> bool {
        !matches!(self, SyncError::Transient(_))
    }

    /// Wire name of the error class
    pub fn error_type(&self) -> &'static str {
        match self {
            SyncError::Planning(_) => "generate_synced_columns_error",
            SyncError::Quota { kind, .. } => kind.as_str(),
            SyncError::BadFilter(_) => "wrong_filter_in_filters",
            SyncError::MissingEntity(_) => "missing_entity",
            SyncError::Transient(_) => "internal_error",
        }
    }
}

impl From<ServiceError> for SyncError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::BaseExceeds { kind, message } => SyncError::Quota { kind, message },
            other => SyncError::Transient(other.to_string()),
        }
    }
}
