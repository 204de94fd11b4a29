//! Configuration management

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Defaults
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/cds";

pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;

pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

pub const DEFAULT_ROW_SERVICE_URL: &str = "http://127.0.0.1:5000";

pub const DEFAULT_QUERY_SERVICE_URL: &str = "http://127.0.0.1:7777";

/// Default request timeout for both services (5 minutes).
pub const DEFAULT_SERVICE_TIMEOUT_SECS: u64 = 300;

/// Maximum number of source rows read from one view.
pub const SRC_ROWS_LIMIT: usize = 50_000;

/// Rows per append or update request.
pub const INSERT_UPDATE_ROWS_LIMIT: usize = 1_000;

/// Row ids per delete request.
pub const DELETE_ROWS_LIMIT: usize = 10_000;

/// Row-level warning records kept per sync.
pub const INVALID_WARNING_ROWS: usize = 10;

/// Rows per query service page.
pub const DEFAULT_PAGE_SIZE: usize = 10_000;

/// Hourly, on the hour (seconds field first).
pub const DEFAULT_SCHEDULE: &str = "0 0 * * * *";

/// Syncs younger than this are not due.
pub const DEFAULT_SYNC_WINDOW_HOURS: i64 = 23;

pub const DEFAULT_WORKERS: usize = 5;

pub const MAX_WORKERS: usize = 32;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub database: DatabaseConfig,
    pub row_service: ServiceConfig,
    pub query_service: ServiceConfig,
    pub limits: SyncLimits,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// Endpoint of the row service or the query service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub base_url: String,
    pub api_token: String,
    pub timeout_secs: u64,
}

impl ServiceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Paging and batching limits of one sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncLimits {
    pub src_rows_limit: usize,
    pub insert_update_rows_limit: usize,
    pub delete_rows_limit: usize,
    pub invalid_warning_rows: usize,
    pub page_size: usize,
}

impl Default for SyncLimits {
    fn default() -> Self {
        Self {
            src_rows_limit: SRC_ROWS_LIMIT,
            insert_update_rows_limit: INSERT_UPDATE_ROWS_LIMIT,
            delete_rows_limit: DELETE_ROWS_LIMIT,
            invalid_warning_rows: INVALID_WARNING_ROWS,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Cron expression with a leading seconds field
    pub schedule: String,
    pub sync_window_hours: i64,
    pub workers: usize,
    /// Language passed to the row service when creating tables
    pub lang: String,
    /// Recorded as `operator` in statistics
    pub operator: String,
    pub run_migrations: bool,
}

impl SchedulerConfig {
    pub fn sync_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.sync_window_hours)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: DEFAULT_SCHEDULE.to_string(),
            sync_window_hours: DEFAULT_SYNC_WINDOW_HOURS,
            workers: DEFAULT_WORKERS,
            lang: "en".to_string(),
            operator: "cds-scheduler".to_string(),
            run_migrations: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from `.env`, the environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_vars(|name| std::env::var(name).ok());
        config.validate()?;

        Ok(config)
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let service = |prefix: &str, default_url: &str| ServiceConfig {
            base_url: var(&format!("{}_URL", prefix)).unwrap_or_else(|| default_url.to_string()),
            api_token: var(&format!("{}_TOKEN", prefix)).unwrap_or_default(),
            timeout_secs: parse_or(
                var(&format!("{}_TIMEOUT_SECS", prefix)),
                DEFAULT_SERVICE_TIMEOUT_SECS,
            ),
        };

        let defaults = SchedulerConfig::default();

        Self {
            database: DatabaseConfig {
                url: var("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
                max_connections: parse_or(
                    var("DATABASE_MAX_CONNECTIONS"),
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                ),
                min_connections: parse_or(
                    var("DATABASE_MIN_CONNECTIONS"),
                    DEFAULT_DATABASE_MIN_CONNECTIONS,
                ),
                connect_timeout_secs: parse_or(
                    var("DATABASE_CONNECT_TIMEOUT"),
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
                idle_timeout_secs: parse_or(
                    var("DATABASE_IDLE_TIMEOUT"),
                    DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
                ),
            },
            row_service: service("CDS_ROW_SERVICE", DEFAULT_ROW_SERVICE_URL),
            query_service: service("CDS_QUERY_SERVICE", DEFAULT_QUERY_SERVICE_URL),
            limits: SyncLimits {
                src_rows_limit: parse_or(var("CDS_SRC_ROWS_LIMIT"), SRC_ROWS_LIMIT),
                insert_update_rows_limit: parse_or(
                    var("CDS_INSERT_UPDATE_ROWS_LIMIT"),
                    INSERT_UPDATE_ROWS_LIMIT,
                ),
                delete_rows_limit: parse_or(var("CDS_DELETE_ROWS_LIMIT"), DELETE_ROWS_LIMIT),
                invalid_warning_rows: parse_or(var("CDS_INVALID_WARNING_ROWS"), INVALID_WARNING_ROWS),
                page_size: parse_or(var("CDS_PAGE_SIZE"), DEFAULT_PAGE_SIZE),
            },
            scheduler: SchedulerConfig {
                enabled: parse_or(var("CDS_SCHEDULER_ENABLED"), defaults.enabled),
                schedule: var("CDS_SCHEDULE").unwrap_or(defaults.schedule),
                sync_window_hours: parse_or(var("CDS_SYNC_WINDOW_HOURS"), defaults.sync_window_hours),
                workers: parse_or(var("CDS_WORKERS"), defaults.workers),
                lang: var("CDS_LANG").unwrap_or(defaults.lang),
                operator: var("CDS_OPERATOR").unwrap_or(defaults.operator),
                run_migrations: parse_or(var("CDS_RUN_MIGRATIONS"), defaults.run_migrations),
            },
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        for (name, service) in [("row", &self.row_service), ("query", &self.query_service)] {
            if service.base_url.is_empty() {
                anyhow::bail!("The {} service URL cannot be empty", name);
            }
            if service.timeout_secs == 0 {
                anyhow::bail!("The {} service timeout must be greater than 0", name);
            }
        }

        let limits = &self.limits;
        for (name, value) in [
            ("CDS_SRC_ROWS_LIMIT", limits.src_rows_limit),
            ("CDS_INSERT_UPDATE_ROWS_LIMIT", limits.insert_update_rows_limit),
            ("CDS_DELETE_ROWS_LIMIT", limits.delete_rows_limit),
            ("CDS_PAGE_SIZE", limits.page_size),
        ] {
            if value == 0 {
                anyhow::bail!("{} must be greater than 0", name);
            }
        }

        if !(1..=MAX_WORKERS).contains(&self.scheduler.workers) {
            anyhow::bail!(
                "CDS_WORKERS must be between 1 and {}, got {}",
                MAX_WORKERS,
                self.scheduler.workers
            );
        }

        if self.scheduler.sync_window_hours < 0 {
            anyhow::bail!("CDS_SYNC_WINDOW_HOURS cannot be negative");
        }

        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_vars(|_| None)
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}
