//! CDS Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared data model, error type and logging bootstrap for the common dataset
//! synchronization engine.
//!
//! # Overview
//!
//! - **Types**: bases, tables, columns, views and rows as the row service
//!   describes them
//! - **Error Handling**: model lookup and (de)serialization errors
//! - **Logging**: `tracing` subscriber setup shared by every binary
//!
//! # Example
//!
//! ```no_run
//! use cds_common::types::Metadata;
//! use cds_common::Result;
//!
//! fn first_table_name(raw: &str) -> Result<String> {
//!     let metadata: Metadata = serde_json::from_str(raw)?;
//!     let table = metadata.table_by_id("0000")?;
//!     Ok(table.name.clone())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{CdsError, Result};
