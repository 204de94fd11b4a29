//! CDS Engine
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Keeps destination tables in sync with a shared source view. A *dataset* is
//! a view published from one base; every *sync* copies that view into a table
//! of another base, creating the table on first run and reconciling columns
//! and rows on every later run.
//!
//! # Modules
//!
//! - [`cds`]: the sync pipeline and the cycle scheduler
//! - [`services`]: row, query and filter service clients
//! - [`db`]: the persistence store holding datasets and syncs
//! - [`config`]: environment driven configuration
//! - [`error`]: service and sync error classification

pub mod cds;
pub mod config;
pub mod db;
pub mod error;
pub mod services;

pub use config::EngineConfig;
pub use error::{ServiceError, SyncError};
