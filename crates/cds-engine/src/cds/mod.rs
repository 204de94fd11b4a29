//! Common dataset sync
//!
//! The pipeline of one sync, bottom-up:
//!
//! - [`type_resolver`] translates source columns into destination columns
//! - [`schema_planner`] diffs the translated columns against the destination
//! - [`source_reader`] pages the source view through the query service
//! - [`coercer`] converts each cell and reports the ones it had to drop
//! - [`differ`] matches rows by id and builds minimal updates
//! - [`executor`] applies schema and row changes to the destination
//! - [`scheduler`] selects due syncs and runs them dataset by dataset

pub mod coercer;
pub mod differ;
pub mod executor;
pub mod scheduler;
pub mod schema_planner;
pub mod source_reader;
pub mod stats;
pub mod type_resolver;
pub mod warnings;

pub use executor::{SyncExecutor, SyncFailure, SyncReport, SyncRequest};
pub use scheduler::{CdsScheduler, CycleOptions, CycleSummary};
pub use source_reader::{SourceSnapshot, SourceViewReader};
pub use stats::{CdsStatsRecord, MpscStatsChannel, StatsChannel, TracingStatsChannel};
