//! Transform & load core of a star-schema warehouse for Vietnamese listed stocks.
//!
//! Provider frames come in through an [`extract::Extractor`]; they are validated against
//! their declared [`schema`] mappings, reshaped into dimension ([`dimension`], [`time`]) and
//! fact ([`fact`]) rows, and written to Postgres by [`load`], one transaction per table.
//! [`pipeline`] strings the stages together for the quarterly and daily runs.

pub mod config;
pub mod dimension;
pub mod error;
pub mod extract;
pub mod fact;
pub mod frame;
pub mod fs;
pub mod key_tracker;
pub mod keys;
pub mod load;
pub mod pipeline;
pub mod schema;
pub(crate) mod sql;
pub mod time;
pub mod warehouse;

pub use config::Config;
pub use error::{EtlError, Result};
pub use frame::{Frame, Label};
pub use pipeline::{PipelineOutcome, PipelineReport};
pub use warehouse::Warehouse;

/// Shortcut for the database handles.
pub mod db {
    pub use deadpool_postgres::Pool;
    pub use tokio_postgres::Client as PgClient;
}

/// Render the time since `start` for a log line, e.g. `"time elapsed: 1.52s"`.
pub(crate) fn time_elapsed(start: std::time::Instant) -> String {
    format!("time elapsed: {:.2?}", start.elapsed())
}
