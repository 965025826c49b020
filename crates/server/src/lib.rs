//! PIM sync daemon
//!
//! Reads change events from the export feed and hands them to the storage
//! engine; schema headers are applied once at startup.

pub mod feed;
pub mod headers;
pub mod exporter;

pub use feed::{apply_event, run_feed, FeedStats};
pub use headers::apply_header_file;
pub use exporter::init_metrics;

use thiserror::Error;

/// Daemon errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Header file error: {0}")]
    Headers(String),

    #[error("Feed error: {0}")]
    Feed(String),

    #[error("Metrics exporter error: {0}")]
    Metrics(String),

    #[error(transparent)]
    Persistence(#[from] pim_sync_persistence::PersistenceError),
}
