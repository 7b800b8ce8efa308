/// Crawl progress reporting: lightweight messages sent from crawl workers
/// to whoever holds the [`CrawlHandle`](super::CrawlHandle).
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Outcome of one crawl, returned by `crawl` and carried by the final
/// progress message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlReport {
    pub roots: Vec<PathBuf>,
    /// Entries written to the store (files plus directories, roots included).
    pub items_indexed: u64,
    pub files_indexed: u64,
    pub dirs_indexed: u64,
    /// Sum of the sizes of the files indexed.
    pub bytes_indexed: u64,
    /// Per-entry OS errors that were counted and skipped.
    pub errors_skipped: u64,
    pub elapsed: Duration,
    /// True only when the crawl stopped with directories left unread.
    pub cancelled: bool,
}

/// Progress updates sent from the crawl to the caller.
///
/// The channel is bounded and sends never block: when the receiver falls
/// behind, `Update` and `Error` messages are dropped.
#[derive(Debug, Clone)]
pub enum CrawlProgress {
    Started {
        roots: Vec<PathBuf>,
    },
    /// Periodic running totals.
    Update {
        items_indexed: u64,
        files: u64,
        dirs: u64,
        current_path: String,
    },
    /// A non-fatal error (e.g. permission denied on one directory).
    Error {
        path: String,
        message: String,
    },
    Complete(CrawlReport),
    Cancelled(CrawlReport),
}
