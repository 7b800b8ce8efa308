/// Crawler: walks filesystem roots into the entry store.
///
/// [`crawl`] runs on the calling thread and returns when every root has
/// been walked, the token is cancelled or the store fails.
/// [`start_crawl`] runs the same crawl on a background thread and hands
/// back a [`CrawlHandle`] for progress and cancellation.
///
/// Directories are indexed with `size = 0` and `size_calculated = false`;
/// measuring them is the lazy aggregator's job. Re-crawling a root
/// replaces existing rows by path and never evicts rows for objects that
/// disappeared.
pub mod cancel;
pub mod pool;
pub mod progress;
pub mod walk;

pub use cancel::CancelToken;
pub use progress::{CrawlProgress, CrawlReport};

use crate::config::{default_concurrency, DEFAULT_BATCH_SIZE, DEFAULT_PROGRESS_INTERVAL};
use crate::error::{IndexError, Result};
use crate::store::EntryStore;
use crossbeam_channel::{Receiver, Sender};
use pool::Crawl;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::info;

/// Maximum number of progress messages that may queue up in the channel.
///
/// Workers use `try_send`, so a receiver that stops draining costs dropped
/// updates, never a stalled crawl.
pub const PROGRESS_CHANNEL_CAPACITY: usize = 4_096;

/// Tuning knobs for one crawl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlOptions {
    /// Number of worker threads.
    pub concurrency: usize,
    /// Entries buffered per worker before a store transaction.
    pub batch_size: usize,
    /// Items between two `CrawlProgress::Update` messages.
    pub progress_interval: u64,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            batch_size: DEFAULT_BATCH_SIZE,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

impl CrawlOptions {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

/// Handle to a running or completed background crawl.
pub struct CrawlHandle {
    /// Receiver for progress updates from the crawl.
    pub progress_rx: Receiver<CrawlProgress>,
    cancel: CancelToken,
    thread: thread::JoinHandle<Result<CrawlReport>>,
}

impl CrawlHandle {
    /// Request the crawl to stop as soon as possible.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// A clone of the token, for cancelling from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Block until the crawl ends and return its report.
    pub fn wait(self) -> Result<CrawlReport> {
        self.thread
            .join()
            .map_err(|_| IndexError::Worker("crawl thread panicked".into()))?
    }
}

/// Crawl `roots` into `store` on the calling thread.
pub fn crawl(
    store: &EntryStore,
    roots: &[PathBuf],
    options: &CrawlOptions,
    cancel: &CancelToken,
) -> Result<CrawlReport> {
    // Nobody listens; every try_send fails fast.
    let (progress_tx, _) = crossbeam_channel::bounded(1);
    run(store, roots, options, cancel, &progress_tx)
}

/// Start a crawl on a background thread.
pub fn start_crawl(
    store: Arc<EntryStore>,
    roots: Vec<PathBuf>,
    options: CrawlOptions,
) -> Result<CrawlHandle> {
    let (progress_tx, progress_rx) =
        crossbeam_channel::bounded::<CrawlProgress>(PROGRESS_CHANNEL_CAPACITY);
    let cancel = CancelToken::new();
    let cancel_clone = cancel.clone();

    let thread = thread::Builder::new()
        .name("diskdex-crawler".into())
        .spawn(move || run(&store, &roots, &options, &cancel_clone, &progress_tx))
        .map_err(|e| IndexError::Worker(format!("failed to spawn crawler thread: {e}")))?;

    Ok(CrawlHandle {
        progress_rx,
        cancel,
        thread,
    })
}

fn run(
    store: &EntryStore,
    roots: &[PathBuf],
    options: &CrawlOptions,
    cancel: &CancelToken,
    progress_tx: &Sender<CrawlProgress>,
) -> Result<CrawlReport> {
    let started = Instant::now();
    let roots: Vec<PathBuf> = roots.iter().map(|r| normalize_root(r)).collect();
    info!(
        "Starting crawl of {} root(s) with {} workers",
        roots.len(),
        options.concurrency
    );
    let _ = progress_tx.try_send(CrawlProgress::Started {
        roots: roots.clone(),
    });

    let crawl = Crawl::new(store, options, cancel, progress_tx);
    crawl.seed(&roots);
    crawl.run_workers();
    let report = crawl.finish(&roots, started)?;

    store.record_crawl(&report)?;
    let last = if report.cancelled {
        CrawlProgress::Cancelled(report.clone())
    } else {
        CrawlProgress::Complete(report.clone())
    };
    let _ = progress_tx.try_send(last);
    Ok(report)
}

/// Relative roots are resolved against the working directory so stored keys
/// are always absolute. Rebuilding from components drops trailing
/// separators and `.` segments; `link/` would otherwise stat the link's
/// target and key its rows under a second spelling of the same path.
fn normalize_root(root: &std::path::Path) -> PathBuf {
    std::path::absolute(root)
        .unwrap_or_else(|_| root.to_path_buf())
        .components()
        .collect()
}
