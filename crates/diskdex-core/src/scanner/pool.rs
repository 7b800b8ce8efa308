/// Bounded crawl worker pool.
///
/// A fixed number of workers share one unbounded queue of directories.
/// Each worker pops a directory, reads it, upserts every child and pushes
/// subdirectories back onto the queue. An in-flight counter tracks
/// directories that are queued or being read; the crawl is over when it
/// drops to zero.
///
/// # Batching
///
/// Upserting row by row costs one SQLite transaction per entry. Instead each
/// worker buffers children locally and flushes them under a single
/// transaction every `batch_size` entries, and once more before it exits.
/// Counters are advanced at flush time, so a report always matches what
/// actually reached the store.
use super::cancel::CancelToken;
use super::progress::{CrawlProgress, CrawlReport};
use super::walk;
use super::CrawlOptions;
use crate::error::{IndexError, Result};
use crate::model::Entry;
use crate::store::EntryStore;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How long an idle worker waits on the queue before re-checking the
/// in-flight counter and the cancel token.
const IDLE_POLL: Duration = Duration::from_millis(20);

#[derive(Default)]
struct Counters {
    items: AtomicU64,
    files: AtomicU64,
    dirs: AtomicU64,
    bytes: AtomicU64,
    errors: AtomicU64,
}

/// State shared by every worker of one crawl.
pub(crate) struct Crawl<'a> {
    store: &'a EntryStore,
    options: &'a CrawlOptions,
    cancel: &'a CancelToken,
    progress: &'a Sender<CrawlProgress>,
    queue_tx: Sender<PathBuf>,
    queue_rx: Receiver<PathBuf>,
    in_flight: AtomicUsize,
    /// Set when a directory was abandoned part way through.
    interrupted: AtomicBool,
    counters: Counters,
    /// First store failure; stops every worker.
    failure: Mutex<Option<IndexError>>,
}

impl<'a> Crawl<'a> {
    pub(crate) fn new(
        store: &'a EntryStore,
        options: &'a CrawlOptions,
        cancel: &'a CancelToken,
        progress: &'a Sender<CrawlProgress>,
    ) -> Self {
        let (queue_tx, queue_rx) = crossbeam_channel::unbounded();
        Self {
            store,
            options,
            cancel,
            progress,
            queue_tx,
            queue_rx,
            in_flight: AtomicUsize::new(0),
            interrupted: AtomicBool::new(false),
            counters: Counters::default(),
            failure: Mutex::new(None),
        }
    }

    fn failed(&self) -> bool {
        self.failure.lock().is_some()
    }

    fn should_stop(&self) -> bool {
        self.cancel.is_cancelled() || self.failed()
    }

    fn enqueue(&self, dir: PathBuf) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        // The receiver lives in `self`, so the send cannot fail.
        let _ = self.queue_tx.send(dir);
    }

    fn skip(&self, path: &Path, err: &std::io::Error) {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        debug!("Skipping {}: {err}", path.display());
        let _ = self.progress.try_send(CrawlProgress::Error {
            path: path.to_string_lossy().into_owned(),
            message: err.to_string(),
        });
    }

    /// Write `pending` in one transaction. On failure the error is kept and
    /// the crawl winds down.
    fn flush(&self, pending: &mut Vec<Entry>) {
        if pending.is_empty() {
            return;
        }
        if let Err(err) = self.store.upsert_batch(pending) {
            warn!("Store write failed, aborting crawl: {err}");
            let mut failure = self.failure.lock();
            if failure.is_none() {
                *failure = Some(err);
            }
            pending.clear();
            return;
        }

        let mut files = 0u64;
        let mut bytes = 0u64;
        for e in pending.iter().filter(|e| !e.is_directory) {
            files += 1;
            bytes = bytes.saturating_add(e.size);
        }
        let n = pending.len() as u64;
        self.counters.files.fetch_add(files, Ordering::Relaxed);
        self.counters.dirs.fetch_add(n - files, Ordering::Relaxed);
        self.counters.bytes.fetch_add(bytes, Ordering::Relaxed);
        let before = self.counters.items.fetch_add(n, Ordering::Relaxed);

        let interval = self.options.progress_interval.max(1);
        if before / interval != (before + n) / interval {
            let current_path = pending
                .last()
                .map(|e| e.key())
                .unwrap_or_default();
            let _ = self.progress.try_send(CrawlProgress::Update {
                items_indexed: before + n,
                files: self.counters.files.load(Ordering::Relaxed),
                dirs: self.counters.dirs.load(Ordering::Relaxed),
                current_path,
            });
        }
        pending.clear();
    }

    /// Stat every root, index it and queue the directories among them.
    pub(crate) fn seed(&self, roots: &[PathBuf]) {
        let mut batch = Vec::with_capacity(roots.len());
        for root in roots {
            match walk::observe(root) {
                Ok(Some(entry)) => {
                    if entry.is_directory {
                        self.enqueue(root.clone());
                    }
                    batch.push(entry);
                }
                Ok(None) => {
                    warn!("Root {} is not a file or directory; skipped", root.display());
                    self.counters.errors.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    warn!("Cannot read root {}: {err}", root.display());
                    self.skip(root, &err);
                }
            }
        }
        self.flush(&mut batch);
    }

    /// Read one directory, buffering its children into `pending`.
    ///
    /// The cancel token is checked before every child, so a cancelled crawl
    /// stops inside a huge directory rather than after it.
    pub(crate) fn process_directory(&self, dir: &Path, pending: &mut Vec<Entry>) {
        let read = match std::fs::read_dir(dir) {
            Ok(r) => r,
            Err(err) => {
                self.skip(dir, &err);
                return;
            }
        };

        for item in read {
            if self.should_stop() {
                self.interrupted.store(true, Ordering::SeqCst);
                return;
            }
            let item = match item {
                Ok(i) => i,
                Err(err) => {
                    self.skip(dir, &err);
                    continue;
                }
            };
            let path = item.path();
            let entry = match walk::observe(&path) {
                Ok(Some(entry)) => entry,
                // Symlinks and special files are not indexed.
                Ok(None) => continue,
                Err(err) => {
                    self.skip(&path, &err);
                    continue;
                }
            };
            if entry.is_directory {
                self.enqueue(path);
            }
            pending.push(entry);
            if pending.len() >= self.options.batch_size {
                self.flush(pending);
            }
        }
    }

    fn worker_loop(&self) {
        let mut pending: Vec<Entry> = Vec::with_capacity(self.options.batch_size + 16);
        loop {
            if self.should_stop() {
                break;
            }
            match self.queue_rx.recv_timeout(IDLE_POLL) {
                Ok(dir) => {
                    self.process_directory(&dir, &mut pending);
                    self.in_flight.fetch_sub(1, Ordering::SeqCst);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.in_flight.load(Ordering::SeqCst) == 0 {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.flush(&mut pending);
    }

    /// Run `options.concurrency` workers until the queue drains, the token
    /// is cancelled or a store write fails.
    pub(crate) fn run_workers(&self) {
        let workers = self.options.concurrency.max(1);
        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(workers);
            for i in 0..workers {
                let spawned = thread::Builder::new()
                    .name(format!("diskdex-crawl-{i}"))
                    .spawn_scoped(scope, || self.worker_loop());
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(err) => {
                        self.record_failure(IndexError::Worker(format!(
                            "failed to spawn crawl worker: {err}"
                        )));
                        break;
                    }
                }
            }
            for handle in handles {
                if handle.join().is_err() {
                    self.record_failure(IndexError::Worker("crawl worker panicked".into()));
                }
            }
        });
    }

    fn record_failure(&self, err: IndexError) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some(err);
        }
    }

    /// Final report, or the first store failure.
    pub(crate) fn finish(self, roots: &[PathBuf], started: Instant) -> Result<CrawlReport> {
        if let Some(err) = self.failure.into_inner() {
            return Err(err);
        }
        // A token cancelled after the last directory was read stopped nothing.
        let cancelled = self.interrupted.into_inner() || self.in_flight.into_inner() > 0;
        let report = CrawlReport {
            roots: roots.to_vec(),
            items_indexed: self.counters.items.into_inner(),
            files_indexed: self.counters.files.into_inner(),
            dirs_indexed: self.counters.dirs.into_inner(),
            bytes_indexed: self.counters.bytes.into_inner(),
            errors_skipped: self.counters.errors.into_inner(),
            elapsed: started.elapsed(),
            cancelled,
        };
        info!(
            "Crawl {}: {} items ({} files, {} dirs), {} errors skipped in {:?}",
            if report.cancelled { "cancelled" } else { "complete" },
            report.items_indexed,
            report.files_indexed,
            report.dirs_indexed,
            report.errors_skipped,
            report.elapsed
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn options() -> CrawlOptions {
        CrawlOptions {
            concurrency: 2,
            batch_size: 4,
            progress_interval: 1,
        }
    }

    #[test]
    fn cancelled_token_stops_before_first_child() {
        let tmp = TempDir::new().unwrap();
        for i in 0..10_000 {
            fs::write(tmp.path().join(format!("f{i}")), b"").unwrap();
        }
        let store = EntryStore::open_in_memory().unwrap();
        let opts = CrawlOptions {
            batch_size: 100_000,
            ..options()
        };
        let cancel = CancelToken::new();
        cancel.cancel();
        let (tx, _rx) = crossbeam_channel::bounded(16);

        let crawl = Crawl::new(&store, &opts, &cancel, &tx);
        let mut pending = Vec::new();
        crawl.process_directory(tmp.path(), &mut pending);
        assert!(pending.len() <= 1, "processed {} entries", pending.len());

        let report = crawl.finish(&[], Instant::now()).unwrap();
        assert!(report.cancelled);
    }

    #[test]
    fn unreadable_directory_is_counted_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let store = EntryStore::open_in_memory().unwrap();
        let opts = options();
        let cancel = CancelToken::new();
        let (tx, rx) = crossbeam_channel::bounded(16);

        let crawl = Crawl::new(&store, &opts, &cancel, &tx);
        let mut pending = Vec::new();
        crawl.process_directory(&tmp.path().join("gone"), &mut pending);
        assert!(pending.is_empty());
        assert!(matches!(rx.try_recv(), Ok(CrawlProgress::Error { .. })));

        let report = crawl.finish(&[], Instant::now()).unwrap();
        assert_eq!(report.errors_skipped, 1);
        assert_eq!(report.items_indexed, 0);
    }

    #[test]
    fn workers_drain_nested_tree() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("a/b/c")).unwrap();
        fs::write(tmp.path().join("a/b/c/leaf"), b"12345").unwrap();
        fs::write(tmp.path().join("top"), b"1").unwrap();

        let store = EntryStore::open_in_memory().unwrap();
        let opts = options();
        let cancel = CancelToken::new();
        let (tx, _rx) = crossbeam_channel::bounded(64);

        let crawl = Crawl::new(&store, &opts, &cancel, &tx);
        crawl.seed(&[tmp.path().to_path_buf()]);
        crawl.run_workers();
        let report = crawl.finish(&[tmp.path().to_path_buf()], Instant::now()).unwrap();

        // root + a + b + c + leaf + top
        assert_eq!(report.items_indexed, 6);
        assert_eq!(report.files_indexed, 2);
        assert_eq!(report.dirs_indexed, 4);
        assert_eq!(report.bytes_indexed, 6);
        assert_eq!(store.stats().unwrap().total_entries, 6);
    }

    #[test]
    fn cancel_after_drain_is_not_reported_as_cancelled() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("sub/f"), b"x").unwrap();

        let store = EntryStore::open_in_memory().unwrap();
        let opts = options();
        let cancel = CancelToken::new();
        let (tx, _rx) = crossbeam_channel::bounded(64);

        let crawl = Crawl::new(&store, &opts, &cancel, &tx);
        crawl.seed(&[tmp.path().to_path_buf()]);
        crawl.run_workers();
        // Cancelled once every directory has already been read.
        cancel.cancel();
        let report = crawl.finish(&[tmp.path().to_path_buf()], Instant::now()).unwrap();

        assert!(!report.cancelled);
        assert_eq!(report.items_indexed, 3);
    }

    #[test]
    fn queued_directories_left_behind_mean_cancelled() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();

        let store = EntryStore::open_in_memory().unwrap();
        let opts = options();
        let cancel = CancelToken::new();
        let (tx, _rx) = crossbeam_channel::bounded(64);

        let crawl = Crawl::new(&store, &opts, &cancel, &tx);
        crawl.seed(&[tmp.path().to_path_buf()]);
        cancel.cancel();
        crawl.run_workers();
        let report = crawl.finish(&[tmp.path().to_path_buf()], Instant::now()).unwrap();

        assert!(report.cancelled);
        // Only the root made it in.
        assert_eq!(report.items_indexed, 1);
    }
}
