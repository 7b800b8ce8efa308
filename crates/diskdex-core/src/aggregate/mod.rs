/// Lazy directory sizing.
///
/// The crawler leaves every directory unmeasured. [`LazyAggregator`] walks a
/// directory on demand, sums its file sizes and memoizes the result into the
/// store with `size_calculated = true`, which moves the entry into the
/// ranked group of every size-sorted query.
///
/// Each successful computation is announced as a [`SizeEvent`] on the
/// aggregator's event channel so a caller displaying results can re-sort.
///
/// There is no single-flight: two concurrent calls for the same path both
/// walk and both write. The writes are replace-by-key, so the last one
/// wins and both values were correct at the time they were measured.
use crate::error::{IndexError, Result};
use crate::scanner::walk::{self, TreeSize};
use crate::store::EntryStore;
use crossbeam_channel::{Receiver, Sender};
use rayon::prelude::*;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

/// Maximum number of unread size events kept before new ones are dropped.
pub const EVENT_CHANNEL_CAPACITY: usize = 1_024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeReport {
    pub path: PathBuf,
    pub size: u64,
    /// Unreadable subdirectories and unstatable files left out of `size`.
    pub errors_skipped: u64,
}

/// Notification emitted after every computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SizeEvent {
    Computed { path: PathBuf, size: u64 },
    Failed { path: PathBuf, message: String },
}

#[derive(Clone)]
pub struct LazyAggregator {
    store: Arc<EntryStore>,
    threads: usize,
    events_tx: Sender<SizeEvent>,
    events_rx: Receiver<SizeEvent>,
}

impl LazyAggregator {
    /// `threads` sizes the jwalk pool of a single [`compute_size`] walk.
    ///
    /// [`compute_size`]: Self::compute_size
    pub fn new(store: Arc<EntryStore>, threads: usize) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            threads: threads.max(1),
            events_tx,
            events_rx,
        }
    }

    /// Receiver of [`SizeEvent`]s. All clones share one queue.
    pub fn events(&self) -> Receiver<SizeEvent> {
        self.events_rx.clone()
    }

    /// Measure `path` and memoize the result.
    ///
    /// A file is "measured" by its own length. A path that is not indexed
    /// yet is inserted from its current metadata. Fails with
    /// [`IndexError::Io`] when `path` cannot be stat'ed.
    pub fn compute_size(&self, path: &Path) -> Result<SizeReport> {
        let parallelism = if self.threads > 1 {
            jwalk::Parallelism::RayonNewPool(self.threads)
        } else {
            jwalk::Parallelism::Serial
        };
        self.measure(path, parallelism)
    }

    /// Run [`compute_size`](Self::compute_size) on a background thread.
    pub fn spawn(&self, path: impl Into<PathBuf>) -> Result<SizeTask> {
        let path = path.into();
        let (result_tx, result_rx) = crossbeam_channel::bounded(1);
        let aggregator = self.clone();
        let task_path = path.clone();
        let thread = thread::Builder::new()
            .name("diskdex-size".into())
            .spawn(move || {
                let _ = result_tx.send(aggregator.compute_size(&task_path));
            })
            .map_err(|e| IndexError::Worker(format!("failed to spawn size task: {e}")))?;
        Ok(SizeTask {
            path,
            result_rx,
            thread,
        })
    }

    /// Measure up to `limit` unmeasured directories in parallel.
    ///
    /// Directories that vanished since the crawl are dropped from the index;
    /// other per-directory failures are reported as events and skipped. A
    /// store failure aborts the pass.
    pub fn compute_pending(&self, limit: usize) -> Result<Vec<SizeReport>> {
        let pending = self.store.pending_directories(limit)?;
        if pending.is_empty() {
            return Ok(Vec::new());
        }
        info!("Measuring {} pending directories", pending.len());

        // Many small walks: parallelise across directories, walk each serially.
        let results: Vec<(PathBuf, Result<SizeReport>)> = pending
            .into_par_iter()
            .map(|dir| {
                let result = self.measure(&dir, jwalk::Parallelism::Serial);
                (dir, result)
            })
            .collect();

        let mut reports = Vec::with_capacity(results.len());
        for (dir, result) in results {
            match result {
                Ok(report) => reports.push(report),
                Err(IndexError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                    debug!("Pending directory {} vanished; dropping it", dir.display());
                    self.store.delete(&dir)?;
                }
                Err(err) if err.is_store_unavailable() => return Err(err),
                Err(err) => debug!("Could not measure {}: {err}", dir.display()),
            }
        }
        Ok(reports)
    }

    fn measure(&self, path: &Path, parallelism: jwalk::Parallelism) -> Result<SizeReport> {
        let result = self.measure_inner(path, parallelism);
        let event = match &result {
            Ok(report) => SizeEvent::Computed {
                path: report.path.clone(),
                size: report.size,
            },
            Err(err) => SizeEvent::Failed {
                path: path.to_path_buf(),
                message: err.to_string(),
            },
        };
        let _ = self.events_tx.try_send(event);
        result
    }

    fn measure_inner(&self, path: &Path, parallelism: jwalk::Parallelism) -> Result<SizeReport> {
        let entry = walk::observe(path)
            .map_err(|e| IndexError::io(path, e))?
            .ok_or_else(|| {
                IndexError::io(
                    path,
                    io::Error::new(io::ErrorKind::InvalidInput, "not a file or directory"),
                )
            })?;

        let totals = if entry.is_directory {
            walk::tree_size(path, parallelism)
        } else {
            TreeSize {
                bytes: entry.size,
                files: 1,
                errors: 0,
            }
        };
        if totals.errors > 0 {
            warn!(
                "Size of {} excludes {} unreadable item(s)",
                path.display(),
                totals.errors
            );
        }

        let entry = entry.with_calculated_size(totals.bytes);
        self.store.upsert(&entry)?;
        debug!("Measured {}: {} bytes", path.display(), totals.bytes);

        Ok(SizeReport {
            path: entry.path,
            size: totals.bytes,
            errors_skipped: totals.errors,
        })
    }
}

/// A size computation running on its own thread.
pub struct SizeTask {
    path: PathBuf,
    result_rx: Receiver<Result<SizeReport>>,
    thread: thread::JoinHandle<()>,
}

impl SizeTask {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// The result if the task is done, without blocking.
    pub fn try_result(&self) -> Option<Result<SizeReport>> {
        self.result_rx.try_recv().ok()
    }

    /// Block until the computation ends.
    pub fn wait(self) -> Result<SizeReport> {
        self.result_rx
            .recv()
            .map_err(|_| IndexError::Worker(format!("size task for {} died", self.path.display())))?
    }
}
