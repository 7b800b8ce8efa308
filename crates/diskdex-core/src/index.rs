/// [`DiskIndex`]: one handle over the store, crawler, aggregator and
/// deletion service.
///
/// Frontends talk to this type only. Every method is safe to call from
/// several threads at once; the crawl and single size computations can run
/// in the background while queries continue against the same store.
use crate::aggregate::{LazyAggregator, SizeEvent, SizeReport, SizeTask};
use crate::config::IndexConfig;
use crate::delete::{DeleteOutcome, DeletionService};
use crate::error::Result;
use crate::export;
use crate::model::Entry;
use crate::query::Query;
use crate::safety::{self, PathClass};
use crate::scanner::{self, CancelToken, CrawlHandle, CrawlReport};
use crate::store::{EntryStore, ExtensionTotal, IndexStats};
use crossbeam_channel::Receiver;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct DiskIndex {
    config: IndexConfig,
    store: Arc<EntryStore>,
    aggregator: LazyAggregator,
    deleter: DeletionService,
}

impl DiskIndex {
    /// Open the index at `config.db_path`, creating it if needed.
    pub fn open(config: &IndexConfig) -> Result<Self> {
        config.validate()?;
        let store = EntryStore::open(&config.db_path)?;
        Ok(Self::with_store(config.clone(), store))
    }

    /// An index that disappears when dropped; `db_path` is ignored.
    pub fn in_memory(config: IndexConfig) -> Result<Self> {
        config.validate()?;
        let store = EntryStore::open_in_memory()?;
        Ok(Self::with_store(config, store))
    }

    fn with_store(config: IndexConfig, store: EntryStore) -> Self {
        let store = Arc::new(store);
        let aggregator = LazyAggregator::new(store.clone(), config.aggregate_threads);
        let deleter = DeletionService::new(store.clone());
        Self {
            config,
            store,
            aggregator,
            deleter,
        }
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<EntryStore> {
        &self.store
    }

    // ── Crawling ─────────────────────────────────────────────────────────

    /// Start crawling `roots` in the background. `concurrency` overrides
    /// the configured worker count.
    pub fn crawl(&self, roots: &[PathBuf], concurrency: Option<usize>) -> Result<CrawlHandle> {
        let mut options = self.config.crawl_options();
        if let Some(n) = concurrency {
            options = options.with_concurrency(n);
        }
        scanner::start_crawl(self.store.clone(), roots.to_vec(), options)
    }

    /// Crawl `roots` on the calling thread.
    pub fn crawl_blocking(&self, roots: &[PathBuf]) -> Result<CrawlReport> {
        scanner::crawl(
            &self.store,
            roots,
            &self.config.crawl_options(),
            &CancelToken::new(),
        )
    }

    /// `true` when `root` or anything below it has been indexed.
    pub fn is_indexed(&self, root: &Path) -> Result<bool> {
        Ok(self.store.count_under(root)? > 0)
    }

    pub fn last_crawl(&self) -> Result<Option<CrawlReport>> {
        self.store.last_crawl()
    }

    // ── Reading ──────────────────────────────────────────────────────────

    pub fn query(&self, query: &Query) -> Result<Vec<Entry>> {
        self.store.query(query)
    }

    pub fn stats(&self) -> Result<IndexStats> {
        self.store.stats()
    }

    pub fn extension_totals(&self, limit: usize) -> Result<Vec<ExtensionTotal>> {
        self.store.extension_totals(limit)
    }

    /// Run `query` and write the hits to `writer` as CSV.
    pub fn export_csv<W: Write>(&self, query: &Query, writer: W) -> Result<usize> {
        let entries = self.store.query(query)?;
        export::write_csv(&entries, writer)
    }

    // ── Sizing ───────────────────────────────────────────────────────────

    /// Measure `path` now and memoize the result.
    pub fn compute_size(&self, path: &Path) -> Result<u64> {
        Ok(self.aggregator.compute_size(path)?.size)
    }

    pub fn spawn_compute_size(&self, path: &Path) -> Result<SizeTask> {
        self.aggregator.spawn(path)
    }

    /// Measure up to `limit` directories the crawl left unmeasured.
    pub fn compute_pending(&self, limit: usize) -> Result<Vec<SizeReport>> {
        self.aggregator.compute_pending(limit)
    }

    /// Completion notifications for every size computation.
    pub fn size_events(&self) -> Receiver<SizeEvent> {
        self.aggregator.events()
    }

    // ── Deleting ─────────────────────────────────────────────────────────

    pub fn classify(&self, path: &Path) -> PathClass {
        safety::classify(path)
    }

    pub fn delete(&self, path: &Path) -> Result<DeleteOutcome> {
        self.deleter.delete(path)
    }

    /// Forget every entry. Nothing on disk is touched.
    pub fn clear(&self) -> Result<()> {
        self.store.clear()
    }
}
