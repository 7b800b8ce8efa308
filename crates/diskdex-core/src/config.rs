/// Runtime configuration for an index instance.
///
/// Loaded from a JSON file (every field optional, missing fields take the
/// defaults below) and then overridden by `DISKDEX_*` environment variables.
use crate::error::{IndexError, Result};
use crate::scanner::CrawlOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default database file, relative to the working directory.
pub const DEFAULT_DB_PATH: &str = "diskdex.db";

/// Entries buffered per crawl worker before one store transaction.
pub const DEFAULT_BATCH_SIZE: usize = 512;

/// Items between two `CrawlProgress::Update` messages.
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 1_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// SQLite database file backing the index.
    pub db_path: PathBuf,
    /// Crawl worker count.
    pub concurrency: usize,
    /// Crawl write batch size.
    pub batch_size: usize,
    /// Items between progress updates.
    pub progress_interval: u64,
    /// Threads used by a single directory-size walk.
    pub aggregate_threads: usize,
    /// Maximum `tracing` level for the binary (`error` .. `trace`).
    pub log_level: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            concurrency: default_concurrency(),
            batch_size: DEFAULT_BATCH_SIZE,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            aggregate_threads: num_cpus::get().max(1),
            log_level: "info".to_owned(),
        }
    }
}

/// A small multiple of the available parallelism: crawl workers spend most
/// of their time blocked in `readdir`/`stat`, so more workers than cores
/// keeps the disk queue busy.
pub fn default_concurrency() -> usize {
    (num_cpus::get() * 2).max(1)
}

impl IndexConfig {
    /// Read a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| IndexError::io(path, e))?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| IndexError::Config(format!("invalid JSON configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `DISKDEX_DB`, `DISKDEX_THREADS` and `DISKDEX_LOG` overrides.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides read through `lookup`.
    pub(crate) fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(db) = lookup("DISKDEX_DB") {
            self.db_path = PathBuf::from(db);
        }
        if let Some(threads) = lookup("DISKDEX_THREADS") {
            self.concurrency = threads.trim().parse().map_err(|_| {
                IndexError::Config(format!("DISKDEX_THREADS is not a number: {threads:?}"))
            })?;
        }
        if let Some(level) = lookup("DISKDEX_LOG") {
            self.log_level = level;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(IndexError::Config("concurrency must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(IndexError::Config("batch_size must be at least 1".into()));
        }
        if self.aggregate_threads == 0 {
            return Err(IndexError::Config("aggregate_threads must be at least 1".into()));
        }
        if self.log_level.parse::<tracing::Level>().is_err() {
            return Err(IndexError::Config(format!(
                "unknown log level {:?}",
                self.log_level
            )));
        }
        Ok(())
    }

    /// Parsed `log_level`; falls back to `INFO` for an unvalidated value.
    pub fn tracing_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }

    pub fn crawl_options(&self) -> CrawlOptions {
        CrawlOptions {
            concurrency: self.concurrency,
            batch_size: self.batch_size,
            progress_interval: self.progress_interval,
        }
    }
}
