/// Error taxonomy for the index core.
///
/// Per-entry filesystem failures met while crawling, sizing or deleting are
/// *not* represented here: they are counted and reported on progress
/// channels, never propagated. Only failures that abort the call in flight
/// become an [`IndexError`].
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    /// The backing SQLite database could not be opened, read or written.
    #[error("index store unavailable: {source}")]
    StoreUnavailable {
        #[from]
        source: rusqlite::Error,
    },

    /// An operation on one explicitly requested path failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),

    /// A size or age expression in a query request could not be parsed.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("export failed: {0}")]
    Export(#[from] csv::Error),

    /// A persisted JSON document (crawl report, config) failed to encode or decode.
    #[error("serialisation error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A background thread could not be spawned or panicked.
    #[error("worker failure: {0}")]
    Worker(String),
}

impl IndexError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// `true` when the failure comes from the backing store.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;
