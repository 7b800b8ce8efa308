/// diskdex core: indexing, querying, lazy sizing and guarded deletion.
///
/// This crate contains all engine logic with zero UI dependencies. Frontends
/// drive it through [`index::DiskIndex`].
///
/// # Modules
///
/// - [`model`]: the `Entry` row and size formatting helpers.
/// - [`store`]: SQLite-backed persistent entry store.
/// - [`scanner`]: bounded worker-pool crawler with progress and cancellation.
/// - [`aggregate`]: on-demand recursive directory sizing.
/// - [`query`]: typed filter/sort/paginate requests.
/// - [`safety`]: protected-path classification.
/// - [`delete`]: the deletion service.
/// - [`export`]: CSV output of query results.
/// - [`config`]: `IndexConfig` loading and validation.
pub mod aggregate;
pub mod config;
pub mod delete;
pub mod error;
pub mod export;
pub mod index;
pub mod model;
pub mod query;
pub mod safety;
pub mod scanner;
pub mod store;

pub use error::{IndexError, Result};
pub use index::DiskIndex;
