/// Data model for the diskdex index.
///
/// Re-exports the flat entry row and byte-count helpers.
pub mod entry;
pub mod size;

pub use entry::{path_key, Entry};
