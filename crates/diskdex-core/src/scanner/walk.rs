/// Traversal primitives shared by the crawler and the lazy aggregator.
///
/// Neither ever follows a symbolic link: links are not indexed and do not
/// contribute to directory sizes, so a link cycle cannot loop a walk.
use crate::model::Entry;
use std::io;
use std::path::Path;
use tracing::debug;

/// `lstat` one path and turn it into an entry.
///
/// `Ok(None)` means the object exists but is not something the index
/// records (a symlink, socket, device...).
pub fn observe(path: &Path) -> io::Result<Option<Entry>> {
    let meta = std::fs::symlink_metadata(path)?;
    Ok(Entry::from_metadata(path, &meta))
}

/// Result of one recursive size walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeSize {
    /// Sum of regular file sizes below the root.
    pub bytes: u64,
    pub files: u64,
    /// Unreadable directories and unstatable files that were skipped.
    pub errors: u64,
}

/// Recursively sum the file sizes under `root` with `jwalk`.
///
/// Use `Parallelism::RayonNewPool(n)` for a single large walk and
/// `Parallelism::Serial` when the caller already runs several walks on a
/// rayon pool.
pub fn tree_size(root: &Path, parallelism: jwalk::Parallelism) -> TreeSize {
    let walker = jwalk::WalkDir::new(root)
        .skip_hidden(false)
        .follow_links(false)
        .parallelism(parallelism);

    let mut totals = TreeSize::default();
    for entry_result in walker {
        let entry = match entry_result {
            Ok(e) => e,
            Err(err) => {
                totals.errors += 1;
                debug!("Size walk skipped {:?}: {err}", err.path());
                continue;
            }
        };

        let file_type = entry.file_type();
        if !file_type.is_file() {
            continue;
        }

        let path = entry.path();
        match std::fs::symlink_metadata(&path) {
            Ok(meta) => {
                totals.bytes = totals.bytes.saturating_add(meta.len());
                totals.files += 1;
            }
            Err(err) => {
                totals.errors += 1;
                debug!("Size walk could not stat {}: {err}", path.display());
            }
        }
    }
    totals
}
