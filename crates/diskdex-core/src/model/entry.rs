/// One indexed filesystem object.
///
/// Entries are flat rows keyed by their full path. Unlike an in-memory tree
/// nothing links a child to its parent: descendants are found by path
/// prefix, which is what the store indexes.
use chrono::{DateTime, Utc};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Absolute path; the unique key.
    pub path: PathBuf,

    /// Final path component, derived from `path`.
    pub name: CompactString,

    /// Logical size in bytes. For directories this is `0` until the lazy
    /// aggregator has measured it, then the recursive sum of file sizes.
    pub size: u64,

    pub is_directory: bool,

    /// Lowercase extension including the leading dot (`".log"`).
    /// Empty for directories and extensionless files.
    pub extension: CompactString,

    /// Last-modified timestamp as read at crawl time.
    pub modified_time: DateTime<Utc>,

    /// `false` only for directories whose size has not been computed yet.
    pub size_calculated: bool,

    /// When this row was last written. Debugging only.
    pub indexed_time: DateTime<Utc>,
}

impl Entry {
    /// A file entry. Files always carry an exact size.
    pub fn file(path: impl Into<PathBuf>, size: u64, modified_time: DateTime<Utc>) -> Self {
        let path = path.into();
        Self {
            name: name_of(&path),
            extension: extension_of(&path),
            path,
            size,
            is_directory: false,
            modified_time,
            size_calculated: true,
            indexed_time: Utc::now(),
        }
    }

    /// A freshly discovered directory with an unknown size.
    pub fn directory(path: impl Into<PathBuf>, modified_time: DateTime<Utc>) -> Self {
        let path = path.into();
        Self {
            name: name_of(&path),
            extension: CompactString::default(),
            path,
            size: 0,
            is_directory: true,
            modified_time,
            size_calculated: false,
            indexed_time: Utc::now(),
        }
    }

    /// Build an entry from `symlink_metadata` output.
    ///
    /// Returns `None` for symlinks and other non-regular objects, which the
    /// index does not record.
    pub fn from_metadata(path: impl Into<PathBuf>, meta: &Metadata) -> Option<Self> {
        let modified = mtime_of(meta);
        let file_type = meta.file_type();
        if file_type.is_dir() {
            Some(Self::directory(path, modified))
        } else if file_type.is_file() {
            Some(Self::file(path, meta.len(), modified))
        } else {
            None
        }
    }

    /// Mark a directory as measured.
    pub fn with_calculated_size(mut self, size: u64) -> Self {
        self.size = size;
        self.size_calculated = true;
        self
    }

    /// Lossy UTF-8 form of the path, as stored in the index.
    pub fn key(&self) -> String {
        path_key(&self.path)
    }
}

/// Key under which `path` is stored.
pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Base name; the whole path for roots such as `/` or `C:\`.
pub fn name_of(path: &Path) -> CompactString {
    match path.file_name() {
        Some(name) => CompactString::new(name.to_string_lossy()),
        None => CompactString::new(path.to_string_lossy()),
    }
}

/// Lowercase `.ext` of a file name, or empty. Dotfiles such as `.bashrc`
/// have no extension.
pub fn extension_of(path: &Path) -> CompactString {
    match path.extension() {
        Some(ext) if !ext.is_empty() => {
            let mut out = CompactString::new(".");
            out.push_str(&ext.to_string_lossy().to_lowercase());
            out
        }
        _ => CompactString::default(),
    }
}

/// Modification time of `meta`, or the Unix epoch when the platform does
/// not report one.
pub fn mtime_of(meta: &Metadata) -> DateTime<Utc> {
    meta.modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| DateTime::<Utc>::from(SystemTime::UNIX_EPOCH))
}
