/// Typed query requests against the index.
///
/// A [`Query`] has one field per predicate. The store translates it into a
/// parameterised SQL statement ([`sql::build_select`]); the same semantics
/// are available in memory through [`Query::matches`] and
/// [`Query::compare`], so filter composition can be tested without a
/// database.
///
/// # Ordering
///
/// Entries whose size is calculated always rank before unmeasured
/// directories, whatever the requested sort: an unmeasured directory must
/// never look "small". Inside each group the requested order applies with
/// `name` (then `path`) as the tie-break.
pub mod parse;
pub mod sql;

use crate::model::{path_key, Entry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub use parse::{parse_age, parse_size_filter};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortOrder {
    /// Name ascending.
    #[default]
    Name,
    /// Largest first.
    SizeDesc,
    /// Most recently modified first.
    MtimeDesc,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    /// Case-insensitive substring of the entry name.
    pub name_contains: Option<String>,
    /// Exact extension, with or without the leading dot, any case.
    pub extension: Option<String>,
    /// Further accepted extensions, same form. An entry matches when its
    /// extension is any of these or `extension`.
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Inclusive lower size bound in bytes.
    pub min_size: Option<u64>,
    /// Inclusive upper size bound in bytes.
    pub max_size: Option<u64>,
    pub files_only: bool,
    /// Ignored when `files_only` is also set.
    pub directories_only: bool,
    /// Exclusive: `modified_time > after`.
    pub modified_after: Option<DateTime<Utc>>,
    /// Exclusive: `modified_time < before`.
    pub modified_before: Option<DateTime<Utc>>,
    pub sort: SortOrder,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name_contains(mut self, needle: impl Into<String>) -> Self {
        self.name_contains = Some(needle.into());
        self
    }

    pub fn extension(mut self, ext: impl Into<String>) -> Self {
        self.extension = Some(ext.into());
        self
    }

    /// Accept any of `exts` in addition to what is already accepted.
    pub fn extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions.extend(exts.into_iter().map(Into::into));
        self
    }

    pub fn min_size(mut self, bytes: u64) -> Self {
        self.min_size = Some(bytes);
        self
    }

    pub fn max_size(mut self, bytes: u64) -> Self {
        self.max_size = Some(bytes);
        self
    }

    pub fn files_only(mut self) -> Self {
        self.files_only = true;
        self
    }

    pub fn directories_only(mut self) -> Self {
        self.directories_only = true;
        self
    }

    pub fn modified_after(mut self, at: DateTime<Utc>) -> Self {
        self.modified_after = Some(at);
        self
    }

    pub fn modified_before(mut self, at: DateTime<Utc>) -> Self {
        self.modified_before = Some(at);
        self
    }

    pub fn sort(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// The "largest first" listing: files only, by size.
    pub fn largest_files(limit: usize) -> Self {
        Self::new().files_only().sort(SortOrder::SizeDesc).limit(limit)
    }

    /// Accepted extensions in stored form (`".txt"`), deduplicated in first
    /// seen order. Blank entries are dropped; an empty result means the
    /// filter is off.
    pub fn normalized_extensions(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let requested = self.extension.iter().chain(self.extensions.iter());
        for ext in requested.filter_map(|e| normalize_extension(e)) {
            if !out.contains(&ext) {
                out.push(ext);
            }
        }
        out
    }

    /// Name needle, or `None` when unset or empty.
    pub fn name_needle(&self) -> Option<&str> {
        self.name_contains.as_deref().filter(|n| !n.is_empty())
    }

    /// Effective kind restriction: `Some(false)` for files, `Some(true)` for
    /// directories. `files_only` wins when both flags are set.
    pub fn directory_filter(&self) -> Option<bool> {
        if self.files_only {
            Some(false)
        } else if self.directories_only {
            Some(true)
        } else {
            None
        }
    }

    fn has_size_bound(&self) -> bool {
        self.min_size.is_some() || self.max_size.is_some()
    }

    /// In-memory evaluation of every filter, ANDed.
    pub fn matches(&self, entry: &Entry) -> bool {
        if let Some(needle) = self.name_needle() {
            if !contains_ascii_case_insensitive(&entry.name, needle) {
                return false;
            }
        }
        let exts = self.normalized_extensions();
        if !exts.is_empty() && !exts.iter().any(|ext| entry.extension.as_str() == ext) {
            return false;
        }
        if self.has_size_bound() {
            // An unknown size satisfies no bound.
            if !entry.size_calculated {
                return false;
            }
            if self.min_size.is_some_and(|min| entry.size < min) {
                return false;
            }
            if self.max_size.is_some_and(|max| entry.size > max) {
                return false;
            }
        }
        if let Some(want_dir) = self.directory_filter() {
            if entry.is_directory != want_dir {
                return false;
            }
        }
        if self.modified_after.is_some_and(|after| entry.modified_time <= after) {
            return false;
        }
        if self.modified_before.is_some_and(|before| entry.modified_time >= before) {
            return false;
        }
        true
    }

    /// Total order used for ranking; matches the SQL `ORDER BY`.
    pub fn compare(&self, a: &Entry, b: &Entry) -> Ordering {
        // Calculated entries first.
        let group = b.size_calculated.cmp(&a.size_calculated);
        let primary = match self.sort {
            SortOrder::Name => Ordering::Equal,
            SortOrder::SizeDesc => b.size.cmp(&a.size),
            SortOrder::MtimeDesc => b.modified_time.cmp(&a.modified_time),
        };
        group
            .then(primary)
            .then_with(|| a.name.as_str().cmp(b.name.as_str()))
            .then_with(|| path_key(&a.path).cmp(&path_key(&b.path)))
    }

    /// Filter, sort and paginate an in-memory slice.
    pub fn apply<'a>(&self, entries: impl IntoIterator<Item = &'a Entry>) -> Vec<Entry> {
        let mut hits: Vec<Entry> = entries
            .into_iter()
            .filter(|e| self.matches(e))
            .cloned()
            .collect();
        hits.sort_by(|a, b| self.compare(a, b));
        hits.into_iter()
            .skip(self.offset)
            .take(self.limit.unwrap_or(usize::MAX))
            .collect()
    }
}

/// `"TXT"`, `".txt"` and `" .Txt "` all become `".txt"`; blanks are `None`.
fn normalize_extension(ext: &str) -> Option<String> {
    let bare = ext.trim().trim_start_matches('.');
    if bare.is_empty() {
        return None;
    }
    Some(format!(".{}", bare.to_lowercase()))
}

/// SQLite `LIKE` semantics: ASCII letters fold, everything else is exact.
fn contains_ascii_case_insensitive(haystack: &str, needle: &str) -> bool {
    haystack
        .to_ascii_lowercase()
        .contains(&needle.to_ascii_lowercase())
}
