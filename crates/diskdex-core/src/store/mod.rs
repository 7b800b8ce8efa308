/// Durable entry store backed by SQLite.
///
/// One row per filesystem object, keyed by path. The store is the only
/// shared mutable resource in the engine: crawl workers upsert into it
/// concurrently while callers query it.
///
/// # Connections
///
/// A file-backed store holds two connections, each behind its own
/// `parking_lot::Mutex`: a writer used by upserts and deletes, and a reader
/// used by queries. WAL mode lets the reader proceed while a crawl batch
/// commits. An in-memory store has a single connection serving both roles,
/// since separate in-memory connections would be separate databases.
///
/// # Atomicity
///
/// Each row write is atomic; a batch is one transaction. Nothing is
/// transactional *across* calls; concurrent upserts of the same path resolve
/// as last-writer-wins.
pub mod schema;

use crate::error::Result;
use crate::model::{path_key, Entry};
use crate::query::{sql, Query};
use crate::scanner::CrawlReport;
use chrono::{DateTime, Utc};
use compact_str::CompactString;
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, Transaction};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const UPSERT_SQL: &str = "INSERT OR REPLACE INTO entries
        (path, name, size, is_directory, extension, modified_time, size_calculated, indexed_time)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)";

/// Aggregate counts over the whole index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub file_count: u64,
    pub dir_count: u64,
    /// Sum of file sizes only; directory sizes would double count.
    pub total_size: u64,
    pub total_entries: u64,
    /// Directories still waiting for the lazy aggregator.
    pub pending_dirs: u64,
}

/// Per-extension file totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionTotal {
    /// `""` groups files without an extension.
    pub extension: String,
    pub file_count: u64,
    pub total_size: u64,
}

pub struct EntryStore {
    writer: Mutex<Connection>,
    reader: Option<Mutex<Connection>>,
    db_path: Option<PathBuf>,
}

impl EntryStore {
    /// Open (or create) the index database at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self> {
        let writer = Connection::open(db_path)?;
        schema::apply_pragmas(&writer)?;
        schema::ensure_schema(&writer)?;

        let reader = Connection::open(db_path)?;
        schema::apply_pragmas(&reader)?;

        info!("Opened index at {}", db_path.display());
        Ok(Self {
            writer: Mutex::new(writer),
            reader: Some(Mutex::new(reader)),
            db_path: Some(db_path.to_path_buf()),
        })
    }

    /// A throwaway index that lives as long as the returned value.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::ensure_schema(&conn)?;
        Ok(Self {
            writer: Mutex::new(conn),
            reader: None,
            db_path: None,
        })
    }

    /// Backing file, `None` for in-memory stores.
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn read_conn(&self) -> MutexGuard<'_, Connection> {
        match &self.reader {
            Some(reader) => reader.lock(),
            None => self.writer.lock(),
        }
    }

    // ── Writes ───────────────────────────────────────────────────────────

    /// Insert or replace one entry, stamping `indexed_time`.
    pub fn upsert(&self, entry: &Entry) -> Result<()> {
        self.upsert_batch(std::slice::from_ref(entry))
    }

    /// Insert or replace many entries in one transaction.
    pub fn upsert_batch(&self, entries: &[Entry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let now = Utc::now().timestamp_millis();
        let mut conn = self.writer.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(UPSERT_SQL)?;
            for e in entries {
                // Files always have a known size.
                let calculated = e.size_calculated || !e.is_directory;
                stmt.execute(params![
                    e.key(),
                    e.name.as_str(),
                    to_i64(e.size),
                    e.is_directory,
                    e.extension.as_str(),
                    e.modified_time.timestamp_millis(),
                    calculated,
                    now,
                ])?;
            }
        }
        tx.commit()?;
        debug!("Upserted {} entries", entries.len());
        Ok(())
    }

    /// Remove `path`; if it was a directory, remove every descendant too.
    ///
    /// Returns the number of rows removed.
    pub fn delete(&self, path: &Path) -> Result<usize> {
        self.delete_many(std::slice::from_ref(&path.to_path_buf()))
    }

    /// [`delete`](Self::delete) for several paths in one transaction.
    pub fn delete_many(&self, paths: &[PathBuf]) -> Result<usize> {
        if paths.is_empty() {
            return Ok(0);
        }
        let mut conn = self.writer.lock();
        let tx = conn.transaction()?;
        let mut removed = 0;
        for path in paths {
            removed += delete_in(&tx, &path_key(path))?;
        }
        tx.commit()?;
        Ok(removed)
    }

    /// Remove every row.
    pub fn clear(&self) -> Result<()> {
        let conn = self.writer.lock();
        let removed = conn.execute("DELETE FROM entries", [])?;
        conn.execute("DELETE FROM meta WHERE key = 'last_crawl'", [])?;
        info!("Cleared index ({removed} entries)");
        Ok(())
    }

    /// Persist the outcome of the latest crawl.
    pub fn record_crawl(&self, report: &CrawlReport) -> Result<()> {
        let json = serde_json::to_string(report)?;
        let conn = self.writer.lock();
        schema::write_meta(&conn, "last_crawl", &json)?;
        Ok(())
    }

    // ── Reads ────────────────────────────────────────────────────────────

    pub fn get(&self, path: &Path) -> Result<Option<Entry>> {
        let conn = self.read_conn();
        let sql = format!("SELECT {} FROM entries WHERE path = ?1", sql::ENTRY_COLUMNS);
        let entry = conn
            .query_row(&sql, params![path_key(path)], row_to_entry)
            .optional()?;
        Ok(entry)
    }

    /// Filtered, ordered, paginated listing.
    pub fn query(&self, query: &Query) -> Result<Vec<Entry>> {
        let built = sql::build_select(query);
        let conn = self.read_conn();
        let mut stmt = conn.prepare_cached(&built.sql)?;
        let rows = stmt.query_map(params_from_iter(built.params.iter()), row_to_entry)?;
        let entries = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    pub fn stats(&self) -> Result<IndexStats> {
        let conn = self.read_conn();
        let stats = conn.query_row(
            "SELECT
                 COALESCE(SUM(is_directory = 0), 0),
                 COALESCE(SUM(is_directory = 1), 0),
                 COALESCE(SUM(CASE WHEN is_directory = 0 THEN size ELSE 0 END), 0),
                 COUNT(*),
                 COALESCE(SUM(is_directory = 1 AND size_calculated = 0), 0)
             FROM entries",
            [],
            |row| {
                Ok(IndexStats {
                    file_count: to_u64(row.get(0)?),
                    dir_count: to_u64(row.get(1)?),
                    total_size: to_u64(row.get(2)?),
                    total_entries: to_u64(row.get(3)?),
                    pending_dirs: to_u64(row.get(4)?),
                })
            },
        )?;
        Ok(stats)
    }

    /// Directories whose size is still unknown, deepest paths first so a
    /// bulk pass measures small subtrees before their ancestors.
    pub fn pending_directories(&self, limit: usize) -> Result<Vec<PathBuf>> {
        let conn = self.read_conn();
        let mut stmt = conn.prepare_cached(
            "SELECT path FROM entries
             WHERE is_directory = 1 AND size_calculated = 0
             ORDER BY length(path) DESC, path ASC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![to_i64(limit as u64)], |row| {
            row.get::<_, String>(0)
        })?;
        let paths = rows
            .map(|r| r.map(PathBuf::from))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(paths)
    }

    /// Number of rows at or below `path`.
    pub fn count_under(&self, path: &Path) -> Result<u64> {
        let key = path_key(path);
        let conn = self.read_conn();
        let mut total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entries WHERE path = ?1",
            params![key],
            |row| row.get(0),
        )?;
        for (lower, upper) in descendant_ranges(&key) {
            total += conn.query_row(
                "SELECT COUNT(*) FROM entries WHERE path > ?1 AND path < ?2",
                params![lower, upper],
                |row| row.get::<_, i64>(0),
            )?;
        }
        Ok(to_u64(total))
    }

    /// File count and bytes per extension, largest total first.
    pub fn extension_totals(&self, limit: usize) -> Result<Vec<ExtensionTotal>> {
        let conn = self.read_conn();
        let mut stmt = conn.prepare_cached(
            "SELECT extension, COUNT(*), COALESCE(SUM(size), 0)
             FROM entries
             WHERE is_directory = 0
             GROUP BY extension
             ORDER BY 3 DESC, extension ASC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![to_i64(limit as u64)], |row| {
            Ok(ExtensionTotal {
                extension: row.get(0)?,
                file_count: to_u64(row.get(1)?),
                total_size: to_u64(row.get(2)?),
            })
        })?;
        let totals = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(totals)
    }

    /// The report stored by the latest [`record_crawl`](Self::record_crawl).
    pub fn last_crawl(&self) -> Result<Option<CrawlReport>> {
        let json = {
            let conn = self.read_conn();
            schema::read_meta(&conn, "last_crawl")?
        };
        match json {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }
}

/// Delete `key` and, when it names a directory, its descendants.
fn delete_in(tx: &Transaction<'_>, key: &str) -> rusqlite::Result<usize> {
    let is_directory: Option<bool> = tx
        .query_row(
            "SELECT is_directory FROM entries WHERE path = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;

    let mut removed = tx.execute("DELETE FROM entries WHERE path = ?1", params![key])?;
    if is_directory == Some(true) {
        let mut stmt = tx.prepare_cached("DELETE FROM entries WHERE path > ?1 AND path < ?2")?;
        for (lower, upper) in descendant_ranges(key) {
            removed += stmt.execute(params![lower, upper])?;
        }
    }
    Ok(removed)
}

/// Open key ranges `(lower, upper)` covering every path strictly below
/// `key`: the prefix followed by a separator. Incrementing the separator
/// byte gives the upper bound, so the primary-key index serves the lookup.
/// The lower bound is exclusive so that the root `/` is not its own
/// descendant.
pub(crate) fn descendant_ranges(key: &str) -> Vec<(String, String)> {
    let separators: &[char] = if cfg!(windows) { &['\\', '/'] } else { &['/'] };
    let base = key.trim_end_matches(separators);
    separators
        .iter()
        .map(|&sep| {
            let next = char::from(sep as u8 + 1);
            (format!("{base}{sep}"), format!("{base}{next}"))
        })
        .collect()
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<Entry> {
    let path: String = row.get(0)?;
    let name: String = row.get(1)?;
    let extension: String = row.get(4)?;
    Ok(Entry {
        path: PathBuf::from(path),
        name: CompactString::from(name),
        size: to_u64(row.get(2)?),
        is_directory: row.get(3)?,
        extension: CompactString::from(extension),
        modified_time: from_millis(row.get(5)?),
        size_calculated: row.get(6)?,
        indexed_time: from_millis(row.get(7)?),
    })
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::SortOrder;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    fn store() -> EntryStore {
        EntryStore::open_in_memory().unwrap()
    }

    /// Ignore `indexed_time`, which every upsert rewrites.
    fn strip(mut entries: Vec<Entry>) -> Vec<Entry> {
        for e in &mut entries {
            e.indexed_time = DateTime::<Utc>::default();
        }
        entries
    }

    #[test]
    fn upsert_is_idempotent() {
        let s = store();
        let entry = Entry::file("/data/a.bin", 100, at(10));
        s.upsert(&entry).unwrap();
        let stats_once = s.stats().unwrap();
        let rows_once = strip(s.query(&Query::new()).unwrap());

        s.upsert(&entry).unwrap();
        assert_eq!(s.stats().unwrap(), stats_once);
        assert_eq!(strip(s.query(&Query::new()).unwrap()), rows_once);
        assert_eq!(stats_once.total_entries, 1);
    }

    #[test]
    fn upsert_replaces_by_path() {
        let s = store();
        s.upsert(&Entry::file("/data/a.bin", 100, at(10))).unwrap();
        s.upsert(&Entry::file("/data/a.bin", 250, at(20))).unwrap();
        let got = s.get(Path::new("/data/a.bin")).unwrap().unwrap();
        assert_eq!(got.size, 250);
        assert_eq!(got.modified_time, at(20));
        assert_eq!(s.stats().unwrap().total_entries, 1);
    }

    #[test]
    fn entry_round_trips_through_store() {
        let s = store();
        let dir = Entry::directory("/data/Photos", at(77));
        s.upsert(&dir).unwrap();
        let got = s.get(Path::new("/data/Photos")).unwrap().unwrap();
        assert_eq!(got.name, "Photos");
        assert!(got.is_directory);
        assert!(!got.size_calculated);
        assert_eq!(got.modified_time, at(77));
        assert!(got.indexed_time > at(0));
    }

    #[test]
    fn files_are_always_stored_as_calculated() {
        let s = store();
        let mut odd = Entry::file("/data/f", 5, at(1));
        odd.size_calculated = false;
        s.upsert(&odd).unwrap();
        assert!(s.get(Path::new("/data/f")).unwrap().unwrap().size_calculated);
    }

    #[test]
    fn directory_delete_cascades_to_descendants() {
        let s = store();
        s.upsert_batch(&[
            Entry::directory("/a", at(1)),
            Entry::directory("/a/b", at(1)),
            Entry::file("/a/b/c.txt", 3, at(1)),
            Entry::file("/ab.txt", 9, at(1)),
        ])
        .unwrap();

        let removed = s.delete(Path::new("/a")).unwrap();
        assert_eq!(removed, 3);
        assert!(s.get(Path::new("/a")).unwrap().is_none());
        assert!(s.get(Path::new("/a/b")).unwrap().is_none());
        assert!(s.get(Path::new("/a/b/c.txt")).unwrap().is_none());
        // A sibling sharing the textual prefix survives.
        assert!(s.get(Path::new("/ab.txt")).unwrap().is_some());
    }

    #[test]
    fn file_delete_removes_only_that_row() {
        let s = store();
        s.upsert_batch(&[Entry::file("/x", 1, at(1)), Entry::file("/x/y", 1, at(1))])
            .unwrap();
        assert_eq!(s.delete(Path::new("/x")).unwrap(), 1);
        assert!(s.get(Path::new("/x/y")).unwrap().is_some());
    }

    #[test]
    fn stats_sum_files_only() {
        let s = store();
        s.upsert_batch(&[
            Entry::directory("/r", at(1)).with_calculated_size(350),
            Entry::directory("/r/sub", at(1)),
            Entry::file("/r/a", 100, at(1)),
            Entry::file("/r/b", 200, at(1)),
            Entry::file("/r/sub/c", 50, at(1)),
        ])
        .unwrap();
        let stats = s.stats().unwrap();
        assert_eq!(
            stats,
            IndexStats {
                file_count: 3,
                dir_count: 2,
                total_size: 350,
                total_entries: 5,
                pending_dirs: 1,
            }
        );
    }

    #[test]
    fn empty_store_has_zero_stats() {
        assert_eq!(store().stats().unwrap(), IndexStats::default());
    }

    #[test]
    fn size_desc_query_ranks_unmeasured_directories_last() {
        let s = store();
        s.upsert_batch(&[
            Entry::directory("/r/huge-but-unknown", at(1)),
            Entry::directory("/r/measured", at(1)).with_calculated_size(10),
            Entry::file("/r/tiny", 1, at(1)),
            Entry::directory("/r/another-unknown", at(1)),
        ])
        .unwrap();
        let ranked = s.query(&Query::new().sort(SortOrder::SizeDesc)).unwrap();
        let flags: Vec<bool> = ranked.iter().map(|e| e.size_calculated).collect();
        assert_eq!(flags, vec![true, true, false, false]);
        assert_eq!(ranked[0].name, "measured");
    }

    #[test]
    fn store_query_agrees_with_in_memory_evaluation() {
        let s = store();
        let all = vec![
            Entry::file("/r/a.log", 5_000, at(300)),
            Entry::file("/r/b.LOG", 1_500, at(200)),
            Entry::file("/r/c.txt", 9_000, at(100)),
            Entry::file("/r/100%.log", 1_000, at(50)),
            Entry::directory("/r/logs", at(10)),
            Entry::directory("/r/logs2", at(10)).with_calculated_size(4_000),
        ];
        s.upsert_batch(&all).unwrap();

        let queries = [
            Query::new().min_size(1_000).extension(".log"),
            Query::new().name_contains("LOG").sort(SortOrder::SizeDesc),
            Query::new().name_contains("%").files_only(),
            Query::new().directories_only().sort(SortOrder::MtimeDesc),
            Query::new().modified_after(at(100)).sort(SortOrder::MtimeDesc),
            Query::new().sort(SortOrder::SizeDesc).limit(2).offset(1),
            Query::new().extensions(["log", "TXT"]).sort(SortOrder::SizeDesc),
            Query::new().extension("txt").extensions([".log"]).max_size(2_000),
        ];
        for q in &queries {
            let from_db: Vec<PathBuf> = s.query(q).unwrap().into_iter().map(|e| e.path).collect();
            let in_mem: Vec<PathBuf> = q.apply(&all).into_iter().map(|e| e.path).collect();
            assert_eq!(from_db, in_mem, "mismatch for {q:?}");
        }
    }

    #[test]
    fn clear_removes_everything() {
        let s = store();
        s.upsert(&Entry::file("/a", 1, at(1))).unwrap();
        s.clear().unwrap();
        assert_eq!(s.stats().unwrap().total_entries, 0);
    }

    #[test]
    fn pending_directories_are_deepest_first() {
        let s = store();
        s.upsert_batch(&[
            Entry::directory("/r", at(1)),
            Entry::directory("/r/a", at(1)),
            Entry::directory("/r/a/deep", at(1)),
            Entry::directory("/r/done", at(1)).with_calculated_size(1),
        ])
        .unwrap();
        let pending = s.pending_directories(10).unwrap();
        assert_eq!(
            pending,
            vec![
                PathBuf::from("/r/a/deep"),
                PathBuf::from("/r/a"),
                PathBuf::from("/r")
            ]
        );
    }

    #[test]
    fn count_under_includes_root_and_descendants() {
        let s = store();
        s.upsert_batch(&[
            Entry::directory("/r", at(1)),
            Entry::file("/r/a", 1, at(1)),
            Entry::file("/r/b/c", 1, at(1)),
            Entry::file("/rx", 1, at(1)),
        ])
        .unwrap();
        assert_eq!(s.count_under(Path::new("/r")).unwrap(), 3);
        assert_eq!(s.count_under(Path::new("/nope")).unwrap(), 0);
        s.upsert(&Entry::directory("/", at(1))).unwrap();
        assert_eq!(s.count_under(Path::new("/")).unwrap(), 5);
    }

    #[test]
    fn extension_totals_group_files() {
        let s = store();
        s.upsert_batch(&[
            Entry::file("/a.log", 10, at(1)),
            Entry::file("/b.log", 30, at(1)),
            Entry::file("/c.iso", 100, at(1)),
            Entry::directory("/d.log", at(1)),
        ])
        .unwrap();
        let totals = s.extension_totals(10).unwrap();
        assert_eq!(totals.len(), 2);
        assert_eq!(totals[0].extension, ".iso");
        assert_eq!(totals[1].file_count, 2);
        assert_eq!(totals[1].total_size, 40);
    }

    #[test]
    fn descendant_ranges_use_separator_prefix() {
        let ranges = descendant_ranges("/a");
        assert!(ranges.contains(&("/a/".to_string(), "/a0".to_string())));
        let root = descendant_ranges("/");
        assert!(root.contains(&("/".to_string(), "0".to_string())));
    }

    #[test]
    fn file_backed_store_survives_reopen() {
        let tmp = tempfile::TempDir::new().unwrap();
        let db = tmp.path().join("index.db");
        {
            let s = EntryStore::open(&db).unwrap();
            s.upsert(&Entry::file("/kept.bin", 7, at(1))).unwrap();
        }
        let s = EntryStore::open(&db).unwrap();
        assert_eq!(s.stats().unwrap().total_size, 7);
        assert_eq!(s.db_path(), Some(db.as_path()));
    }
}
