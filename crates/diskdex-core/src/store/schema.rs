/// SQLite schema, pragmas and version handling for the entry store.
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};

/// Bump when the `entries` layout changes; a mismatch resets the index.
pub const SCHEMA_VERSION: &str = "1";

const CREATE_TABLES_SQL: &str = "
    CREATE TABLE IF NOT EXISTS entries (
        path            TEXT    PRIMARY KEY,
        name            TEXT    NOT NULL,
        size            INTEGER NOT NULL DEFAULT 0,
        is_directory    INTEGER NOT NULL DEFAULT 0,
        extension       TEXT    NOT NULL DEFAULT '',
        modified_time   INTEGER NOT NULL DEFAULT 0,
        size_calculated INTEGER NOT NULL DEFAULT 1,
        indexed_time    INTEGER NOT NULL DEFAULT 0
    ) WITHOUT ROWID;

    CREATE INDEX IF NOT EXISTS idx_entries_name ON entries (name);
    CREATE INDEX IF NOT EXISTS idx_entries_ext ON entries (extension);
    CREATE INDEX IF NOT EXISTS idx_entries_rank ON entries (size_calculated, size);
    CREATE INDEX IF NOT EXISTS idx_entries_mtime ON entries (modified_time);
    CREATE INDEX IF NOT EXISTS idx_entries_kind ON entries (is_directory, size);

    CREATE TABLE IF NOT EXISTS meta (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    ) WITHOUT ROWID;
";

/// WAL lets the read connection proceed while a crawl batch commits.
pub fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA temp_store = MEMORY;
         PRAGMA cache_size = -65536;
         PRAGMA busy_timeout = 5000;",
    )
}

pub fn read_meta(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
        row.get(0)
    })
    .optional()
}

pub fn write_meta(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}

/// Create missing tables and reconcile the schema version.
pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(CREATE_TABLES_SQL)?;
    match read_meta(conn, "schema_version")? {
        Some(v) if v == SCHEMA_VERSION => {}
        Some(v) => {
            warn!("Index schema {v} does not match {SCHEMA_VERSION}; resetting index");
            conn.execute_batch("DROP TABLE IF EXISTS entries; DROP TABLE IF EXISTS meta;")?;
            conn.execute_batch(CREATE_TABLES_SQL)?;
            write_meta(conn, "schema_version", SCHEMA_VERSION)?;
        }
        None => {
            info!("Initialising index schema {SCHEMA_VERSION}");
            write_meta(conn, "schema_version", SCHEMA_VERSION)?;
        }
    }
    Ok(())
}
