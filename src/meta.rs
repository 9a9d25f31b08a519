//! Flat path-record metadata index backed by SQLite.
//!
//! One row per path. Directory semantics are reconstructed from prefix
//! queries alone: a single-segment prefix filter emulates Depth:1 listing,
//! and a full-prefix match implements cascading delete.

use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::path::Path;

use crate::error::{AppError, AppResult};

/// Sentinel bucket id recorded for directory rows; never a real shard id.
pub const DIR_BUCKET: &str = "@dir";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: String,
    pub bucket_id: String,
    pub is_dir: bool,
    pub size: u64,
    pub updated_at: i64,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    path TEXT PRIMARY KEY,
    bucket_id TEXT NOT NULL,
    is_dir INTEGER NOT NULL DEFAULT 0,
    size INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL
);
"#;

const RECORD_COLS: &str = "path, bucket_id, is_dir, size, updated_at";

/// Handle over the record table. Cheap to share behind an Arc; all access is
/// serialized through the connection mutex.
pub struct MetadataIndex {
    conn: Mutex<Connection>,
}

fn db_err(e: rusqlite::Error) -> AppError {
    AppError::internal("db_error", e.to_string())
}

/// Escape LIKE wildcards so a path containing '%' or '_' matches literally.
fn like_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        path: row.get(0)?,
        bucket_id: row.get(1)?,
        is_dir: row.get::<_, i64>(2)? != 0,
        size: row.get::<_, i64>(3)? as u64,
        updated_at: row.get(4)?,
    })
}

impl MetadataIndex {
    /// Open or create the record table at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// In-memory index (for testing).
    pub fn in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Fetch the record for an exact path, if present.
    pub fn lookup(&self, path: &str) -> AppResult<Option<FileRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!("SELECT {} FROM records WHERE path = ?1", RECORD_COLS))
            .map_err(db_err)?;
        let mut rows = stmt.query(params![path]).map_err(db_err)?;
        match rows.next().map_err(db_err)? {
            Some(row) => Ok(Some(row_to_record(row).map_err(db_err)?)),
            None => Ok(None),
        }
    }

    /// The record for `path` (if any) followed by its direct children only.
    ///
    /// A child is a record whose path is `path + "/" + one segment`; records
    /// nested deeper are excluded by the depth-limiting clause.
    pub fn list_children(&self, path: &str) -> AppResult<Vec<FileRecord>> {
        let mut out = Vec::new();
        if let Some(own) = self.lookup(path)? {
            out.push(own);
        }
        let prefix = if path == "/" { "/".to_string() } else { format!("{}/", path) };
        let esc = like_escape(&prefix);
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM records \
                 WHERE path LIKE ?1 ESCAPE '\\' AND path NOT LIKE ?2 ESCAPE '\\' AND path <> ?3 \
                 ORDER BY path",
                RECORD_COLS
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(
                params![format!("{}%", esc), format!("{}%/%", esc), prefix],
                row_to_record,
            )
            .map_err(db_err)?;
        for row in rows {
            out.push(row.map_err(db_err)?);
        }
        Ok(out)
    }

    /// Every record strictly under `path + "/"`, at any depth.
    pub fn list_descendants(&self, path: &str) -> AppResult<Vec<FileRecord>> {
        let esc = like_escape(path);
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM records WHERE path LIKE ?1 ESCAPE '\\' ORDER BY path",
                RECORD_COLS
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![format!("{}/%", esc)], row_to_record)
            .map_err(db_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(db_err)?);
        }
        Ok(out)
    }

    /// Insert-or-replace the record for a path.
    pub fn upsert(&self, path: &str, bucket_id: &str, is_dir: bool, size: u64, now: i64) -> AppResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO records (path, bucket_id, is_dir, size, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(path) DO UPDATE SET \
                 bucket_id = excluded.bucket_id, \
                 is_dir = excluded.is_dir, \
                 size = excluded.size, \
                 updated_at = excluded.updated_at",
            params![path, bucket_id, is_dir as i64, size as i64, now],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Create a directory record. Fails with Conflict when any record
    /// already exists at the exact path.
    pub fn insert_directory(&self, path: &str, now: i64) -> AppResult<()> {
        let conn = self.conn.lock();
        let res = conn.execute(
            "INSERT INTO records (path, bucket_id, is_dir, size, updated_at) \
             VALUES (?1, ?2, 1, 0, ?3)",
            params![path, DIR_BUCKET, now],
        );
        match res {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(AppError::conflict("already_exists", format!("record exists at {}", path)))
            }
            Err(e) => Err(db_err(e)),
        }
    }

    /// Remove the exact record and every record under `path + "/"`.
    pub fn delete_path_and_descendants(&self, path: &str) -> AppResult<usize> {
        let esc = like_escape(path);
        let conn = self.conn.lock();
        let n = conn
            .execute(
                "DELETE FROM records WHERE path = ?1 OR path LIKE ?2 ESCAPE '\\'",
                params![path, format!("{}/%", esc)],
            )
            .map_err(db_err)?;
        Ok(n)
    }

    /// Rewrite the matching record's path field. Descendant records keep
    /// their old prefix; nothing else on the row changes.
    pub fn rename_path(&self, old: &str, new: &str) -> AppResult<()> {
        let conn = self.conn.lock();
        let res = conn.execute("UPDATE records SET path = ?2 WHERE path = ?1", params![old, new]);
        match res {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(AppError::conflict("destination_exists", format!("record exists at {}", new)))
            }
            Err(e) => Err(db_err(e)),
        }
    }
}
