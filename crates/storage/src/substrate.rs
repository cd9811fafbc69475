//! Hardened connection factory.
//!
//! Single source of truth for every SQLite connection in the engine. Every
//! connection created here is guaranteed WAL journaling, a 5000 ms busy
//! timeout, NORMAL synchronous mode, foreign-key enforcement and a large
//! memory-mapped I/O window. Readers additionally get `query_only=1` so any
//! write attempt raises at the SQLite level; the writer disables WAL
//! autocheckpointing so it controls flush timing itself.

use cortex_types::error::StorageError;
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{Connection, OpenFlags, ToSql};
use std::path::Path;

/// How long SQLite retries on a locked database before failing.
pub const BUSY_TIMEOUT_MS: u64 = 5000;

/// Memory-mapped I/O window (~20 GB of virtual address space; SQLite clamps
/// to the platform limit).
pub const MMAP_SIZE: u64 = 20_000_000_000;

const LOCK_MARKERS: &[&str] = &["database is locked", "busy"];

/// Maps a rusqlite error to the substrate taxonomy: lock timeouts and
/// constraint violations get their own kinds.
pub fn map_sqlite_err(e: rusqlite::Error) -> StorageError {
    let text = e.to_string();
    let lower = text.to_lowercase();
    if LOCK_MARKERS.iter().any(|m| lower.contains(m)) {
        return StorageError::LockTimeout(text);
    }
    if let rusqlite::Error::SqliteFailure(inner, _) = &e {
        if inner.code == rusqlite::ErrorCode::ConstraintViolation {
            return StorageError::Constraint(text);
        }
    }
    StorageError::Backend(text)
}

fn apply_pragmas(
    conn: &Connection,
    read_only: bool,
    writer_mode: bool,
) -> Result<(), StorageError> {
    // execute_batch ignores result rows, which row-returning pragmas like
    // journal_mode produce.
    conn.execute_batch(&format!(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         PRAGMA foreign_keys=ON;
         PRAGMA busy_timeout={BUSY_TIMEOUT_MS};
         PRAGMA mmap_size={MMAP_SIZE};"
    ))
    .map_err(map_sqlite_err)?;
    if read_only {
        conn.execute_batch("PRAGMA query_only=1;")
            .map_err(map_sqlite_err)?;
    }
    if writer_mode {
        // The writer controls flush timing; autocheckpoint off.
        conn.execute_batch(
            "PRAGMA wal_autocheckpoint=0;
             PRAGMA temp_store=MEMORY;
             PRAGMA cache_size=-64000;",
        )
        .map_err(map_sqlite_err)?;
    }
    Ok(())
}

/// Opens the single writer connection: full read/write, autocheckpoint off.
pub fn open_writer(db_path: &Path) -> Result<Connection, StorageError> {
    let conn = Connection::open(db_path).map_err(map_sqlite_err)?;
    apply_pragmas(&conn, false, true)?;
    Ok(conn)
}

/// Opens a reader: `query_only` is enforced at the engine level so any
/// write attempt raises.
pub fn open_reader(db_path: &Path) -> Result<Connection, StorageError> {
    let conn = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(map_sqlite_err)?;
    apply_pragmas(&conn, true, false)?;
    Ok(conn)
}

/// An owned SQL parameter or result cell, sendable across the writer
/// channel.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// 64-bit integer.
    Integer(i64),
    /// 64-bit float.
    Real(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Blob(Vec<u8>),
}

impl SqlValue {
    /// The integer value, if this cell holds one.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// The float value; integers widen.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Real(v) => Some(*v),
            SqlValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// The text value, if this cell holds one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Consumes the cell into its text value.
    pub fn into_string(self) -> Option<String> {
        match self {
            SqlValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Integer(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            SqlValue::Real(v) => ToSqlOutput::Owned(Value::Real(*v)),
            SqlValue::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            SqlValue::Blob(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
        })
    }
}

impl From<ValueRef<'_>> for SqlValue {
    fn from(v: ValueRef<'_>) -> Self {
        match v {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(i) => SqlValue::Integer(i),
            ValueRef::Real(r) => SqlValue::Real(r),
            ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}
impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}
impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}
impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}
impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Blob(v)
    }
}
impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => SqlValue::Null,
        }
    }
}

/// Builds a `Vec<SqlValue>` parameter list from heterogeneous values.
#[macro_export]
macro_rules! sql_params {
    () => { Vec::<$crate::substrate::SqlValue>::new() };
    ($($value:expr),+ $(,)?) => {
        vec![$($crate::substrate::SqlValue::from($value)),+]
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn writer_pragmas_applied() {
        let dir = tempdir().unwrap();
        let conn = open_writer(&dir.path().join("t.db")).unwrap();
        let mode: String = conn
            .pragma_query_value(None, "journal_mode", |r| r.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
        let auto: i64 = conn
            .pragma_query_value(None, "wal_autocheckpoint", |r| r.get(0))
            .unwrap();
        assert_eq!(auto, 0);
    }

    #[test]
    fn reader_rejects_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.db");
        let w = open_writer(&path).unwrap();
        w.execute("CREATE TABLE t (x INTEGER)", []).unwrap();
        drop(w);

        let r = open_reader(&path).unwrap();
        let err = r.execute("INSERT INTO t (x) VALUES (1)", []);
        assert!(err.is_err());
        // Reads still work.
        let n: i64 = r.query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0)).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn sql_params_macro_covers_option() {
        let params = sql_params![1i64, "text", Option::<String>::None, 2.5f64];
        assert_eq!(params[0], SqlValue::Integer(1));
        assert_eq!(params[2], SqlValue::Null);
        assert_eq!(params.len(), 4);
    }
}
