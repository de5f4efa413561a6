//! SQLite connection implementation.
//!
//! Safe wrappers around the SQLite C API plus the [`Driver`] implementation
//! used by the sqlentity connection facade.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::result_large_err)]
#![allow(clippy::borrow_as_ptr)]

use crate::types;
use libsqlite3_sys as ffi;
use sqlentity_core::{
    ColumnInfo, ConnectionError, ConnectionErrorKind, Dialect, Driver, Error, QueryError,
    QueryErrorKind, Result, Row, Value,
};
use std::ffi::{CStr, CString, c_char, c_int};
use std::ptr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

// `libsqlite3-sys` omits this binding; the symbol is provided by the bundled SQLite.
unsafe extern "C" {
    fn sqlite3_close_v2(db: *mut ffi::sqlite3) -> c_int;
}

/// Configuration for opening SQLite connections.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Path to the database file, or ":memory:" for an in-memory database.
    pub path: String,
    /// Open flags (read-only, read-write, create, etc.)
    pub flags: OpenFlags,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
    /// Run `PRAGMA foreign_keys = ON` after opening.
    pub foreign_keys: bool,
}

/// Flags controlling how the database is opened.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    pub read_only: bool,
    pub read_write: bool,
    /// Create the database if it doesn't exist.
    pub create: bool,
    /// Enable URI filename interpretation.
    pub uri: bool,
}

impl OpenFlags {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Default::default()
        }
    }

    pub fn read_write() -> Self {
        Self {
            read_write: true,
            ..Default::default()
        }
    }

    pub fn create_read_write() -> Self {
        Self {
            read_write: true,
            create: true,
            ..Default::default()
        }
    }

    fn to_sqlite_flags(self) -> c_int {
        let mut flags = 0;
        if self.read_only {
            flags |= ffi::SQLITE_OPEN_READONLY;
        }
        if self.read_write {
            flags |= ffi::SQLITE_OPEN_READWRITE;
        }
        if self.create {
            flags |= ffi::SQLITE_OPEN_CREATE;
        }
        if self.uri {
            flags |= ffi::SQLITE_OPEN_URI;
        }
        // Default to read-write if no mode specified
        if flags & (ffi::SQLITE_OPEN_READONLY | ffi::SQLITE_OPEN_READWRITE) == 0 {
            flags |= ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE;
        }
        flags
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            flags: OpenFlags::create_read_write(),
            busy_timeout_ms: 5000,
            foreign_keys: true,
        }
    }
}

impl SqliteConfig {
    /// Config for a file-based database.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Config for an in-memory database.
    pub fn memory() -> Self {
        Self::default()
    }

    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }

    pub fn foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }
}

struct SqliteInner {
    db: *mut ffi::sqlite3,
}

// SAFETY: the handle is only touched while the surrounding Mutex is held.
unsafe impl Send for SqliteInner {}

/// A connection to a SQLite database.
///
/// The raw handle sits behind a mutex, so the connection is `Send + Sync`
/// and can be shared through the facade.
pub struct SqliteConnection {
    inner: Mutex<SqliteInner>,
    path: String,
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteConnection {
    /// Open a connection with the given configuration.
    pub fn open(config: &SqliteConfig) -> Result<Self> {
        let c_path = CString::new(config.path.as_str()).map_err(|_| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: "Invalid path: contains null byte".to_string(),
                source: None,
            })
        })?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        let flags = config.flags.to_sqlite_flags();

        // SAFETY: valid pointers, return code checked below
        let rc = unsafe { ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };

        if rc != ffi::SQLITE_OK {
            let msg = if db.is_null() {
                errstr(rc)
            } else {
                // SAFETY: db is non-null and must be closed even on failure
                unsafe {
                    let msg = errmsg(db);
                    ffi::sqlite3_close(db);
                    msg
                }
            };
            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: format!("Failed to open database: {}", msg),
                source: None,
            }));
        }

        if config.busy_timeout_ms > 0 {
            let ms = c_int::try_from(config.busy_timeout_ms).unwrap_or(c_int::MAX);
            // SAFETY: db is valid
            unsafe {
                ffi::sqlite3_busy_timeout(db, ms);
            }
        }

        let conn = Self {
            inner: Mutex::new(SqliteInner { db }),
            path: config.path.clone(),
        };
        if config.foreign_keys {
            conn.execute_raw("PRAGMA foreign_keys = ON")?;
        }
        tracing::debug!(path = %conn.path, "opened sqlite database");
        Ok(conn)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self> {
        Self::open(&SqliteConfig::memory())
    }

    /// Open (or create) a file-based database.
    pub fn open_file(path: impl Into<String>) -> Result<Self> {
        Self::open(&SqliteConfig::file(path))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, SqliteInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Execute SQL directly without preparing (DDL, multi-statement scripts).
    pub fn execute_raw(&self, sql: &str) -> Result<()> {
        let inner = self.lock();
        let c_sql = CString::new(sql).map_err(|_| nul_error(sql))?;
        let mut err: *mut c_char = ptr::null_mut();

        // SAFETY: all pointers are valid
        let rc =
            unsafe { ffi::sqlite3_exec(inner.db, c_sql.as_ptr(), None, ptr::null_mut(), &mut err) };

        if rc != ffi::SQLITE_OK {
            let message = if err.is_null() {
                errstr(rc)
            } else {
                // SAFETY: err was allocated by sqlite3_exec
                unsafe {
                    let msg = CStr::from_ptr(err).to_string_lossy().into_owned();
                    ffi::sqlite3_free(err.cast());
                    msg
                }
            };
            // SAFETY: db is valid
            let extended = unsafe { ffi::sqlite3_extended_errcode(inner.db) };
            return Err(query_error(sql, extended, message));
        }
        Ok(())
    }

    /// Rowid of the most recent successful INSERT on this connection.
    pub fn last_insert_rowid(&self) -> i64 {
        let inner = self.lock();
        // SAFETY: db is valid
        unsafe { ffi::sqlite3_last_insert_rowid(inner.db) }
    }

    /// Rows changed by the most recent INSERT/UPDATE/DELETE.
    pub fn changes(&self) -> u64 {
        let inner = self.lock();
        // SAFETY: db is valid
        let n = unsafe { ffi::sqlite3_changes(inner.db) };
        u64::try_from(n).unwrap_or(0)
    }

    /// Prepare and run a query, returning all rows.
    pub fn query_sync(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let inner = self.lock();
        let stmt = Prepared::new(inner.db, sql)?;
        stmt.bind_all(params)?;

        // SAFETY: stmt is valid
        let col_count = unsafe { ffi::sqlite3_column_count(stmt.raw) };
        let names = (0..col_count)
            // SAFETY: index below column count
            .map(|i| unsafe { types::column_name(stmt.raw, i) }.unwrap_or_else(|| format!("col{i}")))
            .collect();
        let columns = Arc::new(ColumnInfo::new(names));

        let mut rows = Vec::new();
        loop {
            // SAFETY: stmt is valid
            match unsafe { ffi::sqlite3_step(stmt.raw) } {
                ffi::SQLITE_ROW => {
                    let values = (0..col_count)
                        // SAFETY: a row is available
                        .map(|i| unsafe { types::read_column(stmt.raw, i) })
                        .collect();
                    rows.push(Row::with_columns(Arc::clone(&columns), values));
                }
                ffi::SQLITE_DONE => break,
                _ => return Err(stmt.error()),
            }
        }
        Ok(rows)
    }

    /// Prepare and run a statement, returning rows affected.
    pub fn execute_sync(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let inner = self.lock();
        let stmt = Prepared::new(inner.db, sql)?;
        stmt.bind_all(params)?;

        // SAFETY: stmt is valid
        match unsafe { ffi::sqlite3_step(stmt.raw) } {
            ffi::SQLITE_DONE | ffi::SQLITE_ROW => {
                // SAFETY: db is valid
                let changes = unsafe { ffi::sqlite3_changes(inner.db) };
                Ok(u64::try_from(changes).unwrap_or(0))
            }
            _ => Err(stmt.error()),
        }
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        let inner = self.lock();
        if !inner.db.is_null() {
            // SAFETY: db is valid and no statements outlive their call
            unsafe {
                sqlite3_close_v2(inner.db);
            }
        }
    }
}

impl Driver for SqliteConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.query_sync(sql, params)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.execute_sync(sql, params)
    }

    fn execute_raw(&self, sql: &str) -> Result<()> {
        SqliteConnection::execute_raw(self, sql)
    }

    fn last_insert_id(&self) -> Option<i64> {
        let id = self.last_insert_rowid();
        (id != 0).then_some(id)
    }
}

/// A prepared statement finalized on drop.
struct Prepared<'a> {
    db: *mut ffi::sqlite3,
    raw: *mut ffi::sqlite3_stmt,
    sql: &'a str,
}

impl<'a> Prepared<'a> {
    fn new(db: *mut ffi::sqlite3, sql: &'a str) -> Result<Self> {
        let c_sql = CString::new(sql).map_err(|_| nul_error(sql))?;
        let mut raw: *mut ffi::sqlite3_stmt = ptr::null_mut();

        // SAFETY: all pointers are valid
        let rc = unsafe {
            ffi::sqlite3_prepare_v2(
                db,
                c_sql.as_ptr(),
                c_sql.as_bytes().len() as c_int,
                &mut raw,
                ptr::null_mut(),
            )
        };
        let stmt = Self { db, raw, sql };
        if rc != ffi::SQLITE_OK {
            return Err(stmt.error());
        }
        Ok(stmt)
    }

    fn bind_all(&self, params: &[Value]) -> Result<()> {
        for (i, param) in params.iter().enumerate() {
            // SAFETY: stmt is valid, index is 1-based
            let rc = unsafe { types::bind_value(self.raw, (i + 1) as c_int, param) };
            if rc != ffi::SQLITE_OK {
                // SAFETY: db is valid
                let msg = unsafe { errmsg(self.db) };
                return Err(query_error(
                    self.sql,
                    rc,
                    format!("Failed to bind parameter {}: {}", i + 1, msg),
                ));
            }
        }
        Ok(())
    }

    fn error(&self) -> Error {
        // SAFETY: db is valid
        let (extended, msg) = unsafe { (ffi::sqlite3_extended_errcode(self.db), errmsg(self.db)) };
        query_error(self.sql, extended, msg)
    }
}

impl Drop for Prepared<'_> {
    fn drop(&mut self) {
        if !self.raw.is_null() {
            // SAFETY: raw came from sqlite3_prepare_v2 and is finalized once
            unsafe {
                ffi::sqlite3_finalize(self.raw);
            }
        }
    }
}

fn query_error(sql: &str, extended: c_int, message: String) -> Error {
    let kind = types::error_code_to_kind(extended);
    Error::Query(QueryError {
        kind,
        sql: Some(sql.to_string()),
        code: Some(extended),
        sqlstate: types::sqlstate_for(kind).map(str::to_string),
        message,
        source: None,
    })
}

fn nul_error(sql: &str) -> Error {
    Error::Query(QueryError::new(QueryErrorKind::Syntax, "SQL contains null byte").with_sql(sql))
}

/// # Safety
/// `db` must be a valid connection handle.
unsafe fn errmsg(db: *mut ffi::sqlite3) -> String {
    unsafe { CStr::from_ptr(ffi::sqlite3_errmsg(db)) }
        .to_string_lossy()
        .into_owned()
}

fn errstr(rc: c_int) -> String {
    // SAFETY: sqlite3_errstr returns a static string for any code
    unsafe { CStr::from_ptr(ffi::sqlite3_errstr(rc)) }
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> SqliteConnection {
        let conn = SqliteConnection::open_memory().unwrap();
        conn.execute_raw("CREATE TABLE people (id INTEGER PRIMARY KEY, name TEXT UNIQUE, age INTEGER)")
            .unwrap();
        conn
    }

    #[test]
    fn open_memory() {
        let conn = SqliteConnection::open_memory().unwrap();
        assert_eq!(conn.path(), ":memory:");
        assert_eq!(conn.last_insert_id(), None);
    }

    #[test]
    fn execute_raw_runs_scripts() {
        let conn = people();
        conn.execute_raw("INSERT INTO people (name) VALUES ('Alice'); INSERT INTO people (name) VALUES ('Bob')")
            .unwrap();
        assert_eq!(conn.changes(), 1);
        assert_eq!(conn.last_insert_rowid(), 2);
    }

    #[test]
    fn parameterized_roundtrip() {
        let conn = people();
        let n = conn
            .execute_sync(
                "INSERT INTO people (name, age) VALUES (?, ?)",
                &[Value::Text("Alice".to_string()), Value::Int(30)],
            )
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(conn.last_insert_id(), Some(1));

        let rows = conn
            .query_sync(
                "SELECT * FROM people WHERE name = ?",
                &[Value::Text("Alice".to_string())],
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_named::<i64>("id").unwrap(), 1);
        assert_eq!(rows[0].get_named::<i32>("age").unwrap(), 30);
    }

    #[test]
    fn null_and_blob_values() {
        let conn = SqliteConnection::open_memory().unwrap();
        conn.execute_raw("CREATE TABLE t (a TEXT, b BLOB, c REAL)").unwrap();
        conn.execute_sync(
            "INSERT INTO t VALUES (?, ?, ?)",
            &[Value::Null, Value::Bytes(vec![1, 2, 3]), Value::Double(2.5)],
        )
        .unwrap();
        let rows = conn.query_sync("SELECT a, b, c FROM t", &[]).unwrap();
        assert_eq!(rows[0].get(0), Some(&Value::Null));
        assert_eq!(rows[0].get(1), Some(&Value::Bytes(vec![1, 2, 3])));
        assert_eq!(rows[0].get_as::<f64>(2).unwrap(), 2.5);
    }

    #[test]
    fn update_reports_affected_rows() {
        let conn = people();
        conn.execute_raw("INSERT INTO people (name, age) VALUES ('A', 1), ('B', 1), ('C', 2)")
            .unwrap();
        let n = conn
            .execute_sync("UPDATE people SET age = ? WHERE age = ?", &[Value::Int(5), Value::Int(1)])
            .unwrap();
        assert_eq!(n, 2);
        let n = conn
            .execute_sync("DELETE FROM people WHERE id = ?", &[Value::BigInt(99)])
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn unique_violation_is_classified() {
        let conn = people();
        conn.execute_sync("INSERT INTO people (name) VALUES (?)", &[Value::from("Ann")])
            .unwrap();
        let err = conn
            .execute_sync("INSERT INTO people (name) VALUES (?)", &[Value::from("Ann")])
            .unwrap_err();
        assert!(err.is_unique_violation());
        assert_eq!(err.sqlstate(), Some("23505"));
        assert_eq!(err.code(), Some(types::SQLITE_CONSTRAINT_UNIQUE));
    }

    #[test]
    fn foreign_key_violation_is_classified() {
        let conn = people();
        conn.execute_raw("CREATE TABLE pets (id INTEGER PRIMARY KEY, owner INTEGER REFERENCES people(id))")
            .unwrap();
        let err = conn
            .execute_sync("INSERT INTO pets (owner) VALUES (?)", &[Value::BigInt(404)])
            .unwrap_err();
        assert!(err.is_foreign_key_violation());
    }

    #[test]
    fn syntax_error_keeps_sql() {
        let conn = people();
        let err = conn.query_sync("SELEC nothing", &[]).unwrap_err();
        assert_eq!(err.sql(), Some("SELEC nothing"));
        assert!(matches!(err, Error::Query(_)));
    }

    #[test]
    fn driver_transactions() {
        let conn = people();
        Driver::begin(&conn).unwrap();
        conn.execute_sync("INSERT INTO people (name) VALUES ('x')", &[]).unwrap();
        Driver::rollback(&conn).unwrap();
        assert!(conn.query_sync("SELECT * FROM people", &[]).unwrap().is_empty());

        Driver::begin(&conn).unwrap();
        conn.execute_sync("INSERT INTO people (name) VALUES ('y')", &[]).unwrap();
        Driver::commit(&conn).unwrap();
        assert_eq!(conn.query_sync("SELECT * FROM people", &[]).unwrap().len(), 1);
    }
}
