//! Database driver trait and the connection facade.
//!
//! - [`Driver`] - what a database client must provide (queries, affected
//!   row counts, last insert id, real transaction statements)
//! - [`Connection`] - the facade entities talk to; it owns the nested
//!   transaction depth so that only the outermost begin/commit pair reaches
//!   the database
//! - [`Statement`] - positional bind-then-execute wrapper
//!
//! Everything here is synchronous and blocking.

use crate::error::{Error, Result, TransactionError, TransactionErrorKind};
use crate::identifiers::{quote_ident, quote_ident_mysql};
use crate::row::Row;
use crate::value::Value;
use std::fmt;
use std::sync::{Mutex, PoisonError};

/// SQL dialect spoken by a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// SQLite: double-quoted identifiers, no `UPDATE ... LIMIT`.
    Sqlite,
    /// MySQL / MariaDB: backtick identifiers, `UPDATE ... LIMIT` allowed.
    MySql,
    /// ANSI quoting, no `LIMIT` on writes.
    #[default]
    Generic,
}

impl Dialect {
    /// Quote an identifier for this dialect.
    pub fn quote(self, name: &str) -> String {
        match self {
            Dialect::MySql => quote_ident_mysql(name),
            Dialect::Sqlite | Dialect::Generic => quote_ident(name),
        }
    }

    /// Whether `UPDATE` and `DELETE` accept a trailing `LIMIT n`.
    pub const fn supports_write_limit(self) -> bool {
        matches!(self, Dialect::MySql)
    }

    /// Lowercase dialect name, for logs.
    pub const fn name(self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::MySql => "mysql",
            Dialect::Generic => "generic",
        }
    }
}

/// A database client.
///
/// Parameters are positional `?` placeholders. Implementations map native
/// failures into [`Error::Query`] so that callers can tell duplicate-key and
/// foreign-key violations apart from other failures.
pub trait Driver: Send + Sync {
    /// The dialect this driver speaks.
    fn dialect(&self) -> Dialect;

    /// Execute a query and return all rows.
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a statement and return the number of affected rows.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Execute one or more statements without parameters.
    fn execute_raw(&self, sql: &str) -> Result<()>;

    /// Row id produced by the most recent successful INSERT, if any.
    fn last_insert_id(&self) -> Option<i64>;

    fn begin(&self) -> Result<()> {
        self.execute_raw("BEGIN")
    }

    fn commit(&self) -> Result<()> {
        self.execute_raw("COMMIT")
    }

    fn rollback(&self) -> Result<()> {
        self.execute_raw("ROLLBACK")
    }
}

/// Connection facade with reference-counted nested transactions.
///
/// `begin_transaction` only opens a real transaction when the depth goes
/// from 0 to 1 and `commit_transaction` only commits when it drops from 1 to
/// 0. `rollback` always unwinds the whole stack.
///
/// ```rust,ignore
/// conn.begin_transaction()?;      // BEGIN
/// conn.begin_transaction()?;      // depth 2, no SQL
/// conn.commit_transaction()?;     // depth 1, no SQL
/// conn.commit_transaction()?;     // COMMIT
/// ```
pub struct Connection {
    driver: Box<dyn Driver>,
    depth: Mutex<usize>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("dialect", &self.driver.dialect())
            .field("depth", &self.transaction_depth())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Wrap a driver.
    pub fn new(driver: impl Driver + 'static) -> Self {
        Self::from_boxed(Box::new(driver))
    }

    pub fn from_boxed(driver: Box<dyn Driver>) -> Self {
        Self {
            driver,
            depth: Mutex::new(0),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.driver.dialect()
    }

    /// Quote an identifier for this connection's dialect.
    pub fn quote(&self, name: &str) -> String {
        self.driver.dialect().quote(name)
    }

    /// Execute a parameterized query and return all rows.
    pub fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        tracing::trace!(sql = %sql, params = params.len(), "query");
        self.driver.query(sql, params)
    }

    /// Execute a parameterized query and return the first row.
    pub fn query_one(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        Ok(self.query(sql, params)?.into_iter().next())
    }

    /// Execute a parameterized statement and return affected rows.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        tracing::trace!(sql = %sql, params = params.len(), "execute");
        self.driver.execute(sql, params)
    }

    /// Execute raw SQL (possibly several statements) without parameters.
    pub fn execute_raw(&self, sql: &str) -> Result<()> {
        tracing::trace!(sql = %sql, "execute_raw");
        self.driver.execute_raw(sql)
    }

    pub fn last_insert_id(&self) -> Option<i64> {
        self.driver.last_insert_id()
    }

    /// Prepare a statement for positional binding.
    pub fn prepare<'c>(&'c self, sql: impl Into<String>) -> Statement<'c> {
        Statement {
            conn: self,
            sql: sql.into(),
            params: Vec::new(),
            row_count: 0,
        }
    }

    /// Current nesting depth (0 when no transaction is open).
    pub fn transaction_depth(&self) -> usize {
        *self.depth.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction_depth() > 0
    }

    /// Enter a (possibly nested) transaction.
    pub fn begin_transaction(&self) -> Result<()> {
        let mut depth = self.depth.lock().unwrap_or_else(PoisonError::into_inner);
        if *depth == 0 {
            tracing::debug!(dialect = self.driver.dialect().name(), "BEGIN");
            self.driver.begin()?;
        }
        *depth += 1;
        tracing::trace!(depth = *depth, "transaction depth");
        Ok(())
    }

    /// Leave one nesting level; the outermost level issues the real COMMIT.
    ///
    /// If the real COMMIT fails the depth stays at 1 so the caller can still
    /// roll back.
    pub fn commit_transaction(&self) -> Result<()> {
        let mut depth = self.depth.lock().unwrap_or_else(PoisonError::into_inner);
        match *depth {
            0 => Err(Error::Transaction(TransactionError {
                kind: TransactionErrorKind::NotActive,
                message: "commit without an open transaction".to_string(),
            })),
            1 => {
                tracing::debug!("COMMIT");
                self.driver.commit()?;
                *depth = 0;
                Ok(())
            }
            _ => {
                *depth -= 1;
                tracing::trace!(depth = *depth, "transaction depth");
                Ok(())
            }
        }
    }

    /// Alias for [`Connection::commit_transaction`].
    pub fn end_transaction(&self) -> Result<()> {
        self.commit_transaction()
    }

    /// Roll back the whole transaction stack regardless of depth.
    ///
    /// The depth is reset to 0 even when the driver reports a failure.
    pub fn rollback(&self) -> Result<()> {
        let mut depth = self.depth.lock().unwrap_or_else(PoisonError::into_inner);
        if *depth == 0 {
            tracing::trace!("rollback with no open transaction");
            return Ok(());
        }
        tracing::debug!(depth = *depth, "ROLLBACK");
        *depth = 0;
        self.driver.rollback()
    }

    /// Run `f` inside a nested transaction, committing on `Ok` and rolling
    /// back on `Err`.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Self) -> Result<T>,
    {
        self.begin_transaction()?;
        match f(self) {
            Ok(value) => {
                if let Err(e) = self.commit_transaction() {
                    self.rollback_after(&e);
                    return Err(e);
                }
                Ok(value)
            }
            Err(e) => {
                self.rollback_after(&e);
                Err(e)
            }
        }
    }

    /// Roll back while unwinding `cause`; a second failure is only logged.
    pub fn rollback_after(&self, cause: &Error) {
        if let Err(rollback_err) = self.rollback() {
            tracing::warn!(
                error = %rollback_err,
                cause = %cause,
                "rollback failed while unwinding"
            );
        }
    }
}

/// A statement with positionally bound parameters.
///
/// Positions are 1-based like the usual driver APIs. Unbound positions
/// below the highest bound one are sent as NULL.
#[derive(Debug)]
pub struct Statement<'c> {
    conn: &'c Connection,
    sql: String,
    params: Vec<Value>,
    row_count: u64,
}

impl Statement<'_> {
    /// Bind `value` at 1-based `position`.
    pub fn bind(&mut self, position: usize, value: impl Into<Value>) -> Result<&mut Self> {
        if position == 0 {
            return Err(Error::Custom(
                "bind positions start at 1".to_string(),
            ));
        }
        if self.params.len() < position {
            self.params.resize(position, Value::Null);
        }
        self.params[position - 1] = value.into();
        Ok(self)
    }

    /// Bind every value in order starting at position 1.
    pub fn bind_all(&mut self, values: impl IntoIterator<Item = Value>) -> &mut Self {
        self.params = values.into_iter().collect();
        self
    }

    /// Execute and remember the affected row count.
    pub fn execute(&mut self) -> Result<u64> {
        self.row_count = self.conn.execute(&self.sql, &self.params)?;
        Ok(self.row_count)
    }

    /// Execute as a query; `row_count` becomes the number of rows returned.
    pub fn query(&mut self) -> Result<Vec<Row>> {
        let rows = self.conn.query(&self.sql, &self.params)?;
        self.row_count = rows.len() as u64;
        Ok(rows)
    }

    /// Rows affected (or returned) by the last execution.
    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }
}
