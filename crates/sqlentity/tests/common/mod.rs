//! Recording driver for statement-shape tests.
#![allow(dead_code)]

use sqlentity::{Connection, Dialect, Driver, Error, QueryError, QueryErrorKind, Result, Row, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Shared state behind [`MockDriver`]: scripted results plus a log of
/// every statement.
#[derive(Default)]
pub struct Recorder {
    calls: Mutex<Vec<Call>>,
    rows: Mutex<VecDeque<Vec<Row>>>,
    affected: Mutex<VecDeque<u64>>,
    last_id: Mutex<Option<i64>>,
    fail_on: Mutex<Option<String>>,
}

impl Recorder {
    /// Result set for the next query; queries with nothing queued return
    /// no rows.
    pub fn push_rows(&self, columns: &[&str], rows: Vec<Vec<Value>>) {
        let names: Vec<String> = columns.iter().map(|c| (*c).to_string()).collect();
        let rows = rows
            .into_iter()
            .map(|values| Row::new(names.clone(), values))
            .collect();
        self.rows.lock().unwrap().push_back(rows);
    }

    /// Affected count for the next execute; the default is 1.
    pub fn push_affected(&self, n: u64) {
        self.affected.lock().unwrap().push_back(n);
    }

    pub fn set_last_id(&self, id: Option<i64>) {
        *self.last_id.lock().unwrap() = id;
    }

    /// Fail every statement containing `fragment`.
    pub fn fail_on(&self, fragment: &str) {
        *self.fail_on.lock().unwrap() = Some(fragment.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn sql(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.sql).collect()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.sql().iter().filter(|s| s.starts_with(prefix)).count()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, sql: &str, params: &[Value]) -> Result<()> {
        if let Some(fragment) = self.fail_on.lock().unwrap().as_deref() {
            if sql.contains(fragment) {
                return Err(Error::Query(
                    QueryError::new(QueryErrorKind::Database, "scripted failure").with_sql(sql),
                ));
            }
        }
        self.calls.lock().unwrap().push(Call {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        Ok(())
    }
}

pub struct MockDriver {
    dialect: Dialect,
    recorder: Arc<Recorder>,
}

impl Driver for MockDriver {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.recorder.record(sql, params)?;
        Ok(self.recorder.rows.lock().unwrap().pop_front().unwrap_or_default())
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.recorder.record(sql, params)?;
        Ok(self.recorder.affected.lock().unwrap().pop_front().unwrap_or(1))
    }

    fn execute_raw(&self, sql: &str) -> Result<()> {
        self.recorder.record(sql, &[])
    }

    fn last_insert_id(&self) -> Option<i64> {
        *self.recorder.last_id.lock().unwrap()
    }
}

pub fn mock(dialect: Dialect) -> (Arc<Connection>, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let driver = MockDriver {
        dialect,
        recorder: Arc::clone(&recorder),
    };
    (Arc::new(Connection::new(driver)), recorder)
}

pub fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}
