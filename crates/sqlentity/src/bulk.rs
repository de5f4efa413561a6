//! Multi-row INSERT for batches of new entities.

use crate::entity::Entity;
use crate::record::{DynamicRecord, EntityHooks, Record};
use sqlentity_core::{Connection, Dialect, Error, Result, Value};
use std::sync::Arc;

/// Collects create-mode entities of one schema and writes them with a
/// single INSERT.
///
/// Only `commit_fields` hooks run; `before_commit` and `after_commit` are
/// per-entity and are skipped.
///
/// When every written entity has a null `id` key, the generated ids are
/// read back on SQLite and MySQL, which number the rows of one multi-row
/// INSERT consecutively. Entities whose key is still unknown afterwards
/// are detached (see [`Entity::is_detached`]).
#[derive(Debug)]
pub struct BulkInsert<R: Record + EntityHooks = DynamicRecord> {
    conn: Arc<Connection>,
    entities: Vec<Entity<R>>,
}

impl<R: Record + EntityHooks> BulkInsert<R> {
    pub fn new(conn: Arc<Connection>) -> Self {
        Self {
            conn,
            entities: Vec::new(),
        }
    }

    /// Queue an entity. It must be in create mode and share the batch's
    /// table.
    pub fn add(&mut self, entity: Entity<R>) -> Result<()> {
        if !entity.is_create() {
            return Err(Error::config(format!(
                "bulk insert into '{}' needs entities in create mode",
                entity.schema().table()
            )));
        }
        if let Some(first) = self.entities.first() {
            if first.schema().table() != entity.schema().table() {
                return Err(Error::config(format!(
                    "bulk insert mixes tables '{}' and '{}'",
                    first.schema().table(),
                    entity.schema().table()
                )));
            }
        }
        self.entities.push(entity);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entities(&self) -> &[Entity<R>] {
        &self.entities
    }

    pub fn into_entities(self) -> Vec<Entity<R>> {
        self.entities
    }

    /// INSERT every queued entity that still has something to write.
    ///
    /// The column list is the union of the entities' insert columns in
    /// schema order; an entity that did not write a column sends its
    /// current value for it. Returns the affected row count.
    #[tracing::instrument(level = "debug", skip(self), fields(rows = self.entities.len()))]
    pub fn execute(&mut self) -> Result<u64> {
        let pending: Vec<(usize, Vec<String>)> = self
            .entities
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.insert_columns().map(|cols| (i, cols)))
            .collect();
        let Some((first, _)) = pending.first() else {
            return Ok(0);
        };
        let schema = Arc::clone(self.entities[*first].schema());

        let wanted = |name: &str| pending.iter().any(|(_, cols)| cols.iter().any(|c| c == name));
        let mut columns: Vec<String> = schema
            .fields()
            .iter()
            .map(|f| f.name.clone())
            .filter(|name| wanted(name))
            .collect();
        for key in schema.keys() {
            if !schema.has_field(key) && wanted(key) {
                columns.push(key.clone());
            }
        }

        let row = format!("({})", vec!["?"; columns.len()].join(", "));
        let sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            schema.table_ref(self.conn.dialect()),
            columns
                .iter()
                .map(|c| self.conn.quote(c))
                .collect::<Vec<_>>()
                .join(", "),
            vec![row; pending.len()].join(", ")
        );
        let params: Vec<Value> = pending
            .iter()
            .flat_map(|(i, _)| self.entities[*i].insert_values(&columns))
            .collect();

        let generated = pending
            .iter()
            .all(|(i, _)| self.entities[*i].key("id").is_some_and(Value::is_null));
        let (affected, first_id) = self.conn.transaction(|conn| {
            let affected = conn.execute(&sql, &params)?;
            let first_id = if generated && affected == pending.len() as u64 {
                first_generated_id(conn, pending.len())
            } else {
                None
            };
            Ok((affected, first_id))
        })?;
        for (n, (i, _)) in pending.iter().enumerate() {
            let id = first_id.map(|first| first + n as i64);
            self.entities[*i].mark_inserted(id);
        }
        tracing::debug!(affected, table = schema.table(), "bulk insert");
        Ok(affected)
    }
}

/// Id of the first row of a multi-row INSERT of `rows` rows.
fn first_generated_id(conn: &Connection, rows: usize) -> Option<i64> {
    let last = conn.last_insert_id()?;
    match conn.dialect() {
        // Reports the last row.
        Dialect::Sqlite => Some(last - (rows as i64 - 1)),
        // Reports the first row.
        Dialect::MySql => Some(last),
        Dialect::Generic => None,
    }
}
