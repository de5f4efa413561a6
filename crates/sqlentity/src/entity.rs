//! Single-row mapper with lazy fetch, dirty tracking and transactional
//! commit.
//!
//! An [`Entity`] moves between four situations:
//!
//! - create mode: some key is null (or the row was found missing), the next
//!   commit INSERTs
//! - unknown existence: nothing fetched yet, the next read SELECTs
//! - synced: fetched, nothing written since
//! - dirty: fields written since the last sync or commit
//!
//! Every commit runs inside [`Connection::begin_transaction`], so entity
//! commits nest inside caller transactions and share one real COMMIT.

use crate::record::{CommitMode, DynamicRecord, EntityHooks, Record};
use crate::schema::{EntitySchema, Schema};
use sqlentity_core::{Connection, Error, Result, Value};
use std::collections::HashSet;
use std::sync::Arc;

/// One row of one table.
pub struct Entity<R: Record + EntityHooks = DynamicRecord> {
    conn: Arc<Connection>,
    schema: Arc<Schema>,
    record: R,
    keys: Vec<(String, Value)>,
    dirty: HashSet<String>,
    fetched: bool,
    exists: Option<bool>,
    is_create: bool,
    update_only: bool,
    /// Written by a batch whose generated key could not be learned.
    detached: bool,
}

impl<R: Record + EntityHooks + std::fmt::Debug> std::fmt::Debug for Entity<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("table", &self.schema.table())
            .field("keys", &self.keys)
            .field("record", &self.record)
            .field("dirty", &self.dirty)
            .field("fetched", &self.fetched)
            .field("exists", &self.exists)
            .field("is_create", &self.is_create)
            .field("detached", &self.detached)
            .finish_non_exhaustive()
    }
}

impl<R: Record + EntityHooks + EntitySchema> Entity<R> {
    /// Entity for the row identified by `keys`, using the type's own schema.
    pub fn new<K, V>(conn: Arc<Connection>, keys: impl IntoIterator<Item = (K, V)>) -> Result<Self>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Self::with_schema(conn, R::schema()?, keys)
    }

    /// Entity for a row that does not exist yet (all keys null).
    pub fn create(conn: Arc<Connection>) -> Result<Self> {
        Self::with_schema(conn, R::schema()?, std::iter::empty::<(String, Value)>())
    }
}

impl<R: Record + EntityHooks> Entity<R> {
    /// Entity over an explicitly built schema.
    ///
    /// Keys not mentioned in `keys` start as null. Naming a column that is
    /// not a key is a configuration error.
    pub fn with_schema<K, V>(
        conn: Arc<Connection>,
        schema: Arc<Schema>,
        keys: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Self>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let mut key_values: Vec<(String, Value)> = schema
            .keys()
            .iter()
            .map(|k| (k.clone(), Value::Null))
            .collect();
        for (name, value) in keys {
            let name = name.into();
            let slot = key_values
                .iter_mut()
                .find(|(k, _)| *k == name)
                .ok_or_else(|| {
                    Error::config(format!(
                        "'{}' is not a key of table '{}'",
                        name,
                        schema.table()
                    ))
                })?;
            slot.1 = value.into();
        }

        let mut record = R::from_schema(&schema)?;
        for (name, value) in &key_values {
            if !value.is_null() && schema.has_field(name) {
                record.set_field(name, value.clone())?;
            }
        }

        let mut entity = Self {
            conn,
            schema,
            record,
            keys: key_values,
            dirty: HashSet::new(),
            fetched: false,
            exists: None,
            is_create: false,
            update_only: false,
            detached: false,
        };
        if entity.has_null_key() {
            entity.enter_create_mode();
            // Non-null defaults belong to the first INSERT.
            entity.dirty = entity
                .schema
                .fields()
                .iter()
                .filter(|f| !f.default.is_null())
                .map(|f| f.name.clone())
                .collect();
        }
        Ok(entity)
    }

    /// Forbid the INSERT fallback when an UPDATE matches no row.
    pub fn update_only(mut self, update_only: bool) -> Self {
        self.update_only = update_only;
        self
    }

    pub fn set_update_only(&mut self, update_only: bool) {
        self.update_only = update_only;
    }

    /// Make the next commit an INSERT without fetching first.
    pub fn force_create(&mut self) {
        self.is_create = true;
        self.fetched = true;
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    pub fn keys(&self) -> &[(String, Value)] {
        &self.keys
    }

    pub fn key(&self, name: &str) -> Option<&Value> {
        self.keys.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn is_create(&self) -> bool {
        self.is_create
    }

    pub fn is_fetched(&self) -> bool {
        self.fetched
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Inserted by [`BulkInsert`](crate::BulkInsert) without learning its
    /// generated key. Reads see the written values without fetching;
    /// commits write nothing and report `Ok(false)`.
    pub fn is_detached(&self) -> bool {
        self.detached
    }

    pub fn is_update_only(&self) -> bool {
        self.update_only
    }

    /// Dirty column names in schema order.
    pub fn dirty_field_names(&self) -> Vec<String> {
        self.schema
            .fields()
            .iter()
            .filter(|f| self.dirty.contains(&f.name))
            .map(|f| f.name.clone())
            .collect()
    }

    /// Read a property (or column) value, fetching first if needed.
    pub fn get(&mut self, property: &str) -> Result<Value> {
        let name = self.resolve(property)?;
        self.sync()?;
        Ok(self.record.field(&name).unwrap_or(Value::Null))
    }

    /// Write a property (or column) value and mark it dirty.
    ///
    /// Does not fetch: the entity is treated as fetched from here on.
    pub fn set(&mut self, property: &str, value: impl Into<Value>) -> Result<()> {
        let name = self.resolve(property)?;
        self.write_field(&name, value.into())?;
        self.dirty.insert(name);
        self.fetched = true;
        Ok(())
    }

    /// The typed record, fetched first if needed.
    pub fn record(&mut self) -> Result<&R> {
        self.sync()?;
        Ok(&self.record)
    }

    /// The record as it is, without fetching.
    pub fn peek(&self) -> &R {
        &self.record
    }

    pub fn into_record(self) -> R {
        self.record
    }

    /// Mutate the typed record; every field whose value changed is marked
    /// dirty.
    pub fn update(&mut self, f: impl FnOnce(&mut R)) -> Result<()> {
        self.sync()?;
        let before: Vec<Option<Value>> = self
            .schema
            .fields()
            .iter()
            .map(|spec| self.record.field(&spec.name))
            .collect();
        f(&mut self.record);

        let schema = Arc::clone(&self.schema);
        for (spec, old) in schema.fields().iter().zip(before) {
            let new = self.record.field(&spec.name);
            if new != old {
                if self.is_create && schema.is_key(&spec.name) {
                    self.set_key(&spec.name, new.unwrap_or(Value::Null));
                }
                self.dirty.insert(spec.name.clone());
            }
        }
        self.fetched = true;
        Ok(())
    }

    /// All field values, fetched first if needed, keyed by property name
    /// (`use_aliases`) or column name.
    pub fn get_fields(&mut self, use_aliases: bool) -> Result<Vec<(String, Value)>> {
        self.sync()?;
        Ok(self
            .schema
            .fields()
            .iter()
            .map(|spec| {
                let name = if use_aliases { &spec.property } else { &spec.name };
                (
                    name.clone(),
                    self.record.field(&spec.name).unwrap_or(Value::Null),
                )
            })
            .collect())
    }

    pub fn get_field_names(&self, use_aliases: bool) -> Vec<String> {
        self.schema
            .fields()
            .iter()
            .map(|spec| {
                if use_aliases {
                    spec.property.clone()
                } else {
                    spec.name.clone()
                }
            })
            .collect()
    }

    /// Write many values at once, by property or column name.
    ///
    /// With `synchronized` the values are taken to mirror storage: they are
    /// stored without being marked dirty (and stop being dirty if they
    /// were). Otherwise each behaves like [`Entity::set`].
    pub fn set_fields<K, V>(
        &mut self,
        values: impl IntoIterator<Item = (K, V)>,
        synchronized: bool,
    ) -> Result<()>
    where
        K: AsRef<str>,
        V: Into<Value>,
    {
        for (name, value) in values {
            if synchronized {
                let name = self.resolve(name.as_ref())?;
                self.write_field(&name, value.into())?;
                self.dirty.remove(&name);
            } else {
                self.set(name.as_ref(), value)?;
            }
        }
        Ok(())
    }

    /// Mark a field dirty without changing it, forcing it into the next
    /// commit.
    pub fn touch_field(&mut self, property: &str) -> Result<()> {
        let name = self.resolve(property)?;
        self.dirty.insert(name);
        Ok(())
    }

    /// Whether the row exists, fetching when that is not known.
    pub fn exists(&mut self) -> Result<bool> {
        if !self.fetched || self.exists.is_none() {
            self.fetch()?;
        }
        Ok(self.exists.unwrap_or(false))
    }

    /// [`Entity::commit`] with invalidation.
    pub fn save(&mut self) -> Result<bool> {
        self.commit(true)
    }

    /// INSERT or UPDATE the dirty fields inside a (nested) transaction.
    ///
    /// `Ok(false)` reports a logical failure (nothing to insert, update-only
    /// row missing, zero rows inserted, hook veto); the transaction stack is
    /// rolled back in that case. Driver errors roll back and propagate.
    /// With `invalidate` the next read fetches again.
    #[tracing::instrument(level = "debug", skip(self), fields(table = %self.schema.table()))]
    pub fn commit(&mut self, invalidate: bool) -> Result<bool> {
        self.conn.begin_transaction()?;
        match self.commit_inner(invalidate) {
            Ok(true) => {
                if let Err(e) = self.conn.commit_transaction() {
                    self.conn.rollback_after(&e);
                    return Err(e);
                }
                Ok(true)
            }
            Ok(false) => {
                self.conn.rollback()?;
                Ok(false)
            }
            Err(e) => {
                self.conn.rollback_after(&e);
                Err(e)
            }
        }
    }

    fn commit_inner(&mut self, invalidate: bool) -> Result<bool> {
        if self.detached {
            tracing::debug!("row key unknown after batched insert");
            return Ok(false);
        }
        let mode = if self.is_create {
            CommitMode::Insert
        } else {
            CommitMode::Update
        };
        if !self.record.before_commit(mode) {
            tracing::debug!(?mode, "commit vetoed before write");
            return Ok(false);
        }

        let affected = if self.is_create {
            if self.update_only {
                tracing::debug!("update-only entity has no row to update");
                return Ok(false);
            }
            let Some(columns) = self.dirty_fields(true) else {
                tracing::debug!("nothing to insert");
                return Ok(false);
            };
            let mut values = self.outgoing_values(&columns);
            self.record.commit_fields(mode, &mut values);
            let affected = self.execute_insert(&values)?;
            if affected == 0 {
                return Ok(false);
            }
            affected
        } else {
            let Some(columns) = self.dirty_fields(false) else {
                return Ok(self.record.after_commit(CommitMode::Update));
            };
            let mut values = self.outgoing_values(&columns);
            self.record.commit_fields(mode, &mut values);
            let affected = self.execute_update(&values)?;
            if affected == 0 {
                if self.exists()? {
                    tracing::debug!("update matched an unchanged row");
                    return Ok(self.finish(CommitMode::Update, invalidate));
                }
                if self.update_only {
                    tracing::debug!("update-only entity: row is missing");
                    return Ok(false);
                }
                tracing::debug!("row is missing, retrying as insert");
                self.is_create = true;
                return self.commit_inner(invalidate);
            }
            affected
        };

        tracing::trace!(affected, "write applied");
        self.backfill_id()?;
        Ok(self.finish(mode, invalidate))
    }

    /// Columns this entity would INSERT, `None` when it is not in create
    /// mode or has nothing to write.
    pub(crate) fn insert_columns(&self) -> Option<Vec<String>> {
        if !self.is_create || self.update_only {
            return None;
        }
        self.dirty_fields(true)
    }

    /// Outgoing values for `columns`, after commit filters and the
    /// commit-fields hook.
    pub(crate) fn insert_values(&self, columns: &[String]) -> Vec<Value> {
        let mut values = self.outgoing_values(columns);
        self.record.commit_fields(CommitMode::Insert, &mut values);
        values.into_iter().map(|(_, v)| v).collect()
    }

    /// State after a successful batched INSERT.
    ///
    /// `generated_id` fills a null `id` key. With a complete key the next
    /// read fetches; otherwise the entity is detached.
    pub(crate) fn mark_inserted(&mut self, generated_id: Option<i64>) {
        self.exists = Some(true);
        self.is_create = false;
        self.dirty.clear();
        if let Some(id) = generated_id {
            if self.key("id").is_some_and(Value::is_null) {
                self.set_key("id", Value::BigInt(id));
                if self.schema.has_field("id") {
                    if let Err(e) = self.record.set_field("id", Value::BigInt(id)) {
                        tracing::trace!(error = %e, "record cannot hold generated id");
                    }
                }
            }
        }
        self.detached = self.has_null_key();
        self.fetched = self.detached;
    }

    fn finish(&mut self, mode: CommitMode, invalidate: bool) -> bool {
        self.exists = Some(true);
        self.is_create = false;
        if invalidate {
            self.fetched = false;
        }
        if !self.record.after_commit(mode) {
            tracing::debug!(?mode, "commit vetoed after write");
            return false;
        }
        // Key columns written by this commit become the row's identity.
        for name in self.dirty_field_names() {
            if self.schema.is_key(&name) {
                if let Some(value) = self.record.field(&name) {
                    self.set_key(&name, value);
                }
            }
        }
        self.dirty.clear();
        true
    }

    /// Dirty columns in schema order; for an INSERT also every non-null key
    /// that is not already dirty. `None` when nothing is dirty.
    fn dirty_fields(&self, for_insert: bool) -> Option<Vec<String>> {
        if self.dirty.is_empty() {
            return None;
        }
        let mut columns = self.dirty_field_names();
        if for_insert {
            for (name, value) in &self.keys {
                if !value.is_null() && !columns.contains(name) {
                    columns.push(name.clone());
                }
            }
        }
        Some(columns)
    }

    fn outgoing_values(&self, columns: &[String]) -> Vec<(String, Value)> {
        columns
            .iter()
            .map(|name| {
                let value = match self.schema.field(name) {
                    Some(spec) => spec.on_commit(&self.record.field(name).unwrap_or(Value::Null)),
                    None => self.key(name).cloned().unwrap_or(Value::Null),
                };
                (name.clone(), value)
            })
            .collect()
    }

    fn execute_insert(&self, values: &[(String, Value)]) -> Result<u64> {
        if values.is_empty() {
            return Ok(0);
        }
        let columns: Vec<String> = values.iter().map(|(c, _)| self.conn.quote(c)).collect();
        let placeholders = vec!["?"; values.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.schema.table_ref(self.conn.dialect()),
            columns.join(", "),
            placeholders
        );
        let params: Vec<Value> = values.iter().map(|(_, v)| v.clone()).collect();
        self.conn.execute(&sql, &params)
    }

    fn execute_update(&self, values: &[(String, Value)]) -> Result<u64> {
        if values.is_empty() {
            return Ok(0);
        }
        let assignments: Vec<String> = values
            .iter()
            .map(|(c, _)| format!("{} = ?", self.conn.quote(c)))
            .collect();
        let mut sql = format!(
            "UPDATE {} SET {} WHERE {}",
            self.schema.table_ref(self.conn.dialect()),
            assignments.join(", "),
            self.key_predicate()
        );
        if self.conn.dialect().supports_write_limit() {
            sql.push_str(" LIMIT 1");
        }
        let params: Vec<Value> = values
            .iter()
            .map(|(_, v)| v.clone())
            .chain(self.keys.iter().map(|(_, v)| v.clone()))
            .collect();
        self.conn.execute(&sql, &params)
    }

    fn key_predicate(&self) -> String {
        self.keys
            .iter()
            .map(|(k, _)| format!("{} = ?", self.conn.quote(k)))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    fn backfill_id(&mut self) -> Result<()> {
        if !self.key("id").is_some_and(Value::is_null) {
            return Ok(());
        }
        let Some(id) = self.conn.last_insert_id() else {
            return Ok(());
        };
        tracing::debug!(id, "populated id from last insert");
        self.set_key("id", Value::BigInt(id));
        if self.schema.has_field("id") {
            self.record.set_field("id", Value::BigInt(id))?;
        }
        Ok(())
    }

    /// DELETE the row in its own (nested) transaction and reset the entity
    /// into create mode.
    ///
    /// `Ok(false)` when keys are incomplete or no row matched. A miss keeps
    /// the keys and pending writes; the next read fetches again.
    #[tracing::instrument(level = "debug", skip(self), fields(table = %self.schema.table()))]
    pub fn delete(&mut self) -> Result<bool> {
        if self.has_null_key() {
            return Ok(false);
        }
        let mut sql = format!(
            "DELETE FROM {} WHERE {}",
            self.schema.table_ref(self.conn.dialect()),
            self.key_predicate()
        );
        if self.conn.dialect().supports_write_limit() {
            sql.push_str(" LIMIT 1");
        }
        let params: Vec<Value> = self.keys.iter().map(|(_, v)| v.clone()).collect();

        let affected = self.conn.transaction(|conn| conn.execute(&sql, &params))?;
        if affected == 0 {
            tracing::debug!("no row to delete");
            self.invalidate(false);
            return Ok(false);
        }
        self.dirty.clear();
        self.invalidate(true);
        Ok(true)
    }

    /// Forget what is known about storage.
    ///
    /// Plain invalidation makes the next read fetch again. `deleted`
    /// instead puts the entity into create mode with null keys.
    pub fn invalidate(&mut self, deleted: bool) {
        self.exists = Some(false);
        if !deleted {
            self.fetched = false;
            return;
        }
        self.is_create = true;
        self.fetched = true;
        self.detached = false;
        let names: Vec<String> = self.keys.iter().map(|(k, _)| k.clone()).collect();
        for name in names {
            self.set_key(&name, Value::Null);
            if self.schema.has_field(&name) {
                if let Err(e) = self.record.set_field(&name, Value::Null) {
                    tracing::trace!(field = %name, error = %e, "key field cannot hold NULL");
                }
            }
        }
    }

    fn sync(&mut self) -> Result<()> {
        if !self.fetched {
            self.fetch()?;
        }
        Ok(())
    }

    /// SELECT the row by key; dirty fields keep their in-memory values.
    #[tracing::instrument(level = "debug", skip(self), fields(table = %self.schema.table()))]
    fn fetch(&mut self) -> Result<()> {
        if self.detached {
            self.fetched = true;
            return Ok(());
        }
        if self.has_null_key() {
            self.enter_create_mode();
            return Ok(());
        }

        let dialect = self.conn.dialect();
        let columns: Vec<String> = if self.schema.fields().is_empty() {
            self.keys.iter().map(|(k, _)| dialect.quote(k)).collect()
        } else {
            self.schema
                .fields()
                .iter()
                .map(|f| dialect.quote(&f.name))
                .collect()
        };
        let sql = format!(
            "SELECT {} FROM {} WHERE {} LIMIT 1",
            columns.join(", "),
            self.schema.table_ref(dialect),
            self.key_predicate()
        );
        let params: Vec<Value> = self.keys.iter().map(|(_, v)| v.clone()).collect();

        match self.conn.query_one(&sql, &params)? {
            Some(row) => {
                let schema = Arc::clone(&self.schema);
                for spec in schema.fields() {
                    if self.dirty.contains(&spec.name) {
                        continue;
                    }
                    if let Some(stored) = row.get_by_name(&spec.name) {
                        self.record.set_field(&spec.name, spec.on_sync(stored))?;
                    }
                }
                self.exists = Some(true);
                self.is_create = false;
            }
            None => {
                tracing::debug!("row not found");
                self.exists = Some(false);
                self.is_create = true;
            }
        }
        self.fetched = true;
        Ok(())
    }

    fn enter_create_mode(&mut self) {
        self.is_create = true;
        self.fetched = true;
        self.exists = Some(false);
    }

    fn has_null_key(&self) -> bool {
        self.keys.iter().any(|(_, v)| v.is_null())
    }

    fn set_key(&mut self, name: &str, value: Value) {
        if let Some(slot) = self.keys.iter_mut().find(|(k, _)| k == name) {
            slot.1 = value;
        }
    }

    fn resolve(&self, property: &str) -> Result<String> {
        self.schema
            .resolve(property)
            .map(|spec| spec.name.clone())
            .ok_or_else(|| {
                Error::config(format!(
                    "'{}' is not a registered field of '{}'",
                    property,
                    self.schema.table()
                ))
            })
    }

    fn write_field(&mut self, name: &str, value: Value) -> Result<()> {
        if self.is_create && self.schema.is_key(name) {
            self.set_key(name, value.clone());
        }
        if self.record.set_field(name, value)? {
            Ok(())
        } else {
            Err(Error::config(format!(
                "record for '{}' has no field '{}'",
                self.schema.table(),
                name
            )))
        }
    }
}
