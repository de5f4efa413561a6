//! Set reconciliation over a filtered slice of one table.
//!
//! An [`EntityList`] works on plain column maps instead of typed entities.
//! Callers queue inserts, updates and deletes (directly or by handing a
//! desired state to [`EntityList::apply_list`]) and flush them with one
//! [`EntityList::commit`]: a prepared INSERT per new row, one UPDATE built
//! from `CASE` expressions for all changed rows and one DELETE.

use crate::schema::Filter;
use sqlentity_core::{Connection, Error, Result, Value, is_plain_identifier};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// One row as column name → value.
pub type Item = BTreeMap<String, Value>;

/// Key of a list row.
///
/// Numeric values (integers, booleans and integral doubles) collapse to
/// [`ItemKey::Int`] so `Int(7)` and `BigInt(7)` address the same row. Text
/// keys are kept exactly as stored: `"007"` and `"7"` are different rows.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ItemKey {
    Int(i64),
    Text(String),
}

impl ItemKey {
    /// `None` for NULL.
    #[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(ItemKey::Int(i64::from(*b))),
            Value::Int(v) => Some(ItemKey::Int(i64::from(*v))),
            Value::BigInt(v) => Some(ItemKey::Int(*v)),
            Value::Double(v) if v.fract() == 0.0 && v.is_finite() => {
                Some(ItemKey::Int(*v as i64))
            }
            Value::Double(v) => Some(ItemKey::Text(v.to_string())),
            Value::Decimal(s) => Some(
                s.trim()
                    .parse::<i64>()
                    .map_or_else(|_| ItemKey::Text(s.clone()), ItemKey::Int),
            ),
            Value::Text(s) => Some(ItemKey::Text(s.clone())),
            Value::Bytes(b) => Some(ItemKey::Text(String::from_utf8_lossy(b).into_owned())),
            Value::Json(v) => Some(ItemKey::Text(v.to_string())),
        }
    }

    /// The value bound for this key in UPDATE and DELETE statements.
    pub fn to_value(&self) -> Value {
        match self {
            ItemKey::Int(v) => Value::BigInt(*v),
            ItemKey::Text(s) => Value::Text(s.clone()),
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemKey::Int(v) => write!(f, "{v}"),
            ItemKey::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for ItemKey {
    fn from(v: i64) -> Self {
        ItemKey::Int(v)
    }
}

impl From<&str> for ItemKey {
    fn from(v: &str) -> Self {
        ItemKey::Text(v.to_string())
    }
}

/// Shared view of a queued row.
///
/// The list keeps a clone; after [`EntityList::commit`] a new row's handle
/// carries the key the database assigned.
#[derive(Debug, Clone, Default)]
pub struct ItemHandle(Rc<RefCell<Item>>);

impl ItemHandle {
    fn new(item: Item) -> Self {
        Self(Rc::new(RefCell::new(item)))
    }

    pub fn get(&self, column: &str) -> Option<Value> {
        self.0.borrow().get(column).cloned()
    }

    pub fn set(&self, column: impl Into<String>, value: impl Into<Value>) {
        self.0.borrow_mut().insert(column.into(), value.into());
    }

    /// Copy of the current row contents.
    pub fn snapshot(&self) -> Item {
        self.0.borrow().clone()
    }

    pub fn key(&self, key_field: &str) -> Option<ItemKey> {
        self.0
            .borrow()
            .get(key_field)
            .and_then(ItemKey::from_value)
    }

    fn merge(&self, payload: Item) {
        self.0.borrow_mut().extend(payload);
    }
}

/// A column the list reads and writes.
#[derive(Debug, Clone)]
pub struct ListField {
    pub field: String,
    /// Alternate payload name looked up when `field` is absent.
    pub alias: Option<String>,
    /// Applied to payload values before they are compared or written.
    pub map: Option<Filter>,
}

impl ListField {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            alias: None,
            map: None,
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn map(mut self, filter: Filter) -> Self {
        self.map = Some(filter);
        self
    }

    /// The payload value for this column, mapped. `None` when neither the
    /// field nor the alias is present.
    fn lookup(&self, payload: &Item) -> Option<Value> {
        let raw = payload
            .get(&self.field)
            .or_else(|| self.alias.as_ref().and_then(|a| payload.get(a)))?;
        Some(match &self.map {
            Some(filter) => filter.apply(raw),
            None => raw.clone(),
        })
    }
}

/// Row counts written by one [`EntityList::commit`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListCommitSummary {
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
}

impl ListCommitSummary {
    pub fn is_empty(&self) -> bool {
        self.inserted == 0 && self.updated == 0 && self.deleted == 0
    }
}

/// Runs before the DELETE and may edit the pending key set.
pub type DeleteHook = Box<dyn FnMut(&Connection, &mut BTreeSet<ItemKey>) -> Result<()>>;

/// Filtered collection of rows of one table.
pub struct EntityList {
    conn: Arc<Connection>,
    table: String,
    key_field: String,
    fields: Vec<ListField>,
    filters: Vec<String>,
    filter_vars: Vec<Value>,
    delete_hook: Option<DeleteHook>,
    items: Option<BTreeMap<ItemKey, Item>>,
    new_items: Vec<ItemHandle>,
    updated: BTreeMap<ItemKey, ItemHandle>,
    deleted: BTreeSet<ItemKey>,
}

impl fmt::Debug for EntityList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityList")
            .field("table", &self.table)
            .field("key_field", &self.key_field)
            .field("fields", &self.fields)
            .field("filters", &self.filters)
            .field("loaded", &self.items.as_ref().map(BTreeMap::len))
            .field("new", &self.new_items.len())
            .field("updated", &self.updated.len())
            .field("deleted", &self.deleted)
            .finish_non_exhaustive()
    }
}

impl EntityList {
    pub fn new(
        conn: Arc<Connection>,
        table: impl Into<String>,
        key_field: impl Into<String>,
    ) -> Result<Self> {
        let table = table.into();
        let key_field = key_field.into();
        for name in [&table, &key_field] {
            if !is_plain_identifier(name) {
                return Err(Error::config(format!("invalid identifier '{name}'")));
            }
        }
        Ok(Self {
            conn,
            table,
            key_field,
            fields: Vec::new(),
            filters: Vec::new(),
            filter_vars: Vec::new(),
            delete_hook: None,
            items: None,
            new_items: Vec::new(),
            updated: BTreeMap::new(),
            deleted: BTreeSet::new(),
        })
    }

    pub fn add_field(&mut self, field: ListField) -> Result<()> {
        if !is_plain_identifier(&field.field) {
            return Err(Error::config(format!(
                "invalid identifier '{}'",
                field.field
            )));
        }
        if field.field == self.key_field || self.fields.iter().any(|f| f.field == field.field) {
            return Err(Error::config(format!(
                "column '{}' is already part of the list",
                field.field
            )));
        }
        self.fields.push(field);
        Ok(())
    }

    pub fn with_field(mut self, field: ListField) -> Result<Self> {
        self.add_field(field)?;
        Ok(self)
    }

    /// Scope every SELECT, UPDATE and DELETE by a predicate fragment.
    /// `?` placeholders bind to [`EntityList::set_filter_variables`].
    pub fn add_filter(&mut self, fragment: impl Into<String>) {
        self.filters.push(fragment.into());
        self.items = None;
    }

    pub fn set_filter_variables(&mut self, vars: Vec<Value>) {
        self.filter_vars = vars;
        self.items = None;
    }

    pub fn set_delete_hook(&mut self, hook: DeleteHook) {
        self.delete_hook = Some(hook);
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn key_field(&self) -> &str {
        &self.key_field
    }

    pub fn has_pending(&self) -> bool {
        !(self.new_items.is_empty() && self.updated.is_empty() && self.deleted.is_empty())
    }

    pub fn pending_deletes(&self) -> &BTreeSet<ItemKey> {
        &self.deleted
    }

    /// Current rows keyed by key, loaded on first use or when `force_reload`.
    pub fn get_items_with_keys(&mut self, force_reload: bool) -> Result<&BTreeMap<ItemKey, Item>> {
        if force_reload || self.items.is_none() {
            let loaded = self.load()?;
            self.items = Some(loaded);
        }
        Ok(self.items.get_or_insert_default())
    }

    pub fn get_items(&mut self) -> Result<Vec<Item>> {
        Ok(self.get_items_with_keys(false)?.values().cloned().collect())
    }

    fn load(&self) -> Result<BTreeMap<ItemKey, Item>> {
        let columns = if self.fields.is_empty() {
            "*".to_string()
        } else {
            std::iter::once(&self.key_field)
                .chain(self.fields.iter().map(|f| &f.field))
                .map(|c| self.conn.quote(c))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let mut sql = format!("SELECT {} FROM {}", columns, self.conn.quote(&self.table));
        if let Some(predicate) = self.filter_predicate() {
            sql.push_str(" WHERE ");
            sql.push_str(&predicate);
        }

        let rows = self.conn.query(&sql, &self.filter_vars)?;
        let mut items = BTreeMap::new();
        for row in rows {
            let item = row.into_map();
            match item.get(&self.key_field).and_then(ItemKey::from_value) {
                Some(key) => {
                    items.insert(key, item);
                }
                None => tracing::warn!(table = %self.table, "skipping row without key"),
            }
        }
        tracing::debug!(table = %self.table, rows = items.len(), "loaded list");
        Ok(items)
    }

    /// Queue a row for insertion. Its key, if any, is sent as given.
    pub fn add_item(&mut self, payload: Item) -> ItemHandle {
        let handle = ItemHandle::new(payload);
        self.new_items.push(handle.clone());
        handle
    }

    /// Queue a row under `key`.
    ///
    /// A key already in the list becomes an update when `override_existing`
    /// is set and is ignored (`None`) otherwise.
    pub fn add_item_with_key(
        &mut self,
        key: impl Into<Value>,
        mut payload: Item,
        override_existing: bool,
    ) -> Result<Option<ItemHandle>> {
        let key = key.into();
        let Some(item_key) = ItemKey::from_value(&key) else {
            return Ok(Some(self.add_item(payload)));
        };
        if self.get_items_with_keys(false)?.contains_key(&item_key) {
            if !override_existing {
                return Ok(None);
            }
            return Ok(Some(self.queue_update(item_key, payload)));
        }
        payload.insert(self.key_field.clone(), key);
        Ok(Some(self.add_item(payload)))
    }

    /// Queue new values for an existing row; repeated calls merge.
    pub fn update_item(&mut self, key: impl Into<Value>, payload: Item) -> Result<ItemHandle> {
        let item_key = self.require_key(&key.into())?;
        Ok(self.queue_update(item_key, payload))
    }

    /// Queue a row for deletion, dropping any pending update for it.
    pub fn delete_item(&mut self, key: impl Into<Value>) -> Result<()> {
        let item_key = self.require_key(&key.into())?;
        self.updated.remove(&item_key);
        self.deleted.insert(item_key);
        Ok(())
    }

    /// Queue whatever makes the list equal `desired`.
    ///
    /// Rows without a key or with an unknown key are inserted, rows whose
    /// configured columns differ are updated and loaded rows missing from
    /// `desired` are deleted. Returns the handles queued for insert or
    /// update.
    pub fn apply_list(&mut self, desired: impl IntoIterator<Item = Item>) -> Result<Vec<ItemHandle>> {
        let current = self.get_items_with_keys(false)?.clone();
        let mut handles = Vec::new();
        let mut seen = BTreeSet::new();

        for item in desired {
            let key = item.get(&self.key_field).and_then(ItemKey::from_value);
            match key.and_then(|k| current.get(&k).map(|stored| (k, stored))) {
                Some((key, stored)) => {
                    seen.insert(key.clone());
                    if self.differs(&item, stored) {
                        handles.push(self.queue_update(key, item));
                    }
                }
                None => handles.push(self.add_item(item)),
            }
        }

        for key in current.keys() {
            if !seen.contains(key) {
                self.updated.remove(key);
                self.deleted.insert(key.clone());
            }
        }

        tracing::debug!(
            table = %self.table,
            new = self.new_items.len(),
            updated = self.updated.len(),
            deleted = self.deleted.len(),
            "applied list"
        );
        Ok(handles)
    }

    fn differs(&self, payload: &Item, stored: &Item) -> bool {
        if self.fields.is_empty() {
            let columns: BTreeSet<&String> = payload
                .keys()
                .chain(stored.keys())
                .filter(|c| **c != self.key_field)
                .collect();
            return columns
                .into_iter()
                .any(|c| !option_loose_eq(payload.get(c), stored.get(c)));
        }
        self.fields.iter().any(|field| {
            let wanted = field.lookup(payload);
            !option_loose_eq(wanted.as_ref(), stored.get(&field.field))
        })
    }

    fn queue_update(&mut self, key: ItemKey, mut payload: Item) -> ItemHandle {
        payload.insert(self.key_field.clone(), key.to_value());
        self.deleted.remove(&key);
        if let Some(handle) = self.updated.get(&key) {
            handle.merge(payload);
            return handle.clone();
        }
        let handle = ItemHandle::new(payload);
        self.updated.insert(key, handle.clone());
        handle
    }

    fn require_key(&self, key: &Value) -> Result<ItemKey> {
        ItemKey::from_value(key).ok_or_else(|| {
            Error::config(format!(
                "list '{}' needs a non-null '{}'",
                self.table, self.key_field
            ))
        })
    }

    /// Flush queued inserts, updates and deletes in one transaction.
    ///
    /// On success the queues are emptied and the next read reloads. On
    /// error everything is rolled back and the queues are kept.
    #[tracing::instrument(level = "debug", skip(self), fields(table = %self.table))]
    pub fn commit(&mut self) -> Result<ListCommitSummary> {
        if !self.has_pending() {
            return Ok(ListCommitSummary::default());
        }
        let conn = Arc::clone(&self.conn);
        let summary = conn.transaction(|conn| {
            Ok(ListCommitSummary {
                inserted: self.flush_inserts(conn)?,
                updated: self.flush_updates(conn)?,
                deleted: self.flush_deletes(conn)?,
            })
        })?;

        self.new_items.clear();
        self.updated.clear();
        self.deleted.clear();
        self.items = None;
        tracing::debug!(
            inserted = summary.inserted,
            updated = summary.updated,
            deleted = summary.deleted,
            "list committed"
        );
        Ok(summary)
    }

    fn flush_inserts(&self, conn: &Connection) -> Result<u64> {
        let mut inserted = 0;
        for handle in &self.new_items {
            let payload = handle.snapshot();
            let key_value = payload.get(&self.key_field).cloned().unwrap_or(Value::Null);

            let mut columns = vec![self.key_field.clone()];
            let mut values = vec![key_value.clone()];
            if self.fields.is_empty() {
                for (column, value) in payload.iter().filter(|(c, _)| **c != self.key_field) {
                    columns.push(column.clone());
                    values.push(value.clone());
                }
            } else {
                for field in &self.fields {
                    columns.push(field.field.clone());
                    values.push(field.lookup(&payload).unwrap_or(Value::Null));
                }
            }

            let quoted: Vec<String> = columns.iter().map(|c| conn.quote(c)).collect();
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                conn.quote(&self.table),
                quoted.join(", "),
                vec!["?"; columns.len()].join(", ")
            );
            let mut stmt = conn.prepare(sql);
            for (position, value) in values.into_iter().enumerate() {
                stmt.bind(position + 1, value)?;
            }
            inserted += stmt.execute()?;

            if key_value.is_null() {
                if let Some(id) = conn.last_insert_id() {
                    handle.set(self.key_field.clone(), id);
                }
            }
        }
        Ok(inserted)
    }

    fn flush_updates(&self, conn: &Connection) -> Result<u64> {
        if self.updated.is_empty() {
            return Ok(0);
        }
        let rows: Vec<(&ItemKey, Item)> = self
            .updated
            .iter()
            .map(|(key, handle)| (key, handle.snapshot()))
            .collect();

        let candidates: Vec<String> = if self.fields.is_empty() {
            rows.iter()
                .flat_map(|(_, item)| item.keys())
                .filter(|c| **c != self.key_field)
                .cloned()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        } else {
            self.fields.iter().map(|f| f.field.clone()).collect()
        };

        let key_col = conn.quote(&self.key_field);
        let mut assignments = Vec::new();
        let mut params = Vec::new();
        for column in &candidates {
            let mut whens = Vec::new();
            for (key, item) in &rows {
                let value = match self.fields.iter().find(|f| f.field == *column) {
                    Some(field) => field.lookup(item),
                    None => item.get(column).cloned(),
                };
                if let Some(value) = value {
                    whens.push("WHEN ? THEN ?");
                    params.push(key.to_value());
                    params.push(value);
                }
            }
            // Columns no row touches are left out.
            if whens.is_empty() {
                continue;
            }
            let quoted = conn.quote(column);
            assignments.push(format!(
                "{quoted} = CASE {key_col} {} ELSE {quoted} END",
                whens.join(" ")
            ));
        }
        if assignments.is_empty() {
            return Ok(0);
        }

        params.extend(rows.iter().map(|(key, _)| key.to_value()));
        let mut sql = format!(
            "UPDATE {} SET {} WHERE {key_col} IN ({})",
            conn.quote(&self.table),
            assignments.join(", "),
            vec!["?"; rows.len()].join(", ")
        );
        if let Some(predicate) = self.filter_predicate() {
            sql.push_str(" AND ");
            sql.push_str(&predicate);
        }
        params.extend(self.filter_vars.iter().cloned());
        conn.execute(&sql, &params)
    }

    fn flush_deletes(&mut self, conn: &Connection) -> Result<u64> {
        if let Some(hook) = self.delete_hook.as_mut() {
            hook(conn, &mut self.deleted)?;
        }
        if self.deleted.is_empty() {
            return Ok(0);
        }
        let mut sql = format!(
            "DELETE FROM {} WHERE {} IN ({})",
            conn.quote(&self.table),
            conn.quote(&self.key_field),
            vec!["?"; self.deleted.len()].join(", ")
        );
        if let Some(predicate) = self.filter_predicate() {
            sql.push_str(" AND ");
            sql.push_str(&predicate);
        }
        let params: Vec<Value> = self
            .deleted
            .iter()
            .map(ItemKey::to_value)
            .chain(self.filter_vars.iter().cloned())
            .collect();
        conn.execute(&sql, &params)
    }

    fn filter_predicate(&self) -> Option<String> {
        if self.filters.is_empty() {
            return None;
        }
        Some(
            self.filters
                .iter()
                .map(|f| format!("({f})"))
                .collect::<Vec<_>>()
                .join(" AND "),
        )
    }
}

fn option_loose_eq(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.loose_eq(b),
        (None, None) => true,
        _ => false,
    }
}
