//! Field storage behind an [`Entity`](crate::Entity).

use crate::schema::{FieldSpec, Schema};
use sqlentity_core::{FromValue, Result, Value};
use std::collections::BTreeMap;

/// Storage for one row's field values, addressed by column name.
///
/// `#[derive(Entity)]` implements this for plain structs; [`DynamicRecord`]
/// covers schemas registered at runtime.
pub trait Record: Sized {
    /// A record holding every field's schema default.
    fn from_schema(schema: &Schema) -> Result<Self>;

    /// Current value of column `name`, `None` if the record has no such column.
    fn field(&self, name: &str) -> Option<Value>;

    /// Store `value` into column `name`.
    ///
    /// Returns `Ok(false)` when the record has no such column and a type
    /// error when the value does not fit the field.
    fn set_field(&mut self, name: &str, value: Value) -> Result<bool>;
}

/// Which statement a commit is about to run (or just ran).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    Insert,
    Update,
}

impl CommitMode {
    pub const fn is_insert(self) -> bool {
        matches!(self, CommitMode::Insert)
    }
}

/// Commit callbacks. Every method has a permissive default.
pub trait EntityHooks {
    /// Runs inside the transaction before any statement; `false` vetoes.
    fn before_commit(&mut self, _mode: CommitMode) -> bool {
        true
    }

    /// Runs after the write and before the real COMMIT; `false` rolls back.
    fn after_commit(&mut self, _mode: CommitMode) -> bool {
        true
    }

    /// Rewrite outgoing `(column, value)` pairs in place, after commit
    /// filters and right before execution.
    fn commit_fields(&self, _mode: CommitMode, _fields: &mut [(String, Value)]) {}
}

/// Schema-shaped map of values for entities without a dedicated struct.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DynamicRecord {
    values: BTreeMap<String, Value>,
}

impl DynamicRecord {
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }
}

impl Record for DynamicRecord {
    fn from_schema(schema: &Schema) -> Result<Self> {
        Ok(Self {
            values: schema
                .fields()
                .iter()
                .map(|f: &FieldSpec| (f.name.clone(), f.default.clone()))
                .collect(),
        })
    }

    fn field(&self, name: &str) -> Option<Value> {
        self.values.get(name).cloned()
    }

    fn set_field(&mut self, name: &str, value: Value) -> Result<bool> {
        match self.values.get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl EntityHooks for DynamicRecord {}

/// Initial value for a typed field: the Rust default when the schema
/// default is NULL, otherwise the converted schema default.
#[doc(hidden)]
pub fn initial_value<T: FromValue + Default>(schema: &Schema, name: &str) -> Result<T> {
    match schema.field(name).map(|f| &f.default) {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => T::from_value(value),
    }
}
