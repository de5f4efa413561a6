//! sqlentity - lazy-fetching row entities and list reconciliation over SQL
//! connections.
//!
//! - [`Entity`] maps one row: reads fetch on demand, writes mark fields
//!   dirty and [`Entity::commit`] issues the INSERT or UPDATE inside a
//!   nested transaction, falling back to INSERT when the row is missing.
//! - [`EntityList`] reconciles a filtered set of rows against a desired
//!   list with one batched INSERT / CASE-UPDATE / DELETE pass.
//! - [`Schema`] metadata comes from explicit [`SchemaBuilder`] registration
//!   or from `#[derive(Entity)]`, memoized once per type.
//! - [`Connection`] wraps a [`Driver`] and reference-counts transactions so
//!   nested commits share one real COMMIT.
//!
//! # Quick Start
//!
//! ```ignore
//! use sqlentity::prelude::*;
//! use sqlentity_sqlite::SqliteConnection;
//! use std::sync::Arc;
//!
//! #[derive(Entity, Debug)]
//! #[entity(table = "accounts")]
//! struct Account {
//!     #[entity(key)]
//!     id: Option<i64>,
//!     name: Option<String>,
//!     #[entity(default = 0_i64)]
//!     balance: i64,
//! }
//!
//! let conn = Arc::new(Connection::new(SqliteConnection::open_memory()?));
//!
//! let mut account = Entity::<Account>::create(Arc::clone(&conn))?;
//! account.set("name", "Ann")?;
//! account.commit(true)?;
//! let id = account.key("id").cloned();
//!
//! let mut again = Entity::<Account>::new(conn, [("id", id.unwrap_or(Value::Null))])?;
//! assert_eq!(again.record()?.balance, 0);
//! ```

// Lets derive output name `::sqlentity` from inside this crate.
extern crate self as sqlentity;

pub mod bulk;
pub mod entity;
pub mod list;
pub mod record;
pub mod schema;

pub use bulk::BulkInsert;
pub use entity::Entity;
pub use list::{DeleteHook, EntityList, Item, ItemHandle, ItemKey, ListCommitSummary, ListField};
pub use record::{CommitMode, DynamicRecord, EntityHooks, Record};
pub use schema::{EntitySchema, FieldSpec, Filter, Schema, SchemaBuilder};

pub use sqlentity_core::{
    ColumnInfo, ConfigError, Connection, Dialect, Driver, Error, FromValue, QueryError,
    QueryErrorKind, Result, Row, Statement, TransactionError, TransactionErrorKind, TypeError,
    Value,
};
pub use sqlentity_macros::Entity;

/// DDL builders.
pub use sqlentity_schema as ddl;

/// Prelude for common imports.
pub mod prelude {
    pub use crate::{
        BulkInsert, CommitMode, Connection, Entity, EntityHooks, EntityList, EntitySchema, Error,
        FieldSpec, Filter, Item, ListField, Record, Result, SchemaBuilder, Value,
    };
}
