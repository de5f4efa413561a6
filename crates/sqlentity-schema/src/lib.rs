//! Declarative table definitions rendered to DDL.
//!
//! - [`CreateTable`] / [`ColumnDef`] describe one table
//! - [`SqlType`] maps column types onto each [`Dialect`](sqlentity_core::Dialect)
//! - [`DdlScript`] collects statements and applies them through a
//!   [`Connection`](sqlentity_core::Connection)

pub mod create;
pub mod types;

pub use create::{ColumnDef, CreateTable, DdlScript};
pub use types::{ReferentialAction, SqlType};

/// Start a CREATE TABLE builder.
pub fn create_table(table: impl Into<String>) -> CreateTable {
    CreateTable::new(table)
}
