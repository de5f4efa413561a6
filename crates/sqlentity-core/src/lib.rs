//! Core types and traits for sqlentity.
//!
//! This crate provides the foundations the entity layer is built on:
//!
//! - [`Value`] and [`Row`] for dynamically typed parameters and results
//! - [`Driver`] for database clients and the [`Connection`] facade with
//!   reference-counted nested transactions
//! - the crate-wide [`Error`] type

pub mod connection;
pub mod error;
pub mod identifiers;
pub mod row;
pub mod value;

pub use connection::{Connection, Dialect, Driver, Statement};
pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, Error, QueryError, QueryErrorKind, Result,
    TransactionError, TransactionErrorKind, TypeError,
};
pub use identifiers::{is_plain_identifier, quote_ident, quote_ident_mysql};
pub use row::{ColumnInfo, FromValue, Row};
pub use value::Value;
