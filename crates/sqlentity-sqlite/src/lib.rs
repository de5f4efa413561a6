//! SQLite driver for sqlentity.
//!
//! Talks to SQLite through `libsqlite3-sys` (bundled amalgamation) and
//! implements [`sqlentity_core::Driver`], so a [`SqliteConnection`] can be
//! handed to [`sqlentity_core::Connection::new`].
//!
//! ```rust,ignore
//! use sqlentity_core::Connection;
//! use sqlentity_sqlite::SqliteConnection;
//!
//! let conn = Connection::new(SqliteConnection::open_memory()?);
//! conn.execute_raw("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)")?;
//! ```

// FFI bindings require unsafe code
#![allow(unsafe_code)]

pub mod connection;
pub mod types;

pub use connection::{OpenFlags, SqliteConfig, SqliteConnection};

/// Version string of the linked SQLite library.
pub fn sqlite_version() -> String {
    // SAFETY: sqlite3_libversion returns a static NUL-terminated string
    unsafe { std::ffi::CStr::from_ptr(libsqlite3_sys::sqlite3_libversion()) }
        .to_string_lossy()
        .into_owned()
}
