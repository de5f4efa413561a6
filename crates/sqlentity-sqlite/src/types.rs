//! Value binding, column decoding and error classification.
//!
//! SQLite has five storage classes (INTEGER, REAL, TEXT, BLOB, NULL). Values
//! are mapped onto them as follows:
//!
//! | Value | SQLite |
//! |-------|--------|
//! | `Bool` | INTEGER (0/1) |
//! | `Int`, `BigInt` | INTEGER |
//! | `Double` | REAL |
//! | `Text`, `Decimal`, `Json` | TEXT |
//! | `Bytes` | BLOB |

use libsqlite3_sys as ffi;
use sqlentity_core::{QueryErrorKind, Value};
use std::ffi::{CStr, c_int};

/// Extended result codes for the constraint failures callers care about.
pub const SQLITE_CONSTRAINT_FOREIGNKEY: c_int = 787;
pub const SQLITE_CONSTRAINT_PRIMARYKEY: c_int = 1555;
pub const SQLITE_CONSTRAINT_UNIQUE: c_int = 2067;

/// Bind a Value to a prepared statement parameter.
///
/// # Safety
/// - `stmt` must be a valid, non-null prepared statement handle
/// - `index` must be a valid 1-based parameter index
pub unsafe fn bind_value(stmt: *mut ffi::sqlite3_stmt, index: c_int, value: &Value) -> c_int {
    unsafe {
        match value {
            Value::Null => ffi::sqlite3_bind_null(stmt, index),
            Value::Bool(b) => ffi::sqlite3_bind_int(stmt, index, c_int::from(*b)),
            Value::Int(v) => ffi::sqlite3_bind_int(stmt, index, *v),
            Value::BigInt(v) => ffi::sqlite3_bind_int64(stmt, index, *v),
            Value::Double(v) => ffi::sqlite3_bind_double(stmt, index, *v),
            Value::Decimal(s) | Value::Text(s) => bind_text(stmt, index, s),
            Value::Json(json) => bind_text(stmt, index, &json.to_string()),
            Value::Bytes(b) => ffi::sqlite3_bind_blob(
                stmt,
                index,
                b.as_ptr().cast(),
                b.len() as c_int,
                ffi::SQLITE_TRANSIENT(),
            ),
        }
    }
}

unsafe fn bind_text(stmt: *mut ffi::sqlite3_stmt, index: c_int, s: &str) -> c_int {
    let bytes = s.as_bytes();
    // SAFETY: SQLITE_TRANSIENT makes SQLite copy the buffer before returning.
    unsafe {
        ffi::sqlite3_bind_text(
            stmt,
            index,
            bytes.as_ptr().cast(),
            bytes.len() as c_int,
            ffi::SQLITE_TRANSIENT(),
        )
    }
}

/// Read a column value from the current result row.
///
/// # Safety
/// - `stmt` must be a valid prepared statement that has just returned SQLITE_ROW
/// - `index` must be a valid 0-based column index
pub unsafe fn read_column(stmt: *mut ffi::sqlite3_stmt, index: c_int) -> Value {
    unsafe {
        match ffi::sqlite3_column_type(stmt, index) {
            ffi::SQLITE_INTEGER => {
                let v = ffi::sqlite3_column_int64(stmt, index);
                i32::try_from(v).map_or(Value::BigInt(v), Value::Int)
            }
            ffi::SQLITE_FLOAT => Value::Double(ffi::sqlite3_column_double(stmt, index)),
            ffi::SQLITE_TEXT => {
                let ptr = ffi::sqlite3_column_text(stmt, index);
                let len = ffi::sqlite3_column_bytes(stmt, index);
                if ptr.is_null() {
                    Value::Null
                } else {
                    let slice = std::slice::from_raw_parts(ptr, len as usize);
                    Value::Text(String::from_utf8_lossy(slice).into_owned())
                }
            }
            ffi::SQLITE_BLOB => {
                let ptr = ffi::sqlite3_column_blob(stmt, index);
                let len = ffi::sqlite3_column_bytes(stmt, index);
                if ptr.is_null() || len == 0 {
                    Value::Bytes(Vec::new())
                } else {
                    Value::Bytes(std::slice::from_raw_parts(ptr.cast::<u8>(), len as usize).to_vec())
                }
            }
            _ => Value::Null,
        }
    }
}

/// Get a result column name.
///
/// # Safety
/// `stmt` must be a valid prepared statement and `index` a valid column.
pub unsafe fn column_name(stmt: *mut ffi::sqlite3_stmt, index: c_int) -> Option<String> {
    unsafe {
        let ptr = ffi::sqlite3_column_name(stmt, index);
        if ptr.is_null() {
            None
        } else {
            Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
        }
    }
}

/// Classify an extended result code.
pub fn error_code_to_kind(extended: c_int) -> QueryErrorKind {
    match extended {
        SQLITE_CONSTRAINT_UNIQUE | SQLITE_CONSTRAINT_PRIMARYKEY => QueryErrorKind::UniqueViolation,
        SQLITE_CONSTRAINT_FOREIGNKEY => QueryErrorKind::ForeignKeyViolation,
        _ => match extended & 0xff {
            ffi::SQLITE_CONSTRAINT => QueryErrorKind::Constraint,
            ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED => QueryErrorKind::Busy,
            ffi::SQLITE_PERM | ffi::SQLITE_AUTH | ffi::SQLITE_READONLY => {
                QueryErrorKind::Permission
            }
            ffi::SQLITE_NOTFOUND => QueryErrorKind::NotFound,
            _ => QueryErrorKind::Database,
        },
    }
}

/// SQLSTATE equivalent for the constraint kinds, so callers written against
/// server databases can match on the same codes.
pub fn sqlstate_for(kind: QueryErrorKind) -> Option<&'static str> {
    match kind {
        QueryErrorKind::UniqueViolation => Some("23505"),
        QueryErrorKind::ForeignKeyViolation => Some("23503"),
        QueryErrorKind::Constraint => Some("23000"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_codes_classify() {
        assert_eq!(
            error_code_to_kind(SQLITE_CONSTRAINT_UNIQUE),
            QueryErrorKind::UniqueViolation
        );
        assert_eq!(
            error_code_to_kind(SQLITE_CONSTRAINT_PRIMARYKEY),
            QueryErrorKind::UniqueViolation
        );
        assert_eq!(
            error_code_to_kind(SQLITE_CONSTRAINT_FOREIGNKEY),
            QueryErrorKind::ForeignKeyViolation
        );
        // SQLITE_CONSTRAINT_NOTNULL
        assert_eq!(error_code_to_kind(1299), QueryErrorKind::Constraint);
        assert_eq!(error_code_to_kind(ffi::SQLITE_BUSY), QueryErrorKind::Busy);
        assert_eq!(error_code_to_kind(ffi::SQLITE_ERROR), QueryErrorKind::Database);
    }

    #[test]
    fn sqlstates() {
        assert_eq!(sqlstate_for(QueryErrorKind::UniqueViolation), Some("23505"));
        assert_eq!(sqlstate_for(QueryErrorKind::ForeignKeyViolation), Some("23503"));
        assert_eq!(sqlstate_for(QueryErrorKind::Syntax), None);
    }
}
