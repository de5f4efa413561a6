//! Column types for DDL generation.

use sqlentity_core::Dialect;

/// SQL column types understood by [`CreateTable`](crate::CreateTable).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlType {
    Integer,
    BigInt,
    Real,
    Double,
    Decimal { precision: u8, scale: u8 },
    Boolean,
    VarChar(u32),
    Text,
    Blob,
    DateTime,
    Json,
    /// Verbatim type name
    Custom(String),
}

impl SqlType {
    /// Type name as written in a column definition for `dialect`.
    pub fn sql_name(&self, dialect: Dialect) -> String {
        match (self, dialect) {
            (SqlType::Integer, _) => "INTEGER".to_string(),
            // SQLite's rowid alias must be spelled INTEGER; BIGINT keeps the
            // same affinity elsewhere.
            (SqlType::BigInt, Dialect::Sqlite) => "INTEGER".to_string(),
            (SqlType::BigInt, _) => "BIGINT".to_string(),
            (SqlType::Real, _) => "REAL".to_string(),
            (SqlType::Double, Dialect::Sqlite) => "REAL".to_string(),
            (SqlType::Double, Dialect::MySql) => "DOUBLE".to_string(),
            (SqlType::Double, Dialect::Generic) => "DOUBLE PRECISION".to_string(),
            (SqlType::Decimal { precision, scale }, _) => {
                format!("DECIMAL({}, {})", precision, scale)
            }
            (SqlType::Boolean, Dialect::MySql) => "TINYINT(1)".to_string(),
            (SqlType::Boolean, _) => "BOOLEAN".to_string(),
            (SqlType::VarChar(len), _) => format!("VARCHAR({})", len),
            (SqlType::Text, _) => "TEXT".to_string(),
            (SqlType::Blob, _) => "BLOB".to_string(),
            (SqlType::DateTime, Dialect::Generic) => "TIMESTAMP".to_string(),
            (SqlType::DateTime, _) => "DATETIME".to_string(),
            (SqlType::Json, Dialect::Sqlite) => "TEXT".to_string(),
            (SqlType::Json, _) => "JSON".to_string(),
            (SqlType::Custom(name), _) => name.clone(),
        }
    }

    pub const fn is_integer(&self) -> bool {
        matches!(self, SqlType::Integer | SqlType::BigInt)
    }
}

/// Action taken on referencing rows when the referenced row changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferentialAction {
    NoAction,
    Restrict,
    Cascade,
    SetNull,
}

impl ReferentialAction {
    pub const fn as_sql(self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_dialect() {
        assert_eq!(SqlType::BigInt.sql_name(Dialect::Sqlite), "INTEGER");
        assert_eq!(SqlType::BigInt.sql_name(Dialect::MySql), "BIGINT");
        assert_eq!(SqlType::Double.sql_name(Dialect::Generic), "DOUBLE PRECISION");
        assert_eq!(SqlType::Boolean.sql_name(Dialect::MySql), "TINYINT(1)");
        assert_eq!(SqlType::Json.sql_name(Dialect::Sqlite), "TEXT");
        assert_eq!(
            SqlType::Decimal { precision: 10, scale: 2 }.sql_name(Dialect::Sqlite),
            "DECIMAL(10, 2)"
        );
        assert_eq!(SqlType::Custom("CITEXT".into()).sql_name(Dialect::Generic), "CITEXT");
    }
}
