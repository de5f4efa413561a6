//! CREATE TABLE / CREATE INDEX builders.

use crate::types::{ReferentialAction, SqlType};
use sqlentity_core::{Connection, Dialect, Result};

/// One column of a [`CreateTable`].
#[derive(Debug, Clone)]
pub struct ColumnDef {
    name: String,
    sql_type: SqlType,
    nullable: bool,
    primary_key: bool,
    auto_increment: bool,
    unique: bool,
    default: Option<String>,
    references: Option<ForeignKey>,
}

#[derive(Debug, Clone)]
struct ForeignKey {
    table: String,
    column: String,
    on_delete: Option<ReferentialAction>,
}

impl ColumnDef {
    /// A nullable column with no constraints.
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            nullable: true,
            primary_key: false,
            auto_increment: false,
            unique: false,
            default: None,
            references: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Part of the primary key (implies NOT NULL).
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Default expression, inserted verbatim.
    pub fn default_expr(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }

    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.references = Some(ForeignKey {
            table: table.into(),
            column: column.into(),
            on_delete: None,
        });
        self
    }

    /// ON DELETE action for the foreign key set by [`ColumnDef::references`].
    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        if let Some(fk) = &mut self.references {
            fk.on_delete = Some(action);
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Builder for CREATE TABLE statements.
///
/// ```
/// use sqlentity_core::Dialect;
/// use sqlentity_schema::{ColumnDef, CreateTable, SqlType};
///
/// let sql = CreateTable::new("heroes")
///     .if_not_exists()
///     .column(ColumnDef::new("id", SqlType::BigInt).primary_key().auto_increment())
///     .column(ColumnDef::new("name", SqlType::Text).not_null())
///     .build(Dialect::Sqlite);
/// assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"heroes\""));
/// ```
#[derive(Debug, Clone)]
pub struct CreateTable {
    table: String,
    if_not_exists: bool,
    columns: Vec<ColumnDef>,
}

impl CreateTable {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            if_not_exists: false,
            columns: Vec::new(),
        }
    }

    pub fn if_not_exists(mut self) -> Self {
        self.if_not_exists = true;
        self
    }

    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Render the statement for `dialect`.
    pub fn build(&self, dialect: Dialect) -> String {
        let mut sql = String::from("CREATE TABLE ");
        if self.if_not_exists {
            sql.push_str("IF NOT EXISTS ");
        }
        sql.push_str(&dialect.quote(&self.table));
        sql.push_str(" (\n  ");

        let pk_cols: Vec<&ColumnDef> = self.columns.iter().filter(|c| c.primary_key).collect();
        // SQLite only allows AUTOINCREMENT on an inline single-column key.
        let inline_pk = dialect == Dialect::Sqlite
            && pk_cols.len() == 1
            && pk_cols[0].auto_increment
            && pk_cols[0].sql_type.is_integer();

        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|c| column_definition(c, dialect, inline_pk))
            .collect();

        if !pk_cols.is_empty() && !inline_pk {
            let cols: Vec<String> = pk_cols.iter().map(|c| dialect.quote(&c.name)).collect();
            parts.push(format!("PRIMARY KEY ({})", cols.join(", ")));
        }

        for c in &self.columns {
            if c.unique && !c.primary_key {
                parts.push(format!(
                    "CONSTRAINT {} UNIQUE ({})",
                    dialect.quote(&format!("uk_{}_{}", self.table, c.name)),
                    dialect.quote(&c.name)
                ));
            }
            if let Some(fk) = &c.references {
                let mut constraint = format!(
                    "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {}({})",
                    dialect.quote(&format!("fk_{}_{}", self.table, c.name)),
                    dialect.quote(&c.name),
                    dialect.quote(&fk.table),
                    dialect.quote(&fk.column)
                );
                if let Some(action) = fk.on_delete {
                    constraint.push_str(" ON DELETE ");
                    constraint.push_str(action.as_sql());
                }
                parts.push(constraint);
            }
        }

        sql.push_str(&parts.join(",\n  "));
        sql.push_str("\n)");
        sql
    }
}

fn column_definition(column: &ColumnDef, dialect: Dialect, inline_pk: bool) -> String {
    let mut def = format!(
        "{} {}",
        dialect.quote(&column.name),
        column.sql_type.sql_name(dialect)
    );

    if column.primary_key && inline_pk {
        def.push_str(" PRIMARY KEY AUTOINCREMENT");
        return def;
    }
    if !column.nullable {
        def.push_str(" NOT NULL");
    }
    if column.auto_increment {
        match dialect {
            Dialect::MySql => def.push_str(" AUTO_INCREMENT"),
            Dialect::Generic => def.push_str(" GENERATED BY DEFAULT AS IDENTITY"),
            // Non-key integer columns cannot auto-increment in SQLite.
            Dialect::Sqlite => {}
        }
    }
    if let Some(default) = &column.default {
        def.push_str(" DEFAULT ");
        def.push_str(default);
    }
    def
}

/// An ordered list of DDL statements.
#[derive(Debug, Default)]
pub struct DdlScript {
    statements: Vec<String>,
    dialect: Dialect,
}

impl DdlScript {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            statements: Vec::new(),
            dialect,
        }
    }

    /// Add a CREATE TABLE IF NOT EXISTS statement.
    pub fn create_table(mut self, table: CreateTable) -> Self {
        self.statements
            .push(table.if_not_exists().build(self.dialect));
        self
    }

    pub fn create_index(mut self, name: &str, table: &str, columns: &[&str], unique: bool) -> Self {
        let unique_str = if unique { "UNIQUE " } else { "" };
        let cols: Vec<String> = columns.iter().map(|c| self.dialect.quote(c)).collect();
        self.statements.push(format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
            unique_str,
            self.dialect.quote(name),
            self.dialect.quote(table),
            cols.join(", ")
        ));
        self
    }

    pub fn raw(mut self, sql: impl Into<String>) -> Self {
        self.statements.push(sql.into());
        self
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    pub fn build(self) -> Vec<String> {
        self.statements
    }

    /// Execute every statement inside one transaction.
    pub fn apply(&self, conn: &Connection) -> Result<()> {
        conn.transaction(|conn| {
            for sql in &self.statements {
                tracing::debug!(sql = %sql, "applying DDL");
                conn.execute_raw(sql)?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heroes() -> CreateTable {
        CreateTable::new("heroes")
            .column(
                ColumnDef::new("id", SqlType::BigInt)
                    .primary_key()
                    .auto_increment(),
            )
            .column(ColumnDef::new("name", SqlType::Text).not_null().unique())
            .column(ColumnDef::new("age", SqlType::Integer))
            .column(
                ColumnDef::new("team_id", SqlType::BigInt)
                    .references("teams", "id")
                    .on_delete(ReferentialAction::SetNull),
            )
    }

    #[test]
    fn sqlite_inlines_autoincrement_key() {
        let sql = heroes().build(Dialect::Sqlite);
        assert!(sql.starts_with("CREATE TABLE \"heroes\" ("));
        assert!(sql.contains("\"id\" INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert!(!sql.contains("PRIMARY KEY (\"id\")"));
        assert!(sql.contains("\"name\" TEXT NOT NULL"));
        assert!(sql.contains("\"age\" INTEGER,"));
    }

    #[test]
    fn mysql_uses_table_level_key() {
        let sql = heroes().build(Dialect::MySql);
        assert!(sql.contains("`id` BIGINT NOT NULL AUTO_INCREMENT"));
        assert!(sql.contains("PRIMARY KEY (`id`)"));
    }

    #[test]
    fn constraints_are_rendered() {
        let sql = heroes().build(Dialect::Generic);
        assert!(sql.contains("CONSTRAINT \"uk_heroes_name\" UNIQUE (\"name\")"));
        assert!(sql.contains(
            "CONSTRAINT \"fk_heroes_team_id\" FOREIGN KEY (\"team_id\") REFERENCES \"teams\"(\"id\") ON DELETE SET NULL"
        ));
        assert!(sql.contains("GENERATED BY DEFAULT AS IDENTITY"));
    }

    #[test]
    fn composite_key_and_default() {
        let sql = CreateTable::new("memberships")
            .if_not_exists()
            .column(ColumnDef::new("user_id", SqlType::BigInt).primary_key())
            .column(ColumnDef::new("group_id", SqlType::BigInt).primary_key())
            .column(
                ColumnDef::new("active", SqlType::Boolean)
                    .not_null()
                    .default_expr("1"),
            )
            .build(Dialect::Sqlite);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"memberships\""));
        assert!(sql.contains("PRIMARY KEY (\"user_id\", \"group_id\")"));
        assert!(sql.contains("\"active\" BOOLEAN NOT NULL DEFAULT 1"));
    }

    #[test]
    fn script_collects_statements() {
        let statements = DdlScript::new(Dialect::Sqlite)
            .create_table(heroes())
            .create_index("idx_hero_name_age", "heroes", &["name", "age"], false)
            .raw("PRAGMA user_version = 2")
            .build();
        assert_eq!(statements.len(), 3);
        assert!(statements[0].starts_with("CREATE TABLE IF NOT EXISTS"));
        assert_eq!(
            statements[1],
            "CREATE INDEX IF NOT EXISTS \"idx_hero_name_age\" ON \"heroes\" (\"name\", \"age\")"
        );
        assert_eq!(statements[2], "PRAGMA user_version = 2");
    }
}
