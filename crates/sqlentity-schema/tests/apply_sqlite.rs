//! DDL applied to a real SQLite database.

use sqlentity_core::{Connection, Dialect, Value};
use sqlentity_schema::{ColumnDef, DdlScript, ReferentialAction, SqlType, create_table};
use sqlentity_sqlite::SqliteConnection;

fn script() -> DdlScript {
    DdlScript::new(Dialect::Sqlite)
        .create_table(
            create_table("teams")
                .column(ColumnDef::new("id", SqlType::BigInt).primary_key().auto_increment())
                .column(ColumnDef::new("name", SqlType::VarChar(64)).not_null().unique()),
        )
        .create_table(
            create_table("heroes")
                .column(ColumnDef::new("id", SqlType::BigInt).primary_key().auto_increment())
                .column(ColumnDef::new("name", SqlType::Text).not_null())
                .column(ColumnDef::new("power", SqlType::Double).default_expr("0"))
                .column(
                    ColumnDef::new("team_id", SqlType::BigInt)
                        .references("teams", "id")
                        .on_delete(ReferentialAction::Cascade),
                ),
        )
        .create_index("idx_heroes_name", "heroes", &["name"], false)
}

#[test]
fn script_creates_usable_tables() {
    let conn = Connection::new(SqliteConnection::open_memory().unwrap());
    script().apply(&conn).unwrap();
    assert_eq!(conn.transaction_depth(), 0);

    conn.execute("INSERT INTO teams (name) VALUES (?)", &[Value::from("red")])
        .unwrap();
    let team = conn.last_insert_id().unwrap();
    conn.execute(
        "INSERT INTO heroes (name, team_id) VALUES (?, ?)",
        &[Value::from("Ann"), Value::BigInt(team)],
    )
    .unwrap();

    let row = conn
        .query_one("SELECT power, team_id FROM heroes", &[])
        .unwrap()
        .unwrap();
    assert_eq!(row.get_named::<f64>("power").unwrap(), 0.0);
    assert_eq!(row.get_named::<i64>("team_id").unwrap(), team);

    // Cascade removes the hero with its team.
    conn.execute("DELETE FROM teams WHERE id = ?", &[Value::BigInt(team)])
        .unwrap();
    assert!(conn.query("SELECT * FROM heroes", &[]).unwrap().is_empty());
}

#[test]
fn script_is_idempotent() {
    let conn = Connection::new(SqliteConnection::open_memory().unwrap());
    script().apply(&conn).unwrap();
    script().apply(&conn).unwrap();
}

#[test]
fn unique_constraint_is_enforced() {
    let conn = Connection::new(SqliteConnection::open_memory().unwrap());
    script().apply(&conn).unwrap();
    conn.execute("INSERT INTO teams (name) VALUES ('red')", &[]).unwrap();
    let err = conn
        .execute("INSERT INTO teams (name) VALUES ('red')", &[])
        .unwrap_err();
    assert!(err.is_unique_violation());
}
