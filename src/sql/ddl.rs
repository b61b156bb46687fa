//! Schema statements issued by the backup engine and field handlers.

use crate::catalog::{ColumnSpec, RelationSpec};
use crate::sql::builder::{literal, quoted};
use serde_json::Value;

fn default_literal(v: &Value) -> String {
    match v {
        Value::Null => "NULL".into(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => literal(s),
        other => literal(&other.to_string()),
    }
}

fn if_exists(flag: bool) -> &'static str {
    if flag {
        "IF EXISTS "
    } else {
        ""
    }
}

pub fn add_column(table: &str, column: &str, spec: &ColumnSpec) -> String {
    let mut sql = format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        quoted(table),
        quoted(column),
        spec.sql_type
    );
    if let Some(default) = &spec.default {
        sql.push_str(&format!(" DEFAULT {}", default_literal(default)));
    }
    sql.push_str(if spec.nullable { " NULL" } else { " NOT NULL" });
    sql
}

/// Copies only non-null cells so target column defaults survive.
pub fn copy_not_null_column_data(table: &str, source: &str, target: &str) -> String {
    format!(
        "UPDATE {t} SET {dst} = {src} WHERE {src} IS NOT NULL",
        t = quoted(table),
        dst = quoted(target),
        src = quoted(source)
    )
}

pub fn drop_column(table: &str, column: &str, flag_if_exists: bool) -> String {
    format!(
        "ALTER TABLE {} DROP COLUMN {}{}",
        quoted(table),
        if_exists(flag_if_exists),
        quoted(column)
    )
}

pub fn create_relation_table(name: &str, relation: &RelationSpec) -> String {
    format!(
        "CREATE TABLE {} (\"id\" serial PRIMARY KEY, {} integer NOT NULL REFERENCES {} (\"id\") DEFERRABLE INITIALLY DEFERRED, {} integer NOT NULL REFERENCES {} (\"id\") DEFERRABLE INITIALLY DEFERRED)",
        quoted(name),
        quoted(RelationSpec::ROW_COLUMN),
        quoted(&relation.row_table),
        quoted(RelationSpec::LINKED_COLUMN),
        quoted(&relation.linked_table)
    )
}

/// Copies join rows keeping their ids.
pub fn copy_relation_rows(source: &str, target: &str) -> String {
    let cols = format!(
        "\"id\", {}, {}",
        quoted(RelationSpec::ROW_COLUMN),
        quoted(RelationSpec::LINKED_COLUMN)
    );
    format!(
        "INSERT INTO {} ({c}) SELECT {c} FROM {}",
        quoted(target),
        quoted(source),
        c = cols
    )
}

/// Points the `id` sequence past the highest id (or back to 1 on an empty table).
pub fn reset_id_sequence(table: &str) -> String {
    format!(
        "SELECT setval(pg_get_serial_sequence({}, 'id'), COALESCE(MAX(\"id\"), 1), MAX(\"id\") IS NOT NULL) FROM {}",
        literal(&quoted(table)),
        quoted(table)
    )
}

pub fn truncate_table(table: &str) -> String {
    format!("TRUNCATE TABLE {}", quoted(table))
}

pub fn drop_table(table: &str, flag_if_exists: bool) -> String {
    format!("DROP TABLE {}{}", if_exists(flag_if_exists), quoted(table))
}
