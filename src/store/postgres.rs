//! PostgreSQL backend: `_sys_*` catalog and action tables, and schema mutations on user tables.
//! `_sys_*` tables live in the schema named by `Settings::schema`.

use crate::actions::{ActionParams, ActionRecord, ActionState};
use crate::catalog::{database_table_name, ColumnSpec, Field, FieldId, RelationSpec, Table, TableId};
use crate::error::AppError;
use crate::settings::Settings;
use crate::sql::{ddl, quoted};
use crate::store::SchemaStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

/// Schema-qualified name of a `_sys_*` table.
pub fn qualified_sys_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quoted(schema), quoted(table))
}

pub async fn connect(settings: &Settings) -> Result<PgPool, AppError> {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&settings.database_url)
        .await?;
    ensure_sys_tables(&pool, &settings.schema).await?;
    Ok(pool)
}

/// Create the schema if missing, then `_sys_tables`, `_sys_fields` and `_sys_actions`.
pub async fn ensure_sys_tables(pool: &PgPool, schema: &str) -> Result<(), AppError> {
    let statements = [
        format!("CREATE SCHEMA IF NOT EXISTS {}", quoted(schema)),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id BIGINT PRIMARY KEY,
                payload JSONB NOT NULL,
                trashed BOOLEAN NOT NULL DEFAULT FALSE,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            qualified_sys_table(schema, "_sys_tables")
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id BIGINT PRIMARY KEY,
                table_id BIGINT NOT NULL,
                payload JSONB NOT NULL,
                trashed BOOLEAN NOT NULL DEFAULT FALSE,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            qualified_sys_table(schema, "_sys_fields")
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id BIGINT PRIMARY KEY,
                scope TEXT NOT NULL,
                state TEXT NOT NULL,
                payload JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            qualified_sys_table(schema, "_sys_actions")
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS _sys_actions_scope_idx ON {} (scope, id)",
            qualified_sys_table(schema, "_sys_actions")
        ),
    ];
    for sql in statements {
        tracing::debug!(sql = %sql, "query");
        sqlx::query(&sql).execute(pool).await?;
    }
    Ok(())
}

pub async fn save_table(conn: &mut PgConnection, schema: &str, table: &Table) -> Result<(), AppError> {
    let sql = format!(
        "INSERT INTO {} (id, payload) VALUES ($1, $2) ON CONFLICT (id) DO UPDATE SET payload = EXCLUDED.payload, updated_at = NOW()",
        qualified_sys_table(schema, "_sys_tables")
    );
    tracing::debug!(sql = %sql, table_id = table.id, "query");
    sqlx::query(&sql)
        .bind(table.id)
        .bind(serde_json::to_value(table)?)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn save_field(conn: &mut PgConnection, schema: &str, field: &Field, trashed: bool) -> Result<(), AppError> {
    let sql = format!(
        "INSERT INTO {} (id, table_id, payload, trashed) VALUES ($1, $2, $3, $4) ON CONFLICT (id) DO UPDATE SET payload = EXCLUDED.payload, trashed = EXCLUDED.trashed, updated_at = NOW()",
        qualified_sys_table(schema, "_sys_fields")
    );
    tracing::debug!(sql = %sql, field_id = field.id, "query");
    sqlx::query(&sql)
        .bind(field.id)
        .bind(field.table_id)
        .bind(serde_json::to_value(field)?)
        .bind(trashed)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Live fields of a table, in id order (the model builder re-sorts by field order).
pub async fn load_fields(conn: &mut PgConnection, schema: &str, table_id: TableId) -> Result<Vec<Field>, AppError> {
    let sql = format!(
        "SELECT payload FROM {} WHERE table_id = $1 AND NOT trashed ORDER BY id",
        qualified_sys_table(schema, "_sys_fields")
    );
    tracing::debug!(sql = %sql, table_id, "query");
    let rows = sqlx::query_scalar::<_, serde_json::Value>(&sql)
        .bind(table_id)
        .fetch_all(&mut *conn)
        .await?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(serde_json::from_value::<Field>(row)?);
    }
    Ok(out)
}

/// Live field by id; `StaleReference` when missing or trashed.
pub async fn load_field(conn: &mut PgConnection, schema: &str, field_id: FieldId) -> Result<Field, AppError> {
    let sql = format!(
        "SELECT payload FROM {} WHERE id = $1 AND NOT trashed",
        qualified_sys_table(schema, "_sys_fields")
    );
    tracing::debug!(sql = %sql, field_id, "query");
    let row = sqlx::query_scalar::<_, serde_json::Value>(&sql)
        .bind(field_id)
        .fetch_optional(&mut *conn)
        .await?;
    match row {
        Some(payload) => Ok(serde_json::from_value(payload)?),
        None => Err(AppError::StaleReference {
            kind: "field",
            id: field_id,
        }),
    }
}

/// Inserts or updates one action record (state and params change on undo/redo).
pub async fn save_action(conn: &mut PgConnection, schema: &str, record: &ActionRecord) -> Result<(), AppError> {
    let sql = format!(
        "INSERT INTO {} (id, scope, state, payload, created_at) VALUES ($1, $2, $3, $4, $5) ON CONFLICT (id) DO UPDATE SET state = EXCLUDED.state, payload = EXCLUDED.payload",
        qualified_sys_table(schema, "_sys_actions")
    );
    tracing::debug!(sql = %sql, action_id = record.id, "query");
    sqlx::query(&sql)
        .bind(record.id)
        .bind(&record.scope)
        .bind(record.state.as_str())
        .bind(serde_json::to_value(&record.params)?)
        .bind(record.created_at)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn load_actions(conn: &mut PgConnection, schema: &str, scope: &str) -> Result<Vec<ActionRecord>, AppError> {
    let sql = format!(
        "SELECT id, scope, state, payload, created_at FROM {} WHERE scope = $1 ORDER BY id",
        qualified_sys_table(schema, "_sys_actions")
    );
    tracing::debug!(sql = %sql, scope, "query");
    let rows: Vec<(i64, String, String, serde_json::Value, DateTime<Utc>)> =
        sqlx::query_as(&sql).bind(scope).fetch_all(&mut *conn).await?;
    let mut out = Vec::with_capacity(rows.len());
    for (id, scope, state, payload, created_at) in rows {
        let state = ActionState::parse(&state)
            .ok_or_else(|| AppError::Store(format!("action {} has unknown state '{}'", id, state)))?;
        let params: ActionParams = serde_json::from_value(payload)?;
        out.push(ActionRecord {
            id,
            scope,
            state,
            params,
            created_at,
        });
    }
    Ok(out)
}

pub async fn delete_action(conn: &mut PgConnection, schema: &str, id: i64) -> Result<(), AppError> {
    let sql = format!("DELETE FROM {} WHERE id = $1", qualified_sys_table(schema, "_sys_actions"));
    tracing::debug!(sql = %sql, action_id = id, "query");
    sqlx::query(&sql).bind(id).execute(&mut *conn).await?;
    Ok(())
}

/// Schema mutations on one connection, usually the caller's open transaction.
pub struct PgSchemaStore<'c> {
    conn: &'c mut PgConnection,
    schema: String,
}

impl<'c> PgSchemaStore<'c> {
    pub fn new(conn: &'c mut PgConnection, schema: impl Into<String>) -> Self {
        PgSchemaStore {
            conn,
            schema: schema.into(),
        }
    }

    async fn execute(&mut self, sql: String) -> Result<u64, AppError> {
        tracing::debug!(sql = %sql, "query");
        let done = sqlx::query(&sql).execute(&mut *self.conn).await?;
        Ok(done.rows_affected())
    }
}

#[async_trait]
impl<'c> SchemaStore for PgSchemaStore<'c> {
    async fn add_column(&mut self, table: &str, column: &str, spec: &ColumnSpec) -> Result<(), AppError> {
        self.execute(ddl::add_column(table, column, spec)).await?;
        Ok(())
    }

    async fn copy_not_null_column_data(&mut self, table: &str, source: &str, target: &str) -> Result<u64, AppError> {
        self.execute(ddl::copy_not_null_column_data(table, source, target)).await
    }

    async fn drop_column(&mut self, table: &str, column: &str, if_exists: bool) -> Result<(), AppError> {
        self.execute(ddl::drop_column(table, column, if_exists)).await?;
        Ok(())
    }

    async fn create_relation_table(&mut self, name: &str, relation: &RelationSpec) -> Result<(), AppError> {
        self.execute(ddl::create_relation_table(name, relation)).await?;
        Ok(())
    }

    async fn copy_relation_rows(&mut self, source: &str, target: &str) -> Result<u64, AppError> {
        let copied = self.execute(ddl::copy_relation_rows(source, target)).await?;
        self.execute(ddl::reset_id_sequence(target)).await?;
        Ok(copied)
    }

    async fn truncate_table(&mut self, table: &str) -> Result<(), AppError> {
        self.execute(ddl::truncate_table(table)).await?;
        Ok(())
    }

    async fn drop_table(&mut self, table: &str, if_exists: bool) -> Result<(), AppError> {
        self.execute(ddl::drop_table(table, if_exists)).await?;
        Ok(())
    }

    async fn resolve_table(&mut self, table_id: TableId) -> Result<Option<String>, AppError> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE id = $1)",
            qualified_sys_table(&self.schema, "_sys_tables")
        );
        tracing::debug!(sql = %sql, table_id, "query");
        let exists: (bool,) = sqlx::query_as(&sql).bind(table_id).fetch_one(&mut *self.conn).await?;
        Ok(exists.0.then(|| database_table_name(table_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sys_tables_are_schema_qualified() {
        assert_eq!(qualified_sys_table("tablekeep", "_sys_actions"), "\"tablekeep\".\"_sys_actions\"");
    }
}
