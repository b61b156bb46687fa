//! Row listing and insertion against PostgreSQL.

use crate::catalog::{FilterTypeRegistry, Storage};
use crate::error::{AppError, QueryError};
use crate::model::{check_row_values, TableSchemaView};
use crate::query::{Condition, RowQuery};
use crate::sql::{bind_all, insert_links, insert_row, numeric_cells_to_numbers, row_to_json, select_rows, QueryBuf};
use crate::store::RowReader;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use sqlx::{PgConnection, PgPool};

const DEFAULT_LIMIT: u32 = 100;
const MAX_LIMIT: u32 = 1000;

/// Listing options as they arrive from a request: search term, order string and `filter__*` keys.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RowListParams {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub order_by: Option<String>,
    #[serde(default)]
    pub filter_type: Option<String>,
    /// Any other keys; only `filter__field_<id>__<operator>` ones are used.
    #[serde(flatten)]
    pub filters: Map<String, Value>,
}

impl RowListParams {
    pub fn to_query(&self, view: &TableSchemaView, filters: &FilterTypeRegistry) -> Result<RowQuery, QueryError> {
        let mut query = RowQuery::new();
        if let Some(term) = &self.search {
            query = query.search_all_fields(view, term);
        }
        if let Some(order_by) = self.order_by.as_deref() {
            query = query.order_by_fields_string(view, order_by)?;
        }
        let filter_type = self.filter_type.as_deref().unwrap_or("AND");
        query.filter_by_fields_object(view, filters, &self.filters, filter_type)
    }
}

fn numeric_attributes(view: &TableSchemaView) -> Vec<&str> {
    view.columns
        .iter()
        .filter(|c| matches!(&c.storage, Storage::Column(spec) if spec.cast_type() == "numeric"))
        .map(|c| c.attribute.as_str())
        .collect()
}

pub struct RowService {
    pool: PgPool,
}

impl RowService {
    pub fn new(pool: PgPool) -> Self {
        RowService { pool }
    }

    /// Matching rows, limit defaulting to 100 (max 1000).
    pub async fn list(
        &self,
        view: &TableSchemaView,
        query: &RowQuery,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Vec<Value>, AppError> {
        let limit = limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
        let q = select_rows(view, query, Some(limit), offset);
        self.query_many(view, &q).await
    }

    /// Inserts one row (and its links) in a transaction. Returns the created row.
    pub async fn create_row(&self, view: &TableSchemaView, values: &Map<String, Value>) -> Result<Value, AppError> {
        check_row_values(view, values)?;
        let mut tx = self.pool.begin().await?;
        let q = insert_row(view, values);
        let id = Self::execute_returning_id(&mut tx, &q).await?;
        for column in &view.columns {
            let Storage::Relation(relation) = &column.storage else {
                continue;
            };
            let Some(given) = values.get(&column.attribute).filter(|v| !v.is_null()) else {
                continue;
            };
            let ids: Vec<i64> = given
                .as_array()
                .map(|items| items.iter().filter_map(Value::as_i64).collect())
                .ok_or_else(|| AppError::Validation(format!("'{}' expects a list of row ids", column.attribute)))?;
            if ids.is_empty() {
                continue;
            }
            let links = insert_links(relation, id, &ids);
            tracing::debug!(sql = %links.sql, params = ?links.params, "query (tx)");
            bind_all(sqlx::query(&links.sql), &links.params)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        let q = select_rows(view, &RowQuery::new().filter(Condition::RowId(id)), Some(1), None);
        self.query_many(view, &q)
            .await?
            .into_iter()
            .next()
            .ok_or(AppError::Db(sqlx::Error::RowNotFound))
    }

    async fn query_many(&self, view: &TableSchemaView, q: &QueryBuf) -> Result<Vec<Value>, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let rows = bind_all(sqlx::query(&q.sql), &q.params).fetch_all(&self.pool).await?;
        let numeric = numeric_attributes(view);
        Ok(rows
            .iter()
            .map(|r| {
                let mut row = row_to_json(r);
                numeric_cells_to_numbers(&mut row, &numeric);
                row
            })
            .collect())
    }

    async fn execute_returning_id(tx: &mut PgConnection, q: &QueryBuf) -> Result<i64, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query (tx)");
        let row = bind_all(sqlx::query(&q.sql), &q.params).fetch_one(&mut *tx).await?;
        row_to_json(&row)
            .get("id")
            .and_then(Value::as_i64)
            .ok_or(AppError::Db(sqlx::Error::RowNotFound))
    }
}

#[async_trait]
impl RowReader for RowService {
    async fn fetch_rows(&self, view: &TableSchemaView, query: &RowQuery) -> Result<Vec<Value>, AppError> {
        let q = select_rows(view, query, None, None);
        self.query_many(view, &q).await
    }
}
