//! Storage seams: schema mutations used by the backup engine, and row reads used by queries.

pub mod memory;
pub mod postgres;

use crate::catalog::{ColumnSpec, RelationSpec, TableId};
use crate::error::AppError;
use crate::model::TableSchemaView;
use crate::query::RowQuery;
use async_trait::async_trait;
use serde_json::Value;

pub use memory::MemoryDatabase;
pub use postgres::PgSchemaStore;

/// Physical schema and bulk data operations, issued inside the caller's transaction.
#[async_trait]
pub trait SchemaStore: Send {
    async fn add_column(&mut self, table: &str, column: &str, spec: &ColumnSpec) -> Result<(), AppError>;

    /// Copies `source` into `target` for every row where `source` is not null. Returns rows touched.
    async fn copy_not_null_column_data(
        &mut self,
        table: &str,
        source: &str,
        target: &str,
    ) -> Result<u64, AppError>;

    async fn drop_column(&mut self, table: &str, column: &str, if_exists: bool) -> Result<(), AppError>;

    /// Creates an empty join table shaped like `relation`'s, under `name`.
    async fn create_relation_table(&mut self, name: &str, relation: &RelationSpec) -> Result<(), AppError>;

    /// Copies every join row of `source` into `target` keeping ids, then moves `target`'s id sequence past them.
    async fn copy_relation_rows(&mut self, source: &str, target: &str) -> Result<u64, AppError>;

    async fn truncate_table(&mut self, table: &str) -> Result<(), AppError>;

    async fn drop_table(&mut self, table: &str, if_exists: bool) -> Result<(), AppError>;

    /// Physical table name of `table_id`, trashed or not; `None` once permanently deleted.
    async fn resolve_table(&mut self, table_id: TableId) -> Result<Option<String>, AppError>;
}

#[async_trait]
pub trait RowReader: Send + Sync {
    /// Non-trashed rows matching `query`, keyed by the view's attribute names plus `id` and `order`.
    async fn fetch_rows(&self, view: &TableSchemaView, query: &RowQuery) -> Result<Vec<Value>, AppError>;
}
