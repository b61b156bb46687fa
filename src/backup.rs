//! Schema backup engine: duplicates a field's data so a lossy change can be reversed.

use crate::catalog::{ColumnSpec, Field, FieldTypeRegistry, Storage, TableId};
use crate::error::AppError;
use crate::model::{ColumnView, FieldSelection, ModelBuilder, TableSchemaView};
use crate::store::SchemaStore;
use serde::{Deserialize, Serialize};

/// Where backed-up data lives. Consumed by exactly one restore or clean-up.
/// The column variant carries the table id, not the field id, so it still resolves
/// after the field itself is gone.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BackupDescriptor {
    Relation {
        #[serde(rename = "relationTable")]
        relation_table: String,
    },
    Column {
        #[serde(rename = "tableId")]
        table_id: TableId,
        #[serde(rename = "columnName")]
        column_name: String,
    },
}

#[derive(Clone, Debug)]
pub struct FieldDataBackupHandler {
    registry: FieldTypeRegistry,
}

impl FieldDataBackupHandler {
    pub fn new(registry: &FieldTypeRegistry) -> Self {
        FieldDataBackupHandler {
            registry: registry.clone(),
        }
    }

    /// Single-column view of `field` as currently defined.
    fn field_view(&self, field: &Field) -> Result<TableSchemaView, AppError> {
        ModelBuilder::new(field.table_id, &self.registry).build(
            &[],
            FieldSelection::Only {
                field_ids: &[],
                fields: std::slice::from_ref(field),
            },
        )
    }

    fn column<'v>(view: &'v TableSchemaView, field: &Field) -> Result<&'v ColumnView, AppError> {
        view.column(field.id)
            .ok_or_else(|| AppError::NotFound(format!("field {} in its own view", field.id)))
    }

    /// Copies the field's data to `identifier`: a new nullable column on the same table,
    /// or a new join table for relation fields.
    pub async fn backup_field_data(
        &self,
        store: &mut dyn SchemaStore,
        field: &Field,
        identifier: &str,
    ) -> Result<BackupDescriptor, AppError> {
        let view = self.field_view(field)?;
        let column = Self::column(&view, field)?;
        let descriptor = match &column.storage {
            Storage::Relation(relation) => {
                store.create_relation_table(identifier, relation).await?;
                let copied = store.copy_relation_rows(&relation.through_table, identifier).await?;
                tracing::info!(field_id = field.id, backup = identifier, rows = copied, "backed up relation");
                BackupDescriptor::Relation {
                    relation_table: identifier.to_string(),
                }
            }
            Storage::Column(spec) => {
                // nullable so rows inserted meanwhile need no value here
                let backup_spec = ColumnSpec::nullable(spec.sql_type.clone());
                store.add_column(&view.db_table, identifier, &backup_spec).await?;
                let copied = store
                    .copy_not_null_column_data(&view.db_table, &column.db_column, identifier)
                    .await?;
                tracing::info!(field_id = field.id, backup = identifier, rows = copied, "backed up column");
                BackupDescriptor::Column {
                    table_id: field.table_id,
                    column_name: identifier.to_string(),
                }
            }
        };
        Ok(descriptor)
    }

    /// Puts backed-up data back into `field` and drops the backup.
    /// Column restores only overwrite where the backup holds a value.
    pub async fn restore_backup_data_into_field(
        &self,
        store: &mut dyn SchemaStore,
        field: &Field,
        backup: BackupDescriptor,
    ) -> Result<(), AppError> {
        let view = self.field_view(field)?;
        let column = Self::column(&view, field)?;
        match (&column.storage, backup) {
            (Storage::Relation(relation), BackupDescriptor::Relation { relation_table }) => {
                store.truncate_table(&relation.through_table).await?;
                let copied = store
                    .copy_relation_rows(&relation_table, &relation.through_table)
                    .await?;
                store.drop_table(&relation_table, false).await?;
                tracing::info!(field_id = field.id, backup = %relation_table, rows = copied, "restored relation");
            }
            (Storage::Column(_), BackupDescriptor::Column { column_name, .. }) => {
                let copied = store
                    .copy_not_null_column_data(&view.db_table, &column_name, &column.db_column)
                    .await?;
                store.drop_column(&view.db_table, &column_name, false).await?;
                tracing::info!(field_id = field.id, backup = %column_name, rows = copied, "restored column");
            }
            (storage, backup) => {
                return Err(AppError::Validation(format!(
                    "backup {:?} does not fit field {} stored as {}",
                    backup,
                    field.id,
                    if storage.is_relation() { "relation" } else { "column" }
                )));
            }
        }
        Ok(())
    }

    /// Drops backup storage that will never be restored. A column backup whose table was
    /// permanently deleted went with the table, so that case does nothing.
    pub async fn clean_up_backup_data(
        &self,
        store: &mut dyn SchemaStore,
        backup: &BackupDescriptor,
    ) -> Result<(), AppError> {
        match backup {
            BackupDescriptor::Relation { relation_table } => {
                store.drop_table(relation_table, true).await?;
                tracing::info!(backup = %relation_table, "discarded relation backup");
            }
            BackupDescriptor::Column { table_id, column_name } => match store.resolve_table(*table_id).await? {
                Some(table) => {
                    store.drop_column(&table, column_name, true).await?;
                    tracing::info!(backup = %column_name, table = %table, "discarded column backup");
                }
                None => {
                    tracing::warn!(table_id = *table_id, backup = %column_name, "table of backup no longer exists");
                }
            },
        }
        Ok(())
    }
}
