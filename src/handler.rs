//! Contracts of the field-management and trash collaborators the action types drive.

use crate::catalog::{Field, FieldId, FieldTypeRegistry, TableId, TrashKind};
use crate::error::AppError;
use crate::store::SchemaStore;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Field definition before and after a schema update.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldSchemaChange {
    pub before: Field,
    pub field: Field,
}

impl FieldSchemaChange {
    pub fn type_changed(&self) -> bool {
        self.before.type_name != self.field.type_name
    }
}

#[async_trait]
pub trait FieldHandler: Send {
    fn field_types(&self) -> &FieldTypeRegistry;

    fn schema(&mut self) -> &mut dyn SchemaStore;

    fn trash(&mut self) -> &mut dyn TrashHandler;

    /// Live (non-trashed) field; `StaleReference` when it is gone.
    async fn get_field(&mut self, field_id: FieldId) -> Result<Field, AppError>;

    /// `attrs` must carry `name`; other attributes not allowed by the type are ignored.
    async fn create_field(
        &mut self,
        table_id: TableId,
        type_name: &str,
        attrs: &Map<String, Value>,
    ) -> Result<Field, AppError>;

    /// Applies type/attribute changes and converts the physical storage.
    /// With `collision_postfix`, a name taken by another field becomes `"<name> <postfix>"`
    /// (then `"<name> <postfix> 2"`, ...); without it a collision is a `Conflict`.
    async fn update_field_schema(
        &mut self,
        field: &Field,
        type_name: &str,
        attrs: &Map<String, Value>,
        collision_postfix: Option<&str>,
    ) -> Result<FieldSchemaChange, AppError>;

    /// Recomputes fields depending on the changed one; returns those that changed.
    async fn update_dependants(&mut self, change: &FieldSchemaChange) -> Result<Vec<Field>, AppError>;

    /// Moves the field to the trash. Returns fields updated as a consequence.
    async fn delete_field(&mut self, field: &Field) -> Result<Vec<Field>, AppError>;
}

#[async_trait]
pub trait TrashHandler: Send {
    async fn soft_delete(&mut self, kind: TrashKind, id: i64) -> Result<(), AppError>;

    async fn restore(&mut self, kind: TrashKind, id: i64) -> Result<(), AppError>;
}
