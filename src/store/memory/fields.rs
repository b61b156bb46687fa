//! Field management and trash for the in-memory backend.

use super::{FieldMeta, MemoryDatabase, State};
use crate::catalog::{
    database_table_name, extract_allowed, Field, FieldId, FieldType, FieldTypeRegistry, Storage, TableId,
    TrashKind, NAME_ATTRIBUTE,
};
use crate::error::AppError;
use crate::handler::{FieldHandler, FieldSchemaChange, TrashHandler};
use crate::store::SchemaStore;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Postfix given to a restored field whose name was taken meanwhile.
pub const RESTORED_NAME_POSTFIX: &str = "(Restored)";

fn requested_name(attrs: &Map<String, Value>) -> Option<&str> {
    attrs
        .get(NAME_ATTRIBUTE)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

impl State {
    /// Rewrites the field's cells (or swaps its storage kind) after a type or attribute change.
    fn convert_storage(
        &mut self,
        before: &Field,
        old: &Storage,
        after: &Field,
        new_type: &dyn FieldType,
        new: &Storage,
    ) -> Result<(), AppError> {
        let type_changed = before.type_name != after.type_name;
        match (old, new) {
            (Storage::Column(_), Storage::Column(spec)) => {
                if old == new && !type_changed {
                    return Ok(());
                }
                let table = database_table_name(after.table_id);
                let column = after.db_column();
                let physical = self.physical_mut(&table)?;
                for row in physical.rows.values_mut() {
                    let cell = row.get(&column).cloned().unwrap_or(Value::Null);
                    let converted = new_type
                        .coerce(after, &cell)
                        .or_else(|| spec.default.clone().filter(|_| !spec.nullable))
                        .unwrap_or(Value::Null);
                    row.insert(column.clone(), converted);
                }
                physical.columns.insert(column, spec.default.clone());
            }
            (Storage::Relation(a), Storage::Relation(b)) if a == b => {}
            _ => {
                self.drop_storage(before, old)?;
                self.create_storage(after, new)?;
            }
        }
        Ok(())
    }

    fn set_field_trashed(&mut self, field_id: FieldId, trashed: bool) -> Result<(), AppError> {
        let meta = self.fields.get_mut(&field_id).ok_or(AppError::StaleReference {
            kind: "field",
            id: field_id,
        })?;
        meta.trashed = trashed;
        Ok(())
    }
}

impl MemoryDatabase {
    pub fn registry(&self) -> &FieldTypeRegistry {
        &self.registry
    }
}

#[async_trait]
impl FieldHandler for MemoryDatabase {
    fn field_types(&self) -> &FieldTypeRegistry {
        &self.registry
    }

    fn schema(&mut self) -> &mut dyn SchemaStore {
        self
    }

    fn trash(&mut self) -> &mut dyn TrashHandler {
        self
    }

    async fn get_field(&mut self, field_id: FieldId) -> Result<Field, AppError> {
        let state = self.state.read().await;
        state.live_field(field_id).cloned()
    }

    async fn create_field(
        &mut self,
        table_id: TableId,
        type_name: &str,
        attrs: &Map<String, Value>,
    ) -> Result<Field, AppError> {
        let field_type = self.registry.get(type_name)?;
        let mut state = self.state.write().await;
        state.live_table(table_id)?;
        let name = requested_name(attrs)
            .ok_or_else(|| AppError::Validation("a field needs a name".into()))?
            .to_string();
        let name = state.free_name(table_id, &name, None, None)?;

        let mut own_attrs = extract_allowed(field_type.as_ref(), attrs);
        own_attrs.remove(NAME_ATTRIBUTE);
        let siblings = state.live_fields(table_id);
        let id = state.next_field_id;
        state.next_field_id += 1;
        let field = Field {
            id,
            table_id,
            type_name: field_type.type_name().to_string(),
            name,
            order: siblings.iter().map(|f| f.order + 1).max().unwrap_or(0),
            primary: siblings.is_empty(),
            attrs: own_attrs,
        };
        state.create_storage(&field, &field_type.storage(&field))?;
        state.fields.insert(
            id,
            FieldMeta {
                field: field.clone(),
                trashed: false,
            },
        );
        tracing::info!(field_id = id, table_id, field_type = field_type.type_name(), "field created");
        Ok(field)
    }

    async fn update_field_schema(
        &mut self,
        field: &Field,
        type_name: &str,
        attrs: &Map<String, Value>,
        collision_postfix: Option<&str>,
    ) -> Result<FieldSchemaChange, AppError> {
        let new_type = self.registry.get(type_name)?;
        let mut state = self.state.write().await;
        let before = state.live_field(field.id)?.clone();
        let old_type = self.registry.get_for(&before)?;
        let type_changed = old_type.type_name() != new_type.type_name();

        let allowed = extract_allowed(new_type.as_ref(), attrs);
        let mut new_attrs = if type_changed { Map::new() } else { before.attrs.clone() };
        for (key, value) in &allowed {
            if key != NAME_ATTRIBUTE {
                new_attrs.insert(key.clone(), value.clone());
            }
        }
        let wanted = requested_name(&allowed).unwrap_or(&before.name).to_string();
        let name = state.free_name(before.table_id, &wanted, Some(before.id), collision_postfix)?;

        let after = Field {
            type_name: new_type.type_name().to_string(),
            name,
            attrs: new_attrs,
            ..before.clone()
        };
        let old_storage = old_type.storage(&before);
        let new_storage = new_type.storage(&after);
        state.convert_storage(&before, &old_storage, &after, new_type.as_ref(), &new_storage)?;
        if let Some(meta) = state.fields.get_mut(&after.id) {
            meta.field = after.clone();
        }
        tracing::info!(
            field_id = after.id,
            from = old_type.type_name(),
            to = new_type.type_name(),
            name = %after.name,
            "field schema updated"
        );
        Ok(FieldSchemaChange { before, field: after })
    }

    async fn update_dependants(&mut self, _change: &FieldSchemaChange) -> Result<Vec<Field>, AppError> {
        Ok(Vec::new())
    }

    async fn delete_field(&mut self, field: &Field) -> Result<Vec<Field>, AppError> {
        let mut state = self.state.write().await;
        let current = state.live_field(field.id)?;
        if current.primary {
            return Err(AppError::Validation("the primary field cannot be deleted".into()));
        }
        state.set_field_trashed(field.id, true)?;
        tracing::info!(field_id = field.id, "field trashed");
        Ok(Vec::new())
    }
}

#[async_trait]
impl TrashHandler for MemoryDatabase {
    async fn soft_delete(&mut self, kind: TrashKind, id: i64) -> Result<(), AppError> {
        match kind {
            TrashKind::Field => {
                let field = self.get_field(id).await?;
                self.delete_field(&field).await?;
            }
            TrashKind::Table => {
                let mut state = self.state.write().await;
                state.live_table(id)?;
                if let Some(meta) = state.tables.get_mut(&id) {
                    meta.trashed = true;
                }
                tracing::info!(table_id = id, "table trashed");
            }
        }
        Ok(())
    }

    async fn restore(&mut self, kind: TrashKind, id: i64) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        match kind {
            TrashKind::Field => {
                let meta = state
                    .fields
                    .get(&id)
                    .cloned()
                    .ok_or(AppError::StaleReference { kind: "field", id })?;
                if !meta.trashed {
                    return Err(AppError::Validation(format!("field {} is not trashed", id)));
                }
                state.live_table(meta.field.table_id)?;
                let name = state.free_name(
                    meta.field.table_id,
                    &meta.field.name,
                    Some(id),
                    Some(RESTORED_NAME_POSTFIX),
                )?;
                if let Some(entry) = state.fields.get_mut(&id) {
                    entry.field.name = name;
                    entry.trashed = false;
                }
                tracing::info!(field_id = id, "field restored");
            }
            TrashKind::Table => {
                let meta = state
                    .tables
                    .get_mut(&id)
                    .ok_or(AppError::StaleReference { kind: "table", id })?;
                if !meta.trashed {
                    return Err(AppError::Validation(format!("table {} is not trashed", id)));
                }
                meta.trashed = false;
                tracing::info!(table_id = id, "table restored");
            }
        }
        Ok(())
    }
}
