//! Build a table schema view from a table's live field definitions.

use crate::catalog::{database_table_name, Field, FieldId, FieldTypeRegistry, TableId};
use crate::error::AppError;
use crate::model::view::{AttributeMode, ColumnView, TableSchemaView, SYSTEM_ATTRIBUTES};
use std::collections::{HashMap, HashSet};

/// Which of the table's fields end up in the view.
#[derive(Clone, Copy, Debug)]
pub enum FieldSelection<'a> {
    All,
    /// Only these ids from the table's fields, plus the given field instances.
    Only {
        field_ids: &'a [FieldId],
        fields: &'a [Field],
    },
}

pub struct ModelBuilder<'a> {
    table_id: TableId,
    registry: &'a FieldTypeRegistry,
    mode: AttributeMode,
}

impl<'a> ModelBuilder<'a> {
    pub fn new(table_id: TableId, registry: &'a FieldTypeRegistry) -> Self {
        ModelBuilder {
            table_id,
            registry,
            mode: AttributeMode::PhysicalNames,
        }
    }

    pub fn attribute_names(mut self, enabled: bool) -> Self {
        self.mode = if enabled {
            AttributeMode::AttributeNames
        } else {
            AttributeMode::PhysicalNames
        };
        self
    }

    /// Project `table_fields` (the table's current definitions) through `selection`.
    pub fn build(
        &self,
        table_fields: &[Field],
        selection: FieldSelection<'_>,
    ) -> Result<TableSchemaView, AppError> {
        let mut picked: Vec<&Field> = match selection {
            FieldSelection::All => table_fields.iter().collect(),
            FieldSelection::Only { field_ids, fields } => {
                let wanted: HashSet<FieldId> = field_ids.iter().copied().collect();
                let mut out: Vec<&Field> = table_fields
                    .iter()
                    .filter(|f| wanted.contains(&f.id))
                    .collect();
                for f in fields {
                    if !out.iter().any(|o| o.id == f.id) {
                        out.push(f);
                    }
                }
                out
            }
        };
        picked.sort_by_key(|f| (f.order, f.id));

        let mut columns = Vec::with_capacity(picked.len());
        let mut by_field_id = HashMap::new();
        let mut by_attribute = HashMap::new();
        let mut taken: HashSet<String> = SYSTEM_ATTRIBUTES.iter().map(|s| s.to_string()).collect();

        for field in picked {
            if field.table_id != self.table_id {
                return Err(AppError::Validation(format!(
                    "field {} belongs to table {}, not {}",
                    field.id, field.table_id, self.table_id
                )));
            }
            let field_type = self.registry.get_for(field)?;
            let db_column = field.db_column();
            let attribute = match self.mode {
                AttributeMode::PhysicalNames => db_column.clone(),
                AttributeMode::AttributeNames => {
                    let name = field.model_attribute_name();
                    if taken.contains(&name) {
                        free_attribute(&taken, &format!("{}_{}", name, db_column))
                    } else {
                        name
                    }
                }
            };
            taken.insert(attribute.clone());
            let storage = field_type.storage(field);
            by_field_id.insert(field.id, columns.len());
            by_attribute.insert(attribute.clone(), columns.len());
            columns.push(ColumnView {
                field: field.clone(),
                field_type,
                db_column,
                attribute,
                storage,
            });
        }

        Ok(TableSchemaView {
            table_id: self.table_id,
            db_table: database_table_name(self.table_id),
            mode: self.mode,
            columns,
            by_field_id,
            by_attribute,
        })
    }
}

/// `base`, or `base_2`, `base_3`, ... when a field's own name already produced `base`.
fn free_attribute(taken: &HashSet<String>, base: &str) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{}_{}", base, n))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| base.to_string())
}

/// View of every field, attribute names or physical names depending on `attribute_names`.
pub fn build_view(
    table_id: TableId,
    table_fields: &[Field],
    registry: &FieldTypeRegistry,
    attribute_names: bool,
) -> Result<TableSchemaView, AppError> {
    ModelBuilder::new(table_id, registry)
        .attribute_names(attribute_names)
        .build(table_fields, FieldSelection::All)
}
