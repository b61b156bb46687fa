//! Table schema view: request-scoped projection of a table's fields for querying.

use crate::catalog::{Field, FieldId, FieldType, Storage, TableId};
use std::collections::HashMap;
use std::sync::Arc;

/// Columns every user table carries besides its fields.
pub const SYSTEM_ATTRIBUTES: [&str; 3] = ["id", "order", "trashed"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttributeMode {
    /// Attribute is the snake-cased display name, suffixed with the physical name on clashes.
    AttributeNames,
    /// Attribute is always the physical `field_<id>` name.
    PhysicalNames,
}

#[derive(Clone, Debug)]
pub struct ColumnView {
    pub field: Field,
    pub field_type: Arc<dyn FieldType>,
    pub db_column: String,
    pub attribute: String,
    pub storage: Storage,
}

impl ColumnView {
    pub fn nullable(&self) -> bool {
        match &self.storage {
            Storage::Column(spec) => spec.nullable,
            Storage::Relation(_) => true,
        }
    }

    pub fn default_value(&self) -> Option<&serde_json::Value> {
        match &self.storage {
            Storage::Column(spec) => spec.default.as_ref(),
            Storage::Relation(_) => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TableSchemaView {
    pub table_id: TableId,
    pub db_table: String,
    pub mode: AttributeMode,
    /// In field order (`order`, then id).
    pub columns: Vec<ColumnView>,
    pub(crate) by_field_id: HashMap<FieldId, usize>,
    pub(crate) by_attribute: HashMap<String, usize>,
}

impl TableSchemaView {
    pub fn model_name(&self) -> String {
        format!("Table{}Model", self.table_id)
    }

    pub fn column(&self, field_id: FieldId) -> Option<&ColumnView> {
        self.by_field_id.get(&field_id).map(|&i| &self.columns[i])
    }

    pub fn column_by_attribute(&self, attribute: &str) -> Option<&ColumnView> {
        self.by_attribute.get(attribute).map(|&i| &self.columns[i])
    }

    /// System attributes followed by every column attribute.
    pub fn attribute_names(&self) -> Vec<&str> {
        SYSTEM_ATTRIBUTES
            .iter()
            .copied()
            .chain(self.columns.iter().map(|c| c.attribute.as_str()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Rejects keys that are neither a column attribute nor `order`.
pub fn check_row_values(
    view: &TableSchemaView,
    values: &serde_json::Map<String, serde_json::Value>,
) -> Result<(), crate::error::AppError> {
    match values
        .keys()
        .find(|k| k.as_str() != "order" && view.column_by_attribute(k).is_none())
    {
        Some(unknown) => Err(crate::error::AppError::Validation(format!(
            "unknown attribute '{}' for {}",
            unknown,
            view.model_name()
        ))),
        None => Ok(()),
    }
}
