//! Capability interface implemented once per column type, and the registry keyed by type name.

use crate::catalog::types::{database_table_name, Field, TableId};
use crate::error::AppError;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Attribute shared by every field type.
pub const NAME_ATTRIBUTE: &str = "name";

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnSpec {
    /// PostgreSQL type, e.g. `text` or `numeric(50,2)`.
    pub sql_type: String,
    pub nullable: bool,
    pub default: Option<Value>,
}

impl ColumnSpec {
    pub fn nullable(sql_type: impl Into<String>) -> Self {
        ColumnSpec {
            sql_type: sql_type.into(),
            nullable: true,
            default: None,
        }
    }

    /// Type without modifiers, usable as a cast target (`numeric(50,2)` -> `numeric`).
    pub fn cast_type(&self) -> &str {
        self.sql_type.split('(').next().unwrap_or(&self.sql_type).trim()
    }
}

/// Join table backing a many-to-many link field.
#[derive(Clone, Debug, PartialEq)]
pub struct RelationSpec {
    pub through_table: String,
    pub row_table: String,
    pub linked_table: String,
    pub linked_table_id: TableId,
}

impl RelationSpec {
    pub const ROW_COLUMN: &'static str = "row_id";
    pub const LINKED_COLUMN: &'static str = "linked_row_id";

    pub fn for_link(field: &Field, linked_table_id: TableId) -> Self {
        RelationSpec {
            through_table: format!("database_relation_{}", field.id),
            row_table: database_table_name(field.table_id),
            linked_table: database_table_name(linked_table_id),
            linked_table_id,
        }
    }
}

/// Where a field keeps its per-row data.
#[derive(Clone, Debug, PartialEq)]
pub enum Storage {
    Column(ColumnSpec),
    Relation(RelationSpec),
}

impl Storage {
    pub fn is_relation(&self) -> bool {
        matches!(self, Storage::Relation(_))
    }
}

pub trait FieldType: Send + Sync + fmt::Debug {
    fn type_name(&self) -> &'static str;

    /// Type-specific attributes accepted on create/update, besides `name`.
    fn allowed_attributes(&self) -> &'static [&'static str] {
        &[]
    }

    fn storage(&self, field: &Field) -> Storage;

    fn is_searchable(&self) -> bool {
        true
    }

    fn is_orderable(&self) -> bool {
        true
    }

    /// Names of the filter operators applicable to this type.
    fn compatible_filters(&self) -> &'static [&'static str];

    /// True when every cell can be recomputed from the field's attributes alone.
    fn data_is_derived_from_attrs(&self) -> bool {
        false
    }

    /// Whether an update keeping this type but changing `changed` attributes can lose cell data.
    fn requires_backup_for_same_type_update(
        &self,
        _original: &Field,
        _changed: &Map<String, Value>,
    ) -> bool {
        false
    }

    /// `name` plus every allowed attribute, absent ones as null.
    fn export_attributes(&self, field: &Field) -> Map<String, Value> {
        let mut out = Map::new();
        out.insert(NAME_ATTRIBUTE.into(), Value::String(field.name.clone()));
        for key in self.allowed_attributes() {
            let value = field.attrs.get(*key).cloned().unwrap_or(Value::Null);
            out.insert((*key).to_string(), value);
        }
        out
    }

    /// Converts a stored cell into this type for `field`. `None` stores null.
    fn coerce(&self, field: &Field, value: &Value) -> Option<Value>;

    /// Parses a filter argument into a value comparable with stored cells.
    fn parse_filter_value(&self, raw: &str) -> Option<Value> {
        Some(Value::String(raw.to_string()))
    }
}

#[derive(Clone, Default)]
pub struct FieldTypeRegistry {
    by_name: HashMap<String, Arc<dyn FieldType>>,
}

impl fmt::Debug for FieldTypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.by_name.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("FieldTypeRegistry").field("types", &names).finish()
    }
}

impl FieldTypeRegistry {
    pub fn new() -> Self {
        FieldTypeRegistry {
            by_name: HashMap::new(),
        }
    }

    /// Registry holding the built-in types (text, long_text, number, boolean, link_row).
    pub fn with_builtin() -> Self {
        let mut registry = FieldTypeRegistry::new();
        for field_type in crate::catalog::builtin::builtin_field_types() {
            registry.register(field_type);
        }
        registry
    }

    /// Adds or replaces a type under its own name.
    pub fn register(&mut self, field_type: Arc<dyn FieldType>) {
        self.by_name
            .insert(field_type.type_name().to_string(), field_type);
    }

    pub fn get(&self, type_name: &str) -> Result<Arc<dyn FieldType>, AppError> {
        self.by_name
            .get(type_name)
            .cloned()
            .ok_or_else(|| AppError::UnknownFieldType(type_name.to_string()))
    }

    pub fn get_for(&self, field: &Field) -> Result<Arc<dyn FieldType>, AppError> {
        self.get(&field.type_name)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.by_name.contains_key(type_name)
    }
}

/// Keeps only `name` and the attributes `field_type` accepts.
pub fn extract_allowed(field_type: &dyn FieldType, attrs: &Map<String, Value>) -> Map<String, Value> {
    attrs
        .iter()
        .filter(|(k, _)| k.as_str() == NAME_ATTRIBUTE || field_type.allowed_attributes().contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_types_are_reported_by_name() {
        let registry = FieldTypeRegistry::with_builtin();
        assert!(registry.contains("number"));
        let err = registry.get("rating").unwrap_err();
        assert_eq!(err.to_string(), "unknown field type: rating");
    }

    #[test]
    fn extract_allowed_drops_foreign_attributes() {
        let registry = FieldTypeRegistry::with_builtin();
        let number = registry.get("number").unwrap();
        let attrs = json!({
            "name": "Price",
            "number_decimal_places": 2,
            "text_default": "x",
        });
        let allowed = extract_allowed(number.as_ref(), attrs.as_object().unwrap());
        assert_eq!(allowed.len(), 2);
        assert!(allowed.contains_key("name"));
        assert!(!allowed.contains_key("text_default"));
    }

    #[test]
    fn cast_type_strips_modifiers() {
        assert_eq!(ColumnSpec::nullable("numeric(50,2)").cast_type(), "numeric");
        assert_eq!(ColumnSpec::nullable("text").cast_type(), "text");
    }
}
