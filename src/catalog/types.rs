//! Column definitions and tables as stored in the `_sys_*` catalog.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type FieldId = i64;
pub type TableId = i64;

/// Prefix of every physical user column. System columns never start with it.
pub const FIELD_COLUMN_PREFIX: &str = "field_";

pub fn db_column_for(field_id: FieldId) -> String {
    format!("{}{}", FIELD_COLUMN_PREFIX, field_id)
}

pub fn database_table_name(table_id: TableId) -> String {
    format!("database_table_{}", table_id)
}

/// One user-defined field. `attrs` holds the type-specific parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub id: FieldId,
    pub table_id: TableId,
    #[serde(rename = "type")]
    pub type_name: String,
    pub name: String,
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub attrs: Map<String, Value>,
}

impl Field {
    /// Physical column name; stable for the lifetime of the field.
    pub fn db_column(&self) -> String {
        db_column_for(self.id)
    }

    /// Lowercased, underscore-separated form of the display name.
    pub fn model_attribute_name(&self) -> String {
        let mut out = String::with_capacity(self.name.len());
        let mut pending_sep = false;
        for c in self.name.trim().chars() {
            if c.is_alphanumeric() {
                if pending_sep && !out.is_empty() {
                    out.push('_');
                }
                pending_sep = false;
                out.extend(c.to_lowercase());
            } else if c.is_whitespace() || c == '_' || c == '-' {
                pending_sep = true;
            }
        }
        if out.is_empty() {
            "field".to_string()
        } else {
            out
        }
    }

    pub fn attr(&self, key: &str) -> Option<&Value> {
        self.attrs.get(key).filter(|v| !v.is_null())
    }

    pub fn attr_i64(&self, key: &str) -> Option<i64> {
        self.attr(key).and_then(Value::as_i64)
    }

    pub fn attr_bool(&self, key: &str) -> Option<bool> {
        self.attr(key).and_then(Value::as_bool)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub id: TableId,
    pub name: String,
    #[serde(default)]
    pub order: i32,
}

impl Table {
    pub fn database_table_name(&self) -> String {
        database_table_name(self.id)
    }
}

/// Kinds of catalog rows the trash subsystem can soft-delete and restore.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrashKind {
    Table,
    Field,
}
