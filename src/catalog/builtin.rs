//! Built-in field types.

use crate::catalog::field_types::{ColumnSpec, FieldType, RelationSpec, Storage};
use crate::catalog::types::Field;
use serde_json::{Map, Number, Value};
use std::sync::Arc;

const TEXT_FILTERS: &[&str] = &["equal", "not_equal", "contains", "empty", "not_empty"];
const NUMBER_FILTERS: &[&str] = &[
    "equal",
    "not_equal",
    "higher_than",
    "lower_than",
    "empty",
    "not_empty",
];

const MAX_DECIMAL_PLACES: i64 = 10;

pub fn builtin_field_types() -> Vec<Arc<dyn FieldType>> {
    vec![
        Arc::new(TextFieldType),
        Arc::new(LongTextFieldType),
        Arc::new(NumberFieldType),
        Arc::new(BooleanFieldType),
        Arc::new(LinkRowFieldType),
    ]
}

fn value_as_text(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(Value::String(s.clone())),
        Value::Number(n) => Some(Value::String(n.to_string())),
        Value::Bool(b) => Some(Value::String(b.to_string())),
        other => Some(Value::String(other.to_string())),
    }
}

#[derive(Debug)]
pub struct TextFieldType;

impl FieldType for TextFieldType {
    fn type_name(&self) -> &'static str {
        "text"
    }

    fn allowed_attributes(&self) -> &'static [&'static str] {
        &["text_default"]
    }

    fn storage(&self, field: &Field) -> Storage {
        let default = field
            .attr("text_default")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(|s| Value::String(s.to_string()));
        Storage::Column(ColumnSpec {
            sql_type: "text".into(),
            nullable: true,
            default,
        })
    }

    fn compatible_filters(&self) -> &'static [&'static str] {
        TEXT_FILTERS
    }

    fn coerce(&self, _field: &Field, value: &Value) -> Option<Value> {
        value_as_text(value)
    }
}

#[derive(Debug)]
pub struct LongTextFieldType;

impl FieldType for LongTextFieldType {
    fn type_name(&self) -> &'static str {
        "long_text"
    }

    fn storage(&self, _field: &Field) -> Storage {
        Storage::Column(ColumnSpec::nullable("text"))
    }

    fn compatible_filters(&self) -> &'static [&'static str] {
        TEXT_FILTERS
    }

    fn coerce(&self, _field: &Field, value: &Value) -> Option<Value> {
        value_as_text(value)
    }
}

#[derive(Debug)]
pub struct NumberFieldType;

impl NumberFieldType {
    fn decimal_places(field: &Field) -> i64 {
        field
            .attr_i64("number_decimal_places")
            .unwrap_or(0)
            .clamp(0, MAX_DECIMAL_PLACES)
    }

    fn allows_negative(field: &Field) -> bool {
        field.attr_bool("number_negative").unwrap_or(false)
    }

    /// Whole numbers as integers while they fit in an i64, floats otherwise.
    fn to_value(n: f64, decimal_places: i64) -> Option<Value> {
        let fits_i64 = n >= i64::MIN as f64 && n < i64::MAX as f64;
        if decimal_places == 0 && fits_i64 {
            Some(Value::from(n as i64))
        } else {
            Number::from_f64(n).map(Value::Number)
        }
    }
}

impl FieldType for NumberFieldType {
    fn type_name(&self) -> &'static str {
        "number"
    }

    fn allowed_attributes(&self) -> &'static [&'static str] {
        &["number_decimal_places", "number_negative"]
    }

    fn storage(&self, field: &Field) -> Storage {
        Storage::Column(ColumnSpec::nullable(format!(
            "numeric(50,{})",
            Self::decimal_places(field)
        )))
    }

    fn compatible_filters(&self) -> &'static [&'static str] {
        NUMBER_FILTERS
    }

    fn requires_backup_for_same_type_update(
        &self,
        original: &Field,
        changed: &Map<String, Value>,
    ) -> bool {
        let places_shrink = changed
            .get("number_decimal_places")
            .map(|v| v.as_i64().unwrap_or(0) < Self::decimal_places(original))
            .unwrap_or(false);
        let negatives_dropped = Self::allows_negative(original)
            && changed
                .get("number_negative")
                .map(|v| !v.as_bool().unwrap_or(false))
                .unwrap_or(false);
        places_shrink || negatives_dropped
    }

    fn coerce(&self, field: &Field, value: &Value) -> Option<Value> {
        let n = match value {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => s.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        if !n.is_finite() || (n < 0.0 && !Self::allows_negative(field)) {
            return None;
        }
        let places = Self::decimal_places(field);
        let factor = 10f64.powi(places as i32);
        Self::to_value((n * factor).round() / factor, places)
    }

    fn parse_filter_value(&self, raw: &str) -> Option<Value> {
        raw.trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
    }
}

#[derive(Debug)]
pub struct BooleanFieldType;

impl BooleanFieldType {
    fn truthy(s: &str) -> bool {
        matches!(
            s.trim().to_lowercase().as_str(),
            "t" | "true" | "y" | "yes" | "on" | "1" | "checked"
        )
    }
}

impl FieldType for BooleanFieldType {
    fn type_name(&self) -> &'static str {
        "boolean"
    }

    fn storage(&self, _field: &Field) -> Storage {
        Storage::Column(ColumnSpec {
            sql_type: "boolean".into(),
            nullable: false,
            default: Some(Value::Bool(false)),
        })
    }

    fn is_searchable(&self) -> bool {
        false
    }

    fn compatible_filters(&self) -> &'static [&'static str] {
        &["equal", "not_equal"]
    }

    fn coerce(&self, _field: &Field, value: &Value) -> Option<Value> {
        Some(Value::Bool(match value {
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            Value::String(s) => Self::truthy(s),
            _ => false,
        }))
    }

    fn parse_filter_value(&self, raw: &str) -> Option<Value> {
        Some(Value::Bool(Self::truthy(raw)))
    }
}

/// Many-to-many link to rows of another table.
#[derive(Debug)]
pub struct LinkRowFieldType;

impl FieldType for LinkRowFieldType {
    fn type_name(&self) -> &'static str {
        "link_row"
    }

    fn allowed_attributes(&self) -> &'static [&'static str] {
        &["link_row_table_id"]
    }

    fn storage(&self, field: &Field) -> Storage {
        let linked = field.attr_i64("link_row_table_id").unwrap_or(field.table_id);
        Storage::Relation(RelationSpec::for_link(field, linked))
    }

    fn is_searchable(&self) -> bool {
        false
    }

    fn is_orderable(&self) -> bool {
        false
    }

    fn compatible_filters(&self) -> &'static [&'static str] {
        &["empty", "not_empty"]
    }

    fn coerce(&self, _field: &Field, _value: &Value) -> Option<Value> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn number_field(places: i64, negative: bool) -> Field {
        Field {
            id: 1,
            table_id: 1,
            type_name: "number".into(),
            name: "Price".into(),
            order: 0,
            primary: false,
            attrs: json!({"number_decimal_places": places, "number_negative": negative})
                .as_object()
                .cloned()
                .unwrap(),
        }
    }

    #[test]
    fn number_coercion_rounds_and_rejects() {
        let field = number_field(1, false);
        assert_eq!(NumberFieldType.coerce(&field, &json!("12.34")), Some(json!(12.3)));
        assert_eq!(NumberFieldType.coerce(&field, &json!(-4)), None);
        assert_eq!(NumberFieldType.coerce(&field, &json!("abc")), None);
        assert_eq!(NumberFieldType.coerce(&number_field(0, true), &json!(-4.4)), Some(json!(-4)));
    }

    #[test]
    fn whole_numbers_beyond_i64_keep_their_magnitude() {
        let field = number_field(0, true);
        assert_eq!(
            NumberFieldType.coerce(&field, &json!("100000000000000000000")),
            Some(json!(1e20))
        );
        assert_eq!(
            NumberFieldType.coerce(&field, &json!("-100000000000000000000")),
            Some(json!(-1e20))
        );
        assert_eq!(NumberFieldType.coerce(&field, &json!("9007199254740992")), Some(json!(9007199254740992i64)));
    }

    #[test]
    fn number_same_type_backup_rules() {
        let original = number_field(2, true);
        let shrink = json!({"number_decimal_places": 1});
        let grow = json!({"number_decimal_places": 3});
        let drop_negative = json!({"number_negative": false});
        assert!(NumberFieldType.requires_backup_for_same_type_update(&original, shrink.as_object().unwrap()));
        assert!(!NumberFieldType.requires_backup_for_same_type_update(&original, grow.as_object().unwrap()));
        assert!(NumberFieldType.requires_backup_for_same_type_update(&original, drop_negative.as_object().unwrap()));
    }

    #[test]
    fn text_default_feeds_column_spec() {
        let mut field = number_field(0, false);
        field.type_name = "text".into();
        field.attrs = json!({"text_default": "white"}).as_object().cloned().unwrap();
        match TextFieldType.storage(&field) {
            Storage::Column(spec) => {
                assert_eq!(spec.default, Some(json!("white")));
                assert!(spec.nullable);
            }
            other => panic!("unexpected storage {:?}", other),
        }
    }

    #[test]
    fn export_includes_name_and_nulls_for_missing_attributes() {
        let mut field = number_field(2, false);
        field.attrs.remove("number_negative");
        let exported = NumberFieldType.export_attributes(&field);
        assert_eq!(exported.get("name"), Some(&json!("Price")));
        assert_eq!(exported.get("number_decimal_places"), Some(&json!(2)));
        assert_eq!(exported.get("number_negative"), Some(&Value::Null));
    }
}
