//! Values in and out of PostgreSQL: text binds for cast placeholders, rows back to JSON.

use serde_json::{Number, Value};
use sqlx::encode::{Encode, IsNull};
use sqlx::postgres::{PgArguments, PgRow, PgTypeInfo, Postgres};
use sqlx::query::Query;
use sqlx::{Column, Database, Row};

/// Every placeholder the builder emits carries a `::type` cast, so values travel as text.
#[derive(Clone, Debug, PartialEq)]
pub struct PgBindValue(Option<String>);

impl PgBindValue {
    pub fn from_json(v: &Value) -> Self {
        PgBindValue(match v {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Number(n) => Some(n.to_string()),
            other => Some(other.to_string()),
        })
    }
}

impl<'q> Encode<'q, Postgres> for PgBindValue {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync>> {
        match &self.0 {
            None => Ok(IsNull::Yes),
            Some(s) => <&str as Encode<Postgres>>::encode_by_ref(&s.as_str(), buf),
        }
    }
}

impl sqlx::Type<Postgres> for PgBindValue {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("TEXT")
    }
}

pub fn bind_all<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[Value],
) -> Query<'q, Postgres, PgArguments> {
    for p in params {
        query = query.bind(PgBindValue::from_json(p));
    }
    query
}

pub fn row_to_json(row: &PgRow) -> Value {
    let mut map = serde_json::Map::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), cell_to_value(row, name));
    }
    Value::Object(map)
}

/// Numeric columns are selected as text; turn those back into JSON numbers.
fn numeric_text(s: &str) -> Option<Value> {
    let looks_numeric = !s.is_empty()
        && s.chars().all(|c| c.is_ascii_digit() || c == '.' || c == '-')
        && s.chars().any(|c| c.is_ascii_digit());
    if !looks_numeric {
        return None;
    }
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::from(i));
    }
    s.parse::<f64>().ok().and_then(Number::from_f64).map(Value::Number)
}

fn cell_to_value(row: &PgRow, name: &str) -> Value {
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::from(n);
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::from(n);
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        if name == "order" {
            if let Some(v) = numeric_text(&s) {
                return v;
            }
        }
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<serde_json::Value>, _>(name) {
        return j;
    }
    Value::Null
}

/// Rewrites text cells of numeric columns into numbers, after `row_to_json`.
pub fn numeric_cells_to_numbers(row: &mut Value, numeric_attributes: &[&str]) {
    let Some(map) = row.as_object_mut() else {
        return;
    };
    for attr in numeric_attributes {
        if let Some(cell) = map.get_mut(*attr) {
            if let Some(n) = cell.as_str().and_then(numeric_text) {
                *cell = n;
            }
        }
    }
}
