//! Condition evaluation and ordering over in-memory rows, mirroring the SQL the builder emits.

use super::{State, ORDER_COLUMN};
use crate::catalog::{RelationSpec, Storage};
use crate::query::{Condition, OrderKey, Predicate};
use serde_json::{Map, Value};
use std::cmp::Ordering;

pub(super) fn matches(state: &State, condition: &Condition, id: i64, row: &Map<String, Value>) -> bool {
    match condition {
        Condition::And(parts) => parts.iter().all(|p| matches(state, p, id, row)),
        Condition::Or(parts) => parts.iter().any(|p| matches(state, p, id, row)),
        Condition::RowId(wanted) => *wanted == id,
        Condition::Field(fc) => match &fc.storage {
            Storage::Column(spec) => {
                let cell = row.get(&fc.db_column).unwrap_or(&Value::Null);
                scalar_matches(cell, numeric_scale(&spec.sql_type), &fc.predicate)
            }
            Storage::Relation(relation) => relation_matches(state, relation, id, &fc.predicate),
        },
    }
}

fn relation_matches(state: &State, relation: &RelationSpec, id: i64, predicate: &Predicate) -> bool {
    let links = state.links(&relation.through_table, id);
    match predicate {
        Predicate::Always => true,
        Predicate::Never => false,
        Predicate::Empty => links.is_empty(),
        Predicate::NotEmpty => !links.is_empty(),
        Predicate::NotEqual(v) => !links
            .iter()
            .any(|l| scalar_matches(&Value::from(*l), None, &Predicate::Equal(v.clone()))),
        other => links
            .iter()
            .any(|l| scalar_matches(&Value::from(*l), None, other)),
    }
}

/// Scale of a `numeric(p,s)` column.
fn numeric_scale(sql_type: &str) -> Option<usize> {
    let inner = sql_type.strip_prefix("numeric(")?.strip_suffix(')')?;
    inner.split(',').nth(1)?.trim().parse().ok()
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Text form of a cell the way PostgreSQL casts it to text.
fn cell_text(cell: &Value, scale: Option<usize>) -> Option<String> {
    match (cell, scale) {
        (Value::Null, _) => None,
        (Value::String(s), _) => Some(s.clone()),
        (Value::Number(n), Some(scale)) => n.as_f64().map(|f| format!("{:.*}", scale, f)),
        (Value::Number(n), None) => Some(n.to_string()),
        (Value::Bool(b), _) => Some(b.to_string()),
        (other, _) => Some(other.to_string()),
    }
}

fn values_equal(cell: &Value, wanted: &Value) -> bool {
    match (cell, wanted) {
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Number(_), _) | (_, Value::Number(_)) => match (as_number(cell), as_number(wanted)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
        (a, b) => a == b,
    }
}

fn is_empty(cell: &Value) -> bool {
    match cell {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn scalar_matches(cell: &Value, scale: Option<usize>, predicate: &Predicate) -> bool {
    match predicate {
        Predicate::Always => true,
        Predicate::Never => false,
        Predicate::Equal(v) => values_equal(cell, v),
        Predicate::NotEqual(v) => !values_equal(cell, v),
        Predicate::Contains(needle) => cell_text(cell, scale)
            .map(|t| t.to_lowercase().contains(needle.as_str()))
            .unwrap_or(false),
        Predicate::HigherThan(n) => as_number(cell).map(|c| c > *n).unwrap_or(false),
        Predicate::LowerThan(n) => as_number(cell).map(|c| c < *n).unwrap_or(false),
        Predicate::Empty => is_empty(cell),
        Predicate::NotEmpty => !is_empty(cell),
    }
}

/// Nulls sort lowest, so ascending puts them first and descending last.
fn compare_cells(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Number(_), Value::Number(_)) => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

pub(super) fn compare_rows(
    order: &[OrderKey],
    a: &(i64, &Map<String, Value>),
    b: &(i64, &Map<String, Value>),
) -> Ordering {
    let cell = |row: &Map<String, Value>, column: &str| row.get(column).cloned().unwrap_or(Value::Null);
    for key in order {
        let ord = compare_cells(&cell(a.1, &key.db_column), &cell(b.1, &key.db_column));
        let ord = if key.descending { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    compare_cells(&cell(a.1, ORDER_COLUMN), &cell(b.1, ORDER_COLUMN)).then(a.0.cmp(&b.0))
}
