//! Search, order and filter operations over a table schema view.

use crate::catalog::{FieldId, FilterTypeRegistry, FIELD_COLUMN_PREFIX};
use crate::error::QueryError;
use crate::model::TableSchemaView;
use crate::query::condition::{Condition, FieldCondition, OrderKey, Predicate, RowQuery};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

fn order_token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(-?)field_([0-9]+)$").expect("static regex"))
}

fn filter_key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^filter__field_([0-9]+)__([A-Za-z0-9_]+)$").expect("static regex"))
}

/// `AND` / `OR`, exactly as spelled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterType {
    And,
    Or,
}

impl std::str::FromStr for FilterType {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AND" => Ok(FilterType::And),
            "OR" => Ok(FilterType::Or),
            _ => Err(QueryError::MalformedQuerySpec(format!(
                "filter type must be AND or OR, got '{}'",
                s
            ))),
        }
    }
}

/// Rows where a searchable column contains `term` (case-insensitive), or whose id equals `term`.
/// A blank term matches every row.
pub fn search_all_fields(view: &TableSchemaView, term: &str) -> Condition {
    if term.trim().is_empty() {
        return Condition::all();
    }
    let needle = term.to_lowercase();
    let mut any = Vec::new();
    if let Ok(id) = term.trim().parse::<i64>() {
        any.push(Condition::RowId(id));
    }
    for column in view.columns.iter().filter(|c| c.field_type.is_searchable()) {
        any.push(Condition::Field(FieldCondition {
            db_column: column.db_column.clone(),
            storage: column.storage.clone(),
            predicate: Predicate::Contains(needle.clone()),
        }));
    }
    Condition::Or(any)
}

/// Parses `field_1,-field_2` into order keys, checking each field exists and is orderable.
pub fn order_by_fields_string(view: &TableSchemaView, spec: &str) -> Result<Vec<OrderKey>, QueryError> {
    if spec.trim().is_empty() {
        return Err(QueryError::MalformedQuerySpec("order by string is empty".into()));
    }
    let mut keys = Vec::new();
    for token in spec.split(',') {
        let token = token.trim();
        let caps = order_token_regex().captures(token).ok_or_else(|| {
            QueryError::MalformedQuerySpec(format!("'{}' is not a valid order by token", token))
        })?;
        let descending = !caps[1].is_empty();
        let raw_id = &caps[2];
        let field_name = format!("{}{}", FIELD_COLUMN_PREFIX, raw_id);
        let column = raw_id
            .parse::<FieldId>()
            .ok()
            .and_then(|id| view.column(id))
            .ok_or_else(|| QueryError::OrderByFieldNotFound(field_name.clone()))?;
        if !column.field_type.is_orderable() {
            return Err(QueryError::OrderByFieldNotPossible {
                field: field_name,
                field_type: column.field_type.type_name().to_string(),
            });
        }
        keys.push(OrderKey {
            db_column: column.db_column.clone(),
            descending,
        });
    }
    Ok(keys)
}

fn filter_arguments(key: &str, value: &Value) -> Result<Vec<String>, QueryError> {
    let scalar = |v: &Value| -> Result<String, QueryError> {
        match v {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            _ => Err(QueryError::MalformedQuerySpec(format!(
                "filter '{}' values must be strings",
                key
            ))),
        }
    };
    match value {
        Value::Array(items) => items.iter().map(scalar).collect(),
        other => Ok(vec![scalar(other)?]),
    }
}

/// Builds the condition for `filter__field_<id>__<operator>` keys. Other keys are ignored.
/// A key with several values matches any of them; keys combine with `filter_type`.
pub fn filter_by_fields_object(
    view: &TableSchemaView,
    filters: &FilterTypeRegistry,
    filter_object: &Map<String, Value>,
    filter_type: &str,
) -> Result<Condition, QueryError> {
    let filter_type: FilterType = filter_type.parse()?;
    let mut conditions = Vec::new();

    for (key, value) in filter_object {
        let Some(caps) = filter_key_regex().captures(key) else {
            continue;
        };
        let raw_id = &caps[1];
        let operator = &caps[2];
        let column = raw_id
            .parse::<FieldId>()
            .ok()
            .and_then(|id| view.column(id))
            .ok_or_else(|| QueryError::FilterFieldNotFound(format!("{}{}", FIELD_COLUMN_PREFIX, raw_id)))?;
        let filter = filters
            .get(operator)
            .ok_or_else(|| QueryError::ViewFilterTypeDoesNotExist(operator.to_string()))?;
        if !column.field_type.compatible_filters().contains(&operator) {
            return Err(QueryError::ViewFilterTypeNotAllowedForField {
                filter_type: operator.to_string(),
                field_type: column.field_type.type_name().to_string(),
            });
        }

        let args = filter_arguments(key, value)?;
        if args.is_empty() {
            continue;
        }
        let mut any: Vec<Condition> = args
            .iter()
            .map(|arg| {
                Condition::Field(FieldCondition {
                    db_column: column.db_column.clone(),
                    storage: column.storage.clone(),
                    predicate: filter.predicate(column.field_type.as_ref(), arg),
                })
            })
            .collect();
        conditions.push(if any.len() == 1 {
            any.swap_remove(0)
        } else {
            Condition::Or(any)
        });
    }

    if conditions.is_empty() {
        return Ok(Condition::all());
    }
    Ok(match filter_type {
        FilterType::And => Condition::And(conditions),
        FilterType::Or => Condition::Or(conditions),
    })
}

impl RowQuery {
    pub fn search_all_fields(self, view: &TableSchemaView, term: &str) -> Self {
        self.filter(search_all_fields(view, term))
    }

    pub fn order_by_fields_string(self, view: &TableSchemaView, spec: &str) -> Result<Self, QueryError> {
        Ok(self.order_by(order_by_fields_string(view, spec)?))
    }

    pub fn filter_by_fields_object(
        self,
        view: &TableSchemaView,
        filters: &FilterTypeRegistry,
        filter_object: &Map<String, Value>,
        filter_type: &str,
    ) -> Result<Self, QueryError> {
        Ok(self.filter(filter_by_fields_object(view, filters, filter_object, filter_type)?))
    }
}
