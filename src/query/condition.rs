//! Store-independent row query: a condition tree plus explicit order keys.

use crate::catalog::field_types::Storage;
use serde_json::Value;

/// Test applied to a single cell (or to the link set of a relation field).
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    Always,
    Never,
    Equal(Value),
    NotEqual(Value),
    /// Case-insensitive substring of the cell's text form. Stored lowercased.
    Contains(String),
    HigherThan(f64),
    LowerThan(f64),
    Empty,
    NotEmpty,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldCondition {
    pub db_column: String,
    pub storage: Storage,
    pub predicate: Predicate,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Field(FieldCondition),
    RowId(i64),
}

impl Condition {
    pub fn all() -> Self {
        Condition::And(Vec::new())
    }

    pub fn none() -> Self {
        Condition::Or(Vec::new())
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Condition::And(parts) if parts.is_empty())
    }

    /// Conjunction, flattening nested `And`s and dropping match-all parts.
    pub fn and(self, other: Condition) -> Condition {
        let mut parts = match self {
            Condition::And(parts) => parts,
            c => vec![c],
        };
        match other {
            Condition::And(more) => parts.extend(more),
            c => parts.push(c),
        }
        parts.retain(|c| !c.is_all());
        if parts.len() == 1 {
            parts.remove(0)
        } else {
            Condition::And(parts)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderKey {
    pub db_column: String,
    pub descending: bool,
}

/// Conditions are ANDed together; order keys apply before the `order`, `id` tie-breakers.
#[derive(Clone, Debug, PartialEq)]
pub struct RowQuery {
    pub condition: Condition,
    pub order: Vec<OrderKey>,
}

impl Default for RowQuery {
    fn default() -> Self {
        RowQuery {
            condition: Condition::all(),
            order: Vec::new(),
        }
    }
}

impl RowQuery {
    pub fn new() -> Self {
        RowQuery::default()
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        let current = std::mem::replace(&mut self.condition, Condition::all());
        self.condition = current.and(condition);
        self
    }

    pub fn order_by(mut self, keys: Vec<OrderKey>) -> Self {
        self.order = keys;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn and_flattens_and_drops_match_all() {
        let c = Condition::all()
            .and(Condition::RowId(1))
            .and(Condition::all())
            .and(Condition::RowId(2));
        assert_eq!(c, Condition::And(vec![Condition::RowId(1), Condition::RowId(2)]));
        assert_eq!(Condition::all().and(Condition::RowId(4)), Condition::RowId(4));
    }

    #[test]
    fn filters_accumulate_on_row_query() {
        let q = RowQuery::new()
            .filter(Condition::none())
            .filter(Condition::RowId(3));
        assert_eq!(
            q.condition,
            Condition::And(vec![Condition::none(), Condition::RowId(3)])
        );
    }
}
