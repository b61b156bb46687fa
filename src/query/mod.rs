//! Generic row queries over user-defined columns.

pub mod condition;
pub mod ops;

pub use condition::{Condition, FieldCondition, OrderKey, Predicate, RowQuery};
pub use ops::{filter_by_fields_object, order_by_fields_string, search_all_fields, FilterType};
