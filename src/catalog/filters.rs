//! Filter operators usable in `filter__field_<id>__<operator>` keys.

use crate::catalog::field_types::FieldType;
use crate::query::condition::Predicate;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub trait ViewFilterType: Send + Sync + fmt::Debug {
    fn type_name(&self) -> &'static str;

    /// Predicate for one filter argument against a column of `field_type`.
    fn predicate(&self, field_type: &dyn FieldType, arg: &str) -> Predicate;
}

#[derive(Clone, Default)]
pub struct FilterTypeRegistry {
    by_name: HashMap<String, Arc<dyn ViewFilterType>>,
}

impl fmt::Debug for FilterTypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.by_name.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("FilterTypeRegistry").field("types", &names).finish()
    }
}

impl FilterTypeRegistry {
    pub fn new() -> Self {
        FilterTypeRegistry {
            by_name: HashMap::new(),
        }
    }

    pub fn with_builtin() -> Self {
        let mut registry = FilterTypeRegistry::new();
        let builtin: Vec<Arc<dyn ViewFilterType>> = vec![
            Arc::new(EqualFilter),
            Arc::new(NotEqualFilter),
            Arc::new(ContainsFilter),
            Arc::new(HigherThanFilter),
            Arc::new(LowerThanFilter),
            Arc::new(EmptyFilter),
            Arc::new(NotEmptyFilter),
        ];
        for filter in builtin {
            registry.register(filter);
        }
        registry
    }

    pub fn register(&mut self, filter: Arc<dyn ViewFilterType>) {
        self.by_name.insert(filter.type_name().to_string(), filter);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ViewFilterType>> {
        self.by_name.get(name).cloned()
    }
}

#[derive(Debug)]
pub struct EqualFilter;

impl ViewFilterType for EqualFilter {
    fn type_name(&self) -> &'static str {
        "equal"
    }

    fn predicate(&self, field_type: &dyn FieldType, arg: &str) -> Predicate {
        if arg.is_empty() {
            return Predicate::Always;
        }
        match field_type.parse_filter_value(arg) {
            Some(v) => Predicate::Equal(v),
            None => Predicate::Never,
        }
    }
}

#[derive(Debug)]
pub struct NotEqualFilter;

impl ViewFilterType for NotEqualFilter {
    fn type_name(&self) -> &'static str {
        "not_equal"
    }

    fn predicate(&self, field_type: &dyn FieldType, arg: &str) -> Predicate {
        if arg.is_empty() {
            return Predicate::Always;
        }
        match field_type.parse_filter_value(arg) {
            Some(v) => Predicate::NotEqual(v),
            None => Predicate::Always,
        }
    }
}

#[derive(Debug)]
pub struct ContainsFilter;

impl ViewFilterType for ContainsFilter {
    fn type_name(&self) -> &'static str {
        "contains"
    }

    fn predicate(&self, _field_type: &dyn FieldType, arg: &str) -> Predicate {
        if arg.is_empty() {
            Predicate::Always
        } else {
            Predicate::Contains(arg.to_lowercase())
        }
    }
}

fn numeric_arg(field_type: &dyn FieldType, arg: &str) -> Option<f64> {
    field_type
        .parse_filter_value(arg)
        .as_ref()
        .and_then(Value::as_f64)
        .or_else(|| arg.trim().parse::<f64>().ok())
}

#[derive(Debug)]
pub struct HigherThanFilter;

impl ViewFilterType for HigherThanFilter {
    fn type_name(&self) -> &'static str {
        "higher_than"
    }

    fn predicate(&self, field_type: &dyn FieldType, arg: &str) -> Predicate {
        if arg.trim().is_empty() {
            return Predicate::Always;
        }
        numeric_arg(field_type, arg)
            .map(Predicate::HigherThan)
            .unwrap_or(Predicate::Never)
    }
}

#[derive(Debug)]
pub struct LowerThanFilter;

impl ViewFilterType for LowerThanFilter {
    fn type_name(&self) -> &'static str {
        "lower_than"
    }

    fn predicate(&self, field_type: &dyn FieldType, arg: &str) -> Predicate {
        if arg.trim().is_empty() {
            return Predicate::Always;
        }
        numeric_arg(field_type, arg)
            .map(Predicate::LowerThan)
            .unwrap_or(Predicate::Never)
    }
}

#[derive(Debug)]
pub struct EmptyFilter;

impl ViewFilterType for EmptyFilter {
    fn type_name(&self) -> &'static str {
        "empty"
    }

    fn predicate(&self, _field_type: &dyn FieldType, _arg: &str) -> Predicate {
        Predicate::Empty
    }
}

#[derive(Debug)]
pub struct NotEmptyFilter;

impl ViewFilterType for NotEmptyFilter {
    fn type_name(&self) -> &'static str {
        "not_empty"
    }

    fn predicate(&self, _field_type: &dyn FieldType, _arg: &str) -> Predicate {
        Predicate::NotEmpty
    }
}
