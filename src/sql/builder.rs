//! Builds parameterized SELECT and INSERT statements over a table schema view.

use crate::catalog::{RelationSpec, Storage};
use crate::model::TableSchemaView;
use crate::query::{Condition, FieldCondition, Predicate, RowQuery};
use serde_json::{Map, Value};

const MAIN_ALIAS: &str = "main";
const LINK_ALIAS: &str = "link";

/// Quote identifier for PostgreSQL (safe: names come from the catalog only).
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// String literal, for the few places PostgreSQL wants a name as text.
pub fn literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn aliased(alias: &str, column: &str) -> String {
    format!("{}.{}", alias, quoted(column))
}

#[derive(Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push_param(&mut self, v: Value) -> u32 {
        let n = self.params.len() as u32 + 1;
        self.params.push(v);
        n
    }

    fn placeholder(&mut self, v: Value, cast: &str) -> String {
        let n = self.push_param(v);
        format!("${}::{}", n, cast)
    }
}

/// Predicate over one scalar expression of SQL type `cast`.
fn scalar_predicate(q: &mut QueryBuf, expr: &str, cast: &str, predicate: &Predicate) -> String {
    match predicate {
        Predicate::Always => "TRUE".into(),
        Predicate::Never => "FALSE".into(),
        Predicate::Equal(v) => format!("{} = {}", expr, q.placeholder(v.clone(), cast)),
        Predicate::NotEqual(v) => {
            format!("{} IS DISTINCT FROM {}", expr, q.placeholder(v.clone(), cast))
        }
        Predicate::Contains(needle) => format!(
            "position({} in lower({}::text)) > 0",
            q.placeholder(Value::String(needle.clone()), "text"),
            expr
        ),
        Predicate::HigherThan(n) => {
            format!("{} > {}", expr, q.placeholder(Value::from(*n), "numeric"))
        }
        Predicate::LowerThan(n) => {
            format!("{} < {}", expr, q.placeholder(Value::from(*n), "numeric"))
        }
        Predicate::Empty => format!("({e} IS NULL OR {e}::text = '')", e = expr),
        Predicate::NotEmpty => format!("({e} IS NOT NULL AND {e}::text <> '')", e = expr),
    }
}

/// A relation predicate holds when some linked row id satisfies it; `Empty`/`NotEmpty`/`NotEqual` look at the whole link set.
fn relation_predicate(q: &mut QueryBuf, relation: &RelationSpec, predicate: &Predicate) -> String {
    let links = format!(
        "SELECT 1 FROM {} {} WHERE {} = {}",
        quoted(&relation.through_table),
        LINK_ALIAS,
        aliased(LINK_ALIAS, RelationSpec::ROW_COLUMN),
        aliased(MAIN_ALIAS, "id")
    );
    let linked = aliased(LINK_ALIAS, RelationSpec::LINKED_COLUMN);
    match predicate {
        Predicate::Always => "TRUE".into(),
        Predicate::Never => "FALSE".into(),
        Predicate::Empty => format!("NOT EXISTS ({})", links),
        Predicate::NotEmpty => format!("EXISTS ({})", links),
        Predicate::NotEqual(v) => format!(
            "NOT EXISTS ({} AND {})",
            links,
            scalar_predicate(q, &linked, "bigint", &Predicate::Equal(v.clone()))
        ),
        other => format!(
            "EXISTS ({} AND {})",
            links,
            scalar_predicate(q, &linked, "bigint", other)
        ),
    }
}

fn field_condition(q: &mut QueryBuf, fc: &FieldCondition) -> String {
    match &fc.storage {
        Storage::Column(spec) => scalar_predicate(
            q,
            &aliased(MAIN_ALIAS, &fc.db_column),
            spec.cast_type(),
            &fc.predicate,
        ),
        Storage::Relation(relation) => relation_predicate(q, relation, &fc.predicate),
    }
}

pub fn render_condition(q: &mut QueryBuf, condition: &Condition) -> String {
    match condition {
        Condition::And(parts) if parts.is_empty() => "TRUE".into(),
        Condition::Or(parts) if parts.is_empty() => "FALSE".into(),
        Condition::And(parts) => {
            let rendered: Vec<String> = parts.iter().map(|p| render_condition(q, p)).collect();
            format!("({})", rendered.join(" AND "))
        }
        Condition::Or(parts) => {
            let rendered: Vec<String> = parts.iter().map(|p| render_condition(q, p)).collect();
            format!("({})", rendered.join(" OR "))
        }
        Condition::RowId(id) => format!(
            "{} = {}",
            aliased(MAIN_ALIAS, "id"),
            q.placeholder(Value::from(*id), "bigint")
        ),
        Condition::Field(fc) => field_condition(q, fc),
    }
}

/// SELECT list: system columns then each view column under its attribute name.
/// Numeric values come back as text (sqlx has no numeric decoder without extra features);
/// relations come back as a JSON array of linked row ids.
fn select_list(view: &TableSchemaView) -> String {
    let mut parts = vec![
        format!("{} AS {}", aliased(MAIN_ALIAS, "id"), quoted("id")),
        format!("{}::text AS {}", aliased(MAIN_ALIAS, "order"), quoted("order")),
    ];
    for c in &view.columns {
        let expr = match &c.storage {
            Storage::Column(spec) if spec.cast_type() == "numeric" => {
                format!("{}::text", aliased(MAIN_ALIAS, &c.db_column))
            }
            Storage::Column(_) => aliased(MAIN_ALIAS, &c.db_column),
            Storage::Relation(rel) => format!(
                "(SELECT COALESCE(json_agg({linked} ORDER BY {linked}), '[]'::json) FROM {through} {link} WHERE {row} = {id})",
                linked = aliased(LINK_ALIAS, RelationSpec::LINKED_COLUMN),
                through = quoted(&rel.through_table),
                link = LINK_ALIAS,
                row = aliased(LINK_ALIAS, RelationSpec::ROW_COLUMN),
                id = aliased(MAIN_ALIAS, "id"),
            ),
        };
        parts.push(format!("{} AS {}", expr, quoted(&c.attribute)));
    }
    parts.join(", ")
}

/// SELECT rows matching the query; explicit keys first, then `order`, then `id`.
pub fn select_rows(
    view: &TableSchemaView,
    query: &RowQuery,
    limit: Option<u32>,
    offset: Option<u32>,
) -> QueryBuf {
    let mut q = QueryBuf::new();
    let condition = render_condition(&mut q, &query.condition);
    let mut order_parts: Vec<String> = query
        .order
        .iter()
        .map(|k| {
            let dir = if k.descending { "DESC NULLS LAST" } else { "ASC NULLS FIRST" };
            format!("{} {}", aliased(MAIN_ALIAS, &k.db_column), dir)
        })
        .collect();
    order_parts.push(format!("{} ASC", aliased(MAIN_ALIAS, "order")));
    order_parts.push(format!("{} ASC", aliased(MAIN_ALIAS, "id")));

    let limit_clause = limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset_clause = offset.map(|n| format!(" OFFSET {}", n)).unwrap_or_default();
    q.sql = format!(
        "SELECT {} FROM {} {} WHERE NOT {} AND {} ORDER BY {}{}{}",
        select_list(view),
        quoted(&view.db_table),
        MAIN_ALIAS,
        aliased(MAIN_ALIAS, "trashed"),
        condition,
        order_parts.join(", "),
        limit_clause,
        offset_clause
    );
    q
}

/// INSERT one row from attribute-keyed values. Relation attributes are skipped (see `insert_links`).
/// Columns with a default are omitted when absent so the database fills them.
pub fn insert_row(view: &TableSchemaView, values: &Map<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = quoted(&view.db_table);
    let mut cols = vec![quoted("order")];
    let order = match values.get("order") {
        Some(v) if !v.is_null() => q.placeholder(v.clone(), "numeric"),
        _ => format!("(SELECT COALESCE(MAX({o}), 0) + 1 FROM {t})", o = quoted("order"), t = table),
    };
    let mut placeholders = vec![order];
    for c in &view.columns {
        let Storage::Column(spec) = &c.storage else {
            continue;
        };
        let val = values.get(&c.attribute).cloned();
        if val.is_none() && spec.default.is_some() {
            continue;
        }
        cols.push(quoted(&c.db_column));
        placeholders.push(q.placeholder(val.unwrap_or(Value::Null), spec.cast_type()));
    }
    q.sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
        table,
        cols.join(", "),
        placeholders.join(", "),
        quoted("id")
    );
    q
}

/// INSERT the links of one row into a relation's join table.
pub fn insert_links(relation: &RelationSpec, row_id: i64, linked_ids: &[i64]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let ids = format!(
        "{{{}}}",
        linked_ids.iter().map(i64::to_string).collect::<Vec<_>>().join(",")
    );
    let row = q.placeholder(Value::from(row_id), "bigint");
    let linked = q.placeholder(Value::String(ids), "bigint[]");
    q.sql = format!(
        "INSERT INTO {} ({}, {}) SELECT {}, unnest({})",
        quoted(&relation.through_table),
        quoted(RelationSpec::ROW_COLUMN),
        quoted(RelationSpec::LINKED_COLUMN),
        row,
        linked
    );
    q
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Field, FieldTypeRegistry, FilterTypeRegistry};
    use crate::model::build_view;
    use serde_json::json;

    fn view() -> TableSchemaView {
        let fields = vec![
            Field {
                id: 1,
                table_id: 5,
                type_name: "text".into(),
                name: "Name".into(),
                order: 0,
                primary: true,
                attrs: Map::new(),
            },
            Field {
                id: 2,
                table_id: 5,
                type_name: "number".into(),
                name: "Price".into(),
                order: 1,
                primary: false,
                attrs: json!({"number_decimal_places": 2}).as_object().cloned().unwrap(),
            },
            Field {
                id: 3,
                table_id: 5,
                type_name: "link_row".into(),
                name: "Dealers".into(),
                order: 2,
                primary: false,
                attrs: json!({"link_row_table_id": 6}).as_object().cloned().unwrap(),
            },
        ];
        build_view(5, &fields, &FieldTypeRegistry::with_builtin(), true).unwrap()
    }

    #[test]
    fn empty_query_selects_everything_with_tie_breakers() {
        let q = select_rows(&view(), &RowQuery::new(), None, None);
        assert!(q.params.is_empty());
        assert!(q.sql.starts_with("SELECT main.\"id\" AS \"id\", main.\"order\"::text AS \"order\""));
        assert!(q.sql.contains("main.\"field_2\"::text AS \"price\""));
        assert!(q.sql.contains("FROM \"database_relation_3\" link WHERE link.\"row_id\" = main.\"id\""));
        assert!(q.sql.ends_with(
            "FROM \"database_table_5\" main WHERE NOT main.\"trashed\" AND TRUE ORDER BY main.\"order\" ASC, main.\"id\" ASC"
        ));
    }

    #[test]
    fn order_keys_precede_tie_breakers() {
        let v = view();
        let query = RowQuery::new().order_by_fields_string(&v, "field_1,-field_2").unwrap();
        let q = select_rows(&v, &query, Some(10), Some(20));
        assert!(q.sql.ends_with(
            "ORDER BY main.\"field_1\" ASC NULLS FIRST, main.\"field_2\" DESC NULLS LAST, main.\"order\" ASC, main.\"id\" ASC LIMIT 10 OFFSET 20"
        ));
    }

    #[test]
    fn filters_become_cast_placeholders() {
        let v = view();
        let filters = FilterTypeRegistry::with_builtin();
        let obj = json!({
            "filter__field_1__equal": ["BMW", "Audi"],
            "filter__field_2__higher_than": "5500",
            "filter__field_3__empty": "",
        });
        let query = RowQuery::new()
            .filter_by_fields_object(&v, &filters, obj.as_object().unwrap(), "AND")
            .unwrap();
        let q = select_rows(&v, &query, None, None);
        assert!(q.sql.contains(
            "((main.\"field_1\" = $1::text OR main.\"field_1\" = $2::text) AND main.\"field_2\" > $3::numeric AND NOT EXISTS (SELECT 1 FROM \"database_relation_3\" link WHERE link.\"row_id\" = main.\"id\"))"
        ));
        assert_eq!(q.params, vec![json!("BMW"), json!("Audi"), json!(5500.0)]);
    }

    #[test]
    fn search_renders_contains_and_row_id() {
        let v = view();
        let q = select_rows(&v, &RowQuery::new().search_all_fields(&v, "7"), None, None);
        assert!(q.sql.contains(
            "(main.\"id\" = $1::bigint OR position($2::text in lower(main.\"field_1\"::text)) > 0 OR position($3::text in lower(main.\"field_2\"::text)) > 0)"
        ));
        assert_eq!(q.params, vec![json!(7), json!("7"), json!("7")]);
    }

    #[test]
    fn insert_defaults_order_and_skips_relations() {
        let v = view();
        let values = json!({"name": "BMW", "price": 10000, "dealers": [1, 2]});
        let q = insert_row(&v, values.as_object().unwrap());
        assert_eq!(
            q.sql,
            "INSERT INTO \"database_table_5\" (\"order\", \"field_1\", \"field_2\") VALUES ((SELECT COALESCE(MAX(\"order\"), 0) + 1 FROM \"database_table_5\"), $1::text, $2::numeric) RETURNING \"id\""
        );
        assert_eq!(q.params, vec![json!("BMW"), json!(10000)]);
    }

    #[test]
    fn links_insert_as_array() {
        let v = view();
        let Storage::Relation(rel) = &v.column(3).unwrap().storage else {
            panic!("expected relation");
        };
        let q = insert_links(rel, 9, &[1, 4]);
        assert_eq!(
            q.sql,
            "INSERT INTO \"database_relation_3\" (\"row_id\", \"linked_row_id\") SELECT $1::bigint, unnest($2::bigint[])"
        );
        assert_eq!(q.params, vec![json!(9), json!("{1,4}")]);
    }

    #[test]
    fn identifiers_and_literals_are_escaped() {
        assert_eq!(quoted("a\"b"), "\"a\"\"b\"");
        assert_eq!(literal("it's"), "'it''s'");
    }
}
