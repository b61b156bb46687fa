//! Embedded backend: physical tables of JSON rows plus the field catalog, behind one lock.

mod eval;
mod fields;

use crate::catalog::{
    database_table_name, ColumnSpec, Field, FieldId, FieldTypeRegistry, RelationSpec, Storage, Table, TableId,
};
use crate::error::AppError;
use crate::model::{build_view, TableSchemaView};
use crate::query::RowQuery;
use crate::store::{RowReader, SchemaStore};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

const ORDER_COLUMN: &str = "order";
const TRASHED_COLUMN: &str = "trashed";

/// Rows keyed by id; `columns` maps each column to its default.
#[derive(Clone, Debug)]
struct PhysicalTable {
    columns: BTreeMap<String, Option<Value>>,
    rows: BTreeMap<i64, Map<String, Value>>,
    next_id: i64,
}

impl PhysicalTable {
    fn with_columns(columns: &[(&str, Option<Value>)]) -> Self {
        PhysicalTable {
            columns: columns
                .iter()
                .map(|(name, default)| (name.to_string(), default.clone()))
                .collect(),
            rows: BTreeMap::new(),
            next_id: 1,
        }
    }

    fn user_table() -> Self {
        Self::with_columns(&[(ORDER_COLUMN, None), (TRASHED_COLUMN, Some(Value::Bool(false)))])
    }

    fn join_table() -> Self {
        Self::with_columns(&[(RelationSpec::ROW_COLUMN, None), (RelationSpec::LINKED_COLUMN, None)])
    }

    /// Missing columns take their default (or null). Returns the new id.
    fn insert(&mut self, mut row: Map<String, Value>) -> i64 {
        for (column, default) in &self.columns {
            if !row.contains_key(column) {
                row.insert(column.clone(), default.clone().unwrap_or(Value::Null));
            }
        }
        let id = self.next_id;
        self.next_id += 1;
        self.rows.insert(id, row);
        id
    }

    fn add_column(&mut self, column: &str, default: Option<Value>) {
        let fill = default.clone().unwrap_or(Value::Null);
        for row in self.rows.values_mut() {
            row.insert(column.to_string(), fill.clone());
        }
        self.columns.insert(column.to_string(), default);
    }

    fn drop_column(&mut self, column: &str) {
        for row in self.rows.values_mut() {
            row.remove(column);
        }
        self.columns.remove(column);
    }

    fn has_column(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }
}

#[derive(Clone, Debug)]
struct TableMeta {
    table: Table,
    trashed: bool,
}

#[derive(Clone, Debug)]
struct FieldMeta {
    field: Field,
    trashed: bool,
}

#[derive(Debug)]
struct State {
    physical: BTreeMap<String, PhysicalTable>,
    tables: BTreeMap<TableId, TableMeta>,
    fields: BTreeMap<FieldId, FieldMeta>,
    next_table_id: TableId,
    next_field_id: FieldId,
}

impl Default for State {
    fn default() -> Self {
        State {
            physical: BTreeMap::new(),
            tables: BTreeMap::new(),
            fields: BTreeMap::new(),
            next_table_id: 1,
            next_field_id: 1,
        }
    }
}

fn missing_table(table: &str) -> AppError {
    AppError::Store(format!("relation \"{}\" does not exist", table))
}

fn missing_column(table: &str, column: &str) -> AppError {
    AppError::Store(format!("column \"{}\" of relation \"{}\" does not exist", column, table))
}

impl State {
    fn physical(&self, table: &str) -> Result<&PhysicalTable, AppError> {
        self.physical.get(table).ok_or_else(|| missing_table(table))
    }

    fn physical_mut(&mut self, table: &str) -> Result<&mut PhysicalTable, AppError> {
        self.physical.get_mut(table).ok_or_else(|| missing_table(table))
    }

    fn live_table(&self, table_id: TableId) -> Result<&Table, AppError> {
        match self.tables.get(&table_id) {
            Some(meta) if !meta.trashed => Ok(&meta.table),
            _ => Err(AppError::StaleReference {
                kind: "table",
                id: table_id,
            }),
        }
    }

    fn live_field(&self, field_id: FieldId) -> Result<&Field, AppError> {
        match self.fields.get(&field_id) {
            Some(meta) if !meta.trashed => {
                self.live_table(meta.field.table_id)?;
                Ok(&meta.field)
            }
            _ => Err(AppError::StaleReference {
                kind: "field",
                id: field_id,
            }),
        }
    }

    fn live_fields(&self, table_id: TableId) -> Vec<Field> {
        self.fields
            .values()
            .filter(|m| !m.trashed && m.field.table_id == table_id)
            .map(|m| m.field.clone())
            .collect()
    }

    fn name_taken(&self, table_id: TableId, name: &str, except: Option<FieldId>) -> bool {
        self.fields.values().any(|m| {
            !m.trashed && m.field.table_id == table_id && Some(m.field.id) != except && m.field.name == name
        })
    }

    /// `name` if free, else `"<name> <postfix>"`, `"<name> <postfix> 2"`, ...
    fn free_name(
        &self,
        table_id: TableId,
        name: &str,
        except: Option<FieldId>,
        postfix: Option<&str>,
    ) -> Result<String, AppError> {
        if !self.name_taken(table_id, name, except) {
            return Ok(name.to_string());
        }
        let Some(postfix) = postfix else {
            return Err(AppError::Conflict(format!("a field named '{}' already exists", name)));
        };
        let base = format!("{} {}", name, postfix);
        if !self.name_taken(table_id, &base, except) {
            return Ok(base);
        }
        let mut n = 2;
        loop {
            let candidate = format!("{} {}", base, n);
            if !self.name_taken(table_id, &candidate, except) {
                return Ok(candidate);
            }
            n += 1;
        }
    }

    /// Physical storage for a new field or a field changing storage kind.
    fn create_storage(&mut self, field: &Field, storage: &Storage) -> Result<(), AppError> {
        match storage {
            Storage::Column(spec) => {
                let table = database_table_name(field.table_id);
                let column = field.db_column();
                let physical = self.physical_mut(&table)?;
                if physical.has_column(&column) {
                    return Err(AppError::Store(format!(
                        "column \"{}\" of relation \"{}\" already exists",
                        column, table
                    )));
                }
                physical.add_column(&column, spec.default.clone());
            }
            Storage::Relation(relation) => {
                if !self.physical.contains_key(&relation.linked_table) {
                    return Err(AppError::Validation(format!(
                        "linked table {} does not exist",
                        relation.linked_table_id
                    )));
                }
                self.create_join_table(&relation.through_table)?;
            }
        }
        Ok(())
    }

    fn drop_storage(&mut self, field: &Field, storage: &Storage) -> Result<(), AppError> {
        match storage {
            Storage::Column(_) => {
                let table = database_table_name(field.table_id);
                self.physical_mut(&table)?.drop_column(&field.db_column());
            }
            Storage::Relation(relation) => {
                self.physical.remove(&relation.through_table);
            }
        }
        Ok(())
    }

    fn create_join_table(&mut self, name: &str) -> Result<(), AppError> {
        if self.physical.contains_key(name) {
            return Err(AppError::Store(format!("relation \"{}\" already exists", name)));
        }
        self.physical.insert(name.to_string(), PhysicalTable::join_table());
        Ok(())
    }

    /// Linked row ids of one row, ascending.
    fn links(&self, through_table: &str, row_id: i64) -> Vec<i64> {
        let Some(join) = self.physical.get(through_table) else {
            return Vec::new();
        };
        let mut ids: Vec<i64> = join
            .rows
            .values()
            .filter(|r| r.get(RelationSpec::ROW_COLUMN).and_then(Value::as_i64) == Some(row_id))
            .filter_map(|r| r.get(RelationSpec::LINKED_COLUMN).and_then(Value::as_i64))
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Row as seen through `view`: `id`, `order` and one entry per column attribute.
    fn render_row(&self, view: &TableSchemaView, id: i64, row: &Map<String, Value>) -> Value {
        let mut out = Map::new();
        out.insert("id".into(), Value::from(id));
        out.insert(ORDER_COLUMN.into(), row.get(ORDER_COLUMN).cloned().unwrap_or(Value::Null));
        for column in &view.columns {
            let value = match &column.storage {
                Storage::Column(_) => row.get(&column.db_column).cloned().unwrap_or(Value::Null),
                Storage::Relation(relation) => Value::Array(
                    self.links(&relation.through_table, id)
                        .into_iter()
                        .map(Value::from)
                        .collect(),
                ),
            };
            out.insert(column.attribute.clone(), value);
        }
        Value::Object(out)
    }
}

/// In-process database implementing every storage and collaborator seam.
#[derive(Clone, Debug)]
pub struct MemoryDatabase {
    state: Arc<RwLock<State>>,
    registry: FieldTypeRegistry,
}

impl MemoryDatabase {
    pub fn new(registry: FieldTypeRegistry) -> Self {
        MemoryDatabase {
            state: Arc::new(RwLock::new(State::default())),
            registry,
        }
    }

    pub fn with_builtin_types() -> Self {
        Self::new(FieldTypeRegistry::with_builtin())
    }

    pub async fn create_table(&self, name: &str) -> Result<Table, AppError> {
        let mut state = self.state.write().await;
        let id = state.next_table_id;
        state.next_table_id += 1;
        let order = state.tables.values().map(|m| m.table.order + 1).max().unwrap_or(1);
        let table = Table {
            id,
            name: name.to_string(),
            order,
        };
        state
            .physical
            .insert(table.database_table_name(), PhysicalTable::user_table());
        state.tables.insert(
            id,
            TableMeta {
                table: table.clone(),
                trashed: false,
            },
        );
        tracing::info!(table_id = id, name, "table created");
        Ok(table)
    }

    /// Drops the table, its fields and their join tables for good.
    pub async fn permanently_delete_table(&self, table_id: TableId) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        let meta = state.tables.remove(&table_id).ok_or(AppError::StaleReference {
            kind: "table",
            id: table_id,
        })?;
        state.physical.remove(&meta.table.database_table_name());
        let owned: Vec<Field> = state
            .fields
            .values()
            .filter(|m| m.field.table_id == table_id)
            .map(|m| m.field.clone())
            .collect();
        for field in owned {
            if let Ok(field_type) = self.registry.get_for(&field) {
                if let Storage::Relation(relation) = field_type.storage(&field) {
                    state.physical.remove(&relation.through_table);
                }
            }
            state.fields.remove(&field.id);
        }
        tracing::info!(table_id, "table permanently deleted");
        Ok(())
    }

    /// Live fields of a live table.
    pub async fn fields(&self, table_id: TableId) -> Result<Vec<Field>, AppError> {
        let state = self.state.read().await;
        state.live_table(table_id)?;
        Ok(state.live_fields(table_id))
    }

    pub async fn view(&self, table_id: TableId, attribute_names: bool) -> Result<TableSchemaView, AppError> {
        let fields = self.fields(table_id).await?;
        build_view(table_id, &fields, &self.registry, attribute_names)
    }

    /// Inserts one row from attribute-keyed values; relation attributes take arrays of linked row ids.
    pub async fn insert_row(&self, view: &TableSchemaView, values: &Map<String, Value>) -> Result<Value, AppError> {
        crate::model::check_row_values(view, values)?;
        let mut state = self.state.write().await;
        let table = state.physical(&view.db_table)?;
        let order = match values.get(ORDER_COLUMN).and_then(Value::as_f64) {
            Some(o) => o,
            None => {
                table
                    .rows
                    .values()
                    .filter_map(|r| r.get(ORDER_COLUMN).and_then(Value::as_f64))
                    .fold(0.0, f64::max)
                    + 1.0
            }
        };

        let mut row = Map::new();
        row.insert(ORDER_COLUMN.into(), Value::from(order));
        let mut links: Vec<(&RelationSpec, Vec<i64>)> = Vec::new();
        for column in &view.columns {
            let given = values.get(&column.attribute);
            match &column.storage {
                Storage::Column(spec) => {
                    let value = match given {
                        Some(v) => column.field_type.coerce(&column.field, v),
                        None => spec.default.clone(),
                    };
                    let value = value.or_else(|| spec.default.clone().filter(|_| !spec.nullable));
                    row.insert(column.db_column.clone(), value.unwrap_or(Value::Null));
                }
                Storage::Relation(relation) => {
                    let Some(given) = given.filter(|v| !v.is_null()) else {
                        continue;
                    };
                    let ids = given
                        .as_array()
                        .map(|items| items.iter().filter_map(Value::as_i64).collect::<Vec<i64>>())
                        .ok_or_else(|| {
                            AppError::Validation(format!("'{}' expects a list of row ids", column.attribute))
                        })?;
                    let linked = state.physical(&relation.linked_table)?;
                    if let Some(bad) = ids.iter().find(|id| !linked.rows.contains_key(id)) {
                        return Err(AppError::Validation(format!(
                            "row {} does not exist in table {}",
                            bad, relation.linked_table_id
                        )));
                    }
                    links.push((relation, ids));
                }
            }
        }

        let id = state.physical_mut(&view.db_table)?.insert(row);
        for (relation, ids) in links {
            let join = state.physical_mut(&relation.through_table)?;
            for linked in ids {
                let mut link = Map::new();
                link.insert(RelationSpec::ROW_COLUMN.into(), Value::from(id));
                link.insert(RelationSpec::LINKED_COLUMN.into(), Value::from(linked));
                join.insert(link);
            }
        }
        tracing::debug!(table = %view.db_table, row_id = id, "row inserted");
        let row = state.physical(&view.db_table)?.rows.get(&id).cloned().unwrap_or_default();
        Ok(state.render_row(view, id, &row))
    }

    pub async fn has_table(&self, table: &str) -> bool {
        self.state.read().await.physical.contains_key(table)
    }

    pub async fn has_column(&self, table: &str, column: &str) -> bool {
        self.state
            .read()
            .await
            .physical
            .get(table)
            .map(|t| t.has_column(column))
            .unwrap_or(false)
    }

    /// Every cell of one physical column by row id; `None` when the table or column is missing.
    pub async fn column_values(&self, table: &str, column: &str) -> Option<BTreeMap<i64, Value>> {
        let state = self.state.read().await;
        let physical = state.physical.get(table)?;
        if !physical.has_column(column) {
            return None;
        }
        Some(
            physical
                .rows
                .iter()
                .map(|(id, row)| (*id, row.get(column).cloned().unwrap_or(Value::Null)))
                .collect(),
        )
    }

    /// `(id, row_id, linked_row_id)` of a join table, by id.
    pub async fn relation_rows(&self, table: &str) -> Option<Vec<(i64, i64, i64)>> {
        let state = self.state.read().await;
        let physical = state.physical.get(table)?;
        Some(
            physical
                .rows
                .iter()
                .map(|(id, row)| {
                    let get = |c: &str| row.get(c).and_then(Value::as_i64).unwrap_or_default();
                    (*id, get(RelationSpec::ROW_COLUMN), get(RelationSpec::LINKED_COLUMN))
                })
                .collect(),
        )
    }
}

#[async_trait]
impl SchemaStore for MemoryDatabase {
    async fn add_column(&mut self, table: &str, column: &str, spec: &ColumnSpec) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        let physical = state.physical_mut(table)?;
        if physical.has_column(column) {
            return Err(AppError::Store(format!(
                "column \"{}\" of relation \"{}\" already exists",
                column, table
            )));
        }
        physical.add_column(column, spec.default.clone());
        Ok(())
    }

    async fn copy_not_null_column_data(&mut self, table: &str, source: &str, target: &str) -> Result<u64, AppError> {
        let mut state = self.state.write().await;
        let physical = state.physical_mut(table)?;
        for column in [source, target] {
            if !physical.has_column(column) {
                return Err(missing_column(table, column));
            }
        }
        let mut copied = 0;
        for row in physical.rows.values_mut() {
            let value = row.get(source).cloned().unwrap_or(Value::Null);
            if !value.is_null() {
                row.insert(target.to_string(), value);
                copied += 1;
            }
        }
        Ok(copied)
    }

    async fn drop_column(&mut self, table: &str, column: &str, if_exists: bool) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        let physical = state.physical_mut(table)?;
        if !physical.has_column(column) {
            return if if_exists {
                Ok(())
            } else {
                Err(missing_column(table, column))
            };
        }
        physical.drop_column(column);
        Ok(())
    }

    async fn create_relation_table(&mut self, name: &str, relation: &RelationSpec) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        for referenced in [&relation.row_table, &relation.linked_table] {
            state.physical(referenced)?;
        }
        state.create_join_table(name)
    }

    async fn copy_relation_rows(&mut self, source: &str, target: &str) -> Result<u64, AppError> {
        let mut state = self.state.write().await;
        let rows = state.physical(source)?.rows.clone();
        let destination = state.physical_mut(target)?;
        let copied = rows.len() as u64;
        destination.rows.extend(rows);
        destination.next_id = destination.rows.keys().next_back().map(|id| id + 1).unwrap_or(1);
        Ok(copied)
    }

    async fn truncate_table(&mut self, table: &str) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        state.physical_mut(table)?.rows.clear();
        Ok(())
    }

    async fn drop_table(&mut self, table: &str, if_exists: bool) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        if state.physical.remove(table).is_none() && !if_exists {
            return Err(missing_table(table));
        }
        Ok(())
    }

    async fn resolve_table(&mut self, table_id: TableId) -> Result<Option<String>, AppError> {
        let state = self.state.read().await;
        Ok(state.tables.get(&table_id).map(|m| m.table.database_table_name()))
    }
}

#[async_trait]
impl RowReader for MemoryDatabase {
    async fn fetch_rows(&self, view: &TableSchemaView, query: &RowQuery) -> Result<Vec<Value>, AppError> {
        let state = self.state.read().await;
        let table = state.physical(&view.db_table)?;
        let mut matched: Vec<(i64, &Map<String, Value>)> = table
            .rows
            .iter()
            .filter(|(_, row)| !row.get(TRASHED_COLUMN).and_then(Value::as_bool).unwrap_or(false))
            .filter(|(id, row)| eval::matches(&state, &query.condition, **id, row))
            .map(|(id, row)| (*id, row))
            .collect();
        matched.sort_by(|a, b| eval::compare_rows(&query.order, a, b));
        Ok(matched
            .into_iter()
            .map(|(id, row)| state.render_row(view, id, row))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn relation_copy_moves_sequence_past_copied_ids() {
        let mut db = MemoryDatabase::with_builtin_types();
        let table = db.create_table("Cars").await.unwrap();
        let relation = RelationSpec {
            through_table: "database_relation_1".into(),
            row_table: table.database_table_name(),
            linked_table: table.database_table_name(),
            linked_table_id: table.id,
        };
        db.create_relation_table("database_relation_1", &relation).await.unwrap();
        {
            let mut state = db.state.write().await;
            let join = state.physical_mut("database_relation_1").unwrap();
            for _ in 0..3 {
                join.insert(Map::new());
            }
        }
        db.create_relation_table("backup", &relation).await.unwrap();
        assert_eq!(db.copy_relation_rows("database_relation_1", "backup").await.unwrap(), 3);
        let state = db.state.read().await;
        assert_eq!(state.physical("backup").unwrap().next_id, 4);
    }

    #[tokio::test]
    async fn tables_are_ordered_after_the_last_one() {
        let db = MemoryDatabase::with_builtin_types();
        let cars = db.create_table("Cars").await.unwrap();
        let dealers = db.create_table("Dealers").await.unwrap();
        assert_eq!(cars.order, 1);
        assert_eq!(dealers.order, 2);
        db.permanently_delete_table(dealers.id).await.unwrap();
        {
            let mut state = db.state.write().await;
            if let Some(meta) = state.tables.get_mut(&cars.id) {
                meta.table.order = 7;
            }
        }
        let owners = db.create_table("Owners").await.unwrap();
        assert_eq!(owners.id, 3);
        assert_eq!(owners.order, 8);
    }

    #[tokio::test]
    async fn missing_storage_is_a_store_error_unless_tolerated() {
        let mut db = MemoryDatabase::with_builtin_types();
        let table = db.create_table("Cars").await.unwrap();
        let name = table.database_table_name();
        assert!(matches!(db.drop_column(&name, "nope", false).await, Err(AppError::Store(_))));
        db.drop_column(&name, "nope", true).await.unwrap();
        assert!(matches!(db.drop_table("nope", false).await, Err(AppError::Store(_))));
        db.drop_table("nope", true).await.unwrap();
        assert_eq!(db.resolve_table(table.id).await.unwrap(), Some(name));
        assert_eq!(db.resolve_table(99).await.unwrap(), None);
    }
}
