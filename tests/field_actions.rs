mod common;

use common::{cars, create, obj};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tablekeep::catalog::{ColumnSpec, Storage};
use tablekeep::{
    table_scope, ActionHistory, ActionParams, ActionState, AppError, BackupDescriptor, DeleteFieldActionType,
    Field, FieldHandler, FieldType, FieldTypeRegistry, MemoryDatabase, UpdateFieldActionType,
};

fn backup_of(history: &ActionHistory, action_id: i64) -> Option<BackupDescriptor> {
    history.get(action_id).and_then(|r| r.params.backup_data().cloned())
}

fn last_id(history: &ActionHistory) -> i64 {
    history.records().last().map(|r| r.id).unwrap()
}

async fn cells(db: &MemoryDatabase, table: &str, column: &str) -> Vec<Value> {
    db.column_values(table, column).await.unwrap().into_values().collect()
}

async fn field_name(db: &mut MemoryDatabase, field_id: i64) -> String {
    db.get_field(field_id).await.unwrap().name
}

#[tokio::test]
async fn type_change_round_trips_through_undo_and_redo() {
    let mut cars = cars().await;
    let scope = table_scope(cars.table.id);
    let colors = cars.column(&cars.color).await;

    let (as_number, _) =
        UpdateFieldActionType::run(&mut cars.history, &mut cars.db, &cars.color, Some("number"), &Map::new())
            .await
            .unwrap();
    assert_eq!(as_number.type_name, "number");
    assert!(cars.column(&as_number).await.iter().all(Value::is_null));
    let action_id = last_id(&cars.history);
    assert_eq!(
        backup_of(&cars.history, action_id),
        Some(BackupDescriptor::Column {
            table_id: cars.table.id,
            column_name: format!("field_{}_backup_{}", cars.color.id, action_id),
        })
    );

    for _ in 0..2 {
        let undone = cars.history.undo(&mut cars.db, &scope).await.unwrap().unwrap();
        assert_eq!(undone.state, ActionState::Undone);
        let field = cars.db.get_field(cars.color.id).await.unwrap();
        assert_eq!(field.type_name, "text");
        assert_eq!(cars.column(&field).await, colors);

        let redone = cars.history.redo(&mut cars.db, &scope).await.unwrap().unwrap();
        assert_eq!(redone.state, ActionState::Redone);
        let field = cars.db.get_field(cars.color.id).await.unwrap();
        assert_eq!(field.type_name, "number");
        assert!(cars.column(&field).await.iter().all(Value::is_null));
    }

    cars.history.undo(&mut cars.db, &scope).await.unwrap();
    let restored = cars.db.get_field(cars.color.id).await.unwrap();
    assert_eq!(restored.name, "Color");
    assert_eq!(cars.column(&restored).await, colors);
    // the undo left a backup of the number cells for a later redo
    assert_eq!(
        backup_of(&cars.history, action_id),
        Some(BackupDescriptor::Column {
            table_id: cars.table.id,
            column_name: format!("field_{}_backup_{}_undo", cars.color.id, action_id),
        })
    );
}

#[tokio::test]
async fn name_collisions_get_a_direction_postfix() {
    let mut cars = cars().await;
    let scope = table_scope(cars.table.id);

    let (shade, _) = UpdateFieldActionType::run(
        &mut cars.history,
        &mut cars.db,
        &cars.color,
        None,
        &obj(json!({"name": "Shade"})),
    )
    .await
    .unwrap();
    assert_eq!(shade.name, "Shade");
    assert_eq!(backup_of(&cars.history, last_id(&cars.history)), None);

    cars.db
        .create_field(cars.table.id, "text", &obj(json!({"name": "Color"})))
        .await
        .unwrap();
    cars.history.undo(&mut cars.db, &scope).await.unwrap();
    assert_eq!(cars.db.get_field(shade.id).await.unwrap().name, "Color (From undo)");

    cars.db
        .create_field(cars.table.id, "text", &obj(json!({"name": "Shade"})))
        .await
        .unwrap();
    cars.history.redo(&mut cars.db, &scope).await.unwrap();
    assert_eq!(cars.db.get_field(shade.id).await.unwrap().name, "Shade (From redo)");
}

#[tokio::test]
async fn plain_rename_is_a_conflict_outside_undo() {
    let mut cars = cars().await;
    let err = UpdateFieldActionType::run(
        &mut cars.history,
        &mut cars.db,
        &cars.color,
        None,
        &obj(json!({"name": "Name"})),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    assert_eq!(cars.history.records().len(), 4);
}

#[tokio::test]
async fn shrinking_decimal_places_is_reversible() {
    common::init_tracing();
    let mut db = MemoryDatabase::with_builtin_types();
    let mut history = ActionHistory::new(10);
    let table = db.create_table("Parcels").await.unwrap();
    let scope = table_scope(table.id);
    create(&mut db, &mut history, &table, "text", json!({"name": "Label"})).await;
    let weight = create(
        &mut db,
        &mut history,
        &table,
        "number",
        json!({"name": "Weight", "number_decimal_places": 2}),
    )
    .await;
    let view = db.view(table.id, true).await.unwrap();
    for w in [1.25, 3.5] {
        db.insert_row(&view, &obj(json!({"label": "box", "weight": w}))).await.unwrap();
    }
    let table_name = table.database_table_name();
    let column = weight.db_column();

    let (rounded, _) = UpdateFieldActionType::run(
        &mut history,
        &mut db,
        &weight,
        None,
        &obj(json!({"number_decimal_places": 0})),
    )
    .await
    .unwrap();
    assert_eq!(rounded.attr_i64("number_decimal_places"), Some(0));
    assert!(backup_of(&history, last_id(&history)).is_some());
    assert_eq!(cells(&db, &table_name, &column).await, vec![json!(1), json!(4)]);

    history.undo(&mut db, &scope).await.unwrap();
    assert_eq!(cells(&db, &table_name, &column).await, vec![json!(1.25), json!(3.5)]);
    assert_eq!(
        db.get_field(weight.id).await.unwrap().attr_i64("number_decimal_places"),
        Some(2)
    );

    history.redo(&mut db, &scope).await.unwrap();
    assert_eq!(cells(&db, &table_name, &column).await, vec![json!(1), json!(4)]);
}

#[tokio::test]
async fn widening_and_renaming_skip_the_backup() {
    let mut cars = cars().await;
    UpdateFieldActionType::run(
        &mut cars.history,
        &mut cars.db,
        &cars.price,
        None,
        &obj(json!({"number_decimal_places": 3, "name": "Cost"})),
    )
    .await
    .unwrap();
    assert_eq!(backup_of(&cars.history, last_id(&cars.history)), None);
}

/// Cells recomputed from the field's own settings, so nothing needs saving.
#[derive(Debug)]
struct ConstantFieldType;

impl FieldType for ConstantFieldType {
    fn type_name(&self) -> &'static str {
        "constant"
    }

    fn storage(&self, _field: &Field) -> Storage {
        Storage::Column(ColumnSpec::nullable("text"))
    }

    fn compatible_filters(&self) -> &'static [&'static str] {
        &[]
    }

    fn data_is_derived_from_attrs(&self) -> bool {
        true
    }

    fn coerce(&self, _field: &Field, value: &Value) -> Option<Value> {
        Some(value.clone())
    }
}

#[tokio::test]
async fn derived_fields_are_never_backed_up() {
    common::init_tracing();
    let mut registry = FieldTypeRegistry::with_builtin();
    registry.register(Arc::new(ConstantFieldType));
    let mut db = MemoryDatabase::new(registry);
    let mut history = ActionHistory::new(10);
    let table = db.create_table("Derived").await.unwrap();
    create(&mut db, &mut history, &table, "text", json!({"name": "Name"})).await;
    let constant = create(&mut db, &mut history, &table, "constant", json!({"name": "Fixed"})).await;

    let (text, _) = UpdateFieldActionType::run(&mut history, &mut db, &constant, Some("text"), &Map::new())
        .await
        .unwrap();
    assert_eq!(text.type_name, "text");
    assert_eq!(backup_of(&history, last_id(&history)), None);
}

#[tokio::test]
async fn pruned_actions_release_their_backups() {
    let mut cars = cars().await;
    cars.history = ActionHistory::new(2);
    let table_name = cars.table.database_table_name();
    let color = cars.color.id;

    let mut field = cars.color.clone();
    for to in ["number", "text", "number"] {
        field = UpdateFieldActionType::run(&mut cars.history, &mut cars.db, &field, Some(to), &Map::new())
            .await
            .unwrap()
            .0;
    }
    assert_eq!(cars.history.records().len(), 2);
    assert!(!cars.db.has_column(&table_name, &format!("field_{}_backup_1", color)).await);
    assert!(cars.db.has_column(&table_name, &format!("field_{}_backup_2", color)).await);
    assert!(cars.db.has_column(&table_name, &format!("field_{}_backup_3", color)).await);
}

#[tokio::test]
async fn new_action_discards_undone_ones_and_their_backups() {
    let mut cars = cars().await;
    let scope = table_scope(cars.table.id);
    let table_name = cars.table.database_table_name();

    UpdateFieldActionType::run(&mut cars.history, &mut cars.db, &cars.color, Some("number"), &Map::new())
        .await
        .unwrap();
    let action_id = last_id(&cars.history);
    cars.history.undo(&mut cars.db, &scope).await.unwrap();
    let undo_backup = format!("field_{}_backup_{}_undo", cars.color.id, action_id);
    assert!(cars.db.has_column(&table_name, &undo_backup).await);

    UpdateFieldActionType::run(
        &mut cars.history,
        &mut cars.db,
        &cars.name,
        None,
        &obj(json!({"name": "Model"})),
    )
    .await
    .unwrap();
    assert!(cars.history.get(action_id).is_none());
    assert!(!cars.db.has_column(&table_name, &undo_backup).await);
    assert!(cars.history.redo(&mut cars.db, &scope).await.unwrap().is_none());
}

#[tokio::test]
async fn redo_replays_the_most_recently_undone_first() {
    let mut cars = cars().await;
    let scope = table_scope(cars.table.id);
    let (first, _) = UpdateFieldActionType::run(
        &mut cars.history,
        &mut cars.db,
        &cars.color,
        None,
        &obj(json!({"name": "Tint"})),
    )
    .await
    .unwrap();
    UpdateFieldActionType::run(&mut cars.history, &mut cars.db, &first, None, &obj(json!({"name": "Hue"})))
        .await
        .unwrap();

    let id = cars.color.id;
    cars.history.undo(&mut cars.db, &scope).await.unwrap();
    assert_eq!(field_name(&mut cars.db, id).await, "Tint");
    cars.history.undo(&mut cars.db, &scope).await.unwrap();
    assert_eq!(field_name(&mut cars.db, id).await, "Color");
    cars.history.redo(&mut cars.db, &scope).await.unwrap();
    assert_eq!(field_name(&mut cars.db, id).await, "Tint");
    cars.history.redo(&mut cars.db, &scope).await.unwrap();
    assert_eq!(field_name(&mut cars.db, id).await, "Hue");
    assert!(cars.history.redo(&mut cars.db, &scope).await.unwrap().is_none());
}

#[tokio::test]
async fn undo_of_a_trashed_field_is_a_stale_reference() {
    let mut cars = cars().await;
    let scope = table_scope(cars.table.id);
    UpdateFieldActionType::run(&mut cars.history, &mut cars.db, &cars.color, Some("number"), &Map::new())
        .await
        .unwrap();
    let action_id = last_id(&cars.history);
    let current = cars.db.get_field(cars.color.id).await.unwrap();
    cars.db.delete_field(&current).await.unwrap();

    let err = cars.history.undo(&mut cars.db, &scope).await.unwrap_err();
    assert!(matches!(err, AppError::StaleReference { kind: "field", .. }));
    assert_eq!(cars.history.get(action_id).unwrap().state, ActionState::Done);
}

#[tokio::test]
async fn create_and_delete_go_through_the_trash() {
    let mut cars = cars().await;
    let scope = table_scope(cars.table.id);
    let year = create(&mut cars.db, &mut cars.history, &cars.table, "number", json!({"name": "Year"})).await;
    let names = |fields: Vec<Field>| fields.into_iter().map(|f| f.name).collect::<Vec<_>>();

    cars.history.undo(&mut cars.db, &scope).await.unwrap();
    assert!(!names(cars.db.fields(cars.table.id).await.unwrap()).contains(&"Year".to_string()));
    cars.history.redo(&mut cars.db, &scope).await.unwrap();
    assert_eq!(cars.db.get_field(year.id).await.unwrap().name, "Year");

    let colors = cars.column(&cars.color).await;
    DeleteFieldActionType::run(&mut cars.history, &mut cars.db, &cars.color)
        .await
        .unwrap();
    assert!(matches!(
        cars.db.get_field(cars.color.id).await,
        Err(AppError::StaleReference { .. })
    ));
    let record = cars.history.records().last().unwrap();
    assert!(matches!(record.params, ActionParams::DeleteField(_)));

    cars.db
        .create_field(cars.table.id, "text", &obj(json!({"name": "Color"})))
        .await
        .unwrap();
    cars.history.undo(&mut cars.db, &scope).await.unwrap();
    let restored = cars.db.get_field(cars.color.id).await.unwrap();
    assert_eq!(restored.name, "Color (Restored)");
    assert_eq!(cars.column(&restored).await, colors);

    cars.history.redo(&mut cars.db, &scope).await.unwrap();
    assert!(cars.db.get_field(cars.color.id).await.is_err());
}

#[tokio::test]
async fn primary_field_cannot_be_deleted() {
    let mut cars = cars().await;
    let err = DeleteFieldActionType::run(&mut cars.history, &mut cars.db, &cars.name)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(cars.history.records().len(), 4);
}

#[tokio::test]
async fn nothing_to_undo_is_not_an_error() {
    common::init_tracing();
    let mut db = MemoryDatabase::with_builtin_types();
    let mut history = ActionHistory::new(10);
    assert!(history.undo(&mut db, "table1").await.unwrap().is_none());
    assert!(history.redo(&mut db, "table1").await.unwrap().is_none());
}

#[tokio::test]
async fn link_field_type_change_round_trips() {
    use tablekeep::RowReader;

    let mut cars = cars().await;
    let scope = table_scope(cars.table.id);
    let dealers = cars.db.create_table("Dealers").await.unwrap();
    let dealer_view = cars.db.view(dealers.id, true).await.unwrap();
    let mut dealer_ids = Vec::new();
    for _ in 0..2 {
        let row = cars.db.insert_row(&dealer_view, &obj(json!({}))).await.unwrap();
        dealer_ids.push(row["id"].as_i64().unwrap());
    }
    let link = create(
        &mut cars.db,
        &mut cars.history,
        &cars.table,
        "link_row",
        json!({"name": "Dealers", "link_row_table_id": dealers.id}),
    )
    .await;
    let view = cars.view().await;
    cars.db
        .insert_row(&view, &obj(json!({"name": "Tesla", "dealers": dealer_ids.clone()})))
        .await
        .unwrap();
    cars.db
        .insert_row(&view, &obj(json!({"name": "Fiat", "dealers": [dealer_ids[0]]})))
        .await
        .unwrap();
    let through = format!("database_relation_{}", link.id);
    let links = cars.db.relation_rows(&through).await.unwrap();
    assert_eq!(links.len(), 3);

    let (as_text, _) = UpdateFieldActionType::run(&mut cars.history, &mut cars.db, &link, Some("text"), &Map::new())
        .await
        .unwrap();
    let action_id = last_id(&cars.history);
    let relation_backup = format!("field_{}_backup_{}", link.id, action_id);
    assert_eq!(
        backup_of(&cars.history, action_id),
        Some(BackupDescriptor::Relation {
            relation_table: relation_backup.clone()
        })
    );
    assert!(!cars.db.has_table(&through).await);
    assert_eq!(cars.db.relation_rows(&relation_backup).await.unwrap(), links);
    assert!(cars.column(&as_text).await.iter().all(Value::is_null));

    let text_view = cars.view().await;
    let kia = cars
        .db
        .insert_row(&text_view, &obj(json!({"name": "Kia", "dealers": "Corner garage"})))
        .await
        .unwrap();
    let kia = kia["id"].as_i64().unwrap();
    let table_name = cars.table.database_table_name();

    for _ in 0..2 {
        cars.history.undo(&mut cars.db, &scope).await.unwrap();
        let field = cars.db.get_field(link.id).await.unwrap();
        assert_eq!(field.type_name, "link_row");
        assert_eq!(cars.db.relation_rows(&through).await.unwrap(), links);
        assert!(!cars.db.has_table(&relation_backup).await);
        assert!(!cars.db.has_column(&table_name, &link.db_column()).await);
        let undo_backup = format!("field_{}_backup_{}_undo", link.id, action_id);
        assert_eq!(
            backup_of(&cars.history, action_id),
            Some(BackupDescriptor::Column {
                table_id: cars.table.id,
                column_name: undo_backup.clone()
            })
        );
        assert!(cars.db.has_column(&table_name, &undo_backup).await);

        cars.history.redo(&mut cars.db, &scope).await.unwrap();
        let field = cars.db.get_field(link.id).await.unwrap();
        assert_eq!(field.type_name, "text");
        assert!(!cars.db.has_table(&through).await);
        assert!(!cars.db.has_column(&table_name, &undo_backup).await);
        let rows = cars.db.fetch_rows(&cars.view().await, &tablekeep::RowQuery::new()).await.unwrap();
        let kia_row = rows.iter().find(|r| r["id"] == json!(kia)).unwrap();
        assert_eq!(kia_row["dealers"], json!("Corner garage"));
        assert_eq!(cars.db.relation_rows(&relation_backup).await.unwrap(), links);
    }
}
