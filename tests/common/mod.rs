#![allow(dead_code)]

use serde_json::{json, Map, Value};
use tablekeep::{ActionHistory, CreateFieldActionType, Field, MemoryDatabase, Table, TableSchemaView};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tablekeep=debug")))
        .with_test_writer()
        .try_init();
}

pub fn obj(v: Value) -> Map<String, Value> {
    v.as_object().cloned().expect("object literal")
}

pub struct Cars {
    pub db: MemoryDatabase,
    pub history: ActionHistory,
    pub table: Table,
    pub name: Field,
    pub color: Field,
    pub price: Field,
    pub description: Field,
    pub rows: Vec<i64>,
}

impl Cars {
    pub async fn view(&self) -> TableSchemaView {
        self.db.view(self.table.id, true).await.unwrap()
    }

    pub async fn ids(&self, query: &tablekeep::RowQuery) -> Vec<i64> {
        use tablekeep::RowReader;
        let view = self.view().await;
        self.db
            .fetch_rows(&view, query)
            .await
            .unwrap()
            .iter()
            .map(|r| r["id"].as_i64().unwrap())
            .collect()
    }

    pub async fn column(&self, field: &Field) -> Vec<Value> {
        self.db
            .column_values(&self.table.database_table_name(), &field.db_column())
            .await
            .unwrap()
            .into_values()
            .collect()
    }
}

pub async fn create(
    db: &mut MemoryDatabase,
    history: &mut ActionHistory,
    table: &Table,
    type_name: &str,
    attrs: Value,
) -> Field {
    CreateFieldActionType::run(history, db, table.id, type_name, &obj(attrs))
        .await
        .unwrap()
}

/// Cars table with Name, Color, Price and Description and four rows.
pub async fn cars() -> Cars {
    init_tracing();
    let mut db = MemoryDatabase::with_builtin_types();
    let mut history = ActionHistory::new(100);
    let table = db.create_table("Cars").await.unwrap();
    let name = create(&mut db, &mut history, &table, "text", json!({"name": "Name"})).await;
    let color = create(&mut db, &mut history, &table, "text", json!({"name": "Color"})).await;
    let price = create(&mut db, &mut history, &table, "number", json!({"name": "Price"})).await;
    let description = create(&mut db, &mut history, &table, "long_text", json!({"name": "Description"})).await;

    let view = db.view(table.id, true).await.unwrap();
    let mut rows = Vec::new();
    for (n, c, p, d) in [
        ("BMW", "Blue", 10000, "This is the fastest car there is."),
        ("Audi", "Orange", 20000, "This is the most expensive car we have."),
        ("Volkswagen", "White", 5000, "The oldest car that we have."),
        ("Volkswagen", "Green", 4000, ""),
    ] {
        let row = db
            .insert_row(
                &view,
                &obj(json!({"name": n, "color": c, "price": p, "description": d})),
            )
            .await
            .unwrap();
        rows.push(row["id"].as_i64().unwrap());
    }

    Cars {
        db,
        history,
        table,
        name,
        color,
        price,
        description,
        rows,
    }
}
