//! Tablekeep: generic queries over user-defined tables and reversible field schema changes.

pub mod actions;
pub mod backup;
pub mod catalog;
pub mod error;
pub mod handler;
pub mod model;
pub mod query;
pub mod service;
pub mod settings;
pub mod sql;
pub mod store;

pub use actions::{
    table_scope, ActionHistory, ActionParams, ActionRecord, ActionState, CreateFieldActionType,
    DeleteFieldActionType, UpdateFieldActionType,
};
pub use backup::{BackupDescriptor, FieldDataBackupHandler};
pub use catalog::{Field, FieldType, FieldTypeRegistry, FilterTypeRegistry, Table, TrashKind};
pub use error::{AppError, QueryError};
pub use handler::{FieldHandler, FieldSchemaChange, TrashHandler};
pub use model::{build_view, FieldSelection, ModelBuilder, TableSchemaView};
pub use query::{Condition, RowQuery};
pub use service::{RowListParams, RowService};
pub use settings::Settings;
pub use store::{MemoryDatabase, PgSchemaStore, RowReader, SchemaStore};
