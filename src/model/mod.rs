//! Dynamic model: query-time schema built from a table's live fields.

pub mod builder;
pub mod view;

pub use builder::{build_view, FieldSelection, ModelBuilder};
pub use view::{check_row_values, AttributeMode, ColumnView, TableSchemaView, SYSTEM_ATTRIBUTES};
