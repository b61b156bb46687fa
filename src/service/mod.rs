//! RowService: runs row queries built from the generic query operations.

mod rows;
pub use rows::{RowListParams, RowService};
