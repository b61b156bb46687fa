pub mod builtin;
pub mod field_types;
pub mod filters;
pub mod types;

pub use field_types::*;
pub use filters::{FilterTypeRegistry, ViewFilterType};
pub use types::*;
