//! Safe SQL builder: identifiers from the catalog only, values as parameters.

mod builder;
pub mod ddl;
pub mod params;
pub use builder::*;
pub use params::*;
