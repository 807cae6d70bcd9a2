//! Stream schemas: property shapes, flattening into columns, and column types.

mod column;
pub mod flatten;
pub mod metadata;
mod property;

pub use column::{
    ColumnType, DEFAULT_VARCHAR_LENGTH, LONG_VARCHAR_LENGTH, SHORT_VARCHAR_LENGTH,
};
pub use flatten::{FlattenedSchema, flatten_key, flatten_record, flatten_schema};
pub use property::{JsonType, JsonTypes, SchemaProperty, parse_properties};
