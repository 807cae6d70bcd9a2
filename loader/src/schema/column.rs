use std::fmt;

use crate::schema::property::{JsonType, SchemaProperty};

/// Length of string columns when the schema does not ask for more.
pub const DEFAULT_VARCHAR_LENGTH: u32 = 10_000;

/// Length of `time` formatted string columns.
pub const SHORT_VARCHAR_LENGTH: u32 = 256;

/// Length of string columns holding serialized objects, arrays or long strings.
pub const LONG_VARCHAR_LENGTH: u32 = 65_535;

/// Warehouse column type derived from a schema property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Varchar(u32),
    Timestamp,
    DoublePrecision,
    BigInt,
    Boolean,
}

impl ColumnType {
    /// Maps a schema property to its column type.
    ///
    /// Objects and arrays win over every other declared type, then `date-time` and `time`
    /// formats, then numbers, then mixed integer and string declarations.
    pub fn for_property(property: &SchemaProperty) -> ColumnType {
        if property.has_type(JsonType::Object) || property.has_type(JsonType::Array) {
            return ColumnType::Varchar(LONG_VARCHAR_LENGTH);
        }

        match property.format() {
            Some("date-time") => return ColumnType::Timestamp,
            Some("time") => return ColumnType::Varchar(SHORT_VARCHAR_LENGTH),
            _ => {}
        }

        if property.has_type(JsonType::Number) {
            ColumnType::DoublePrecision
        } else if property.has_type(JsonType::Integer) && property.has_type(JsonType::String) {
            ColumnType::Varchar(LONG_VARCHAR_LENGTH)
        } else if property.has_type(JsonType::Integer) {
            ColumnType::BigInt
        } else if property.has_type(JsonType::Boolean) {
            ColumnType::Boolean
        } else if property
            .max_length()
            .is_some_and(|max_length| max_length > u64::from(DEFAULT_VARCHAR_LENGTH))
        {
            ColumnType::Varchar(LONG_VARCHAR_LENGTH)
        } else {
            ColumnType::Varchar(DEFAULT_VARCHAR_LENGTH)
        }
    }

    /// Type name as reported by the warehouse catalog, without length.
    pub fn catalog_name(&self) -> &'static str {
        match self {
            ColumnType::Varchar(_) => "character varying",
            ColumnType::Timestamp => "timestamp without time zone",
            ColumnType::DoublePrecision => "double precision",
            ColumnType::BigInt => "bigint",
            ColumnType::Boolean => "boolean",
        }
    }

    /// Returns whether a live column of `catalog_type` must be versioned to hold this type.
    ///
    /// Timezone-aware timestamp columns are kept as they are when a plain timestamp is desired.
    pub fn requires_versioning(&self, catalog_type: &str) -> bool {
        let catalog_type = catalog_type.to_lowercase();
        if catalog_type == self.catalog_name() {
            return false;
        }

        let timezone_aware =
            catalog_type.starts_with("timestamp with time zone") || catalog_type == "timestamptz";

        !(*self == ColumnType::Timestamp && timezone_aware)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Varchar(length) => write!(f, "character varying({length})"),
            other => f.write_str(other.catalog_name()),
        }
    }
}
