use std::fmt;

/// Separator between the parts of a stream name.
const STREAM_NAME_SEPARATOR: char = '-';

/// Prefix of staging tables.
const STAGE_TABLE_PREFIX: &str = "stg_";

/// Parts of a stream name.
///
/// `schema-table` names a source schema and a table, `catalog-schema-table...` additionally names
/// a catalog and joins every remaining part with `_` into the table name. Any other stream name is
/// used as the table name as is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamName {
    pub catalog_name: Option<String>,
    pub schema_name: Option<String>,
    pub table_name: String,
}

impl StreamName {
    pub fn parse(stream: &str) -> StreamName {
        let parts: Vec<&str> = stream.split(STREAM_NAME_SEPARATOR).collect();

        match parts.as_slice() {
            [schema, table] => StreamName {
                catalog_name: None,
                schema_name: Some(schema.to_string()),
                table_name: table.to_string(),
            },
            [catalog, schema, rest @ ..] if !rest.is_empty() => StreamName {
                catalog_name: Some(catalog.to_string()),
                schema_name: Some(schema.to_string()),
                table_name: rest.join("_"),
            },
            _ => StreamName {
                catalog_name: None,
                schema_name: None,
                table_name: stream.to_string(),
            },
        }
    }
}

/// Fully qualified name of a warehouse table.
///
/// The table part is kept lowercase and rendered upper-cased between double quotes, as
/// `schema."TABLE"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    pub schema: String,
    pub table: String,
}

impl TableName {
    /// Returns the target table of `stream` inside `schema`.
    pub fn for_stream(schema: &str, stream: &str) -> TableName {
        let table = StreamName::parse(stream)
            .table_name
            .replace(['.', '-'], "_")
            .to_lowercase();

        TableName {
            schema: schema.to_string(),
            table,
        }
    }

    /// Returns the staging table paired with this table.
    pub fn stage(&self) -> TableName {
        TableName {
            schema: self.schema.clone(),
            table: format!("{STAGE_TABLE_PREFIX}{}", self.table),
        }
    }

    /// Returns the quoted table name without the schema.
    fn quoted_table(&self) -> String {
        quote_column(&self.table)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.quoted_table())
    }
}

/// Quotes a column name, upper-casing it.
pub fn quote_column(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\"").to_uppercase())
}
