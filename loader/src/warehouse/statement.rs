use std::fmt;

use config::shared::{Compression, Grantee};
use pg_escape::quote_literal;

use crate::schema::ColumnType;
use crate::schema::metadata::DELETED_AT_COLUMN;
use crate::warehouse::credentials::CopyCredentials;
use crate::warehouse::naming::{TableName, quote_column};

/// Bulk-load options used when none are configured.
pub const DEFAULT_COPY_OPTIONS: &str = "EMPTYASNULL BLANKSASNULL TRIMBLANKS TRUNCATECOLUMNS \
                                        TIMEFORMAT 'auto' COMPUPDATE OFF STATUPDATE OFF";

/// Name and type of a column to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    pub column_type: ColumnType,
}

impl fmt::Display for ColumnDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", quote_column(&self.name), self.column_type)
    }
}

/// Source of a `COPY` statement.
#[derive(Debug, Clone)]
pub struct CopySource {
    pub bucket: String,
    /// Common prefix of the staged objects.
    pub key_prefix: String,
    pub credentials: CopyCredentials,
    /// Raw options replacing [`DEFAULT_COPY_OPTIONS`].
    pub copy_options: Option<String>,
    pub compression: Option<Compression>,
}

/// Statements the loader issues against the warehouse.
///
/// [`Statement::to_sql`] renders the exact SQL sent to the cluster. The [`fmt::Display`] rendering
/// is identical except for credentials, which are redacted so statements can be logged.
#[derive(Debug, Clone)]
pub enum Statement {
    CreateSchema {
        schema: String,
    },
    GrantUsage {
        schema: String,
        grantee: Grantee,
    },
    GrantSelect {
        schema: String,
        grantee: Grantee,
    },
    CreateTable {
        table: TableName,
        columns: Vec<ColumnDefinition>,
        primary_key: Vec<String>,
    },
    DropTable {
        table: TableName,
    },
    AddColumn {
        table: TableName,
        column: ColumnDefinition,
    },
    RenameColumn {
        table: TableName,
        from: String,
        to: String,
    },
    Copy {
        table: TableName,
        columns: Vec<String>,
        source: CopySource,
    },
    /// Updates rows of `target` whose key exists in `stage`.
    MergeUpdate {
        target: TableName,
        stage: TableName,
        columns: Vec<String>,
        primary_key: Vec<String>,
    },
    /// Inserts rows of `stage` whose key does not exist in `target`.
    MergeInsert {
        target: TableName,
        stage: TableName,
        columns: Vec<String>,
        primary_key: Vec<String>,
    },
    /// Inserts every row of `stage`.
    Insert {
        target: TableName,
        stage: TableName,
        columns: Vec<String>,
    },
    DeleteSoftDeleted {
        table: TableName,
    },
}

impl Statement {
    /// Renders the statement, secrets included.
    pub fn to_sql(&self) -> String {
        self.render(false)
    }

    /// Returns the table the statement changes, if any.
    pub fn table(&self) -> Option<&TableName> {
        match self {
            Statement::CreateSchema { .. }
            | Statement::GrantUsage { .. }
            | Statement::GrantSelect { .. } => None,
            Statement::CreateTable { table, .. }
            | Statement::DropTable { table }
            | Statement::AddColumn { table, .. }
            | Statement::RenameColumn { table, .. }
            | Statement::Copy { table, .. }
            | Statement::DeleteSoftDeleted { table } => Some(table),
            Statement::MergeUpdate { target, .. }
            | Statement::MergeInsert { target, .. }
            | Statement::Insert { target, .. } => Some(target),
        }
    }

    fn render(&self, redact: bool) -> String {
        match self {
            Statement::CreateSchema { schema } => format!("CREATE SCHEMA IF NOT EXISTS {schema}"),
            Statement::GrantUsage { schema, grantee } => {
                format!("GRANT USAGE ON SCHEMA {schema} TO {}", grantee_sql(grantee))
            }
            Statement::GrantSelect { schema, grantee } => format!(
                "GRANT SELECT ON ALL TABLES IN SCHEMA {schema} TO {}",
                grantee_sql(grantee)
            ),
            Statement::CreateTable {
                table,
                columns,
                primary_key,
            } => {
                let mut clauses: Vec<String> = columns.iter().map(ToString::to_string).collect();
                if !primary_key.is_empty() {
                    clauses.push(format!("PRIMARY KEY ({})", quote_columns(primary_key, None)));
                }

                format!("CREATE TABLE IF NOT EXISTS {table} ({})", clauses.join(", "))
            }
            Statement::DropTable { table } => format!("DROP TABLE IF EXISTS {table}"),
            Statement::AddColumn { table, column } => {
                format!("ALTER TABLE {table} ADD COLUMN {column}")
            }
            Statement::RenameColumn { table, from, to } => format!(
                "ALTER TABLE {table} RENAME COLUMN {} TO {}",
                quote_column(from),
                quote_column(to)
            ),
            Statement::Copy {
                table,
                columns,
                source,
            } => {
                let location = format!("s3://{}/{}", source.bucket, source.key_prefix);
                let compression = source
                    .compression
                    .map(|compression| format!(" {}", compression.copy_keyword()))
                    .unwrap_or_default();

                format!(
                    "COPY {table} ({}) FROM {} {} {} DELIMITER ',' REMOVEQUOTES ESCAPE{compression}",
                    quote_columns(columns, None),
                    quote_literal(&location),
                    source.credentials.to_sql(redact),
                    source.copy_options.as_deref().unwrap_or(DEFAULT_COPY_OPTIONS),
                )
            }
            Statement::MergeUpdate {
                target,
                stage,
                columns,
                primary_key,
            } => {
                let assignments: Vec<String> = columns
                    .iter()
                    .map(|column| {
                        let column = quote_column(column);
                        format!("{column} = s.{column}")
                    })
                    .collect();

                format!(
                    "UPDATE {target} SET {} FROM {stage} s WHERE {}",
                    assignments.join(", "),
                    merge_condition(target, primary_key)
                )
            }
            Statement::MergeInsert {
                target,
                stage,
                columns,
                primary_key,
            } => {
                let missing: Vec<String> = primary_key
                    .iter()
                    .map(|column| format!("{target}.{} IS NULL", quote_column(column)))
                    .collect();

                format!(
                    "INSERT INTO {target} ({}) SELECT {} FROM {stage} s LEFT JOIN {target} ON {} WHERE {}",
                    quote_columns(columns, None),
                    quote_columns(columns, Some("s")),
                    merge_condition(target, primary_key),
                    missing.join(" AND ")
                )
            }
            Statement::Insert {
                target,
                stage,
                columns,
            } => format!(
                "INSERT INTO {target} ({}) SELECT {} FROM {stage} s",
                quote_columns(columns, None),
                quote_columns(columns, Some("s"))
            ),
            Statement::DeleteSoftDeleted { table } => format!(
                "DELETE FROM {table} WHERE {DELETED_AT_COLUMN} IS NOT NULL"
            ),
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(true))
    }
}

fn grantee_sql(grantee: &Grantee) -> String {
    if grantee.is_group {
        format!("GROUP {}", grantee.name)
    } else {
        grantee.name.clone()
    }
}

fn quote_columns(columns: &[String], alias: Option<&str>) -> String {
    columns
        .iter()
        .map(|column| match alias {
            Some(alias) => format!("{alias}.{}", quote_column(column)),
            None => quote_column(column),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn merge_condition(target: &TableName, primary_key: &[String]) -> String {
    primary_key
        .iter()
        .map(|column| {
            let column = quote_column(column);
            format!("{target}.{column} = s.{column}")
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}
