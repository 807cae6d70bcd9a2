use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::sync::Arc;

use bzip2::read::BzDecoder;
use config::shared::Compression;
use flate2::read::GzDecoder;
use futures::TryStreamExt;
use object_store::ObjectStore;
use object_store::path::Path;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::error::{ErrorKind, LoadResult};
use crate::warehouse::{CatalogColumn, CopySource, Statement, TableName, WarehouseClient};
use crate::{bail, load_error};

/// Table held by [`MemoryWarehouse`]. Column names are lowercase.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryTable {
    /// Column names with their catalog type, in creation order.
    pub columns: Vec<(String, String)>,
    pub primary_key: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
}

impl MemoryTable {
    pub fn column_type(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, data_type)| data_type.as_str())
    }

    /// Returns the row whose `column` equals `value`.
    pub fn row_by(&self, column: &str, value: &Value) -> Option<&Map<String, Value>> {
        self.rows.iter().find(|row| row.get(column) == Some(value))
    }
}

#[derive(Debug, Clone, Default)]
struct Catalog {
    schemas: BTreeSet<String>,
    tables: BTreeMap<(String, String), MemoryTable>,
}

#[derive(Debug, Default)]
struct Inner {
    catalog: Catalog,
    statements: Vec<Statement>,
    failing_fragments: Vec<String>,
}

/// In-memory warehouse for tests.
///
/// Interprets every [`Statement`] against an in-memory catalog: schemas, tables, columns and rows.
/// `COPY` statements read the staged objects from the object store given to
/// [`MemoryWarehouse::with_store`]. Transactions are all or nothing.
#[derive(Debug, Clone, Default)]
pub struct MemoryWarehouse {
    inner: Arc<Mutex<Inner>>,
    store: Option<Arc<dyn ObjectStore>>,
}

impl MemoryWarehouse {
    pub fn new() -> MemoryWarehouse {
        MemoryWarehouse::default()
    }

    /// Creates a warehouse that reads staged objects from `store`.
    pub fn with_store(store: Arc<dyn ObjectStore>) -> MemoryWarehouse {
        MemoryWarehouse {
            inner: Arc::default(),
            store: Some(store),
        }
    }

    /// Creates a table directly in the catalog, together with its schema.
    pub async fn add_table(
        &self,
        schema: &str,
        table: &str,
        columns: &[(&str, &str)],
        primary_key: &[&str],
    ) {
        let mut inner = self.inner.lock().await;
        inner.catalog.schemas.insert(schema.to_lowercase());
        inner.catalog.tables.insert(
            (schema.to_lowercase(), table.to_lowercase()),
            MemoryTable {
                columns: columns
                    .iter()
                    .map(|(name, data_type)| (name.to_lowercase(), data_type.to_string()))
                    .collect(),
                primary_key: primary_key.iter().map(|key| key.to_lowercase()).collect(),
                rows: Vec::new(),
            },
        );
    }

    /// Makes every statement whose logged SQL contains `fragment` fail.
    pub async fn fail_statements_containing(&self, fragment: &str) {
        let mut inner = self.inner.lock().await;
        inner.failing_fragments.push(fragment.to_string());
    }

    /// Returns the statements executed successfully, in order.
    pub async fn statements(&self) -> Vec<Statement> {
        self.inner.lock().await.statements.clone()
    }

    /// Returns the logged SQL of the statements executed successfully, in order.
    pub async fn executed_sql(&self) -> Vec<String> {
        self.inner
            .lock()
            .await
            .statements
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    pub async fn clear_statements(&self) {
        self.inner.lock().await.statements.clear();
    }

    pub async fn schemas(&self) -> Vec<String> {
        self.inner
            .lock()
            .await
            .catalog
            .schemas
            .iter()
            .cloned()
            .collect()
    }

    pub async fn table(&self, schema: &str, table: &str) -> Option<MemoryTable> {
        self.inner
            .lock()
            .await
            .catalog
            .tables
            .get(&(schema.to_lowercase(), table.to_lowercase()))
            .cloned()
    }

    /// Reads the rows a `COPY` statement loads. Other statements load nothing.
    async fn copied_rows(
        &self,
        statement: &Statement,
    ) -> LoadResult<Option<Vec<Map<String, Value>>>> {
        let Statement::Copy {
            columns, source, ..
        } = statement
        else {
            return Ok(None);
        };

        let Some(store) = &self.store else {
            bail!(
                ErrorKind::InvalidState,
                "Memory warehouse has no object store to copy from"
            );
        };

        let directory = source
            .key_prefix
            .rsplit_once('/')
            .map(|(directory, _)| Path::from(directory));
        let mut objects: Vec<_> = store.list(directory.as_ref()).try_collect().await?;
        objects.retain(|object| object.location.as_ref().starts_with(&source.key_prefix));
        objects.sort_by(|a, b| a.location.cmp(&b.location));

        if objects.is_empty() {
            bail!(
                ErrorKind::WarehouseQueryFailed,
                "The specified S3 prefix does not exist",
                source.key_prefix.clone()
            );
        }

        let mut rows = Vec::new();
        for object in objects {
            let bytes = store.get(&object.location).await?.bytes().await?;
            let text = decompress(&bytes, source)?;
            for line in text.lines() {
                rows.push(parse_line(line, columns)?);
            }
        }

        Ok(Some(rows))
    }

    async fn check_failure(&self, statement: &Statement) -> LoadResult<()> {
        let sql = statement.to_string();
        let inner = self.inner.lock().await;
        if inner
            .failing_fragments
            .iter()
            .any(|fragment| sql.contains(fragment))
        {
            bail!(ErrorKind::WarehouseQueryFailed, "Warehouse query failed", sql);
        }

        Ok(())
    }
}

fn decompress(bytes: &[u8], source: &CopySource) -> LoadResult<String> {
    let mut text = String::new();
    match source.compression {
        None => text = String::from_utf8_lossy(bytes).into_owned(),
        Some(Compression::Gzip) => {
            GzDecoder::new(bytes).read_to_string(&mut text)?;
        }
        Some(Compression::Bzip2) => {
            BzDecoder::new(bytes).read_to_string(&mut text)?;
        }
    }

    Ok(text)
}

/// Parses a delimited line of JSON encoded fields. Empty fields are null.
fn parse_line(line: &str, columns: &[String]) -> LoadResult<Map<String, Value>> {
    let mut values = Vec::new();
    let mut rest = line;

    loop {
        if rest.is_empty() {
            values.push(Value::Null);
            break;
        }
        if let Some(after) = rest.strip_prefix(',') {
            values.push(Value::Null);
            rest = after;
            continue;
        }

        let mut fields = serde_json::Deserializer::from_str(rest).into_iter::<Value>();
        let value = match fields.next() {
            Some(Ok(value)) => value,
            _ => bail!(
                ErrorKind::WarehouseQueryFailed,
                "Invalid delimited field",
                line
            ),
        };
        values.push(value);
        rest = &rest[fields.byte_offset()..];

        match rest.strip_prefix(',') {
            Some(after) if after.is_empty() => {
                values.push(Value::Null);
                break;
            }
            Some(after) => rest = after,
            None if rest.is_empty() => break,
            None => bail!(
                ErrorKind::WarehouseQueryFailed,
                "Invalid delimited field",
                line
            ),
        }
    }

    if values.len() != columns.len() {
        bail!(
            ErrorKind::WarehouseQueryFailed,
            "Delimited line does not match the column list",
            format!("expected {} fields: {line}", columns.len())
        );
    }

    Ok(columns
        .iter()
        .map(|column| column.to_lowercase())
        .zip(values)
        .collect())
}

fn table_key(table: &TableName) -> (String, String) {
    (table.schema.to_lowercase(), table.table.to_lowercase())
}

fn lowercase(names: &[String]) -> Vec<String> {
    names.iter().map(|name| name.to_lowercase()).collect()
}

fn key_of(row: &Map<String, Value>, primary_key: &[String]) -> Vec<Value> {
    primary_key
        .iter()
        .map(|column| row.get(column).cloned().unwrap_or(Value::Null))
        .collect()
}

impl Catalog {
    fn table_mut(&mut self, table: &TableName) -> LoadResult<&mut MemoryTable> {
        match self.tables.get_mut(&table_key(table)) {
            Some(memory_table) => Ok(memory_table),
            None => Err(load_error!(
                ErrorKind::WarehouseQueryFailed,
                "Relation does not exist",
                table.to_string()
            )),
        }
    }

    fn rows(&self, table: &TableName) -> LoadResult<Vec<Map<String, Value>>> {
        match self.tables.get(&table_key(table)) {
            Some(memory_table) => Ok(memory_table.rows.clone()),
            None => Err(load_error!(
                ErrorKind::WarehouseQueryFailed,
                "Relation does not exist",
                table.to_string()
            )),
        }
    }

    fn apply(
        &mut self,
        statement: &Statement,
        copied: Option<Vec<Map<String, Value>>>,
    ) -> LoadResult<u64> {
        match statement {
            Statement::CreateSchema { schema } => {
                self.schemas.insert(schema.to_lowercase());
                Ok(0)
            }
            Statement::GrantUsage { schema, .. } | Statement::GrantSelect { schema, .. } => {
                if !self.schemas.contains(&schema.to_lowercase()) {
                    bail!(
                        ErrorKind::WarehouseQueryFailed,
                        "Schema does not exist",
                        schema.clone()
                    );
                }
                Ok(0)
            }
            Statement::CreateTable {
                table,
                columns,
                primary_key,
            } => {
                if !self.schemas.contains(&table.schema.to_lowercase()) {
                    bail!(
                        ErrorKind::WarehouseQueryFailed,
                        "Schema does not exist",
                        table.schema.clone()
                    );
                }

                self.tables
                    .entry(table_key(table))
                    .or_insert_with(|| MemoryTable {
                        columns: columns
                            .iter()
                            .map(|column| {
                                (
                                    column.name.to_lowercase(),
                                    column.column_type.catalog_name().to_string(),
                                )
                            })
                            .collect(),
                        primary_key: lowercase(primary_key),
                        rows: Vec::new(),
                    });
                Ok(0)
            }
            Statement::DropTable { table } => {
                self.tables.remove(&table_key(table));
                Ok(0)
            }
            Statement::AddColumn { table, column } => {
                let memory_table = self.table_mut(table)?;
                let name = column.name.to_lowercase();
                if memory_table.column_type(&name).is_some() {
                    bail!(
                        ErrorKind::WarehouseQueryFailed,
                        "Column already exists",
                        name
                    );
                }

                memory_table
                    .columns
                    .push((name.clone(), column.column_type.catalog_name().to_string()));
                for row in &mut memory_table.rows {
                    row.insert(name.clone(), Value::Null);
                }
                Ok(0)
            }
            Statement::RenameColumn { table, from, to } => {
                let memory_table = self.table_mut(table)?;
                let (from, to) = (from.to_lowercase(), to.to_lowercase());
                let Some(column) = memory_table
                    .columns
                    .iter_mut()
                    .find(|(name, _)| *name == from)
                else {
                    bail!(ErrorKind::WarehouseQueryFailed, "Column does not exist", from);
                };

                column.0 = to.clone();
                for row in &mut memory_table.rows {
                    if let Some(value) = row.remove(&from) {
                        row.insert(to.clone(), value);
                    }
                }
                Ok(0)
            }
            Statement::Copy { table, .. } => {
                let rows = copied.unwrap_or_default();
                let memory_table = self.table_mut(table)?;
                let loaded = rows.len() as u64;
                memory_table.rows.extend(rows);
                Ok(loaded)
            }
            Statement::MergeUpdate {
                target,
                stage,
                columns,
                primary_key,
            } => {
                let stage_rows = self.rows(stage)?;
                let (columns, primary_key) = (lowercase(columns), lowercase(primary_key));
                let memory_table = self.table_mut(target)?;

                let mut updated = 0;
                for row in &mut memory_table.rows {
                    let key = key_of(row, &primary_key);
                    if let Some(stage_row) = stage_rows
                        .iter()
                        .rev()
                        .find(|stage_row| key_of(stage_row, &primary_key) == key)
                    {
                        for column in &columns {
                            let value = stage_row.get(column).cloned().unwrap_or(Value::Null);
                            row.insert(column.clone(), value);
                        }
                        updated += 1;
                    }
                }
                Ok(updated)
            }
            Statement::MergeInsert {
                target,
                stage,
                columns,
                primary_key,
            } => {
                let stage_rows = self.rows(stage)?;
                let (columns, primary_key) = (lowercase(columns), lowercase(primary_key));
                let memory_table = self.table_mut(target)?;

                let existing: Vec<Vec<Value>> = memory_table
                    .rows
                    .iter()
                    .map(|row| key_of(row, &primary_key))
                    .collect();
                let mut inserted = 0;
                for stage_row in stage_rows {
                    if existing.contains(&key_of(&stage_row, &primary_key)) {
                        continue;
                    }
                    let row = project(&stage_row, &columns, memory_table);
                    memory_table.rows.push(row);
                    inserted += 1;
                }
                Ok(inserted)
            }
            Statement::Insert {
                target,
                stage,
                columns,
            } => {
                let stage_rows = self.rows(stage)?;
                let columns = lowercase(columns);
                let memory_table = self.table_mut(target)?;

                let inserted = stage_rows.len() as u64;
                for stage_row in stage_rows {
                    let row = project(&stage_row, &columns, memory_table);
                    memory_table.rows.push(row);
                }
                Ok(inserted)
            }
            Statement::DeleteSoftDeleted { table } => {
                let memory_table = self.table_mut(table)?;
                let before = memory_table.rows.len();
                memory_table.rows.retain(|row| {
                    row.get(crate::schema::metadata::DELETED_AT_COLUMN)
                        .is_none_or(Value::is_null)
                });
                Ok((before - memory_table.rows.len()) as u64)
            }
        }
    }
}

/// Builds a target row holding `columns` from `row` and null for every other column.
fn project(
    row: &Map<String, Value>,
    columns: &[String],
    table: &MemoryTable,
) -> Map<String, Value> {
    table
        .columns
        .iter()
        .map(|(name, _)| {
            let value = if columns.contains(name) {
                row.get(name).cloned().unwrap_or(Value::Null)
            } else {
                Value::Null
            };
            (name.clone(), value)
        })
        .collect()
}

impl WarehouseClient for MemoryWarehouse {
    async fn execute(&self, statement: &Statement) -> LoadResult<u64> {
        self.check_failure(statement).await?;
        let copied = self.copied_rows(statement).await?;

        let mut inner = self.inner.lock().await;
        let affected = inner.catalog.apply(statement, copied)?;
        inner.statements.push(statement.clone());

        Ok(affected)
    }

    async fn execute_in_transaction(&self, statements: &[Statement]) -> LoadResult<Vec<u64>> {
        let mut copied = Vec::with_capacity(statements.len());
        for statement in statements {
            self.check_failure(statement).await?;
            copied.push(self.copied_rows(statement).await?);
        }

        let mut inner = self.inner.lock().await;
        let mut catalog = inner.catalog.clone();
        let mut affected = Vec::with_capacity(statements.len());
        for (statement, copied) in statements.iter().zip(copied) {
            affected.push(catalog.apply(statement, copied)?);
        }

        inner.catalog = catalog;
        inner.statements.extend(statements.iter().cloned());

        Ok(affected)
    }

    async fn fetch_schemas(&self, schemas: &[String]) -> LoadResult<Vec<String>> {
        let inner = self.inner.lock().await;

        Ok(lowercase(schemas)
            .into_iter()
            .filter(|schema| inner.catalog.schemas.contains(schema))
            .collect())
    }

    async fn fetch_tables(&self, schema: &str) -> LoadResult<Vec<String>> {
        let schema = schema.to_lowercase();
        let inner = self.inner.lock().await;

        Ok(inner
            .catalog
            .tables
            .keys()
            .filter(|(table_schema, _)| *table_schema == schema)
            .map(|(_, table)| table.clone())
            .collect())
    }

    async fn fetch_columns(
        &self,
        schemas: &[String],
        table: Option<&str>,
    ) -> LoadResult<Vec<CatalogColumn>> {
        let schemas = lowercase(schemas);
        let table = table.map(str::to_lowercase);
        let inner = self.inner.lock().await;

        Ok(inner
            .catalog
            .tables
            .iter()
            .filter(|((schema, name), _)| {
                schemas.contains(schema) && table.as_ref().is_none_or(|table| table == name)
            })
            .flat_map(|((schema, name), memory_table)| {
                memory_table
                    .columns
                    .iter()
                    .map(|(column_name, data_type)| CatalogColumn {
                        table_schema: schema.clone(),
                        table_name: name.clone(),
                        column_name: column_name.clone(),
                        data_type: data_type.clone(),
                    })
            })
            .collect())
    }
}
