use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use config::shared::{Compression, Grantee, TargetConfig};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::{ErrorKind, LoadResult};
use crate::message::SchemaMessage;
use crate::schema::{ColumnType, FlattenedSchema, flatten_record, flatten_schema};
use crate::warehouse::base::{CatalogColumn, WarehouseClient};
use crate::warehouse::cache::TableCache;
use crate::warehouse::credentials::CopyCredentials;
use crate::warehouse::naming::{StreamName, TableName};
use crate::warehouse::statement::{ColumnDefinition, CopySource, Statement};
use crate::{bail, load_error};

/// Format of the suffix appended to versioned columns.
const VERSIONED_COLUMN_SUFFIX_FORMAT: &str = "%Y%m%d_%H%M";

/// Separator between the values of a composite primary key.
const KEY_VALUE_SEPARATOR: &str = ",";

/// Run-wide settings of the bulk load, shared by every stream.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub bucket: String,
    pub credentials: CopyCredentials,
    pub copy_options: Option<String>,
    pub compression: Option<Compression>,
    pub skip_updates: bool,
}

impl LoadOptions {
    /// Builds the load options from the configuration, resolving the copy credentials.
    pub fn from_config(config: &TargetConfig) -> LoadResult<LoadOptions> {
        let Some(bucket) = config.storage.s3_bucket.clone() else {
            bail!(
                ErrorKind::ConfigError,
                "Required key is missing from config",
                "s3_bucket"
            );
        };

        Ok(LoadOptions {
            bucket,
            credentials: CopyCredentials::from_config(&config.storage)?,
            copy_options: config
                .copy_options
                .clone()
                .filter(|options| !options.trim().is_empty()),
            compression: config.compression,
            skip_updates: config.skip_updates,
        })
    }
}

/// Row counts reported by a batch load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub inserts: u64,
    pub updates: u64,
}

/// Keeps one stream's target table in line with the stream's schema and loads its batches.
///
/// An instance is bound to one schema message. A new schema message for the stream replaces it.
#[derive(Debug, Clone)]
pub struct StreamSync<C> {
    client: C,
    cache: Option<TableCache>,
    options: Arc<LoadOptions>,
    stream: String,
    table: TableName,
    grantees: Vec<Grantee>,
    key_properties: Vec<String>,
    flattened_schema: FlattenedSchema,
    max_level: usize,
}

impl<C> StreamSync<C>
where
    C: WarehouseClient,
{
    /// Binds a sync engine to `message`.
    ///
    /// The target schema is resolved from the stream name through `schema_mapping`, falling back
    /// to `default_target_schema`. Fails when no target schema applies or when the schema
    /// flattens into duplicate column names.
    pub fn new(
        client: C,
        cache: Option<TableCache>,
        options: Arc<LoadOptions>,
        config: &TargetConfig,
        message: &SchemaMessage,
    ) -> LoadResult<StreamSync<C>> {
        let stream_name = StreamName::parse(&message.stream);
        let source_schema = stream_name.schema_name.as_deref();

        let Some(target_schema) = config.target_schema_for(source_schema) else {
            bail!(
                ErrorKind::TargetSchemaMissing,
                "Target schema name not defined in config",
                format!(
                    "Neither 'default_target_schema' (string) nor 'schema_mapping' (object) defines \
                     target table for '{}' stream.",
                    message.stream
                )
            );
        };

        let max_level = config.data_flattening_max_level;
        let flattened_schema = flatten_schema(&message.schema, max_level)?;

        Ok(StreamSync {
            client,
            cache,
            options,
            stream: message.stream.clone(),
            table: TableName::for_stream(target_schema, &message.stream),
            grantees: config.grantees_for(source_schema),
            key_properties: message.key_properties.clone().unwrap_or_default(),
            flattened_schema,
            max_level,
        })
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    pub fn flattened_schema(&self) -> &FlattenedSchema {
        &self.flattened_schema
    }

    pub fn key_properties(&self) -> &[String] {
        &self.key_properties
    }

    /// Flattens a record into this stream's columns.
    pub fn flatten_record(&self, record: &Map<String, Value>) -> Map<String, Value> {
        flatten_record(record, Some(&self.flattened_schema), self.max_level)
    }

    /// Returns the primary key of a flattened record, or [`None`] when the stream has no key
    /// properties.
    ///
    /// String values are used as they are and other values as their JSON text. The values of a
    /// composite key are joined with `,`.
    pub fn record_key_string(&self, record: &Map<String, Value>) -> LoadResult<Option<String>> {
        if self.key_properties.is_empty() {
            return Ok(None);
        }

        let mut values = Vec::with_capacity(self.key_properties.len());
        for key in &self.key_properties {
            match record.get(key) {
                Some(Value::String(value)) => values.push(value.clone()),
                Some(value) => values.push(value.to_string()),
                None => bail!(
                    ErrorKind::MissingPrimaryKeyValue,
                    "Cannot find primary key in record",
                    format!(
                        "stream '{}', key properties {:?}, record {}",
                        self.stream,
                        self.key_properties,
                        Value::Object(record.clone())
                    )
                ),
            }
        }

        Ok(Some(values.join(KEY_VALUE_SEPARATOR)))
    }

    /// Creates the target schema when missing and grants usage on it.
    pub async fn create_schema_if_absent(&self) -> LoadResult<()> {
        let schema = &self.table.schema;
        let exists = match &self.cache {
            Some(cache) => match cache.lookup_schema(schema).await {
                Some(exists) => exists,
                None => {
                    self.refresh_cache().await?;
                    cache.lookup_schema(schema).await.unwrap_or(false)
                }
            },
            None => !self
                .client
                .fetch_schemas(std::slice::from_ref(schema))
                .await?
                .is_empty(),
        };

        if exists {
            return Ok(());
        }

        info!(schema = %schema, "schema does not exist, creating it");
        self.client
            .execute(&Statement::CreateSchema {
                schema: schema.clone(),
            })
            .await?;

        for grantee in &self.grantees {
            self.grant(Statement::GrantUsage {
                schema: schema.clone(),
                grantee: grantee.clone(),
            })
            .await?;
        }

        self.refresh_cache().await
    }

    /// Creates the target table when missing, otherwise reconciles its columns with the schema.
    pub async fn sync_table(&self) -> LoadResult<()> {
        let exists = match &self.cache {
            Some(cache) => match cache.lookup_table(&self.table.schema, &self.table.table).await {
                Some(exists) => exists,
                None => {
                    self.refresh_cache().await?;
                    cache
                        .lookup_table(&self.table.schema, &self.table.table)
                        .await
                        .unwrap_or(false)
                }
            },
            None => self
                .client
                .fetch_tables(&self.table.schema)
                .await?
                .contains(&self.table.table),
        };

        if exists {
            info!(stream = %self.stream, table = %self.table, "table exists, reconciling columns");
            return self.reconcile_columns().await;
        }

        info!(stream = %self.stream, table = %self.table, "table does not exist, creating it");
        self.client.execute(&self.create_table(&self.table)).await?;

        for grantee in &self.grantees {
            self.grant(Statement::GrantSelect {
                schema: self.table.schema.clone(),
                grantee: grantee.clone(),
            })
            .await?;
        }

        self.refresh_cache().await
    }

    /// Adds columns missing from the table and versions columns whose type changed.
    ///
    /// A versioned column is renamed with a timestamp suffix and re-added with the desired type,
    /// so existing data stays in the renamed column.
    async fn reconcile_columns(&self) -> LoadResult<()> {
        let live_columns: HashMap<String, String> = self
            .live_columns()
            .await?
            .into_iter()
            .map(|column| (column.column_name.to_lowercase(), column.data_type))
            .collect();

        let mut statements = Vec::new();
        for (name, property) in self.flattened_schema.columns() {
            let column = ColumnDefinition {
                name: name.clone(),
                column_type: ColumnType::for_property(property),
            };

            match live_columns.get(&name.to_lowercase()) {
                None => {
                    info!(table = %self.table, column = %name, "adding column");
                    statements.push(Statement::AddColumn {
                        table: self.table.clone(),
                        column,
                    });
                }
                Some(data_type) if column.column_type.requires_versioning(data_type) => {
                    let versioned = format!(
                        "{name}_{}",
                        Utc::now().format(VERSIONED_COLUMN_SUFFIX_FORMAT)
                    );
                    info!(
                        table = %self.table,
                        column = %name,
                        from = %data_type,
                        to = %column.column_type,
                        versioned = %versioned,
                        "versioning column"
                    );

                    statements.push(Statement::RenameColumn {
                        table: self.table.clone(),
                        from: name.clone(),
                        to: versioned,
                    });
                    statements.push(Statement::AddColumn {
                        table: self.table.clone(),
                        column,
                    });
                }
                Some(_) => {}
            }
        }

        if statements.is_empty() {
            return Ok(());
        }

        for statement in &statements {
            self.client.execute(statement).await?;
        }

        self.refresh_cache().await
    }

    /// Loads the staged objects under `key_prefix` into the target table.
    ///
    /// The objects are copied into a fresh staging table and merged into the target table by
    /// primary key, all in one transaction. Streams without key properties get a plain insert.
    pub async fn load_batch(
        &self,
        key_prefix: &str,
        rows: usize,
        size_bytes: u64,
    ) -> LoadResult<LoadSummary> {
        let stage = self.table.stage();
        let columns: Vec<String> = self.flattened_schema.names().map(str::to_string).collect();

        let mut statements = vec![
            Statement::DropTable {
                table: stage.clone(),
            },
            self.create_table(&stage),
            Statement::Copy {
                table: stage.clone(),
                columns: columns.clone(),
                source: CopySource {
                    bucket: self.options.bucket.clone(),
                    key_prefix: key_prefix.to_string(),
                    credentials: self.options.credentials.clone(),
                    copy_options: self.options.copy_options.clone(),
                    compression: self.options.compression,
                },
            },
        ];

        let mut update_index = None;
        if self.key_properties.is_empty() {
            statements.push(Statement::Insert {
                target: self.table.clone(),
                stage: stage.clone(),
                columns,
            });
        } else {
            if !self.options.skip_updates {
                update_index = Some(statements.len());
                statements.push(Statement::MergeUpdate {
                    target: self.table.clone(),
                    stage: stage.clone(),
                    columns: columns.clone(),
                    primary_key: self.key_properties.clone(),
                });
            }
            statements.push(Statement::MergeInsert {
                target: self.table.clone(),
                stage: stage.clone(),
                columns,
                primary_key: self.key_properties.clone(),
            });
        }
        let insert_index = statements.len() - 1;
        statements.push(Statement::DropTable { table: stage });

        let affected = self.client.execute_in_transaction(&statements).await?;
        let summary = LoadSummary {
            inserts: affected.get(insert_index).copied().unwrap_or(0),
            updates: update_index
                .and_then(|index| affected.get(index).copied())
                .unwrap_or(0),
        };

        info!(
            stream = %self.stream,
            table = %self.table,
            rows,
            inserts = summary.inserts,
            updates = summary.updates,
            size_bytes,
            "loaded batch into table"
        );

        Ok(summary)
    }

    /// Deletes the rows flagged as deleted by the source.
    pub async fn purge_soft_deleted(&self) -> LoadResult<u64> {
        let deleted = self
            .client
            .execute(&Statement::DeleteSoftDeleted {
                table: self.table.clone(),
            })
            .await?;

        debug!(table = %self.table, deleted, "purged soft deleted rows");

        Ok(deleted)
    }

    fn create_table(&self, table: &TableName) -> Statement {
        Statement::CreateTable {
            table: table.clone(),
            columns: self
                .flattened_schema
                .columns()
                .iter()
                .map(|(name, property)| ColumnDefinition {
                    name: name.clone(),
                    column_type: ColumnType::for_property(property),
                })
                .collect(),
            primary_key: self.key_properties.clone(),
        }
    }

    async fn grant(&self, statement: Statement) -> LoadResult<()> {
        if let Err(err) = self.client.execute(&statement).await {
            return Err(load_error!(
                ErrorKind::GrantFailed,
                "Granting privileges failed",
                detail = statement.to_string(),
                source: err
            ));
        }

        Ok(())
    }

    async fn live_columns(&self) -> LoadResult<Vec<CatalogColumn>> {
        if let Some(cache) = &self.cache {
            if let Some(columns) = cache
                .lookup_columns(&self.table.schema, &self.table.table)
                .await
            {
                return Ok(columns);
            }

            self.refresh_cache().await?;
            return Ok(cache
                .lookup_columns(&self.table.schema, &self.table.table)
                .await
                .unwrap_or_default());
        }

        self.client
            .fetch_columns(
                std::slice::from_ref(&self.table.schema),
                Some(&self.table.table),
            )
            .await
    }

    /// Reloads the cached catalog of this table's schema after DDL.
    ///
    /// The stale snapshot is dropped first, so a failed refresh leaves the schema uncached.
    async fn refresh_cache(&self) -> LoadResult<()> {
        let Some(cache) = &self.cache else {
            return Ok(());
        };

        cache.invalidate(&self.table.schema).await;
        cache
            .refresh(&self.client, std::slice::from_ref(&self.table.schema))
            .await
    }
}
