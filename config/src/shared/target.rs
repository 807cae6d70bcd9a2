use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::shared::{
    Compression, Grantee, SchemaMappingEntry, SelectPermissions, StorageConfig,
    ValidationError, WarehouseConnectionConfig,
};

fn default_batch_size_rows() -> usize {
    TargetConfig::DEFAULT_BATCH_SIZE_ROWS
}

fn default_max_parallelism() -> usize {
    TargetConfig::DEFAULT_MAX_PARALLELISM
}

fn default_slices() -> usize {
    TargetConfig::DEFAULT_SLICES
}

const fn default_true() -> bool {
    true
}

/// Complete configuration of a loader run.
///
/// This intentionally does not implement `Serialize` to avoid accidentally leaking secrets in
/// the config into serialized forms.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TargetConfig {
    /// Warehouse connection settings.
    #[serde(flatten)]
    pub connection: WarehouseConnectionConfig,
    /// Object storage settings for staged files.
    #[serde(flatten)]
    pub storage: StorageConfig,
    /// Namespace receiving every stream not routed by `schema_mapping`.
    #[serde(default)]
    pub default_target_schema: Option<String>,
    /// Grantees of every namespace not overridden by `schema_mapping`.
    #[serde(default)]
    pub default_target_schema_select_permissions: Option<SelectPermissions>,
    /// Source schema name to target namespace routing.
    #[serde(default)]
    pub schema_mapping: HashMap<String, SchemaMappingEntry>,
    /// Number of distinct keys buffered per stream before it is flushed.
    #[serde(default = "default_batch_size_rows")]
    pub batch_size_rows: usize,
    /// Flush every stream whenever one stream reaches the batch size.
    #[serde(default)]
    pub flush_all_streams: bool,
    /// Number of streams flushed concurrently; `0` derives it from the number of streams.
    #[serde(default)]
    pub parallelism: usize,
    /// Upper bound of the automatic parallelism.
    #[serde(default = "default_max_parallelism")]
    pub max_parallelism: usize,
    /// Delete rows flagged with `_sdc_deleted_at` after every load.
    #[serde(default)]
    pub hard_delete: bool,
    /// Add `_sdc_*` metadata columns to every table.
    #[serde(default)]
    pub add_metadata_columns: bool,
    /// Depth up to which nested objects are flattened into separate columns.
    #[serde(default)]
    pub data_flattening_max_level: usize,
    /// Reject streams without key properties.
    #[serde(default = "default_true")]
    pub primary_key_required: bool,
    /// Validate every record against its stream's JSON schema.
    #[serde(default)]
    pub validate_records: bool,
    /// Query the catalog live instead of prefetching it once per run.
    #[serde(default)]
    pub disable_table_cache: bool,
    /// Codec applied to staged files.
    #[serde(default)]
    pub compression: Option<Compression>,
    /// Number of files each batch is split into.
    #[serde(default = "default_slices")]
    pub slices: usize,
    /// Directory for staged files. The system temporary directory is used when absent.
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    /// Raw bulk-load options replacing the default ones.
    #[serde(default)]
    pub copy_options: Option<String>,
    /// Only insert new keys, never update existing rows.
    #[serde(default)]
    pub skip_updates: bool,
}

impl TargetConfig {
    /// Default number of rows per batch.
    pub const DEFAULT_BATCH_SIZE_ROWS: usize = 100_000;

    /// Default ceiling for automatic flush parallelism.
    pub const DEFAULT_MAX_PARALLELISM: usize = 16;

    /// Default number of staged files per batch.
    pub const DEFAULT_SLICES: usize = 1;

    /// Validates the configuration, reporting every problem found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut errors: Vec<String> = self
            .connection
            .missing_keys()
            .into_iter()
            .map(|key| format!("Required key is missing from config: [{key}]"))
            .collect();

        if self
            .storage
            .s3_bucket
            .as_deref()
            .is_none_or(str::is_empty)
        {
            errors.push("Required key is missing from config: [s3_bucket]".to_string());
        }

        let has_default_schema = self
            .default_target_schema
            .as_deref()
            .is_some_and(|schema| !schema.trim().is_empty());
        if !has_default_schema && self.schema_mapping.is_empty() {
            errors.push(
                "Neither 'default_target_schema' (string) nor 'schema_mapping' (object) keys set in config."
                    .to_string(),
            );
        }

        if self.batch_size_rows == 0 {
            errors.push("'batch_size_rows' must be greater than 0".to_string());
        }
        if self.max_parallelism == 0 {
            errors.push("'max_parallelism' must be greater than 0".to_string());
        }
        if self.slices == 0 {
            errors.push("'slices' must be an integer greater than 0".to_string());
        }

        if !errors.is_empty() {
            return Err(ValidationError::Invalid(errors));
        }

        self.connection.validate_tls()
    }

    /// Returns the target namespace for streams of `source_schema`.
    ///
    /// A `schema_mapping` entry for the source schema wins over `default_target_schema`.
    pub fn target_schema_for(&self, source_schema: Option<&str>) -> Option<&str> {
        if let Some(entry) = source_schema.and_then(|schema| self.schema_mapping.get(schema)) {
            return Some(entry.target_schema.as_str());
        }

        self.default_target_schema
            .as_deref()
            .map(str::trim)
            .filter(|schema| !schema.is_empty())
    }

    /// Returns the grantees of the namespace used for streams of `source_schema`.
    pub fn grantees_for(&self, source_schema: Option<&str>) -> Vec<Grantee> {
        let mapped = source_schema
            .and_then(|schema| self.schema_mapping.get(schema))
            .and_then(|entry| entry.target_schema_select_permissions.as_ref());

        mapped
            .or(self.default_target_schema_select_permissions.as_ref())
            .map(SelectPermissions::grantees)
            .unwrap_or_default()
    }

    /// Returns every namespace the configuration may route streams into.
    pub fn target_schema_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .default_target_schema
            .iter()
            .map(|schema| schema.trim().to_string())
            .filter(|schema| !schema.is_empty())
            .collect();

        names.extend(
            self.schema_mapping
                .values()
                .map(|entry| entry.target_schema.clone()),
        );
        names.sort();
        names.dedup();

        names
    }
}
