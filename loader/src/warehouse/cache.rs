use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::error::LoadResult;
use crate::warehouse::base::{CatalogColumn, WarehouseClient};

/// Catalog snapshot of one schema.
#[derive(Debug, Default)]
struct SchemaSnapshot {
    exists: bool,
    columns: Vec<CatalogColumn>,
}

#[derive(Debug, Default)]
struct Inner {
    snapshots: HashMap<String, SchemaSnapshot>,
}

/// Shared snapshot of the warehouse catalog, per schema.
///
/// Lookups return [`None`] for schemas without a snapshot, either never fetched or invalidated,
/// so callers know to [`TableCache::refresh`] them. Schema and table names are compared
/// lowercase.
#[derive(Debug, Clone, Default)]
pub struct TableCache {
    inner: Arc<Mutex<Inner>>,
}

impl TableCache {
    pub fn new() -> TableCache {
        TableCache::default()
    }

    /// Replaces the snapshots of `schemas` with the current catalog content.
    pub async fn refresh<C>(&self, client: &C, schemas: &[String]) -> LoadResult<()>
    where
        C: WarehouseClient,
    {
        let schemas: Vec<String> = schemas.iter().map(|schema| schema.to_lowercase()).collect();
        let existing = client.fetch_schemas(&schemas).await?;
        let columns = client.fetch_columns(&schemas, None).await?;

        let mut snapshots: HashMap<String, SchemaSnapshot> = schemas
            .iter()
            .map(|schema| {
                let snapshot = SchemaSnapshot {
                    exists: existing.contains(schema),
                    columns: Vec::new(),
                };
                (schema.clone(), snapshot)
            })
            .collect();
        for column in columns {
            if let Some(snapshot) = snapshots.get_mut(&column.table_schema) {
                snapshot.columns.push(column);
            }
        }

        debug!(schemas = ?schemas, "refreshed table cache");

        let mut inner = self.inner.lock().await;
        inner.snapshots.extend(snapshots);

        Ok(())
    }

    /// Drops the snapshot of `schema`.
    pub async fn invalidate(&self, schema: &str) {
        let mut inner = self.inner.lock().await;
        inner.snapshots.remove(&schema.to_lowercase());
    }

    /// Returns whether `schema` exists.
    pub async fn lookup_schema(&self, schema: &str) -> Option<bool> {
        let inner = self.inner.lock().await;
        inner
            .snapshots
            .get(&schema.to_lowercase())
            .map(|snapshot| snapshot.exists)
    }

    /// Returns whether `table` exists in `schema`.
    pub async fn lookup_table(&self, schema: &str, table: &str) -> Option<bool> {
        let table = table.to_lowercase();
        let inner = self.inner.lock().await;
        inner
            .snapshots
            .get(&schema.to_lowercase())
            .map(|snapshot| {
                snapshot
                    .columns
                    .iter()
                    .any(|column| column.table_name == table)
            })
    }

    /// Returns the columns of `table` in `schema`.
    pub async fn lookup_columns(&self, schema: &str, table: &str) -> Option<Vec<CatalogColumn>> {
        let table = table.to_lowercase();
        let inner = self.inner.lock().await;
        inner.snapshots.get(&schema.to_lowercase()).map(|snapshot| {
            snapshot
                .columns
                .iter()
                .filter(|column| column.table_name == table)
                .cloned()
                .collect()
        })
    }
}
