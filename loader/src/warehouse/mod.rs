//! Warehouse side of the loader: SQL statements, catalog access and per-stream table sync.

mod base;
mod cache;
mod credentials;
mod naming;
mod redshift;
mod statement;
mod sync;

pub use base::{CatalogColumn, WarehouseClient};
pub use cache::TableCache;
pub use credentials::CopyCredentials;
pub use naming::{StreamName, TableName, quote_column};
pub use redshift::RedshiftClient;
pub use statement::{ColumnDefinition, CopySource, DEFAULT_COPY_OPTIONS, Statement};
pub use sync::{LoadOptions, LoadSummary, StreamSync};
