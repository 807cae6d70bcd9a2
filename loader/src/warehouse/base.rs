use std::future::Future;

use crate::error::LoadResult;
use crate::warehouse::statement::Statement;

/// One column as reported by the warehouse catalog.
///
/// Schema and table names are lowercase; `data_type` carries no length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogColumn {
    pub table_schema: String,
    pub table_name: String,
    pub column_name: String,
    pub data_type: String,
}

/// Connection to the warehouse the loader writes to.
///
/// Implementations are cloned into every concurrent stream flush, so each call must be
/// independent: no transaction or session state may leak from one call to the next.
pub trait WarehouseClient: Clone + Send + Sync + 'static {
    /// Executes a single statement, returning the number of affected rows.
    fn execute(&self, statement: &Statement) -> impl Future<Output = LoadResult<u64>> + Send;

    /// Executes `statements` in order inside one transaction.
    ///
    /// Returns the number of rows affected by each statement. Nothing is committed when any
    /// statement fails.
    fn execute_in_transaction(
        &self,
        statements: &[Statement],
    ) -> impl Future<Output = LoadResult<Vec<u64>>> + Send;

    /// Returns which of `schemas` exist, lowercase.
    fn fetch_schemas(&self, schemas: &[String])
    -> impl Future<Output = LoadResult<Vec<String>>> + Send;

    /// Returns the lowercase names of the tables in `schema`.
    fn fetch_tables(&self, schema: &str) -> impl Future<Output = LoadResult<Vec<String>>> + Send;

    /// Returns the columns of every table in `schemas`, or of `table` only when given.
    fn fetch_columns(
        &self,
        schemas: &[String],
        table: Option<&str>,
    ) -> impl Future<Output = LoadResult<Vec<CatalogColumn>>> + Send;
}
