use std::io::BufReader;

use config::shared::WarehouseConnectionConfig;
use pg_escape::quote_literal;
use rustls::ClientConfig;
use tokio_postgres::tls::MakeTlsConnect;
use tokio_postgres::{Client, Connection, NoTls, SimpleQueryMessage, Socket};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{Instrument, debug, error};

use crate::error::LoadResult;
use crate::warehouse::base::{CatalogColumn, WarehouseClient};
use crate::warehouse::statement::Statement;

/// Drives a warehouse connection until its [`Client`] is dropped.
fn spawn_connection<T>(connection: Connection<Socket, T::Stream>)
where
    T: MakeTlsConnect<Socket>,
    T::Stream: Send + 'static,
{
    let span = tracing::Span::current();
    let task = async move {
        if let Err(err) = connection.await {
            error!("an error occurred during the warehouse connection: {}", err);
        }
    }
    .instrument(span);

    // The client closes the connection when dropped, so the handle is not tracked.
    tokio::spawn(task);
}

/// Warehouse client for Amazon Redshift.
///
/// Every operation opens its own short-lived connection, so clones can be used concurrently from
/// different streams without sharing a session.
#[derive(Clone)]
pub struct RedshiftClient {
    config: WarehouseConnectionConfig,
    tls: Option<MakeRustlsConnect>,
}

impl RedshiftClient {
    /// Creates a client, loading the trusted root certificates when TLS is enabled.
    pub fn new(config: WarehouseConnectionConfig) -> LoadResult<RedshiftClient> {
        let tls = if config.ssl {
            let mut root_store = rustls::RootCertStore::empty();
            let mut root_certs_reader = BufReader::new(config.trusted_root_certs.as_bytes());
            for cert in rustls_pemfile::certs(&mut root_certs_reader) {
                let cert = cert?;
                root_store.add(cert)?;
            }

            let tls_config = ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth();

            Some(MakeRustlsConnect::new(tls_config))
        } else {
            None
        };

        Ok(RedshiftClient { config, tls })
    }

    async fn connect(&self) -> LoadResult<Client> {
        let options = self.config.connect_options();

        match &self.tls {
            Some(tls) => {
                let (client, connection) = options.connect(tls.clone()).await?;
                spawn_connection::<MakeRustlsConnect>(connection);
                Ok(client)
            }
            None => {
                let (client, connection) = options.connect(NoTls).await?;
                spawn_connection::<NoTls>(connection);
                Ok(client)
            }
        }
    }

    /// Runs a query and returns the first `width` columns of every row.
    async fn query_rows(&self, query: &str, width: usize) -> LoadResult<Vec<Vec<String>>> {
        debug!(query, "running catalog query");

        let client = self.connect().await?;
        let messages = client.simple_query(query).await?;

        let rows = messages
            .iter()
            .filter_map(|message| match message {
                SimpleQueryMessage::Row(row) => Some(
                    (0..width)
                        .map(|index| row.get(index).unwrap_or_default().to_string())
                        .collect(),
                ),
                _ => None,
            })
            .collect();

        Ok(rows)
    }
}

/// Returns the row count of the last completed command.
fn affected_rows(messages: &[SimpleQueryMessage]) -> u64 {
    messages
        .iter()
        .filter_map(|message| match message {
            SimpleQueryMessage::CommandComplete(rows) => Some(*rows),
            _ => None,
        })
        .last()
        .unwrap_or(0)
}

fn in_list(values: &[String]) -> String {
    values
        .iter()
        .map(|value| quote_literal(&value.to_lowercase()))
        .collect::<Vec<_>>()
        .join(", ")
}

impl WarehouseClient for RedshiftClient {
    async fn execute(&self, statement: &Statement) -> LoadResult<u64> {
        debug!(query = %statement, "running query");

        let client = self.connect().await?;
        let messages = client.simple_query(&statement.to_sql()).await?;

        Ok(affected_rows(&messages))
    }

    async fn execute_in_transaction(&self, statements: &[Statement]) -> LoadResult<Vec<u64>> {
        let mut client = self.connect().await?;
        let transaction = client.transaction().await?;

        let mut rows = Vec::with_capacity(statements.len());
        for statement in statements {
            debug!(query = %statement, "running query in transaction");

            let messages = transaction.simple_query(&statement.to_sql()).await?;
            rows.push(affected_rows(&messages));
        }

        transaction.commit().await?;

        Ok(rows)
    }

    async fn fetch_schemas(&self, schemas: &[String]) -> LoadResult<Vec<String>> {
        if schemas.is_empty() {
            return Ok(Vec::new());
        }

        let query = format!(
            "SELECT LOWER(schema_name) schema_name FROM information_schema.schemata \
             WHERE LOWER(schema_name) IN ({})",
            in_list(schemas)
        );

        let rows = self.query_rows(&query, 1).await?;

        Ok(rows.into_iter().flatten().collect())
    }

    async fn fetch_tables(&self, schema: &str) -> LoadResult<Vec<String>> {
        let query = format!(
            "SELECT LOWER(table_name) table_name FROM information_schema.tables \
             WHERE LOWER(table_schema) = {}",
            quote_literal(&schema.to_lowercase())
        );

        let rows = self.query_rows(&query, 1).await?;

        Ok(rows.into_iter().flatten().collect())
    }

    async fn fetch_columns(
        &self,
        schemas: &[String],
        table: Option<&str>,
    ) -> LoadResult<Vec<CatalogColumn>> {
        if schemas.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = format!(
            "SELECT LOWER(c.table_schema) table_schema, LOWER(c.table_name) table_name, \
             c.column_name, c.data_type \
             FROM information_schema.columns c \
             WHERE LOWER(c.table_schema) IN ({})",
            in_list(schemas)
        );
        if let Some(table) = table {
            query.push_str(&format!(
                " AND LOWER(c.table_name) = {}",
                quote_literal(&table.to_lowercase())
            ));
        }

        let rows = self.query_rows(&query, 4).await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| match <[String; 4]>::try_from(row) {
                Ok([table_schema, table_name, column_name, data_type]) => Some(CatalogColumn {
                    table_schema,
                    table_name,
                    column_name,
                    data_type,
                }),
                Err(_) => None,
            })
            .collect())
    }
}
