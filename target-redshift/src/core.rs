use config::shared::TargetConfig;
use loader::pipeline::{Loader, load_table_cache};
use loader::staging::build_s3_store;
use loader::warehouse::RedshiftClient;
use tokio::io::BufReader;
use tracing::info;

use crate::error::TargetResult;

/// Runs one load over standard input and output.
pub async fn run_target(config: TargetConfig) -> TargetResult<()> {
    let client = RedshiftClient::new(config.connection.clone())?;
    let store = build_s3_store(&config.storage)?;
    let cache = load_table_cache(&client, &config).await?;

    let mut loader = Loader::new(config, client, store, cache)?;

    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    loader.run(stdin, &mut stdout).await?;

    info!("target finished");

    Ok(())
}
