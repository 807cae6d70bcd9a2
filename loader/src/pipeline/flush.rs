use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info_span};

use crate::error::{ErrorKind, LoadResult};
use crate::load_error;
use crate::staging::Stager;
use crate::warehouse::{StreamSync, WarehouseClient};

/// Records of one stream handed over to a flush.
#[derive(Debug)]
pub struct StreamBatch<C> {
    pub sync: Arc<StreamSync<C>>,
    pub records: Vec<Map<String, Value>>,
}

/// Returns how many streams are flushed concurrently.
///
/// A configured value of `0` flushes every stream at once, up to `max_parallelism`.
pub fn flush_parallelism(parallelism: usize, max_parallelism: usize, streams: usize) -> usize {
    if parallelism == 0 {
        streams.min(max_parallelism).max(1)
    } else {
        parallelism
    }
}

/// Stages and loads every batch, at most `parallelism` at a time.
///
/// The first failure aborts the batches still running. Batches already loaded stay loaded.
/// Every failure observed is returned.
pub async fn flush_batches<C>(
    batches: Vec<StreamBatch<C>>,
    stager: &Stager,
    hard_delete: bool,
    parallelism: usize,
) -> LoadResult<()>
where
    C: WarehouseClient,
{
    let permits = Arc::new(Semaphore::new(parallelism.max(1)));
    let mut join_set = JoinSet::new();

    for batch in batches {
        let permits = permits.clone();
        let stager = stager.clone();
        let span = info_span!("flush_stream", stream = %batch.sync.stream());

        join_set.spawn(
            async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(err) => {
                        return Err(load_error!(
                            ErrorKind::InvalidState,
                            "Flush permits are no longer available",
                            err.to_string()
                        ));
                    }
                };

                flush_batch(batch, &stager, hard_delete).await
            }
            .instrument(span),
        );
    }

    let mut errors = Vec::new();
    while let Some(result) = join_set.join_next().await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!(error = %err, "stream flush failed, aborting remaining flushes");
                errors.push(err);
                join_set.abort_all();
            }
            Err(join_err) => {
                if join_err.is_cancelled() {
                    debug!("stream flush was cancelled");
                } else {
                    errors.push(load_error!(
                        ErrorKind::FlushTaskPanic,
                        "Stream flush panicked",
                        join_err
                    ));
                    join_set.abort_all();
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.into())
    }
}

/// Stages one batch, loads it and removes the staged objects.
///
/// Local files are removed whether or not the load succeeds.
async fn flush_batch<C>(batch: StreamBatch<C>, stager: &Stager, hard_delete: bool) -> LoadResult<()>
where
    C: WarehouseClient,
{
    let StreamBatch { sync, records } = batch;
    if records.is_empty() {
        return Ok(());
    }

    let columns = Arc::new(
        sync.flattened_schema()
            .names()
            .map(str::to_string)
            .collect::<Vec<_>>(),
    );

    let staged = stager.stage(sync.stream(), records, columns).await?;
    sync.load_batch(&staged.copy_key_prefix, staged.rows, staged.size_bytes)
        .await?;
    stager.remove_objects(&staged).await?;

    if hard_delete {
        sync.purge_soft_deleted().await?;
    }

    Ok(())
}
