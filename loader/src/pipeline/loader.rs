use std::collections::BTreeMap;
use std::sync::Arc;

use config::shared::TargetConfig;
use object_store::ObjectStore;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{Instrument, debug, info, info_span};

use crate::bail;
use crate::error::{ErrorKind, LoadResult};
use crate::message::{Message, RecordMessage, SchemaMessage};
use crate::pipeline::buffer::RecordBuffer;
use crate::pipeline::checkpoint::CheckpointTracker;
use crate::pipeline::flush::{StreamBatch, flush_batches, flush_parallelism};
use crate::schema::metadata::{add_metadata_columns_to_schema, add_metadata_values_to_record};
use crate::staging::Stager;
use crate::validation::RecordValidator;
use crate::warehouse::{LoadOptions, StreamSync, TableCache, WarehouseClient};

/// Counters of one stream's current batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamStats {
    /// Distinct keys buffered since the last flush.
    pub row_count: usize,
    /// Distinct keys counted since the stream's last schema message.
    pub total_row_count: u64,
    /// Records currently buffered.
    pub buffered: usize,
}

/// State of a stream whose schema has been received.
struct StreamState<C> {
    sync: Arc<StreamSync<C>>,
    validator: Option<RecordValidator>,
    buffer: RecordBuffer,
    row_count: usize,
    total_row_count: u64,
}

/// Reads messages, buffers records per stream and flushes them to the warehouse.
///
/// Messages are processed one at a time in input order. Flushes block the loop until every
/// stream in the flush is loaded, then the state covering the loaded records is written out.
pub struct Loader<C> {
    config: Arc<TargetConfig>,
    client: C,
    cache: Option<TableCache>,
    options: Arc<LoadOptions>,
    stager: Stager,
    streams: BTreeMap<String, StreamState<C>>,
    checkpoints: CheckpointTracker,
}

impl<C> Loader<C>
where
    C: WarehouseClient,
{
    /// Creates a loader writing through `client` and staging files in `store`.
    ///
    /// Fails when the configuration is invalid, before any message is read.
    pub fn new(
        config: TargetConfig,
        client: C,
        store: Arc<dyn ObjectStore>,
        cache: Option<TableCache>,
    ) -> LoadResult<Loader<C>> {
        if let Err(err) = config.validate() {
            bail!(
                ErrorKind::ConfigError,
                "Invalid configuration",
                err.to_string(),
                source: err
            );
        }

        let options = Arc::new(LoadOptions::from_config(&config)?);
        let stager = Stager::new(store, &config)?;

        Ok(Loader {
            config: Arc::new(config),
            client,
            cache,
            options,
            stager,
            streams: BTreeMap::new(),
            checkpoints: CheckpointTracker::new(),
        })
    }

    /// Processes every line of `reader`, writing states to `writer`.
    ///
    /// Buffered records are flushed once the input ends, and the final state is written last.
    pub async fn run<R, W>(&mut self, mut reader: R, writer: &mut W) -> LoadResult<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }

            let message = Message::parse(&decode_line(&buf)?)?;
            self.process_message(message, writer).await?;
        }

        self.finish(writer).await
    }

    /// Processes one message, writing a state when it triggers a flush.
    pub async fn process_message<W>(&mut self, message: Message, writer: &mut W) -> LoadResult<()>
    where
        W: AsyncWrite + Unpin,
    {
        match message {
            Message::Schema(message) => self.handle_schema(message, writer).await,
            Message::Record(message) => self.handle_record(message, writer).await,
            Message::State(message) => {
                debug!(state = %message.value, "setting state");
                self.checkpoints.observe(message.value);
                Ok(())
            }
            Message::ActivateVersion(message) => {
                debug!(
                    stream = %message.stream,
                    version = ?message.version,
                    "activate version message"
                );
                Ok(())
            }
        }
    }

    /// Flushes every stream with buffered records and writes the last flushed state.
    pub async fn finish<W>(&mut self, writer: &mut W) -> LoadResult<()>
    where
        W: AsyncWrite + Unpin,
    {
        if self.streams.values().any(|state| state.row_count > 0) {
            self.flush(None).await?;
        }

        self.emit_state(writer).await
    }

    /// Returns the counters of `stream`, if its schema has been received.
    pub fn stream_stats(&self, stream: &str) -> Option<StreamStats> {
        self.streams.get(stream).map(|state| StreamStats {
            row_count: state.row_count,
            total_row_count: state.total_row_count,
            buffered: state.buffer.len(),
        })
    }

    /// Returns the state that would be written now.
    pub fn flushed_state(&self) -> Option<&Value> {
        self.checkpoints.flushed()
    }

    async fn handle_schema<W>(&mut self, message: SchemaMessage, writer: &mut W) -> LoadResult<()>
    where
        W: AsyncWrite + Unpin,
    {
        let stream = message.stream.clone();

        // Records buffered under the previous schema are loaded with that schema.
        if self
            .streams
            .get(&stream)
            .is_some_and(|state| state.row_count > 0)
        {
            let filter = self.flush_filter(&stream);
            self.flush(filter).await?;
            self.emit_state(writer).await?;
        }

        let Some(key_properties) = &message.key_properties else {
            bail!(
                ErrorKind::MissingKeyProperties,
                "key_properties field is required",
                stream
            );
        };
        if self.config.primary_key_required && key_properties.is_empty() {
            bail!(
                ErrorKind::PrimaryKeyRequired,
                "Primary key is set to mandatory but not defined in the stream",
                stream
            );
        }

        let validator = if self.config.validate_records {
            Some(RecordValidator::new(&message.schema)?)
        } else {
            None
        };

        let mut message = message;
        if self.adds_metadata() {
            add_metadata_columns_to_schema(&mut message.schema);
        }

        let sync = StreamSync::new(
            self.client.clone(),
            self.cache.clone(),
            self.options.clone(),
            &self.config,
            &message,
        )?;

        let span = info_span!("sync_stream", stream = %stream, table = %sync.table());
        async {
            sync.create_schema_if_absent().await?;
            sync.sync_table().await
        }
        .instrument(span)
        .await?;

        self.streams.insert(
            stream,
            StreamState {
                sync: Arc::new(sync),
                validator,
                buffer: RecordBuffer::new(),
                row_count: 0,
                total_row_count: 0,
            },
        );

        Ok(())
    }

    async fn handle_record<W>(&mut self, message: RecordMessage, writer: &mut W) -> LoadResult<()>
    where
        W: AsyncWrite + Unpin,
    {
        let adds_metadata = self.adds_metadata();
        let RecordMessage {
            stream,
            mut record,
            time_extracted,
        } = message;

        let Some(state) = self.streams.get_mut(&stream) else {
            bail!(
                ErrorKind::UnknownStream,
                "A record for stream was encountered before a corresponding schema",
                stream
            );
        };

        if let Some(validator) = &state.validator {
            validator.validate(&record)?;
        }

        if adds_metadata {
            add_metadata_values_to_record(&mut record, time_extracted.as_deref());
        }

        let record = state.sync.flatten_record(&record);
        let key = state
            .sync
            .record_key_string(&record)?
            .filter(|key| !key.is_empty())
            .unwrap_or_else(|| format!("RID-{}", state.total_row_count));

        if state.buffer.insert(key, record) {
            state.row_count += 1;
            state.total_row_count += 1;
        }

        if state.row_count >= self.config.batch_size_rows {
            let filter = self.flush_filter(&stream);
            self.flush(filter).await?;
            self.emit_state(writer).await?;
        }

        Ok(())
    }

    /// Returns the streams flushed when `stream` needs a flush, [`None`] meaning every stream.
    fn flush_filter(&self, stream: &str) -> Option<Vec<String>> {
        if self.config.flush_all_streams {
            None
        } else {
            Some(vec![stream.to_string()])
        }
    }

    fn adds_metadata(&self) -> bool {
        self.config.add_metadata_columns || self.config.hard_delete
    }

    /// Loads the buffered records of `streams`, or of every stream, and advances the state.
    async fn flush(&mut self, streams: Option<Vec<String>>) -> LoadResult<()> {
        let targets: Vec<String> = match &streams {
            Some(streams) => streams.clone(),
            None => self.streams.keys().cloned().collect(),
        };

        let mut batches: Vec<StreamBatch<C>> = Vec::with_capacity(targets.len());
        for stream in &targets {
            if let Some(state) = self.streams.get_mut(stream)
                && state.row_count > 0
            {
                batches.push(StreamBatch {
                    sync: state.sync.clone(),
                    records: state.buffer.take(),
                });
            }
        }

        let parallelism = flush_parallelism(
            self.config.parallelism,
            self.config.max_parallelism,
            batches.len(),
        );
        info!(
            streams = batches.len(),
            parallelism, "flushing buffered records"
        );

        flush_batches(batches, &self.stager, self.config.hard_delete, parallelism).await?;

        for stream in &targets {
            if let Some(state) = self.streams.get_mut(stream) {
                state.row_count = 0;
            }
        }
        self.checkpoints.mark_flushed(streams.as_deref());

        Ok(())
    }

    async fn emit_state<W>(&self, writer: &mut W) -> LoadResult<()>
    where
        W: AsyncWrite + Unpin,
    {
        let Some(state) = self.checkpoints.flushed() else {
            return Ok(());
        };

        let line = serde_json::to_string(state)?;
        info!(state = %line, "emitting state");

        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        Ok(())
    }
}

/// Decodes one raw input line, without its terminator.
fn decode_line(raw: &[u8]) -> LoadResult<String> {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);

    match String::from_utf8(raw.to_vec()) {
        Ok(line) => Ok(line),
        Err(err) => bail!(
            ErrorKind::MessageParseFailed,
            "Unable to parse input line",
            detail = String::from_utf8_lossy(raw).into_owned(),
            source: err
        ),
    }
}

/// Prefetches the catalog of every configured target schema, unless the cache is disabled.
pub async fn load_table_cache<C>(
    client: &C,
    config: &TargetConfig,
) -> LoadResult<Option<TableCache>>
where
    C: WarehouseClient,
{
    if config.disable_table_cache {
        return Ok(None);
    }

    info!("getting catalog objects from table cache");

    let cache = TableCache::new();
    cache.refresh(client, &config.target_schema_names()).await?;

    Ok(Some(cache))
}
