use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use chrono::Local;
use config::shared::{Compression, TargetConfig};
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{ErrorKind, LoadResult};
use crate::load_error;
use crate::staging::encode::write_lines;

/// Prefix of every staged object name, after the configured key prefix.
const OBJECT_NAME_PREFIX: &str = "pipelinewise_";

/// Files and objects holding one staged batch.
///
/// Local files are removed when the batch is dropped. Objects stay in the store until
/// [`Stager::remove_objects`] is called.
#[derive(Debug)]
pub struct StagedBatch {
    files: Vec<NamedTempFile>,
    keys: Vec<Path>,
    /// Common prefix of the object keys, used as the `COPY` source.
    pub copy_key_prefix: String,
    pub rows: usize,
    pub size_bytes: u64,
}

impl StagedBatch {
    /// Returns the keys of the uploaded objects.
    pub fn keys(&self) -> &[Path] {
        &self.keys
    }

    #[cfg(test)]
    fn local_paths(&self) -> Vec<&FsPath> {
        self.files.iter().map(NamedTempFile::path).collect()
    }
}

/// Writes batches as delimited files and uploads them to object storage.
#[derive(Debug, Clone)]
pub struct Stager {
    store: Arc<dyn ObjectStore>,
    key_prefix: String,
    slices: usize,
    compression: Option<Compression>,
    temp_dir: PathBuf,
}

impl Stager {
    /// Creates a stager uploading to `store`.
    ///
    /// The configured temporary directory is created when missing, a leading `~` is expanded to
    /// the home directory. The system temporary directory is used when none is configured.
    pub fn new(store: Arc<dyn ObjectStore>, config: &TargetConfig) -> LoadResult<Stager> {
        let temp_dir = match &config.temp_dir {
            Some(temp_dir) => {
                let temp_dir = expand_home(temp_dir);
                std::fs::create_dir_all(&temp_dir)?;
                temp_dir
            }
            None => std::env::temp_dir(),
        };

        Ok(Stager {
            store,
            key_prefix: config.storage.s3_key_prefix.clone(),
            slices: config.slices.max(1),
            compression: config.compression,
            temp_dir,
        })
    }

    /// Writes `records` into `slices` files and uploads them.
    ///
    /// Records are split into contiguous chunks of `ceil(records / slices)` rows, so the last
    /// file may hold fewer rows. Object keys end with `.<chunk number>`, starting at 1.
    pub async fn stage(
        &self,
        stream: &str,
        records: Vec<Map<String, Value>>,
        columns: Arc<Vec<String>>,
    ) -> LoadResult<StagedBatch> {
        let rows = records.len();
        let chunk_size = rows.div_ceil(self.slices).max(1);
        let extension = self.file_extension();
        let timestamp = Local::now().format("%Y%m%d-%H%M%S-%6f");

        let mut files = Vec::new();
        let mut keys = Vec::new();
        let mut size_bytes = 0;

        for (index, chunk) in records.chunks(chunk_size).enumerate() {
            let chunk_number = index + 1;
            let (file, bytes) = self
                .write_chunk(stream, chunk.to_vec(), columns.clone(), chunk_number)
                .await?;

            let key = Path::from(format!(
                "{}{OBJECT_NAME_PREFIX}{stream}_{timestamp}{extension}.{chunk_number}",
                self.key_prefix
            ));
            info!(
                stream,
                rows = chunk.len(),
                file = %file.path().display(),
                key = %key,
                "uploading staged file"
            );

            size_bytes += bytes.len() as u64;
            self.store.put(&key, PutPayload::from(bytes)).await?;

            files.push(file);
            keys.push(key);
        }

        let copy_key_prefix = keys
            .first()
            .map(|key| strip_chunk_number(key.as_ref()).to_string())
            .unwrap_or_default();

        Ok(StagedBatch {
            files,
            keys,
            copy_key_prefix,
            rows,
            size_bytes,
        })
    }

    /// Deletes the uploaded objects of `batch`.
    pub async fn remove_objects(&self, batch: &StagedBatch) -> LoadResult<()> {
        for key in batch.keys() {
            debug!(key = %key, "deleting staged object");

            if let Err(err) = self.store.delete(key).await {
                return Err(load_error!(
                    ErrorKind::StorageDeleteFailed,
                    "Deleting staged object failed",
                    detail = key.to_string(),
                    source: err
                ));
            }
        }

        Ok(())
    }

    fn file_extension(&self) -> String {
        let compression = self
            .compression
            .map(|compression| compression.file_extension())
            .unwrap_or_default();

        format!(".csv{compression}")
    }

    /// Writes one chunk to a new temporary file on the blocking pool.
    ///
    /// Returns the file together with its content.
    async fn write_chunk(
        &self,
        stream: &str,
        records: Vec<Map<String, Value>>,
        columns: Arc<Vec<String>>,
        chunk_number: usize,
    ) -> LoadResult<(NamedTempFile, Vec<u8>)> {
        let prefix = format!("{stream}_");
        let suffix = format!("{}.{chunk_number}", self.file_extension());
        let temp_dir = self.temp_dir.clone();
        let compression = self.compression;

        let task = tokio::task::spawn_blocking(move || -> LoadResult<(NamedTempFile, Vec<u8>)> {
            let mut file = tempfile::Builder::new()
                .prefix(&prefix)
                .suffix(&suffix)
                .tempfile_in(&temp_dir)?;
            write_lines(file.as_file_mut(), &records, &columns, compression)?;

            let bytes = std::fs::read(file.path())?;

            Ok((file, bytes))
        });

        match task.await {
            Ok(result) => result,
            Err(err) => Err(load_error!(
                ErrorKind::IoError,
                "Writing staged file failed",
                err.to_string()
            )),
        }
    }
}

fn expand_home(path: &FsPath) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}

fn strip_chunk_number(key: &str) -> &str {
    key.rsplit_once('.').map_or(key, |(prefix, _)| prefix)
}
