use std::path::{Path, PathBuf};

use rust_cli_config::{Config, Environment, File};
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Prefix for environment variable configuration overrides.
const ENV_PREFIX: &str = "TARGET";

/// Separator between environment variable prefix and key segments.
const ENV_PREFIX_SEPARATOR: &str = "_";

/// Separator for nested configuration keys in environment variables.
const ENV_SEPARATOR: &str = "__";

/// Errors that can occur while loading the configuration file and overrides.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    /// The configuration file does not exist.
    #[error("configuration file `{0}` does not exist")]
    MissingConfigurationFile(PathBuf),

    /// The configuration file existed but could not be parsed, or overrides failed to merge.
    #[error("failed to load configuration from `{path}`: {source}")]
    ConfigurationFileLoad {
        path: PathBuf,
        #[source]
        source: rust_cli_config::ConfigError,
    },

    /// The configuration was parsed but deserialization into the target type failed.
    #[error("failed to deserialize configuration: {0}")]
    Deserialization(#[source] rust_cli_config::ConfigError),
}

/// Loads configuration from `path` and applies environment-variable overrides.
///
/// The file format is derived from its extension (`json`, `yaml`, `yml`). Overrides use the
/// `TARGET_` prefix, so `TARGET_BATCH_SIZE_ROWS=5000` replaces `batch_size_rows`. Nested keys use
/// double underscores (`TARGET_SCHEMA_MAPPING__SRC__TARGET_SCHEMA`).
pub fn load_config<T>(path: &Path) -> Result<T, LoadConfigError>
where
    T: DeserializeOwned,
{
    if !path.is_file() {
        return Err(LoadConfigError::MissingConfigurationFile(
            path.to_path_buf(),
        ));
    }

    let environment_source = Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true);

    let settings = Config::builder()
        .add_source(File::from(path))
        .add_source(environment_source)
        .build()
        .map_err(|source| LoadConfigError::ConfigurationFileLoad {
            path: path.to_path_buf(),
            source,
        })?;

    settings
        .try_deserialize::<T>()
        .map_err(LoadConfigError::Deserialization)
}
