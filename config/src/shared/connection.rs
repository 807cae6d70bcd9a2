use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio_postgres::{Config as TokioPgConnectOptions, config::SslMode as TokioPgSslMode};

use crate::shared::ValidationError;

/// Static connection options applied to every warehouse session.
pub struct DefaultWarehouseConnectionOptions;

impl DefaultWarehouseConnectionOptions {
    /// Application name reported to the warehouse for every session.
    pub const APPLICATION_NAME: &'static str = "target-redshift";

    /// Returns the options as a string suitable for tokio-postgres options parameter.
    pub fn to_options_string() -> String {
        "-c datestyle=ISO -c client_encoding=UTF8".to_string()
    }
}

/// Connection settings for the warehouse.
///
/// All connection fields are optional at the deserialization level so that
/// [`crate::shared::TargetConfig::validate`] can report every missing key at once instead of
/// failing on the first one.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WarehouseConnectionConfig {
    /// Hostname of the warehouse cluster endpoint.
    #[serde(default)]
    pub host: Option<String>,
    /// Port the cluster listens on.
    #[serde(default)]
    pub port: Option<u16>,
    /// User used to authenticate.
    #[serde(default)]
    pub user: Option<String>,
    /// Password for the user. Redacted in debug output.
    #[serde(default)]
    pub password: Option<SecretString>,
    /// Database to connect to.
    #[serde(default)]
    pub dbname: Option<String>,
    /// Whether to connect using TLS.
    #[serde(default)]
    pub ssl: bool,
    /// PEM-encoded trusted root certificates used when `ssl` is enabled.
    #[serde(default)]
    pub trusted_root_certs: String,
}

impl WarehouseConnectionConfig {
    /// Returns the names of the required connection keys that are missing.
    pub fn missing_keys(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();

        if self.host.as_deref().is_none_or(str::is_empty) {
            missing.push("host");
        }
        if self.port.is_none() {
            missing.push("port");
        }
        if self.user.as_deref().is_none_or(str::is_empty) {
            missing.push("user");
        }
        if self
            .password
            .as_ref()
            .is_none_or(|password| password.expose_secret().is_empty())
        {
            missing.push("password");
        }
        if self.dbname.as_deref().is_none_or(str::is_empty) {
            missing.push("dbname");
        }

        missing
    }

    /// Validates TLS settings.
    pub fn validate_tls(&self) -> Result<(), ValidationError> {
        if self.ssl && self.trusted_root_certs.is_empty() {
            return Err(ValidationError::MissingTrustedRootCerts);
        }

        Ok(())
    }

    /// Builds tokio-postgres connect options for this warehouse.
    ///
    /// Missing optional fields are left unset; callers are expected to have validated the
    /// configuration first.
    pub fn connect_options(&self) -> TokioPgConnectOptions {
        let ssl_mode = if self.ssl {
            TokioPgSslMode::Require
        } else {
            TokioPgSslMode::Prefer
        };

        let mut config = TokioPgConnectOptions::new();
        config
            .options(DefaultWarehouseConnectionOptions::to_options_string())
            .application_name(DefaultWarehouseConnectionOptions::APPLICATION_NAME)
            .ssl_mode(ssl_mode);

        if let Some(host) = &self.host {
            config.host(host);
        }
        if let Some(port) = self.port {
            config.port(port);
        }
        if let Some(user) = &self.user {
            config.user(user);
        }
        if let Some(password) = &self.password {
            config.password(password.expose_secret());
        }
        if let Some(dbname) = &self.dbname {
            config.dbname(dbname);
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(json: &str) -> WarehouseConnectionConfig {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_options_string_format() {
        assert_eq!(
            DefaultWarehouseConnectionOptions::to_options_string(),
            "-c datestyle=ISO -c client_encoding=UTF8"
        );
    }

    #[test]
    fn test_missing_keys_lists_every_absent_field() {
        let config = connection(r#"{"host": "", "user": "loader"}"#);

        assert_eq!(
            config.missing_keys(),
            vec!["host", "port", "password", "dbname"]
        );
    }

    #[test]
    fn test_connect_options_carry_fields() {
        let config = connection(
            r#"{"host": "cluster", "port": 5439, "user": "u", "password": "p", "dbname": "dev"}"#,
        );

        let options = config.connect_options();

        assert_eq!(options.get_user(), Some("u"));
        assert_eq!(options.get_dbname(), Some("dev"));
        assert_eq!(options.get_ports(), &[5439]);
    }

    #[test]
    fn test_tls_requires_certificates() {
        let config = connection(r#"{"ssl": true}"#);

        assert!(matches!(
            config.validate_tls(),
            Err(ValidationError::MissingTrustedRootCerts)
        ));
    }
}
