use std::env;

use config::shared::StorageConfig;
use pg_escape::quote_literal;
use secrecy::{ExposeSecret, SecretString};

use crate::bail;
use crate::error::{ErrorKind, LoadResult};

/// Credentials the warehouse uses to read staged objects during `COPY`.
#[derive(Debug, Clone)]
pub enum CopyCredentials {
    /// IAM role assumed by the cluster.
    IamRole(String),
    /// Static access keys, optionally temporary.
    AccessKeys {
        access_key_id: String,
        secret_access_key: SecretString,
        session_token: Option<SecretString>,
    },
}

impl CopyCredentials {
    /// Resolves the credentials from the configuration.
    ///
    /// The copy role wins over static keys. Keys missing from the configuration are read from
    /// `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and `AWS_SESSION_TOKEN`.
    pub fn from_config(config: &StorageConfig) -> LoadResult<CopyCredentials> {
        if let Some(role_arn) = config
            .aws_redshift_copy_role_arn
            .as_deref()
            .filter(|arn| !arn.is_empty())
        {
            return Ok(CopyCredentials::IamRole(role_arn.to_string()));
        }

        let access_key_id = config
            .aws_access_key_id
            .clone()
            .or_else(|| env::var("AWS_ACCESS_KEY_ID").ok());
        let secret_access_key = config
            .aws_secret_access_key
            .clone()
            .or_else(|| env::var("AWS_SECRET_ACCESS_KEY").ok().map(SecretString::new));
        let session_token = config
            .aws_session_token
            .clone()
            .or_else(|| env::var("AWS_SESSION_TOKEN").ok().map(SecretString::new));

        match (access_key_id, secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => Ok(CopyCredentials::AccessKeys {
                access_key_id,
                secret_access_key,
                session_token,
            }),
            _ => bail!(
                ErrorKind::ConfigError,
                "No credentials available for the warehouse to read staged files",
                "Set 'aws_redshift_copy_role_arn' or 'aws_access_key_id' and 'aws_secret_access_key'"
            ),
        }
    }

    /// Renders the credentials clause of a `COPY` statement.
    ///
    /// Secrets are replaced by a placeholder when `redact` is set.
    pub fn to_sql(&self, redact: bool) -> String {
        let secret = |value: &SecretString| {
            if redact {
                "'<redacted>'".to_string()
            } else {
                quote_literal(value.expose_secret())
            }
        };

        match self {
            CopyCredentials::IamRole(role_arn) => format!("iam_role {}", quote_literal(role_arn)),
            CopyCredentials::AccessKeys {
                access_key_id,
                secret_access_key,
                session_token,
            } => {
                let mut clause = format!(
                    "ACCESS_KEY_ID {} SECRET_ACCESS_KEY {}",
                    quote_literal(access_key_id),
                    secret(secret_access_key)
                );
                if let Some(session_token) = session_token {
                    clause.push_str(&format!(" SESSION_TOKEN {}", secret(session_token)));
                }

                clause
            }
        }
    }
}
