use std::sync::Arc;

use config::shared::StorageConfig;
use object_store::aws::AmazonS3Builder;
use object_store::{ObjectStore, RetryConfig};
use secrecy::ExposeSecret;
use tracing::warn;

use crate::bail;
use crate::error::{ErrorKind, LoadResult};

/// Builds the S3 store receiving staged files.
///
/// Settings missing from the configuration are taken from the standard `AWS_*` environment
/// variables.
pub fn build_s3_store(config: &StorageConfig) -> LoadResult<Arc<dyn ObjectStore>> {
    let Some(bucket) = config.s3_bucket.as_deref() else {
        bail!(
            ErrorKind::ConfigError,
            "Required key is missing from config",
            "s3_bucket"
        );
    };

    let mut builder = AmazonS3Builder::from_env()
        .with_bucket_name(bucket)
        .with_retry(RetryConfig::default());

    if let Some(region) = &config.s3_region {
        builder = builder.with_region(region);
    }

    if let Some(endpoint) = &config.s3_endpoint {
        builder = builder
            .with_endpoint(endpoint)
            .with_virtual_hosted_style_request(false)
            .with_allow_http(true);
    }

    if let Some(access_key_id) = &config.aws_access_key_id {
        builder = builder.with_access_key_id(access_key_id);
    }
    if let Some(secret_access_key) = &config.aws_secret_access_key {
        builder = builder.with_secret_access_key(secret_access_key.expose_secret());
    }
    if let Some(session_token) = &config.aws_session_token {
        builder = builder.with_token(session_token.expose_secret());
    }

    if let Some(acl) = &config.s3_acl {
        warn!(
            acl = %acl,
            "'s3_acl' is not supported, objects are uploaded with the bucket default ACL"
        );
    }
    if let Some(profile) = &config.aws_profile {
        warn!(
            profile = %profile,
            "'aws_profile' is not supported, use static keys or environment credentials"
        );
    }

    match builder.build() {
        Ok(store) => Ok(Arc::new(store)),
        Err(err) => bail!(
            ErrorKind::ConfigError,
            "Invalid object storage configuration",
            err.to_string(),
            source: err
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_bucket_is_rejected() {
        let config: StorageConfig = serde_json::from_str("{}").unwrap();

        let err = build_s3_store(&config).err().unwrap();

        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }

    #[test]
    fn test_store_with_custom_endpoint() {
        let config: StorageConfig = serde_json::from_str(
            r#"{"s3_bucket": "bucket", "s3_region": "us-east-1",
                "s3_endpoint": "http://localhost:9000",
                "aws_access_key_id": "id", "aws_secret_access_key": "secret"}"#,
        )
        .unwrap();

        assert!(build_s3_store(&config).is_ok());
    }
}
