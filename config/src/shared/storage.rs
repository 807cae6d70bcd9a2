use secrecy::SecretString;
use serde::Deserialize;

/// Codec applied to staged files before upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Gzip,
    Bzip2,
}

impl Compression {
    /// File extension appended after `.csv` for this codec.
    pub fn file_extension(&self) -> &'static str {
        match self {
            Compression::Gzip => ".gz",
            Compression::Bzip2 => ".bz2",
        }
    }

    /// Keyword understood by the warehouse bulk loader for this codec.
    pub fn copy_keyword(&self) -> &'static str {
        match self {
            Compression::Gzip => "GZIP",
            Compression::Bzip2 => "BZIP2",
        }
    }
}

/// Object storage settings used to stage files for the bulk loader.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StorageConfig {
    /// Bucket that receives the staged files.
    #[serde(default)]
    pub s3_bucket: Option<String>,
    /// Prefix prepended to every staged object key.
    #[serde(default)]
    pub s3_key_prefix: String,
    /// Canned ACL applied to uploaded objects.
    #[serde(default)]
    pub s3_acl: Option<String>,
    /// Region of the bucket. Falls back to the environment when absent.
    #[serde(default)]
    pub s3_region: Option<String>,
    /// Custom endpoint for S3-compatible stores.
    #[serde(default)]
    pub s3_endpoint: Option<String>,
    /// Static access key id. Falls back to `AWS_ACCESS_KEY_ID`.
    #[serde(default)]
    pub aws_access_key_id: Option<String>,
    /// Static secret access key. Falls back to `AWS_SECRET_ACCESS_KEY`.
    #[serde(default)]
    pub aws_secret_access_key: Option<SecretString>,
    /// Session token for temporary credentials. Falls back to `AWS_SESSION_TOKEN`.
    #[serde(default)]
    pub aws_session_token: Option<SecretString>,
    /// Named profile used when no static keys are configured.
    #[serde(default)]
    pub aws_profile: Option<String>,
    /// IAM role the warehouse assumes when reading staged files. Preferred over static keys.
    #[serde(default)]
    pub aws_redshift_copy_role_arn: Option<String>,
}
