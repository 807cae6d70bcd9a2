use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// One or more problems were found; every problem is listed.
    #[error("Invalid configuration:\n   * {}", .0.join("\n   * "))]
    Invalid(Vec<String>),
    /// TLS is enabled but no trusted root certificates are provided.
    #[error("Invalid TLS config: `trusted_root_certs` must be set when `ssl` is true")]
    MissingTrustedRootCerts,
}
