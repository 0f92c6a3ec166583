//! TLS error types.

use thiserror::Error;

/// Errors from the TLS engine and its configuration.
#[derive(Debug, Error)]
pub enum TlsError {
    /// The handshake was rejected or interrupted.
    #[error("TLS handshake failed: {0}")]
    HandshakeFailed(String),

    /// The host string is not a valid DNS name for SNI.
    #[error("invalid DNS name: {0}")]
    InvalidDnsName(String),

    /// A configured certificate could not be loaded.
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    /// The engine configuration is unusable.
    #[error("TLS configuration error: {0}")]
    Configuration(String),

    /// IO error during TLS operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error surfaced by rustls.
    #[error("rustls error: {0}")]
    Rustls(#[from] rustls::Error),
}
