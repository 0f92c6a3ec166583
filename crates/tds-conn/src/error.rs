//! Connection error taxonomy.

use std::sync::Arc;

use thiserror::Error;

/// Errors surfaced through a request's completion handle.
///
/// Every kind here is fatal for the connection: a protocol violation,
/// a rejected TLS handshake, or a transport failure leaves the stream in
/// an unknown framing state, and a closed channel is terminal by
/// definition.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed frame, illegal state transition, or TLS requested
    /// without configuration.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The channel closed while requests were in flight.
    #[error("connection closed")]
    ConnectionClosed,

    /// The TLS engine rejected the handshake or a record.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Underlying IO failure (wrapped in `Arc` so contexts can share it).
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),
}

impl From<tds_wire::WireError> for Error {
    fn from(e: tds_wire::WireError) -> Self {
        match e {
            tds_wire::WireError::Io(io) => Error::Io(Arc::new(io)),
            other => Error::Protocol(other.to_string()),
        }
    }
}

impl From<tds_tls::TlsError> for Error {
    fn from(e: tds_tls::TlsError) -> Self {
        Error::Tls(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(Arc::new(e))
    }
}

impl Error {
    /// Whether this error means the channel is gone.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosed)
    }

    /// Whether this error reports a protocol violation.
    #[must_use]
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }
}

/// Result alias for connection operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_errors_map_to_protocol() {
        let err: Error = tds_wire::WireError::InvalidPacketType(0x99).into();
        assert!(err.is_protocol());
    }

    #[test]
    fn wire_io_errors_map_to_io() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err: Error = tds_wire::WireError::Io(io).into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn closed_classifier() {
        assert!(Error::ConnectionClosed.is_closed());
        assert!(!Error::Protocol("x".into()).is_closed());
    }
}
