//! Connection configuration.

use tds_tls::TlsSettings;
use tds_wire::{DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE, MIN_PACKET_SIZE};

/// Configuration for a connection pipeline.
///
/// The pipeline does not open sockets; the host is carried only for TLS
/// server-name indication. When `tls` is absent, a request asking for the
/// upgrade fails with a protocol error.
#[derive(Debug, Clone)]
pub struct Config {
    /// Host name, used for SNI during the TLS upgrade.
    pub host: String,
    /// Negotiated packet size, clamped to 512..=32767.
    pub packet_size: usize,
    /// TLS engine configuration; absent means encryption is unavailable.
    pub tls: Option<TlsSettings>,
}

impl Config {
    /// Create a configuration for the given host.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            packet_size: DEFAULT_PACKET_SIZE,
            tls: None,
        }
    }

    /// Set the packet size, clamped to the protocol's negotiable range.
    #[must_use]
    pub fn packet_size(mut self, size: usize) -> Self {
        self.packet_size = size.clamp(MIN_PACKET_SIZE, MAX_PACKET_SIZE);
        self
    }

    /// Provide a TLS configuration, enabling the in-band upgrade.
    #[must_use]
    pub fn with_tls(mut self, tls: TlsSettings) -> Self {
        self.tls = Some(tls);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::new("db.example.com");
        assert_eq!(config.packet_size, DEFAULT_PACKET_SIZE);
        assert!(config.tls.is_none());
    }

    #[test]
    fn packet_size_is_clamped() {
        assert_eq!(Config::new("h").packet_size(64).packet_size, 512);
        assert_eq!(Config::new("h").packet_size(100_000).packet_size, 32767);
        assert_eq!(Config::new("h").packet_size(8192).packet_size, 8192);
    }
}
