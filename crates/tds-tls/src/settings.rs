//! TLS engine configuration.

use rustls::pki_types::CertificateDer;

/// Configuration for the TLS engine.
///
/// The default validates server certificates against the Mozilla root
/// store. `trust_server_certificate` disables validation entirely and is
/// meant for development against servers with self-signed certificates.
#[derive(Debug, Clone, Default)]
pub struct TlsSettings {
    /// Skip certificate validation.
    pub trust_server_certificate: bool,
    /// Custom root certificates; when empty the bundled web roots apply.
    pub root_certificates: Vec<CertificateDer<'static>>,
    /// Override the SNI name derived from the connection host.
    pub server_name: Option<String>,
}

impl TlsSettings {
    /// Create settings with secure defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Disable certificate validation.
    #[must_use]
    pub fn trust_server_certificate(mut self, trust: bool) -> Self {
        self.trust_server_certificate = trust;
        self
    }

    /// Add a trusted root certificate.
    #[must_use]
    pub fn add_root_certificate(mut self, cert: CertificateDer<'static>) -> Self {
        self.root_certificates.push(cert);
        self
    }

    /// Override the server name used for SNI and validation.
    #[must_use]
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }
}
