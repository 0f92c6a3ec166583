//! TLS engine wrapper.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use crate::error::TlsError;
use crate::prelogin_framer::PreloginFramer;
use crate::settings::TlsSettings;

/// The TLS engine used by the connection pipeline.
///
/// Given a framed byte stream it performs a handshake and thereafter
/// encrypts and decrypts; everything else about the pipeline stays
/// outside.
pub struct TlsClient {
    settings: TlsSettings,
    connector: TlsConnector,
}

impl TlsClient {
    /// Build an engine from settings.
    pub fn new(settings: TlsSettings) -> Result<Self, TlsError> {
        let config = build_client_config(&settings)?;
        let connector = TlsConnector::from(Arc::new(config));
        Ok(Self {
            settings,
            connector,
        })
    }

    /// Run the TDS 7.x handshake: records travel inside prelogin packets
    /// until completion, after which the framer becomes a pass-through and
    /// the returned stream carries raw TLS records.
    pub async fn handshake_via_prelogin<S>(
        &self,
        framer: PreloginFramer<S>,
        host: &str,
    ) -> Result<TlsStream<PreloginFramer<S>>, TlsError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let host = self.settings.server_name.as_deref().unwrap_or(host);
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| TlsError::InvalidDnsName(host.to_string()))?;

        tracing::debug!(server_name = %host, "starting prelogin-framed TLS handshake");

        let mut stream = self
            .connector
            .connect(server_name, framer)
            .await
            .map_err(|e| TlsError::HandshakeFailed(e.to_string()))?;

        // Handshake records are no longer wrapped from here on.
        stream.get_mut().0.finish_handshake();

        tracing::debug!("TLS handshake completed, prelogin framing removed");

        Ok(stream)
    }
}

impl std::fmt::Debug for TlsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsClient")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

fn build_client_config(settings: &TlsSettings) -> Result<ClientConfig, TlsError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| TlsError::Configuration(e.to_string()))?;

    let config = if settings.trust_server_certificate {
        tracing::warn!(
            "server certificate validation is disabled; use only for development"
        );
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
            .with_no_client_auth()
    } else {
        builder
            .with_root_certificates(build_root_store(settings)?)
            .with_no_client_auth()
    };

    Ok(config)
}

fn build_root_store(settings: &TlsSettings) -> Result<RootCertStore, TlsError> {
    let mut roots = RootCertStore::empty();

    if settings.root_certificates.is_empty() {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    } else {
        for cert in &settings.root_certificates {
            roots
                .add(cert.clone())
                .map_err(|e| TlsError::InvalidCertificate(e.to_string()))?;
        }
    }

    Ok(roots)
}

/// Verifier that accepts any server certificate while still checking
/// handshake signatures. Installed only for `trust_server_certificate`.
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_build_an_engine() {
        assert!(TlsClient::new(TlsSettings::new()).is_ok());
    }

    #[test]
    fn trusting_settings_build_an_engine() {
        let settings = TlsSettings::new().trust_server_certificate(true);
        assert!(TlsClient::new(settings).is_ok());
    }
}
