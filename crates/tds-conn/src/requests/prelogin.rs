//! Prelogin request: the opening exchange, including the decision to
//! upgrade to TLS.

use tds_wire::{EncryptionLevel, Packet, PacketType, Prelogin};

use crate::error::{Error, Result};
use crate::request::Request;

/// Drives the prelogin exchange.
///
/// Sends the client option table and negotiates encryption from the
/// server's answer. When the negotiated level demands TLS, `respond`
/// returns the kickoff sentinel so the dispatcher installs the engine;
/// otherwise the request completes and the connection stays cleartext.
#[derive(Debug)]
pub struct PreloginRequest {
    encryption: EncryptionLevel,
    instance: Option<String>,
}

impl PreloginRequest {
    /// Create a prelogin request advertising the given encryption level.
    #[must_use]
    pub fn new(encryption: EncryptionLevel) -> Self {
        Self {
            encryption,
            instance: None,
        }
    }

    /// Target a named instance.
    #[must_use]
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }
}

impl Request for PreloginRequest {
    fn start(&mut self) -> Result<Vec<Packet>> {
        let mut prelogin = Prelogin::new(self.encryption);
        if let Some(ref instance) = self.instance {
            prelogin = prelogin.with_instance(instance.clone());
        }
        Ok(vec![Packet::single(PacketType::PreLogin, prelogin.encode())])
    }

    fn respond(&mut self, packet: Packet) -> Result<Option<Vec<Packet>>> {
        let response = Prelogin::decode(&packet.payload[..])
            .map_err(|e| Error::Protocol(e.to_string()))?;

        tracing::debug!(
            client = ?self.encryption,
            server = ?response.encryption,
            "negotiating encryption"
        );

        match (self.encryption, response.encryption) {
            // Both sides opt out: the connection stays cleartext.
            (EncryptionLevel::NotSupported, EncryptionLevel::NotSupported) => Ok(None),
            // The client insists and the server cannot deliver.
            (
                EncryptionLevel::On | EncryptionLevel::Required,
                EncryptionLevel::Off | EncryptionLevel::NotSupported,
            ) => Err(Error::Protocol(
                "server does not support the requested encryption level".into(),
            )),
            // Every other combination encrypts at least the login.
            _ => Ok(Some(vec![Packet::ssl_kickoff()])),
        }
    }

    fn describe(&self) -> &'static str {
        "prelogin"
    }
}
