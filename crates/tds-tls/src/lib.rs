//! # tds-tls
//!
//! TLS layer for the TDS connection pipeline.
//!
//! TDS 7.x negotiates encryption inside the prelogin exchange: the TLS
//! handshake records themselves are carried as prelogin packet payloads.
//! After the handshake, packet framing happens above the TLS layer and
//! packets travel as application data.
//!
//! ```text
//! handshake window:   TLS record ⇄ [prelogin packet] ⇄ TCP
//! after handshake:    TDS packet ⇄ TLS record ⇄ TCP
//! ```
//!
//! [`PreloginFramer`] implements the handshake-window framing;
//! [`TlsClient`] owns the rustls engine and drives the handshake.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod error;
pub mod prelogin_framer;
pub mod settings;

pub use client::TlsClient;
pub use error::TlsError;
pub use prelogin_framer::PreloginFramer;
pub use settings::TlsSettings;

// Re-export the stream type the pipeline ends up holding.
pub use tokio_rustls::client::TlsStream;
