//! Scripted TDS server for pipeline tests.
//!
//! Speaks the packet layer only: it answers prelogin with a configurable
//! encryption level, acknowledges LOGIN7 with an opaque tabular-result
//! message, and either echoes or deliberately ignores batch requests.
//! Token-level fidelity is out of scope; the pipeline under test never
//! interprets payloads.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use tds_wire::prelogin::TDS_VERSION_7_4;
use tds_wire::{
    EncryptionLevel, PACKET_HEADER_LEN, PacketHeader, PacketStatus, PacketType,
};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

/// Error type for the mock server.
#[derive(Debug, Error)]
pub enum MockServerError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The client sent something the script does not expect.
    #[error("script violation: {0}")]
    Script(String),
}

/// Result alias for mock server operations.
pub type Result<T> = std::result::Result<T, MockServerError>;

/// How the server treats batch-style requests after login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchBehavior {
    /// Answer every message with one end-of-message tabular result.
    #[default]
    Respond,
    /// Read messages and never answer, leaving the client waiting.
    Stall,
}

/// Scripted behavior for accepted connections.
#[derive(Debug, Clone)]
pub struct ServerScript {
    /// Encryption level announced in the prelogin response.
    pub encryption: EncryptionLevel,
    /// Batch handling after the handshake.
    pub batch: BatchBehavior,
    /// Send one unsolicited packet immediately after accepting, before
    /// the client has sent anything.
    pub unsolicited_greeting: bool,
}

impl Default for ServerScript {
    fn default() -> Self {
        Self {
            encryption: EncryptionLevel::NotSupported,
            batch: BatchBehavior::Respond,
            unsolicited_greeting: false,
        }
    }
}

/// Builder for [`MockServer`].
#[derive(Debug, Default)]
pub struct MockServerBuilder {
    script: ServerScript,
}

impl MockServerBuilder {
    /// Create a builder with the default script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the announced encryption level.
    #[must_use]
    pub fn encryption(mut self, level: EncryptionLevel) -> Self {
        self.script.encryption = level;
        self
    }

    /// Set the batch handling behavior.
    #[must_use]
    pub fn batch(mut self, behavior: BatchBehavior) -> Self {
        self.script.batch = behavior;
        self
    }

    /// Send an unsolicited packet on accept.
    #[must_use]
    pub fn unsolicited_greeting(mut self, enabled: bool) -> Self {
        self.script.unsolicited_greeting = enabled;
        self
    }

    /// Bind a listener and start serving.
    pub async fn build(self) -> Result<MockServer> {
        MockServer::start(self.script).await
    }
}

/// A mock TDS server bound to a local port.
#[derive(Debug)]
pub struct MockServer {
    addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
}

impl MockServer {
    /// Create a builder.
    #[must_use]
    pub fn builder() -> MockServerBuilder {
        MockServerBuilder::new()
    }

    /// Start serving the given script on an ephemeral port.
    pub async fn start(script: ServerScript) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let script = Arc::new(script);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, _peer)) => {
                            let script = Arc::clone(&script);
                            // Stopping the server also hangs up live
                            // connections, not just the listener.
                            let mut hangup = shutdown_rx.resubscribe();
                            tokio::spawn(async move {
                                tokio::select! {
                                    served = serve_connection(stream, &script) => {
                                        if let Err(e) = served {
                                            tracing::debug!(error = %e, "mock connection ended");
                                        }
                                    }
                                    _ = hangup.recv() => {}
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "mock accept failed");
                            break;
                        }
                    },
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Ok(Self { addr, shutdown_tx })
    }

    /// Address the server is listening on.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Open a client connection to the server.
    pub async fn connect(&self) -> Result<TcpStream> {
        Ok(TcpStream::connect(self.addr).await?)
    }

    /// Stop accepting connections.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A message read from the client: type plus reassembled payload.
#[derive(Debug)]
struct ClientMessage {
    packet_type: PacketType,
    #[allow(dead_code)]
    payload: BytesMut,
}

async fn serve_connection(mut stream: TcpStream, script: &ServerScript) -> Result<()> {
    if script.unsolicited_greeting {
        // Nothing in the covered protocol states expects this; the
        // pipeline should drop it on the floor.
        write_message(&mut stream, PacketType::TabularResult, &[0xE3, 0x00]).await?;
    }

    // Prelogin exchange.
    let Some(message) = read_message(&mut stream).await? else {
        return Ok(());
    };
    if message.packet_type != PacketType::PreLogin {
        return Err(MockServerError::Script(format!(
            "expected prelogin first, got {:?}",
            message.packet_type
        )));
    }
    let response = prelogin_response(script.encryption);
    write_message(&mut stream, PacketType::PreLogin, &response).await?;

    // Login and everything after.
    loop {
        let Some(message) = read_message(&mut stream).await? else {
            return Ok(());
        };

        match message.packet_type {
            PacketType::Tds7Login => {
                // Opaque login acknowledgement; the pipeline treats the
                // final packet of any tabular result as terminal.
                write_message(&mut stream, PacketType::TabularResult, &[0xAD, 0x00, 0xFD])
                    .await?;
            }
            PacketType::Attention => {
                write_message(&mut stream, PacketType::TabularResult, &[0xFD, 0x20]).await?;
            }
            _ => match script.batch {
                BatchBehavior::Respond => {
                    write_message(&mut stream, PacketType::TabularResult, &[0xFD, 0x00]).await?;
                }
                BatchBehavior::Stall => {
                    tracing::debug!(
                        packet_type = ?message.packet_type,
                        "stalling on client message"
                    );
                }
            },
        }
    }
}

/// Read one complete message, reassembling multi-packet bodies.
async fn read_message(stream: &mut TcpStream) -> Result<Option<ClientMessage>> {
    let mut payload = BytesMut::new();
    let mut message_type = None;

    loop {
        let mut header_buf = [0u8; PACKET_HEADER_LEN];
        match stream.read_exact(&mut header_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof && message_type.is_none() => {
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }

        let mut cursor = &header_buf[..];
        let header = PacketHeader::decode(&mut cursor)
            .map_err(|e| MockServerError::Script(e.to_string()))?;

        let mut body = vec![0u8; header.payload_len()];
        if !body.is_empty() {
            stream.read_exact(&mut body).await?;
        }

        message_type.get_or_insert(header.packet_type);
        payload.extend_from_slice(&body);

        if header.is_end_of_message() {
            let packet_type = message_type.unwrap_or(header.packet_type);
            return Ok(Some(ClientMessage {
                packet_type,
                payload,
            }));
        }
    }
}

/// Write a single-packet message.
async fn write_message(
    stream: &mut TcpStream,
    packet_type: PacketType,
    payload: &[u8],
) -> Result<()> {
    let total = PACKET_HEADER_LEN + payload.len();
    let header = PacketHeader {
        packet_type,
        status: PacketStatus::END_OF_MESSAGE,
        length: total as u16,
        spid: 0,
        packet_id: 1,
        window: 0,
    };

    let mut buf = BytesMut::with_capacity(total);
    header.encode(&mut buf);
    buf.extend_from_slice(payload);

    stream.write_all(&buf).await?;
    stream.flush().await?;
    Ok(())
}

/// Build a prelogin response payload: version and encryption options.
fn prelogin_response(encryption: EncryptionLevel) -> Vec<u8> {
    let mut buf = BytesMut::new();

    // Option table: two entries of 5 bytes plus the terminator.
    let table_len: u16 = 11;

    buf.put_u8(0x00); // VERSION
    buf.put_u16(table_len);
    buf.put_u16(6);

    buf.put_u8(0x01); // ENCRYPTION
    buf.put_u16(table_len + 6);
    buf.put_u16(1);

    buf.put_u8(0xFF); // terminator

    buf.put_u32(TDS_VERSION_7_4);
    buf.put_u16_le(0); // sub-build

    buf.put_u8(encryption as u8);

    buf.to_vec()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tds_wire::Prelogin;

    #[tokio::test]
    async fn server_starts_on_ephemeral_port() {
        let server = MockServer::builder().build().await.unwrap();
        assert_ne!(server.addr().port(), 0);
    }

    #[tokio::test]
    async fn prelogin_exchange_round_trips() {
        let server = MockServer::builder()
            .encryption(EncryptionLevel::Required)
            .build()
            .await
            .unwrap();

        let mut stream = server.connect().await.unwrap();
        let request = Prelogin::new(EncryptionLevel::On).encode();
        write_message(&mut stream, PacketType::PreLogin, &request)
            .await
            .unwrap();

        let message = read_message(&mut stream).await.unwrap().unwrap();
        assert_eq!(message.packet_type, PacketType::PreLogin);

        let decoded = Prelogin::decode(&message.payload[..]).unwrap();
        assert_eq!(decoded.encryption, EncryptionLevel::Required);
        assert_eq!(decoded.version, TDS_VERSION_7_4);
    }

    #[test]
    fn prelogin_response_payload_decodes() {
        let payload = prelogin_response(EncryptionLevel::NotSupported);
        let decoded = Prelogin::decode(&payload[..]).unwrap();
        assert_eq!(decoded.encryption, EncryptionLevel::NotSupported);
    }
}
