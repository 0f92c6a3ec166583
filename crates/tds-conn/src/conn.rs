//! The connection driver and its submission handle.
//!
//! One task per connection owns the transport, the request queue, the
//! state machine, and (after the upgrade) the TLS engine. Requests are
//! submitted over a channel and serialized strictly one-in-flight: the
//! head of the queue is the only request whose delegate sees inbound
//! packets, and its completion is signalled before the next request
//! starts.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::{SinkExt, StreamExt};
use tds_tls::{PreloginFramer, TlsClient, TlsStream};
use tds_wire::{Packet, PacketCodec, PacketStream, PacketType, WireError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::request::{Request, RequestContext};
use crate::state::ConnectionState;

/// Handle to a running connection pipeline.
///
/// Cloneable; submissions from any task are serialized in channel-arrival
/// order. Dropping every handle closes the connection.
#[derive(Debug, Clone)]
pub struct Connection {
    tx: mpsc::UnboundedSender<Command>,
}

enum Command {
    Submit(RequestContext),
    Close,
}

impl Connection {
    /// Attach a pipeline to a connected duplex transport and spawn its
    /// driver task.
    pub fn spawn<T>(transport: T, config: Config) -> Self
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let codec = PacketCodec::with_packet_size(config.packet_size);
        let driver = Driver {
            transport: Transport::Plain(PacketStream::with_codec(transport, codec)),
            rx,
            queue: VecDeque::new(),
            active: None,
            state: ConnectionState::Start,
            config,
        };
        tokio::spawn(driver.run());
        Self { tx }
    }

    /// Submit a request.
    ///
    /// The returned handle resolves exactly once: with `Ok(())` when the
    /// delegate signals the end of its exchange, or with the first error
    /// encountered. Submitting to a closed connection fails with
    /// [`Error::ConnectionClosed`].
    pub fn submit(&self, request: Box<dyn Request>) -> Completion {
        let (ctx, rx) = RequestContext::new(request);
        if let Err(rejected) = self.tx.send(Command::Submit(ctx)) {
            if let Command::Submit(ctx) = rejected.0 {
                ctx.fail(Error::ConnectionClosed);
            }
        }
        Completion { rx }
    }

    /// Close the connection, failing every queued request. Idempotent.
    pub fn close(&self) {
        let _ = self.tx.send(Command::Close);
    }
}

/// One-shot completion handle for a submitted request.
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<Result<()>>,
}

impl Future for Completion {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx).poll(cx).map(|r| match r {
            Ok(outcome) => outcome,
            // Driver dropped without resolving; treat as a close.
            Err(_) => Err(Error::ConnectionClosed),
        })
    }
}

/// The transport in its two pipeline layouts, plus the detached state
/// used while the layout is being rebuilt and after close.
enum Transport<T> {
    Plain(PacketStream<T>),
    Tls(PacketStream<TlsStream<PreloginFramer<T>>>),
    Detached,
}

impl<T> Transport<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    async fn next_packet(&mut self) -> Option<std::result::Result<Packet, WireError>> {
        match self {
            Self::Plain(stream) => stream.next().await,
            Self::Tls(stream) => stream.next().await,
            // Nothing will ever arrive; the driver is shutting down.
            Self::Detached => std::future::pending().await,
        }
    }

    async fn send_all(&mut self, packets: Vec<Packet>) -> std::result::Result<(), WireError> {
        match self {
            Self::Plain(stream) => {
                for packet in packets {
                    stream.feed(packet).await?;
                }
                stream.flush().await
            }
            Self::Tls(stream) => {
                for packet in packets {
                    stream.feed(packet).await?;
                }
                stream.flush().await
            }
            Self::Detached => Err(WireError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "transport detached",
            ))),
        }
    }
}

struct Driver<T> {
    transport: Transport<T>,
    rx: mpsc::UnboundedReceiver<Command>,
    queue: VecDeque<RequestContext>,
    active: Option<RequestContext>,
    state: ConnectionState,
    config: Config,
}

impl<T> Driver<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    async fn run(mut self) {
        loop {
            if self.active.is_none() && !self.start_next().await {
                return;
            }

            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(Command::Submit(ctx)) => self.queue.push_back(ctx),
                    Some(Command::Close) | None => {
                        self.shutdown(None);
                        return;
                    }
                },
                inbound = self.transport.next_packet() => match inbound {
                    Some(Ok(packet)) => {
                        if !self.dispatch(packet).await {
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        self.shutdown(Some(e.into()));
                        return;
                    }
                    None => {
                        self.shutdown(None);
                        return;
                    }
                },
            }
        }
    }

    /// Start queued requests until one is in flight. Returns `false` when
    /// the connection had to shut down.
    async fn start_next(&mut self) -> bool {
        while self.active.is_none() {
            let Some(mut ctx) = self.queue.pop_front() else {
                return true;
            };

            tracing::debug!(request = ctx.request.describe(), "starting request");

            match ctx.request.start() {
                Ok(packets) => {
                    for packet in &packets {
                        self.advance(self.state.after_outbound(packet.header.packet_type));
                    }
                    if let Err(e) = self.transport.send_all(packets).await {
                        ctx.fail(e.into());
                        self.shutdown(None);
                        return false;
                    }
                    self.active = Some(ctx);
                }
                Err(e) => {
                    ctx.fail(e);
                    self.shutdown(None);
                    return false;
                }
            }
        }
        true
    }

    /// Deliver one inbound packet. Returns `false` when the connection
    /// had to shut down.
    async fn dispatch(&mut self, packet: Packet) -> bool {
        let Some(mut ctx) = self.active.take() else {
            // No unsolicited server packets exist in the covered states;
            // dropping is defensive. Environment-change traffic landing
            // here is visible at trace level.
            tracing::trace!(
                packet_type = ?packet.header.packet_type,
                "discarding inbound packet with no active request"
            );
            return true;
        };

        self.advance(self.state.after_inbound(packet.header.packet_type));

        match ctx.request.respond(packet) {
            Ok(None) => {
                tracing::debug!(request = ctx.request.describe(), "request complete");
                ctx.finish();
                true
            }
            Ok(Some(packets))
                if packets
                    .first()
                    .is_some_and(|p| p.header.packet_type == PacketType::SslKickoff) =>
            {
                match self.negotiate_tls().await {
                    Ok(()) => {
                        self.advance(ConnectionState::SslHandshakeComplete);
                        tracing::debug!(
                            request = ctx.request.describe(),
                            "request complete after TLS upgrade"
                        );
                        ctx.finish();
                        true
                    }
                    Err(e) => {
                        ctx.fail(e);
                        self.shutdown(None);
                        false
                    }
                }
            }
            Ok(Some(packets)) => {
                if packets.is_empty() {
                    self.active = Some(ctx);
                    return true;
                }
                match self.transport.send_all(packets).await {
                    Ok(()) => {
                        self.active = Some(ctx);
                        true
                    }
                    Err(e) => {
                        ctx.fail(e.into());
                        self.shutdown(None);
                        false
                    }
                }
            }
            Err(e) => {
                // Recorded on the context so the completion carries it;
                // every error kind is fatal for the connection.
                ctx.last_error = Some(e);
                ctx.finish();
                self.shutdown(None);
                false
            }
        }
    }

    /// Rebuild the pipeline around the TLS engine.
    ///
    /// The plaintext framed stream is dismantled with its read buffer
    /// intact, the prelogin framer carries the handshake, and fresh codec
    /// instances are installed above the TLS stream. Any failure leaves
    /// the connection closing; partial layouts are never observable
    /// because this driver task is the only reader.
    async fn negotiate_tls(&mut self) -> Result<()> {
        if !self.state.may_negotiate_tls() {
            return Err(Error::Protocol(format!(
                "TLS upgrade is not permitted in state {:?}",
                self.state
            )));
        }
        let Some(settings) = self.config.tls.clone() else {
            return Err(Error::Protocol(
                "Encryption was requested but a TLS Configuration was not provided.".into(),
            ));
        };

        self.advance(ConnectionState::SslHandshakeStarted);

        let transport = std::mem::replace(&mut self.transport, Transport::Detached);
        let Transport::Plain(stream) = transport else {
            return Err(Error::Protocol("TLS is already active".into()));
        };

        let parts = stream.into_parts();
        let mut framer = PreloginFramer::new(parts.io);
        if !parts.read_buf.is_empty() {
            framer.prime(parts.read_buf);
        }

        let engine = TlsClient::new(settings)?;
        let tls_stream = engine
            .handshake_via_prelogin(framer, &self.config.host)
            .await?;

        let codec = PacketCodec::with_packet_size(self.config.packet_size);
        self.transport = Transport::Tls(PacketStream::with_codec(tls_stream, codec));
        Ok(())
    }

    fn advance(&mut self, next: ConnectionState) {
        if self.state.advance_to(next) {
            tracing::debug!(state = ?self.state, "connection state advanced");
        }
    }

    /// Fail everything still queued and drop the transport.
    ///
    /// The active request fails with `error` when one is given (the
    /// originating failure), otherwise with `ConnectionClosed`; pending
    /// requests always fail with `ConnectionClosed`. Each context resolves
    /// its completion exactly once by construction.
    fn shutdown(&mut self, error: Option<Error>) {
        tracing::debug!(pending = self.queue.len(), "closing connection");

        if let Some(ctx) = self.active.take() {
            ctx.fail(error.unwrap_or(Error::ConnectionClosed));
        } else if let Some(e) = error {
            tracing::debug!(error = %e, "transport failed with no active request");
        }

        for ctx in self.queue.drain(..) {
            ctx.fail(Error::ConnectionClosed);
        }

        // Reject submissions already sitting in the channel, then stop
        // accepting new ones.
        self.rx.close();
        while let Ok(command) = self.rx.try_recv() {
            if let Command::Submit(ctx) = command {
                ctx.fail(Error::ConnectionClosed);
            }
        }

        self.transport = Transport::Detached;
    }
}
