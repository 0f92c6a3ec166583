//! Framed packet stream over an async transport.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::BytesMut;
use futures_core::Stream;
use futures_util::Sink;
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, FramedParts};

use crate::codec::PacketCodec;
use crate::error::WireError;
use crate::packet::Packet;

pin_project! {
    /// A bidirectional packet stream over an async transport.
    ///
    /// `into_parts` surrenders the transport together with any bytes the
    /// decoder had already pulled off the wire, which is what makes the
    /// TLS codec swap lossless.
    pub struct PacketStream<T> {
        #[pin]
        inner: Framed<T, PacketCodec>,
    }
}

impl<T> PacketStream<T>
where
    T: AsyncRead + AsyncWrite,
{
    /// Create a stream with the default codec.
    pub fn new(transport: T) -> Self {
        Self {
            inner: Framed::new(transport, PacketCodec::new()),
        }
    }

    /// Create a stream with a specific codec instance.
    pub fn with_codec(transport: T, codec: PacketCodec) -> Self {
        Self {
            inner: Framed::new(transport, codec),
        }
    }

    /// Reference to the codec.
    pub fn codec(&self) -> &PacketCodec {
        self.inner.codec()
    }

    /// Mutable reference to the codec.
    pub fn codec_mut(&mut self) -> &mut PacketCodec {
        self.inner.codec_mut()
    }

    /// Bytes read from the transport but not yet decoded.
    pub fn read_buffer(&self) -> &BytesMut {
        self.inner.read_buffer()
    }

    /// Dismantle the stream into transport, codec, and buffers.
    pub fn into_parts(self) -> FramedParts<T, PacketCodec> {
        self.inner.into_parts()
    }
}

impl<T> Stream for PacketStream<T>
where
    T: AsyncRead + Unpin,
{
    type Item = Result<Packet, WireError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }
}

impl<T> Sink<Packet> for PacketStream<T>
where
    T: AsyncWrite + Unpin,
{
    type Error = WireError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_ready(cx)
    }

    fn start_send(self: Pin<&mut Self>, item: Packet) -> Result<(), Self::Error> {
        self.project().inner.start_send(item)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_close(cx)
    }
}

impl<T> std::fmt::Debug for PacketStream<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketStream")
            .field("transport", self.inner.get_ref())
            .finish()
    }
}
