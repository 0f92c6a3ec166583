//! Prelogin framing for the TLS handshake window.
//!
//! TDS 7.x carries the TLS handshake inside prelogin packets: every client
//! handshake record travels as the payload of a prelogin packet, and every
//! server record arrives the same way. Once the handshake completes the
//! packet framing moves above the TLS layer and this adapter becomes a
//! transparent pass-through.

use std::cmp;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// TDS packet header size.
const HEADER_LEN: usize = 8;

/// Packet type byte for prelogin.
const PRELOGIN_TYPE: u8 = 0x12;

/// Status byte for end of message.
const STATUS_EOM: u8 = 0x01;

/// Stream adapter that frames TLS records as prelogin packets while the
/// handshake is pending.
///
/// Outbound: handshake bytes are buffered and flushed as one prelogin
/// packet with `END_OF_MESSAGE` set. Inbound: prelogin packet headers are
/// stripped so the TLS engine sees raw records.
///
/// The adapter can be primed with bytes a packet codec had already pulled
/// off the wire, so swapping the codec out for the handshake loses
/// nothing.
pub struct PreloginFramer<S> {
    stream: S,
    handshaking: bool,

    // Wire bytes drained from a codec buffer before the swap; always
    // served before the underlying stream.
    primed: BytesMut,

    // Inbound state: partially read header, then payload countdown.
    header: [u8; HEADER_LEN],
    header_filled: usize,
    payload_remaining: usize,

    // Outbound state: header placeholder followed by buffered records.
    out_buf: Vec<u8>,
    out_pos: usize,
    out_framed: bool,
}

impl<S> PreloginFramer<S> {
    /// Wrap a transport for the handshake window.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            handshaking: true,
            primed: BytesMut::new(),
            header: [0u8; HEADER_LEN],
            header_filled: 0,
            payload_remaining: 0,
            out_buf: vec![0u8; HEADER_LEN],
            out_pos: HEADER_LEN,
            out_framed: false,
        }
    }

    /// Feed wire bytes that were already read from the transport.
    pub fn prime(&mut self, leftover: BytesMut) {
        if self.primed.is_empty() {
            self.primed = leftover;
        } else {
            self.primed.extend_from_slice(&leftover);
        }
    }

    /// Switch to pass-through mode once the TLS engine reports the
    /// handshake complete.
    pub fn finish_handshake(&mut self) {
        self.handshaking = false;
    }

    /// Whether the adapter is still framing handshake records.
    pub fn is_handshaking(&self) -> bool {
        self.handshaking
    }

    /// Reference to the underlying transport.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Mutable reference to the underlying transport.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Unwrap the adapter.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

/// Read from the primed buffer first, then the transport.
fn poll_wire_read<S: AsyncRead + Unpin>(
    stream: &mut S,
    primed: &mut BytesMut,
    cx: &mut Context<'_>,
    buf: &mut ReadBuf<'_>,
) -> Poll<io::Result<()>> {
    if !primed.is_empty() {
        let n = cmp::min(primed.len(), buf.remaining());
        buf.put_slice(&primed.split_to(n));
        return Poll::Ready(Ok(()));
    }
    Pin::new(stream).poll_read(cx, buf)
}

impl<S: AsyncRead + Unpin> AsyncRead for PreloginFramer<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if !this.handshaking {
            return poll_wire_read(&mut this.stream, &mut this.primed, cx, buf);
        }

        loop {
            // Pull in the packet header.
            while this.header_filled < HEADER_LEN {
                let mut header_buf = ReadBuf::new(&mut this.header[this.header_filled..]);
                match poll_wire_read(&mut this.stream, &mut this.primed, cx, &mut header_buf)? {
                    Poll::Ready(()) => {
                        let n = header_buf.filled().len();
                        if n == 0 {
                            // EOF mid-handshake surfaces as a zero read;
                            // the TLS engine reports the truncation.
                            return Poll::Ready(Ok(()));
                        }
                        this.header_filled += n;
                    }
                    Poll::Pending => return Poll::Pending,
                }
            }

            if this.payload_remaining == 0 {
                let packet_type = this.header[0];
                if packet_type != PRELOGIN_TYPE {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!(
                            "expected prelogin packet (0x12) during TLS handshake, got 0x{packet_type:02X}"
                        ),
                    )));
                }

                let length = u16::from_be_bytes([this.header[2], this.header[3]]) as usize;
                this.payload_remaining = length.saturating_sub(HEADER_LEN);

                tracing::trace!(
                    payload = this.payload_remaining,
                    "unwrapping prelogin-framed TLS record"
                );

                if this.payload_remaining == 0 {
                    // Empty packet; start over on the next header.
                    this.header_filled = 0;
                    continue;
                }
            }

            // Surface the payload (raw TLS bytes) to the caller.
            let want = cmp::min(this.payload_remaining, buf.remaining());
            if want == 0 {
                return Poll::Ready(Ok(()));
            }

            let mut tmp = vec![0u8; want];
            let mut tmp_buf = ReadBuf::new(&mut tmp);
            return match poll_wire_read(&mut this.stream, &mut this.primed, cx, &mut tmp_buf)? {
                Poll::Ready(()) => {
                    let n = tmp_buf.filled().len();
                    if n > 0 {
                        buf.put_slice(&tmp[..n]);
                        this.payload_remaining -= n;
                        if this.payload_remaining == 0 {
                            this.header_filled = 0;
                        }
                    }
                    Poll::Ready(Ok(()))
                }
                Poll::Pending => Poll::Pending,
            };
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PreloginFramer<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        if !this.handshaking {
            return Pin::new(&mut this.stream).poll_write(cx, buf);
        }

        // Buffer handshake records; the prelogin frame is applied on flush.
        this.out_buf.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.handshaking && this.out_buf.len() > HEADER_LEN {
            if !this.out_framed {
                let total = this.out_buf.len();
                this.out_buf[0] = PRELOGIN_TYPE;
                this.out_buf[1] = STATUS_EOM;
                this.out_buf[2] = (total >> 8) as u8;
                this.out_buf[3] = total as u8;
                this.out_buf[4] = 0; // spid
                this.out_buf[5] = 0;
                this.out_buf[6] = 1; // packet id
                this.out_buf[7] = 0; // window
                this.out_framed = true;
                this.out_pos = 0;

                tracing::trace!(length = total, "wrapping TLS record in prelogin packet");
            }

            while this.out_pos < this.out_buf.len() {
                match Pin::new(&mut this.stream).poll_write(cx, &this.out_buf[this.out_pos..])? {
                    Poll::Ready(n) => this.out_pos += n,
                    Poll::Pending => return Poll::Pending,
                }
            }

            this.out_buf.truncate(HEADER_LEN);
            this.out_pos = HEADER_LEN;
            this.out_framed = false;
        }

        Pin::new(&mut this.stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

impl<S> std::fmt::Debug for PreloginFramer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreloginFramer")
            .field("handshaking", &self.handshaking)
            .field("primed", &self.primed.len())
            .finish_non_exhaustive()
    }
}
