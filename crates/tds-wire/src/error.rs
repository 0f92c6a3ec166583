//! Wire-level error types.

use thiserror::Error;

/// Errors produced while framing or parsing TDS packets.
#[derive(Debug, Error)]
pub enum WireError {
    /// Unknown packet type byte on the wire.
    #[error("invalid packet type 0x{0:02X}")]
    InvalidPacketType(u8),

    /// Status byte carried flag bits this implementation does not know.
    #[error("invalid packet status 0x{0:02X}")]
    InvalidPacketStatus(u8),

    /// Header length field is smaller than the header itself or larger
    /// than the negotiated packet size.
    #[error("invalid packet length {length} (header is {header} bytes, max {max})")]
    InvalidPacketLength {
        /// Length claimed by the header.
        length: usize,
        /// Size of the fixed packet header.
        header: usize,
        /// Maximum packet size accepted by the codec.
        max: usize,
    },

    /// Unknown prelogin option token.
    #[error("invalid prelogin option 0x{0:02X}")]
    InvalidPreloginOption(u8),

    /// Input ended in the middle of a structure.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// IO error from the underlying transport.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
