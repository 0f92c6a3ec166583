//! TDS packet header and packet value types.

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::WireError;

/// TDS packet header size in bytes.
pub const PACKET_HEADER_LEN: usize = 8;

/// TDS packet type byte.
///
/// `SslKickoff` is a pseudo-type used internally by the connection pipeline
/// to request installation of the TLS engine; it is never written to or
/// parsed from the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Internal sentinel requesting the TLS upgrade. Never on the wire.
    SslKickoff = 0x00,
    /// SQL batch request.
    SqlBatch = 0x01,
    /// Pre-TDS7 login.
    PreTds7Login = 0x02,
    /// Remote procedure call.
    Rpc = 0x03,
    /// Tabular response from the server.
    TabularResult = 0x04,
    /// Attention (cancel) signal.
    Attention = 0x06,
    /// Bulk load data.
    BulkLoad = 0x07,
    /// Transaction manager request.
    TransactionManager = 0x0E,
    /// TDS7+ login.
    Tds7Login = 0x10,
    /// SSPI authentication payload.
    Sspi = 0x11,
    /// Prelogin negotiation.
    PreLogin = 0x12,
}

impl PacketType {
    /// Parse a packet type from its wire byte.
    ///
    /// The `SslKickoff` discriminant is deliberately rejected here: it
    /// exists only inside the pipeline.
    pub fn from_u8(value: u8) -> Result<Self, WireError> {
        match value {
            0x01 => Ok(Self::SqlBatch),
            0x02 => Ok(Self::PreTds7Login),
            0x03 => Ok(Self::Rpc),
            0x04 => Ok(Self::TabularResult),
            0x06 => Ok(Self::Attention),
            0x07 => Ok(Self::BulkLoad),
            0x0E => Ok(Self::TransactionManager),
            0x10 => Ok(Self::Tds7Login),
            0x11 => Ok(Self::Sspi),
            0x12 => Ok(Self::PreLogin),
            _ => Err(WireError::InvalidPacketType(value)),
        }
    }
}

bitflags! {
    /// TDS packet status flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PacketStatus: u8 {
        /// More packets of this message follow.
        const NORMAL = 0x00;
        /// Final packet of a message.
        const END_OF_MESSAGE = 0x01;
        /// Ignore this event (attention acknowledgement).
        const IGNORE_EVENT = 0x02;
        /// Reset connection state before processing.
        const RESET_CONNECTION = 0x08;
    }
}

/// The fixed 8-byte header every TDS packet starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Packet type.
    pub packet_type: PacketType,
    /// Status flags.
    pub status: PacketStatus,
    /// Total packet length including this header, big-endian on the wire.
    pub length: u16,
    /// Server process ID; 0 from the client.
    pub spid: u16,
    /// Sequence number within a message, wrapping modulo 256.
    pub packet_id: u8,
    /// Reserved window field, must be 0.
    pub window: u8,
}

impl PacketHeader {
    /// Create a header with zeroed spid/window and packet id 1.
    #[must_use]
    pub const fn new(packet_type: PacketType, status: PacketStatus, length: u16) -> Self {
        Self {
            packet_type,
            status,
            length,
            spid: 0,
            packet_id: 1,
            window: 0,
        }
    }

    /// Parse a header from the front of `src`.
    pub fn decode(src: &mut impl Buf) -> Result<Self, WireError> {
        if src.remaining() < PACKET_HEADER_LEN {
            return Err(WireError::UnexpectedEof);
        }

        let packet_type = PacketType::from_u8(src.get_u8())?;
        let status_byte = src.get_u8();
        let status = PacketStatus::from_bits(status_byte)
            .ok_or(WireError::InvalidPacketStatus(status_byte))?;

        Ok(Self {
            packet_type,
            status,
            length: src.get_u16(),
            spid: src.get_u16(),
            packet_id: src.get_u8(),
            window: src.get_u8(),
        })
    }

    /// Write the header to `dst`.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(self.packet_type as u8);
        dst.put_u8(self.status.bits());
        dst.put_u16(self.length);
        dst.put_u16(self.spid);
        dst.put_u8(self.packet_id);
        dst.put_u8(self.window);
    }

    /// Payload length implied by the header.
    #[must_use]
    pub const fn payload_len(&self) -> usize {
        self.length.saturating_sub(PACKET_HEADER_LEN as u16) as usize
    }

    /// Whether this packet ends its message.
    #[must_use]
    pub const fn is_end_of_message(&self) -> bool {
        self.status.contains(PacketStatus::END_OF_MESSAGE)
    }
}

/// A TDS packet: header plus payload.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Packet header. `length` and `packet_id` are stamped by the encoder.
    pub header: PacketHeader,
    /// Payload bytes, excluding the header.
    pub payload: BytesMut,
}

impl Packet {
    /// Create a packet from a header and payload.
    #[must_use]
    pub fn new(header: PacketHeader, payload: BytesMut) -> Self {
        Self { header, payload }
    }

    /// Create a single-packet message carrying `payload`.
    #[must_use]
    pub fn single(packet_type: PacketType, payload: Bytes) -> Self {
        Self {
            header: PacketHeader::new(packet_type, PacketStatus::END_OF_MESSAGE, 0),
            payload: BytesMut::from(payload.as_ref()),
        }
    }

    /// The internal sentinel a request returns to ask for the TLS upgrade.
    #[must_use]
    pub fn ssl_kickoff() -> Self {
        Self {
            header: PacketHeader::new(PacketType::SslKickoff, PacketStatus::END_OF_MESSAGE, 0),
            payload: BytesMut::new(),
        }
    }

    /// Total size including the header.
    #[must_use]
    pub fn total_len(&self) -> usize {
        PACKET_HEADER_LEN + self.payload.len()
    }

    /// Whether this packet ends its message.
    #[must_use]
    pub fn is_end_of_message(&self) -> bool {
        self.header.is_end_of_message()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let header = PacketHeader {
            packet_type: PacketType::Rpc,
            status: PacketStatus::END_OF_MESSAGE | PacketStatus::RESET_CONNECTION,
            length: 512,
            spid: 77,
            packet_id: 3,
            window: 0,
        };

        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), PACKET_HEADER_LEN);

        let mut cursor = buf.freeze();
        let decoded = PacketHeader::decode(&mut cursor).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn payload_len_excludes_header() {
        let header = PacketHeader::new(PacketType::SqlBatch, PacketStatus::END_OF_MESSAGE, 100);
        assert_eq!(header.payload_len(), 92);
    }

    #[test]
    fn sentinel_type_is_not_a_wire_type() {
        assert!(PacketType::from_u8(PacketType::SslKickoff as u8).is_err());
        assert_eq!(PacketType::from_u8(0x12).unwrap(), PacketType::PreLogin);
        assert!(PacketType::from_u8(0xFE).is_err());
    }

    #[test]
    fn unknown_status_bits_are_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u8(0x01); // SqlBatch
        buf.put_u8(0x80); // no such flag
        buf.put_u16(8);
        buf.put_u16(0);
        buf.put_u8(1);
        buf.put_u8(0);

        let mut cursor = buf.freeze();
        assert!(matches!(
            PacketHeader::decode(&mut cursor),
            Err(WireError::InvalidPacketStatus(0x80))
        ));
    }
}
