//! Packet framing over a byte stream.
//!
//! The decoder reassembles packets split across arbitrary TCP segment
//! boundaries; the encoder stamps length and per-message packet ids.

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::WireError;
use crate::packet::{PACKET_HEADER_LEN, Packet, PacketHeader, PacketStatus, PacketType};

/// Default packet size before negotiation.
pub const DEFAULT_PACKET_SIZE: usize = 4096;

/// Smallest packet size the protocol permits negotiating.
pub const MIN_PACKET_SIZE: usize = 512;

/// Largest packet size the protocol permits negotiating.
pub const MAX_PACKET_SIZE: usize = 32767;

/// TDS packet codec for tokio-util framing.
///
/// A codec instance is the unit of the pipeline's TLS reconfiguration:
/// the plaintext codec is torn down with its buffer intact and a fresh
/// instance is installed above the TLS engine.
#[derive(Debug)]
pub struct PacketCodec {
    max_packet_size: usize,
    next_packet_id: u8,
}

impl PacketCodec {
    /// Create a codec with the default packet size.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_packet_size: DEFAULT_PACKET_SIZE,
            next_packet_id: 1,
        }
    }

    /// Create a codec with a negotiated packet size, clamped to the
    /// protocol's 512..=32767 range.
    #[must_use]
    pub fn with_packet_size(size: usize) -> Self {
        Self {
            max_packet_size: size.clamp(MIN_PACKET_SIZE, MAX_PACKET_SIZE),
            next_packet_id: 1,
        }
    }

    /// The packet size this codec enforces.
    #[must_use]
    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    /// Hand out the id for the packet being encoded.
    ///
    /// Ids increment modulo 256 within a message and restart at 1 after a
    /// packet carrying `END_OF_MESSAGE`.
    fn stamp_packet_id(&mut self, end_of_message: bool) -> u8 {
        let id = self.next_packet_id;
        self.next_packet_id = if end_of_message {
            1
        } else {
            id.wrapping_add(1)
        };
        id
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < PACKET_HEADER_LEN {
            return Ok(None);
        }

        // Length lives at bytes 2-3, big-endian.
        let length = u16::from_be_bytes([src[2], src[3]]) as usize;
        if length < PACKET_HEADER_LEN || length > self.max_packet_size {
            return Err(WireError::InvalidPacketLength {
                length,
                header: PACKET_HEADER_LEN,
                max: self.max_packet_size,
            });
        }

        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let frame = src.split_to(length);
        let mut cursor = frame.as_ref();
        let header = PacketHeader::decode(&mut cursor)?;
        let payload = BytesMut::from(&frame[PACKET_HEADER_LEN..]);

        tracing::trace!(
            packet_type = ?header.packet_type,
            length,
            is_eom = header.is_end_of_message(),
            "decoded packet"
        );

        Ok(Some(Packet::new(header, payload)))
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = WireError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let total = PACKET_HEADER_LEN + item.payload.len();
        if total > self.max_packet_size {
            return Err(WireError::InvalidPacketLength {
                length: total,
                header: PACKET_HEADER_LEN,
                max: self.max_packet_size,
            });
        }

        let mut header = item.header;
        header.length = total as u16;
        header.packet_id = self.stamp_packet_id(header.is_end_of_message());

        dst.reserve(total);
        header.encode(dst);
        dst.put_slice(&item.payload);

        tracing::trace!(
            packet_type = ?header.packet_type,
            length = total,
            packet_id = header.packet_id,
            "encoded packet"
        );

        Ok(())
    }
}

/// Split a logical message into packets of at most `max_packet_size`
/// bytes each, with `END_OF_MESSAGE` on the last.
#[must_use]
pub fn chunk_message(packet_type: PacketType, payload: Bytes, max_packet_size: usize) -> Vec<Packet> {
    let max_payload = max_packet_size.saturating_sub(PACKET_HEADER_LEN).max(1);

    if payload.is_empty() {
        return vec![Packet::new(
            PacketHeader::new(packet_type, PacketStatus::END_OF_MESSAGE, 0),
            BytesMut::new(),
        )];
    }

    let chunks: Vec<_> = payload.chunks(max_payload).collect();
    let last = chunks.len() - 1;

    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let status = if i == last {
                PacketStatus::END_OF_MESSAGE
            } else {
                PacketStatus::NORMAL
            };
            Packet::new(
                PacketHeader::new(packet_type, status, 0),
                BytesMut::from(chunk),
            )
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn encode_raw(
        packet_type: PacketType,
        status: PacketStatus,
        packet_id: u8,
        payload: &[u8],
    ) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(packet_type as u8);
        buf.put_u8(status.bits());
        buf.put_u16((PACKET_HEADER_LEN + payload.len()) as u16);
        buf.put_u16(0);
        buf.put_u8(packet_id);
        buf.put_u8(0);
        buf.put_slice(payload);
        buf
    }

    #[test]
    fn decode_emits_one_packet() {
        let mut codec = PacketCodec::new();
        let mut data = encode_raw(PacketType::SqlBatch, PacketStatus::END_OF_MESSAGE, 1, b"test");

        let packet = codec.decode(&mut data).unwrap().unwrap();
        assert_eq!(packet.header.packet_type, PacketType::SqlBatch);
        assert!(packet.is_end_of_message());
        assert_eq!(&packet.payload[..], b"test");
        assert!(data.is_empty());
    }

    #[test]
    fn encode_decode_roundtrip() {
        let mut codec = PacketCodec::new();
        let packet = Packet::single(PacketType::Rpc, Bytes::from_static(b"payload"));

        let mut wire = BytesMut::new();
        codec.encode(packet, &mut wire).unwrap();

        let decoded = codec.decode(&mut wire).unwrap().unwrap();
        assert_eq!(decoded.header.packet_type, PacketType::Rpc);
        assert_eq!(decoded.header.length as usize, PACKET_HEADER_LEN + 7);
        assert_eq!(&decoded.payload[..], b"payload");
    }

    #[test]
    fn decode_waits_for_full_packet() {
        // A maximum-size packet arriving in three arbitrary TCP chunks
        // must produce nothing until the final chunk lands.
        let mut codec = PacketCodec::new();
        let payload = vec![0xABu8; DEFAULT_PACKET_SIZE - PACKET_HEADER_LEN];
        let wire = encode_raw(
            PacketType::TabularResult,
            PacketStatus::END_OF_MESSAGE,
            1,
            &payload,
        );
        assert_eq!(wire.len(), 4096);

        let mut buffered = BytesMut::new();
        buffered.extend_from_slice(&wire[..10]);
        assert!(codec.decode(&mut buffered).unwrap().is_none());

        buffered.extend_from_slice(&wire[10..4010]);
        assert!(codec.decode(&mut buffered).unwrap().is_none());

        buffered.extend_from_slice(&wire[4010..]);
        let packet = codec.decode(&mut buffered).unwrap().unwrap();
        assert_eq!(packet.payload.len(), DEFAULT_PACKET_SIZE - PACKET_HEADER_LEN);
        assert!(buffered.is_empty());
    }

    #[test]
    fn decode_rejects_short_length() {
        let mut codec = PacketCodec::new();
        let mut data = BytesMut::new();
        data.put_u8(PacketType::SqlBatch as u8);
        data.put_u8(PacketStatus::END_OF_MESSAGE.bits());
        data.put_u16(4); // shorter than the header
        data.put_u16(0);
        data.put_u8(1);
        data.put_u8(0);

        assert!(matches!(
            codec.decode(&mut data),
            Err(WireError::InvalidPacketLength { length: 4, .. })
        ));
    }

    #[test]
    fn decode_rejects_oversized_length() {
        let mut codec = PacketCodec::with_packet_size(512);
        let mut data = BytesMut::new();
        data.put_u8(PacketType::SqlBatch as u8);
        data.put_u8(PacketStatus::END_OF_MESSAGE.bits());
        data.put_u16(1024);
        data.put_u16(0);
        data.put_u8(1);
        data.put_u8(0);

        assert!(matches!(
            codec.decode(&mut data),
            Err(WireError::InvalidPacketLength { length: 1024, max: 512, .. })
        ));
    }

    #[test]
    fn packet_size_is_clamped_to_negotiable_range() {
        assert_eq!(PacketCodec::with_packet_size(100).max_packet_size(), 512);
        assert_eq!(PacketCodec::with_packet_size(4096).max_packet_size(), 4096);
        assert_eq!(PacketCodec::with_packet_size(70000).max_packet_size(), 32767);
    }

    #[test]
    fn packet_ids_restart_after_end_of_message() {
        let mut codec = PacketCodec::new();
        let packets = chunk_message(PacketType::SqlBatch, Bytes::from(vec![0u8; 9000]), 4096);
        assert_eq!(packets.len(), 3);

        let mut wire = BytesMut::new();
        for packet in packets {
            codec.encode(packet, &mut wire).unwrap();
        }
        // Ids 1, 2, 3 within the message.
        let mut ids = Vec::new();
        let mut decode = PacketCodec::new();
        while let Some(packet) = decode.decode(&mut wire).unwrap() {
            ids.push(packet.header.packet_id);
        }
        assert_eq!(ids, vec![1, 2, 3]);

        // The next message restarts at 1.
        let next = Packet::single(PacketType::SqlBatch, Bytes::from_static(b"x"));
        let mut wire = BytesMut::new();
        codec.encode(next, &mut wire).unwrap();
        let packet = decode.decode(&mut wire).unwrap().unwrap();
        assert_eq!(packet.header.packet_id, 1);
    }

    #[test]
    fn chunk_message_marks_only_last_packet_final() {
        let packets = chunk_message(PacketType::Tds7Login, Bytes::from(vec![1u8; 5000]), 4096);
        assert_eq!(packets.len(), 2);
        assert!(!packets[0].is_end_of_message());
        assert!(packets[1].is_end_of_message());
        assert_eq!(packets[0].payload.len(), 4096 - PACKET_HEADER_LEN);
        assert_eq!(packets[1].payload.len(), 5000 - (4096 - PACKET_HEADER_LEN));
    }

    #[test]
    fn chunk_message_empty_payload_is_one_packet() {
        let packets = chunk_message(PacketType::Attention, Bytes::new(), 4096);
        assert_eq!(packets.len(), 1);
        assert!(packets[0].is_end_of_message());
        assert!(packets[0].payload.is_empty());
    }

    #[test]
    fn concatenated_packets_roundtrip_byte_exact() {
        // decode_all followed by re-encode reproduces the input bytes.
        let mut wire = BytesMut::new();
        wire.extend_from_slice(&encode_raw(
            PacketType::SqlBatch,
            PacketStatus::NORMAL,
            1,
            b"ab",
        ));
        wire.extend_from_slice(&encode_raw(
            PacketType::SqlBatch,
            PacketStatus::END_OF_MESSAGE,
            2,
            b"cd",
        ));
        let original = wire.clone();

        let mut decode = PacketCodec::new();
        let mut encode = PacketCodec::new();
        let mut reencoded = BytesMut::new();
        while let Some(packet) = decode.decode(&mut wire).unwrap() {
            encode.encode(packet, &mut reencoded).unwrap();
        }
        assert_eq!(reencoded, original);
    }
}
