//! LOGIN7 request.

use tds_wire::{Login7, Packet, PacketType, chunk_message};

use crate::error::{Error, Result};
use crate::request::Request;

/// Drives the LOGIN7 exchange.
///
/// The payload is chunked to the connection's packet size; the first
/// tabular-result packet ending its message is treated as the login
/// response and completes the request. Token-level interpretation of the
/// response belongs to the upper layer.
#[derive(Debug)]
pub struct LoginRequest {
    login: Login7,
    packet_size: usize,
}

impl LoginRequest {
    /// Create a login request for the given payload and packet size.
    #[must_use]
    pub fn new(login: Login7, packet_size: usize) -> Self {
        Self { login, packet_size }
    }
}

impl Request for LoginRequest {
    fn start(&mut self) -> Result<Vec<Packet>> {
        Ok(chunk_message(
            PacketType::Tds7Login,
            self.login.encode(),
            self.packet_size,
        ))
    }

    fn respond(&mut self, packet: Packet) -> Result<Option<Vec<Packet>>> {
        match packet.header.packet_type {
            PacketType::TabularResult if packet.is_end_of_message() => Ok(None),
            // The response spans several packets; keep reading.
            PacketType::TabularResult => Ok(Some(Vec::new())),
            other => Err(Error::Protocol(format!(
                "unexpected {other:?} packet in response to login"
            ))),
        }
    }

    fn describe(&self) -> &'static str {
        "login7"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use tds_wire::{PacketHeader, PacketStatus};

    fn login() -> Login7 {
        Login7::new("sa", "secret")
            .with_hostname("client01")
            .with_database("master")
    }

    fn result_packet(status: PacketStatus) -> Packet {
        Packet::new(
            PacketHeader::new(PacketType::TabularResult, status, 0),
            BytesMut::from(&[0xAD, 0x00][..]),
        )
    }

    #[test]
    fn start_chunks_to_packet_size() {
        let mut request = LoginRequest::new(login(), 512);
        let packets = request.start().unwrap();
        assert!(!packets.is_empty());
        assert!(packets.iter().all(|p| p.total_len() <= 512));
        assert!(packets.last().unwrap().is_end_of_message());
        assert!(
            packets[..packets.len() - 1]
                .iter()
                .all(|p| !p.is_end_of_message())
        );
    }

    #[test]
    fn final_result_packet_completes_the_request() {
        let mut request = LoginRequest::new(login(), 4096);
        request.start().unwrap();

        let more = request
            .respond(result_packet(PacketStatus::NORMAL))
            .unwrap();
        assert!(more.unwrap().is_empty());

        let done = request
            .respond(result_packet(PacketStatus::END_OF_MESSAGE))
            .unwrap();
        assert!(done.is_none());
    }

    #[test]
    fn unexpected_packet_type_is_a_protocol_error() {
        let mut request = LoginRequest::new(login(), 4096);
        let packet = Packet::new(
            PacketHeader::new(PacketType::Attention, PacketStatus::END_OF_MESSAGE, 0),
            BytesMut::new(),
        );
        assert!(request.respond(packet).unwrap_err().is_protocol());
    }
}
