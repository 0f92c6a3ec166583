//! # tds-wire
//!
//! Wire layer for the TDS connection pipeline: packet headers, the packet
//! codec, framed stream adapters, and the prelogin/LOGIN7 payloads the
//! pipeline itself exchanges.
//!
//! ## Architecture
//!
//! ```text
//! byte stream → PacketCodec (framing) → Packet → dispatcher
//! ```
//!
//! The codec is deliberately a standalone, swappable value: the TLS
//! upgrade replaces codec instances in place without losing buffered
//! bytes, so framing state never leaks across the plaintext/encrypted
//! boundary.
//!
//! This crate is transport-agnostic above the tokio IO traits and knows
//! nothing about requests, connection state, or TLS.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod codec;
pub mod error;
pub mod framed;
pub mod login7;
pub mod packet;
pub mod prelogin;
pub mod strings;

pub use codec::{
    DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE, MIN_PACKET_SIZE, PacketCodec, chunk_message,
};
pub use error::WireError;
pub use framed::PacketStream;
pub use login7::{LOGIN7_FIXED_LEN, Login7, obfuscate_password};
pub use packet::{PACKET_HEADER_LEN, Packet, PacketHeader, PacketStatus, PacketType};
pub use prelogin::{EncryptionLevel, Prelogin, PreloginOption, TDS_VERSION_7_4};
