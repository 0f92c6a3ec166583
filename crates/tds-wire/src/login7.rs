//! LOGIN7 payload construction.
//!
//! LOGIN7 is a 94-byte fixed header followed by a variable data section of
//! UTF-16LE strings located by offset/length pairs in the header. The
//! password is obfuscated (nibble swap then XOR 0xA5), which is why the
//! login always travels through TLS.

use bytes::{BufMut, Bytes, BytesMut};

use crate::prelogin::TDS_VERSION_7_4;
use crate::strings::{utf16_byte_len, write_utf16_string};

/// Size of the LOGIN7 fixed header.
pub const LOGIN7_FIXED_LEN: usize = 94;

/// OptionFlags1: fUseDB + fDatabase fatal + fSetLang.
const OPTION_FLAGS_1: u8 = 0xE0;

/// OptionFlags2: fLanguage fatal + fODBC.
const OPTION_FLAGS_2: u8 = 0x03;

/// LOGIN7 payload for SQL authentication.
#[derive(Debug, Clone, Default)]
pub struct Login7 {
    /// Client machine name.
    pub hostname: String,
    /// Login name.
    pub username: String,
    /// Password, stored in the clear and obfuscated at encode time.
    pub password: String,
    /// Application name reported to the server.
    pub app_name: String,
    /// Server name the client believes it is talking to.
    pub server_name: String,
    /// Initial database.
    pub database: String,
    /// Requested packet size.
    pub packet_size: u32,
    /// Client process id.
    pub client_pid: u32,
}

impl Login7 {
    /// Create a login payload for the given credentials.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            packet_size: 4096,
            ..Self::default()
        }
    }

    /// Set the client machine name.
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Set the application name.
    #[must_use]
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    /// Set the server name.
    #[must_use]
    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = server_name.into();
        self
    }

    /// Set the initial database.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the requested packet size.
    #[must_use]
    pub fn with_packet_size(mut self, packet_size: u32) -> Self {
        self.packet_size = packet_size;
        self
    }

    /// Encode the LOGIN7 payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        // Data section fields in wire order. The interface name identifies
        // this library; the language slot stays empty.
        let interface_name = "tds-pipeline";
        let fields: [&str; 8] = [
            &self.hostname,
            &self.username,
            &self.password,
            &self.app_name,
            &self.server_name,
            interface_name,
            "",
            &self.database,
        ];

        let data_len: usize = fields.iter().map(|f| utf16_byte_len(f)).sum();
        let total_len = LOGIN7_FIXED_LEN + data_len;

        let mut buf = BytesMut::with_capacity(total_len);
        buf.put_u32_le(total_len as u32);
        buf.put_u32_le(TDS_VERSION_7_4);
        buf.put_u32_le(self.packet_size);
        buf.put_u32_le(0); // client program version
        buf.put_u32_le(self.client_pid);
        buf.put_u32_le(0); // connection id
        buf.put_u8(OPTION_FLAGS_1);
        buf.put_u8(OPTION_FLAGS_2);
        buf.put_u8(0); // type flags
        buf.put_u8(0); // option flags 3
        buf.put_i32_le(0); // client time zone
        buf.put_u32_le(0x0409); // client LCID, en-US

        // Offset/length table. Offsets are bytes from the payload start,
        // lengths are UTF-16 code units. Order: hostname, username,
        // password, app name, server name, extension (unused), interface
        // name, language, database.
        let mut offset = LOGIN7_FIXED_LEN as u16;
        for (i, field) in fields.iter().enumerate() {
            if i == 5 {
                // Unused extension slot precedes the interface name.
                buf.put_u16_le(offset);
                buf.put_u16_le(0);
            }
            buf.put_u16_le(offset);
            buf.put_u16_le(field.encode_utf16().count() as u16);
            offset += utf16_byte_len(field) as u16;
        }

        buf.put_slice(&[0u8; 6]); // client MAC address
        buf.put_u16_le(offset); // SSPI offset
        buf.put_u16_le(0); // SSPI length
        buf.put_u16_le(offset); // attach-db-file offset
        buf.put_u16_le(0);
        buf.put_u16_le(offset); // change-password offset
        buf.put_u16_le(0);
        buf.put_u32_le(0); // SSPI long length

        debug_assert_eq!(buf.len(), LOGIN7_FIXED_LEN);

        for (i, field) in fields.iter().enumerate() {
            if i == 2 {
                buf.put_slice(&obfuscate_password(field));
            } else {
                write_utf16_string(&mut buf, field);
            }
        }

        buf.freeze()
    }
}

/// Obfuscate a password per the LOGIN7 rules: each UTF-16LE byte has its
/// nibbles swapped and is XORed with 0xA5.
#[must_use]
pub fn obfuscate_password(password: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(utf16_byte_len(password));
    for unit in password.encode_utf16() {
        for b in unit.to_le_bytes() {
            out.push((b << 4 | b >> 4) ^ 0xA5);
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn fixed_header_is_94_bytes() {
        let login = Login7::new("sa", "secret");
        let encoded = login.encode();
        let claimed = u32::from_le_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]);
        assert_eq!(claimed as usize, encoded.len());
        assert!(encoded.len() > LOGIN7_FIXED_LEN);
    }

    #[test]
    fn hostname_data_starts_right_after_fixed_header() {
        let login = Login7::new("user", "pw").with_hostname("client01");
        let encoded = login.encode();

        // First table entry is the hostname: offset at byte 36.
        let offset = u16::from_le_bytes([encoded[36], encoded[37]]);
        let chars = u16::from_le_bytes([encoded[38], encoded[39]]);
        assert_eq!(offset as usize, LOGIN7_FIXED_LEN);
        assert_eq!(chars as usize, "client01".len());
    }

    #[test]
    fn password_obfuscation_known_vector() {
        // 'A' is 0x41 0x00 in UTF-16LE.
        // 0x41 -> nibble swap 0x14 -> XOR 0xA5 = 0xB1
        // 0x00 -> nibble swap 0x00 -> XOR 0xA5 = 0xA5
        assert_eq!(obfuscate_password("A"), vec![0xB1, 0xA5]);
    }

    #[test]
    fn tds_version_is_little_endian_7_4() {
        let encoded = Login7::new("u", "p").encode();
        let version = u32::from_le_bytes([encoded[4], encoded[5], encoded[6], encoded[7]]);
        assert_eq!(version, TDS_VERSION_7_4);
    }
}
