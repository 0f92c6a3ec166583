//! Prelogin payload encoding and decoding.
//!
//! Prelogin is the opening exchange of a TDS 7.x connection. The payload is
//! an option table (type, offset, length per entry, offsets absolute from
//! the payload start) followed by the option data. The pipeline consumes
//! only the options it negotiates on: version, encryption, instance, MARS.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::WireError;

/// TDS 7.4, the protocol revision this client requests.
pub const TDS_VERSION_7_4: u32 = 0x7400_0004;

/// Prelogin option tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PreloginOption {
    /// Version information.
    Version = 0x00,
    /// Encryption negotiation.
    Encryption = 0x01,
    /// Named instance validation.
    Instance = 0x02,
    /// Client thread id, for server-side diagnostics.
    ThreadId = 0x03,
    /// Multiple Active Result Sets support.
    Mars = 0x04,
    /// End of the option table.
    Terminator = 0xFF,
}

impl PreloginOption {
    /// Parse an option token; unknown tokens are reported so callers can
    /// decide whether to skip them.
    pub fn from_u8(value: u8) -> Result<Self, WireError> {
        match value {
            0x00 => Ok(Self::Version),
            0x01 => Ok(Self::Encryption),
            0x02 => Ok(Self::Instance),
            0x03 => Ok(Self::ThreadId),
            0x04 => Ok(Self::Mars),
            0xFF => Ok(Self::Terminator),
            _ => Err(WireError::InvalidPreloginOption(value)),
        }
    }
}

/// Encryption level exchanged in prelogin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum EncryptionLevel {
    /// Encrypt only the login sequence.
    Off = 0x00,
    /// Encrypt the whole session.
    On = 0x01,
    /// Encryption unavailable.
    NotSupported = 0x02,
    /// Encryption mandatory.
    #[default]
    Required = 0x03,
}

impl EncryptionLevel {
    /// Parse the encryption byte; unknown values degrade to `Off`.
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x01 => Self::On,
            0x02 => Self::NotSupported,
            0x03 => Self::Required,
            _ => Self::Off,
        }
    }

    /// Whether this level demands a TLS session.
    #[must_use]
    pub const fn is_required(&self) -> bool {
        matches!(self, Self::On | Self::Required)
    }
}

/// Prelogin payload, used for both the client request and the server
/// response.
#[derive(Debug, Clone)]
pub struct Prelogin {
    /// Protocol or product version, raw big-endian value.
    pub version: u32,
    /// Sub-build number following the version.
    pub sub_build: u16,
    /// Negotiated encryption level.
    pub encryption: EncryptionLevel,
    /// Named instance, if targeting one.
    pub instance: Option<String>,
    /// Client thread id.
    pub thread_id: Option<u32>,
    /// MARS support flag.
    pub mars: bool,
}

impl Default for Prelogin {
    fn default() -> Self {
        Self {
            version: TDS_VERSION_7_4,
            sub_build: 0,
            encryption: EncryptionLevel::Required,
            instance: None,
            thread_id: None,
            mars: false,
        }
    }
}

impl Prelogin {
    /// Create a prelogin request with the given encryption level.
    #[must_use]
    pub fn new(encryption: EncryptionLevel) -> Self {
        Self {
            encryption,
            ..Self::default()
        }
    }

    /// Target a named instance.
    #[must_use]
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    /// Record the client thread id.
    #[must_use]
    pub fn with_thread_id(mut self, thread_id: u32) -> Self {
        self.thread_id = Some(thread_id);
        self
    }

    /// Encode the option table and data section.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        // Version, encryption, and MARS are always present.
        let mut option_count = 3;
        if self.instance.is_some() {
            option_count += 1;
        }
        if self.thread_id.is_some() {
            option_count += 1;
        }

        let table_len = option_count * 5 + 1;
        let mut table = BytesMut::with_capacity(table_len + 64);
        let mut data = BytesMut::new();
        let mut offset = table_len as u16;

        // VERSION: 4-byte big-endian version + 2-byte little-endian sub-build.
        table.put_u8(PreloginOption::Version as u8);
        table.put_u16(offset);
        table.put_u16(6);
        data.put_u32(self.version);
        data.put_u16_le(self.sub_build);
        offset += 6;

        // ENCRYPTION: single byte.
        table.put_u8(PreloginOption::Encryption as u8);
        table.put_u16(offset);
        table.put_u16(1);
        data.put_u8(self.encryption as u8);
        offset += 1;

        // INSTANCE: null-terminated name.
        if let Some(ref instance) = self.instance {
            let len = instance.len() as u16 + 1;
            table.put_u8(PreloginOption::Instance as u8);
            table.put_u16(offset);
            table.put_u16(len);
            data.put_slice(instance.as_bytes());
            data.put_u8(0);
            offset += len;
        }

        // THREADID: 4 bytes.
        if let Some(thread_id) = self.thread_id {
            table.put_u8(PreloginOption::ThreadId as u8);
            table.put_u16(offset);
            table.put_u16(4);
            data.put_u32(thread_id);
            offset += 4;
        }

        // MARS: single byte.
        table.put_u8(PreloginOption::Mars as u8);
        table.put_u16(offset);
        table.put_u16(1);
        data.put_u8(u8::from(self.mars));

        table.put_u8(PreloginOption::Terminator as u8);
        table.put_slice(&data);
        table.freeze()
    }

    /// Decode a prelogin payload.
    ///
    /// Option tokens this implementation does not know are skipped, so a
    /// server advertising newer options still parses.
    pub fn decode(mut src: impl Buf) -> Result<Self, WireError> {
        let mut options = Vec::new();
        loop {
            if src.remaining() < 1 {
                return Err(WireError::UnexpectedEof);
            }
            let token = src.get_u8();
            if token == PreloginOption::Terminator as u8 {
                break;
            }
            if src.remaining() < 4 {
                return Err(WireError::UnexpectedEof);
            }
            options.push((token, src.get_u16() as usize, src.get_u16() as usize));
        }

        // Offsets in the table are absolute from the payload start; the
        // remaining buffer begins after the table.
        let table_len = options.len() * 5 + 1;
        let data = src.copy_to_bytes(src.remaining());

        let mut prelogin = Self {
            encryption: EncryptionLevel::Off,
            ..Self::default()
        };

        for (token, offset, length) in options {
            let Ok(option) = PreloginOption::from_u8(token) else {
                continue;
            };
            if offset < table_len {
                continue;
            }
            let start = offset - table_len;
            if start + length > data.len() {
                continue;
            }
            let field = &data[start..start + length];

            match option {
                PreloginOption::Version if length >= 4 => {
                    prelogin.version = u32::from_be_bytes([field[0], field[1], field[2], field[3]]);
                    if length >= 6 {
                        prelogin.sub_build = u16::from_le_bytes([field[4], field[5]]);
                    }
                }
                PreloginOption::Encryption if length >= 1 => {
                    prelogin.encryption = EncryptionLevel::from_u8(field[0]);
                }
                PreloginOption::Instance if length > 0 => {
                    if let Some(end) = field.iter().position(|&b| b == 0) {
                        if let Ok(name) = std::str::from_utf8(&field[..end]) {
                            if !name.is_empty() {
                                prelogin.instance = Some(name.to_string());
                            }
                        }
                    }
                }
                PreloginOption::ThreadId if length >= 4 => {
                    prelogin.thread_id =
                        Some(u32::from_be_bytes([field[0], field[1], field[2], field[3]]));
                }
                PreloginOption::Mars if length >= 1 => {
                    prelogin.mars = field[0] != 0;
                }
                _ => {}
            }
        }

        Ok(prelogin)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn encode_starts_with_version_option() {
        let encoded = Prelogin::new(EncryptionLevel::Required).encode();
        assert_eq!(encoded[0], PreloginOption::Version as u8);
    }

    #[test]
    fn encode_decode_roundtrip() {
        let original = Prelogin::new(EncryptionLevel::On)
            .with_instance("prod01")
            .with_thread_id(42);

        let decoded = Prelogin::decode(original.encode().as_ref()).unwrap();
        assert_eq!(decoded.version, TDS_VERSION_7_4);
        assert_eq!(decoded.encryption, EncryptionLevel::On);
        assert_eq!(decoded.instance.as_deref(), Some("prod01"));
        assert_eq!(decoded.thread_id, Some(42));
        assert!(!decoded.mars);
    }

    #[test]
    fn decode_skips_unknown_options() {
        let mut buf = BytesMut::new();
        // Unknown option 0x07 followed by encryption, then terminator.
        let table_len: u16 = 2 * 5 + 1;
        buf.put_u8(0x07);
        buf.put_u16(table_len);
        buf.put_u16(4);
        buf.put_u8(PreloginOption::Encryption as u8);
        buf.put_u16(table_len + 4);
        buf.put_u16(1);
        buf.put_u8(PreloginOption::Terminator as u8);
        buf.put_u32(0xDEAD_BEEF);
        buf.put_u8(EncryptionLevel::NotSupported as u8);

        let decoded = Prelogin::decode(buf.freeze().as_ref()).unwrap();
        assert_eq!(decoded.encryption, EncryptionLevel::NotSupported);
    }

    #[test]
    fn decode_truncated_table_fails() {
        let buf: &[u8] = &[PreloginOption::Version as u8, 0x00];
        assert!(matches!(
            Prelogin::decode(buf),
            Err(WireError::UnexpectedEof)
        ));
    }

    #[test]
    fn encryption_level_parsing() {
        assert_eq!(EncryptionLevel::from_u8(0x00), EncryptionLevel::Off);
        assert_eq!(EncryptionLevel::from_u8(0x02), EncryptionLevel::NotSupported);
        assert!(EncryptionLevel::Required.is_required());
        assert!(!EncryptionLevel::NotSupported.is_required());
    }
}
