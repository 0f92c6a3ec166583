//! UTF-16LE string helpers used by prelogin and login encoding.

use bytes::{Buf, BufMut};

/// Write a string as UTF-16LE without a length prefix.
pub fn write_utf16_string(dst: &mut impl BufMut, s: &str) {
    for c in s.encode_utf16() {
        dst.put_u16_le(c);
    }
}

/// Read a UTF-16LE string of `char_count` code units.
pub fn read_utf16_string(src: &mut impl Buf, char_count: usize) -> Option<String> {
    if src.remaining() < char_count * 2 {
        return None;
    }

    let mut units = Vec::with_capacity(char_count);
    for _ in 0..char_count {
        units.push(src.get_u16_le());
    }

    String::from_utf16(&units).ok()
}

/// Byte length of a string once encoded as UTF-16LE.
#[must_use]
pub fn utf16_byte_len(s: &str) -> usize {
    s.encode_utf16().count() * 2
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn utf16_roundtrip() {
        let original = "sqlserver 世界";
        let mut buf = BytesMut::new();
        write_utf16_string(&mut buf, original);
        assert_eq!(buf.len(), utf16_byte_len(original));

        let mut cursor = buf.freeze();
        let decoded = read_utf16_string(&mut cursor, original.encode_utf16().count()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn byte_len_counts_code_units() {
        assert_eq!(utf16_byte_len("abc"), 6);
        assert_eq!(utf16_byte_len("世界"), 4);
    }
}
