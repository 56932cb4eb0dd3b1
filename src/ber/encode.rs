//! BER encoding.
//!
//! Uses a reverse buffer: content is written first and the length and tag
//! are prepended afterwards, so no length pre-calculation pass is needed.
//! Every encoding produced here is the canonical minimal form.

use std::ops::Range;

use super::length::encode_length;
use super::tag;
use bytes::Bytes;

/// Buffer for BER encoding that writes backwards.
///
/// Callers push fields in reverse order: the last field of a SEQUENCE
/// first, the tag of a TLV last.
pub struct EncodeBuf {
    buf: Vec<u8>,
}

/// Position of a field inside an [`EncodeBuf`], measured from the end.
///
/// Converted to a forward byte range once the final length is known, which
/// lets USM splice the HMAC into the authentication-parameters field
/// without re-parsing the encoded message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Mark {
    from_end: usize,
    len: usize,
}

impl Mark {
    /// Byte range of the marked content within a finished buffer of `total` bytes.
    pub fn range(&self, total: usize) -> Range<usize> {
        let start = total - self.from_end;
        start..start + self.len
    }
}

impl EncodeBuf {
    /// Create a new encode buffer with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(512)
    }

    /// Create a new encode buffer with specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Push a single byte (prepends to front).
    pub fn push_byte(&mut self, byte: u8) {
        self.buf.push(byte);
    }

    /// Push multiple bytes (prepends to front, keeping their order).
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend(bytes.iter().rev());
    }

    /// Push a BER length encoding.
    pub fn push_length(&mut self, len: usize) {
        let (bytes, count) = encode_length(len);
        self.buf.extend_from_slice(&bytes[..count]);
    }

    /// Push a BER tag.
    pub fn push_tag(&mut self, tag: u8) {
        self.buf.push(tag);
    }

    /// Get the current length of encoded data.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Check if buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Encode a constructed type (SEQUENCE, PDU, etc).
    ///
    /// Calls the closure to encode contents, then wraps with length and tag.
    pub fn push_constructed<F>(&mut self, tag: u8, f: F)
    where
        F: FnOnce(&mut Self),
    {
        let start_len = self.len();
        f(self);
        let content_len = self.len() - start_len;
        self.push_length(content_len);
        self.push_tag(tag);
    }

    /// Encode a SEQUENCE.
    pub fn push_sequence<F>(&mut self, f: F)
    where
        F: FnOnce(&mut Self),
    {
        self.push_constructed(tag::universal::SEQUENCE, f);
    }

    /// Encode an INTEGER.
    pub fn push_integer(&mut self, value: i32) {
        let bytes = value.to_be_bytes();
        let content = &bytes[signed_skip(&bytes)..];
        self.push_tlv(tag::universal::INTEGER, content);
    }

    /// Encode an unsigned 32-bit value with a specific tag (Counter32, Gauge32, TimeTicks).
    pub fn push_unsigned32(&mut self, tag: u8, value: u32) {
        self.push_unsigned(tag, &value.to_be_bytes());
    }

    /// Encode a Counter64.
    pub fn push_counter64(&mut self, value: u64) {
        self.push_unsigned(tag::application::COUNTER64, &value.to_be_bytes());
    }

    /// Encode an OCTET STRING.
    pub fn push_octet_string(&mut self, data: &[u8]) {
        self.push_tlv(tag::universal::OCTET_STRING, data);
    }

    /// Encode an OCTET STRING and remember where its content lands.
    pub fn push_octet_string_marked(&mut self, data: &[u8]) -> Mark {
        self.push_bytes(data);
        let mark = Mark {
            from_end: self.len(),
            len: data.len(),
        };
        self.push_length(data.len());
        self.push_tag(tag::universal::OCTET_STRING);
        mark
    }

    /// Encode a NULL.
    pub fn push_null(&mut self) {
        self.push_length(0);
        self.push_tag(tag::universal::NULL);
    }

    /// Encode an OBJECT IDENTIFIER.
    pub fn push_oid(&mut self, oid: &crate::oid::Oid) {
        let ber = oid.to_ber_smallvec();
        self.push_tlv(tag::universal::OBJECT_IDENTIFIER, &ber);
    }

    /// Encode an IP address.
    pub fn push_ip_address(&mut self, addr: [u8; 4]) {
        self.push_tlv(tag::application::IP_ADDRESS, &addr);
    }

    /// Encode an arbitrary primitive TLV.
    pub fn push_tlv(&mut self, tag: u8, content: &[u8]) {
        self.push_bytes(content);
        self.push_length(content.len());
        self.push_tag(tag);
    }

    fn push_unsigned(&mut self, tag: u8, be: &[u8]) {
        let skip = be.iter().take(be.len() - 1).take_while(|&&b| b == 0).count();
        let content = &be[skip..];
        self.push_bytes(content);
        // Leading 0x00 keeps values with the high bit set from reading as negative
        let pad = content[0] & 0x80 != 0;
        if pad {
            self.push_byte(0);
        }
        self.push_length(content.len() + pad as usize);
        self.push_tag(tag);
    }

    /// Finalize and return the encoded bytes.
    pub fn finish(self) -> Bytes {
        Bytes::from(self.finish_vec())
    }

    /// Finalize and return as `Vec<u8>`.
    pub fn finish_vec(mut self) -> Vec<u8> {
        self.buf.reverse();
        self.buf
    }
}

impl Default for EncodeBuf {
    fn default() -> Self {
        Self::new()
    }
}

/// Count of redundant sign octets at the front of a big-endian two's-complement value.
#[inline]
fn signed_skip(bytes: &[u8]) -> usize {
    let mut start = 0;
    while start + 1 < bytes.len() {
        let (cur, next) = (bytes[start], bytes[start + 1]);
        let redundant = (cur == 0x00 && next & 0x80 == 0) || (cur == 0xFF && next & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    start
}
