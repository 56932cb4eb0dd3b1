//! BER decoding.
//!
//! Zero-copy decoding over `Bytes`. Every read is bounds-checked before a
//! length is trusted, so adversarial input yields a typed error and never a
//! panic. Decoding is permissive where real agents are sloppy: non-minimal
//! lengths and integers are accepted and re-encode canonically.

use super::length::decode_length;
use super::tag;
use crate::error::{DecodeErrorKind, Error, Result};
use crate::oid::Oid;
use bytes::Bytes;

/// BER decoder that reads from a byte buffer.
#[derive(Debug, Clone)]
pub struct Decoder {
    data: Bytes,
    offset: usize,
    /// Offset of `data[0]` in the outermost buffer, for error reporting.
    base: usize,
}

impl Decoder {
    /// Create a new decoder from bytes.
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            offset: 0,
            base: 0,
        }
    }

    /// Create a decoder from a byte slice (copies the data).
    pub fn from_slice(data: &[u8]) -> Self {
        Self::new(Bytes::copy_from_slice(data))
    }

    /// Absolute offset of the next byte in the outermost buffer.
    pub fn offset(&self) -> usize {
        self.base + self.offset
    }

    /// Get remaining bytes.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    /// Check if we've reached the end.
    pub fn is_empty(&self) -> bool {
        self.offset >= self.data.len()
    }

    /// Peek at the next tag without consuming it.
    pub fn peek_tag(&self) -> Option<u8> {
        self.data.get(self.offset).copied()
    }

    fn error(&self, kind: DecodeErrorKind) -> Error {
        tracing::debug!(target: "snmp_engine::ber", { snmp.offset = self.offset(), kind = %kind }, "decode error");
        Error::decode(self.offset(), kind)
    }

    /// Read a single byte.
    pub fn read_byte(&mut self) -> Result<u8> {
        let Some(&byte) = self.data.get(self.offset) else {
            return Err(self.error(DecodeErrorKind::TruncatedData));
        };
        self.offset += 1;
        Ok(byte)
    }

    /// Read a tag byte.
    pub fn read_tag(&mut self) -> Result<u8> {
        self.read_byte()
    }

    /// Read a length, checking it against the bytes that remain.
    pub fn read_length(&mut self) -> Result<usize> {
        let (len, consumed) = decode_length(&self.data[self.offset..], self.offset())?;
        self.offset += consumed;
        if len > self.remaining() {
            return Err(self.error(DecodeErrorKind::InsufficientData {
                needed: len,
                available: self.remaining(),
            }));
        }
        Ok(len)
    }

    /// Read raw bytes without copying.
    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes> {
        if len > self.remaining() {
            return Err(self.error(DecodeErrorKind::InsufficientData {
                needed: len,
                available: self.remaining(),
            }));
        }
        let bytes = self.data.slice(self.offset..self.offset + len);
        self.offset += len;
        Ok(bytes)
    }

    /// Read and expect a specific tag, returning the content length.
    pub fn expect_tag(&mut self, expected: u8) -> Result<usize> {
        let actual = self.read_tag()?;
        if actual != expected {
            self.offset -= 1;
            return Err(self.error(DecodeErrorKind::UnexpectedTag { expected, actual }));
        }
        self.read_length()
    }

    /// Read a BER integer (signed).
    pub fn read_integer(&mut self) -> Result<i32> {
        let len = self.expect_tag(tag::universal::INTEGER)?;
        self.read_integer_value(len)
    }

    /// Read a signed integer body of `len` octets.
    ///
    /// Over-long encodings keep the low 32 bits (net-snmp behaviour).
    pub fn read_integer_value(&mut self, len: usize) -> Result<i32> {
        if len == 0 {
            return Err(self.error(DecodeErrorKind::ZeroLengthInteger));
        }
        let bytes = self.read_bytes(len)?;
        if len > 4 {
            tracing::warn!(target: "snmp_engine::ber", { snmp.offset = self.offset(), length = len }, "integer too long, truncating to 4 bytes");
        }
        let seed: i32 = if bytes[0] & 0x80 != 0 { -1 } else { 0 };
        Ok(bytes
            .iter()
            .fold(seed, |acc, &b| acc.wrapping_shl(8) | b as i32))
    }

    /// Read an unsigned 32-bit integer with specific tag.
    pub fn read_unsigned32(&mut self, expected_tag: u8) -> Result<u32> {
        let len = self.expect_tag(expected_tag)?;
        self.read_unsigned32_value(len)
    }

    /// Read an unsigned 32-bit body of `len` octets.
    ///
    /// Leading zero octets are accepted; a value above `u32::MAX` is an error.
    pub fn read_unsigned32_value(&mut self, len: usize) -> Result<u32> {
        if len == 0 {
            return Err(self.error(DecodeErrorKind::ZeroLengthInteger));
        }
        let bytes = self.read_bytes(len)?;
        let significant = bytes.iter().skip_while(|&&b| b == 0).count();
        if significant > 4 {
            return Err(self.error(DecodeErrorKind::Unsigned32Overflow { length: len }));
        }
        Ok(bytes.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32))
    }

    /// Read a Counter64.
    pub fn read_counter64(&mut self) -> Result<u64> {
        let len = self.expect_tag(tag::application::COUNTER64)?;
        self.read_counter64_value(len)
    }

    /// Read a 64-bit unsigned body of `len` octets (at most 9, one pad octet).
    pub fn read_counter64_value(&mut self, len: usize) -> Result<u64> {
        if len == 0 {
            return Err(self.error(DecodeErrorKind::ZeroLengthInteger));
        }
        if len > 9 {
            return Err(self.error(DecodeErrorKind::Integer64TooLong { length: len }));
        }
        let bytes = self.read_bytes(len)?;
        if len == 9 && bytes[0] != 0 {
            return Err(self.error(DecodeErrorKind::Integer64TooLong { length: len }));
        }
        Ok(bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64))
    }

    /// Read an OCTET STRING.
    pub fn read_octet_string(&mut self) -> Result<Bytes> {
        if self.peek_tag() == Some(tag::universal::OCTET_STRING_CONSTRUCTED) {
            return Err(self.error(DecodeErrorKind::ConstructedOctetString));
        }
        let len = self.expect_tag(tag::universal::OCTET_STRING)?;
        self.read_bytes(len)
    }

    /// Read a NULL.
    pub fn read_null(&mut self) -> Result<()> {
        let len = self.expect_tag(tag::universal::NULL)?;
        if len != 0 {
            return Err(self.error(DecodeErrorKind::InvalidNull));
        }
        Ok(())
    }

    /// Read an OBJECT IDENTIFIER.
    pub fn read_oid(&mut self) -> Result<Oid> {
        let len = self.expect_tag(tag::universal::OBJECT_IDENTIFIER)?;
        self.read_oid_value(len)
    }

    /// Read an OID given a pre-read length.
    pub fn read_oid_value(&mut self, len: usize) -> Result<Oid> {
        let start = self.offset();
        let bytes = self.read_bytes(len)?;
        Oid::from_ber(&bytes).map_err(|e| match e {
            Error::Decode { kind, .. } => Error::decode(start, kind),
            other => other,
        })
    }

    /// Read an IP address.
    pub fn read_ip_address(&mut self) -> Result<[u8; 4]> {
        let len = self.expect_tag(tag::application::IP_ADDRESS)?;
        self.read_ip_address_value(len)
    }

    /// Read an IpAddress body, which must be exactly four octets.
    pub fn read_ip_address_value(&mut self, len: usize) -> Result<[u8; 4]> {
        if len != 4 {
            return Err(self.error(DecodeErrorKind::InvalidIpAddressLength { length: len }));
        }
        let bytes = self.read_bytes(4)?;
        Ok([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    /// Read a SEQUENCE, returning a decoder for its contents.
    pub fn read_sequence(&mut self) -> Result<Decoder> {
        self.read_constructed(tag::universal::SEQUENCE)
    }

    /// Read a constructed type with a specific tag, returning a decoder for its contents.
    pub fn read_constructed(&mut self, expected_tag: u8) -> Result<Decoder> {
        let len = self.expect_tag(expected_tag)?;
        self.sub_decoder(len)
    }

    /// Create a sub-decoder for the next `len` bytes.
    pub fn sub_decoder(&mut self, len: usize) -> Result<Decoder> {
        let base = self.offset();
        let data = self.read_bytes(len)?;
        Ok(Decoder {
            data,
            offset: 0,
            base,
        })
    }

    /// Skip a TLV (tag-length-value) without parsing.
    pub fn skip_tlv(&mut self) -> Result<()> {
        self.read_tag()?;
        let len = self.read_length()?;
        self.offset += len;
        Ok(())
    }

    /// Fail if any bytes remain.
    pub fn finish(&self) -> Result<()> {
        if !self.is_empty() {
            return Err(self.error(DecodeErrorKind::TrailingData {
                remaining: self.remaining(),
            }));
        }
        Ok(())
    }

    /// Get the underlying bytes for the entire buffer.
    pub fn as_bytes(&self) -> &Bytes {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(err: Error) -> DecodeErrorKind {
        match err {
            Error::Decode { kind, .. } => kind,
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn integers() {
        assert_eq!(Decoder::from_slice(&[0x02, 0x01, 0x00]).read_integer().unwrap(), 0);
        assert_eq!(Decoder::from_slice(&[0x02, 0x01, 0xFF]).read_integer().unwrap(), -1);
        assert_eq!(
            Decoder::from_slice(&[0x02, 0x02, 0x00, 0x80]).read_integer().unwrap(),
            128
        );
        assert_eq!(
            Decoder::from_slice(&[0x02, 0x02, 0xFF, 0x7F]).read_integer().unwrap(),
            -129
        );
    }

    #[test]
    fn non_minimal_integer_accepted() {
        let mut dec = Decoder::from_slice(&[0x02, 0x03, 0x00, 0x00, 0x05]);
        assert_eq!(dec.read_integer().unwrap(), 5);
    }

    #[test]
    fn zero_length_integer_rejected() {
        let err = Decoder::from_slice(&[0x02, 0x00]).read_integer().unwrap_err();
        assert_eq!(kind(err), DecodeErrorKind::ZeroLengthInteger);
    }

    #[test]
    fn unsigned_with_pad() {
        let mut dec = Decoder::from_slice(&[0x41, 0x05, 0x00, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(dec.read_unsigned32(tag::application::COUNTER32).unwrap(), u32::MAX);
    }

    #[test]
    fn unsigned_above_u32_rejected() {
        // 2^32 + 5
        let err = Decoder::from_slice(&[0x41, 0x05, 0x01, 0x00, 0x00, 0x00, 0x05])
            .read_unsigned32(tag::application::COUNTER32)
            .unwrap_err();
        assert_eq!(kind(err), DecodeErrorKind::Unsigned32Overflow { length: 5 });

        let mut padded = Decoder::from_slice(&[0x42, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00, 0x07]);
        assert_eq!(padded.read_unsigned32(tag::application::GAUGE32).unwrap(), 7);
    }

    #[test]
    fn counter64_limits() {
        let mut max = vec![0x46, 0x09, 0x00];
        max.extend([0xFF; 8]);
        assert_eq!(Decoder::from_slice(&max).read_counter64().unwrap(), u64::MAX);

        let mut too_big = vec![0x46, 0x09, 0x01];
        too_big.extend([0x00; 8]);
        let err = Decoder::from_slice(&too_big).read_counter64().unwrap_err();
        assert!(matches!(kind(err), DecodeErrorKind::Integer64TooLong { .. }));
    }

    #[test]
    fn length_past_end_is_rejected() {
        let err = Decoder::from_slice(&[0x04, 0x05, b'a', b'b'])
            .read_octet_string()
            .unwrap_err();
        assert!(matches!(kind(err), DecodeErrorKind::InsufficientData { needed: 5, available: 2 }));
    }

    #[test]
    fn unexpected_tag_reports_both() {
        let err = Decoder::from_slice(&[0x05, 0x00]).read_integer().unwrap_err();
        assert_eq!(
            kind(err),
            DecodeErrorKind::UnexpectedTag {
                expected: 0x02,
                actual: 0x05
            }
        );
    }

    #[test]
    fn constructed_octet_string_rejected() {
        let err = Decoder::from_slice(&[0x24, 0x03, 0x04, 0x01, 0x41])
            .read_octet_string()
            .unwrap_err();
        assert_eq!(kind(err), DecodeErrorKind::ConstructedOctetString);
    }

    #[test]
    fn sub_decoder_offsets_are_absolute() {
        let data = [0x30, 0x05, 0x02, 0x01, 0x01, 0x02, 0x00];
        let mut dec = Decoder::from_slice(&data);
        let mut seq = dec.read_sequence().unwrap();
        assert_eq!(seq.read_integer().unwrap(), 1);
        let err = seq.read_integer().unwrap_err();
        match err {
            Error::Decode { offset, kind } => {
                assert_eq!(kind, DecodeErrorKind::ZeroLengthInteger);
                assert_eq!(offset, 7);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn null_with_content_rejected() {
        let err = Decoder::from_slice(&[0x05, 0x01, 0x00]).read_null().unwrap_err();
        assert_eq!(kind(err), DecodeErrorKind::InvalidNull);
    }

    #[test]
    fn trailing_bytes_detected() {
        let mut dec = Decoder::from_slice(&[0x05, 0x00, 0xFF]);
        dec.read_null().unwrap();
        assert!(dec.finish().is_err());
    }

    #[test]
    fn empty_input() {
        let err = Decoder::from_slice(&[]).read_sequence().unwrap_err();
        assert_eq!(kind(err), DecodeErrorKind::TruncatedData);
    }
}
