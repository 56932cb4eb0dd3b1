//! BER definite-length octets (X.690 Section 8.1.3).
//!
//! Short form covers 0-127; long form uses 1-4 subsequent octets. The
//! indefinite form (0x80) never appears in SNMP and is rejected.

use crate::error::{DecodeErrorKind, Error, Result};

/// Largest content length accepted on decode (2 MiB).
///
/// SNMP messages are bounded by the UDP datagram size, so anything larger
/// is treated as hostile input.
pub const MAX_LENGTH: usize = 0x20_0000;

/// Encode a length, returning the octets reversed for a prepend buffer.
///
/// `buf[..count]` holds the length octets last-to-first.
pub fn encode_length(len: usize) -> ([u8; 5], usize) {
    let mut buf = [0u8; 5];
    if len < 0x80 {
        buf[0] = len as u8;
        return (buf, 1);
    }

    let mut remaining = len;
    let mut count = 0;
    while remaining > 0 && count < 4 {
        buf[count] = remaining as u8;
        remaining >>= 8;
        count += 1;
    }
    buf[count] = 0x80 | count as u8;
    (buf, count + 1)
}

/// Number of octets needed for the length field of `len`.
pub fn length_of_length(len: usize) -> usize {
    encode_length(len).1
}

/// Decode a length, returning `(length, octets consumed)`.
///
/// `base_offset` is the position of `data[0]` within the enclosing buffer
/// and is only used for error reporting. Non-minimal long forms are
/// accepted (X.690 8.1.3.5 Note 2).
pub fn decode_length(data: &[u8], base_offset: usize) -> Result<(usize, usize)> {
    let Some(&first) = data.first() else {
        return Err(Error::decode(base_offset, DecodeErrorKind::TruncatedData));
    };

    if first & 0x80 == 0 {
        return Ok((first as usize, 1));
    }

    let octets = (first & 0x7F) as usize;
    if octets == 0 {
        return Err(Error::decode(base_offset, DecodeErrorKind::IndefiniteLength));
    }
    if octets > 4 {
        return Err(Error::decode(
            base_offset,
            DecodeErrorKind::LengthTooLong { octets },
        ));
    }
    let Some(body) = data.get(1..=octets) else {
        return Err(Error::decode(base_offset, DecodeErrorKind::TruncatedData));
    };

    let len = body.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize);
    if len > MAX_LENGTH {
        return Err(Error::decode(
            base_offset,
            DecodeErrorKind::LengthExceedsMax {
                length: len,
                max: MAX_LENGTH,
            },
        ));
    }

    Ok((len, 1 + octets))
}
