//! Typed varbind values.
//!
//! [`Value`] is the closed set of SMIv2 types plus the three RFC 3416
//! exception markers. Application tags this crate does not model are
//! carried through unchanged as [`Value::Unknown`].

use std::fmt;
use std::net::Ipv4Addr;

use bytes::Bytes;

use crate::ber::{Decoder, EncodeBuf, tag};
use crate::error::{DecodeErrorKind, EncodeErrorKind, Error, Result};
use crate::oid::Oid;

/// SNMP value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Integer(i32),
    OctetString(Bytes),
    Null,
    ObjectIdentifier(Oid),
    IpAddress([u8; 4]),
    Counter32(u32),
    /// Gauge32, also used for Unsigned32.
    Gauge32(u32),
    /// Hundredths of a second.
    TimeTicks(u32),
    Opaque(Bytes),
    Counter64(u64),
    NoSuchObject,
    NoSuchInstance,
    /// End of the agent's MIB view; terminates walks.
    EndOfMibView,
    /// Value with a tag not modelled above, kept verbatim.
    Unknown { tag: u8, data: Bytes },
}

impl Value {
    /// True for the three exception markers.
    pub fn is_exception(&self) -> bool {
        matches!(
            self,
            Value::NoSuchObject | Value::NoSuchInstance | Value::EndOfMibView
        )
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Any of the unsigned 32-bit types.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::Counter32(v) | Value::Gauge32(v) | Value::TimeTicks(v) => Some(*v),
            Value::Integer(v) if *v >= 0 => Some(*v as u32),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Counter64(v) => Some(*v),
            other => other.as_u32().map(u64::from),
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::OctetString(b) | Value::Opaque(b) => Some(b),
            _ => None,
        }
    }

    /// OCTET STRING content as UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::OctetString(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_oid(&self) -> Option<&Oid> {
        match self {
            Value::ObjectIdentifier(oid) => Some(oid),
            _ => None,
        }
    }

    /// Check that the value has a canonical BER form.
    pub fn validate(&self) -> Result<()> {
        match self {
            Value::ObjectIdentifier(oid) => oid.check_encodable(),
            Value::Unknown { tag: t, .. } if !is_opaque_tag(*t) => {
                Err(Error::encode(EncodeErrorKind::ValueTypeMismatch { tag: *t }))
            }
            _ => Ok(()),
        }
    }

    /// Encode into a reverse buffer.
    pub fn encode(&self, buf: &mut EncodeBuf) {
        match self {
            Value::Integer(v) => buf.push_integer(*v),
            Value::OctetString(data) => buf.push_octet_string(data),
            Value::Null => buf.push_null(),
            Value::ObjectIdentifier(oid) => buf.push_oid(oid),
            Value::IpAddress(addr) => buf.push_ip_address(*addr),
            Value::Counter32(v) => buf.push_unsigned32(tag::application::COUNTER32, *v),
            Value::Gauge32(v) => buf.push_unsigned32(tag::application::GAUGE32, *v),
            Value::TimeTicks(v) => buf.push_unsigned32(tag::application::TIMETICKS, *v),
            Value::Opaque(data) => buf.push_tlv(tag::application::OPAQUE, data),
            Value::Counter64(v) => buf.push_counter64(*v),
            Value::NoSuchObject => buf.push_tlv(tag::context::NO_SUCH_OBJECT, &[]),
            Value::NoSuchInstance => buf.push_tlv(tag::context::NO_SUCH_INSTANCE, &[]),
            Value::EndOfMibView => buf.push_tlv(tag::context::END_OF_MIB_VIEW, &[]),
            Value::Unknown { tag, data } => buf.push_tlv(*tag, data),
        }
    }

    /// Decode one value TLV.
    pub fn decode(decoder: &mut Decoder) -> Result<Self> {
        let start = decoder.offset();
        let t = decoder.read_tag()?;
        if t == tag::universal::OCTET_STRING_CONSTRUCTED {
            return Err(Error::decode(start, DecodeErrorKind::ConstructedOctetString));
        }
        let len = decoder.read_length()?;

        let value = match t {
            tag::universal::INTEGER => Value::Integer(decoder.read_integer_value(len)?),
            tag::universal::OCTET_STRING => Value::OctetString(decoder.read_bytes(len)?),
            tag::universal::NULL => {
                if len != 0 {
                    return Err(Error::decode(start, DecodeErrorKind::InvalidNull));
                }
                Value::Null
            }
            tag::universal::OBJECT_IDENTIFIER => {
                Value::ObjectIdentifier(decoder.read_oid_value(len)?)
            }
            tag::application::IP_ADDRESS => {
                Value::IpAddress(decoder.read_ip_address_value(len)?)
            }
            tag::application::COUNTER32 => {
                Value::Counter32(decoder.read_unsigned32_value(len)?)
            }
            tag::application::GAUGE32 => Value::Gauge32(decoder.read_unsigned32_value(len)?),
            tag::application::TIMETICKS => {
                Value::TimeTicks(decoder.read_unsigned32_value(len)?)
            }
            tag::application::OPAQUE => Value::Opaque(decoder.read_bytes(len)?),
            tag::application::COUNTER64 => {
                Value::Counter64(decoder.read_counter64_value(len)?)
            }
            // Exception markers are NULL-like; tolerate stray content
            tag::context::NO_SUCH_OBJECT => {
                decoder.read_bytes(len)?;
                Value::NoSuchObject
            }
            tag::context::NO_SUCH_INSTANCE => {
                decoder.read_bytes(len)?;
                Value::NoSuchInstance
            }
            tag::context::END_OF_MIB_VIEW => {
                decoder.read_bytes(len)?;
                Value::EndOfMibView
            }
            other if is_opaque_tag(other) => Value::Unknown {
                tag: other,
                data: decoder.read_bytes(len)?,
            },
            other => {
                tracing::debug!(target: "snmp_engine::ber", { snmp.offset = start, tag = other }, "invalid value tag");
                return Err(Error::decode(start, DecodeErrorKind::InvalidValueTag(other)));
            }
        };
        Ok(value)
    }
}

/// Tags that may be carried as [`Value::Unknown`]: primitive, non-universal,
/// and without a typed variant.
fn is_opaque_tag(t: u8) -> bool {
    !tag::is_constructed(t)
        && tag::tag_class(t) != tag::class::UNIVERSAL
        && !tag::is_typed_value_tag(t)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "{}", v),
            Value::OctetString(data) => match std::str::from_utf8(data) {
                Ok(s) if s.chars().all(|c| !c.is_control() || c.is_whitespace()) => {
                    write!(f, "{}", s)
                }
                _ => write_hex(f, data),
            },
            Value::Null => write!(f, "NULL"),
            Value::ObjectIdentifier(oid) => write!(f, "{}", oid),
            Value::IpAddress(addr) => write!(f, "{}", Ipv4Addr::from(*addr)),
            Value::Counter32(v) | Value::Gauge32(v) => write!(f, "{}", v),
            Value::TimeTicks(v) => {
                let secs = v / 100;
                write!(
                    f,
                    "({}) {}:{:02}:{:02}.{:02}",
                    v,
                    secs / 3600,
                    (secs / 60) % 60,
                    secs % 60,
                    v % 100
                )
            }
            Value::Opaque(data) => {
                write!(f, "Opaque: ")?;
                write_hex(f, data)
            }
            Value::Counter64(v) => write!(f, "{}", v),
            Value::NoSuchObject => write!(f, "noSuchObject"),
            Value::NoSuchInstance => write!(f, "noSuchInstance"),
            Value::EndOfMibView => write!(f, "endOfMibView"),
            Value::Unknown { tag, data } => {
                write!(f, "[0x{:02X}] ", tag)?;
                write_hex(f, data)
            }
        }
    }
}

fn write_hex(f: &mut fmt::Formatter<'_>, data: &[u8]) -> fmt::Result {
    for (i, b) in data.iter().enumerate() {
        if i > 0 {
            f.write_str(" ")?;
        }
        write!(f, "{:02X}", b)?;
    }
    Ok(())
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::OctetString(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::OctetString(b)
    }
}

impl From<Oid> for Value {
    fn from(oid: Oid) -> Self {
        Value::ObjectIdentifier(oid)
    }
}

impl From<Ipv4Addr> for Value {
    fn from(addr: Ipv4Addr) -> Self {
        Value::IpAddress(addr.octets())
    }
}
