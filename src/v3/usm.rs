//! msgSecurityParameters for the User-based Security Model (RFC 3414 §2.4).
//!
//! ```text
//! UsmSecurityParameters ::= SEQUENCE {
//!     msgAuthoritativeEngineID     OCTET STRING,
//!     msgAuthoritativeEngineBoots  INTEGER (0..2147483647),
//!     msgAuthoritativeEngineTime   INTEGER (0..2147483647),
//!     msgUserName                  OCTET STRING (SIZE(0..32)),
//!     msgAuthenticationParameters  OCTET STRING,
//!     msgPrivacyParameters         OCTET STRING
//! }
//! ```

use std::ops::Range;

use bytes::Bytes;

use crate::ber::{Decoder, EncodeBuf, Mark, tag};
use crate::error::{DecodeErrorKind, Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UsmSecurityParams {
    pub engine_id: Bytes,
    pub engine_boots: u32,
    pub engine_time: u32,
    pub username: Bytes,
    /// Truncated HMAC, or empty when unauthenticated.
    pub auth_params: Bytes,
    /// Salt, or empty when unencrypted.
    pub priv_params: Bytes,
}

impl UsmSecurityParams {
    pub fn new(
        engine_id: impl Into<Bytes>,
        engine_boots: u32,
        engine_time: u32,
        username: impl Into<Bytes>,
    ) -> Self {
        Self {
            engine_id: engine_id.into(),
            engine_boots,
            engine_time,
            username: username.into(),
            ..Self::default()
        }
    }

    /// All-empty parameters, as sent in a discovery probe.
    pub fn discovery() -> Self {
        Self::default()
    }

    /// Zero-filled auth params of the given MAC length, overwritten after signing.
    pub fn with_auth_placeholder(mut self, mac_len: usize) -> Self {
        self.auth_params = Bytes::from(vec![0u8; mac_len]);
        self
    }

    pub fn with_priv_params(mut self, priv_params: impl Into<Bytes>) -> Self {
        self.priv_params = priv_params.into();
        self
    }

    /// Encode, returning where the auth params content sits in the output.
    pub fn encode_marked(&self) -> (Bytes, Range<usize>) {
        let mut buf = EncodeBuf::with_capacity(64 + self.engine_id.len() + self.username.len());
        let mut mark = Mark::default();
        buf.push_sequence(|buf| {
            buf.push_octet_string(&self.priv_params);
            mark = buf.push_octet_string_marked(&self.auth_params);
            buf.push_octet_string(&self.username);
            buf.push_unsigned32(tag::universal::INTEGER, self.engine_time);
            buf.push_unsigned32(tag::universal::INTEGER, self.engine_boots);
            buf.push_octet_string(&self.engine_id);
        });
        let total = buf.len();
        (buf.finish(), mark.range(total))
    }

    pub fn encode(&self) -> Bytes {
        self.encode_marked().0
    }

    /// Decode, also returning the auth params content range relative to `data`.
    pub fn decode_marked(data: Bytes) -> Result<(Self, Range<usize>)> {
        let mut decoder = Decoder::new(data);
        let mut seq = decoder.read_sequence()?;

        let engine_id = seq.read_octet_string()?;
        let engine_boots = read_non_negative(&mut seq)?;
        let engine_time = read_non_negative(&mut seq)?;
        let username = seq.read_octet_string()?;

        let len = seq.expect_tag(tag::universal::OCTET_STRING)?;
        let start = seq.offset();
        let auth_params = seq.read_bytes(len)?;

        let priv_params = seq.read_octet_string()?;
        seq.finish()?;

        Ok((
            Self {
                engine_id,
                engine_boots,
                engine_time,
                username,
                auth_params,
                priv_params,
            },
            start..start + len,
        ))
    }

    pub fn decode(data: Bytes) -> Result<Self> {
        Ok(Self::decode_marked(data)?.0)
    }
}

fn read_non_negative(decoder: &mut Decoder) -> Result<u32> {
    let offset = decoder.offset();
    let value = decoder.read_integer()?;
    u32::try_from(value).map_err(|_| {
        tracing::debug!(target: "snmp_engine::usm", { snmp.offset = offset, value }, "negative boots/time");
        Error::decode(offset, DecodeErrorKind::NegativeValue)
    })
}
