//! SNMPv3 message layout (RFC 3412 §6).
//!
//! ```text
//! SNMPv3Message ::= SEQUENCE {
//!     msgVersion            INTEGER (3),
//!     msgGlobalData         HeaderData,
//!     msgSecurityParameters OCTET STRING,
//!     msgData               ScopedPduData   -- plaintext SEQUENCE or encrypted OCTET STRING
//! }
//! ```

use std::ops::Range;

use bytes::Bytes;

use crate::ber::{Decoder, EncodeBuf, Mark, tag};
use crate::error::{DecodeErrorKind, Error, Result};
use crate::pdu::{Pdu, PduBody};
use crate::security::{SecurityLevel, SecurityModel};
use crate::v3::UsmSecurityParams;

/// Smallest msgMaxSize an engine may advertise.
pub const MIN_MSG_MAX_SIZE: i32 = 484;

/// Largest payload of a single UDP datagram over IPv4.
pub const DEFAULT_MSG_MAX_SIZE: i32 = 65507;

const REPORTABLE: u8 = 0x04;

/// msgFlags: security level plus the reportable bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgFlags {
    pub security_level: SecurityLevel,
    pub reportable: bool,
}

impl MsgFlags {
    pub fn new(security_level: SecurityLevel, reportable: bool) -> Self {
        Self {
            security_level,
            reportable,
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self> {
        Ok(Self {
            security_level: SecurityLevel::from_flags(byte)?,
            reportable: byte & REPORTABLE != 0,
        })
    }

    pub fn to_byte(self) -> u8 {
        self.security_level.to_flags() | if self.reportable { REPORTABLE } else { 0 }
    }
}

/// msgGlobalData (HeaderData).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgGlobalData {
    pub msg_id: i32,
    pub msg_max_size: i32,
    pub msg_flags: MsgFlags,
    pub msg_security_model: SecurityModel,
}

impl MsgGlobalData {
    pub fn new(msg_id: i32, msg_max_size: i32, msg_flags: MsgFlags) -> Self {
        Self {
            msg_id,
            msg_max_size,
            msg_flags,
            msg_security_model: SecurityModel::Usm,
        }
    }

    pub fn encode(&self, buf: &mut EncodeBuf) {
        buf.push_sequence(|buf| {
            buf.push_integer(self.msg_security_model.as_i32());
            buf.push_octet_string(&[self.msg_flags.to_byte()]);
            buf.push_integer(self.msg_max_size);
            buf.push_integer(self.msg_id);
        });
    }

    pub fn decode(decoder: &mut Decoder) -> Result<Self> {
        let mut seq = decoder.read_sequence()?;

        let offset = seq.offset();
        let msg_id = seq.read_integer()?;
        if msg_id < 0 {
            return Err(Error::decode(offset, DecodeErrorKind::NegativeValue));
        }

        let offset = seq.offset();
        let msg_max_size = seq.read_integer()?;
        if msg_max_size < MIN_MSG_MAX_SIZE {
            return Err(Error::decode(
                offset,
                DecodeErrorKind::MsgMaxSizeTooSmall {
                    value: msg_max_size,
                    minimum: MIN_MSG_MAX_SIZE,
                },
            ));
        }

        let offset = seq.offset();
        let flags = seq.read_octet_string()?;
        let [byte] = flags[..] else {
            return Err(Error::decode(offset, DecodeErrorKind::InvalidMsgFlags));
        };
        let msg_flags = MsgFlags::from_byte(byte).map_err(|_| Error::decode(offset, DecodeErrorKind::InvalidMsgFlags))?;

        let offset = seq.offset();
        let raw_model = seq.read_integer()?;
        let msg_security_model = match SecurityModel::from_i32(raw_model) {
            Some(SecurityModel::Usm) => SecurityModel::Usm,
            _ => {
                tracing::debug!(target: "snmp_engine::ber", { snmp.offset = offset, model = raw_model }, "unsupported msgSecurityModel");
                return Err(Error::decode(offset, DecodeErrorKind::UnknownSecurityModel(raw_model)));
            }
        };
        seq.finish()?;

        Ok(Self {
            msg_id,
            msg_max_size,
            msg_flags,
            msg_security_model,
        })
    }
}

/// contextEngineID, contextName and the PDU they scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedPdu {
    pub context_engine_id: Bytes,
    pub context_name: Bytes,
    pub pdu: Pdu,
}

impl ScopedPdu {
    pub fn new(context_engine_id: impl Into<Bytes>, context_name: impl Into<Bytes>, pdu: Pdu) -> Self {
        Self {
            context_engine_id: context_engine_id.into(),
            context_name: context_name.into(),
            pdu,
        }
    }

    pub fn encode(&self, buf: &mut EncodeBuf) {
        buf.push_sequence(|buf| {
            self.pdu.encode(buf);
            buf.push_octet_string(&self.context_name);
            buf.push_octet_string(&self.context_engine_id);
        });
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = EncodeBuf::new();
        self.encode(&mut buf);
        buf.finish()
    }

    /// Decode one ScopedPDU. Bytes after it (cipher padding) are ignored.
    pub fn decode(decoder: &mut Decoder) -> Result<Self> {
        let mut seq = decoder.read_sequence()?;
        let context_engine_id = seq.read_octet_string()?;
        let context_name = seq.read_octet_string()?;
        let offset = seq.offset();
        let pdu = match PduBody::decode(&mut seq)? {
            PduBody::Pdu(pdu) => pdu,
            PduBody::TrapV1(_) => {
                return Err(Error::decode(offset, DecodeErrorKind::UnexpectedPduType(tag::pdu::TRAP_V1)));
            }
        };
        seq.finish()?;
        Ok(Self {
            context_engine_id,
            context_name,
            pdu,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum V3MessageData {
    Plaintext(ScopedPdu),
    /// encryptedPDU, still to be decrypted by USM.
    Encrypted(Bytes),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V3Message {
    pub global: MsgGlobalData,
    /// Opaque msgSecurityParameters, a BER-encoded [`UsmSecurityParams`].
    pub security_params: Bytes,
    pub data: V3MessageData,
    /// Offset of the security parameters content in the buffer this was decoded from.
    security_params_at: Option<usize>,
}

impl V3Message {
    pub fn new(global: MsgGlobalData, security_params: Bytes, data: V3MessageData) -> Self {
        Self {
            global,
            security_params,
            data,
            security_params_at: None,
        }
    }

    /// Unauthenticated probe used to learn an agent's engine id, boots and time.
    pub fn discovery_request(msg_id: i32) -> Self {
        Self::new(
            MsgGlobalData::new(
                msg_id,
                DEFAULT_MSG_MAX_SIZE,
                MsgFlags::new(SecurityLevel::NoAuthNoPriv, true),
            ),
            UsmSecurityParams::discovery().encode(),
            V3MessageData::Plaintext(ScopedPdu::new(Bytes::new(), Bytes::new(), Pdu::get_request(msg_id, &[]))),
        )
    }

    pub fn msg_id(&self) -> i32 {
        self.global.msg_id
    }

    pub fn security_level(&self) -> SecurityLevel {
        self.global.msg_flags.security_level
    }

    pub fn scoped_pdu(&self) -> Option<&ScopedPdu> {
        match &self.data {
            V3MessageData::Plaintext(scoped) => Some(scoped),
            V3MessageData::Encrypted(_) => None,
        }
    }

    pub fn security_params_offset(&self) -> Option<usize> {
        self.security_params_at
    }

    pub fn encode(&self) -> Result<Bytes> {
        Ok(self.encode_marked()?.0)
    }

    /// Encode, also returning where the security parameters content landed.
    pub fn encode_marked(&self) -> Result<(Bytes, Range<usize>)> {
        if let V3MessageData::Plaintext(scoped) = &self.data {
            scoped.pdu.validate()?;
        }
        let mut buf = EncodeBuf::new();
        let mut mark = Mark::default();
        buf.push_sequence(|buf| {
            match &self.data {
                V3MessageData::Plaintext(scoped) => scoped.encode(buf),
                V3MessageData::Encrypted(ciphertext) => buf.push_octet_string(ciphertext),
            }
            mark = buf.push_octet_string_marked(&self.security_params);
            self.global.encode(buf);
            buf.push_integer(3);
        });
        let total = buf.len();
        Ok((buf.finish(), mark.range(total)))
    }

    pub fn decode(data: Bytes) -> Result<Self> {
        let mut decoder = Decoder::new(data);
        let mut seq = decoder.read_sequence()?;
        let offset = seq.offset();
        let version = seq.read_integer()?;
        if version != 3 {
            return Err(Error::decode(offset, DecodeErrorKind::UnknownVersion(version)));
        }
        Self::decode_from_sequence(&mut seq)
    }

    /// Decode the fields after msgVersion.
    pub(crate) fn decode_from_sequence(seq: &mut Decoder) -> Result<Self> {
        let global = MsgGlobalData::decode(seq)?;

        let len = seq.expect_tag(tag::universal::OCTET_STRING)?;
        let security_params_at = seq.offset();
        let security_params = seq.read_bytes(len)?;

        let data = if global.msg_flags.security_level.requires_priv() {
            V3MessageData::Encrypted(seq.read_octet_string()?)
        } else {
            V3MessageData::Plaintext(ScopedPdu::decode(seq)?)
        };

        Ok(Self {
            global,
            security_params,
            data,
            security_params_at: Some(security_params_at),
        })
    }
}
