//! Whole-message codec.
//!
//! - [`CommunityMessage`]: SNMPv1/v2c, community string plus PDU
//! - [`V3Message`]: SNMPv3 header, opaque USM parameters and a scoped PDU
//!
//! [`MessageHeader::peek`] reads only the routing fields so the processor
//! can pick a security model before committing to a full decode.

mod community;
mod v3;

pub use community::CommunityMessage;
pub use v3::{
    DEFAULT_MSG_MAX_SIZE, MIN_MSG_MAX_SIZE, MsgFlags, MsgGlobalData, ScopedPdu, V3Message,
    V3MessageData,
};

use bytes::Bytes;

use crate::ber::Decoder;
use crate::error::{DecodeErrorKind, EncodeErrorKind, Error, Result};
use crate::pdu::{PduBody, PduType};
use crate::security::{SecurityLevel, SecurityModel};
use crate::v3::UsmSecurityParams;
use crate::version::Version;

/// Decoded message of any version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Community(CommunityMessage),
    V3(V3Message),
}

/// Security parameters as carried by each message version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityParameters {
    Community(Bytes),
    Usm(UsmSecurityParams),
}

impl Message {
    /// Pair a PDU with security parameters, rejecting a mismatched pairing.
    ///
    /// SNMPv3 messages built here are unsecured (noAuthNoPriv); the USM adds
    /// authentication and privacy on top.
    pub fn assemble(version: Version, params: SecurityParameters, pdu: impl Into<PduBody>) -> Result<Self> {
        let pdu = pdu.into();
        match (version, params) {
            (Version::V1 | Version::V2c, SecurityParameters::Community(community)) => {
                CommunityMessage::new(version, community, pdu).map(Message::Community)
            }
            (Version::V3, SecurityParameters::Usm(usm)) => {
                let Some(pdu) = pdu.into_pdu() else {
                    return Err(Error::encode(EncodeErrorKind::UnsupportedPdu { version }));
                };
                let flags = MsgFlags::new(SecurityLevel::NoAuthNoPriv, pdu.pdu_type.is_confirmed());
                let scoped = ScopedPdu::new(usm.engine_id.clone(), Bytes::new(), pdu);
                Ok(Message::V3(V3Message::new(
                    MsgGlobalData::new(scoped.pdu.request_id.max(0), DEFAULT_MSG_MAX_SIZE, flags),
                    usm.encode(),
                    V3MessageData::Plaintext(scoped),
                )))
            }
            (version, _) => Err(Error::encode(EncodeErrorKind::SecurityModelMismatch { version })),
        }
    }

    pub fn version(&self) -> Version {
        match self {
            Message::Community(m) => m.version,
            Message::V3(_) => Version::V3,
        }
    }

    /// The PDU, unless it is still encrypted.
    pub fn pdu(&self) -> Option<&PduBody> {
        match self {
            Message::Community(m) => Some(&m.pdu),
            Message::V3(_) => None,
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        match self {
            Message::Community(m) => m.encode(),
            Message::V3(m) => m.encode(),
        }
    }

    pub fn decode(data: Bytes) -> Result<Self> {
        let mut decoder = Decoder::new(data);
        let mut seq = decoder.read_sequence()?;
        let offset = seq.offset();
        let raw = seq.read_integer()?;
        match Version::from_i32(raw) {
            Some(Version::V3) => V3Message::decode_from_sequence(&mut seq).map(Message::V3),
            Some(version) => CommunityMessage::decode_from_sequence(&mut seq, version).map(Message::Community),
            None => Err(Error::decode(offset, DecodeErrorKind::UnknownVersion(raw))),
        }
    }
}

impl From<CommunityMessage> for Message {
    fn from(msg: CommunityMessage) -> Self {
        Message::Community(msg)
    }
}

impl From<V3Message> for Message {
    fn from(msg: V3Message) -> Self {
        Message::V3(msg)
    }
}

/// Routing fields read without decoding the PDU body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub version: Version,
    pub security_model: SecurityModel,
    /// Community string (v1/v2c).
    pub community: Option<Bytes>,
    /// msgID (v3).
    pub msg_id: Option<i32>,
    /// msgFlags (v3).
    pub flags: Option<MsgFlags>,
    /// PDU kind, when it is visible in plaintext.
    pub pdu_type: Option<PduType>,
    /// request-id, when the PDU is visible in plaintext.
    pub request_id: Option<i32>,
}

impl MessageHeader {
    pub fn peek(data: &Bytes) -> Result<Self> {
        let mut decoder = Decoder::new(data.clone());
        let mut seq = decoder.read_sequence()?;
        let offset = seq.offset();
        let raw = seq.read_integer()?;
        let version =
            Version::from_i32(raw).ok_or_else(|| Error::decode(offset, DecodeErrorKind::UnknownVersion(raw)))?;

        if version.is_community() {
            let community = seq.read_octet_string()?;
            let (pdu_type, request_id) = peek_pdu(&mut seq);
            return Ok(Self {
                version,
                security_model: version.security_model(),
                community: Some(community),
                msg_id: None,
                flags: None,
                pdu_type,
                request_id,
            });
        }

        let global = MsgGlobalData::decode(&mut seq)?;
        let (pdu_type, request_id) = if global.msg_flags.security_level.requires_priv() {
            (None, None)
        } else {
            seq.read_octet_string()?;
            match seq.read_sequence() {
                Ok(mut scoped) => {
                    scoped.read_octet_string()?;
                    scoped.read_octet_string()?;
                    peek_pdu(&mut scoped)
                }
                Err(_) => (None, None),
            }
        };
        Ok(Self {
            version,
            security_model: global.msg_security_model,
            community: None,
            msg_id: Some(global.msg_id),
            flags: Some(global.msg_flags),
            pdu_type,
            request_id,
        })
    }
}

fn peek_pdu(decoder: &mut Decoder) -> (Option<PduType>, Option<i32>) {
    let pdu_type = decoder.peek_tag().and_then(PduType::from_tag);
    let request_id = match pdu_type {
        Some(PduType::TrapV1) | None => None,
        Some(pdu_type) => decoder
            .read_constructed(pdu_type.tag())
            .and_then(|mut body| body.read_integer())
            .ok(),
    };
    (pdu_type, request_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid;
    use crate::pdu::Pdu;

    #[test]
    fn assemble_checks_pairing() {
        let pdu = Pdu::get_request(7, &[oid!(1, 3, 6, 1, 2, 1, 1, 1, 0)]);
        assert!(Message::assemble(Version::V2c, SecurityParameters::Community("public".into()), pdu.clone()).is_ok());
        assert!(Message::assemble(Version::V3, SecurityParameters::Usm(UsmSecurityParams::discovery()), pdu.clone()).is_ok());

        for (version, params) in [
            (Version::V1, SecurityParameters::Usm(UsmSecurityParams::discovery())),
            (Version::V3, SecurityParameters::Community("public".into())),
        ] {
            assert!(matches!(
                Message::assemble(version, params, pdu.clone()),
                Err(Error::Encode {
                    kind: EncodeErrorKind::SecurityModelMismatch { .. }
                })
            ));
        }
    }

    #[test]
    fn decode_dispatches_on_version() {
        let pdu = Pdu::get_next_request(3, &[oid!(1, 3, 6, 1)]);
        let v1 = Message::assemble(Version::V1, SecurityParameters::Community("private".into()), pdu.clone()).unwrap();
        let decoded = Message::decode(v1.encode().unwrap()).unwrap();
        assert_eq!(decoded, v1);
        assert_eq!(decoded.version(), Version::V1);

        let v3 = Message::assemble(Version::V3, SecurityParameters::Usm(UsmSecurityParams::discovery()), pdu).unwrap();
        let Message::V3(decoded) = Message::decode(v3.encode().unwrap()).unwrap() else {
            panic!("expected v3");
        };
        assert_eq!(decoded.msg_id(), 3);
        assert_eq!(decoded.scoped_pdu().unwrap().pdu.pdu_type, PduType::GetNextRequest);
    }

    #[test]
    fn peek_reads_routing_fields() {
        let pdu = Pdu::get_request(99, &[oid!(1, 3, 6, 1)]);
        let msg = CommunityMessage::v2c("public", pdu).unwrap();
        let header = MessageHeader::peek(&msg.encode().unwrap()).unwrap();
        assert_eq!(header.version, Version::V2c);
        assert_eq!(header.security_model, SecurityModel::V2c);
        assert_eq!(header.community.as_deref(), Some(&b"public"[..]));
        assert_eq!(header.pdu_type, Some(PduType::GetRequest));
        assert_eq!(header.request_id, Some(99));

        let header = MessageHeader::peek(&V3Message::discovery_request(12).encode().unwrap()).unwrap();
        assert_eq!(header.version, Version::V3);
        assert_eq!(header.msg_id, Some(12));
        assert_eq!(header.request_id, Some(12));
        assert!(header.flags.unwrap().reportable);
    }

    #[test]
    fn unknown_version_rejected() {
        let data = Bytes::from_static(&[0x30, 0x03, 0x02, 0x01, 0x02]);
        assert!(matches!(
            Message::decode(data.clone()),
            Err(Error::Decode {
                kind: DecodeErrorKind::UnknownVersion(2),
                ..
            })
        ));
        assert!(MessageHeader::peek(&data).is_err());
    }
}
