//! Community-based messages (SNMPv1 and SNMPv2c).
//!
//! `SEQUENCE { version INTEGER, community OCTET STRING, data PDU }`

use bytes::Bytes;

use crate::ber::{Decoder, EncodeBuf};
use crate::error::{DecodeErrorKind, EncodeErrorKind, Error, Result};
use crate::pdu::{PduBody, PduType};
use crate::version::Version;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommunityMessage {
    pub version: Version,
    pub community: Bytes,
    pub pdu: PduBody,
}

impl CommunityMessage {
    /// Build a message, checking the PDU kind is legal for the version.
    pub fn new(version: Version, community: impl Into<Bytes>, pdu: impl Into<PduBody>) -> Result<Self> {
        let pdu = pdu.into();
        if !version.is_community() {
            return Err(Error::encode(EncodeErrorKind::SecurityModelMismatch { version }));
        }
        if !pdu_allowed(version, pdu.pdu_type()) {
            return Err(Error::encode(EncodeErrorKind::UnsupportedPdu { version }));
        }
        Ok(Self {
            version,
            community: community.into(),
            pdu,
        })
    }

    pub fn v1(community: impl Into<Bytes>, pdu: impl Into<PduBody>) -> Result<Self> {
        Self::new(Version::V1, community, pdu)
    }

    pub fn v2c(community: impl Into<Bytes>, pdu: impl Into<PduBody>) -> Result<Self> {
        Self::new(Version::V2c, community, pdu)
    }

    pub fn encode(&self) -> Result<Bytes> {
        self.pdu.validate()?;
        let mut buf = EncodeBuf::new();
        buf.push_sequence(|buf| {
            self.pdu.encode(buf);
            buf.push_octet_string(&self.community);
            buf.push_integer(self.version.as_i32());
        });
        Ok(buf.finish())
    }

    pub fn decode(data: Bytes) -> Result<Self> {
        let mut decoder = Decoder::new(data);
        let mut seq = decoder.read_sequence()?;
        let offset = seq.offset();
        let raw = seq.read_integer()?;
        match Version::from_i32(raw) {
            Some(version) if version.is_community() => Self::decode_from_sequence(&mut seq, version),
            _ => Err(Error::decode(offset, DecodeErrorKind::UnknownVersion(raw))),
        }
    }

    /// Decode the fields after msgVersion.
    pub(crate) fn decode_from_sequence(seq: &mut Decoder, version: Version) -> Result<Self> {
        let community = seq.read_octet_string()?;
        let offset = seq.offset();
        let pdu = PduBody::decode(seq)?;
        if !pdu_allowed(version, pdu.pdu_type()) {
            tracing::debug!(target: "snmp_engine::ber", { snmp.offset = offset, %version, pdu_type = %pdu.pdu_type() }, "PDU not valid for version");
            return Err(Error::decode(offset, DecodeErrorKind::UnexpectedPduType(pdu.pdu_type().tag())));
        }
        // Some agents pad datagrams; anything after the message is ignored.
        Ok(Self {
            version,
            community,
            pdu,
        })
    }
}

/// SNMPv1 lacks GETBULK, INFORM, SNMPv2-Trap and Report; only SNMPv1 carries Trap-PDU.
pub(crate) fn pdu_allowed(version: Version, pdu_type: PduType) -> bool {
    match pdu_type {
        PduType::TrapV1 => version == Version::V1,
        PduType::GetBulkRequest | PduType::InformRequest | PduType::TrapV2 | PduType::Report => {
            version != Version::V1
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid;
    use crate::pdu::{Pdu, TrapV1Pdu};

    #[test]
    fn v2c_get_wire_format() {
        let pdu = Pdu::get_request(1, &[oid!(1, 3, 6, 1, 2, 1, 1, 1, 0)]);
        let bytes = CommunityMessage::v2c("public", pdu).unwrap().encode().unwrap();
        assert_eq!(
            &bytes[..],
            &[
                0x30, 0x26, 0x02, 0x01, 0x01, 0x04, 0x06, b'p', b'u', b'b', b'l', b'i', b'c', 0xA0,
                0x19, 0x02, 0x01, 0x01, 0x02, 0x01, 0x00, 0x02, 0x01, 0x00, 0x30, 0x0E, 0x30, 0x0C,
                0x06, 0x08, 0x2B, 0x06, 0x01, 0x02, 0x01, 0x01, 0x01, 0x00, 0x05, 0x00,
            ]
        );
        let decoded = CommunityMessage::decode(bytes).unwrap();
        assert_eq!(decoded.version, Version::V2c);
        assert_eq!(decoded.community, "public");
    }

    #[test]
    fn version_pdu_pairing() {
        let bulk = Pdu::get_bulk(1, 0, 10, &[oid!(1, 3, 6)]);
        assert!(matches!(
            CommunityMessage::v1("public", bulk.clone()),
            Err(Error::Encode {
                kind: EncodeErrorKind::UnsupportedPdu { version: Version::V1 }
            })
        ));
        assert!(CommunityMessage::v2c("public", bulk.clone()).is_ok());
        assert!(matches!(
            CommunityMessage::new(Version::V3, "public", bulk),
            Err(Error::Encode {
                kind: EncodeErrorKind::SecurityModelMismatch { .. }
            })
        ));

        let trap = TrapV1Pdu {
            enterprise: oid!(1, 3, 6, 1, 4, 1, 9),
            agent_addr: [10, 0, 0, 1],
            generic_trap: 6,
            specific_trap: 1,
            time_stamp: 100,
            varbinds: vec![],
        };
        assert!(CommunityMessage::v2c("public", trap.clone()).is_err());
        let bytes = CommunityMessage::v1("public", trap.clone()).unwrap().encode().unwrap();
        assert_eq!(CommunityMessage::decode(bytes).unwrap().pdu, PduBody::TrapV1(trap));
    }

    #[test]
    fn v1_getbulk_rejected_on_decode() {
        let mut buf = EncodeBuf::new();
        buf.push_sequence(|buf| {
            Pdu::get_bulk(5, 0, 3, &[oid!(1, 3)]).encode(buf);
            buf.push_octet_string(b"public");
            buf.push_integer(0);
        });
        assert!(matches!(
            CommunityMessage::decode(buf.finish()),
            Err(Error::Decode {
                kind: DecodeErrorKind::UnexpectedPduType(0xA5),
                ..
            })
        ));
    }

    #[test]
    fn v3_version_rejected() {
        let data = [0x30, 0x03, 0x02, 0x01, 0x03];
        assert!(matches!(
            CommunityMessage::decode(Bytes::copy_from_slice(&data)),
            Err(Error::Decode {
                kind: DecodeErrorKind::UnknownVersion(3),
                ..
            })
        ));
    }
}
