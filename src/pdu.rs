//! Protocol data units.
//!
//! Every PDU except the SNMPv1 Trap shares one layout:
//! `request-id, error-status, error-index, variable-bindings`. GETBULK reuses
//! the two error slots for non-repeaters and max-repetitions (RFC 3416).

use std::fmt;

use crate::ber::{Decoder, EncodeBuf, tag};
use crate::error::{DecodeErrorKind, Error, ErrorStatus, Result};
use crate::oid::Oid;
use crate::value::Value;
use crate::varbind::{VarBind, decode_varbind_list, encode_varbind_list, null_varbinds};

/// PDU kind, one per context-specific tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PduType {
    GetRequest,
    GetNextRequest,
    Response,
    SetRequest,
    TrapV1,
    GetBulkRequest,
    InformRequest,
    TrapV2,
    Report,
}

impl PduType {
    pub fn from_tag(t: u8) -> Option<Self> {
        Some(match t {
            tag::pdu::GET_REQUEST => Self::GetRequest,
            tag::pdu::GET_NEXT_REQUEST => Self::GetNextRequest,
            tag::pdu::RESPONSE => Self::Response,
            tag::pdu::SET_REQUEST => Self::SetRequest,
            tag::pdu::TRAP_V1 => Self::TrapV1,
            tag::pdu::GET_BULK_REQUEST => Self::GetBulkRequest,
            tag::pdu::INFORM_REQUEST => Self::InformRequest,
            tag::pdu::TRAP_V2 => Self::TrapV2,
            tag::pdu::REPORT => Self::Report,
            _ => return None,
        })
    }

    pub fn tag(self) -> u8 {
        match self {
            Self::GetRequest => tag::pdu::GET_REQUEST,
            Self::GetNextRequest => tag::pdu::GET_NEXT_REQUEST,
            Self::Response => tag::pdu::RESPONSE,
            Self::SetRequest => tag::pdu::SET_REQUEST,
            Self::TrapV1 => tag::pdu::TRAP_V1,
            Self::GetBulkRequest => tag::pdu::GET_BULK_REQUEST,
            Self::InformRequest => tag::pdu::INFORM_REQUEST,
            Self::TrapV2 => tag::pdu::TRAP_V2,
            Self::Report => tag::pdu::REPORT,
        }
    }

    /// Response-class PDUs (RFC 3411 Section 2.8) answer a request.
    pub fn is_response_class(self) -> bool {
        matches!(self, Self::Response | Self::Report)
    }

    /// Notification-class PDUs.
    pub fn is_notification(self) -> bool {
        matches!(self, Self::TrapV1 | Self::TrapV2 | Self::InformRequest)
    }

    /// Confirmed-class PDUs expect a response.
    pub fn is_confirmed(self) -> bool {
        matches!(
            self,
            Self::GetRequest
                | Self::GetNextRequest
                | Self::SetRequest
                | Self::GetBulkRequest
                | Self::InformRequest
        )
    }
}

impl fmt::Display for PduType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::GetRequest => "GetRequest",
            Self::GetNextRequest => "GetNextRequest",
            Self::Response => "Response",
            Self::SetRequest => "SetRequest",
            Self::TrapV1 => "Trap",
            Self::GetBulkRequest => "GetBulkRequest",
            Self::InformRequest => "InformRequest",
            Self::TrapV2 => "SNMPv2-Trap",
            Self::Report => "Report",
        };
        f.write_str(name)
    }
}

/// PDU in the common request/response layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdu {
    pub pdu_type: PduType,
    pub request_id: i32,
    /// Error status, or non-repeaters for GETBULK.
    pub error_status: i32,
    /// 1-based varbind index of the error, or max-repetitions for GETBULK.
    pub error_index: i32,
    pub varbinds: Vec<VarBind>,
}

/// Expected response sizing for a GETBULK request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkAccounting {
    pub non_repeaters: usize,
    pub repeaters: usize,
    pub max_repetitions: usize,
    /// Upper bound on varbinds the agent may return.
    pub max_varbinds: usize,
}

impl Pdu {
    fn with_varbinds(pdu_type: PduType, request_id: i32, varbinds: Vec<VarBind>) -> Self {
        Self {
            pdu_type,
            request_id,
            error_status: 0,
            error_index: 0,
            varbinds,
        }
    }

    pub fn get_request(request_id: i32, oids: &[Oid]) -> Self {
        Self::with_varbinds(PduType::GetRequest, request_id, null_varbinds(oids))
    }

    pub fn get_next_request(request_id: i32, oids: &[Oid]) -> Self {
        Self::with_varbinds(PduType::GetNextRequest, request_id, null_varbinds(oids))
    }

    pub fn set_request(request_id: i32, varbinds: Vec<VarBind>) -> Self {
        Self::with_varbinds(PduType::SetRequest, request_id, varbinds)
    }

    pub fn get_bulk(request_id: i32, non_repeaters: i32, max_repetitions: i32, oids: &[Oid]) -> Self {
        Self {
            pdu_type: PduType::GetBulkRequest,
            request_id,
            error_status: non_repeaters,
            error_index: max_repetitions,
            varbinds: null_varbinds(oids),
        }
    }

    pub fn response(request_id: i32, varbinds: Vec<VarBind>) -> Self {
        Self::with_varbinds(PduType::Response, request_id, varbinds)
    }

    pub fn inform_request(request_id: i32, varbinds: Vec<VarBind>) -> Self {
        Self::with_varbinds(PduType::InformRequest, request_id, varbinds)
    }

    pub fn trap_v2(request_id: i32, varbinds: Vec<VarBind>) -> Self {
        Self::with_varbinds(PduType::TrapV2, request_id, varbinds)
    }

    pub fn report(request_id: i32, varbinds: Vec<VarBind>) -> Self {
        Self::with_varbinds(PduType::Report, request_id, varbinds)
    }

    pub fn non_repeaters(&self) -> i32 {
        self.error_status
    }

    pub fn max_repetitions(&self) -> i32 {
        self.error_index
    }

    pub fn error_status_enum(&self) -> ErrorStatus {
        ErrorStatus::from_i32(self.error_status)
    }

    pub fn is_error(&self) -> bool {
        self.pdu_type != PduType::GetBulkRequest && self.error_status != 0
    }

    /// OID the error index points at, if it is in range.
    pub fn error_oid(&self) -> Option<&Oid> {
        let index = usize::try_from(self.error_index).ok()?.checked_sub(1)?;
        self.varbinds.get(index).map(|vb| &vb.oid)
    }

    /// GETBULK sizing per RFC 3416 Section 4.2.3, `None` for other PDUs.
    ///
    /// Negative fields count as zero and non-repeaters is capped at the
    /// varbind count.
    pub fn bulk_accounting(&self) -> Option<BulkAccounting> {
        if self.pdu_type != PduType::GetBulkRequest {
            return None;
        }
        let n = self.varbinds.len();
        let non_repeaters = (self.non_repeaters().max(0) as usize).min(n);
        let repeaters = n - non_repeaters;
        let max_repetitions = self.max_repetitions().max(0) as usize;
        Some(BulkAccounting {
            non_repeaters,
            repeaters,
            max_repetitions,
            max_varbinds: non_repeaters.saturating_add(repeaters.saturating_mul(max_repetitions)),
        })
    }

    /// Response echoing this PDU's varbinds (used to acknowledge INFORMs).
    pub fn to_response(&self) -> Self {
        Self::response(self.request_id, self.varbinds.clone())
    }

    /// Error response with a 1-based error index.
    pub fn to_error_response(&self, status: ErrorStatus, index: i32) -> Self {
        Self {
            pdu_type: PduType::Response,
            request_id: self.request_id,
            error_status: status.as_i32(),
            error_index: index,
            varbinds: self.varbinds.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.varbinds.iter().try_for_each(VarBind::validate)
    }

    pub fn encode(&self, buf: &mut EncodeBuf) {
        buf.push_constructed(self.pdu_type.tag(), |buf| {
            encode_varbind_list(buf, &self.varbinds);
            buf.push_integer(self.error_index);
            buf.push_integer(self.error_status);
            buf.push_integer(self.request_id);
        });
    }

    /// Decode a PDU in the common layout; rejects the SNMPv1 Trap tag.
    pub fn decode(decoder: &mut Decoder) -> Result<Self> {
        let start = decoder.offset();
        let t = decoder.read_tag()?;
        let pdu_type = match PduType::from_tag(t) {
            Some(PduType::TrapV1) => {
                return Err(Error::decode(start, DecodeErrorKind::UnexpectedPduType(t)));
            }
            Some(pdu_type) => pdu_type,
            None => return Err(Error::decode(start, DecodeErrorKind::UnknownPduType(t))),
        };
        let len = decoder.read_length()?;
        let mut body = decoder.sub_decoder(len)?;

        let request_id = body.read_integer()?;
        let error_status = body.read_integer()?;
        let error_index = body.read_integer()?;
        let varbinds = decode_varbind_list(&mut body)?;
        body.finish()?;

        Ok(Self {
            pdu_type,
            request_id,
            error_status,
            error_index,
            varbinds,
        })
    }
}

/// Generic trap codes for SNMPv1 traps (RFC 1157).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenericTrap {
    ColdStart,
    WarmStart,
    LinkDown,
    LinkUp,
    AuthenticationFailure,
    EgpNeighborLoss,
    EnterpriseSpecific,
}

impl GenericTrap {
    pub fn from_i32(v: i32) -> Option<Self> {
        Some(match v {
            0 => Self::ColdStart,
            1 => Self::WarmStart,
            2 => Self::LinkDown,
            3 => Self::LinkUp,
            4 => Self::AuthenticationFailure,
            5 => Self::EgpNeighborLoss,
            6 => Self::EnterpriseSpecific,
            _ => return None,
        })
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// sysUpTime.0
pub const SYS_UPTIME: [u32; 9] = [1, 3, 6, 1, 2, 1, 1, 3, 0];
/// snmpTrapOID.0
pub const SNMP_TRAP_OID: [u32; 11] = [1, 3, 6, 1, 6, 3, 1, 1, 4, 1, 0];
/// snmpTrapEnterprise.0
pub const SNMP_TRAP_ENTERPRISE: [u32; 11] = [1, 3, 6, 1, 6, 3, 1, 1, 4, 3, 0];
/// snmpTrapAddress.0
pub const SNMP_TRAP_ADDRESS: [u32; 10] = [1, 3, 6, 1, 6, 3, 18, 1, 3, 0];
/// snmpTraps, parent of the generic trap OIDs.
pub const SNMP_TRAPS: [u32; 9] = [1, 3, 6, 1, 6, 3, 1, 1, 5];

/// SNMPv1 Trap-PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrapV1Pdu {
    pub enterprise: Oid,
    pub agent_addr: [u8; 4],
    pub generic_trap: i32,
    pub specific_trap: i32,
    pub time_stamp: u32,
    pub varbinds: Vec<VarBind>,
}

impl TrapV1Pdu {
    pub fn generic_trap_enum(&self) -> Option<GenericTrap> {
        GenericTrap::from_i32(self.generic_trap)
    }

    /// snmpTrapOID equivalent (RFC 3584 Section 3.1).
    pub fn v2_trap_oid(&self) -> Oid {
        match self.generic_trap_enum() {
            Some(GenericTrap::EnterpriseSpecific) | None => {
                let arc = self.specific_trap.max(0) as u32;
                self.enterprise.child(0).child(arc)
            }
            Some(generic) => Oid::from(SNMP_TRAPS).child(generic.as_i32() as u32 + 1),
        }
    }

    /// Translate into SNMPv2-Trap form (RFC 3584 Section 3.1).
    pub fn to_v2_trap(&self, request_id: i32) -> Pdu {
        let mut varbinds = Vec::with_capacity(self.varbinds.len() + 4);
        varbinds.push(VarBind::new(
            Oid::from(SYS_UPTIME),
            Value::TimeTicks(self.time_stamp),
        ));
        varbinds.push(VarBind::new(
            Oid::from(SNMP_TRAP_OID),
            Value::ObjectIdentifier(self.v2_trap_oid()),
        ));
        varbinds.extend(self.varbinds.iter().cloned());
        varbinds.push(VarBind::new(
            Oid::from(SNMP_TRAP_ADDRESS),
            Value::IpAddress(self.agent_addr),
        ));
        varbinds.push(VarBind::new(
            Oid::from(SNMP_TRAP_ENTERPRISE),
            Value::ObjectIdentifier(self.enterprise.clone()),
        ));
        Pdu::trap_v2(request_id, varbinds)
    }

    pub fn validate(&self) -> Result<()> {
        self.enterprise.check_encodable()?;
        self.varbinds.iter().try_for_each(VarBind::validate)
    }

    pub fn encode(&self, buf: &mut EncodeBuf) {
        buf.push_constructed(tag::pdu::TRAP_V1, |buf| {
            encode_varbind_list(buf, &self.varbinds);
            buf.push_unsigned32(tag::application::TIMETICKS, self.time_stamp);
            buf.push_integer(self.specific_trap);
            buf.push_integer(self.generic_trap);
            buf.push_ip_address(self.agent_addr);
            buf.push_oid(&self.enterprise);
        });
    }

    pub fn decode(decoder: &mut Decoder) -> Result<Self> {
        let mut body = decoder.read_constructed(tag::pdu::TRAP_V1)?;
        let enterprise = body.read_oid()?;
        let agent_addr = body.read_ip_address()?;
        let generic_trap = body.read_integer()?;
        let specific_trap = body.read_integer()?;
        let time_stamp = body.read_unsigned32(tag::application::TIMETICKS)?;
        let varbinds = decode_varbind_list(&mut body)?;
        body.finish()?;
        Ok(Self {
            enterprise,
            agent_addr,
            generic_trap,
            specific_trap,
            time_stamp,
            varbinds,
        })
    }
}

/// Any PDU a message can carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PduBody {
    Pdu(Pdu),
    TrapV1(TrapV1Pdu),
}

impl PduBody {
    pub fn pdu_type(&self) -> PduType {
        match self {
            PduBody::Pdu(pdu) => pdu.pdu_type,
            PduBody::TrapV1(_) => PduType::TrapV1,
        }
    }

    /// Request ID, absent for SNMPv1 traps.
    pub fn request_id(&self) -> Option<i32> {
        match self {
            PduBody::Pdu(pdu) => Some(pdu.request_id),
            PduBody::TrapV1(_) => None,
        }
    }

    pub fn varbinds(&self) -> &[VarBind] {
        match self {
            PduBody::Pdu(pdu) => &pdu.varbinds,
            PduBody::TrapV1(trap) => &trap.varbinds,
        }
    }

    pub fn as_pdu(&self) -> Option<&Pdu> {
        match self {
            PduBody::Pdu(pdu) => Some(pdu),
            PduBody::TrapV1(_) => None,
        }
    }

    pub fn into_pdu(self) -> Option<Pdu> {
        match self {
            PduBody::Pdu(pdu) => Some(pdu),
            PduBody::TrapV1(_) => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            PduBody::Pdu(pdu) => pdu.validate(),
            PduBody::TrapV1(trap) => trap.validate(),
        }
    }

    pub fn encode(&self, buf: &mut EncodeBuf) {
        match self {
            PduBody::Pdu(pdu) => pdu.encode(buf),
            PduBody::TrapV1(trap) => trap.encode(buf),
        }
    }

    pub fn decode(decoder: &mut Decoder) -> Result<Self> {
        if decoder.peek_tag() == Some(tag::pdu::TRAP_V1) {
            TrapV1Pdu::decode(decoder).map(PduBody::TrapV1)
        } else {
            Pdu::decode(decoder).map(PduBody::Pdu)
        }
    }
}

impl From<Pdu> for PduBody {
    fn from(pdu: Pdu) -> Self {
        PduBody::Pdu(pdu)
    }
}

impl From<TrapV1Pdu> for PduBody {
    fn from(trap: TrapV1Pdu) -> Self {
        PduBody::TrapV1(trap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid;

    fn round_trip(body: PduBody) -> PduBody {
        let mut buf = EncodeBuf::new();
        body.encode(&mut buf);
        let decoded = PduBody::decode(&mut Decoder::new(buf.finish())).unwrap();
        assert_eq!(decoded, body);
        decoded
    }

    #[test]
    fn get_request_wire_format() {
        let pdu = Pdu::get_request(1, &[oid!(1, 3, 6, 1, 2, 1, 1, 1, 0)]);
        let mut buf = EncodeBuf::new();
        pdu.encode(&mut buf);
        let bytes = buf.finish();
        assert_eq!(
            &bytes[..],
            &[
                0xA0, 0x19, 0x02, 0x01, 0x01, 0x02, 0x01, 0x00, 0x02, 0x01, 0x00, 0x30, 0x0E,
                0x30, 0x0C, 0x06, 0x08, 0x2B, 0x06, 0x01, 0x02, 0x01, 0x01, 0x01, 0x00, 0x05,
                0x00
            ]
        );
    }

    #[test]
    fn kinds_round_trip() {
        let oids = [oid!(1, 3, 6, 1, 2, 1, 1)];
        round_trip(Pdu::get_next_request(7, &oids).into());
        round_trip(Pdu::get_bulk(8, 0, 25, &oids).into());
        round_trip(
            Pdu::set_request(9, vec![VarBind::new(oids[0].clone(), Value::from("x"))]).into(),
        );
        round_trip(Pdu::report(0, vec![]).into());
        round_trip(Pdu::inform_request(-5, vec![]).into());
    }

    #[test]
    fn bulk_fields_live_in_error_slots() {
        let pdu = Pdu::get_bulk(1, 1, 10, &[oid!(1, 3), oid!(1, 4), oid!(1, 5)]);
        assert_eq!(pdu.non_repeaters(), 1);
        assert_eq!(pdu.max_repetitions(), 10);
        assert!(!pdu.is_error());
        let acct = pdu.bulk_accounting().unwrap();
        assert_eq!(acct.non_repeaters, 1);
        assert_eq!(acct.repeaters, 2);
        assert_eq!(acct.max_varbinds, 21);
    }

    #[test]
    fn bulk_accounting_clamps() {
        let pdu = Pdu::get_bulk(1, 5, -3, &[oid!(1, 3)]);
        let acct = pdu.bulk_accounting().unwrap();
        assert_eq!(acct.non_repeaters, 1);
        assert_eq!(acct.repeaters, 0);
        assert_eq!(acct.max_varbinds, 1);
        assert!(Pdu::get_request(1, &[]).bulk_accounting().is_none());
    }

    #[test]
    fn error_index_is_one_based() {
        let req = Pdu::get_request(3, &[oid!(1, 3, 1), oid!(1, 3, 2)]);
        let resp = req.to_error_response(ErrorStatus::NoSuchName, 2);
        assert_eq!(resp.error_oid(), Some(&oid!(1, 3, 2)));
        assert!(resp.is_error());

        let out_of_range = req.to_error_response(ErrorStatus::GenErr, 3);
        assert_eq!(out_of_range.error_oid(), None);
        let zero = req.to_error_response(ErrorStatus::GenErr, 0);
        assert_eq!(zero.error_oid(), None);
    }

    #[test]
    fn unknown_pdu_tag_rejected() {
        let err = Pdu::decode(&mut Decoder::from_slice(&[0xA9, 0x00])).unwrap_err();
        assert!(matches!(
            err,
            Error::Decode {
                kind: DecodeErrorKind::UnknownPduType(0xA9),
                ..
            }
        ));
    }

    #[test]
    fn trap_v1_round_trip_and_translation() {
        let trap = TrapV1Pdu {
            enterprise: oid!(1, 3, 6, 1, 4, 1, 9999),
            agent_addr: [192, 0, 2, 7],
            generic_trap: GenericTrap::LinkDown.as_i32(),
            specific_trap: 0,
            time_stamp: 500,
            varbinds: vec![VarBind::new(oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 1, 3), Value::Integer(3))],
        };
        round_trip(trap.clone().into());

        assert_eq!(trap.v2_trap_oid(), oid!(1, 3, 6, 1, 6, 3, 1, 1, 5, 3));
        let v2 = trap.to_v2_trap(11);
        assert_eq!(v2.pdu_type, PduType::TrapV2);
        assert_eq!(v2.varbinds[0].value, Value::TimeTicks(500));
        assert_eq!(v2.varbinds.len(), 5);

        let specific = TrapV1Pdu {
            generic_trap: 6,
            specific_trap: 17,
            ..trap
        };
        assert_eq!(specific.v2_trap_oid(), oid!(1, 3, 6, 1, 4, 1, 9999, 0, 17));
    }

    #[test]
    fn pdu_type_classes() {
        assert!(PduType::Report.is_response_class());
        assert!(PduType::InformRequest.is_confirmed());
        assert!(PduType::InformRequest.is_notification());
        assert!(!PduType::TrapV2.is_confirmed());
        assert_eq!(PduType::from_tag(0xA5), Some(PduType::GetBulkRequest));
    }
}
