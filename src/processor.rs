//! Message processing (RFC 3412 §4).
//!
//! [`MessageProcessor`] joins the codec, the security models and access
//! control. It is stateless per message: every call handles exactly one
//! datagram, and the only shared state it touches is the engine registry.
//!
//! Inbound requests are authorized before the PDU is exposed. A denied
//! request is answered with an error Response instead of being delivered,
//! and a v3 message failing USM validation is answered with a Report when
//! the sender asked for one.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;

use crate::access::{AccessControl, ViewType};
use crate::error::{EncodeErrorKind, Error, ErrorStatus, Result};
use crate::message::{CommunityMessage, DEFAULT_MSG_MAX_SIZE, Message, MessageHeader, V3Message};
use crate::pdu::{Pdu, PduBody, PduType};
use crate::security::{
    CommunityEntry, CommunityModel, SecurityContext, Usm, UsmUser, report_kind_of,
};
use crate::v3::{DEFAULT_TIME_WINDOW, EngineRegistry, UsmSecurityParams, generate_engine_id};
use crate::version::Version;

/// A validated, authorized inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Incoming {
    pub version: Version,
    pub pdu: PduBody,
    pub context: SecurityContext,
    /// Community string as received (v1/v2c).
    pub community: Option<Bytes>,
    /// msgID (v3).
    pub msg_id: Option<i32>,
    /// USM parameters as received (v3).
    pub usm: Option<UsmSecurityParams>,
}

impl Incoming {
    pub fn pdu_type(&self) -> PduType {
        self.pdu.pdu_type()
    }

    pub fn request_id(&self) -> Option<i32> {
        self.pdu.request_id()
    }

    /// Key used to correlate with a pending exchange: msgID for v3,
    /// request-id otherwise.
    pub fn correlation_id(&self) -> Option<i32> {
        self.msg_id.or_else(|| self.request_id())
    }
}

/// What to do with an inbound datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Hand the message to the application or the dispatcher.
    Deliver(Incoming),
    /// Answer the source with these bytes; nothing is delivered.
    Respond(Bytes),
}

#[derive(Debug, Default)]
pub struct MessageProcessorBuilder {
    engine_id: Option<Bytes>,
    engine_boots: Option<u32>,
    time_window: Option<u32>,
    communities: CommunityModel,
    users: Vec<UsmUser>,
    access: AccessControl,
    max_msg_size: Option<usize>,
}

impl MessageProcessorBuilder {
    /// Local snmpEngineID; a random RFC 3411 id is generated when unset.
    pub fn engine_id(mut self, engine_id: impl Into<Bytes>) -> Self {
        self.engine_id = Some(engine_id.into());
        self
    }

    pub fn engine_boots(mut self, boots: u32) -> Self {
        self.engine_boots = Some(boots);
        self
    }

    /// Timeliness window in seconds (default 150).
    pub fn time_window(mut self, seconds: u32) -> Self {
        self.time_window = Some(seconds);
        self
    }

    pub fn community(mut self, entry: CommunityEntry) -> Self {
        self.communities.insert(entry);
        self
    }

    pub fn communities(mut self, communities: CommunityModel) -> Self {
        self.communities = communities;
        self
    }

    pub fn user(mut self, user: UsmUser) -> Self {
        self.users.push(user);
        self
    }

    pub fn access(mut self, access: impl Into<AccessControl>) -> Self {
        self.access = access.into();
        self
    }

    pub fn max_msg_size(mut self, size: usize) -> Self {
        self.max_msg_size = Some(size);
        self
    }

    pub fn build(self) -> MessageProcessor {
        let engines = Arc::new(EngineRegistry::new(
            self.engine_id.unwrap_or_else(generate_engine_id),
            self.engine_boots.unwrap_or(1),
            self.time_window.unwrap_or(DEFAULT_TIME_WINDOW),
        ));
        let max_msg_size = self.max_msg_size.unwrap_or(DEFAULT_MSG_MAX_SIZE as usize);
        let usm = Usm::builder()
            .users(self.users)
            .engines(engines)
            .max_msg_size(i32::try_from(max_msg_size).unwrap_or(i32::MAX))
            .build();
        MessageProcessor {
            communities: self.communities,
            usm,
            access: self.access,
            max_msg_size,
        }
    }
}

#[derive(Debug)]
pub struct MessageProcessor {
    communities: CommunityModel,
    usm: Usm,
    access: AccessControl,
    max_msg_size: usize,
}

impl MessageProcessor {
    pub fn builder() -> MessageProcessorBuilder {
        MessageProcessorBuilder::default()
    }

    pub fn engines(&self) -> &Arc<EngineRegistry> {
        self.usm.engines()
    }

    pub fn local_engine_id(&self) -> &Bytes {
        self.engines().local_engine_id()
    }

    pub fn usm(&self) -> &Usm {
        &self.usm
    }

    pub fn communities(&self) -> &CommunityModel {
        &self.communities
    }

    pub fn access(&self) -> &AccessControl {
        &self.access
    }

    pub fn max_msg_size(&self) -> usize {
        self.max_msg_size
    }

    /// Secure and encode an outgoing PDU.
    ///
    /// The local policy is consulted first; a PDU this engine may not emit
    /// fails with [`Error::AccessDenied`]. For v1/v2c the community comes
    /// from the community table entry mapped to the context's security
    /// name, or the security name itself when none is mapped. For v3 the
    /// msgID is the request-id and the authoritative engine is the
    /// context engine for requests and the local engine for responses and
    /// notifications that need no acknowledgement.
    pub fn prepare_outgoing(&self, version: Version, pdu: impl Into<PduBody>, ctx: &SecurityContext) -> Result<Bytes> {
        let pdu = pdu.into();
        if ctx.security_model != version.security_model() {
            return Err(Error::encode(EncodeErrorKind::SecurityModelMismatch { version }));
        }
        if let Some(view_type) = ViewType::for_pdu(pdu.pdu_type()) {
            let oids = pdu.varbinds().iter().map(|vb| &vb.oid);
            if let Some((_, reason)) = self.access.first_denied(ctx, view_type, oids) {
                return Err(Error::AccessDenied { reason });
            }
        }

        let bytes = if version.is_community() {
            let community = self
                .communities
                .community_for(&ctx.security_name)
                .unwrap_or(&ctx.security_name)
                .clone();
            self.communities.secure(version, community, pdu)?.encode()?
        } else {
            let Some(pdu) = pdu.into_pdu() else {
                return Err(Error::encode(EncodeErrorKind::UnsupportedPdu { version }));
            };
            let engine_id = match pdu.pdu_type {
                PduType::Response | PduType::Report | PduType::TrapV2 => self.local_engine_id().clone(),
                _ => ctx.context_engine_id.clone(),
            };
            self.usm.secure(pdu.request_id.max(0), ctx, &engine_id, pdu)?
        };
        self.check_size(bytes)
    }

    /// Unauthenticated GET used to learn a remote engine's id and clock.
    pub fn prepare_discovery(&self, msg_id: i32) -> Result<Bytes> {
        V3Message::discovery_request(msg_id).encode()
    }

    /// Answer an inbound message over the path it arrived on.
    pub fn prepare_response(&self, incoming: &Incoming, pdu: Pdu) -> Result<Bytes> {
        let bytes = match (&incoming.community, incoming.msg_id) {
            (Some(community), _) => CommunityMessage::new(incoming.version, community.clone(), pdu)?.encode()?,
            (None, Some(msg_id)) => {
                self.usm
                    .secure(msg_id, &incoming.context, self.local_engine_id(), pdu)?
            }
            (None, None) => {
                return Err(Error::encode(EncodeErrorKind::SecurityModelMismatch {
                    version: incoming.version,
                }));
            }
        };
        self.check_size(bytes)
    }

    fn check_size(&self, bytes: Bytes) -> Result<Bytes> {
        if bytes.len() > self.max_msg_size {
            return Err(Error::MessageTooLarge {
                size: bytes.len(),
                max: self.max_msg_size,
            });
        }
        Ok(bytes)
    }

    /// Decode, validate and authorize one datagram.
    ///
    /// Errors mean the datagram is to be discarded; they never affect
    /// other exchanges.
    pub fn process_incoming(&self, data: Bytes, source: Option<SocketAddr>) -> Result<ProcessOutcome> {
        let header = MessageHeader::peek(&data).inspect_err(|err| {
            tracing::debug!(target: "snmp_engine::processor", { snmp.source = ?source, error = %err }, "undecodable datagram");
        })?;
        tracing::trace!(
            target: "snmp_engine::processor",
            { snmp.source = ?source, version = %header.version, pdu_type = ?header.pdu_type, snmp.request_id = ?header.request_id },
            "inbound message"
        );

        let incoming = match Message::decode(data.clone())? {
            Message::Community(msg) => {
                let context = self.communities.validate(&msg, source)?;
                Incoming {
                    version: msg.version,
                    pdu: msg.pdu,
                    context,
                    community: Some(msg.community),
                    msg_id: None,
                    usm: None,
                }
            }
            Message::V3(msg) => match self.usm.validate(&data, &msg, source) {
                Ok(validated) => Incoming {
                    version: Version::V3,
                    pdu: PduBody::Pdu(validated.pdu),
                    context: validated.context,
                    community: None,
                    msg_id: Some(validated.msg_id),
                    usm: Some(validated.params),
                },
                Err(err) => return self.report_failure(&msg, err),
            },
        };
        self.authorize(incoming)
    }

    fn report_failure(&self, msg: &V3Message, err: Error) -> Result<ProcessOutcome> {
        let kind = report_kind_of(&err).filter(|_| msg.global.msg_flags.reportable);
        let Some(kind) = kind else {
            return Err(err);
        };
        tracing::debug!(
            target: "snmp_engine::processor",
            { snmp.source = ?err.target(), snmp.request_id = msg.msg_id(), error = %err, report = %kind },
            "answering with report"
        );
        self.usm.report(msg, kind).map(ProcessOutcome::Respond)
    }

    fn authorize(&self, incoming: Incoming) -> Result<ProcessOutcome> {
        let pdu_type = incoming.pdu_type();
        let Some(view_type) = ViewType::for_pdu(pdu_type) else {
            return Ok(ProcessOutcome::Deliver(incoming));
        };
        if let Some(bulk) = incoming.pdu.as_pdu().and_then(Pdu::bulk_accounting) {
            tracing::trace!(
                target: "snmp_engine::processor",
                { non_repeaters = bulk.non_repeaters, repeaters = bulk.repeaters, max_varbinds = bulk.max_varbinds },
                "GETBULK accounting"
            );
        }

        let oids = incoming.pdu.varbinds().iter().map(|vb| &vb.oid);
        let Some((index, reason)) = self.access.first_denied(&incoming.context, view_type, oids) else {
            return Ok(ProcessOutcome::Deliver(incoming));
        };
        tracing::debug!(
            target: "snmp_engine::processor",
            { version = %incoming.version, %pdu_type, %reason, index },
            "inbound request denied"
        );

        let Some(request) = incoming.pdu.as_pdu().filter(|_| pdu_type.is_confirmed()) else {
            return Err(Error::AccessDenied { reason });
        };
        let position = i32::try_from(index + 1).unwrap_or(i32::MAX);
        let (status, error_index) = match (incoming.version, pdu_type) {
            (Version::V1, _) => (ErrorStatus::NoSuchName, position),
            (_, PduType::SetRequest) => (ErrorStatus::NoAccess, position),
            _ => (ErrorStatus::AuthorizationError, 0),
        };
        let response = request.to_error_response(status, error_index);
        self.prepare_response(&incoming, response)
            .map(ProcessOutcome::Respond)
    }
}
