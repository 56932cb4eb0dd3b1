//! Notification intake and origination.

use std::net::SocketAddr;

use bytes::Bytes;
use tokio::sync::mpsc::error::TrySendError;
use tracing::instrument;

use super::{Dispatcher, Inner, Target};
use crate::error::{EncodeErrorKind, Error, Result};
use crate::oid::Oid;
use crate::pdu::{Pdu, PduBody, PduType, SNMP_TRAP_OID};
use crate::processor::Incoming;
use crate::security::SecurityContext;
use crate::transport::Transport;
use crate::value::Value;
use crate::varbind::VarBind;
use crate::version::Version;

/// An unsolicited TRAP or INFORM.
///
/// INFORMs have already been acknowledged when they reach the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub source: SocketAddr,
    pub version: Version,
    pub context: SecurityContext,
    /// Community string (v1/v2c).
    pub community: Option<Bytes>,
    pub pdu: PduBody,
}

impl Notification {
    fn from_incoming(incoming: Incoming, source: SocketAddr) -> Self {
        Self {
            source,
            version: incoming.version,
            context: incoming.context,
            community: incoming.community,
            pdu: incoming.pdu,
        }
    }

    pub fn pdu_type(&self) -> PduType {
        self.pdu.pdu_type()
    }

    pub fn is_inform(&self) -> bool {
        self.pdu_type() == PduType::InformRequest
    }

    pub fn varbinds(&self) -> &[VarBind] {
        self.pdu.varbinds()
    }

    /// The notification's snmpTrapOID; SNMPv1 traps are mapped per RFC 3584.
    pub fn trap_oid(&self) -> Option<Oid> {
        match &self.pdu {
            PduBody::TrapV1(trap) => Some(trap.v2_trap_oid()),
            PduBody::Pdu(pdu) => {
                let trap_oid = Oid::from_slice(&SNMP_TRAP_OID);
                pdu.varbinds.iter().find_map(|vb| match &vb.value {
                    Value::ObjectIdentifier(oid) if vb.oid == trap_oid => Some(oid.clone()),
                    _ => None,
                })
            }
        }
    }
}

impl<T: Transport> Inner<T> {
    /// Handle a delivered message that answers no local request.
    pub(super) async fn handle_unsolicited(&self, incoming: Incoming, source: SocketAddr) {
        match incoming.pdu_type() {
            PduType::InformRequest => {
                let Some(ack) = incoming.pdu.as_pdu().map(Pdu::to_response) else {
                    return;
                };
                match self.processor.prepare_response(&incoming, ack) {
                    Ok(bytes) => {
                        if let Err(err) = self.transport.send_to(&bytes, source).await {
                            tracing::warn!(target: "snmp_engine::dispatcher", { snmp.target = %source, error = %err }, "failed to acknowledge inform");
                        }
                    }
                    Err(err) => {
                        tracing::warn!(target: "snmp_engine::dispatcher", { snmp.source = %source, error = %err }, "cannot acknowledge inform");
                        return;
                    }
                }
            }
            PduType::TrapV1 | PduType::TrapV2 => {}
            pdu_type => {
                tracing::debug!(
                    target: "snmp_engine::dispatcher",
                    { snmp.source = %source, %pdu_type },
                    "no command responder, dropping request"
                );
                return;
            }
        }

        let notification = Notification::from_incoming(incoming, source);
        tracing::debug!(
            target: "snmp_engine::dispatcher",
            { snmp.source = %source, pdu_type = %notification.pdu_type(), version = %notification.version },
            "notification received"
        );
        match self.notify_tx.try_send(notification) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(target: "snmp_engine::dispatcher", { snmp.source = %source }, "notification channel full, dropping notification");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::trace!(target: "snmp_engine::dispatcher", "notification receiver dropped");
            }
        }
    }
}

impl<T: Transport> Dispatcher<T> {
    /// Originate a notification.
    ///
    /// TRAPs are sent once and return `None` without waiting for anything.
    /// INFORMs are confirmed requests and return the receiver's response.
    #[instrument(level = "debug", skip(self, target, pdu), fields(snmp.target = %target.addr))]
    pub async fn notify(&self, target: &Target, pdu: impl Into<PduBody>) -> Result<Option<Pdu>> {
        let pdu = pdu.into();
        match pdu {
            PduBody::Pdu(pdu) if pdu.pdu_type == PduType::InformRequest => self.send(target, pdu).await.map(Some),
            PduBody::Pdu(pdu) if pdu.pdu_type == PduType::TrapV2 => {
                let request_id = self.inner.allocate_request_id();
                self.trap(target, PduBody::Pdu(Pdu { request_id, ..pdu })).await
            }
            PduBody::TrapV1(trap) => self.trap(target, PduBody::TrapV1(trap)).await,
            PduBody::Pdu(_) => Err(Error::encode(EncodeErrorKind::UnsupportedPdu {
                version: target.version,
            })),
        }
    }

    async fn trap(&self, target: &Target, pdu: PduBody) -> Result<Option<Pdu>> {
        self.inner.ensure_open()?;
        let (ctx, _) = self.security_context(target, pdu.pdu_type()).await?;
        let bytes = self.inner.processor.prepare_outgoing(target.version, pdu, &ctx)?;
        self.inner.transport.send_to(&bytes, target.addr).await?;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::dispatcher::Retry;
    use crate::message::CommunityMessage;
    use crate::oid;
    use crate::security::CommunityEntry;
    use crate::processor::MessageProcessor;
    use crate::transport::MockTransport;

    fn manager_addr() -> SocketAddr {
        "127.0.0.1:162".parse().unwrap()
    }

    fn agent_addr() -> SocketAddr {
        "127.0.0.1:50001".parse().unwrap()
    }

    fn link_down() -> Vec<VarBind> {
        vec![
            VarBind::new(oid!(1, 3, 6, 1, 2, 1, 1, 3, 0), Value::TimeTicks(1200)),
            VarBind::new(
                Oid::from_slice(&SNMP_TRAP_OID),
                Value::ObjectIdentifier(oid!(1, 3, 6, 1, 6, 3, 1, 1, 5, 3)),
            ),
        ]
    }

    #[tokio::test]
    async fn inform_acknowledged_then_delivered() {
        let mock = MockTransport::new(manager_addr());
        let processor = MessageProcessor::builder()
            .community(CommunityEntry::new("public", "monitor"))
            .build();
        let (_dispatcher, mut notifications) = Dispatcher::builder().processor(processor).build(mock.clone());

        let inform = Pdu::inform_request(77, link_down());
        let bytes = CommunityMessage::new(Version::V2c, "public", inform).unwrap().encode().unwrap();
        mock.deliver(bytes, agent_addr());

        let (ack, to) = mock.next_sent().await;
        assert_eq!(to, agent_addr());
        let ack = CommunityMessage::decode(ack).unwrap();
        assert_eq!(ack.pdu.pdu_type(), PduType::Response);
        assert_eq!(ack.pdu.request_id(), Some(77));
        assert_eq!(ack.pdu.varbinds().len(), 2);

        let notification = notifications.recv().await.unwrap();
        assert!(notification.is_inform());
        assert_eq!(notification.source, agent_addr());
        assert_eq!(notification.context.security_name, "monitor");
        assert_eq!(notification.trap_oid(), Some(oid!(1, 3, 6, 1, 6, 3, 1, 1, 5, 3)));
    }

    #[tokio::test]
    async fn trap_with_unknown_community_dropped() {
        let mock = MockTransport::new(manager_addr());
        let processor = MessageProcessor::builder()
            .community(CommunityEntry::new("public", "monitor"))
            .build();
        let (_dispatcher, mut notifications) = Dispatcher::builder().processor(processor).build(mock.clone());

        let trap = |community: &'static str| {
            CommunityMessage::new(Version::V2c, community, Pdu::trap_v2(5, link_down()))
                .unwrap()
                .encode()
                .unwrap()
        };
        mock.deliver(trap("guess"), agent_addr());
        mock.deliver(trap("public"), agent_addr());

        let notification = notifications.recv().await.unwrap();
        assert_eq!(notification.community.as_deref(), Some(&b"public"[..]));
        assert_eq!(notification.pdu_type(), PduType::TrapV2);
        assert_eq!(mock.sent_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn trap_is_fire_and_forget() {
        let mock = MockTransport::new(agent_addr());
        let (dispatcher, _notifications) = Dispatcher::builder()
            .timeout(Duration::from_secs(1))
            .retry(Retry::none())
            .build(mock.clone());

        let target = crate::dispatcher::Target::v2c(manager_addr(), "public");
        let outcome = dispatcher.notify(&target, Pdu::trap_v2(0, link_down())).await.unwrap();
        assert!(outcome.is_none());
        assert_eq!(mock.sent_count(), 1);
        assert_eq!(dispatcher.pending_count(), 0);

        let (sent, to) = mock.next_sent().await;
        assert_eq!(to, manager_addr());
        let msg = CommunityMessage::decode(sent).unwrap();
        assert_eq!(msg.pdu.pdu_type(), PduType::TrapV2);
    }

    #[tokio::test(start_paused = true)]
    async fn inform_waits_for_ack() {
        let mock = MockTransport::new(agent_addr());
        mock.set_responder(|data, target| {
            let msg = CommunityMessage::decode(Bytes::copy_from_slice(data)).ok()?;
            let ack = msg.pdu.as_pdu()?.to_response();
            Some((CommunityMessage::new(msg.version, msg.community, ack).ok()?.encode().ok()?, target))
        });
        let (dispatcher, _notifications) = Dispatcher::builder().build(mock.clone());

        let target = crate::dispatcher::Target::v2c(manager_addr(), "public");
        let ack = dispatcher
            .notify(&target, Pdu::inform_request(0, link_down()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ack.pdu_type, PduType::Response);
        assert_eq!(ack.varbinds.len(), 2);
    }

    #[tokio::test]
    async fn get_request_is_not_a_notification() {
        let mock = MockTransport::new(manager_addr());
        let (dispatcher, _notifications) = Dispatcher::builder().build(mock.clone());
        let err = dispatcher
            .notify(
                &crate::dispatcher::Target::v2c(agent_addr(), "public"),
                Pdu::get_request(0, &[oid!(1, 3, 6)]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Encode { .. }));
    }
}
