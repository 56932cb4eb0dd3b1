//! Community-based security (RFC 3584 §5).
//!
//! Outbound, the community string is stamped into the message. Inbound
//! requests and notifications must carry a community present in the table,
//! which maps it to a security name and context. Responses are exempt: the
//! dispatcher matches their community against the request they answer.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;

use super::SecurityContext;
use crate::error::{Error, Result};
use crate::message::CommunityMessage;
use crate::pdu::PduBody;
use crate::version::Version;

/// One row of the community table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommunityEntry {
    pub community: Bytes,
    pub security_name: Bytes,
    pub context_name: Bytes,
}

impl CommunityEntry {
    pub fn new(community: impl Into<Bytes>, security_name: impl Into<Bytes>) -> Self {
        Self {
            community: community.into(),
            security_name: security_name.into(),
            context_name: Bytes::new(),
        }
    }

    pub fn with_context_name(mut self, context_name: impl Into<Bytes>) -> Self {
        self.context_name = context_name.into();
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommunityModel {
    entries: HashMap<Bytes, CommunityEntry>,
}

impl CommunityModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: CommunityEntry) {
        self.entries.insert(entry.community.clone(), entry);
    }

    pub fn with_entry(mut self, entry: CommunityEntry) -> Self {
        self.insert(entry);
        self
    }

    pub fn get(&self, community: &[u8]) -> Option<&CommunityEntry> {
        self.entries.get(community)
    }

    /// Community to stamp on messages sent as `security_name`.
    pub fn community_for(&self, security_name: &[u8]) -> Option<&Bytes> {
        self.entries
            .values()
            .find(|entry| entry.security_name == security_name)
            .map(|entry| &entry.community)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stamp the community into an outgoing message.
    pub fn secure(&self, version: Version, community: impl Into<Bytes>, pdu: impl Into<PduBody>) -> Result<CommunityMessage> {
        CommunityMessage::new(version, community, pdu)
    }

    /// Map an inbound message to its security context.
    pub fn validate(&self, msg: &CommunityMessage, source: Option<SocketAddr>) -> Result<SecurityContext> {
        let model = msg.version.security_model();
        if let Some(entry) = self.entries.get(&msg.community) {
            return Ok(SecurityContext::community(model, entry.security_name.clone())
                .with_context_name(entry.context_name.clone()));
        }
        if msg.pdu.pdu_type().is_response_class() {
            return Ok(SecurityContext::community(model, msg.community.clone()));
        }
        tracing::debug!(
            target: "snmp_engine::security",
            { snmp.source = ?source, version = %msg.version, pdu_type = %msg.pdu.pdu_type() },
            "unknown community"
        );
        Err(Error::NoSuchCommunity { target: source })
    }
}

impl FromIterator<CommunityEntry> for CommunityModel {
    fn from_iter<I: IntoIterator<Item = CommunityEntry>>(iter: I) -> Self {
        let mut model = Self::new();
        for entry in iter {
            model.insert(entry);
        }
        model
    }
}
